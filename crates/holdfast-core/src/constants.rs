//! Queue topology and network names.

/// Logical name of the public network.
pub const PUBLIC_NETWORK: &str = "public";

/// Queue consumed by workers pinning content to a network node.
pub const IPFS_PIN_QUEUE: &str = "ipfs-pin-queue";
/// Queue consumed by workers pinning content across the cluster.
pub const IPFS_CLUSTER_PIN_QUEUE: &str = "ipfs-cluster-pin-queue";
/// Queue consumed by workers removing pins from a network node.
pub const IPFS_PIN_REMOVAL_QUEUE: &str = "ipfs-pin-removal-queue";
/// Staged file uploads. No exchange, so consumers share the load round-robin.
pub const IPFS_FILE_QUEUE: &str = "ipfs-file-queue";
/// IPNS record publication.
pub const IPNS_ENTRY_QUEUE: &str = "ipns-entry-queue";

/// Fan-out exchange for pin events.
pub const PIN_EXCHANGE: &str = "ipfs-pin";
/// Fan-out exchange for pin removal events.
pub const PIN_REMOVAL_EXCHANGE: &str = "ipfs-pin-removal";

/// Every queue a worker pool may consume from.
pub const ALL_QUEUES: &[&str] = &[
    IPFS_PIN_QUEUE,
    IPFS_CLUSTER_PIN_QUEUE,
    IPFS_PIN_REMOVAL_QUEUE,
    IPFS_FILE_QUEUE,
    IPNS_ENTRY_QUEUE,
];

/// Default exchange bindings (exchange, queue).
pub const DEFAULT_BINDINGS: &[(&str, &str)] = &[
    (PIN_EXCHANGE, IPFS_PIN_QUEUE),
    (PIN_REMOVAL_EXCHANGE, IPFS_PIN_REMOVAL_QUEUE),
];
