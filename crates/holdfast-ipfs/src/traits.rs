//! Storage backend abstraction traits
//!
//! [`StorageBackend`] is one IPFS node (public or private network);
//! [`ClusterApi`] is the cluster peer that tracks pin allocations across nodes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use holdfast_core::models::ClusterStatusEntry;
use holdfast_core::PinResult;

/// Result of adding bytes to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedContent {
    pub content_id: String,
    pub size: u64,
}

/// Parameters of an IPNS record publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePublish {
    pub content_id: String,
    pub key: String,
    pub lifetime: Duration,
    pub ttl: Duration,
    pub resolve: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedName {
    /// IPNS name the record was published under.
    pub name: String,
    /// Path the name now points to.
    pub value: String,
}

/// One content-addressed storage node.
///
/// `pin` and `unpin` are idempotent: pinning pinned content and unpinning
/// content that is not pinned both succeed.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn add_content(&self, data: Vec<u8>, file_name: Option<&str>) -> PinResult<AddedContent>;

    async fn pin(&self, content_id: &str) -> PinResult<()>;

    async fn unpin(&self, content_id: &str) -> PinResult<()>;

    /// Cumulative size in bytes of the DAG rooted at `content_id`.
    async fn object_size(&self, content_id: &str) -> PinResult<u64>;

    /// Whether the node holds a recursive pin for `content_id`.
    async fn has_pin(&self, content_id: &str) -> PinResult<bool>;

    async fn publish_name(&self, request: &NamePublish) -> PinResult<PublishedName>;
}

/// Cluster-wide pin tracking.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Status as seen by the local cluster peer only.
    async fn local_status(&self, content_id: &str) -> PinResult<ClusterStatusEntry>;

    /// Consensus status across all cluster peers.
    async fn global_status(&self, content_id: &str) -> PinResult<ClusterStatusEntry>;

    /// Every CID the local peer tracks, with its local status.
    async fn all_local_statuses(&self) -> PinResult<Vec<ClusterStatusEntry>>;

    /// Re-trigger pinning of `content_id` on the local peer.
    async fn recover_local(&self, content_id: &str) -> PinResult<ClusterStatusEntry>;

    /// Stop tracking `content_id` anywhere in the cluster.
    async fn remove_pin(&self, content_id: &str) -> PinResult<()>;

    /// Ask the cluster to allocate and pin `content_id`.
    async fn pin(&self, content_id: &str) -> PinResult<()>;
}
