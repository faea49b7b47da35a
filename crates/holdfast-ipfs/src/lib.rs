//! Holdfast storage backends
//!
//! Seams to the content-addressed store: the IPFS node HTTP API (one node per
//! network) and the IPFS Cluster REST API. [`BackendRouter`] picks the node
//! for a network name.
//!
//! Every call is bounded by the client's request timeout and reports failures
//! as [`holdfast_core::PinError`] (`StorageBackend` for node calls,
//! `ClusterStatus` / `ClusterPinRemoval` for cluster calls).

pub mod cluster;
pub mod node;
pub mod router;
pub mod traits;

pub use cluster::ClusterClient;
pub use node::IpfsNodeClient;
pub use router::BackendRouter;
pub use traits::{AddedContent, ClusterApi, NamePublish, PublishedName, StorageBackend};
