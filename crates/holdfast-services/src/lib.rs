//! Holdfast Services Layer
//!
//! The components that sit between a transport and the stores: the access
//! gate, the request-path [`PinService`], the worker-side
//! [`IntentProcessor`], and the two periodic tasks, [`GarbageCollector`] and
//! [`ClusterReconciler`]. All state lives in the ledger and the broker; every
//! service here is cheap to clone and safe to share across tasks.

pub mod access;
pub mod blob;
pub mod gc;
pub mod pin_service;
pub mod processor;
pub mod reconciler;
// In-memory cluster and backend doubles, for tests only
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use access::{require_admin, AccessGate, PgAccessGate, StaticAccessGate};
#[cfg(feature = "storage-s3")]
pub use blob::S3BlobStore;
pub use blob::{BlobStore, MemoryBlobStore};
pub use gc::GarbageCollector;
pub use pin_service::{PinService, Staging};
pub use processor::IntentProcessor;
pub use reconciler::ClusterReconciler;
