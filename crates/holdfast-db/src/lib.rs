//! Holdfast Database Layer
//!
//! Repositories over the relational store: the upload ledger, the durable
//! queue tables backing the broker, and private network membership. The
//! ledger also has an in-memory implementation used by tests and dry runs.

// Module declarations
pub mod db;

// Re-exports: Ledger trait, implementations and factory
pub use db::{create_upload_ledger, MemoryUploadLedger, UploadLedger, UploadRepository};

// Re-exports: Broker tables and membership
pub use db::{NetworkMemberRepository, QueueRepository};

// Re-exports: Module convenience re-exports
pub use db::queue;
