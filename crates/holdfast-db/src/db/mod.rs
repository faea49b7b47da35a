//! Database repositories for data access layer
//!
//! `upload` holds the ledger trait and its Postgres implementation, `memory`
//! the in-process ledger, `queue` the tables behind the durable broker and
//! `network` private network membership used by the access gate.

pub mod memory;
pub mod network;
pub mod queue;
pub mod upload;

pub use memory::MemoryUploadLedger;
pub use network::NetworkMemberRepository;
pub use queue::QueueRepository;
pub use upload::{create_upload_ledger, UploadLedger, UploadRepository};
