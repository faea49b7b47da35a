//! Data models
//!
//! Uploads live in the ledger, intents travel through the queue, cluster
//! statuses are computed on demand and never stored. Request models carry
//! caller input into the pin service.

mod cluster;
mod intent;
mod queue;
mod request;
mod upload;

pub use cluster::*;
pub use intent::*;
pub use queue::*;
pub use request::*;
pub use upload::*;
