//! Holdfast Core Library
//!
//! Domain models, the error taxonomy, configuration, retention math and input
//! validation shared by every holdfast crate.

pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod retention;
pub mod task_error;
pub mod validation;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{ErrorMetadata, LogLevel, PinError, PinResult};
pub use retention::garbage_collect_at;
pub use task_error::TaskError;
