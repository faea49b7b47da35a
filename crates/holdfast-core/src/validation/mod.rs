//! Validation modules

pub mod content_id;
pub mod duration;
pub mod request;

pub use content_id::validate_content_id;
pub use duration::{format_duration, parse_duration};
pub use request::{validate_hold_months, validate_network_name, MAX_NETWORK_NAME_LENGTH};
