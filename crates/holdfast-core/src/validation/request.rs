//! Field-level checks shared by request-path operations.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{PinError, PinResult};

pub const MAX_NETWORK_NAME_LENGTH: usize = 255;

static NETWORK_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\-\.]+$").expect("valid network name pattern"));

pub fn validate_hold_months(hold_months: i64, max_hold_months: i64) -> PinResult<()> {
    if hold_months < 0 {
        return Err(PinError::validation(format!(
            "hold time must be >= 0 months, got {}",
            hold_months
        )));
    }
    if hold_months > max_hold_months {
        return Err(PinError::validation(format!(
            "hold time of {} months exceeds the maximum of {}",
            hold_months, max_hold_months
        )));
    }
    Ok(())
}

pub fn validate_network_name(network_name: &str) -> PinResult<()> {
    if network_name.is_empty() || network_name.len() > MAX_NETWORK_NAME_LENGTH {
        return Err(PinError::validation(format!(
            "network name must be 1-{} characters",
            MAX_NETWORK_NAME_LENGTH
        )));
    }
    if !NETWORK_NAME.is_match(network_name) {
        return Err(PinError::validation(format!(
            "network name '{}' contains invalid characters",
            network_name
        )));
    }
    Ok(())
}
