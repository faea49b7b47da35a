//! Retention math shared by the upload ledger and the garbage collector.
//!
//! `garbage_collect_at = now + hold_months` calendar months. When the target
//! month is shorter than the start day, the date is clamped to the last day of
//! the target month (Jan 31 + 1 month = Feb 28/29), never rolled over.

use chrono::{DateTime, Months, Utc};

use crate::error::{PinError, PinResult};

/// Compute the garbage collection date for a hold of `hold_months` starting at `now`.
pub fn garbage_collect_at(now: DateTime<Utc>, hold_months: i64) -> PinResult<DateTime<Utc>> {
    let months = u32::try_from(hold_months).map_err(|_| {
        PinError::validation(format!(
            "hold time must be between 0 and {} months, got {}",
            u32::MAX,
            hold_months
        ))
    })?;

    now.checked_add_months(Months::new(months)).ok_or_else(|| {
        PinError::validation(format!(
            "hold time of {} months overflows the calendar",
            hold_months
        ))
    })
}

/// Of two candidate dates, the one a renewal is allowed to keep.
pub fn extended(current: DateTime<Utc>, candidate: DateTime<Utc>) -> DateTime<Utc> {
    current.max(candidate)
}
