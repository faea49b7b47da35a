//! Duration strings as accepted for IPNS lifetimes and TTLs.
//!
//! Format: one or more `<number><unit>` pairs, units `ns`, `us`, `µs`, `ms`,
//! `s`, `m`, `h`. Examples: `24h`, `90m`, `1h30m`, `1.5h`.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

use crate::error::{PinError, PinResult};

static DURATION_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)(ns|us|µs|ms|s|m|h)").expect("valid duration pattern")
});

pub fn parse_duration(input: &str) -> PinResult<Duration> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(PinError::validation("duration cannot be empty"));
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    let mut consumed = 0;
    let mut total_nanos: f64 = 0.0;
    for caps in DURATION_PART.captures_iter(trimmed) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        if whole.start != consumed {
            return Err(invalid(input));
        }
        consumed = whole.end;

        let value: f64 = caps[1].parse().map_err(|_| invalid(input))?;
        let unit_nanos = match &caps[2] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            _ => return Err(invalid(input)),
        };
        total_nanos += value * unit_nanos;
    }

    if consumed != trimmed.len() || consumed == 0 {
        return Err(invalid(input));
    }
    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(PinError::validation(format!("duration '{}' is too large", input)));
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// Render a duration in the same notation, using the coarsest exact unit.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    const UNITS: [(u128, &str); 6] = [
        (3_600_000_000_000, "h"),
        (60_000_000_000, "m"),
        (1_000_000_000, "s"),
        (1_000_000, "ms"),
        (1_000, "us"),
        (1, "ns"),
    ];
    UNITS
        .iter()
        .find(|(size, _)| nanos % size == 0)
        .map(|(size, unit)| format!("{}{}", nanos / size, unit))
        .unwrap_or_else(|| format!("{}ns", nanos))
}

fn invalid(input: &str) -> PinError {
    PinError::validation(format!("invalid duration '{}'", input))
}
