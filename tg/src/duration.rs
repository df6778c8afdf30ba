//! Duration strings in the `1h30m` / `250ms` / `1.5s` style
//!
//! A duration string is an optional sign followed by one or more
//! `<decimal><unit>` segments. Valid units are `ns`, `us` (or `µs`), `ms`, `s`,
//! `m` and `h`. The bare string `"0"` is also accepted.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

static SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]*(?:\.[0-9]*)?)([^0-9.]*)").expect("segment pattern is valid"));

/// Errors from parsing a duration string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("invalid duration {input:?}")]
    Invalid { input: String },

    #[error("missing unit in duration {input:?}")]
    MissingUnit { input: String },

    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { input: String, unit: String },

    #[error("negative duration {input:?}")]
    Negative { input: String },

    #[error("duration {input:?} is out of range")]
    Overflow { input: String },
}

fn unit_nanos(unit: &str) -> Option<f64> {
    let nanos = match unit {
        "ns" => 1.0,
        "us" | "µs" | "μs" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60e9,
        "h" => 3600e9,
        _ => return None,
    };
    Some(nanos)
}

/// Parse a duration string such as `"10ms"` or `"1h15m30.5s"`
///
/// Negative durations are rejected unless they are zero (`"-0s"`).
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    debug!(%input, "parse_duration: called");
    let invalid = || DurationError::Invalid {
        input: input.to_string(),
    };

    let (negative, mut rest) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };

    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total_nanos = 0.0_f64;
    while !rest.is_empty() {
        let caps = SEGMENT.captures(rest).ok_or_else(invalid)?;
        let number = caps.get(1).map_or("", |m| m.as_str());
        let unit = caps.get(2).map_or("", |m| m.as_str());

        if number.is_empty() || number == "." {
            return Err(invalid());
        }
        if unit.is_empty() {
            return Err(DurationError::MissingUnit {
                input: input.to_string(),
            });
        }
        let scale = unit_nanos(unit).ok_or_else(|| DurationError::UnknownUnit {
            input: input.to_string(),
            unit: unit.to_string(),
        })?;
        let value: f64 = number.parse().map_err(|_| invalid())?;

        total_nanos += value * scale;
        rest = &rest[caps.get(0).map_or(0, |m| m.end())..];
    }

    if total_nanos > u64::MAX as f64 {
        return Err(DurationError::Overflow {
            input: input.to_string(),
        });
    }
    if negative && total_nanos > 0.0 {
        return Err(DurationError::Negative {
            input: input.to_string(),
        });
    }

    Ok(Duration::from_nanos(total_nanos as u64))
}
