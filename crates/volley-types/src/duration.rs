//! Duration parsing and human-friendly formatting.
//!
//! The flag syntax accepts the standard suffixes (`ns`, `us`, `ms`,
//! `s`, `m`, `h`) plus a leading whole number of days: `2d`, `2d3h`,
//! `90m`, `1.5h`, `250ms`.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by [`parse_duration`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationParseError {
    #[error("empty duration")]
    Empty,
    #[error("missing number in {0:?}")]
    MissingNumber(String),
    #[error("missing unit in {0:?}")]
    MissingUnit(String),
    #[error("unknown unit {0:?}")]
    UnknownUnit(String),
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
}

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Parse a duration: optional leading integer days followed by any
/// number of `<number><unit>` segments.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    if input.is_empty() {
        return Err(DurationParseError::Empty);
    }

    let (days, rest) = split_days(input);
    let mut total = DAY
        .checked_mul(days)
        .ok_or_else(|| DurationParseError::InvalidNumber(input.to_string()))?;
    if rest.is_empty() {
        return Ok(total);
    }

    let mut s = rest;
    while !s.is_empty() {
        let digits = s
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(s.len());
        if digits == 0 {
            return Err(DurationParseError::MissingNumber(input.to_string()));
        }
        let value: f64 = s[..digits]
            .parse()
            .map_err(|_| DurationParseError::InvalidNumber(s[..digits].to_string()))?;
        s = &s[digits..];

        let unit_len = s
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(s.len());
        if unit_len == 0 {
            return Err(DurationParseError::MissingUnit(input.to_string()));
        }
        let unit = &s[..unit_len];
        s = &s[unit_len..];

        let scale = match unit {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            other => return Err(DurationParseError::UnknownUnit(other.to_string())),
        };
        total += Duration::from_secs_f64(value * scale);
    }
    Ok(total)
}

/// Split a leading `<digits>d` prefix off the input. Returns (0, input)
/// when no such prefix exists.
fn split_days(input: &str) -> (u32, &str) {
    let mut days: u32 = 0;
    for (i, c) in input.char_indices() {
        if c.is_ascii_digit() {
            match days
                .checked_mul(10)
                .and_then(|d| d.checked_add(c as u32 - '0' as u32))
            {
                Some(d) => days = d,
                None => return (0, input),
            }
        } else if c == 'd' && i > 0 {
            return (days, &input[i + 1..]);
        } else {
            return (0, input);
        }
    }
    // all digits, no unit at all: let segment parsing report the error
    (0, input)
}

/// Render a duration for humans with two-level precision based on
/// magnitude.
pub fn friendly_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 2.0 {
        format!("{:.0} milliseconds", secs * 1000.0)
    } else if secs < 2.0 * 60.0 {
        format!("{secs:.0} seconds")
    } else if secs < 10.0 * 60.0 {
        format!("{:.1} minutes", secs / 60.0)
    } else if secs < 3600.0 {
        format!("{:.0} minutes", secs / 60.0)
    } else if secs < 4.0 * 3600.0 {
        format!("{:.1} hours", secs / 3600.0)
    } else if secs < 60.0 * 3600.0 {
        format!("{:.0} hours", secs / 3600.0)
    } else if secs < 1000.0 * 86400.0 {
        format!("{:.0} days", secs / 86400.0)
    } else {
        format!("{:.1} years", secs / 86400.0 / 365.25)
    }
}
