//! Duration strings for bucket frequencies and rolling windows (`500ms`, `1s`, `5s`, `2min`, `1h`).

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpanError {
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
    #[error("duration must be positive: {0}")]
    NonPositive(String),
}

/// A parsed duration, keeping the caller's spelling for column names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub label: String,
    pub millis: i64,
}

pub fn parse_span(input: &str) -> Result<Span, SpanError> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);

    // A bare unit means one of it, as in "s" or "min".
    let count: i64 = if digits.is_empty() {
        1
    } else {
        digits
            .parse()
            .map_err(|_| SpanError::InvalidDuration(input.to_string()))?
    };

    let unit_ms: i64 = match unit.to_ascii_lowercase().as_str() {
        "ms" | "l" => 1,
        "s" | "sec" | "secs" => 1_000,
        "min" | "m" | "t" => 60_000,
        "h" | "hr" => 3_600_000,
        "d" => 86_400_000,
        _ => return Err(SpanError::InvalidDuration(input.to_string())),
    };

    let millis = count
        .checked_mul(unit_ms)
        .ok_or_else(|| SpanError::InvalidDuration(input.to_string()))?;
    if millis <= 0 {
        return Err(SpanError::NonPositive(input.to_string()));
    }

    Ok(Span {
        label: trimmed.to_string(),
        millis,
    })
}
