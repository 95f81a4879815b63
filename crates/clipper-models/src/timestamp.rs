//! Clip offset parsing.
//!
//! Offsets arrive either as plain seconds or as timestamp strings in the
//! forms `HH:MM:SS[.mmm]`, `MM:SS[.mmm]` and `SS[.mmm]`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimestampError {
    #[error("timestamp is empty")]
    Empty,

    #[error("invalid {0} component: {1}")]
    InvalidValue(&'static str, String),

    #[error("invalid timestamp format: {0}")]
    InvalidFormat(String),

    #[error("timestamp must not be negative")]
    Negative,
}

/// Parse a timestamp string to total seconds.
///
/// ```
/// use clipper_models::parse_timestamp;
/// assert_eq!(parse_timestamp("01:30:00").unwrap(), 5400.0);
/// assert_eq!(parse_timestamp("05:30").unwrap(), 330.0);
/// assert_eq!(parse_timestamp("90.5").unwrap(), 90.5);
/// ```
pub fn parse_timestamp(ts: &str) -> Result<f64, TimestampError> {
    let ts = ts.trim();
    if ts.is_empty() {
        return Err(TimestampError::Empty);
    }

    let parts: Vec<&str> = ts.split(':').collect();
    if parts.len() > 3 {
        return Err(TimestampError::InvalidFormat(ts.to_string()));
    }

    // Most significant component first; seconds are always last.
    const NAMES: [&str; 3] = ["hours", "minutes", "seconds"];
    let names = &NAMES[3 - parts.len()..];

    let mut total = 0.0;
    for (part, name) in parts.iter().zip(names) {
        let value: f64 = part
            .trim()
            .parse()
            .map_err(|_| TimestampError::InvalidValue(name, part.to_string()))?;
        if !value.is_finite() {
            return Err(TimestampError::InvalidValue(name, part.to_string()));
        }
        if value < 0.0 {
            return Err(TimestampError::Negative);
        }
        total = total * 60.0 + value;
    }
    Ok(total)
}

/// Format seconds as `HH:MM:SS` or `HH:MM:SS.mmm`.
pub fn format_seconds(total_secs: f64) -> String {
    let hours = (total_secs / 3600.0).floor() as u32;
    let mins = ((total_secs % 3600.0) / 60.0).floor() as u32;
    let secs = total_secs % 60.0;

    if (secs - secs.floor()).abs() > 0.0001 {
        format!("{:02}:{:02}:{:06.3}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}:{:02}", hours, mins, secs.floor() as u32)
    }
}

/// An offset as it appears on the wire: a number of seconds or a timestamp string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum OffsetValue {
    Seconds(f64),
    Timestamp(String),
}

impl OffsetValue {
    /// Resolve to seconds. Negative numbers are passed through so the range
    /// check can reject them alongside the other boundary errors.
    pub fn to_seconds(&self) -> Result<f64, TimestampError> {
        match self {
            OffsetValue::Seconds(secs) => Ok(*secs),
            OffsetValue::Timestamp(ts) => parse_timestamp(ts),
        }
    }
}

impl From<f64> for OffsetValue {
    fn from(secs: f64) -> Self {
        OffsetValue::Seconds(secs)
    }
}
