//! Timestamp normalization for readings.
//!
//! Readings reach the dashboard from two sources with different clocks on the
//! wire: the live stream carries epoch seconds, while the history endpoint
//! returns ISO-8601 strings that are sometimes naive (no offset). Every reading
//! is normalized here to milliseconds since the Unix epoch, UTC, so the series
//! store never has to know where a value came from.

use chrono::{DateTime, NaiveDateTime};

// ---

/// Formats accepted for naive (offset-less) history timestamps, all read as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimestampError {
    #[error("timestamp is not a finite number: {0}")]
    NotFinite(f64),

    #[error("timestamp out of range: {0}")]
    OutOfRange(f64),

    #[error("unrecognized timestamp format: {0:?}")]
    Unparseable(String),
}

/// Convert stream epoch seconds (possibly fractional) into epoch milliseconds.
pub fn epoch_seconds_to_millis(seconds: f64) -> Result<i64, TimestampError> {
    // ---
    if !seconds.is_finite() {
        return Err(TimestampError::NotFinite(seconds));
    }

    let millis = (seconds * 1000.0).round();
    if millis < i64::MIN as f64 || millis > i64::MAX as f64 {
        return Err(TimestampError::OutOfRange(seconds));
    }
    Ok(millis as i64)
}

/// Parse a history timestamp string into epoch milliseconds.
///
/// Strings carrying an offset (`Z`, `+02:00`) are honoured; naive strings are
/// taken to be UTC, matching how the registry stores them.
pub fn parse_history_timestamp(raw: &str) -> Result<i64, TimestampError> {
    // ---
    let trimmed = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.timestamp_millis());
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|naive| naive.and_utc().timestamp_millis())
        .ok_or_else(|| TimestampError::Unparseable(raw.to_string()))
}
