//! Strict decoding of live stream messages.
//!
//! Each frame carries one JSON envelope:
//! `{"dev_eui": "...", "timestamp": <epoch seconds>, "moisture_pct": <number>, "raw_value": <int|null>}`.
//! Decoding fails closed: anything that does not match exactly is rejected and
//! the caller drops the frame.

use serde::Deserialize;

use crate::models::Reading;
use crate::timestamp::{epoch_seconds_to_millis, TimestampError};

// ---

#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    dev_eui: String,
    timestamp: f64,
    moisture_pct: f64,
    #[serde(default)]
    raw_value: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope has an empty dev_eui")]
    EmptyDevEui,

    #[error("moisture_pct is not finite")]
    NonFiniteMoisture,

    #[error(transparent)]
    Timestamp(#[from] TimestampError),
}

/// Decode one stream frame into the addressed device and its reading.
pub fn decode_envelope(payload: &str) -> Result<(String, Reading), DecodeError> {
    // ---
    let envelope: StreamEnvelope = serde_json::from_str(payload)?;

    let dev_eui = envelope.dev_eui.trim();
    if dev_eui.is_empty() {
        return Err(DecodeError::EmptyDevEui);
    }
    if !envelope.moisture_pct.is_finite() {
        return Err(DecodeError::NonFiniteMoisture);
    }

    let timestamp_ms = epoch_seconds_to_millis(envelope.timestamp)?;

    Ok((
        dev_eui.to_string(),
        Reading::new(timestamp_ms, envelope.moisture_pct, envelope.raw_value),
    ))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_decode_valid_envelope() {
        // ---
        let (dev, reading) = decode_envelope(
            r#"{"dev_eui":"A1","timestamp":1700000000,"moisture_pct":41.5,"raw_value":5660}"#,
        )
        .unwrap();

        assert_eq!(dev, "A1");
        assert_eq!(reading.timestamp_ms, 1_700_000_000_000);
        assert_eq!(reading.moisture_pct, 41.5);
        assert_eq!(reading.raw_value, Some(5660));
    }

    #[test]
    fn test_raw_value_may_be_null_or_absent() {
        // ---
        let (_, reading) =
            decode_envelope(r#"{"dev_eui":"A1","timestamp":1,"moisture_pct":1,"raw_value":null}"#)
                .unwrap();
        assert_eq!(reading.raw_value, None);

        let (_, reading) =
            decode_envelope(r#"{"dev_eui":"A1","timestamp":1,"moisture_pct":1}"#).unwrap();
        assert_eq!(reading.raw_value, None);
    }

    #[test]
    fn test_out_of_range_moisture_passes_through() {
        // ---
        let (_, reading) =
            decode_envelope(r#"{"dev_eui":"A1","timestamp":1,"moisture_pct":130.0}"#).unwrap();
        assert_eq!(reading.moisture_pct, 130.0);
    }

    #[test]
    fn test_rejects_malformed_payloads() {
        // ---
        let bad = [
            "not json",
            "",
            "[]",
            r#"{"timestamp":1,"moisture_pct":1}"#,
            r#"{"dev_eui":"","timestamp":1,"moisture_pct":1}"#,
            r#"{"dev_eui":null,"timestamp":1,"moisture_pct":1}"#,
            r#"{"dev_eui":"A1","moisture_pct":1}"#,
            r#"{"dev_eui":"A1","timestamp":"yesterday","moisture_pct":1}"#,
            r#"{"dev_eui":"A1","timestamp":1}"#,
            r#"{"dev_eui":"A1","timestamp":1,"moisture_pct":"wet"}"#,
            r#"{"dev_eui":"A1","timestamp":1,"moisture_pct":1,"raw_value":"0x1f"}"#,
        ];
        for payload in bad {
            assert!(
                decode_envelope(payload).is_err(),
                "payload should be rejected: {payload}"
            );
        }
    }

    #[test]
    fn test_rejects_huge_timestamp() {
        // ---
        let err = decode_envelope(r#"{"dev_eui":"A1","timestamp":1e300,"moisture_pct":1}"#)
            .unwrap_err();
        assert!(matches!(err, DecodeError::Timestamp(_)));
    }
}
