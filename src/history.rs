//! History backfill: seeds a device's series from the registry before (or
//! while) live readings arrive.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::models::Reading;
use crate::registry::{RegistryClient, RegistryError};
use crate::timestamp::{epoch_seconds_to_millis, parse_history_timestamp, TimestampError};
use crate::view::{lock_view, SelectionTicket, SharedView};

// ---

pub const DEFAULT_HISTORY_LIMIT: u32 = 100;

/// What became of one backfill.
#[derive(Debug)]
pub enum BackfillOutcome {
    /// Snapshot installed with this many readings.
    Applied { readings: usize },
    /// Response was not a list; series left as is.
    NoData,
    /// Selection changed while the request was in flight; result dropped.
    Discarded,
    /// Request failed; series left as is.
    Failed(RegistryError),
}

/// One history row. Extra fields (`id`, `dev_eui`, coordinates) are ignored.
#[derive(Debug, Deserialize)]
struct HistoryRow {
    timestamp: WireTimestamp,
    moisture_pct: f64,
    #[serde(default)]
    raw_value: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Iso(String),
    Seconds(f64),
}

impl WireTimestamp {
    fn to_millis(&self) -> Result<i64, TimestampError> {
        match self {
            WireTimestamp::Iso(s) => parse_history_timestamp(s),
            WireTimestamp::Seconds(secs) => epoch_seconds_to_millis(*secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryLoader {
    registry: RegistryClient,
    view: SharedView,
    limit: u32,
}

impl HistoryLoader {
    // ---
    pub fn new(registry: RegistryClient, view: SharedView, limit: u32) -> Self {
        Self {
            registry,
            view,
            limit,
        }
    }

    /// Fetch the most recent readings for a device, oldest first.
    ///
    /// A payload that is not a list yields an empty vector.
    pub async fn load_history(&self, dev_eui: &str) -> Result<Vec<Reading>, RegistryError> {
        Ok(self.fetch(dev_eui).await?.unwrap_or_default())
    }

    /// Load history for the ticket's device and install it, unless the
    /// selection moved on in the meantime.
    pub async fn backfill(&self, ticket: SelectionTicket) -> BackfillOutcome {
        // ---
        let observed = lock_view(&self.view).series.mark();

        let readings = match self.fetch(&ticket.dev_eui).await {
            Ok(Some(readings)) => readings,
            Ok(None) => return BackfillOutcome::NoData,
            Err(e) => {
                warn!("History backfill for {} failed: {}", ticket.dev_eui, e);
                return BackfillOutcome::Failed(e);
            }
        };

        let count = readings.len();
        let applied = lock_view(&self.view).apply_backfill(&ticket, readings, observed);
        if !applied {
            debug!("Discarding stale history for {}", ticket.dev_eui);
            return BackfillOutcome::Discarded;
        }

        info!("Backfilled {} readings for {}", count, ticket.dev_eui);
        BackfillOutcome::Applied { readings: count }
    }

    async fn fetch(&self, dev_eui: &str) -> Result<Option<Vec<Reading>>, RegistryError> {
        // ---
        let payload = self.registry.recent_readings(dev_eui, self.limit).await?;
        Ok(decode_history(dev_eui, &payload))
    }
}

/// Decode a history payload into readings sorted oldest first.
/// Returns `None` when the payload is not a list; bad rows are skipped.
fn decode_history(dev_eui: &str, payload: &Value) -> Option<Vec<Reading>> {
    // ---
    let Some(rows) = payload.as_array() else {
        debug!("History for {} is not a list: {}", dev_eui, payload);
        return None;
    };

    let mut readings: Vec<Reading> = rows
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let row = match HistoryRow::deserialize(item) {
                Ok(row) => row,
                Err(e) => {
                    debug!("Skipping history row {} for {}: {} - {}", i, dev_eui, e, item);
                    return None;
                }
            };
            match row.timestamp.to_millis() {
                Ok(ts) => Some(Reading::new(ts, row.moisture_pct, row.raw_value)),
                Err(e) => {
                    debug!("Skipping history row {} for {}: {}", i, dev_eui, e);
                    None
                }
            }
        })
        .collect();

    readings.sort_by_key(|r| r.timestamp_ms);
    Some(readings)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_sorts_oldest_first() {
        // ---
        let payload = json!([
            {"id": 2, "dev_eui": "A1", "timestamp": "2025-03-26T18:46:00", "moisture_pct": 22.0, "raw_value": 5100},
            {"id": 1, "dev_eui": "A1", "timestamp": "2025-03-26T18:45:00", "moisture_pct": 20.0, "raw_value": 5000},
        ]);

        let readings = decode_history("A1", &payload).unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].timestamp_ms, 1_743_014_700_000);
        assert_eq!(readings[0].moisture_pct, 20.0);
        assert_eq!(readings[1].timestamp_ms, 1_743_014_760_000);
    }

    #[test]
    fn test_non_list_is_no_data() {
        // ---
        assert!(decode_history("A1", &json!({"error": "No readings"})).is_none());
        assert!(decode_history("A1", &json!(null)).is_none());
        assert!(decode_history("A1", &json!("oops")).is_none());
        assert_eq!(decode_history("A1", &json!([])), Some(vec![]));
    }

    #[test]
    fn test_bad_rows_are_skipped() {
        // ---
        let payload = json!([
            {"timestamp": "2025-03-26T18:45:00Z", "moisture_pct": 20.0, "raw_value": null},
            {"timestamp": "not a time", "moisture_pct": 21.0},
            {"timestamp": "2025-03-26T18:47:00Z"},
            42,
            {"timestamp": 1743014880, "moisture_pct": 23.0},
        ]);

        let readings = decode_history("A1", &payload).unwrap();
        let ts: Vec<i64> = readings.iter().map(|r| r.timestamp_ms).collect();
        assert_eq!(ts, vec![1_743_014_700_000, 1_743_014_880_000]);
        assert_eq!(readings[0].raw_value, None);
    }
}
