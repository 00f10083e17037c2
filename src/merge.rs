//! Multi-series merge: projects selected devices' series into one list of
//! chart rows.
//!
//! Every reading becomes its own row, keyed by timestamp, with the moisture
//! value stored under a field scoped to its device. Two devices reporting at
//! the same instant therefore produce two rows and can never overwrite one
//! another. `raw_value` is carried unscoped; it is only shown in tooltips.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::store::SeriesStore;

// ---

/// One chart row.
///
/// Serializes flat, e.g. `{"ts": 100, "A1:moisture_pct": 20.0, "raw_value": 4100}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeRow {
    pub ts: i64,
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
    pub raw_value: Option<i64>,
}

impl MergeRow {
    /// Moisture value for `dev_eui` in this row, if the row belongs to it.
    pub fn value_for(&self, dev_eui: &str) -> Option<f64> {
        self.values.get(&series_key(dev_eui)).copied()
    }
}

/// Field name under which a device's moisture values appear.
pub fn series_key(dev_eui: &str) -> String {
    format!("{dev_eui}:moisture_pct")
}

/// Merge the series of `devices` into chart rows ordered by timestamp.
///
/// Devices without data contribute nothing; duplicates in `devices` are
/// merged once. Rows sharing a timestamp keep the order of `devices`.
pub fn merge_series(store: &SeriesStore, devices: &[String]) -> Vec<MergeRow> {
    // ---
    let mut seen = HashSet::new();
    let mut rows: Vec<MergeRow> = devices
        .iter()
        .filter(|dev| seen.insert(dev.as_str()))
        .flat_map(|dev| {
            let key = series_key(dev);
            store.get(dev).into_iter().map(move |reading| MergeRow {
                ts: reading.timestamp_ms,
                values: BTreeMap::from([(key.clone(), reading.moisture_pct)]),
                raw_value: reading.raw_value,
            })
        })
        .collect();

    rows.sort_by_key(|row| row.ts);
    rows
}
