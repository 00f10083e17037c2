//! Bounded per-device series store.
//!
//! Each device gets a FIFO-bounded series of [`Reading`]s, created lazily on
//! first write. Live appends and history backfills both write here; every live
//! append is stamped with a store-wide sequence number so that a backfill can
//! tell which live entries arrived after its request went out and must be kept
//! when the snapshot is installed.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::models::Reading;

// ---

pub const DEFAULT_CAPACITY: usize = 100;

/// Write watermark captured before a backfill request is issued.
///
/// Live entries appended at or after the watermark survive a later
/// [`SeriesStore::replace`] for the same device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WriteMark(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Live(u64),
    Backfill,
}

#[derive(Debug, Clone)]
struct Entry {
    origin: Origin,
    reading: Reading,
}

#[derive(Debug, Default)]
struct Series {
    entries: VecDeque<Entry>,
}

impl Series {
    fn push_bounded(&mut self, entry: Entry, capacity: usize) {
        // ---
        while self.entries.len() >= capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }
}

#[derive(Debug)]
pub struct SeriesStore {
    capacity: usize,
    series: HashMap<String, Series>,
    next_seq: u64,
}

impl Default for SeriesStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SeriesStore {
    // ---
    /// Create a store whose series hold at most `capacity` readings (min 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a live reading, evicting the oldest entry when full.
    pub fn append(&mut self, device_id: &str, reading: Reading) {
        // ---
        let seq = self.next_seq;
        self.next_seq += 1;

        let capacity = self.capacity;
        let series = self.series.entry(device_id.to_string()).or_default();
        series.push_bounded(
            Entry {
                origin: Origin::Live(seq),
                reading,
            },
            capacity,
        );
    }

    /// Watermark for the next write.
    pub fn mark(&self) -> WriteMark {
        WriteMark(self.next_seq)
    }

    /// Install a backfilled snapshot for a device.
    ///
    /// Live entries appended since `observed` are kept unless their timestamp
    /// already appears in the snapshot. When the result exceeds capacity,
    /// snapshot entries are evicted (oldest first) before any of those live
    /// entries. The result is stably ordered by timestamp.
    pub fn replace(&mut self, device_id: &str, readings: Vec<Reading>, observed: WriteMark) {
        // ---
        let newer: Vec<Entry> = self
            .series
            .get(device_id)
            .map(|series| {
                series
                    .entries
                    .iter()
                    .filter(|e| matches!(e.origin, Origin::Live(seq) if seq >= observed.0))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let snapshot_ts: HashSet<i64> = readings.iter().map(|r| r.timestamp_ms).collect();
        let (overlapping, mut kept): (Vec<Entry>, Vec<Entry>) = newer
            .into_iter()
            .partition(|live| snapshot_ts.contains(&live.reading.timestamp_ms));
        if !overlapping.is_empty() {
            tracing::debug!(
                "replace({}): {} live readings already in snapshot",
                device_id,
                overlapping.len()
            );
        }

        // live entries are in arrival order; only more of them than the
        // capacity can push one out
        let live_excess = kept.len().saturating_sub(self.capacity);
        kept.drain(..live_excess);

        let mut snapshot = readings;
        snapshot.sort_by_key(|r| r.timestamp_ms);
        let room = self.capacity - kept.len();
        let snapshot_excess = snapshot.len().saturating_sub(room);

        let mut merged: Vec<Entry> = snapshot
            .into_iter()
            .skip(snapshot_excess)
            .map(|reading| Entry {
                origin: Origin::Backfill,
                reading,
            })
            .collect();
        merged.extend(kept);
        merged.sort_by_key(|e| e.reading.timestamp_ms);

        self.series.insert(
            device_id.to_string(),
            Series {
                entries: merged.into(),
            },
        );
    }

    /// Owned copy of a device's series, oldest first. Empty when unknown.
    pub fn get(&self, device_id: &str) -> Vec<Reading> {
        // ---
        self.series
            .get(device_id)
            .map(|series| series.entries.iter().map(|e| e.reading).collect())
            .unwrap_or_default()
    }

    pub fn len(&self, device_id: &str) -> usize {
        self.series
            .get(device_id)
            .map_or(0, |series| series.entries.len())
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.series.contains_key(device_id)
    }

    /// Drop a device's series entirely. Returns whether one existed.
    pub fn clear(&mut self, device_id: &str) -> bool {
        self.series.remove(device_id).is_some()
    }

    pub fn device_ids(&self) -> Vec<String> {
        // ---
        let mut ids: Vec<String> = self.series.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn reading(ts: i64, m: f64) -> Reading {
        Reading::new(ts, m, None)
    }

    fn timestamps(store: &SeriesStore, dev: &str) -> Vec<i64> {
        store.get(dev).iter().map(|r| r.timestamp_ms).collect()
    }

    #[test]
    fn test_append_never_exceeds_capacity() {
        // ---
        for capacity in [1usize, 2, 5, 100] {
            let mut store = SeriesStore::new(capacity);
            for i in 0..(capacity as i64 * 3 + 1) {
                store.append("A1", reading(i, i as f64));
                assert!(store.len("A1") <= capacity);
            }

            // exactly the most recent `capacity` appends, in arrival order
            let total = capacity as i64 * 3 + 1;
            let expected: Vec<i64> = (total - capacity as i64..total).collect();
            assert_eq!(timestamps(&store, "A1"), expected);
        }
    }

    #[test]
    fn test_append_keeps_arrival_order() {
        // ---
        let mut store = SeriesStore::new(10);
        store.append("A1", reading(300, 1.0));
        store.append("A1", reading(100, 2.0));
        store.append("A1", reading(200, 3.0));
        assert_eq!(timestamps(&store, "A1"), vec![300, 100, 200]);
    }

    #[test]
    fn test_eviction_scenario() {
        // ---
        let mut store = SeriesStore::new(2);
        store.append("A1", reading(100, 20.0));
        store.append("A1", reading(200, 22.0));
        store.append("A1", reading(300, 25.0));

        assert_eq!(
            store.get("A1"),
            vec![reading(200, 22.0), reading(300, 25.0)]
        );
    }

    #[test]
    fn test_devices_are_independent() {
        // ---
        let mut store = SeriesStore::new(2);
        store.append("A1", reading(1, 1.0));
        store.append("B2", reading(2, 2.0));
        store.append("B2", reading(3, 3.0));
        store.append("B2", reading(4, 4.0));

        assert_eq!(timestamps(&store, "A1"), vec![1]);
        assert_eq!(timestamps(&store, "B2"), vec![3, 4]);
        assert_eq!(store.device_ids(), vec!["A1".to_string(), "B2".to_string()]);
    }

    #[test]
    fn test_get_unknown_device_is_empty() {
        // ---
        let store = SeriesStore::default();
        assert!(store.get("nope").is_empty());
        assert!(!store.contains("nope"));
        assert_eq!(store.capacity(), DEFAULT_CAPACITY);
    }

    #[test]
    fn test_get_returns_snapshot() {
        // ---
        let mut store = SeriesStore::new(5);
        store.append("A1", reading(1, 1.0));
        let snapshot = store.get("A1");
        store.append("A1", reading(2, 2.0));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.len("A1"), 2);
    }

    #[test]
    fn test_replace_then_append() {
        // ---
        let mut store = SeriesStore::new(5);
        let mark = store.mark();
        store.replace("A1", vec![reading(10, 1.0), reading(20, 2.0)], mark);
        store.append("A1", reading(30, 3.0));
        store.append("A1", reading(40, 4.0));

        assert_eq!(timestamps(&store, "A1"), vec![10, 20, 30, 40]);

        store.append("A1", reading(50, 5.0));
        store.append("A1", reading(60, 6.0));
        assert_eq!(timestamps(&store, "A1"), vec![20, 30, 40, 50, 60]);
    }

    #[test]
    fn test_replace_keeps_live_appends_racing_the_backfill() {
        // ---
        let mut store = SeriesStore::new(10);
        store.append("A1", reading(5, 0.5));

        // backfill request goes out, live data keeps arriving
        let mark = store.mark();
        store.append("A1", reading(300, 3.0));
        store.append("A1", reading(400, 4.0));

        store.replace("A1", vec![reading(100, 1.0), reading(200, 2.0)], mark);

        // the pre-request live entry is superseded by the snapshot image
        assert_eq!(timestamps(&store, "A1"), vec![100, 200, 300, 400]);
    }

    #[test]
    fn test_replace_drops_overlapping_duplicates_and_sorts() {
        // ---
        let mut store = SeriesStore::new(10);
        let mark = store.mark();
        store.append("A1", reading(200, 2.0));
        store.append("A1", reading(150, 1.5));

        // registry answered newest first and already contains ts=200
        store.replace("A1", vec![reading(200, 2.0), reading(100, 1.0)], mark);

        assert_eq!(timestamps(&store, "A1"), vec![100, 150, 200]);
    }

    #[test]
    fn test_replace_bounded_by_capacity() {
        // ---
        let mut store = SeriesStore::new(3);
        let mark = store.mark();
        store.append("A1", reading(50, 5.0));
        let snapshot = (1..=4).map(|i| reading(i * 10, i as f64)).collect();
        store.replace("A1", snapshot, mark);

        assert_eq!(timestamps(&store, "A1"), vec![30, 40, 50]);
    }

    #[test]
    fn test_replace_full_snapshot_keeps_older_live_reading() {
        // ---
        let mut store = SeriesStore::new(3);
        let mark = store.mark();
        store.append("A1", reading(5, 0.5));
        store.replace("A1", vec![reading(10, 1.0), reading(20, 2.0), reading(30, 3.0)], mark);

        assert_eq!(timestamps(&store, "A1"), vec![5, 20, 30]);
    }

    #[test]
    fn test_replace_with_more_live_than_capacity_keeps_latest_arrivals() {
        // ---
        let mut store = SeriesStore::new(2);
        let mark = store.mark();
        store.append("A1", reading(300, 3.0));
        store.append("A1", reading(100, 1.0));
        store.replace("A1", vec![reading(200, 2.0)], mark);

        // the series itself was already bounded to the two latest arrivals
        assert_eq!(timestamps(&store, "A1"), vec![100, 300]);
    }

    #[test]
    fn test_second_replace_does_not_resurrect_first_snapshot() {
        // ---
        let mut store = SeriesStore::new(10);
        let mark = store.mark();
        store.replace("A1", vec![reading(1, 1.0)], mark);
        let mark = store.mark();
        store.replace("A1", vec![reading(2, 2.0)], mark);

        assert_eq!(timestamps(&store, "A1"), vec![2]);
    }

    #[test]
    fn test_clear() {
        // ---
        let mut store = SeriesStore::new(3);
        store.append("A1", reading(1, 1.0));
        assert!(store.clear("A1"));
        assert!(!store.clear("A1"));
        assert!(store.get("A1").is_empty());
    }
}
