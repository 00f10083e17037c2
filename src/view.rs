//! Shared presentation state: the series store, the selection set and the
//! latest live sample per selected device.
//!
//! All writers (stream dispatch, backfill completion, selection changes) go
//! through one mutex and finish their update inside a single critical section,
//! so readers never observe a half-applied change. No lock is held across an
//! `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::merge::{merge_series, MergeRow};
use crate::models::{LatestSample, Reading};
use crate::store::{SeriesStore, WriteMark};

// ---

pub type SharedView = Arc<Mutex<ViewState>>;

/// Identifies one selection of a device. A reselection issues a new epoch,
/// which invalidates every ticket handed out before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionTicket {
    pub dev_eui: String,
    epoch: u64,
}

#[derive(Debug, Default)]
pub struct ViewState {
    pub series: SeriesStore,
    selected: Vec<(String, u64)>,
    next_epoch: u64,
    latest: HashMap<String, Reading>,
}

/// Lock the shared view. A poisoned lock still holds a consistent state since
/// every mutation completes before the guard drops.
pub fn lock_view(view: &SharedView) -> MutexGuard<'_, ViewState> {
    view.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ViewState {
    // ---
    pub fn new(capacity: usize) -> Self {
        Self {
            series: SeriesStore::new(capacity),
            ..Self::default()
        }
    }

    pub fn shared(capacity: usize) -> SharedView {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    /// Add a device to the selection (or reselect it) and return the ticket
    /// its backfill must present.
    pub fn select(&mut self, dev_eui: &str) -> SelectionTicket {
        // ---
        self.next_epoch += 1;
        let epoch = self.next_epoch;

        match self.selected.iter_mut().find(|(id, _)| id == dev_eui) {
            Some(entry) => entry.1 = epoch,
            None => self.selected.push((dev_eui.to_string(), epoch)),
        }

        SelectionTicket {
            dev_eui: dev_eui.to_string(),
            epoch,
        }
    }

    /// Remove a device from the selection and drop its series.
    /// Returns whether it was selected.
    pub fn deselect(&mut self, dev_eui: &str) -> bool {
        // ---
        let before = self.selected.len();
        self.selected.retain(|(id, _)| id != dev_eui);
        self.latest.remove(dev_eui);
        self.series.clear(dev_eui);
        self.selected.len() != before
    }

    /// Deselect everything, dropping the series of each deselected device.
    pub fn clear_selection(&mut self) {
        // ---
        for (id, _) in std::mem::take(&mut self.selected) {
            self.series.clear(&id);
        }
        self.latest.clear();
    }

    pub fn selected(&self) -> Vec<String> {
        self.selected.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn is_selected(&self, dev_eui: &str) -> bool {
        self.selected.iter().any(|(id, _)| id == dev_eui)
    }

    pub fn is_current(&self, ticket: &SelectionTicket) -> bool {
        self.selected
            .iter()
            .any(|(id, epoch)| *id == ticket.dev_eui && *epoch == ticket.epoch)
    }

    /// Append a live reading. Every device is recorded, selected or not.
    /// Returns the latest-sample notification when the device is selected.
    pub fn record_live(&mut self, dev_eui: &str, reading: Reading) -> Option<LatestSample> {
        // ---
        self.series.append(dev_eui, reading);

        if !self.is_selected(dev_eui) {
            return None;
        }
        self.latest.insert(dev_eui.to_string(), reading);
        Some(LatestSample {
            dev_eui: dev_eui.to_string(),
            reading,
        })
    }

    /// Install a backfill result if its selection is still current.
    pub fn apply_backfill(
        &mut self,
        ticket: &SelectionTicket,
        readings: Vec<Reading>,
        observed: WriteMark,
    ) -> bool {
        // ---
        if !self.is_current(ticket) {
            return false;
        }
        self.series.replace(&ticket.dev_eui, readings, observed);
        true
    }

    pub fn latest(&self, dev_eui: &str) -> Option<Reading> {
        self.latest.get(dev_eui).copied()
    }

    /// Chart rows for the current selection.
    pub fn chart(&self) -> Vec<MergeRow> {
        merge_series(&self.series, &self.selected())
    }
}
