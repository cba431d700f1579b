//! # Queue State Reconciler
//!
//! ## Responsibility
//! Folds everything the client learns about the queue into one view model
//! per counter:
//! - bulk lists from a fetch, or a full replacement pushed over realtime,
//!   rebuild a counter's view wholesale;
//! - single-entry pushes patch the cached view in place;
//! - counter aggregates update the denormalized counter fields only.
//!
//! When nobody is being served, the earliest waiting entry is shown as
//! "up next" (`is_next = true`). It stays at the head of `waiting_queue`;
//! [`CounterView::waiting_display`] slices it off for rendering.
//!
//! ## Guarantees
//! - Pure data transforms: no I/O, no clocks.
//! - Applying the same entry patch twice yields the same view as applying it once.
//! - After a waiting patch with nobody served, the "up next" slot and the
//!   rendered waiting list match a rebuild from the same entries.
//! - A patch for an entry the cache does not know is never inserted; the
//!   caller is told to re-fetch instead.
//!
//! ## NOT Responsible For
//! - Fetching (see [`crate::sync`])
//! - Ordering between optimistic patches, re-fetches and pushes; the last
//!   write wins and the next full rebuild converges.

use std::collections::BTreeMap;

use crate::models::{Counter, CounterId, EntryId, EntryStatus, QueueEntry};
use crate::realtime::events::{CounterUpdate, RealtimeEvent};

/// Size of the cross-counter recently-served list.
pub const RECENT_LIMIT: usize = 5;

/// The entry shown in a counter's "now serving" slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ServingSlot {
    pub entry: QueueEntry,
    /// Nobody is being served; this is the earliest waiting entry, still
    /// waiting at the gateway.
    pub is_next: bool,
}

/// Denormalized counter fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CounterMeta {
    pub name: String,
    pub prefix: String,
    pub active: bool,
    pub waiting_count: u32,
    pub serving_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CounterView {
    pub counter_id: CounterId,
    pub meta: CounterMeta,
    pub current_serving: Option<ServingSlot>,
    /// Oldest first. Includes the promoted "next" entry at index 0.
    pub waiting_queue: Vec<QueueEntry>,
    /// Newest first.
    pub recently_served: Vec<QueueEntry>,
}

/// Result of applying one realtime or optimistic update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    /// The cache cannot take this update safely; re-fetch this counter.
    Stale(CounterId),
}

/// One row of the cross-counter waiting list.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitingRow {
    /// 1-based position in the combined list.
    pub position: usize,
    /// 1-based position within the entry's own counter.
    pub counter_position: usize,
    pub entry: QueueEntry,
}

impl CounterView {
    pub fn new(counter_id: CounterId) -> Self {
        Self {
            counter_id,
            meta: CounterMeta { active: true, ..Default::default() },
            current_serving: None,
            waiting_queue: Vec::new(),
            recently_served: Vec::new(),
        }
    }

    /// Replace every entry-level list from `entries`, keeping counter metadata.
    fn rebuild(&mut self, entries: Vec<QueueEntry>) {
        let mut serving: Option<QueueEntry> = None;
        let mut waiting = Vec::new();
        let mut completed = Vec::new();

        for entry in entries {
            match entry.status {
                // Upstream should send at most one; the last one wins.
                EntryStatus::Serving => serving = Some(entry),
                EntryStatus::Waiting => waiting.push(entry),
                EntryStatus::Completed => completed.push(entry),
            }
        }

        waiting.sort_by_key(|e| e.created_at);
        completed.sort_by(|a, b| b.served_or_created().cmp(&a.served_or_created()));

        self.current_serving = match serving {
            Some(entry) => Some(ServingSlot { entry, is_next: false }),
            None => waiting.first().cloned().map(|entry| ServingSlot { entry, is_next: true }),
        };
        self.waiting_queue = waiting;
        self.recently_served = completed;
    }

    /// Overwrite a known entry with `entry` and move it to the list its
    /// status belongs in.
    fn patch(&mut self, entry: QueueEntry) {
        let was_current = self.current_serving.as_ref().is_some_and(|s| s.entry.id == entry.id);

        self.waiting_queue.retain(|e| e.id != entry.id);
        self.recently_served.retain(|e| e.id != entry.id);

        match entry.status {
            EntryStatus::Serving => {
                self.current_serving = Some(ServingSlot { entry, is_next: false });
            }
            EntryStatus::Waiting => {
                if was_current {
                    self.current_serving = None;
                }
                let at = self.waiting_queue.partition_point(|e| e.created_at <= entry.created_at);
                self.waiting_queue.insert(at, entry);
                if self.current_serving.as_ref().map_or(true, |s| s.is_next) {
                    self.current_serving = self
                        .waiting_queue
                        .first()
                        .cloned()
                        .map(|entry| ServingSlot { entry, is_next: true });
                }
            }
            EntryStatus::Completed => {
                if was_current {
                    self.current_serving = None;
                }
                let key = entry.served_or_created();
                let at = self.recently_served.partition_point(|e| e.served_or_created() >= key);
                self.recently_served.insert(at, entry);
            }
        }
    }

    fn merge_counter(&mut self, update: &CounterUpdate) {
        if let Some(name) = &update.name {
            self.meta.name = name.clone();
        }
        if let Some(n) = update.waiting_count {
            self.meta.waiting_count = n;
        }
        if let Some(n) = update.serving_count {
            self.meta.serving_count = n;
        }
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        self.find(id).is_some()
    }

    pub fn find(&self, id: &EntryId) -> Option<&QueueEntry> {
        self.current_serving
            .as_ref()
            .map(|s| &s.entry)
            .filter(|e| &e.id == id)
            .or_else(|| self.waiting_queue.iter().find(|e| &e.id == id))
            .or_else(|| self.recently_served.iter().find(|e| &e.id == id))
    }

    /// The entry actively being served, ignoring a promoted "next".
    pub fn serving(&self) -> Option<&QueueEntry> {
        self.current_serving.as_ref().filter(|s| !s.is_next).map(|s| &s.entry)
    }

    /// Waiting entries as rendered: without the promoted "next" at the head.
    pub fn waiting_display(&self) -> &[QueueEntry] {
        match &self.current_serving {
            Some(slot) if slot.is_next => self.waiting_queue.get(1..).unwrap_or(&[]),
            _ => &self.waiting_queue,
        }
    }

    /// Every entry this view knows about.
    pub fn entries(&self) -> impl Iterator<Item = &QueueEntry> {
        self.serving()
            .into_iter()
            .chain(self.waiting_queue.iter())
            .chain(self.recently_served.iter())
    }

    pub fn display_name(&self) -> String {
        if self.meta.name.is_empty() {
            format!("Counter {}", self.counter_id)
        } else {
            self.meta.name.clone()
        }
    }
}

/// Per-counter view models, keyed by counter id.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    views: BTreeMap<CounterId, CounterView>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild one counter from a bulk list. Entries of other counters are ignored.
    pub fn rebuild_counter(&mut self, counter_id: &CounterId, entries: Vec<QueueEntry>) {
        let own: Vec<QueueEntry> =
            entries.into_iter().filter(|e| &e.counter_id == counter_id).collect();
        self.views
            .entry(counter_id.clone())
            .or_insert_with(|| CounterView::new(counter_id.clone()))
            .rebuild(own);
    }

    /// Rebuild every counter from an unfiltered fetch. Known counters absent
    /// from `entries` end up empty.
    pub fn rebuild_all(&mut self, entries: Vec<QueueEntry>) {
        let mut grouped: BTreeMap<CounterId, Vec<QueueEntry>> = self
            .views
            .keys()
            .map(|id| (id.clone(), Vec::new()))
            .collect();
        for entry in entries {
            grouped.entry(entry.counter_id.clone()).or_default().push(entry);
        }
        for (id, list) in grouped {
            self.rebuild_counter(&id, list);
        }
    }

    /// Patch one entry in place.
    ///
    /// Returns [`PatchOutcome::Stale`] without touching anything when the
    /// entry (or its counter) is not cached.
    pub fn apply_entry_update(&mut self, entry: QueueEntry) -> PatchOutcome {
        match self.views.get_mut(&entry.counter_id) {
            Some(view) if view.contains(&entry.id) => {
                view.patch(entry);
                PatchOutcome::Applied
            }
            _ => PatchOutcome::Stale(entry.counter_id),
        }
    }

    pub fn apply_counter_update(&mut self, update: &CounterUpdate) {
        self.views
            .entry(update.counter_id.clone())
            .or_insert_with(|| CounterView::new(update.counter_id.clone()))
            .merge_counter(update);
    }

    /// Fold one parsed realtime event into the views.
    pub fn apply(&mut self, event: RealtimeEvent) -> PatchOutcome {
        match event {
            RealtimeEvent::EntryUpdated(entry) => self.apply_entry_update(entry),
            RealtimeEvent::ListUpdated(list) => {
                self.rebuild_counter(&list.counter_id, list.entries);
                PatchOutcome::Applied
            }
            RealtimeEvent::CounterUpdated(update) => {
                self.apply_counter_update(&update);
                PatchOutcome::Applied
            }
        }
    }

    /// Merge the counter list (names, prefixes, flags, counts) without touching entries.
    pub fn set_counters(&mut self, counters: &[Counter]) {
        for c in counters {
            let view = self
                .views
                .entry(c.id.clone())
                .or_insert_with(|| CounterView::new(c.id.clone()));
            view.meta = CounterMeta {
                name: c.name.clone(),
                prefix: c.prefix.clone(),
                active: c.active,
                waiting_count: c.waiting_count,
                serving_count: c.serving_count,
            };
        }
    }

    pub fn view(&self, counter_id: &CounterId) -> Option<&CounterView> {
        self.views.get(counter_id)
    }

    pub fn views(&self) -> impl Iterator<Item = &CounterView> {
        self.views.values()
    }

    /// Find an entry in any counter.
    pub fn find_entry(&self, id: &EntryId) -> Option<&QueueEntry> {
        self.views.values().find_map(|v| v.find(id))
    }

    /// The [`RECENT_LIMIT`] most recently completed entries across all counters.
    pub fn all_recently_served(&self) -> Vec<QueueEntry> {
        let mut all: Vec<QueueEntry> =
            self.views.values().flat_map(|v| v.recently_served.iter().cloned()).collect();
        all.sort_by(|a, b| b.served_or_created().cmp(&a.served_or_created()));
        all.truncate(RECENT_LIMIT);
        all
    }

    /// Everyone waiting across all counters, minus each counter's promoted
    /// "next", ordered by position within their counter and numbered globally.
    pub fn all_waiting_customers(&self) -> Vec<WaitingRow> {
        let mut rows: Vec<WaitingRow> = self
            .views
            .values()
            .flat_map(|v| {
                v.waiting_display().iter().enumerate().map(|(i, e)| WaitingRow {
                    position: 0,
                    counter_position: i + 1,
                    entry: e.clone(),
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            a.counter_position
                .cmp(&b.counter_position)
                .then(a.entry.created_at.cmp(&b.entry.created_at))
        });
        for (i, row) in rows.iter_mut().enumerate() {
            row.position = i + 1;
        }
        rows
    }
}
