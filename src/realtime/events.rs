//! Typed realtime payloads.
//!
//! Channel and event names are dictated by the backend. Payloads are parsed
//! into [`RealtimeEvent`] as soon as they arrive; anything that does not
//! match a known shape is rejected here instead of being poked at field by
//! field further down.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QueueError, Result};
use crate::models::{CounterId, QueueEntry};

/// Global channel carrying cross-counter aggregate updates.
pub const COUNTERS_CHANNEL: &str = "queue.counters";

/// Single entry changed (status, number, name or timestamps).
pub const ENTRY_UPDATED: &str = "entry.updated";
/// Full replacement of one counter's entry list.
pub const LIST_UPDATED: &str = "queue.updated";
/// Aggregate counter metadata changed.
pub const COUNTER_UPDATED: &str = "counter.updated";

/// Per-counter channel name.
pub fn counter_channel(counter: &CounterId) -> String {
    format!("queue.counter.{counter}")
}

/// Aggregate fields pushed for one counter. Absent fields are left untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterUpdate {
    #[serde(alias = "id")]
    pub counter_id: CounterId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub waiting_count: Option<u32>,
    #[serde(default)]
    pub serving_count: Option<u32>,
}

/// Replacement list for one counter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListReplacement {
    pub counter_id: CounterId,
    #[serde(alias = "queue")]
    pub entries: Vec<QueueEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    EntryUpdated(QueueEntry),
    ListUpdated(ListReplacement),
    CounterUpdated(CounterUpdate),
}

impl RealtimeEvent {
    /// Parse the payload delivered for `event`.
    ///
    /// # Errors
    /// - [`QueueError::UnknownEvent`] for event names this client does not handle.
    /// - [`QueueError::Decode`] when the payload does not match the event's shape.
    pub fn parse(event: &str, data: &Value) -> Result<Self> {
        match event {
            ENTRY_UPDATED => {
                // Accept both `{ "entry": {...} }` and the bare entry.
                #[derive(Deserialize)]
                struct Wrapped {
                    entry: QueueEntry,
                }
                if let Ok(w) = Wrapped::deserialize(data) {
                    return Ok(RealtimeEvent::EntryUpdated(w.entry));
                }
                QueueEntry::deserialize(data)
                    .map(RealtimeEvent::EntryUpdated)
                    .map_err(|e| decode_error(event, e))
            }
            LIST_UPDATED => ListReplacement::deserialize(data)
                .map(RealtimeEvent::ListUpdated)
                .map_err(|e| decode_error(event, e)),
            COUNTER_UPDATED => CounterUpdate::deserialize(data)
                .map(RealtimeEvent::CounterUpdated)
                .map_err(|e| decode_error(event, e)),
            other => Err(QueueError::UnknownEvent { event: other.to_string() }),
        }
    }

    /// The counter this event concerns.
    pub fn counter_id(&self) -> &CounterId {
        match self {
            RealtimeEvent::EntryUpdated(e) => &e.counter_id,
            RealtimeEvent::ListUpdated(l) => &l.counter_id,
            RealtimeEvent::CounterUpdated(c) => &c.counter_id,
        }
    }
}

fn decode_error(event: &str, e: serde_json::Error) -> QueueError {
    QueueError::Decode { context: format!("realtime event '{event}'"), detail: e.to_string() }
}
