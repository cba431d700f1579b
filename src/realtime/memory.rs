//! Loopback transport. Nothing leaves the process; events are injected with
//! [`MemoryTransport::emit`]. Backs the test suites and the `--no-realtime`
//! display mode, where only polling keeps the board fresh.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde_json::Value;

use super::channel::{EventSink, Transport, TransportEvent};
use crate::error::{QueueError, Result};

#[derive(Default)]
struct MemoryState {
    sink: Option<EventSink>,
    active: HashSet<String>,
    subscribe_calls: HashMap<String, usize>,
    opens: usize,
    closes: usize,
    refuse: bool,
}

#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose `open` always fails.
    pub fn refusing() -> Self {
        let t = Self::default();
        if let Ok(mut s) = t.state.lock() {
            s.refuse = true;
        }
        t
    }

    /// Deliver `data` as `event` on `channel`, if the channel is subscribed.
    pub fn emit(&self, channel: &str, event: &str, data: Value) {
        let sink = match self.state.lock() {
            Ok(s) if s.active.contains(channel) => s.sink.clone(),
            _ => None,
        };
        if let Some(sink) = sink {
            sink(TransportEvent::Message {
                channel: channel.to_string(),
                event: event.to_string(),
                data,
            });
        }
    }

    /// Simulate a dropped connection.
    pub fn drop_connection(&self) {
        let sink = self.state.lock().ok().and_then(|s| s.sink.clone());
        if let Some(sink) = sink {
            sink(TransportEvent::Disconnected);
        }
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.state.lock().map(|s| s.active.contains(channel)).unwrap_or(false)
    }

    pub fn subscribe_calls(&self, channel: &str) -> usize {
        self.state
            .lock()
            .map(|s| s.subscribe_calls.get(channel).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().map(|s| s.opens).unwrap_or(0)
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().map(|s| s.closes).unwrap_or(0)
    }
}

impl Transport for MemoryTransport {
    fn open(&self, sink: EventSink) -> Result<()> {
        {
            let mut s = self
                .state
                .lock()
                .map_err(|_| QueueError::Realtime("memory transport poisoned".to_string()))?;
            if s.refuse {
                return Err(QueueError::Realtime("connection refused".to_string()));
            }
            s.opens += 1;
            s.sink = Some(sink.clone());
        }
        sink(TransportEvent::Connected);
        Ok(())
    }

    fn subscribe(&self, channel: &str) {
        if let Ok(mut s) = self.state.lock() {
            s.active.insert(channel.to_string());
            *s.subscribe_calls.entry(channel.to_string()).or_insert(0) += 1;
        }
    }

    fn unsubscribe(&self, channel: &str) {
        if let Ok(mut s) = self.state.lock() {
            s.active.remove(channel);
        }
    }

    fn close(&self) {
        if let Ok(mut s) = self.state.lock() {
            s.closes += 1;
            s.sink = None;
            s.active.clear();
        }
    }
}
