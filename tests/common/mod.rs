//! In-memory stand-ins for the gateway, speech engine and printer.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use queueboard::announce::SpeechEngine;
use queueboard::error::{QueueError, Result};
use queueboard::gateway::QueueGateway;
use queueboard::models::{
    Counter, CounterId, CounterPatch, EntryId, EntryStatus, NewCounter, NewEntry, QueueEntry,
};
use queueboard::sync::{QueueSync, SyncTiming};
use queueboard::ticket::{Ticket, TicketPrinter};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

#[derive(Default)]
struct FakeState {
    entries: Vec<QueueEntry>,
    counters: Vec<Counter>,
    next_id: u64,
    clock: i64,
    sequence: HashMap<CounterId, u32>,
    calls: Vec<String>,
    fail_next: Option<String>,
}

impl FakeState {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        base_time() + chrono::Duration::seconds(self.clock)
    }

    fn check(&mut self, call: String) -> Result<()> {
        self.calls.push(call);
        match self.fail_next.take() {
            Some(message) => Err(QueueError::Gateway { message: Some(message) }),
            None => Ok(()),
        }
    }

    fn entry_mut(&mut self, id: &EntryId) -> Result<&mut QueueEntry> {
        self.entries
            .iter_mut()
            .find(|e| &e.id == id)
            .ok_or_else(|| QueueError::Gateway { message: Some(format!("Entry {id} not found")) })
    }

    fn insert(&mut self, counter: &CounterId, name: &str, priority: bool, status: EntryStatus) -> QueueEntry {
        self.next_id += 1;
        let prefix = self
            .counters
            .iter()
            .find(|c| &c.id == counter)
            .map(|c| c.prefix.clone())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "P".to_string());
        let seq = self.sequence.entry(counter.clone()).or_insert(0);
        *seq += 1;
        let number = format!("{prefix}{seq}");
        let created_at = self.tick();
        let entry = QueueEntry {
            id: EntryId::new(self.next_id.to_string()),
            number,
            name: name.to_string(),
            status,
            priority,
            counter_id: counter.clone(),
            created_at,
            served_at: None,
        };
        self.entries.push(entry.clone());
        entry
    }
}

/// Gateway backed by a vector, recording every mutating call.
#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<FakeState>,
    list_calls: AtomicUsize,
    counter_list_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// A gateway with one counter per `(id, name)` pair, all without prefix.
    pub fn with_counters(counters: &[(&str, &str)]) -> Self {
        let gw = Self::new();
        {
            let mut s = gw.state.lock().unwrap();
            s.counters = counters
                .iter()
                .map(|(id, name)| Counter {
                    id: CounterId::new(*id),
                    name: name.to_string(),
                    prefix: String::new(),
                    active: true,
                    waiting_count: 0,
                    serving_count: 0,
                })
                .collect();
        }
        gw
    }

    /// Seed an entry directly, bypassing the call log.
    pub fn seed(&self, counter: &str, name: &str, status: EntryStatus) -> QueueEntry {
        self.state.lock().unwrap().insert(&CounterId::new(counter), name, false, status)
    }

    pub fn fail_next(&self, message: &str) {
        self.state.lock().unwrap().fail_next = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn entry(&self, id: &EntryId) -> Option<QueueEntry> {
        self.state.lock().unwrap().entries.iter().find(|e| &e.id == id).cloned()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn counter_list_calls(&self) -> usize {
        self.counter_list_calls.load(Ordering::SeqCst)
    }
}

impl QueueGateway for FakeGateway {
    async fn login(&self, username: &str, password: &str) -> Result<String> {
        let mut s = self.state.lock().unwrap();
        s.check(format!("login:{username}"))?;
        if password == "wrong" {
            return Err(QueueError::Gateway { message: Some("Invalid credentials".to_string()) });
        }
        Ok(format!("token-{username}"))
    }

    async fn logout(&self) -> Result<()> {
        self.state.lock().unwrap().check("logout".to_string())
    }

    async fn list_queue(&self, counter: Option<&CounterId>) -> Result<Vec<QueueEntry>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let s = self.state.lock().unwrap();
        Ok(s.entries
            .iter()
            .filter(|e| counter.map_or(true, |c| &e.counter_id == c))
            .cloned()
            .collect())
    }

    async fn add_person(&self, entry: &NewEntry) -> Result<QueueEntry> {
        let mut s = self.state.lock().unwrap();
        s.check(format!("add:{}", entry.name))?;
        Ok(s.insert(&entry.counter_id, &entry.name, entry.priority, EntryStatus::Waiting))
    }

    async fn call_next(&self, counter: &CounterId) -> Result<Option<QueueEntry>> {
        let mut s = self.state.lock().unwrap();
        s.check(format!("call-next:{counter}"))?;
        let now = s.tick();
        let next = s
            .entries
            .iter_mut()
            .filter(|e| &e.counter_id == counter && e.status == EntryStatus::Waiting)
            .min_by_key(|e| e.created_at);
        Ok(next.map(|e| {
            e.status = EntryStatus::Serving;
            e.served_at = Some(now);
            e.clone()
        }))
    }

    async fn recall(&self, entry: &EntryId) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.check(format!("recall:{entry}"))?;
        s.entry_mut(entry).map(|_| ())
    }

    async fn complete(&self, entry: &EntryId) -> Result<QueueEntry> {
        let mut s = self.state.lock().unwrap();
        s.check(format!("complete:{entry}"))?;
        let now = s.tick();
        let e = s.entry_mut(entry)?;
        e.status = EntryStatus::Completed;
        e.served_at.get_or_insert(now);
        Ok(e.clone())
    }

    async fn skip(&self, entry: &EntryId) -> Result<QueueEntry> {
        let mut s = self.state.lock().unwrap();
        s.check(format!("skip:{entry}"))?;
        let now = s.tick();
        let e = s.entry_mut(entry)?;
        e.status = EntryStatus::Waiting;
        e.created_at = now;
        Ok(e.clone())
    }

    async fn remove(&self, entry: &EntryId) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.check(format!("remove:{entry}"))?;
        s.entries.retain(|e| &e.id != entry);
        Ok(())
    }

    async fn edit_name(&self, entry: &EntryId, name: &str) -> Result<QueueEntry> {
        let mut s = self.state.lock().unwrap();
        s.check(format!("edit:{entry}:{name}"))?;
        let e = s.entry_mut(entry)?;
        e.name = name.to_string();
        Ok(e.clone())
    }

    async fn list_counters(&self) -> Result<Vec<Counter>> {
        self.counter_list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().unwrap().counters.clone())
    }

    async fn create_counter(&self, counter: &NewCounter) -> Result<Counter> {
        let mut s = self.state.lock().unwrap();
        s.check(format!("create-counter:{}:{}", counter.name, counter.prefix))?;
        let created = Counter {
            id: CounterId::new((s.counters.len() + 1).to_string()),
            name: counter.name.clone(),
            prefix: counter.prefix.clone(),
            active: true,
            waiting_count: 0,
            serving_count: 0,
        };
        s.counters.push(created.clone());
        Ok(created)
    }

    async fn update_counter(&self, id: &CounterId, patch: &CounterPatch) -> Result<Counter> {
        let mut s = self.state.lock().unwrap();
        s.check(format!("update-counter:{id}"))?;
        let c = s
            .counters
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| QueueError::Gateway { message: Some("Counter not found".to_string()) })?;
        if let Some(name) = &patch.name {
            c.name = name.clone();
        }
        if let Some(prefix) = &patch.prefix {
            c.prefix = prefix.clone();
        }
        Ok(c.clone())
    }

    async fn toggle_counter(&self, id: &CounterId, active: bool) -> Result<Counter> {
        let mut s = self.state.lock().unwrap();
        s.check(format!("toggle-counter:{id}:{active}"))?;
        let c = s
            .counters
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| QueueError::Gateway { message: Some("Counter not found".to_string()) })?;
        c.active = active;
        Ok(c.clone())
    }

    async fn delete_counter(&self, id: &CounterId) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.check(format!("delete-counter:{id}"))?;
        s.counters.retain(|c| &c.id != id);
        Ok(())
    }
}

/// Timing for tests: a long cool-down, no settle period, and confirmatory
/// re-fetches pushed far enough out that they never fire mid-test.
pub fn test_timing() -> SyncTiming {
    SyncTiming {
        cooldown: Duration::from_secs(60),
        settle: Duration::ZERO,
        refetch_delay: Duration::from_secs(3_600),
        poll_interval: Duration::from_secs(3_600),
    }
}

pub fn sync_over(gateway: &Arc<FakeGateway>) -> QueueSync<FakeGateway> {
    QueueSync::new(Arc::clone(gateway), test_timing())
}

/// Speech engine that records what it was asked to say.
#[derive(Default)]
pub struct RecordingSpeech {
    spoken: Mutex<Vec<String>>,
}

impl RecordingSpeech {
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

impl SpeechEngine for RecordingSpeech {
    fn speak<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            self.spoken.lock().unwrap().push(text.to_string());
            Ok(())
        }
        .boxed()
    }
}

/// Printer that records tickets, or fails every job.
#[derive(Default)]
pub struct RecordingPrinter {
    printed: Mutex<Vec<Ticket>>,
    broken: bool,
}

impl RecordingPrinter {
    pub fn broken() -> Self {
        Self { printed: Mutex::new(Vec::new()), broken: true }
    }

    pub fn printed(&self) -> Vec<Ticket> {
        self.printed.lock().unwrap().clone()
    }
}

impl TicketPrinter for RecordingPrinter {
    fn print<'a>(&'a self, ticket: &'a Ticket) -> BoxFuture<'a, Result<()>> {
        async move {
            if self.broken {
                return Err(QueueError::Print("printer offline".to_string()));
            }
            self.printed.lock().unwrap().push(ticket.clone());
            Ok(())
        }
        .boxed()
    }
}

/// Yield until `cond` holds, failing after two seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}
