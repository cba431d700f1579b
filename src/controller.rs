//! # Controller
//!
//! ## Responsibility
//! The operator's actions on one active counter. Each action follows the
//! same shape: call the gateway, patch the local cache with what it
//! returned, then confirm with a re-fetch (delayed for actions whose
//! realtime push usually lands first, immediate for adds).
//!
//! ## Guarantees
//! - A gateway rejection aborts the action at that step and is returned to
//!   the caller unchanged; nothing is retried.
//! - Name validation happens before any gateway call.
//!
//! ## NOT Responsible For
//! - Rendering or reading input (see [`crate::display`], the binary)
//! - Counter CRUD (see [`crate::counters`])

use std::sync::Arc;

use chrono::Local;
use tracing::{debug, info, warn};

use crate::announce::{call_text, Announcement, Announcer};
use crate::error::{QueueError, Result};
use crate::gateway::QueueGateway;
use crate::models::{CounterId, EntryId, EntryStatus, NewEntry, QueueEntry};
use crate::reconciler::CounterView;
use crate::sync::{FetchScope, QueueSync};
use crate::ticket::{Ticket, TicketPrinter};

/// Prefix used in previews when a counter has none.
pub const DEFAULT_PREFIX: &str = "P";

/// Outcome of [`Controller::add_person`].
#[derive(Debug)]
pub struct AddReceipt {
    /// The entry as the gateway stored it.
    pub entry: QueueEntry,
    /// Number printed on the ticket. May differ from `entry.number`.
    pub preview_number: String,
    /// Set when the entry was added but its ticket could not be printed.
    pub print_error: Option<QueueError>,
}

/// Outcome of [`Controller::call_next`].
#[derive(Debug)]
pub struct CallReceipt {
    pub entry: QueueEntry,
    pub announcement: Announcement,
}

pub struct Controller<G> {
    sync: QueueSync<G>,
    announcer: Arc<Announcer>,
    printer: Arc<dyn TicketPrinter>,
    counter: CounterId,
    in_place: bool,
}

impl<G: QueueGateway> Controller<G> {
    pub fn new(
        sync: QueueSync<G>,
        announcer: Arc<Announcer>,
        printer: Arc<dyn TicketPrinter>,
        counter: CounterId,
    ) -> Self {
        Self { sync, announcer, printer, counter, in_place: false }
    }

    /// Use the gateway's skip / edit-name / delete endpoints.
    pub fn in_place_updates(mut self, enabled: bool) -> Self {
        self.in_place = enabled;
        self
    }

    pub fn counter(&self) -> &CounterId {
        &self.counter
    }

    pub fn sync(&self) -> &QueueSync<G> {
        &self.sync
    }

    /// Snapshot of the active counter's view.
    pub fn view(&self) -> Option<CounterView> {
        self.sync.read(|r| r.view(&self.counter).cloned())
    }

    /// Load the active counter's queue and the counter list.
    pub async fn load(&self) -> Result<()> {
        self.sync.refresh_now(FetchScope::Counters).await?;
        self.sync.refresh_now(FetchScope::Queue(Some(self.counter.clone()))).await?;
        Ok(())
    }

    fn gateway(&self) -> &G {
        self.sync.gateway()
    }

    fn counter_label(&self) -> String {
        self.sync
            .read(|r| r.view(&self.counter).map(CounterView::display_name))
            .unwrap_or_else(|| format!("Counter {}", self.counter))
    }

    fn known_entry(&self, id: &EntryId) -> Result<QueueEntry> {
        self.sync
            .read(|r| r.find_entry(id).cloned())
            .ok_or_else(|| QueueError::Precondition(format!("Entry {id} is no longer in the queue.")))
    }

    // -----------------------------------------------------------------------
    // Serving
    // -----------------------------------------------------------------------

    /// Finish whoever is being served and call the next waiting entry.
    ///
    /// `Ok(None)` when nobody is waiting.
    pub async fn call_next(&self) -> Result<Option<CallReceipt>> {
        let serving = self.sync.read(|r| r.view(&self.counter).and_then(|v| v.serving().cloned()));
        if let Some(current) = serving {
            debug!(entry = %current.id, "completing current entry before call-next");
            let done = self.gateway().complete(&current.id).await?;
            self.sync.apply_local(done);
        }

        let called = self.gateway().call_next(&self.counter).await?;
        self.sync.schedule_refresh(self.counter.clone());
        let Some(entry) = called else {
            info!(counter = %self.counter, "call-next: nobody waiting");
            return Ok(None);
        };

        self.sync.apply_local(entry.clone());
        info!(counter = %self.counter, number = %entry.number, "called next");
        let announcement = self.announcer.announce(&call_text(&entry, &self.counter_label())).await;
        Ok(Some(CallReceipt { entry, announcement }))
    }

    /// Announce the entry being served again and log the recall at the gateway.
    pub async fn recall(&self) -> Result<CallReceipt> {
        let entry = self
            .sync
            .read(|r| r.view(&self.counter).and_then(|v| v.serving().cloned()))
            .ok_or_else(|| QueueError::Precondition("No customer is being served.".to_string()))?;
        let announcement = self.announcer.announce(&call_text(&entry, &self.counter_label())).await;
        self.gateway().recall(&entry.id).await?;
        Ok(CallReceipt { entry, announcement })
    }

    pub async fn complete(&self, id: &EntryId) -> Result<QueueEntry> {
        let done = self.gateway().complete(id).await?;
        self.sync.apply_local(done.clone());
        self.sync.schedule_refresh(done.counter_id.clone());
        Ok(done)
    }

    /// Take the entry out of the queue.
    pub async fn remove(&self, id: &EntryId) -> Result<()> {
        if !self.in_place {
            self.complete(id).await?;
            return Ok(());
        }
        let counter = self.sync.read(|r| r.find_entry(id).map(|e| e.counter_id.clone()));
        self.gateway().remove(id).await?;
        self.sync.schedule_refresh(counter.unwrap_or_else(|| self.counter.clone()));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Requeue
    // -----------------------------------------------------------------------

    /// Send the entry to the back of its queue. Without in-place updates the
    /// customer gets a new entry and a new number.
    pub async fn skip(&self, id: &EntryId) -> Result<QueueEntry> {
        if self.in_place {
            let moved = self.gateway().skip(id).await?;
            self.sync.apply_local(moved.clone());
            self.sync.schedule_refresh(moved.counter_id.clone());
            return Ok(moved);
        }
        let old = self.known_entry(id)?;
        self.requeue(&old, old.name.clone()).await
    }

    /// Correct a customer's name. Without in-place updates this re-adds the
    /// customer under a new number.
    pub async fn edit_name(&self, id: &EntryId, name: &str) -> Result<QueueEntry> {
        let name = validate_name(name)?;
        if self.in_place {
            let renamed = self.gateway().edit_name(id, &name).await?;
            self.sync.apply_local(renamed.clone());
            self.sync.schedule_refresh(renamed.counter_id.clone());
            return Ok(renamed);
        }
        let old = self.known_entry(id)?;
        self.requeue(&old, name).await
    }

    async fn requeue(&self, old: &QueueEntry, name: String) -> Result<QueueEntry> {
        let done = self.gateway().complete(&old.id).await?;
        self.sync.apply_local(done);
        let fresh = self
            .gateway()
            .add_person(&NewEntry { counter_id: old.counter_id.clone(), name, priority: old.priority })
            .await?;
        info!(old = %old.number, new = %fresh.number, "entry requeued");
        self.sync.schedule_refresh(old.counter_id.clone());
        Ok(fresh)
    }

    /// Re-issue completion for every completed entry the cache knows about,
    /// then reload. Returns how many were sent.
    pub async fn clear_completed(&self) -> Result<usize> {
        let done: Vec<EntryId> = self.sync.read(|r| {
            r.views()
                .flat_map(|v| v.recently_served.iter())
                .filter(|e| e.status == EntryStatus::Completed)
                .map(|e| e.id.clone())
                .collect()
        });
        for id in &done {
            self.gateway().complete(id).await?;
        }
        self.sync.refresh_now(FetchScope::Queue(None)).await?;
        Ok(done.len())
    }

    // -----------------------------------------------------------------------
    // Intake
    // -----------------------------------------------------------------------

    /// Number the next ticket for the active counter will probably get.
    pub fn preview_number(&self) -> String {
        self.sync.read(|r| match r.view(&self.counter) {
            Some(view) => preview_number(view),
            None => format!("{DEFAULT_PREFIX}1"),
        })
    }

    /// Add a customer to the active counter and print their ticket.
    pub async fn add_person(&self, name: &str, priority: bool) -> Result<AddReceipt> {
        let name = validate_name(name)?;
        let preview = self.preview_number();
        let ahead = self.sync.read(|r| r.view(&self.counter).map_or(0, |v| v.waiting_queue.len()));

        let entry = self
            .gateway()
            .add_person(&NewEntry { counter_id: self.counter.clone(), name, priority })
            .await?;
        info!(counter = %self.counter, preview = %preview, assigned = %entry.number, "person added");

        let ticket = Ticket {
            number: preview.clone(),
            name: entry.name.clone(),
            priority: entry.priority,
            counter_name: self.counter_label(),
            issued_at: Local::now(),
            ahead,
        };
        let print_error = self.printer.print(&ticket).await.err();
        if let Some(e) = &print_error {
            warn!(error = %e, "ticket not printed");
        }

        if let Err(e) = self.sync.refresh_now(FetchScope::Queue(Some(self.counter.clone()))).await {
            warn!(error = %e, "re-fetch after add failed");
        }
        Ok(AddReceipt { entry, preview_number: preview, print_error })
    }
}

/// Prefix of the counter (or [`DEFAULT_PREFIX`]) followed by one more than the
/// highest numeric suffix among the counter's known entries.
pub fn preview_number(view: &CounterView) -> String {
    let prefix = if view.meta.prefix.trim().is_empty() {
        DEFAULT_PREFIX
    } else {
        view.meta.prefix.trim()
    };
    let highest = view
        .entries()
        .filter_map(QueueEntry::number_suffix)
        .max()
        .unwrap_or(0);
    format!("{prefix}{}", highest.checked_add(1).unwrap_or(1))
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(QueueError::Precondition("Please enter the customer's name.".to_string()));
    }
    Ok(name.to_string())
}
