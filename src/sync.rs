//! # Queue Sync
//!
//! ## Responsibility
//! Keeps a [`Reconciler`] fed. Bulk fetches go through one [`FetchGate`] per
//! resource; realtime pushes are parsed and folded in; updates the cache
//! cannot take trigger a re-fetch of the affected counter.
//!
//! Three kinds of trigger reach the gateway:
//! - throttled ([`QueueSync::request_refresh`]): realtime fallbacks and the
//!   polling timer, coalesced per cool-down window;
//! - forced ([`QueueSync::refresh_now`]): confirmation after a user action,
//!   run even inside the cool-down, and repeated once if it arrived while
//!   an older fetch was in flight;
//! - delayed ([`QueueSync::schedule_refresh`]): a forced refresh after a
//!   short pause, to let realtime pushes land first.
//!
//! ## Guarantees
//! - At most one bulk fetch per resource is in flight at a time.
//! - Every state change bumps the version published by [`QueueSync::changes`].
//! - Malformed realtime payloads are logged and dropped; they never panic and
//!   never reach the cache.
//!
//! ## NOT Responsible For
//! - Deciding which actions to take (see [`crate::controller`])
//! - Rendering

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::gateway::QueueGateway;
use crate::models::{Counter, CounterId, QueueEntry};
use crate::realtime::events::{
    counter_channel, COUNTERS_CHANNEL, COUNTER_UPDATED, ENTRY_UPDATED, LIST_UPDATED,
};
use crate::realtime::{ChannelClient, RealtimeEvent, Subscription};
use crate::reconciler::{PatchOutcome, Reconciler};
use crate::throttle::{FetchGate, Refusal};

/// Resource a bulk fetch loads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FetchScope {
    /// Entries of one counter, or of every counter when `None`.
    Queue(Option<CounterId>),
    Counters,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncTiming {
    pub cooldown: Duration,
    pub settle: Duration,
    pub refetch_delay: Duration,
    pub poll_interval: Duration,
}

impl SyncTiming {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            cooldown: config.fetch_cooldown(),
            settle: config.fetch_settle(),
            refetch_delay: config.refetch_delay(),
            poll_interval: config.poll_interval(),
        }
    }
}

struct SyncInner<G> {
    gateway: Arc<G>,
    timing: SyncTiming,
    state: Mutex<Reconciler>,
    counters: Mutex<Vec<Counter>>,
    gates: Mutex<HashMap<FetchScope, FetchGate>>,
    version: watch::Sender<u64>,
}

/// Shared handle; clones see the same cache.
pub struct QueueSync<G> {
    inner: Arc<SyncInner<G>>,
}

impl<G> Clone for QueueSync<G> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

/// Recover the data behind a poisoned lock; every writer leaves it consistent.
fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<G: QueueGateway> QueueSync<G> {
    pub fn new(gateway: Arc<G>, timing: SyncTiming) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(SyncInner {
                gateway,
                timing,
                state: Mutex::new(Reconciler::new()),
                counters: Mutex::new(Vec::new()),
                gates: Mutex::new(HashMap::new()),
                version,
            }),
        }
    }

    pub fn gateway(&self) -> &G {
        &self.inner.gateway
    }

    /// Run `f` against the current cache.
    pub fn read<R>(&self, f: impl FnOnce(&Reconciler) -> R) -> R {
        f(&relock(&self.inner.state))
    }

    /// Mutate the cache and notify watchers.
    pub fn update<R>(&self, f: impl FnOnce(&mut Reconciler) -> R) -> R {
        let out = f(&mut relock(&self.inner.state));
        self.inner.version.send_modify(|v| *v = v.wrapping_add(1));
        out
    }

    /// Last counter list fetched from the gateway.
    pub fn counters(&self) -> Vec<Counter> {
        relock(&self.inner.counters).clone()
    }

    /// Version counter, bumped on every cache change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.version.subscribe()
    }

    // -----------------------------------------------------------------------
    // Fetch triggers
    // -----------------------------------------------------------------------

    /// Throttled refresh. Returns whether a fetch actually ran.
    pub async fn request_refresh(&self, scope: FetchScope) -> Result<bool> {
        self.run_gated(scope, false).await
    }

    /// Forced refresh. Returns `false` when it was folded into a fetch that
    /// was already running (which then repeats once).
    pub async fn refresh_now(&self, scope: FetchScope) -> Result<bool> {
        self.run_gated(scope, true).await
    }

    /// Forced refresh of `counter` after the configured delay, in the background.
    pub fn schedule_refresh(&self, counter: CounterId) {
        let sync = self.clone();
        let delay = self.inner.timing.refetch_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = sync.refresh_now(FetchScope::Queue(Some(counter.clone()))).await {
                warn!(error = %e, %counter, "confirmatory re-fetch failed");
            }
        });
    }

    async fn run_gated(&self, scope: FetchScope, forced: bool) -> Result<bool> {
        if let Err(refusal) = self.begin(&scope, forced) {
            debug!(?scope, ?refusal, forced, "fetch skipped");
            return Ok(false);
        }
        loop {
            let result = self.fetch(&scope).await;
            let again = self.finish(&scope);
            if result.is_err() || !again || self.begin(&scope, true).is_err() {
                return result.map(|()| true);
            }
            debug!(?scope, "repeating fetch requested while in flight");
        }
    }

    fn begin(&self, scope: &FetchScope, forced: bool) -> std::result::Result<(), Refusal> {
        let timing = self.inner.timing;
        let mut gates = relock(&self.inner.gates);
        let gate = gates
            .entry(scope.clone())
            .or_insert_with(|| FetchGate::new(timing.cooldown, timing.settle));
        let now = Instant::now();
        if forced {
            gate.try_begin_forced(now)
        } else {
            gate.try_begin(now)
        }
    }

    fn finish(&self, scope: &FetchScope) -> bool {
        relock(&self.inner.gates)
            .get_mut(scope)
            .map(|g| g.finish(Instant::now()))
            .unwrap_or(false)
    }

    async fn fetch(&self, scope: &FetchScope) -> Result<()> {
        match scope {
            FetchScope::Queue(counter) => {
                let entries = self.inner.gateway.list_queue(counter.as_ref()).await?;
                debug!(count = entries.len(), ?counter, "queue fetched");
                self.update(|r| match counter {
                    Some(id) => r.rebuild_counter(id, entries),
                    None => r.rebuild_all(entries),
                });
            }
            FetchScope::Counters => {
                let counters = self.inner.gateway.list_counters().await?;
                debug!(count = counters.len(), "counters fetched");
                self.update(|r| r.set_counters(&counters));
                *relock(&self.inner.counters) = counters;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Updates
    // -----------------------------------------------------------------------

    /// Patch one entry the client just learned about (an action response).
    ///
    /// An entry the cache does not hold yet schedules a re-fetch of its counter.
    pub fn apply_local(&self, entry: QueueEntry) -> PatchOutcome {
        let outcome = self.update(|r| r.apply_entry_update(entry));
        if let PatchOutcome::Stale(counter) = &outcome {
            self.schedule_refresh(counter.clone());
        }
        outcome
    }

    /// Fold a parsed realtime event in, re-fetching its counter when the
    /// cache cannot take it.
    pub async fn handle_event(&self, event: RealtimeEvent) -> Result<PatchOutcome> {
        let outcome = self.update(|r| r.apply(event));
        if let PatchOutcome::Stale(counter) = &outcome {
            debug!(%counter, "realtime patch for unknown entry, re-fetching counter");
            self.request_refresh(FetchScope::Queue(Some(counter.clone()))).await?;
        }
        Ok(outcome)
    }

    /// Bind the cache to the realtime channels of `counters` and to the
    /// global counters channel.
    ///
    /// Payloads are parsed on the transport's thread and queued; one task
    /// per attachment folds them in order through [`QueueSync::handle_event`].
    /// The task ends once every returned subscription is gone. Must be
    /// called inside a tokio runtime.
    pub fn attach(&self, client: &ChannelClient, counters: &[CounterId]) -> Result<Vec<Subscription>> {
        self.subscribe_channels(client, counters, true)
    }

    /// Attach the channels of listed counters not yet in `attached`, e.g.
    /// counters created after the view started. Adds them to `attached`.
    pub fn attach_new_counters(
        &self,
        client: &ChannelClient,
        attached: &mut BTreeSet<CounterId>,
    ) -> Result<Vec<Subscription>> {
        let fresh: Vec<CounterId> = self
            .counters()
            .into_iter()
            .map(|c| c.id)
            .filter(|id| !attached.contains(id))
            .collect();
        if fresh.is_empty() {
            return Ok(Vec::new());
        }
        let subs = self.subscribe_channels(client, &fresh, false)?;
        debug!(count = fresh.len(), "attached newly listed counters");
        attached.extend(fresh);
        Ok(subs)
    }

    fn subscribe_channels(
        &self,
        client: &ChannelClient,
        counters: &[CounterId],
        with_counter_list: bool,
    ) -> Result<Vec<Subscription>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| QueueError::Realtime("attach needs a running tokio runtime".to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(self.clone().drain(rx));

        let mut subs = Vec::with_capacity(counters.len() * 2 + 1);
        for counter in counters {
            let channel = counter_channel(counter);
            for event in [ENTRY_UPDATED, LIST_UPDATED] {
                subs.push(client.subscribe(&channel, event, listener(event, tx.clone()))?);
            }
        }
        if with_counter_list {
            subs.push(client.subscribe(COUNTERS_CHANNEL, COUNTER_UPDATED, listener(COUNTER_UPDATED, tx))?);
        }
        Ok(subs)
    }

    async fn drain(self, mut events: mpsc::UnboundedReceiver<RealtimeEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle_event(event).await {
                warn!(error = %e, "re-fetch after realtime update failed");
            }
        }
        debug!("realtime attachment released");
    }

    /// Periodic throttled refresh of `scopes` until the task is dropped.
    pub async fn poll(self, scopes: Vec<FetchScope>) {
        let mut ticker = tokio::time::interval(self.inner.timing.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut consecutive_failures: u32 = 0;
        loop {
            ticker.tick().await;
            for scope in &scopes {
                match self.request_refresh(scope.clone()).await {
                    Ok(_) => consecutive_failures = 0,
                    Err(e) => {
                        consecutive_failures = consecutive_failures.saturating_add(1);
                        if consecutive_failures >= 5 {
                            error!(error = %e, consecutive_failures, "polling failed repeatedly, will retry next tick");
                        } else {
                            warn!(error = %e, ?scope, "poll failed");
                        }
                    }
                }
            }
        }
    }
}

fn listener(
    event: &'static str,
    queue: mpsc::UnboundedSender<RealtimeEvent>,
) -> impl Fn(&Value) + Send + Sync + 'static {
    move |data: &Value| match RealtimeEvent::parse(event, data) {
        Ok(parsed) => {
            if queue.send(parsed).is_err() {
                debug!(event, "realtime consumer gone, dropping payload");
            }
        }
        Err(e) => warn!(error = %e, event, "dropping realtime payload"),
    }
}
