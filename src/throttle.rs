//! Fetch throttling.
//!
//! Bulk list fetches can be triggered by bursts of realtime events, the
//! polling timer and user actions at once. A [`FetchGate`] per resource
//! coalesces them: throttled triggers start at most one fetch per cool-down
//! window, and no trigger ever starts a fetch while one is in flight or
//! within the settle period after one finished.
//!
//! Time is passed in explicitly so the gate can be driven by tests.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct FetchGate {
    cooldown: Duration,
    settle: Duration,
    last_started: Option<Instant>,
    last_finished: Option<Instant>,
    in_flight: bool,
    pending: bool,
}

/// Why a fetch was not started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    InFlight,
    Settling,
    CoolingDown,
}

impl FetchGate {
    pub fn new(cooldown: Duration, settle: Duration) -> Self {
        Self {
            cooldown,
            settle,
            last_started: None,
            last_finished: None,
            in_flight: false,
            pending: false,
        }
    }

    /// Throttled trigger: refused inside the cool-down window.
    pub fn try_begin(&mut self, now: Instant) -> Result<(), Refusal> {
        self.check_busy(now)?;
        if let Some(started) = self.last_started {
            if now.saturating_duration_since(started) < self.cooldown {
                return Err(Refusal::CoolingDown);
            }
        }
        self.start(now);
        Ok(())
    }

    /// Confirmatory trigger after an action: ignores the cool-down window.
    ///
    /// When a fetch is already in flight the request is remembered and
    /// reported by [`finish`](Self::finish), since the running fetch may
    /// predate the action it should confirm.
    pub fn try_begin_forced(&mut self, now: Instant) -> Result<(), Refusal> {
        if self.in_flight {
            self.pending = true;
            return Err(Refusal::InFlight);
        }
        self.start(now);
        Ok(())
    }

    /// Mark the running fetch done. Returns `true` when a forced fetch was
    /// requested meanwhile and should run next.
    pub fn finish(&mut self, now: Instant) -> bool {
        self.in_flight = false;
        self.last_finished = Some(now);
        std::mem::take(&mut self.pending)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    fn check_busy(&self, now: Instant) -> Result<(), Refusal> {
        if self.in_flight {
            return Err(Refusal::InFlight);
        }
        if let Some(finished) = self.last_finished {
            if now.saturating_duration_since(finished) < self.settle {
                return Err(Refusal::Settling);
            }
        }
        Ok(())
    }

    fn start(&mut self, now: Instant) {
        self.in_flight = true;
        self.last_started = Some(now);
    }
}
