//! Counter management: create, rename, re-prefix, toggle and delete counters.
//!
//! Input is validated before anything is sent. Every successful change is
//! followed by a forced reload of the counter list.

use tracing::info;

use crate::error::{QueueError, Result};
use crate::gateway::QueueGateway;
use crate::models::{Counter, CounterId, CounterPatch, NewCounter, MAX_PREFIX_LEN};
use crate::sync::{FetchScope, QueueSync};

pub struct CounterManager<G> {
    sync: QueueSync<G>,
}

impl<G: QueueGateway> CounterManager<G> {
    pub fn new(sync: QueueSync<G>) -> Self {
        Self { sync }
    }

    /// Fetch and return the current counter list.
    pub async fn list(&self) -> Result<Vec<Counter>> {
        self.sync.refresh_now(FetchScope::Counters).await?;
        Ok(self.sync.counters())
    }

    pub async fn create(&self, name: &str, prefix: &str) -> Result<Counter> {
        let body = NewCounter { name: validate_counter_name(name)?, prefix: normalize_prefix(prefix)? };
        let created = self.sync.gateway().create_counter(&body).await?;
        info!(counter = %created.id, name = %created.name, "counter created");
        self.reload().await?;
        Ok(created)
    }

    pub async fn update(&self, id: &CounterId, name: Option<&str>, prefix: Option<&str>) -> Result<Counter> {
        let patch = CounterPatch {
            name: name.map(validate_counter_name).transpose()?,
            prefix: prefix.map(normalize_prefix).transpose()?,
        };
        if patch.is_empty() {
            return Err(QueueError::Precondition("Nothing to update.".to_string()));
        }
        let updated = self.sync.gateway().update_counter(id, &patch).await?;
        info!(counter = %id, "counter updated");
        self.reload().await?;
        Ok(updated)
    }

    /// Flip the counter's active flag, based on the last known state.
    pub async fn toggle(&self, id: &CounterId) -> Result<Counter> {
        let known = self.sync.counters().into_iter().find(|c| &c.id == id);
        let current = match known {
            Some(c) => c,
            None => self
                .list()
                .await?
                .into_iter()
                .find(|c| &c.id == id)
                .ok_or_else(|| QueueError::Precondition(format!("Unknown counter {id}.")))?,
        };
        self.set_active(id, !current.active).await
    }

    pub async fn set_active(&self, id: &CounterId, active: bool) -> Result<Counter> {
        let toggled = self.sync.gateway().toggle_counter(id, active).await?;
        info!(counter = %id, active, "counter toggled");
        self.reload().await?;
        Ok(toggled)
    }

    /// Delete (or archive) a counter. Its history stays at the gateway.
    pub async fn delete(&self, id: &CounterId) -> Result<()> {
        self.sync.gateway().delete_counter(id).await?;
        info!(counter = %id, "counter deleted");
        self.reload().await
    }

    async fn reload(&self) -> Result<()> {
        self.sync.refresh_now(FetchScope::Counters).await.map(|_| ())
    }
}

fn validate_counter_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(QueueError::Precondition("Counter name is required.".to_string()));
    }
    Ok(name.to_string())
}

/// Trim and upper-case a prefix; 1 to [`MAX_PREFIX_LEN`] ASCII letters or digits.
pub fn normalize_prefix(prefix: &str) -> Result<String> {
    let prefix = prefix.trim().to_uppercase();
    let len = prefix.chars().count();
    if len == 0 || len > MAX_PREFIX_LEN {
        return Err(QueueError::Precondition(format!(
            "Prefix must be 1 to {MAX_PREFIX_LEN} characters."
        )));
    }
    if !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(QueueError::Precondition("Prefix may only contain letters and digits.".to_string()));
    }
    Ok(prefix)
}
