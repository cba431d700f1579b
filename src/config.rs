//! Runtime configuration.
//!
//! Loaded from a TOML file (default `queueboard.toml` in the working
//! directory, optional). The service endpoints can be overridden from the
//! environment so a kiosk image can be pointed at a different backend
//! without editing the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QueueError, Result};

/// File looked up when no `--config` path is given.
pub const DEFAULT_CONFIG_FILE: &str = "queueboard.toml";

pub const ENV_GATEWAY_URL: &str = "QUEUEBOARD_GATEWAY_URL";
pub const ENV_REALTIME_URL: &str = "QUEUEBOARD_REALTIME_URL";
pub const ENV_REALTIME_KEY: &str = "QUEUEBOARD_REALTIME_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Base URL of the gateway HTTP API (e.g. `http://127.0.0.1:8000`).
    pub gateway_url: String,
    /// WebSocket URL of the realtime relay.
    pub realtime_url: String,
    /// Application key sent to the relay on connect.
    pub realtime_key: String,
    /// Where the bearer credential is persisted between runs.
    pub session_file: PathBuf,
    /// Minimum spacing between two throttled bulk fetches of the same resource.
    pub fetch_cooldown_ms: u64,
    /// Quiet period after a fetch completes before another may start.
    pub fetch_settle_ms: u64,
    /// Delay before the confirmatory re-fetch that follows an action.
    pub refetch_delay_ms: u64,
    /// Periodic re-fetch interval for the long-running views.
    pub poll_interval_secs: u64,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Command that receives the rendered ticket file as its last argument.
    pub print_command: String,
    /// Delay between writing the ticket document and invoking the printer.
    pub print_delay_ms: u64,
    /// Directory rendered tickets are written to before printing.
    pub spool_dir: PathBuf,
    /// Text-to-speech command, e.g. `espeak`. When unset announcements are only logged.
    pub speech_command: Option<String>,
    /// Scrolling message on the public display.
    pub ticker: String,
    /// Use the gateway's skip, edit-name and delete endpoints instead of
    /// completing the entry (and re-adding it for skip / edit-name).
    pub in_place_requeue: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            gateway_url: "http://127.0.0.1:8000".to_string(),
            realtime_url: "ws://127.0.0.1:6001".to_string(),
            realtime_key: "queueboard".to_string(),
            session_file: PathBuf::from(".queueboard-session.json"),
            fetch_cooldown_ms: 2_000,
            fetch_settle_ms: 500,
            refetch_delay_ms: 800,
            poll_interval_secs: 10,
            connect_timeout_secs: 3,
            request_timeout_secs: 10,
            print_command: "lp".to_string(),
            print_delay_ms: 500,
            spool_dir: std::env::temp_dir().join("queueboard-tickets"),
            speech_command: None,
            ticker: "Please have your ticket ready when your number is called.".to_string(),
            in_place_requeue: false,
        }
    }
}

impl QueueConfig {
    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_FILE`] is
    /// read when present and defaults are used otherwise. Endpoint overrides
    /// from the environment are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            QueueError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| QueueError::Config(e.to_string()))
    }

    /// Override endpoint fields from `lookup` (normally the process environment).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup(ENV_GATEWAY_URL) {
            self.gateway_url = v;
        }
        if let Some(v) = lookup(ENV_REALTIME_URL) {
            self.realtime_url = v;
        }
        if let Some(v) = lookup(ENV_REALTIME_KEY) {
            self.realtime_key = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.gateway_url.starts_with("http://") || self.gateway_url.starts_with("https://")) {
            return Err(QueueError::Config(format!(
                "gateway_url must be an http(s) URL, got '{}'",
                self.gateway_url
            )));
        }
        if !(self.realtime_url.starts_with("ws://") || self.realtime_url.starts_with("wss://")) {
            return Err(QueueError::Config(format!(
                "realtime_url must be a ws(s) URL, got '{}'",
                self.realtime_url
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(QueueError::Config("poll_interval_secs must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn fetch_cooldown(&self) -> Duration {
        Duration::from_millis(self.fetch_cooldown_ms)
    }

    pub fn fetch_settle(&self) -> Duration {
        Duration::from_millis(self.fetch_settle_ms)
    }

    pub fn refetch_delay(&self) -> Duration {
        Duration::from_millis(self.refetch_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn print_delay(&self) -> Duration {
        Duration::from_millis(self.print_delay_ms)
    }
}
