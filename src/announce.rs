//! Spoken announcements.
//!
//! Speech itself is delegated to the platform (an external TTS command).
//! [`Announcer`] only guards against overlap: while one announcement is
//! being spoken, new ones are dropped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::{debug, info, warn};

use crate::error::{QueueError, Result};
use crate::models::QueueEntry;

/// Something that can say a sentence out loud.
pub trait SpeechEngine: Send + Sync {
    fn speak<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Runs a text-to-speech program with the sentence as its last argument.
#[derive(Debug, Clone)]
pub struct CommandSpeech {
    program: String,
    args: Vec<String>,
}

impl CommandSpeech {
    /// `command` is split on whitespace: `"espeak -s 140"`.
    pub fn new(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self { program, args: parts.collect() })
    }
}

impl SpeechEngine for CommandSpeech {
    fn speak<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            let status = tokio::process::Command::new(&self.program)
                .args(&self.args)
                .arg(text)
                .status()
                .await
                .map_err(|e| QueueError::Speech(format!("{}: {e}", self.program)))?;
            if status.success() {
                Ok(())
            } else {
                Err(QueueError::Speech(format!("{} exited with {status}", self.program)))
            }
        }
        .boxed()
    }
}

/// Logs the sentence instead of speaking it.
#[derive(Debug, Clone, Default)]
pub struct LogSpeech;

impl SpeechEngine for LogSpeech {
    fn speak<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            info!(announcement = text, "announce");
            Ok(())
        }
        .boxed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Announcement {
    Spoken,
    /// Another announcement was still playing.
    Dropped,
    Failed,
}

pub struct Announcer {
    engine: Arc<dyn SpeechEngine>,
    busy: AtomicBool,
}

/// Clears the busy flag however the utterance ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Announcer {
    pub fn new(engine: Arc<dyn SpeechEngine>) -> Self {
        Self { engine, busy: AtomicBool::new(false) }
    }

    /// Engine chosen from an optional command: [`CommandSpeech`] or [`LogSpeech`].
    pub fn from_command(command: Option<&str>) -> Self {
        match command.and_then(CommandSpeech::new) {
            Some(cmd) => Self::new(Arc::new(cmd)),
            None => Self::new(Arc::new(LogSpeech)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn announce(&self, text: &str) -> Announcement {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(announcement = text, "speech busy, dropping announcement");
            return Announcement::Dropped;
        }
        let _guard = BusyGuard(&self.busy);
        match self.engine.speak(text).await {
            Ok(()) => Announcement::Spoken,
            Err(e) => {
                warn!(error = %e, "announcement failed");
                Announcement::Failed
            }
        }
    }
}

/// Sentence spoken when `entry` is called to `counter_label`.
pub fn call_text(entry: &QueueEntry, counter_label: &str) -> String {
    format!("Number {}, {}, please proceed to {}.", entry.number, entry.name, counter_label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    struct Gated {
        release: Arc<Notify>,
        spoken: Mutex<Vec<String>>,
    }

    impl SpeechEngine for Gated {
        fn speak<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<()>> {
            async move {
                self.release.notified().await;
                self.spoken.lock().unwrap().push(text.to_string());
                Ok(())
            }
            .boxed()
        }
    }

    struct Broken;

    impl SpeechEngine for Broken {
        fn speak<'a>(&'a self, _text: &'a str) -> BoxFuture<'a, Result<()>> {
            async { Err(QueueError::Speech("no audio device".to_string())) }.boxed()
        }
    }

    #[test]
    fn test_command_speech_parses_args() {
        let cmd = CommandSpeech::new("espeak -s 140").unwrap();
        assert_eq!(cmd.program, "espeak");
        assert_eq!(cmd.args, ["-s", "140"]);
        assert!(CommandSpeech::new("   ").is_none());
    }

    #[tokio::test]
    async fn test_overlapping_announcement_is_dropped() {
        let release = Arc::new(Notify::new());
        let engine = Arc::new(Gated { release: Arc::clone(&release), spoken: Mutex::new(Vec::new()) });
        let announcer = Arc::new(Announcer::new(engine.clone()));

        let first = {
            let a = Arc::clone(&announcer);
            tokio::spawn(async move { a.announce("first").await })
        };
        while !announcer.is_busy() {
            tokio::task::yield_now().await;
        }
        assert_eq!(announcer.announce("second").await, Announcement::Dropped);

        release.notify_one();
        assert_eq!(first.await.unwrap(), Announcement::Spoken);
        assert!(!announcer.is_busy());
        assert_eq!(*engine.spoken.lock().unwrap(), ["first"]);
    }

    #[tokio::test]
    async fn test_failure_clears_busy_flag() {
        let announcer = Announcer::new(Arc::new(Broken));
        assert_eq!(announcer.announce("x").await, Announcement::Failed);
        assert!(!announcer.is_busy());
        assert_eq!(announcer.announce("y").await, Announcement::Failed);
    }

    #[tokio::test]
    async fn test_log_speech_always_succeeds() {
        let announcer = Announcer::from_command(None);
        assert_eq!(announcer.announce("hello").await, Announcement::Spoken);
    }

    #[test]
    fn test_call_text_names_counter_and_customer() {
        let entry: QueueEntry = serde_json::from_value(serde_json::json!({
            "id": 1, "number": "P1", "name": "Ana", "status": "serving",
            "counter_id": 1, "created_at": "2026-03-02T09:00:00Z"
        }))
        .unwrap();
        let text = call_text(&entry, "Counter 1");
        assert_eq!(text, "Number P1, Ana, please proceed to Counter 1.");
    }
}
