//! WebSocket transport for the hosted relay.
//!
//! Frames are JSON objects `{ "event", "channel"?, "data" }`. Subscriptions
//! are requested with `pusher:subscribe` / `pusher:unsubscribe` frames, and
//! the relay's keep-alive ping is answered. `data` is often a JSON document
//! encoded as a string; it is decoded before delivery.
//!
//! The transport reconnects on its own after a fixed delay and re-sends the
//! subscriptions it knows about.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use super::channel::{EventSink, Transport, TransportEvent};
use crate::error::{QueueError, Result};

const SUBSCRIBE: &str = "pusher:subscribe";
const UNSUBSCRIBE: &str = "pusher:unsubscribe";
const PING: &str = "pusher:ping";
const PONG: &str = "pusher:pong";
const ERROR: &str = "pusher:error";

#[derive(Debug)]
enum Command {
    Subscribe(String),
    Unsubscribe(String),
    Close,
}

pub struct WebSocketTransport {
    url: String,
    reconnect_delay: Duration,
    channels: Arc<Mutex<HashSet<String>>>,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
}

impl WebSocketTransport {
    /// `base_url` is the relay endpoint, `key` the application key.
    pub fn new(base_url: &str, key: &str) -> Self {
        Self {
            url: format!("{}/app/{}?protocol=7", base_url.trim_end_matches('/'), key),
            reconnect_delay: Duration::from_secs(3),
            channels: Arc::new(Mutex::new(HashSet::new())),
            commands: Mutex::new(None),
        }
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn send(&self, cmd: Command) {
        if let Ok(guard) = self.commands.lock() {
            if let Some(tx) = guard.as_ref() {
                let _ = tx.send(cmd);
            }
        }
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, sink: EventSink) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| QueueError::Realtime("no async runtime to run the relay connection".to_string()))?;

        let mut guard = self
            .commands
            .lock()
            .map_err(|_| QueueError::Realtime("internal: command lock poisoned".to_string()))?;
        if guard.is_some() {
            return Ok(());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *guard = Some(tx);

        handle.spawn(run(
            self.url.clone(),
            self.reconnect_delay,
            Arc::clone(&self.channels),
            rx,
            sink,
        ));
        Ok(())
    }

    fn subscribe(&self, channel: &str) {
        if let Ok(mut set) = self.channels.lock() {
            set.insert(channel.to_string());
        }
        self.send(Command::Subscribe(channel.to_string()));
    }

    fn unsubscribe(&self, channel: &str) {
        if let Ok(mut set) = self.channels.lock() {
            set.remove(channel);
        }
        self.send(Command::Unsubscribe(channel.to_string()));
    }

    fn close(&self) {
        self.send(Command::Close);
        if let Ok(mut guard) = self.commands.lock() {
            *guard = None;
        }
        if let Ok(mut set) = self.channels.lock() {
            set.clear();
        }
    }
}

fn control_frame(event: &str, channel: &str) -> WsMessage {
    WsMessage::Text(json!({ "event": event, "data": { "channel": channel } }).to_string())
}

fn is_ping(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|f| f.get("event").and_then(Value::as_str).map(|e| e == PING))
        .unwrap_or(false)
}

/// Decode one relay frame into a transport event. Keep-alive frames yield `None`.
pub(crate) fn parse_frame(text: &str) -> Option<TransportEvent> {
    let frame: Value = serde_json::from_str(text).ok()?;
    let event = frame.get("event")?.as_str()?.to_string();
    let data = match frame.get("data") {
        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
        Some(v) => v.clone(),
        None => Value::Null,
    };

    if event == ERROR {
        return Some(TransportEvent::Error(data.to_string()));
    }
    if event.starts_with("pusher:") || event.starts_with("pusher_internal:") {
        return None;
    }
    let channel = frame.get("channel")?.as_str()?.to_string();
    Some(TransportEvent::Message { channel, event, data })
}

async fn run(
    url: String,
    reconnect_delay: Duration,
    channels: Arc<Mutex<HashSet<String>>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    sink: EventSink,
) {
    loop {
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                let (mut ws_sink, mut ws_stream) = ws.split();
                sink(TransportEvent::Connected);

                let known: Vec<String> =
                    channels.lock().map(|s| s.iter().cloned().collect()).unwrap_or_default();
                for channel in known {
                    if ws_sink.send(control_frame(SUBSCRIBE, &channel)).await.is_err() {
                        break;
                    }
                }

                loop {
                    tokio::select! {
                        cmd = commands.recv() => match cmd {
                            Some(Command::Subscribe(ch)) => {
                                let _ = ws_sink.send(control_frame(SUBSCRIBE, &ch)).await;
                            }
                            Some(Command::Unsubscribe(ch)) => {
                                let _ = ws_sink.send(control_frame(UNSUBSCRIBE, &ch)).await;
                            }
                            Some(Command::Close) | None => {
                                let _ = ws_sink.close().await;
                                debug!("relay connection closed");
                                return;
                            }
                        },
                        msg = ws_stream.next() => match msg {
                            Some(Ok(WsMessage::Text(text))) => {
                                if is_ping(&text) {
                                    let pong = json!({ "event": PONG, "data": {} }).to_string();
                                    let _ = ws_sink.send(WsMessage::Text(pong)).await;
                                    continue;
                                }
                                if let Some(event) = parse_frame(&text) {
                                    sink(event);
                                }
                            }
                            Some(Ok(_)) => {} // binary / ping / pong frames
                            Some(Err(e)) => {
                                sink(TransportEvent::Error(e.to_string()));
                                break;
                            }
                            None => break,
                        }
                    }
                }
                sink(TransportEvent::Disconnected);
            }
            Err(e) => {
                warn!(error = %e, %url, "relay connect failed, will retry");
                sink(TransportEvent::Error(e.to_string()));
            }
        }

        // Wait out the reconnect delay; a close request ends the task.
        let sleep = tokio::time::sleep(reconnect_delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = commands.recv() => match cmd {
                    Some(Command::Close) | None => return,
                    Some(_) => {} // replayed from `channels` on reconnect
                },
            }
        }
    }
}
