//! # Realtime Channel Client
//!
//! ## Responsibility
//! Owns the one shared connection to the realtime relay and the registry of
//! channel subscriptions. Callers bind callbacks to `(channel, event)` pairs
//! and get back a [`Subscription`] that unbinds exactly that pair.
//!
//! ## Guarantees
//! - A channel is subscribed on the transport at most once, no matter how
//!   many bindings share it.
//! - Unsubscribing one binding never disturbs other bindings on the same
//!   channel; the channel is released on the transport only when its last
//!   binding goes away.
//! - `connect` and `disconnect` are idempotent. `subscribe` connects on demand.
//! - Callbacks run outside the registry lock, so a callback may subscribe or
//!   unsubscribe without deadlocking.
//!
//! ## NOT Responsible For
//! - Reconnect and backoff (the [`Transport`] handles that)
//! - Interpreting payloads (see [`super::events`])

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{QueueError, Result};

/// Callback bound to one channel event.
pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Signals a transport reports back to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    /// Connection lost; the transport is expected to reconnect on its own.
    Disconnected,
    Error(String),
    Message { channel: String, event: String, data: Value },
}

/// Where a transport delivers [`TransportEvent`]s.
pub type EventSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// The pub/sub wire underneath the client.
pub trait Transport: Send + Sync {
    /// Start connecting. Events, including `Connected`, arrive through `sink`.
    fn open(&self, sink: EventSink) -> Result<()>;
    fn subscribe(&self, channel: &str);
    fn unsubscribe(&self, channel: &str);
    /// Tear down the connection. Must be safe to call when not open.
    fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct Binding {
    id: u64,
    event: String,
    callback: Callback,
}

struct Registry {
    state: ConnectionState,
    channels: HashMap<String, Vec<Binding>>,
    next_binding: u64,
    leases: usize,
}

/// Shared realtime client. Clones refer to the same connection.
#[derive(Clone)]
pub struct ChannelClient {
    transport: Arc<dyn Transport>,
    registry: Arc<Mutex<Registry>>,
}

impl ChannelClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            registry: Arc::new(Mutex::new(Registry {
                state: ConnectionState::Disconnected,
                channels: HashMap::new(),
                next_binding: 0,
                leases: 0,
            })),
        }
    }

    /// Open the connection unless one is already open or opening.
    pub fn connect(&self) -> Result<ConnectionState> {
        {
            let mut reg = self.lock()?;
            if reg.state != ConnectionState::Disconnected {
                return Ok(reg.state);
            }
            reg.state = ConnectionState::Connecting;
        }

        let weak: Weak<Mutex<Registry>> = Arc::downgrade(&self.registry);
        let sink: EventSink = Arc::new(move |event| {
            if let Some(registry) = weak.upgrade() {
                dispatch(&registry, event);
            }
        });

        if let Err(e) = self.transport.open(sink) {
            warn!(error = %e, "realtime connect failed");
            if let Ok(mut reg) = self.registry.lock() {
                reg.state = ConnectionState::Disconnected;
            }
            return Err(e);
        }
        Ok(self.state())
    }

    /// Forget every channel and close the transport. Safe when already disconnected.
    pub fn disconnect(&self) {
        let was_open = match self.registry.lock() {
            Ok(mut reg) => {
                reg.channels.clear();
                reg.leases = 0;
                std::mem::replace(&mut reg.state, ConnectionState::Disconnected)
                    != ConnectionState::Disconnected
            }
            Err(_) => true,
        };
        if was_open {
            info!("realtime disconnected");
        }
        self.transport.close();
    }

    /// Bind `callback` to `event` on `channel`, connecting first if needed.
    pub fn subscribe<F>(&self, channel: &str, event: &str, callback: F) -> Result<Subscription>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        if self.state() == ConnectionState::Disconnected {
            self.connect()?;
        }

        let (id, first_binding) = {
            let mut reg = self.lock()?;
            let id = reg.next_binding;
            reg.next_binding += 1;
            let bindings = reg.channels.entry(channel.to_string()).or_default();
            let first = bindings.is_empty();
            bindings.push(Binding { id, event: event.to_string(), callback: Arc::new(callback) });
            (id, first)
        };

        if first_binding {
            debug!(channel, "subscribing channel");
            self.transport.subscribe(channel);
        }
        Ok(Subscription { client: self.clone(), channel: channel.to_string(), id })
    }

    /// Hold the connection open until the returned lease (and every other
    /// outstanding lease) is dropped.
    pub fn lease(&self) -> Result<ConnectionLease> {
        self.connect()?;
        self.lock()?.leases += 1;
        Ok(ConnectionLease { client: self.clone() })
    }

    pub fn state(&self) -> ConnectionState {
        self.registry.lock().map(|r| r.state).unwrap_or(ConnectionState::Disconnected)
    }

    pub fn channel_count(&self) -> usize {
        self.registry.lock().map(|r| r.channels.len()).unwrap_or(0)
    }

    pub fn binding_count(&self, channel: &str) -> usize {
        self.registry
            .lock()
            .map(|r| r.channels.get(channel).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    fn unbind(&self, channel: &str, id: u64) {
        let release = match self.registry.lock() {
            Ok(mut reg) => {
                let emptied = match reg.channels.get_mut(channel) {
                    Some(bindings) => {
                        bindings.retain(|b| b.id != id);
                        bindings.is_empty()
                    }
                    None => false,
                };
                if emptied {
                    reg.channels.remove(channel);
                }
                emptied
            }
            Err(_) => false,
        };
        if release {
            debug!(channel, "releasing channel");
            self.transport.unsubscribe(channel);
        }
    }

    fn release_lease(&self) {
        let last = match self.registry.lock() {
            Ok(mut reg) if reg.leases > 0 => {
                reg.leases -= 1;
                reg.leases == 0
            }
            _ => false,
        };
        if last {
            self.disconnect();
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Registry>> {
        self.registry
            .lock()
            .map_err(|_| QueueError::Realtime("internal: registry lock poisoned".to_string()))
    }
}

fn dispatch(registry: &Mutex<Registry>, event: TransportEvent) {
    match event {
        TransportEvent::Connected => {
            if let Ok(mut reg) = registry.lock() {
                if reg.state != ConnectionState::Disconnected {
                    reg.state = ConnectionState::Connected;
                }
            }
            info!("realtime connected");
        }
        TransportEvent::Disconnected => {
            if let Ok(mut reg) = registry.lock() {
                if reg.state == ConnectionState::Connected {
                    reg.state = ConnectionState::Connecting;
                }
            }
            warn!("realtime connection lost, transport will reconnect");
        }
        TransportEvent::Error(detail) => {
            warn!(error = %detail, "realtime transport error");
        }
        TransportEvent::Message { channel, event, data } => {
            let callbacks: Vec<Callback> = match registry.lock() {
                Ok(reg) => reg
                    .channels
                    .get(&channel)
                    .map(|bindings| {
                        bindings
                            .iter()
                            .filter(|b| b.event == event)
                            .map(|b| Arc::clone(&b.callback))
                            .collect()
                    })
                    .unwrap_or_default(),
                Err(_) => Vec::new(),
            };
            if callbacks.is_empty() {
                debug!(%channel, %event, "no listener for realtime event");
            }
            for cb in callbacks {
                cb(&data);
            }
        }
    }
}

/// Handle for one `(channel, event, callback)` binding.
///
/// Dropping the handle leaves the binding in place; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
pub struct Subscription {
    client: ChannelClient,
    channel: String,
    id: u64,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Unbind this callback only.
    pub fn unsubscribe(self) {
        self.client.unbind(&self.channel, self.id);
    }
}

/// Keeps the shared connection open while held.
pub struct ConnectionLease {
    client: ChannelClient,
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.client.release_lease();
    }
}
