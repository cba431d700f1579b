//! Realtime push layer: the shared channel client, its transports, and the
//! typed payloads the backend publishes.

pub mod channel;
pub mod events;
pub mod memory;
pub mod websocket;

pub use channel::{
    ChannelClient, ConnectionLease, ConnectionState, EventSink, Subscription, Transport,
    TransportEvent,
};
pub use events::{counter_channel, CounterUpdate, ListReplacement, RealtimeEvent};
pub use memory::MemoryTransport;
pub use websocket::WebSocketTransport;
