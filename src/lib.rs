//! Client for a multi-counter queue service.
//!
//! The gateway (HTTP, JSON envelope) is the source of truth; a realtime
//! relay pushes changes; this crate keeps a per-counter view of the queue
//! in sync with both and drives the operator actions, ticket printing and
//! spoken announcements on top of it.
//!
//! ```text
//!  gateway ──fetch──▶ sync ──▶ reconciler ──▶ display
//!     ▲                ▲
//!     │             realtime
//!  controller / counters
//! ```

pub mod announce;
pub mod cli;
pub mod config;
pub mod controller;
pub mod counters;
pub mod display;
pub mod error;
pub mod gateway;
pub mod models;
pub mod realtime;
pub mod reconciler;
pub mod session;
pub mod sync;
pub mod throttle;
pub mod ticket;

pub use error::{QueueError, Result};
