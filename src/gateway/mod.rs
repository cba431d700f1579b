//! # Gateway
//!
//! The external backend owns every queue entry and counter. This module
//! defines the one seam the rest of the crate talks to it through,
//! [`QueueGateway`], and its HTTP implementation [`HttpGateway`].
//!
//! All operations are request/response with JSON bodies wrapped in the
//! `{ success, data?, message? }` envelope, and carry the bearer credential
//! from the [`SessionStore`](crate::session::SessionStore) when one is set.

pub mod http;

use std::future::Future;

use crate::error::Result;
use crate::models::{Counter, CounterId, CounterPatch, EntryId, NewCounter, NewEntry, QueueEntry};

pub use http::{HttpGateway, HttpGatewayBuilder};

/// Operations consumed from the queue backend.
pub trait QueueGateway: Send + Sync + 'static {
    /// Exchange credentials for a bearer token.
    fn login(&self, username: &str, password: &str) -> impl Future<Output = Result<String>> + Send;

    fn logout(&self) -> impl Future<Output = Result<()>> + Send;

    /// List entries, optionally restricted to one counter.
    fn list_queue(
        &self,
        counter: Option<&CounterId>,
    ) -> impl Future<Output = Result<Vec<QueueEntry>>> + Send;

    /// Add a person; the gateway assigns id and display number.
    fn add_person(&self, entry: &NewEntry) -> impl Future<Output = Result<QueueEntry>> + Send;

    /// Promote the next waiting entry of `counter` to serving.
    ///
    /// `Ok(None)` means nobody was waiting.
    fn call_next(
        &self,
        counter: &CounterId,
    ) -> impl Future<Output = Result<Option<QueueEntry>>> + Send;

    fn recall(&self, entry: &EntryId) -> impl Future<Output = Result<()>> + Send;

    fn complete(&self, entry: &EntryId) -> impl Future<Output = Result<QueueEntry>> + Send;

    /// In-place requeue. Only used when the backend is known to support it.
    fn skip(&self, entry: &EntryId) -> impl Future<Output = Result<QueueEntry>> + Send;

    fn remove(&self, entry: &EntryId) -> impl Future<Output = Result<()>> + Send;

    /// In-place rename. Only used when the backend is known to support it.
    fn edit_name(
        &self,
        entry: &EntryId,
        name: &str,
    ) -> impl Future<Output = Result<QueueEntry>> + Send;

    fn list_counters(&self) -> impl Future<Output = Result<Vec<Counter>>> + Send;

    fn create_counter(&self, counter: &NewCounter) -> impl Future<Output = Result<Counter>> + Send;

    fn update_counter(
        &self,
        id: &CounterId,
        patch: &CounterPatch,
    ) -> impl Future<Output = Result<Counter>> + Send;

    fn toggle_counter(
        &self,
        id: &CounterId,
        active: bool,
    ) -> impl Future<Output = Result<Counter>> + Send;

    /// Delete or archive a counter. History is kept by the gateway.
    fn delete_counter(&self, id: &CounterId) -> impl Future<Output = Result<()>> + Send;
}
