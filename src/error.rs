//! Crate-wide error type.
//!
//! Every fallible operation in the library returns [`QueueError`]. The
//! variants follow the four failure categories the client distinguishes:
//! transport failures, gateway-reported business failures, realtime channel
//! failures and local precondition failures.

use thiserror::Error;

/// Alert text shown when the gateway did not supply a message of its own.
pub const GENERIC_ALERT: &str = "Something went wrong. Please try again.";

/// Errors produced by the queue client.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A TCP-level connection could not be established or the request did not complete.
    #[error("connection failed to {url}: {detail}")]
    Connect { url: String, detail: String },

    /// The gateway replied with a non-2xx HTTP status code.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// A response or payload could not be decoded into the expected shape.
    #[error("could not decode {context}: {detail}")]
    Decode { context: String, detail: String },

    /// A well-formed response with `success = false`.
    #[error("gateway rejected the request: {}", message.as_deref().unwrap_or("no message"))]
    Gateway { message: Option<String> },

    /// The realtime transport dropped or refused a subscription.
    #[error("realtime channel error: {0}")]
    Realtime(String),

    /// A realtime event name this client does not understand.
    #[error("unrecognized realtime event '{event}'")]
    UnknownEvent { event: String },

    /// An action was attempted without the state it needs.
    #[error("{0}")]
    Precondition(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("printing failed: {0}")]
    Print(String),

    #[error("speech failed: {0}")]
    Speech(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl QueueError {
    /// Text for the blocking alert shown to the operator.
    ///
    /// Gateway rejections surface the backend message verbatim; precondition
    /// failures surface their own description; everything else falls back to
    /// [`GENERIC_ALERT`].
    pub fn alert_text(&self) -> String {
        match self {
            QueueError::Gateway { message: Some(m) } if !m.trim().is_empty() => m.clone(),
            QueueError::Precondition(m) => m.clone(),
            QueueError::Print(_) => {
                "Could not print the ticket. Please check the printer and allow print jobs.".to_string()
            }
            _ => GENERIC_ALERT.to_string(),
        }
    }

    /// Whether this failure came from the transport rather than the gateway's logic.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            QueueError::Connect { .. } | QueueError::Http { .. } | QueueError::Decode { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
