//! Wire-level records owned by the gateway: queue entries, counters, and the
//! response envelope every gateway call is wrapped in.
//!
//! The client never invents identifiers. Every `EntryId` and `CounterId`
//! seen here was assigned by the gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{QueueError, Result};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// The gateway emits ids as either JSON numbers or strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Num(i64),
    Str(String),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Num(n) => n.to_string(),
            RawId::Str(s) => s,
        }
    }
}

macro_rules! gateway_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(from = "RawId", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<RawId> for $name {
            fn from(raw: RawId) -> Self {
                Self(raw.into())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(s.trim().to_string()))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

gateway_id!(
    /// Identifier of a queue entry.
    EntryId
);
gateway_id!(
    /// Identifier of a service counter.
    CounterId
);

// ---------------------------------------------------------------------------
// Queue entries
// ---------------------------------------------------------------------------

/// Lifecycle of an entry. Transitions only happen at the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Waiting,
    Serving,
    Completed,
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryStatus::Waiting => write!(f, "waiting"),
            EntryStatus::Serving => write!(f, "serving"),
            EntryStatus::Completed => write!(f, "completed"),
        }
    }
}

/// One customer's place in a counter's queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,
    /// Display number such as `P3` or `A-007`, assigned by the gateway.
    #[serde(alias = "queue_number")]
    pub number: String,
    #[serde(alias = "customer_name")]
    pub name: String,
    pub status: EntryStatus,
    #[serde(default, alias = "is_priority")]
    pub priority: bool,
    pub counter_id: CounterId,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub served_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    /// Timestamp used to order the recently-served list.
    pub fn served_or_created(&self) -> DateTime<Utc> {
        self.served_at.unwrap_or(self.created_at)
    }

    /// Trailing numeric part of the display number (`"A-007"` → 7).
    pub fn number_suffix(&self) -> Option<u32> {
        let digits: String = self
            .number
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        digits.parse().ok()
    }
}

/// Body of an add-person request.
#[derive(Debug, Clone, Serialize)]
pub struct NewEntry {
    pub counter_id: CounterId,
    pub name: String,
    pub priority: bool,
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// A staffed service point with its own queue and number prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    pub id: CounterId,
    pub name: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_true", alias = "is_active")]
    pub active: bool,
    #[serde(default)]
    pub waiting_count: u32,
    #[serde(default)]
    pub serving_count: u32,
}

fn default_true() -> bool {
    true
}

/// Maximum length of a counter's number prefix.
pub const MAX_PREFIX_LEN: usize = 3;

/// Body of a create-counter request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewCounter {
    pub name: String,
    pub prefix: String,
}

/// Partial counter update. Absent fields are omitted from the JSON body.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CounterPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl CounterPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.prefix.is_none()
    }
}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

/// `{ success, data?, message? }`, the shape of every gateway response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Convert the envelope into the payload, mapping `success = false` to
    /// [`QueueError::Gateway`].
    pub fn into_result(self) -> Result<Option<T>> {
        if self.success {
            Ok(self.data)
        } else {
            Err(QueueError::Gateway { message: self.message })
        }
    }

    /// Like [`into_result`](Self::into_result) but a missing payload is an error.
    pub fn into_data(self, context: &str) -> Result<T> {
        self.into_result()?.ok_or_else(|| QueueError::Decode {
            context: context.to_string(),
            detail: "response carried no data".to_string(),
        })
    }
}

/// Credential returned by a successful login.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginData {
    #[serde(alias = "access_token")]
    pub token: String,
}
