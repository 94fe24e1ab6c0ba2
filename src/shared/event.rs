//! Queued event types
//!
//! A `QueuedEvent` is one pending write intent: everything needed to replay a
//! single HTTP request against the remote API, plus the retry bookkeeping the
//! reconciler maintains for it.
//!
//! # Lifecycle
//!
//! 1. Created by the enqueue path with `attempts = 0`
//! 2. Mutated only by the reconciler after a failed attempt
//!    (`attempts`, `last_error`, `updated_at`)
//! 3. Deleted by the reconciler once the server confirms it (2xx or 409)
//!
//! The `idempotency_key` is supplied by the caller and never changes, so every
//! replay of the same event is recognizable server-side.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// HTTP method used to replay an event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Canonical upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown HTTP method name
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported HTTP method '{0}'")]
pub struct ParseMethodError(pub String);

impl FromStr for Method {
    type Err = ParseMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            _ => Err(ParseMethodError(s.to_string())),
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Opaque request body.
///
/// The queue never looks inside a payload; callers encode and decode their own
/// domain types, usually through the JSON helpers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Vec<u8>);

impl Payload {
    /// Wrap raw bytes
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Serialize a value as a JSON body
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_vec(value).map(Self)
    }

    /// Decode a JSON body back into a typed value
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A pending write intent persisted in the durable store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedEvent {
    /// Primary key of the record
    pub id: String,
    /// Semantic tag, e.g. `UPSERT_ATIVIDADE`
    pub kind: String,
    /// Logical path relative to the API base, or an absolute URL
    pub target: String,
    /// HTTP method used on replay
    pub method: Method,
    /// Extra headers, applied over the computed ones at delivery time
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Request body
    pub payload: Option<Payload>,
    /// Caller-supplied deduplication token
    pub idempotency_key: String,
    /// When the event was first recorded
    pub enqueued_at: DateTime<Utc>,
    /// When the record was last written
    pub updated_at: DateTime<Utc>,
    /// Failed delivery attempts so far
    pub attempts: u32,
    /// Description of the most recent failure
    pub last_error: Option<String>,
}

impl QueuedEvent {
    /// Record one failed attempt on the in-memory copy.
    pub fn record_failure(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.into());
        self.updated_at = at;
    }

    /// True once at least one attempt has failed
    pub fn has_failed(&self) -> bool {
        self.attempts > 0
    }
}
