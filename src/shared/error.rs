//! Shared Error Types
//!
//! Error types used across the store, the enqueue path and the reconciliation
//! engine.
//!
//! # Error Categories
//!
//! - `StoreError` - the durable SQLite store could not complete an operation
//! - `EnqueueError` - a write intent was rejected or could not be recorded
//! - `DeliveryFailure` - a single HTTP attempt for a queued event failed
//! - `SyncError` - a sync context could not be assembled or has gone away
//!
//! # Usage
//!
//! ```rust
//! use campo_sync::shared::error::EnqueueError;
//!
//! let error = EnqueueError::validation("target", "target must not be empty");
//! assert!(error.to_string().contains("target"));
//! ```
//!
//! # Thread Safety
//!
//! All error types are `Send + Sync` and can be moved across task boundaries.
use thiserror::Error;

use crate::shared::config::ConfigError;

/// SQLite extended result code for `SQLITE_FULL`.
const SQLITE_FULL: &str = "13";

/// Failures of the durable store.
///
/// A `StoreError` is never retried inside the crate: it aborts an enqueue or a
/// reconciliation pass and is reported to whoever started it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The database file could not be opened or the pool is gone
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Human-readable error message
        message: String,
    },

    /// Schema creation or migration bookkeeping failed
    #[error("schema initialization failed: {message}")]
    Schema {
        /// Human-readable error message
        message: String,
    },

    /// A statement or transaction was aborted
    #[error("transaction aborted: {message}")]
    Transaction {
        /// Human-readable error message
        message: String,
    },

    /// The device ran out of space for the database
    #[error("storage quota exceeded")]
    QuotaExceeded,

    /// A stored row could not be decoded back into an event
    #[error("corrupt record '{id}': {message}")]
    Corrupt {
        /// Primary key of the offending row
        id: String,
        /// Human-readable error message
        message: String,
    },
}

impl StoreError {
    /// Create a new unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a new schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a new transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create a new corrupt-record error
    pub fn corrupt(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            id: id.into(),
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                if db_err.code().as_deref() == Some(SQLITE_FULL) {
                    Self::QuotaExceeded
                } else {
                    Self::transaction(db_err.message().to_string())
                }
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_)
            | sqlx::Error::Configuration(_) => Self::unavailable(err.to_string()),
            other => Self::transaction(other.to_string()),
        }
    }
}

/// Rejections and failures of the enqueue path.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The request is missing a required field
    #[error("Validation error in field '{field}': {message}")]
    Validation {
        /// The field that failed validation
        field: &'static str,
        /// Human-readable error message
        message: String,
    },

    /// The payload could not be serialized
    #[error("Serialization error: {message}")]
    Serialization {
        /// Human-readable error message
        message: String,
    },

    /// An event with the caller-supplied id is already queued
    #[error("Event '{id}' is already queued")]
    DuplicateId {
        /// The id that was taken
        id: String,
    },

    /// The durable write failed; nothing was queued
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EnqueueError {
    /// Create a new validation error
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Create a new serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for EnqueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}

/// Why a single delivery attempt did not reach a terminal outcome.
///
/// The `Display` form is what ends up in `QueuedEvent::last_error`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// Connection refused, DNS failure, reset and similar transport errors
    #[error("network error: {message}")]
    Network {
        /// Error message describing the transport failure
        message: String,
    },

    /// No response arrived within the configured request timeout
    #[error("request timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout that was exceeded, in milliseconds
        timeout_ms: u64,
    },

    /// The server answered with a status that is neither 2xx nor 409
    #[error("HTTP {status_code}")]
    Http {
        /// HTTP status code
        status_code: u16,
        /// Response body content, truncated
        body: String,
    },

    /// The event could not be turned into a request (bad target or header)
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Error message
        message: String,
    },
}

impl DeliveryFailure {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Creates an HTTP status error.
    pub fn http(status_code: u16, body: impl Into<String>) -> Self {
        Self::Http {
            status_code,
            body: body.into(),
        }
    }

    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Status code carried by the failure, if the server answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

/// Errors raised while assembling or talking to a sync context.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The other side of a context channel has shut down
    #[error("sync context closed")]
    ContextClosed,
}
