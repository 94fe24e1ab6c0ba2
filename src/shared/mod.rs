//! Shared Module
//!
//! Types used by every sync context: the queued event model, the messages
//! contexts exchange, configuration and error types.
//!
//! # Overview
//!
//! Nothing in here performs I/O except configuration loading. The store, the
//! reconciler and the scheduler all build on these types.

/// Queued event model
pub mod event;

/// Cross-context messages
pub mod message;

/// Shared error types
pub mod error;

/// Sync configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use config::{ConfigError, SyncConfig, SyncConfigBuilder};
pub use error::{DeliveryFailure, EnqueueError, StoreError, SyncError};
pub use event::{Method, Payload, QueuedEvent};
pub use message::ContextMessage;
