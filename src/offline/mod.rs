//! # Offline Queue
//!
//! Everything one execution context needs to queue writes while offline and
//! replay them once the API is reachable.
//!
//! ## Architecture
//!
//! - **Operation Queue**: validates and durably records write intents
//! - **Delivery Client**: one bounded HTTP attempt per event
//! - **Reconciliation**: drains the queue and settles each record
//! - **Retry Logic**: exponential backoff between passes
//!
//! ## Key Components
//!
//! - `queue.rs`: enqueue path
//! - `client.rs`: HTTP replay of queued events
//! - `reconciliation.rs`: reconciliation passes
//! - `retry.rs`: backoff state

pub mod client;
pub mod queue;
pub mod reconciliation;
pub mod retry;

// Re-export main types
pub use client::{ApiClient, DeliveryResponse};
pub use queue::{EnqueueRequest, OperationQueue};
pub use reconciliation::{DeliveryOutcome, PassOutcome, PassReport, Reconciler};
pub use retry::{BackoffPolicy, BackoffState};
