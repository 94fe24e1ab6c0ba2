//! campo-sync - Offline-first sync queue
//!
//! campo-sync keeps user-generated writes (field activities, complaint
//! submissions) in a durable local SQLite queue while the device is offline
//! and replays them against the remote API once it is reachable again.
//!
//! # Overview
//!
//! - Durable enqueue of pending writes that survives restarts
//! - A background reconciliation loop with exponential backoff
//! - Idempotent replay: every attempt carries the caller's `Idempotency-Key`,
//!   and a 409 answer counts as delivered
//! - Coordination between a foreground context and a background context that
//!   may race on the same queue
//!
//! Delivery is at-least-once and unordered.
//!
//! # Module Structure
//!
//! - **`shared`** - Event model, cross-context messages, configuration, errors
//! - **`local_db`** - SQLite store for queued events
//! - **`offline`** - Enqueue path, HTTP delivery client, reconciler, backoff
//! - **`sync`** - Scheduler loop, network monitor, background context and the
//!   foreground `SyncService`
//!
//! # Feature Flags
//!
//! - **`daemon`** (default) - builds the `campo-syncd` binary
//!
//! # Usage
//!
//! ```rust,no_run
//! use campo_sync::offline::EnqueueRequest;
//! use campo_sync::shared::{Method, SyncConfig};
//! use campo_sync::sync::{network_monitor::NetworkMonitor, BackgroundSync, SyncService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::from_env()?;
//! let monitor = NetworkMonitor::default();
//!
//! let background = BackgroundSync::spawn(&config, monitor.clone()).await?;
//! let mut service = SyncService::new(config, monitor).await?;
//! service.attach_background(background.messenger());
//! service.start().await;
//!
//! service
//!     .enqueue(EnqueueRequest::new("UPSERT_ATIVIDADE", "/atividades/42", Method::Put, "atividade-42-v3"))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! Each context owns its store handle, client and reconciler; the only shared
//! in-process state is the `NetworkMonitor`. Contexts talk through
//! `ContextMessage`s and the SQLite file.
//!
//! # Error Handling
//!
//! - `EnqueueError` and `StoreError` are returned to callers
//! - `DeliveryFailure`s are recorded on the event and retried, never returned

/// Shared types and data structures
pub mod shared;

/// SQLite queue storage
pub mod local_db;

/// Enqueue, delivery and reconciliation
pub mod offline;

/// Scheduling and context coordination
pub mod sync;
