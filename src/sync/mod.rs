//! # Sync Service
//!
//! Foreground coordinator: wires the store, the enqueue path, the reconciler,
//! the backoff scheduler and the network monitor together, and keeps an
//! optional background context informed.
//!
//! ## Architecture
//!
//! - **Scheduler**: backoff-driven reconciliation loop for this context
//! - **Network Monitor**: connectivity state and restore edges
//! - **Background Context**: separate reconciler reached by messages
//! - **Sync State**: status snapshot for UIs
//!
//! ## Usage
//!
//! ```rust,no_run
//! use campo_sync::offline::EnqueueRequest;
//! use campo_sync::shared::{Method, SyncConfig};
//! use campo_sync::sync::{network_monitor::NetworkMonitor, SyncService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::from_env()?;
//! let mut service = SyncService::new(config, NetworkMonitor::default()).await?;
//! service.start().await;
//!
//! let request = EnqueueRequest::new("CREATE_DENUNCIA", "/denuncias", Method::Post, "denuncia-7f3a")
//!     .with_json(&serde_json::json!({ "titulo": "Queimada" }))?;
//! service.enqueue(request).await?;
//!
//! println!("{:?}", service.status().await);
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod background;
pub mod network_monitor;
pub mod scheduler;
pub mod sync_state;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::local_db::LocalDatabase;
use crate::offline::client::ApiClient;
use crate::offline::queue::{EnqueueRequest, OperationQueue};
use crate::offline::reconciliation::{PassOutcome, Reconciler};
use crate::shared::config::SyncConfig;
use crate::shared::error::{EnqueueError, StoreError, SyncError};
use crate::shared::event::QueuedEvent;

use background::ContextMessenger;
use network_monitor::NetworkMonitor;
use scheduler::SyncScheduler;
use sync_state::SyncStatus;

pub use background::{BackgroundHandle, BackgroundSync, PassNotice, PassTrigger};
pub use network_monitor::{ConnectivityEvent, NetworkStatus};
pub use scheduler::SyncTrigger;
pub use sync_state::SchedulerState;

/// Main sync service coordinator for the foreground context
#[derive(Debug)]
pub struct SyncService {
    /// Service configuration
    config: SyncConfig,
    /// This context's store handle
    db: LocalDatabase,
    /// Enqueue path, wired to wake the scheduler
    queue: OperationQueue,
    /// This context's reconciler
    reconciler: Arc<Reconciler>,
    /// Backoff-driven loop
    scheduler: SyncScheduler,
    /// Connectivity state
    monitor: NetworkMonitor,
    /// Mailbox of the background context, if one is running
    background: Option<ContextMessenger>,
    /// Connectivity watcher task
    watcher: Option<(CancellationToken, JoinHandle<()>)>,
}

impl SyncService {
    /// Open this context's store and build its reconciler and scheduler.
    pub async fn new(config: SyncConfig, monitor: NetworkMonitor) -> Result<Self, SyncError> {
        config.validate()?;

        let db = LocalDatabase::open(&config.database_path).await?;
        let client = ApiClient::new(&config)?;
        let reconciler = Arc::new(
            Reconciler::new(db.clone(), client)
                .with_max_attempts(config.max_attempts)
                .with_context("foreground"),
        );
        let scheduler = SyncScheduler::new(
            Arc::clone(&reconciler),
            monitor.clone(),
            config.backoff,
            config.pause_when_offline,
        );
        let queue = OperationQueue::new(db.clone()).with_trigger(scheduler.trigger());

        Ok(Self {
            config,
            db,
            queue,
            reconciler,
            scheduler,
            monitor,
            background: None,
            watcher: None,
        })
    }

    /// Keep a background context informed of new work
    pub fn attach_background(&mut self, messenger: ContextMessenger) {
        self.background = Some(messenger);
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn monitor(&self) -> &NetworkMonitor {
        &self.monitor
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    /// Start the reconciliation loop and the connectivity watcher.
    ///
    /// Returns `false` when already started.
    pub async fn start(&mut self) -> bool {
        if !self.scheduler.start_loop().await {
            return false;
        }

        self.notify_background();

        if self.watcher.is_none() {
            let cancel = CancellationToken::new();
            let task = tokio::spawn(watch_connectivity(
                self.monitor.clone(),
                self.scheduler.trigger(),
                self.background.clone(),
                cancel.clone(),
            ));
            self.watcher = Some((cancel, task));
        }

        info!("sync service started");
        true
    }

    /// Stop the loop and the connectivity watcher. Queued events stay on disk.
    pub async fn shutdown(&mut self) {
        self.scheduler.stop().await;

        if let Some((cancel, task)) = self.watcher.take() {
            cancel.cancel();
            if let Err(e) = task.await {
                warn!("connectivity watcher ended abnormally: {}", e);
            }
        }

        info!("sync service stopped");
    }

    /// Durably queue a write intent, then wake both contexts.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<QueuedEvent, EnqueueError> {
        let event = self.queue.enqueue(request).await?;
        self.notify_background();
        Ok(event)
    }

    /// Run one pass right now, outside the timer.
    ///
    /// Does not change the scheduler's backoff. Returns `Skipped` if the loop
    /// is mid-pass.
    pub async fn force_sync(&self) -> Result<PassOutcome, StoreError> {
        self.notify_background();
        self.reconciler.reconcile_once().await
    }

    /// Ask the background context to sync when connectivity allows
    pub fn request_background_sync(&self, tag: impl Into<String>) -> bool {
        match &self.background {
            Some(messenger) => messenger.register_sync(tag),
            None => false,
        }
    }

    /// Events still waiting for delivery
    pub async fn pending_events(&self) -> Result<Vec<QueuedEvent>, StoreError> {
        self.queue.pending().await
    }

    /// Current status, with a fresh pending count
    pub async fn status(&self) -> SyncStatus {
        let mut status = self.scheduler.status_cell().read().await.clone();
        status.network = self.monitor.status();
        match self.db.count().await {
            Ok(pending) => status.pending_events = pending,
            Err(e) => debug!("pending count unavailable: {}", e),
        }
        status
    }

    fn notify_background(&self) {
        if let Some(messenger) = &self.background {
            messenger.process_queue();
        }
    }
}

/// Wake the foreground scheduler and the background context on each restore.
async fn watch_connectivity(
    monitor: NetworkMonitor,
    trigger: SyncTrigger,
    background: Option<ContextMessenger>,
    cancel: CancellationToken,
) {
    let mut listener = monitor.subscribe();
    drop(monitor);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            restored = listener.restored() => match restored {
                Some(()) => {
                    debug!("connectivity restored, requesting pass");
                    trigger.request_pass();
                    if let Some(messenger) = &background {
                        messenger.process_queue();
                    }
                }
                None => break,
            },
        }
    }
}
