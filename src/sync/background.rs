//! # Background Sync Context
//!
//! A second execution context that drains the same queue independently of the
//! foreground. It owns its own store handle, HTTP client and reconciler, and
//! hears from the foreground only through [`ContextMessage`]s.
//!
//! ## Features
//!
//! - **Message trigger**: `PROCESS_QUEUE` runs a pass
//! - **Sync registration**: `REGISTER_SYNC` runs now if online, otherwise on
//!   the next connectivity restore
//! - **Connectivity**: every restore edge runs a pass, whatever the
//!   foreground is doing
//! - **Fire-and-forget posting**: a missing or busy background is not an error
//!
//! ## Usage
//!
//! ```rust,no_run
//! use campo_sync::shared::SyncConfig;
//! use campo_sync::sync::background::BackgroundSync;
//! use campo_sync::sync::network_monitor::NetworkMonitor;
//!
//! # async fn example() -> Result<(), campo_sync::shared::SyncError> {
//! let config = SyncConfig::from_env()?;
//! let background = BackgroundSync::spawn(&config, NetworkMonitor::default()).await?;
//!
//! background.messenger().process_queue();
//! background.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Two contexts may reconcile the same event at the same time. Nothing
//! prevents that; the server's idempotency handling makes the second delivery
//! a 409, which settles the record like a success.

use std::collections::BTreeSet;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::local_db::LocalDatabase;
use crate::offline::client::ApiClient;
use crate::offline::reconciliation::{PassOutcome, Reconciler};
use crate::shared::config::SyncConfig;
use crate::shared::error::{StoreError, SyncError};
use crate::shared::message::ContextMessage;
use crate::sync::network_monitor::NetworkMonitor;

const MAILBOX_CAPACITY: usize = 32;
const NOTICE_CAPACITY: usize = 64;

/// Why the background ran a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassTrigger {
    Message,
    SyncRegistration,
    ConnectivityRestored,
}

/// Published after every background pass
#[derive(Debug, Clone)]
pub struct PassNotice {
    pub trigger: PassTrigger,
    pub outcome: Result<PassOutcome, StoreError>,
}

/// Sending side of a background context's mailbox
#[derive(Debug, Clone)]
pub struct ContextMessenger {
    tx: mpsc::Sender<ContextMessage>,
}

impl ContextMessenger {
    /// Post without waiting. Returns `false` if the message was not accepted
    /// because the context is gone or its mailbox is full.
    pub fn post(&self, message: ContextMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                debug!(?message, "background mailbox full, dropping message");
                false
            }
            Err(TrySendError::Closed(message)) => {
                debug!(?message, "background context gone, dropping message");
                false
            }
        }
    }

    pub fn process_queue(&self) -> bool {
        self.post(ContextMessage::ProcessQueue)
    }

    pub fn register_sync(&self, tag: impl Into<String>) -> bool {
        self.post(ContextMessage::RegisterSync { tag: tag.into() })
    }

    /// Post a message received as JSON text
    pub fn post_json(&self, raw: &str) -> Result<bool, serde_json::Error> {
        Ok(self.post(ContextMessage::from_json(raw)?))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Owner's handle on a running background context
#[derive(Debug)]
pub struct BackgroundHandle {
    messenger: ContextMessenger,
    notices: broadcast::Sender<PassNotice>,
    task: JoinHandle<()>,
}

impl BackgroundHandle {
    pub fn messenger(&self) -> ContextMessenger {
        self.messenger.clone()
    }

    pub fn post_message(&self, message: ContextMessage) -> bool {
        self.messenger.post(message)
    }

    /// Receive a notice after each background pass
    pub fn subscribe(&self) -> broadcast::Receiver<PassNotice> {
        self.notices.subscribe()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the context to stop and wait until it has.
    pub async fn shutdown(self) {
        // `send` waits for room; `post` could drop the shutdown on a full mailbox.
        if self.messenger.tx.send(ContextMessage::Shutdown).await.is_err() {
            debug!("background context already stopped");
        }
        if let Err(e) = self.task.await {
            error!("background context ended abnormally: {}", e);
        }
    }
}

/// Entry point for the background context
pub struct BackgroundSync;

impl BackgroundSync {
    /// Open a fresh store handle on the configured file and start the context.
    pub async fn spawn(config: &SyncConfig, monitor: NetworkMonitor) -> Result<BackgroundHandle, SyncError> {
        let db = LocalDatabase::open(&config.database_path).await?;
        let client = ApiClient::new(config)?;
        let reconciler = Reconciler::new(db, client)
            .with_max_attempts(config.max_attempts)
            .with_context("background");

        let (tx, mailbox) = mpsc::channel(MAILBOX_CAPACITY);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let worker = BackgroundWorker {
            reconciler,
            monitor,
            pause_when_offline: config.pause_when_offline,
            mailbox,
            notices: notices.clone(),
            deferred: BTreeSet::new(),
        };
        let task = tokio::spawn(worker.run());

        Ok(BackgroundHandle {
            messenger: ContextMessenger { tx },
            notices,
            task,
        })
    }
}

struct BackgroundWorker {
    reconciler: Reconciler,
    monitor: NetworkMonitor,
    pause_when_offline: bool,
    mailbox: mpsc::Receiver<ContextMessage>,
    notices: broadcast::Sender<PassNotice>,
    /// Registrations and triggers waiting for connectivity
    deferred: BTreeSet<String>,
}

impl BackgroundWorker {
    async fn run(mut self) {
        let mut listener = self.monitor.subscribe();
        let mut listening = true;
        info!("background sync context started");

        loop {
            tokio::select! {
                message = self.mailbox.recv() => match message {
                    Some(ContextMessage::ProcessQueue) => {
                        if self.pause_when_offline && !self.monitor.is_online() {
                            debug!("offline, deferring queue processing");
                            self.deferred.insert("process-queue".to_string());
                        } else {
                            self.run_pass(PassTrigger::Message).await;
                        }
                    }
                    Some(ContextMessage::RegisterSync { tag }) => {
                        if self.monitor.is_online() {
                            debug!(%tag, "sync registered while online");
                            self.run_pass(PassTrigger::SyncRegistration).await;
                        } else {
                            debug!(%tag, "sync registered, waiting for connectivity");
                            self.deferred.insert(tag);
                        }
                    }
                    Some(ContextMessage::Shutdown) | None => break,
                },
                restored = listener.restored(), if listening => match restored {
                    Some(()) => {
                        let fired = std::mem::take(&mut self.deferred);
                        debug!(deferred = ?fired, "connectivity restored");
                        self.run_pass(PassTrigger::ConnectivityRestored).await;
                    }
                    None => listening = false,
                },
            }
        }

        self.reconciler.database().close().await;
        info!("background sync context stopped");
    }

    async fn run_pass(&self, trigger: PassTrigger) {
        let outcome = self.reconciler.reconcile_once().await;

        match &outcome {
            Ok(PassOutcome::Completed(report)) => {
                debug!(?trigger, synced = report.synced(), failed = report.failed, "background pass done")
            }
            Ok(PassOutcome::Skipped) => debug!(?trigger, "background pass skipped"),
            Err(e) => error!(?trigger, error = %e, "background pass aborted"),
        }

        // Nobody listening is fine.
        let _ = self.notices.send(PassNotice { trigger, outcome });
    }
}
