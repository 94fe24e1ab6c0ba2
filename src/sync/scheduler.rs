//! # Sync Scheduler
//!
//! Timer-driven reconciliation loop for one execution context.
//!
//! ## Features
//!
//! - **Immediate first pass**: starting the loop reconciles right away
//! - **Exponential Backoff**: failing passes double the wait up to a ceiling;
//!   a clean pass resets it
//! - **Wake-ups**: [`SyncTrigger::request_pass`] cuts the current wait short
//! - **Offline pause**: scheduled passes are skipped while the network
//!   monitor reports offline
//! - **Cancellation**: [`SyncScheduler::stop`] clears the timer and no pass
//!   starts afterwards
//!
//! ## States
//!
//! `Idle -> Running -> Scheduled -> Running -> ...`, back to `Idle` on stop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::offline::reconciliation::{PassOutcome, Reconciler};
use crate::offline::retry::{BackoffPolicy, BackoffState};
use crate::sync::network_monitor::NetworkMonitor;
use crate::sync::sync_state::{SchedulerState, SyncStatus};

/// Cloneable handle that asks a scheduler to run soon.
///
/// A request made while a pass is running is remembered and causes one more
/// pass right after it.
#[derive(Debug, Clone, Default)]
pub struct SyncTrigger {
    notify: Arc<Notify>,
}

impl SyncTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a pass as soon as possible; never blocks
    pub fn request_pass(&self) {
        self.notify.notify_one();
    }

    /// Resolve once a pass has been requested
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[derive(Debug)]
struct SchedulerShared {
    reconciler: Arc<Reconciler>,
    monitor: NetworkMonitor,
    pause_when_offline: bool,
    trigger: SyncTrigger,
    backoff: RwLock<BackoffState>,
    status: Arc<RwLock<SyncStatus>>,
    passes: watch::Sender<u64>,
}

#[derive(Debug)]
struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Reconciliation loop with backoff
#[derive(Debug)]
pub struct SyncScheduler {
    shared: Arc<SchedulerShared>,
    running: Mutex<Option<LoopHandle>>,
}

impl SyncScheduler {
    pub fn new(
        reconciler: Arc<Reconciler>,
        monitor: NetworkMonitor,
        policy: BackoffPolicy,
        pause_when_offline: bool,
    ) -> Self {
        let status = SyncStatus {
            current_interval: policy.base,
            network: monitor.status(),
            ..SyncStatus::default()
        };
        let (passes, _) = watch::channel(0);

        Self {
            shared: Arc::new(SchedulerShared {
                reconciler,
                monitor,
                pause_when_offline,
                trigger: SyncTrigger::new(),
                backoff: RwLock::new(BackoffState::new(policy)),
                status: Arc::new(RwLock::new(status)),
                passes,
            }),
            running: Mutex::new(None),
        }
    }

    /// Handle for waking this scheduler
    pub fn trigger(&self) -> SyncTrigger {
        self.shared.trigger.clone()
    }

    /// Shared status cell, updated after every pass
    pub fn status_cell(&self) -> Arc<RwLock<SyncStatus>> {
        Arc::clone(&self.shared.status)
    }

    pub async fn state(&self) -> SchedulerState {
        self.shared.status.read().await.scheduler
    }

    pub async fn current_interval(&self) -> Duration {
        self.shared.backoff.read().await.current_interval()
    }

    /// Counter of completed passes, for callers that want to await progress
    pub fn subscribe_passes(&self) -> watch::Receiver<u64> {
        self.shared.passes.subscribe()
    }

    /// Start the loop. Returns `false` when it is already running.
    ///
    /// The first pass runs immediately.
    pub async fn start_loop(&self) -> bool {
        let mut running = self.running.lock().await;
        if let Some(handle) = running.as_ref() {
            if !handle.task.is_finished() {
                debug!("sync loop already running");
                return false;
            }
        }

        self.shared.status.write().await.scheduler = SchedulerState::Running;

        let cancel = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(run_loop(shared, cancel.clone()));
        *running = Some(LoopHandle { cancel, task });

        info!(context = self.shared.reconciler.context(), "sync loop started");
        true
    }

    /// Stop the loop and wait for it to exit.
    ///
    /// A pass in flight finishes first; no pass starts afterwards.
    pub async fn stop(&self) {
        let handle = self.running.lock().await.take();

        if let Some(LoopHandle { cancel, task }) = handle {
            cancel.cancel();
            if let Err(e) = task.await {
                warn!("sync loop ended abnormally: {}", e);
            }
            info!(context = self.shared.reconciler.context(), "sync loop stopped");
        }

        let mut status = self.shared.status.write().await;
        status.scheduler = SchedulerState::Idle;
        status.next_pass_at = None;
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|handle| !handle.task.is_finished())
            .unwrap_or(false)
    }
}

async fn run_loop(shared: Arc<SchedulerShared>, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        shared.status.write().await.scheduler = SchedulerState::Running;
        run_pass(&shared).await;

        let wait = shared.backoff.read().await.current_interval();
        {
            let mut status = shared.status.write().await;
            status.scheduler = SchedulerState::Scheduled;
            status.network = shared.monitor.status();
            status.next_pass_at = chrono::Duration::from_std(wait).ok().map(|wait| Utc::now() + wait);
        }
        debug!(wait_ms = wait.as_millis() as u64, "next pass scheduled");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = shared.trigger.notified() => debug!("pass requested"),
            _ = tokio::time::sleep(wait) => {}
        }
    }

    let mut status = shared.status.write().await;
    status.scheduler = SchedulerState::Idle;
    status.next_pass_at = None;
}

async fn run_pass(shared: &SchedulerShared) {
    if shared.pause_when_offline && !shared.monitor.is_online() {
        debug!("offline, skipping scheduled pass");
        return;
    }

    match shared.reconciler.reconcile_once().await {
        Ok(PassOutcome::Completed(report)) => {
            let next = shared.backoff.write().await.record_pass(report.had_failures());
            if let Ok(pending) = shared.reconciler.database().count().await {
                shared.status.write().await.pending_events = pending;
            }
            shared.status.write().await.record_report(report, next);
            shared.passes.send_modify(|n| *n += 1);
        }
        Ok(PassOutcome::Skipped) => {
            debug!("pass already in flight in this context");
        }
        Err(e) => {
            let next = shared.backoff.write().await.record_failure();
            error!(error = %e, next_ms = next.as_millis() as u64, "reconciliation pass aborted");
            shared.status.write().await.record_error(e.to_string(), next);
            shared.passes.send_modify(|n| *n += 1);
        }
    }
}
