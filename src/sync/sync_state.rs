//! # Sync State Management
//!
//! Snapshot of what a sync context is doing, for status views and the daemon.
//!
//! ## Features
//!
//! - **State Tracking**: scheduler state and the next planned pass
//! - **Pass History**: counters from the last completed pass
//! - **Error Handling**: the last store failure that aborted a pass

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::offline::reconciliation::PassReport;
use crate::sync::network_monitor::NetworkStatus;

/// Lifecycle of the reconciliation loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchedulerState {
    /// No loop is running
    #[default]
    Idle,
    /// Waiting for the timer or a wake-up
    Scheduled,
    /// A pass is executing
    Running,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub scheduler: SchedulerState,
    pub network: NetworkStatus,
    /// Wait the scheduler will use after the current pass
    pub current_interval: Duration,
    pub next_pass_at: Option<DateTime<Utc>>,
    /// Completed passes since the loop first started
    pub passes: u64,
    pub last_pass_at: Option<DateTime<Utc>>,
    pub last_report: Option<PassReport>,
    /// Last store failure that aborted a pass, cleared by the next completed pass
    pub last_error: Option<String>,
    pub pending_events: u64,
}

impl SyncStatus {
    pub fn is_active(&self) -> bool {
        self.scheduler != SchedulerState::Idle
    }

    pub fn is_syncing(&self) -> bool {
        self.scheduler == SchedulerState::Running
    }

    /// Record a completed pass
    pub fn record_report(&mut self, report: PassReport, next_interval: Duration) {
        self.passes += 1;
        self.last_pass_at = Some(Utc::now());
        self.last_report = Some(report);
        self.last_error = None;
        self.current_interval = next_interval;
    }

    /// Record a pass aborted by the store
    pub fn record_error(&mut self, error: impl Into<String>, next_interval: Duration) {
        self.last_pass_at = Some(Utc::now());
        self.last_error = Some(error.into());
        self.current_interval = next_interval;
    }
}
