//! # Retry Backoff
//!
//! Exponential backoff for the reconciliation loop. The interval describes how
//! long the scheduler waits between passes, not a per-event delay: every pass
//! retries every pending event.
//!
//! ## Features
//!
//! - **Exponential Backoff**: a pass with at least one failure doubles the wait
//! - **Ceiling**: the wait never exceeds the configured maximum
//! - **Reset**: a pass with zero failures returns to the base interval
//!
//! ## Usage
//!
//! ```rust
//! use campo_sync::offline::retry::{BackoffPolicy, BackoffState};
//! use std::time::Duration;
//!
//! let mut backoff = BackoffState::new(BackoffPolicy::default());
//! assert_eq!(backoff.record_pass(true), Duration::from_secs(60));
//! assert_eq!(backoff.record_pass(false), Duration::from_secs(30));
//! ```

use std::time::Duration;

/// Default wait between passes
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(30);

/// Default upper bound on the wait
pub const DEFAULT_BACKOFF_CEILING: Duration = Duration::from_secs(5 * 60);

/// Bounds of the backoff interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Interval after a clean pass
    pub base: Duration,
    /// Largest interval ever scheduled
    pub ceiling: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            ceiling: DEFAULT_BACKOFF_CEILING,
        }
    }
}

/// Current position of the backoff, owned by one scheduler
#[derive(Debug, Clone)]
pub struct BackoffState {
    policy: BackoffPolicy,
    current: Duration,
    consecutive_failures: u32,
}

impl BackoffState {
    /// Start at the base interval
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current: policy.base,
            consecutive_failures: 0,
        }
    }

    /// Wait before the next pass
    pub fn current_interval(&self) -> Duration {
        self.current
    }

    /// Failing passes since the last clean one
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Double the interval, capped at the ceiling
    pub fn record_failure(&mut self) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.current = self
            .current
            .checked_mul(2)
            .unwrap_or(self.policy.ceiling)
            .min(self.policy.ceiling);
        self.current
    }

    /// Return to the base interval
    pub fn reset(&mut self) -> Duration {
        self.consecutive_failures = 0;
        self.current = self.policy.base;
        self.current
    }

    /// Apply the result of one pass and return the next interval
    pub fn record_pass(&mut self, had_failures: bool) -> Duration {
        if had_failures {
            self.record_failure()
        } else {
            self.reset()
        }
    }
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}
