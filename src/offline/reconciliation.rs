//! # Queue Reconciliation
//!
//! Drains the durable queue against the remote API. One pass reads every
//! pending event, makes one delivery attempt per event and settles each record
//! according to the server's answer.
//!
//! ## Outcomes
//!
//! | Server answer | Outcome | Record |
//! |---|---|---|
//! | 2xx | `Delivered` | deleted |
//! | 409 | `AlreadyApplied` | deleted |
//! | anything else, or no answer | `Failed` | `attempts += 1`, `last_error` set |
//!
//! A 409 means the server already applied this idempotency key, typically
//! because another context or an earlier lost response delivered it.
//!
//! Rows that no longer decode are never sent. They are moved to the
//! dead-letter table and counted as `corrupt`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use campo_sync::offline::reconciliation::{PassOutcome, Reconciler};
//!
//! # async fn example(reconciler: Reconciler) -> Result<(), campo_sync::shared::StoreError> {
//! match reconciler.reconcile_once().await? {
//!     PassOutcome::Completed(report) => println!("{} delivered", report.delivered),
//!     PassOutcome::Skipped => println!("a pass is already running"),
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::local_db::LocalDatabase;
use crate::offline::client::{ApiClient, DeliveryResponse};
use crate::shared::error::{DeliveryFailure, StoreError};
use crate::shared::event::QueuedEvent;

/// HTTP status the server uses for an already-applied idempotency key
pub const ALREADY_APPLIED_STATUS: u16 = 409;

/// Classification of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The server accepted the write
    Delivered {
        /// 2xx status returned
        status_code: u16,
    },
    /// The server had already applied this idempotency key
    AlreadyApplied,
    /// Nothing conclusive happened; retry on a later pass
    Failed(DeliveryFailure),
}

impl DeliveryOutcome {
    /// Map the result of one attempt onto an outcome
    pub fn classify(result: Result<DeliveryResponse, DeliveryFailure>) -> Self {
        match result {
            Ok(response) => match response.status_code {
                200..=299 => Self::Delivered {
                    status_code: response.status_code,
                },
                ALREADY_APPLIED_STATUS => Self::AlreadyApplied,
                status_code => Self::Failed(DeliveryFailure::http(status_code, response.body)),
            },
            Err(failure) => Self::Failed(failure),
        }
    }

    /// True when the record should leave the queue
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// Counters for one completed pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Events read from the store
    pub attempted: usize,
    /// Events confirmed with a 2xx
    pub delivered: usize,
    /// Events confirmed with a 409
    pub already_applied: usize,
    /// Events left in the queue after a failed attempt
    pub failed: usize,
    /// Events moved to the dead-letter table
    pub dead_lettered: usize,
    /// Undecodable rows quarantined into the dead-letter table
    pub corrupt: usize,
}

impl PassReport {
    /// Events that left the queue as confirmed
    pub fn synced(&self) -> usize {
        self.delivered + self.already_applied
    }

    /// True when at least one attempt failed, including evicted and corrupt ones
    pub fn had_failures(&self) -> bool {
        self.failed + self.dead_lettered + self.corrupt > 0
    }
}

/// Result of asking for a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// The pass ran to the end
    Completed(PassReport),
    /// Another pass was already in flight in this context
    Skipped,
}

impl PassOutcome {
    pub fn report(&self) -> Option<&PassReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Skipped => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}

/// Drains the queue for one execution context.
///
/// Each context builds its own `Reconciler` over its own store handle. Within a
/// context the reconciler allows one pass at a time; passes in different
/// contexts may overlap and rely on server-side idempotency.
#[derive(Debug)]
pub struct Reconciler {
    db: LocalDatabase,
    client: ApiClient,
    max_attempts: Option<u32>,
    context: &'static str,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when a pass ends, including on early return.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Reconciler {
    /// Create a reconciler that retries forever
    pub fn new(db: LocalDatabase, client: ApiClient) -> Self {
        Self {
            db,
            client,
            max_attempts: None,
            context: "foreground",
            in_flight: AtomicBool::new(false),
        }
    }

    /// Dead-letter events once they reach `max` failed attempts
    pub fn with_max_attempts(mut self, max: Option<u32>) -> Self {
        self.max_attempts = max;
        self
    }

    /// Label used in logs to tell contexts apart
    pub fn with_context(mut self, context: &'static str) -> Self {
        self.context = context;
        self
    }

    pub fn database(&self) -> &LocalDatabase {
        &self.db
    }

    pub fn context(&self) -> &'static str {
        self.context
    }

    /// True while a pass is running in this context
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one reconciliation pass.
    ///
    /// Returns `Skipped` without touching the store when a pass is already in
    /// flight. Per-event delivery failures are recorded and absorbed; only a
    /// store failure ends the pass early.
    pub async fn reconcile_once(&self) -> Result<PassOutcome, StoreError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(context = self.context, "reconciliation already in flight, skipping");
            return Ok(PassOutcome::Skipped);
        }
        let _guard = PassGuard(&self.in_flight);

        let scan = self.db.scan_pending().await?;
        let mut report = PassReport {
            attempted: scan.records.len(),
            ..PassReport::default()
        };

        for bad in &scan.corrupt {
            if self.db.quarantine(&bad.id, &bad.reason, Utc::now()).await? {
                report.corrupt += 1;
                warn!(context = self.context, event_id = %bad.id, error = %bad.reason, "corrupt record quarantined");
            }
        }

        let events = scan.records;
        if events.is_empty() {
            debug!(context = self.context, "queue empty");
            return Ok(PassOutcome::Completed(report));
        }

        info!(context = self.context, pending = events.len(), "starting reconciliation pass");

        for event in &events {
            self.settle(event, &mut report).await?;
        }

        info!(
            context = self.context,
            delivered = report.delivered,
            already_applied = report.already_applied,
            failed = report.failed,
            dead_lettered = report.dead_lettered,
            corrupt = report.corrupt,
            "reconciliation pass finished"
        );

        Ok(PassOutcome::Completed(report))
    }

    /// Deliver one event and write its outcome back to the store
    async fn settle(&self, event: &QueuedEvent, report: &mut PassReport) -> Result<(), StoreError> {
        let outcome = DeliveryOutcome::classify(self.client.send(event).await);

        match outcome {
            DeliveryOutcome::Delivered { status_code } => {
                self.db.delete(&event.id).await?;
                report.delivered += 1;
                debug!(event_id = %event.id, status = status_code, "event delivered");
            }
            DeliveryOutcome::AlreadyApplied => {
                self.db.delete(&event.id).await?;
                report.already_applied += 1;
                debug!(event_id = %event.id, "event already applied upstream");
            }
            DeliveryOutcome::Failed(failure) => {
                let error = failure.to_string();
                let attempts = self.db.record_failure(&event.id, &error, Utc::now()).await?;

                let Some(attempts) = attempts else {
                    // Settled by another context while our attempt was in flight.
                    debug!(event_id = %event.id, "event vanished before failure was recorded");
                    return Ok(());
                };

                warn!(
                    context = self.context,
                    event_id = %event.id,
                    attempts,
                    error = %error,
                    "delivery failed, will retry"
                );

                match self.max_attempts {
                    Some(max) if attempts >= max => {
                        self.db.move_to_dead_letter(&event.id, Utc::now()).await?;
                        report.dead_lettered += 1;
                        warn!(event_id = %event.id, attempts, "attempt cap reached, moved to dead letters");
                    }
                    _ => report.failed += 1,
                }
            }
        }

        Ok(())
    }
}
