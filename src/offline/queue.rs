//! # Operation Queue
//!
//! The enqueue path: validates a write intent, records it durably and wakes
//! the scheduler. Returning `Ok` means the event is on disk and will be
//! delivered at least once; delivery itself happens later.
//!
//! ## Features
//!
//! - **Persistent Queue**: events survive restarts
//! - **Caller-owned idempotency**: the idempotency key is required and never
//!   derived from the payload
//! - **Immediate wake-up**: a successful enqueue nudges the scheduler
//! - **Insert-only**: an explicit id that is already queued is rejected, never
//!   overwritten
//!
//! ## Usage
//!
//! ```rust,no_run
//! use campo_sync::offline::queue::{EnqueueRequest, OperationQueue};
//! use campo_sync::shared::event::Method;
//!
//! # async fn example(queue: OperationQueue) -> Result<(), campo_sync::shared::EnqueueError> {
//! let request = EnqueueRequest::new("CREATE_DENUNCIA", "/denuncias", Method::Post, "denuncia-7f3a")
//!     .with_json(&serde_json::json!({ "titulo": "Queimada", "gravidade": 3 }))?;
//!
//! let event = queue.enqueue(request).await?;
//! println!("queued {}", event.id);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::local_db::LocalDatabase;
use crate::shared::error::{EnqueueError, StoreError};
use crate::shared::event::{Method, Payload, QueuedEvent};
use crate::sync::scheduler::SyncTrigger;

/// A write intent as supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRequest {
    /// Explicit record id; a UUID v4 is generated when absent
    pub id: Option<String>,
    /// Semantic tag
    pub kind: String,
    /// Logical path or absolute URL
    pub target: String,
    /// HTTP method used on replay
    pub method: Method,
    /// Request body
    pub payload: Option<Payload>,
    /// Caller-supplied deduplication token
    pub idempotency_key: String,
    /// Extra headers for every attempt
    pub headers: BTreeMap<String, String>,
}

impl EnqueueRequest {
    pub fn new(
        kind: impl Into<String>,
        target: impl Into<String>,
        method: Method,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            target: target.into(),
            method,
            payload: None,
            idempotency_key: idempotency_key.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Use a caller-chosen record id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Serialize `value` as the JSON body
    pub fn with_json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, EnqueueError> {
        Ok(self.with_payload(Payload::json(value)?))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Check the request before anything touches the store
    pub fn validate(&self) -> Result<(), EnqueueError> {
        if self.target.trim().is_empty() {
            return Err(EnqueueError::validation("target", "target must not be empty"));
        }
        if self.idempotency_key.trim().is_empty() {
            return Err(EnqueueError::validation(
                "idempotency_key",
                "idempotency key must be supplied by the caller",
            ));
        }
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(EnqueueError::validation("id", "explicit id must not be empty"));
            }
        }
        Ok(())
    }

    fn into_event(self) -> QueuedEvent {
        let now = Utc::now();
        QueuedEvent {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            kind: self.kind,
            target: self.target,
            method: self.method,
            headers: self.headers,
            payload: self.payload,
            idempotency_key: self.idempotency_key,
            enqueued_at: now,
            updated_at: now,
            attempts: 0,
            last_error: None,
        }
    }
}

/// Enqueue front-end over the durable store
#[derive(Debug, Clone)]
pub struct OperationQueue {
    db: LocalDatabase,
    trigger: Option<SyncTrigger>,
}

impl OperationQueue {
    /// Create a queue with nobody to wake
    pub fn new(db: LocalDatabase) -> Self {
        Self { db, trigger: None }
    }

    /// Wake this scheduler after every successful enqueue
    pub fn with_trigger(mut self, trigger: SyncTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Durably record a write intent.
    ///
    /// On `Err` nothing was written. On `Ok` the event is persisted with
    /// `attempts = 0` and the scheduler has been asked to run soon.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<QueuedEvent, EnqueueError> {
        request.validate()?;
        let event = request.into_event();

        if !self.db.insert(&event).await? {
            warn!(event_id = %event.id, "refusing to overwrite queued event");
            return Err(EnqueueError::DuplicateId { id: event.id });
        }

        info!(
            event_id = %event.id,
            kind = %event.kind,
            method = %event.method,
            target = %event.target,
            "event queued"
        );

        if let Some(trigger) = &self.trigger {
            trigger.request_pass();
        }

        Ok(event)
    }

    /// Events still waiting for delivery
    pub async fn pending(&self) -> Result<Vec<QueuedEvent>, StoreError> {
        self.db.get_all().await
    }

    /// Number of events still waiting for delivery
    pub async fn pending_count(&self) -> Result<u64, StoreError> {
        self.db.count().await
    }
}
