//! # Queue Table Operations
//!
//! CRUD over the `events` table plus the dead-letter table.
//!
//! ## Features
//!
//! - **Insert-only path**: `insert` never touches an existing record
//! - **Upsert**: `put` inserts or replaces a record atomically by `id`
//! - **Snapshot reads**: `get_all` returns every pending record
//! - **Corruption reporting**: `scan_pending` and `scan_dead_letters` name the
//!   rows that no longer decode; `quarantine` moves a bad row aside
//! - **Idempotent delete**: deleting a missing id is not an error
//! - **Failure bookkeeping**: `record_failure` bumps `attempts` in SQL so two
//!   contexts never lose an increment or resurrect a delivered record
//! - **Dead letters**: `move_to_dead_letter` evicts in one transaction
//!
//! ## Usage
//!
//! ```rust,no_run
//! use campo_sync::local_db::LocalDatabase;
//!
//! # async fn example(db: LocalDatabase) -> Result<(), campo_sync::shared::StoreError> {
//! for event in db.get_all().await? {
//!     // deliver...
//!     db.delete(&event.id).await?;
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::warn;

use super::{LocalDatabase, Result};
use crate::shared::error::StoreError;
use crate::shared::event::{Method, Payload, QueuedEvent};

/// An event evicted by the attempt cap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// The event as it was when evicted
    pub event: QueuedEvent,
    /// When it left the queue
    pub evicted_at: DateTime<Utc>,
}

/// A stored row that no longer decodes into an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptRecord {
    /// Primary key of the row
    pub id: String,
    /// What failed to decode
    pub reason: String,
}

/// Every row of a table, split into decoded records and corrupt ones
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableScan<T> {
    pub records: Vec<T>,
    pub corrupt: Vec<CorruptRecord>,
}

impl<T> Default for TableScan<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            corrupt: Vec::new(),
        }
    }
}

impl<T> TableScan<T> {
    fn push(&mut self, decoded: Result<T>) -> Result<()> {
        match decoded {
            Ok(record) => self.records.push(record),
            Err(StoreError::Corrupt { id, message }) => {
                warn!(event_id = %id, error = %message, "undecodable queue record");
                self.corrupt.push(CorruptRecord { id, reason: message });
            }
            Err(other) => return Err(other),
        }
        Ok(())
    }
}

impl LocalDatabase {
    /// Insert a new event.
    ///
    /// Returns `false`, leaving the stored record untouched, when the id is
    /// already queued.
    pub async fn insert(&self, event: &QueuedEvent) -> Result<bool> {
        let headers = encode_headers(&event.id, &event.headers)?;

        let result = sqlx::query(
            "INSERT INTO events
                (id, kind, target, method, headers, payload, idempotency_key,
                 enqueued_at, updated_at, attempts, last_error)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(&event.kind)
        .bind(&event.target)
        .bind(event.method.as_str())
        .bind(headers)
        .bind(event.payload.as_ref().map(Payload::as_bytes))
        .bind(&event.idempotency_key)
        .bind(event.enqueued_at.to_rfc3339())
        .bind(event.updated_at.to_rfc3339())
        .bind(i64::from(event.attempts))
        .bind(&event.last_error)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Insert or replace an event by `id`
    pub async fn put(&self, event: &QueuedEvent) -> Result<()> {
        let headers = encode_headers(&event.id, &event.headers)?;

        sqlx::query(
            "INSERT INTO events
                (id, kind, target, method, headers, payload, idempotency_key,
                 enqueued_at, updated_at, attempts, last_error)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                target = excluded.target,
                method = excluded.method,
                headers = excluded.headers,
                payload = excluded.payload,
                idempotency_key = excluded.idempotency_key,
                enqueued_at = excluded.enqueued_at,
                updated_at = excluded.updated_at,
                attempts = excluded.attempts,
                last_error = excluded.last_error",
        )
        .bind(&event.id)
        .bind(&event.kind)
        .bind(&event.target)
        .bind(event.method.as_str())
        .bind(headers)
        .bind(event.payload.as_ref().map(Payload::as_bytes))
        .bind(&event.idempotency_key)
        .bind(event.enqueued_at.to_rfc3339())
        .bind(event.updated_at.to_rfc3339())
        .bind(i64::from(event.attempts))
        .bind(&event.last_error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Every pending event.
    ///
    /// Rows come back oldest first, but callers must not rely on ordering.
    /// Rows that cannot be decoded are left out; `scan_pending` reports them.
    pub async fn get_all(&self) -> Result<Vec<QueuedEvent>> {
        Ok(self.scan_pending().await?.records)
    }

    /// Every pending row, decoded where possible
    pub async fn scan_pending(&self) -> Result<TableScan<QueuedEvent>> {
        let rows = sqlx::query(
            "SELECT id, kind, target, method, headers, payload, idempotency_key,
                    enqueued_at, updated_at, attempts, last_error
             FROM events
             ORDER BY enqueued_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scan = TableScan::default();
        for row in &rows {
            scan.push(event_from_row(row))?;
        }
        Ok(scan)
    }

    /// Fetch one event by id
    pub async fn get(&self, id: &str) -> Result<Option<QueuedEvent>> {
        let row = sqlx::query(
            "SELECT id, kind, target, method, headers, payload, idempotency_key,
                    enqueued_at, updated_at, attempts, last_error
             FROM events
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(event_from_row).transpose()
    }

    /// Remove an event. Returns `false` when no such id was stored.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM events WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of pending events
    pub async fn count(&self) -> Result<u64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 as u64)
    }

    /// Persist one failed attempt for `id`.
    ///
    /// Returns the new attempt count, or `None` when the record is gone
    /// (another context delivered it in the meantime).
    pub async fn record_failure(
        &self,
        id: &str,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<u32>> {
        let row = sqlx::query(
            "UPDATE events SET
                attempts = attempts + 1,
                last_error = ?,
                updated_at = ?
             WHERE id = ?
             RETURNING attempts",
        )
        .bind(error)
        .bind(at.to_rfc3339())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let attempts: i64 = row.try_get("attempts")?;
                Ok(Some(decode_attempts(id, attempts)?))
            }
            None => Ok(None),
        }
    }

    /// Move an event into `dead_letters` and out of the queue, atomically.
    ///
    /// Returns `false` when the event was no longer queued.
    pub async fn move_to_dead_letter(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let copied = sqlx::query(
            "INSERT OR REPLACE INTO dead_letters
                (id, kind, target, method, headers, payload, idempotency_key,
                 enqueued_at, updated_at, attempts, last_error, evicted_at)
             SELECT id, kind, target, method, headers, payload, idempotency_key,
                    enqueued_at, updated_at, attempts, last_error, ?
             FROM events
             WHERE id = ?",
        )
        .bind(at.to_rfc3339())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM events WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(copied.rows_affected() > 0)
    }

    /// Move an undecodable row into `dead_letters` as stored, atomically.
    ///
    /// `last_error` is overwritten with `reason`. Returns `false` when the row
    /// was no longer queued.
    pub async fn quarantine(&self, id: &str, reason: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let copied = sqlx::query(
            "INSERT OR REPLACE INTO dead_letters
                (id, kind, target, method, headers, payload, idempotency_key,
                 enqueued_at, updated_at, attempts, last_error, evicted_at)
             SELECT id, kind, target, method, headers, payload, idempotency_key,
                    enqueued_at, updated_at, attempts, ?, ?
             FROM events
             WHERE id = ?",
        )
        .bind(format!("corrupt record: {}", reason))
        .bind(at.to_rfc3339())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM events WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(copied.rows_affected() > 0)
    }

    /// Every dead-lettered event, most recently evicted first.
    ///
    /// Quarantined rows that still do not decode are left out.
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        Ok(self.scan_dead_letters().await?.records)
    }

    /// Every dead-letter row, decoded where possible
    pub async fn scan_dead_letters(&self) -> Result<TableScan<DeadLetter>> {
        let rows = sqlx::query(
            "SELECT id, kind, target, method, headers, payload, idempotency_key,
                    enqueued_at, updated_at, attempts, last_error, evicted_at
             FROM dead_letters
             ORDER BY evicted_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scan = TableScan::default();
        for row in &rows {
            scan.push(dead_letter_from_row(row))?;
        }
        Ok(scan)
    }
}

fn dead_letter_from_row(row: &SqliteRow) -> Result<DeadLetter> {
    let event = event_from_row(row)?;
    let evicted_at: String = row.try_get("evicted_at")?;
    let evicted_at = parse_timestamp(&event.id, "evicted_at", &evicted_at)?;
    Ok(DeadLetter { event, evicted_at })
}

fn encode_headers(id: &str, headers: &BTreeMap<String, String>) -> Result<String> {
    serde_json::to_string(headers).map_err(|e| StoreError::corrupt(id, format!("headers: {}", e)))
}

fn event_from_row(row: &SqliteRow) -> Result<QueuedEvent> {
    let id: String = row.try_get("id")?;

    let method: String = row.try_get("method")?;
    let method = method
        .parse::<Method>()
        .map_err(|e| StoreError::corrupt(&id, e.to_string()))?;

    let headers: String = row.try_get("headers")?;
    let headers: BTreeMap<String, String> = serde_json::from_str(&headers)
        .map_err(|e| StoreError::corrupt(&id, format!("headers: {}", e)))?;

    let payload: Option<Vec<u8>> = row.try_get("payload")?;

    let enqueued_at: String = row.try_get("enqueued_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let attempts: i64 = row.try_get("attempts")?;

    Ok(QueuedEvent {
        kind: row.try_get("kind")?,
        target: row.try_get("target")?,
        method,
        headers,
        payload: payload.map(Payload::from_bytes),
        idempotency_key: row.try_get("idempotency_key")?,
        enqueued_at: parse_timestamp(&id, "enqueued_at", &enqueued_at)?,
        updated_at: parse_timestamp(&id, "updated_at", &updated_at)?,
        attempts: decode_attempts(&id, attempts)?,
        last_error: row.try_get("last_error")?,
        id,
    })
}

fn parse_timestamp(id: &str, column: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(id, format!("{} '{}': {}", column, raw, e)))
}

fn decode_attempts(id: &str, raw: i64) -> Result<u32> {
    u32::try_from(raw).map_err(|_| StoreError::corrupt(id, format!("attempts out of range: {}", raw)))
}
