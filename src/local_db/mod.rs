//! # Local Database Module
//!
//! Durable SQLite storage for the sync queue. Every pending write intent lives
//! in the `events` table until the reconciler confirms it with the server.
//!
//! ## Architecture
//!
//! - **One handle per context**: the foreground and the background context
//!   each open their own `LocalDatabase` on the same file. Nothing is shared in
//!   memory; SQLite's WAL mode and a busy timeout arbitrate between them.
//! - **Idempotent schema**: `open` applies `schema.sql` every time, so it is
//!   safe to call repeatedly and concurrently.
//! - **Dead letters**: events evicted by the optional attempt cap are moved,
//!   never dropped.
//!
//! ## Key Components
//!
//! - `LocalDatabase`: connection pool and schema management
//! - `schema.rs`: schema version constants
//! - `events.rs`: queue table operations (`put`, `get_all`, `delete`, ...)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use campo_sync::local_db::LocalDatabase;
//!
//! # async fn example() -> Result<(), campo_sync::shared::StoreError> {
//! let db = LocalDatabase::open("/tmp/campo/queue.db").await?;
//! for event in db.get_all().await? {
//!     println!("{} {} attempts={}", event.method, event.target, event.attempts);
//! }
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod schema;

pub use events::{CorruptRecord, DeadLetter, TableScan};

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::shared::config::default_database_path;
use crate::shared::error::StoreError;

/// Result type for local database operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// How long a connection waits on a lock held by another context
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_CONNECTIONS: u32 = 4;

/// Local database connection manager
///
/// Cloning is cheap and shares the pool; a separate context should call
/// [`LocalDatabase::open`] itself instead.
#[derive(Debug, Clone)]
pub struct LocalDatabase {
    pool: SqlitePool,
    path: PathBuf,
}

impl LocalDatabase {
    /// Open or create the queue database at `path`
    ///
    /// Creates the file and its parent directory if needed and initializes the
    /// schema. Uses WAL mode so a second context can read while one writes.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Ensure directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::unavailable(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .pragma("temp_store", "MEMORY");

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::unavailable(format!("cannot open {}: {}", path.display(), e)))?;

        let db = Self { pool, path };
        db.init_schema().await?;

        debug!(path = %db.path.display(), "queue database ready");
        Ok(db)
    }

    /// Open the database at the platform default location
    pub async fn open_default() -> Result<Self> {
        Self::open(default_database_path()).await
    }

    /// Initialize database schema
    ///
    /// Creates all necessary tables and records any pending migrations.
    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(schema::SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::schema(e.to_string()))?;

        self.run_migrations().await
    }

    /// Record schema versions not yet present in `schema_migrations`.
    ///
    /// Two contexts may race here; `INSERT OR IGNORE` makes the loser a no-op.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await?;

        for version in schema::get_pending_migrations(current_version) {
            sqlx::query("INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(chrono::Utc::now().to_rfc3339())
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::schema(e.to_string()))?;

            info!(version, "applied queue schema migration");
        }

        Ok(())
    }

    /// Highest applied schema version, 0 for a fresh file
    pub async fn schema_version(&self) -> Result<i64> {
        let version: (i64,) = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::schema(e.to_string()))?;
        Ok(version.0)
    }

    /// Get connection pool reference
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Get database statistics
    ///
    /// Returns queue counters for status views and debugging.
    pub async fn get_stats(&self) -> Result<DatabaseStats> {
        let (pending_events, failing_events, max_attempts): (i64, i64, Option<i64>) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN attempts > 0 THEN 1 ELSE 0 END), 0), MAX(attempts)
             FROM events",
        )
        .fetch_one(&self.pool)
        .await?;

        let dead_letters: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dead_letters")
            .fetch_one(&self.pool)
            .await?;

        Ok(DatabaseStats {
            pending_events: pending_events as u64,
            failing_events: failing_events as u64,
            dead_letters: dead_letters.0 as u64,
            max_attempts: max_attempts.unwrap_or(0) as u32,
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Events waiting for delivery
    pub pending_events: u64,
    /// Pending events with at least one failed attempt
    pub failing_events: u64,
    /// Events moved out of the queue by the attempt cap
    pub dead_letters: u64,
    /// Highest attempt count among pending events
    pub max_attempts: u32,
}
