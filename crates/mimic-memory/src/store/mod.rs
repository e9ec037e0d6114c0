//! SQLite-backed persistent store.
//!
//! Split into focused submodules:
//! - `context`: conversation context load/save
//! - `dedup`: processed-event records and pruning
//! - `replies`: ledger of replies already sent
//! - `queue`: local durable event queue
//! - `dead_letter`: permanently failed events

mod context;
mod dead_letter;
mod dedup;
mod queue;
mod replies;

pub use dead_letter::DeadLetter;
pub use queue::{QueuePolicy, QueueStats, QueueStatus, QueuedEvent};

use chrono::{DateTime, SecondsFormat, Utc};
use mimic_core::{
    config::{shellexpand, MemoryConfig},
    error::MimicError,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

/// Persistent store backed by SQLite.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new store, running migrations on first use.
    pub async fn new(config: &MemoryConfig) -> Result<Self, MimicError> {
        let db_path = shellexpand(&config.db_path);

        // Ensure parent directory exists.
        if let Some(parent) = std::path::Path::new(&db_path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MimicError::Store(format!("failed to create data dir: {e}")))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
            .map_err(|e| MimicError::Store(format!("invalid db path: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| MimicError::Store(format!("failed to connect to sqlite: {e}")))?;

        Self::run_migrations(&pool).await?;

        info!("Store initialized at {db_path}");

        Ok(Self { pool })
    }

    /// Private in-memory database, used by tests and dry runs.
    pub async fn in_memory() -> Result<Self, MimicError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| MimicError::Store(format!("invalid db path: {e}")))?
            .create_if_missing(true);
        // One connection: every new in-memory connection is a fresh database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(|e| MimicError::Store(format!("failed to open in-memory sqlite: {e}")))?;

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get the database file size in bytes.
    pub async fn db_size(&self) -> Result<u64, MimicError> {
        let (page_count,): (i64,) = sqlx::query_as("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MimicError::Store(format!("pragma failed: {e}")))?;

        let (page_size,): (i64,) = sqlx::query_as("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MimicError::Store(format!("pragma failed: {e}")))?;

        Ok((page_count * page_size) as u64)
    }

    /// Run SQL migrations, tracking which have already been applied.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), MimicError> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .execute(pool)
        .await
        .map_err(|e| MimicError::Store(format!("failed to create migrations table: {e}")))?;

        let migrations: &[(&str, &str)] = &[
            ("001_init", include_str!("../../migrations/001_init.sql")),
            (
                "002_audit_log",
                include_str!("../../migrations/002_audit_log.sql"),
            ),
            (
                "003_event_queue",
                include_str!("../../migrations/003_event_queue.sql"),
            ),
            (
                "004_dead_letters",
                include_str!("../../migrations/004_dead_letters.sql"),
            ),
        ];

        for (name, sql) in migrations {
            let applied: Option<(String,)> =
                sqlx::query_as("SELECT name FROM _migrations WHERE name = ?")
                    .bind(name)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        MimicError::Store(format!("failed to check migration {name}: {e}"))
                    })?;

            if applied.is_some() {
                continue;
            }

            sqlx::raw_sql(sql)
                .execute(pool)
                .await
                .map_err(|e| MimicError::Store(format!("migration {name} failed: {e}")))?;

            sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
                .bind(name)
                .execute(pool)
                .await
                .map_err(|e| {
                    MimicError::Store(format!("failed to record migration {name}: {e}"))
                })?;

            info!("applied migration {name}");
        }
        Ok(())
    }
}

/// Fixed-width UTC timestamp; stored timestamps compare correctly as text.
pub(crate) fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp written by [`ts`].
pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, MimicError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MimicError::Store(format!("bad timestamp {raw:?}: {e}")))
}
