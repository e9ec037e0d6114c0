//! Audit log: records the outcome of every processing cycle.

use chrono::{DateTime, Utc};
use mimic_core::error::MimicError;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

/// An entry to write to the audit log.
pub struct AuditEntry {
    pub event_id: i64,
    pub chat_id: i64,
    pub sender_id: Option<i64>,
    pub trigger: Option<String>,
    pub outcome: AuditOutcome,
    pub reply_text: Option<String>,
    pub processing_ms: Option<i64>,
    pub error: Option<String>,
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    /// A reply was dispatched (or found already dispatched).
    Replied,
    /// The decision engine chose silence.
    NoReply,
    /// The generator had nothing to say.
    Empty,
    /// The event had already been processed.
    Duplicate,
    /// Transient failure; the event will be redelivered.
    Failed,
    /// Permanent failure; the event went to the dead-letter table.
    DeadLettered,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replied => "replied",
            Self::NoReply => "no_reply",
            Self::Empty => "empty",
            Self::Duplicate => "duplicate",
            Self::Failed => "failed",
            Self::DeadLettered => "dead_lettered",
        }
    }
}

/// A row read back from the audit log.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub event_id: i64,
    pub trigger: Option<String>,
    pub outcome: String,
    pub reply_text: Option<String>,
    pub created_at: String,
}

/// Audit logger backed by SQLite.
#[derive(Clone)]
pub struct AuditLogger {
    pool: SqlitePool,
}

impl AuditLogger {
    /// Create a new audit logger sharing the given pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Write an entry to the audit log.
    pub async fn log(&self, entry: &AuditEntry) -> Result<(), MimicError> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO audit_log \
             (id, event_id, chat_id, sender_id, trigger, outcome, reply_text, \
              processing_ms, error) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(entry.event_id)
        .bind(entry.chat_id)
        .bind(entry.sender_id)
        .bind(&entry.trigger)
        .bind(entry.outcome.as_str())
        .bind(&entry.reply_text)
        .bind(entry.processing_ms)
        .bind(&entry.error)
        .execute(&self.pool)
        .await
        .map_err(|e| MimicError::Store(format!("audit log write failed: {e}")))?;

        debug!(
            "audit: event {} [{}] trigger={}",
            entry.event_id,
            entry.outcome.as_str(),
            entry.trigger.as_deref().unwrap_or("-"),
        );

        Ok(())
    }

    /// Most recent entries first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<AuditRecord>, MimicError> {
        let rows: Vec<(i64, Option<String>, String, Option<String>, String)> = sqlx::query_as(
            "SELECT event_id, trigger, outcome, reply_text, created_at FROM audit_log \
             ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MimicError::Store(format!("audit log query failed: {e}")))?;

        Ok(rows
            .into_iter()
            .map(
                |(event_id, trigger, outcome, reply_text, created_at)| AuditRecord {
                    event_id,
                    trigger,
                    outcome,
                    reply_text,
                    created_at,
                },
            )
            .collect())
    }

    /// Delete entries written before `older_than`.
    pub async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64, MimicError> {
        // `created_at` comes from SQLite's `datetime('now')`.
        let cutoff = older_than.format("%Y-%m-%d %H:%M:%S").to_string();
        let result = sqlx::query("DELETE FROM audit_log WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| MimicError::Store(format!("audit log prune failed: {e}")))?;
        Ok(result.rows_affected())
    }

    /// Entry counts per outcome.
    pub async fn outcome_counts(&self) -> Result<Vec<(String, i64)>, MimicError> {
        sqlx::query_as("SELECT outcome, COUNT(*) FROM audit_log GROUP BY outcome ORDER BY outcome")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MimicError::Store(format!("audit log query failed: {e}")))
    }
}
