//! Local durable event queue.
//!
//! Rows move `pending → processing → done`, or back to `pending` with a
//! backoff after a failed attempt, or to `failed` once attempts run out. A
//! `processing` row whose lease expired is claimable again, so a worker killed
//! mid-cycle never strands an event.

use super::{ts, Store};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mimic_core::{
    config::QueueConfig, error::MimicError, event::InboundEvent, traits::EventQueue,
};
use tracing::debug;

/// Lease and retry settings for the local queue.
#[derive(Debug, Clone, Copy)]
pub struct QueuePolicy {
    pub lease_secs: i64,
    pub max_attempts: i64,
    pub backoff_base_secs: i64,
    pub backoff_max_secs: i64,
}

impl From<&QueueConfig> for QueuePolicy {
    fn from(config: &QueueConfig) -> Self {
        Self {
            lease_secs: config.lease_secs as i64,
            max_attempts: i64::from(config.max_attempts),
            backoff_base_secs: config.backoff_base_secs as i64,
            backoff_max_secs: config.backoff_max_secs as i64,
        }
    }
}

impl QueuePolicy {
    /// Linear backoff, capped.
    pub fn backoff_secs(&self, attempts: i64) -> i64 {
        attempts
            .max(1)
            .saturating_mul(self.backoff_base_secs)
            .min(self.backoff_max_secs)
    }
}

/// Where a row ended up after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    /// Will be retried at `available_at`.
    Pending,
    /// Out of attempts.
    Failed,
}

/// A claimed queue row.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub id: i64,
    pub event_id: i64,
    pub payload_json: String,
    /// Attempts including the current one.
    pub attempts: i64,
}

impl QueuedEvent {
    /// Decode the payload. A payload that does not decode never will.
    pub fn event(&self) -> Result<InboundEvent, MimicError> {
        serde_json::from_str(&self.payload_json).map_err(|e| {
            MimicError::Permanent(format!("undecodable queued event {}: {e}", self.event_id))
        })
    }
}

/// Row counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub done: i64,
    pub failed: i64,
}

impl Store {
    /// Append an event. Returns `false` when the event id is already queued.
    pub async fn enqueue_event(&self, event: &InboundEvent) -> Result<bool, MimicError> {
        let payload = serde_json::to_string(event)?;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO event_queue (event_id, payload_json, status, attempts, created_at) \
             VALUES (?, ?, 'pending', 0, ?)",
        )
        .bind(event.event_id)
        .bind(&payload)
        .bind(ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| MimicError::Queue(format!("enqueue failed: {e}")))?;

        let inserted = result.rows_affected() > 0;
        if !inserted {
            debug!("queue: event {} already queued", event.event_id);
        }
        Ok(inserted)
    }

    /// Claim the oldest deliverable row and start its lease.
    pub async fn claim_next_event(
        &self,
        policy: &QueuePolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<QueuedEvent>, MimicError> {
        let lease_cutoff = now - Duration::seconds(policy.lease_secs);
        let row: Option<(i64, i64, String, i64)> = sqlx::query_as(
            "UPDATE event_queue \
             SET status = 'processing', locked_at = ?, attempts = attempts + 1 \
             WHERE id = ( \
                 SELECT id FROM event_queue \
                 WHERE (status = 'pending' OR (status = 'processing' AND locked_at < ?)) \
                   AND (available_at IS NULL OR available_at <= ?) \
                   AND attempts < ? \
                 ORDER BY id LIMIT 1 \
             ) \
             RETURNING id, event_id, payload_json, attempts",
        )
        .bind(ts(now))
        .bind(ts(lease_cutoff))
        .bind(ts(now))
        .bind(policy.max_attempts)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MimicError::Queue(format!("claim failed: {e}")))?;

        Ok(row.map(|(id, event_id, payload_json, attempts)| QueuedEvent {
            id,
            event_id,
            payload_json,
            attempts,
        }))
    }

    /// Acknowledge a claimed row.
    pub async fn mark_event_done(&self, id: i64) -> Result<(), MimicError> {
        sqlx::query(
            "UPDATE event_queue SET status = 'done', finished_at = ?, locked_at = NULL, \
             last_error = NULL WHERE id = ?",
        )
        .bind(ts(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| MimicError::Queue(format!("ack failed: {e}")))?;
        Ok(())
    }

    /// Release a claimed row after a failed attempt.
    pub async fn mark_event_failed(
        &self,
        id: i64,
        error: &str,
        policy: &QueuePolicy,
        now: DateTime<Utc>,
    ) -> Result<QueueStatus, MimicError> {
        let (attempts,): (i64,) = sqlx::query_as("SELECT attempts FROM event_queue WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MimicError::Queue(format!("nack lookup failed: {e}")))?;

        if attempts >= policy.max_attempts {
            sqlx::query(
                "UPDATE event_queue SET status = 'failed', finished_at = ?, locked_at = NULL, \
                 available_at = NULL, last_error = ? WHERE id = ?",
            )
            .bind(ts(now))
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| MimicError::Queue(format!("nack failed: {e}")))?;
            return Ok(QueueStatus::Failed);
        }

        let available_at = now + Duration::seconds(policy.backoff_secs(attempts));
        sqlx::query(
            "UPDATE event_queue SET status = 'pending', locked_at = NULL, available_at = ?, \
             last_error = ? WHERE id = ?",
        )
        .bind(ts(available_at))
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| MimicError::Queue(format!("nack failed: {e}")))?;
        Ok(QueueStatus::Pending)
    }

    /// Fail rows whose lease expired on their last allowed attempt.
    ///
    /// Returns the rows so the caller can dead-letter them.
    pub async fn reap_exhausted_events(
        &self,
        policy: &QueuePolicy,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueuedEvent>, MimicError> {
        let lease_cutoff = now - Duration::seconds(policy.lease_secs);
        let rows: Vec<(i64, i64, String, i64)> = sqlx::query_as(
            "UPDATE event_queue \
             SET status = 'failed', finished_at = ?, locked_at = NULL, \
                 last_error = COALESCE(last_error, 'lease expired') \
             WHERE status = 'processing' AND locked_at < ? AND attempts >= ? \
             RETURNING id, event_id, payload_json, attempts",
        )
        .bind(ts(now))
        .bind(ts(lease_cutoff))
        .bind(policy.max_attempts)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MimicError::Queue(format!("reap failed: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|(id, event_id, payload_json, attempts)| QueuedEvent {
                id,
                event_id,
                payload_json,
                attempts,
            })
            .collect())
    }

    /// Delete `done` rows finished before `older_than`.
    pub async fn purge_done_events(&self, older_than: DateTime<Utc>) -> Result<u64, MimicError> {
        let result =
            sqlx::query("DELETE FROM event_queue WHERE status = 'done' AND finished_at < ?")
                .bind(ts(older_than))
                .execute(&self.pool)
                .await
                .map_err(|e| MimicError::Queue(format!("purge failed: {e}")))?;
        Ok(result.rows_affected())
    }

    pub async fn queue_stats(&self) -> Result<QueueStats, MimicError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM event_queue GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| MimicError::Queue(format!("stats failed: {e}")))?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            match status.as_str() {
                "pending" => stats.pending = count,
                "processing" => stats.processing = count,
                "done" => stats.done = count,
                "failed" => stats.failed = count,
                _ => {}
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl EventQueue for Store {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn enqueue(&self, event: &InboundEvent) -> Result<(), MimicError> {
        self.enqueue_event(event).await.map(|_| ())
    }
}
