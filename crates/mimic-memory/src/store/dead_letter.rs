//! Events that can never be processed.

use super::{ts, Store};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mimic_core::{error::MimicError, traits::DeadLetterSink};
use uuid::Uuid;

/// A dead-lettered event.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub id: String,
    pub event_id: Option<i64>,
    pub payload: String,
    pub reason: String,
    pub created_at: String,
}

impl Store {
    pub async fn record_dead_letter(
        &self,
        event_id: Option<i64>,
        payload: &str,
        reason: &str,
    ) -> Result<String, MimicError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO dead_letters (id, event_id, payload, reason, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(event_id)
        .bind(payload)
        .bind(reason)
        .bind(ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| MimicError::Store(format!("dead letter write failed: {e}")))?;
        Ok(id)
    }

    /// Most recent dead letters first.
    pub async fn recent_dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>, MimicError> {
        let rows: Vec<(String, Option<i64>, String, String, String)> = sqlx::query_as(
            "SELECT id, event_id, payload, reason, created_at FROM dead_letters \
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MimicError::Store(format!("dead letter query failed: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|(id, event_id, payload, reason, created_at)| DeadLetter {
                id,
                event_id,
                payload,
                reason,
                created_at,
            })
            .collect())
    }

    pub async fn prune_dead_letters(&self, older_than: DateTime<Utc>) -> Result<u64, MimicError> {
        let result = sqlx::query("DELETE FROM dead_letters WHERE created_at < ?")
            .bind(ts(older_than))
            .execute(&self.pool)
            .await
            .map_err(|e| MimicError::Store(format!("dead letter prune failed: {e}")))?;
        Ok(result.rows_affected())
    }

    pub async fn dead_letter_count(&self) -> Result<i64, MimicError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dead_letters")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MimicError::Store(format!("dead letter count failed: {e}")))?;
        Ok(count)
    }
}

#[async_trait]
impl DeadLetterSink for Store {
    async fn dead_letter(
        &self,
        event_id: Option<i64>,
        payload: &str,
        reason: &str,
    ) -> Result<(), MimicError> {
        self.record_dead_letter(event_id, payload, reason)
            .await
            .map(|_| ())
    }
}
