//! Processed-event records.

use super::{ts, Store};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mimic_core::{error::MimicError, traits::DedupStore};

impl Store {
    /// Whether the event's cycle already completed.
    pub async fn is_processed(&self, event_id: i64) -> Result<bool, MimicError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT event_id FROM processed_events WHERE event_id = ?")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| MimicError::Store(format!("dedup lookup failed: {e}")))?;
        Ok(row.is_some())
    }

    /// Record the event as processed. The first record wins.
    pub async fn mark_processed(
        &self,
        event_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), MimicError> {
        sqlx::query("INSERT OR IGNORE INTO processed_events (event_id, processed_at) VALUES (?, ?)")
            .bind(event_id)
            .bind(ts(at))
            .execute(&self.pool)
            .await
            .map_err(|e| MimicError::Store(format!("dedup mark failed: {e}")))?;
        Ok(())
    }

    /// Delete records processed before `older_than`.
    pub async fn prune_processed(&self, older_than: DateTime<Utc>) -> Result<u64, MimicError> {
        let result = sqlx::query("DELETE FROM processed_events WHERE processed_at < ?")
            .bind(ts(older_than))
            .execute(&self.pool)
            .await
            .map_err(|e| MimicError::Store(format!("dedup prune failed: {e}")))?;
        Ok(result.rows_affected())
    }

    pub async fn processed_count(&self) -> Result<i64, MimicError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM processed_events")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MimicError::Store(format!("dedup count failed: {e}")))?;
        Ok(count)
    }
}

#[async_trait]
impl DedupStore for Store {
    async fn has(&self, event_id: i64) -> Result<bool, MimicError> {
        self.is_processed(event_id).await
    }

    async fn mark(&self, event_id: i64) -> Result<(), MimicError> {
        self.mark_processed(event_id, Utc::now()).await
    }

    async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64, MimicError> {
        self.prune_processed(older_than).await
    }
}
