//! Ledger of replies that reached the transport.

use super::{parse_ts, ts, Store};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mimic_core::{
    error::MimicError,
    traits::{ReplyLedger, SentReply},
};

impl Store {
    pub async fn find_reply(&self, idempotency_key: &str) -> Result<Option<SentReply>, MimicError> {
        let row: Option<(String, i64, String, Option<i64>, String)> = sqlx::query_as(
            "SELECT idempotency_key, chat_id, text, message_id, sent_at \
             FROM sent_replies WHERE idempotency_key = ?",
        )
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MimicError::Store(format!("reply ledger lookup failed: {e}")))?;

        match row {
            Some((idempotency_key, chat_id, text, message_id, sent_at)) => Ok(Some(SentReply {
                idempotency_key,
                chat_id,
                text,
                message_id,
                sent_at: parse_ts(&sent_at)?,
            })),
            None => Ok(None),
        }
    }

    /// Record a sent reply. A second record under the same key is ignored.
    pub async fn record_reply(&self, reply: &SentReply) -> Result<(), MimicError> {
        sqlx::query(
            "INSERT OR IGNORE INTO sent_replies \
             (idempotency_key, chat_id, text, message_id, sent_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&reply.idempotency_key)
        .bind(reply.chat_id)
        .bind(&reply.text)
        .bind(reply.message_id)
        .bind(ts(reply.sent_at))
        .execute(&self.pool)
        .await
        .map_err(|e| MimicError::Store(format!("reply ledger write failed: {e}")))?;
        Ok(())
    }

    /// Drop ledger entries sent before `older_than`. Returns how many went.
    pub async fn prune_replies(&self, older_than: DateTime<Utc>) -> Result<u64, MimicError> {
        let result = sqlx::query("DELETE FROM sent_replies WHERE sent_at < ?")
            .bind(ts(older_than))
            .execute(&self.pool)
            .await
            .map_err(|e| MimicError::Store(format!("reply ledger prune failed: {e}")))?;
        Ok(result.rows_affected())
    }

    pub async fn reply_count(&self) -> Result<i64, MimicError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sent_replies")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MimicError::Store(format!("reply count failed: {e}")))?;
        Ok(count)
    }
}

#[async_trait]
impl ReplyLedger for Store {
    async fn find(&self, idempotency_key: &str) -> Result<Option<SentReply>, MimicError> {
        self.find_reply(idempotency_key).await
    }

    async fn record(&self, reply: &SentReply) -> Result<(), MimicError> {
        self.record_reply(reply).await
    }
}
