//! Conversation context persistence.

use super::{ts, Store};
use async_trait::async_trait;
use chrono::Utc;
use mimic_core::{context::ConversationContext, error::MimicError, traits::ContextStore};

impl Store {
    /// Load the stored context for a chat.
    ///
    /// Undecodable rows surface as `MimicError::Permanent`.
    pub async fn load_context(
        &self,
        chat_id: i64,
    ) -> Result<Option<ConversationContext>, MimicError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT context_json FROM conversation_contexts WHERE chat_id = ?")
                .bind(chat_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| MimicError::Store(format!("failed to load context: {e}")))?;

        row.map(|(json,)| ConversationContext::from_json(chat_id, &json))
            .transpose()
    }

    /// Insert or replace the context for its chat.
    pub async fn save_context(&self, context: &ConversationContext) -> Result<(), MimicError> {
        let json = context.to_json()?;
        sqlx::query(
            "INSERT INTO conversation_contexts (chat_id, context_json, updated_at) \
             VALUES (?, ?, ?) \
             ON CONFLICT(chat_id) DO UPDATE SET \
             context_json = excluded.context_json, updated_at = excluded.updated_at",
        )
        .bind(context.chat_id)
        .bind(&json)
        .bind(ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| MimicError::Store(format!("failed to save context: {e}")))?;
        Ok(())
    }

    /// Forget a chat's context. Returns whether a row existed.
    pub async fn delete_context(&self, chat_id: i64) -> Result<bool, MimicError> {
        let result = sqlx::query("DELETE FROM conversation_contexts WHERE chat_id = ?")
            .bind(chat_id)
            .execute(&self.pool)
            .await
            .map_err(|e| MimicError::Store(format!("failed to delete context: {e}")))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ContextStore for Store {
    async fn load(&self, chat_id: i64) -> Result<Option<ConversationContext>, MimicError> {
        self.load_context(chat_id).await
    }

    async fn save(&self, context: &ConversationContext) -> Result<(), MimicError> {
        self.save_context(context).await
    }
}
