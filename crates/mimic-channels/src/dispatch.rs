//! Idempotent dispatch.
//!
//! [`GuardedDispatcher`] consults the reply ledger before handing text to the
//! transport and records every successful send, so a reply keyed by the same
//! event id goes out at most once across retries and restarts.

use async_trait::async_trait;
use chrono::Utc;
use mimic_core::{
    error::MimicError,
    traits::{DispatchReceipt, ReplyDispatcher, ReplyLedger, SentReply},
};
use std::sync::Arc;
use tracing::{error, info};

pub struct GuardedDispatcher {
    inner: Arc<dyn ReplyDispatcher>,
    ledger: Arc<dyn ReplyLedger>,
}

impl GuardedDispatcher {
    pub fn new(inner: Arc<dyn ReplyDispatcher>, ledger: Arc<dyn ReplyLedger>) -> Self {
        Self { inner, ledger }
    }
}

#[async_trait]
impl ReplyDispatcher for GuardedDispatcher {
    async fn send(
        &self,
        chat_id: i64,
        text: &str,
        idempotency_key: &str,
    ) -> Result<DispatchReceipt, MimicError> {
        if let Some(sent) = self.ledger.find(idempotency_key).await? {
            info!("dispatch: reply {idempotency_key} already sent, skipping");
            return Ok(DispatchReceipt {
                message_id: sent.message_id,
                duplicate: true,
            });
        }

        let receipt = self.inner.send(chat_id, text, idempotency_key).await?;

        let record = SentReply {
            idempotency_key: idempotency_key.to_string(),
            chat_id,
            text: text.to_string(),
            message_id: receipt.message_id,
            sent_at: Utc::now(),
        };
        // Already sent: a ledger write failure must not fail the send.
        if let Err(e) = self.ledger.record(&record).await {
            error!("dispatch: reply {idempotency_key} sent but not recorded: {e}");
        }

        Ok(receipt)
    }
}
