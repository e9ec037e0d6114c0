//! Telegram Bot API transport.
//!
//! Inbound updates arrive through the webhook and are parsed by
//! [`parse_update`]; replies go out through `sendMessage`.
//! Docs: <https://core.telegram.org/bots/api>

mod parse;
pub(crate) mod types;


pub use parse::parse_update;

use async_trait::async_trait;
use mimic_core::{
    config::TelegramConfig,
    error::MimicError,
    traits::{DispatchReceipt, ReplyDispatcher},
};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};
use types::{TgResponse, TgSentMessage};

/// Telegram's limit on a single text message.
const MAX_MESSAGE_CHARS: usize = 4096;

/// Sends replies with the Bot API.
pub struct TelegramDispatcher {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl TelegramDispatcher {
    /// Create a dispatcher from config. `timeout` bounds every send.
    pub fn new(config: &TelegramConfig, timeout: Duration) -> Self {
        let base_url = format!(
            "{}/bot{}",
            config.api_base_url.trim_end_matches('/'),
            config.bot_token
        );
        Self {
            client: reqwest::Client::new(),
            base_url,
            timeout,
        }
    }

    /// Send a plain-text message and return the sent message id.
    pub async fn send_text(&self, chat_id: i64, text: &str) -> Result<Option<i64>, MimicError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": clamp(text, MAX_MESSAGE_CHARS),
        });

        let resp = self
            .client
            .post(format!("{}/sendMessage", self.base_url))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MimicError::Timeout(format!("telegram send timed out: {e}"))
                } else {
                    MimicError::Delivery(format!("telegram send failed: {e}"))
                }
            })?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        message_id_from_response(status, &raw)
    }
}

#[async_trait]
impl ReplyDispatcher for TelegramDispatcher {
    async fn send(
        &self,
        chat_id: i64,
        text: &str,
        idempotency_key: &str,
    ) -> Result<DispatchReceipt, MimicError> {
        debug!("telegram: sending reply {idempotency_key} to {chat_id}");
        let message_id = self.send_text(chat_id, text).await?;
        Ok(DispatchReceipt {
            message_id,
            duplicate: false,
        })
    }
}

/// Interpret a `sendMessage` response.
pub(crate) fn message_id_from_response(
    status: StatusCode,
    raw: &str,
) -> Result<Option<i64>, MimicError> {
    let parsed: Option<TgResponse<TgSentMessage>> = serde_json::from_str(raw).ok();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = parsed
            .as_ref()
            .and_then(|r| r.parameters.as_ref())
            .and_then(|p| p.retry_after);
        return Err(MimicError::RateLimited(format!(
            "telegram send throttled (retry after {}s)",
            retry_after.unwrap_or(0)
        )));
    }

    match parsed {
        Some(body) if status.is_success() && body.ok => {
            Ok(body.result.map(|m| m.message_id))
        }
        Some(body) => Err(MimicError::Delivery(format!(
            "telegram send failed ({status}): {}",
            body.description.unwrap_or_default()
        ))),
        None if status.is_success() => {
            warn!("telegram: unreadable sendMessage response, assuming sent");
            Ok(None)
        }
        None => Err(MimicError::Delivery(format!(
            "telegram send failed ({status}): {raw}"
        ))),
    }
}

/// Cut text to `max` characters.
fn clamp(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
