//! Pub/Sub push envelope.
//!
//! ```json
//! {"message": {"data": "<base64 InboundEvent>", "messageId": "1", "publishTime": "..."},
//!  "subscription": "projects/p/subscriptions/s", "deliveryAttempt": 2}
//! ```

use base64::{engine::general_purpose::STANDARD, Engine as _};
use mimic_core::{error::MimicError, event::InboundEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Body of a push delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: Option<String>,
    /// Present when the subscription has a dead-letter policy.
    #[serde(default, rename = "deliveryAttempt")]
    pub delivery_attempt: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(default)]
    pub data: String,
    #[serde(default, rename = "messageId")]
    pub message_id: Option<String>,
    #[serde(default, rename = "publishTime")]
    pub publish_time: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl PushEnvelope {
    /// Decode the wrapped event.
    pub fn event(&self) -> Result<InboundEvent, MimicError> {
        if self.message.data.is_empty() {
            return Err(MimicError::MalformedInput("push message has no data".into()));
        }
        let raw = STANDARD
            .decode(self.message.data.trim())
            .map_err(|e| MimicError::MalformedInput(format!("push data is not base64: {e}")))?;
        serde_json::from_slice(&raw)
            .map_err(|e| MimicError::MalformedInput(format!("push data is not an event: {e}")))
    }
}

/// Parse a push body into its envelope and event.
///
/// The envelope is returned even when the event fails to decode, so callers
/// can log the message id alongside the failure.
pub fn decode_push(body: &[u8]) -> Result<(PushEnvelope, Result<InboundEvent, MimicError>), MimicError> {
    let envelope: PushEnvelope = serde_json::from_slice(body)
        .map_err(|e| MimicError::MalformedInput(format!("invalid push envelope: {e}")))?;
    let event = envelope.event();
    Ok((envelope, event))
}

/// Serialize an event into the base64 `data` field Pub/Sub expects.
pub fn encode_data(event: &InboundEvent) -> Result<String, MimicError> {
    let json = serde_json::to_vec(event)?;
    Ok(STANDARD.encode(json))
}
