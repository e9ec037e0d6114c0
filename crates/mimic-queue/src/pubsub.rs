//! Google Pub/Sub publisher.
//!
//! Publishes through the REST API (`projects/*/topics/*:publish`). The push
//! subscription on the topic delivers back to `/queue/push`; its retry policy
//! and dead-letter topic provide redelivery.

use crate::envelope::encode_data;
use async_trait::async_trait;
use mimic_core::{
    config::QueueConfig, error::MimicError, event::InboundEvent, traits::EventQueue,
};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub struct PubSubPublisher {
    client: reqwest::Client,
    publish_url: String,
    token: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct PublishRequest {
    messages: Vec<OutboundMessage>,
}

#[derive(Serialize)]
struct OutboundMessage {
    data: String,
    attributes: HashMap<String, String>,
}

#[derive(Deserialize)]
struct PublishResponse {
    #[serde(default, rename = "messageIds")]
    message_ids: Vec<String>,
}

impl PubSubPublisher {
    pub fn new(config: &QueueConfig, timeout: Duration) -> Self {
        let publish_url = format!(
            "{}/projects/{}/topics/{}:publish",
            config.pubsub_base_url.trim_end_matches('/'),
            config.pubsub_project,
            config.pubsub_topic
        );
        Self {
            client: reqwest::Client::new(),
            publish_url,
            token: config.pubsub_token.clone(),
            timeout,
        }
    }

    /// Publish one event, returning the broker's message id.
    pub async fn publish(&self, event: &InboundEvent) -> Result<String, MimicError> {
        let body = PublishRequest {
            messages: vec![OutboundMessage {
                data: encode_data(event)?,
                attributes: HashMap::from([
                    ("event_id".to_string(), event.event_id.to_string()),
                    ("chat_id".to_string(), event.chat_id.to_string()),
                ]),
            }],
        };

        let mut req = self
            .client
            .post(&self.publish_url)
            .timeout(self.timeout)
            .json(&body);
        if !self.token.is_empty() {
            req = req.bearer_auth(&self.token);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                MimicError::Timeout(format!("pubsub publish timed out: {e}"))
            } else {
                MimicError::Queue(format!("pubsub publish failed: {e}"))
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(publish_failure(status, &text));
        }

        let parsed: PublishResponse = resp
            .json()
            .await
            .map_err(|e| MimicError::Queue(format!("pubsub: unreadable publish response: {e}")))?;
        let id = parsed
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| MimicError::Queue("pubsub: publish returned no message id".into()))?;
        debug!("pubsub: published event {} as {id}", event.event_id);
        Ok(id)
    }
}

fn publish_failure(status: StatusCode, body: &str) -> MimicError {
    let snippet: String = body.chars().take(200).collect();
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            MimicError::RateLimited(format!("pubsub publish throttled: {snippet}"))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            MimicError::Config(format!("pubsub rejected credentials ({status}): {snippet}"))
        }
        _ => MimicError::Queue(format!("pubsub publish failed ({status}): {snippet}")),
    }
}

#[async_trait]
impl EventQueue for PubSubPublisher {
    fn name(&self) -> &str {
        "pubsub"
    }

    async fn enqueue(&self, event: &InboundEvent) -> Result<(), MimicError> {
        self.publish(event).await.map(|_| ())
    }
}
