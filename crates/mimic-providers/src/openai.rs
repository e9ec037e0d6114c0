//! OpenAI-compatible chat completions generator.
//!
//! Works with OpenAI's API and any compatible endpoint. Rate-limited calls are
//! retried with linear backoff; every other failure surfaces immediately so
//! the queue can redeliver.

use async_trait::async_trait;
use mimic_core::{
    config::ProviderConfig, decision::PromptContext, error::MimicError,
    sanitize::sanitize_chat_line, traits::Generator,
};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// OpenAI-compatible generator.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    retry_backoff: Duration,
    persona: String,
    max_sentences: usize,
    timeout: Duration,
}

impl OpenAiGenerator {
    /// Create from config values. `timeout` bounds each HTTP attempt.
    pub fn from_config(config: &ProviderConfig, max_sentences: usize, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            persona: config.persona.clone(),
            max_sentences,
            timeout,
        }
    }

    async fn attempt(&self, body: &ChatCompletionRequest) -> Result<String, MimicError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        debug!("openai: POST {url} model={}", body.model);

        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MimicError::Timeout(format!("openai request timed out: {e}"))
                } else {
                    MimicError::Unavailable(format!("openai request failed: {e}"))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_failure(status, &text));
        }

        let parsed: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| MimicError::Unavailable(format!("openai: failed to parse response: {e}")))?;

        Ok(reply_text(&parsed))
    }
}

/// System prompt: persona, length budget, then style notes.
pub(crate) fn build_system_prompt(persona: &str, max_sentences: usize, prompt: &PromptContext) -> String {
    let mut system = persona.trim().to_string();
    if max_sentences > 0 {
        system.push_str(&format!(
            " Keep replies to {max_sentences} sentences or fewer."
        ));
    }
    if let Some(style) = &prompt.style_guidance {
        system.push(' ');
        system.push_str(style);
    }
    system
}

/// One user message per history line, prefixed with the sender's name.
pub(crate) fn build_openai_messages(system: &str, prompt: &PromptContext) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(prompt.history.len() + 1);
    messages.push(ChatMessage {
        role: "system".to_string(),
        content: system.to_string(),
    });
    for m in &prompt.history {
        if m.text.trim().is_empty() {
            continue;
        }
        let clean = sanitize_chat_line(&m.text);
        if clean.was_modified {
            warn!("openai: chat line {} sanitized: {:?}", m.event_id, clean.warnings);
        }
        let content = match &m.sender_name {
            Some(name) => format!("{name}: {}", clean.text),
            None => clean.text,
        };
        messages.push(ChatMessage {
            role: "user".to_string(),
            content,
        });
    }
    messages
}

/// Map a non-success response onto the error taxonomy.
pub(crate) fn classify_failure(status: StatusCode, body: &str) -> MimicError {
    let snippet: String = body.chars().take(200).collect();
    if status == StatusCode::TOO_MANY_REQUESTS {
        MimicError::RateLimited(format!("openai returned {status}: {snippet}"))
    } else if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        MimicError::Timeout(format!("openai returned {status}: {snippet}"))
    } else if status.is_server_error() {
        MimicError::Unavailable(format!("openai returned {status}: {snippet}"))
    } else {
        MimicError::Permanent(format!("openai returned {status}: {snippet}"))
    }
}

fn reply_text(parsed: &ChatCompletionResponse) -> String {
    parsed
        .choices
        .as_ref()
        .and_then(|c| c.first())
        .and_then(|c| c.message.as_ref())
        .and_then(|m| m.content.as_deref())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

#[derive(Serialize, Deserialize, Clone)]
pub(crate) struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize)]
pub(crate) struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Deserialize)]
pub(crate) struct ChatCompletionResponse {
    pub choices: Option<Vec<ChatChoice>>,
}

#[derive(Deserialize)]
pub(crate) struct ChatChoice {
    pub message: Option<ChatResponseMessage>,
}

#[derive(Deserialize)]
pub(crate) struct ChatResponseMessage {
    pub content: Option<String>,
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, prompt: &PromptContext) -> Result<String, MimicError> {
        let system = build_system_prompt(&self.persona, self.max_sentences, prompt);
        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages: build_openai_messages(&system, prompt),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let start = Instant::now();
        let mut attempt = 1;
        loop {
            match self.attempt(&body).await {
                Ok(text) => {
                    debug!(
                        "openai: {} chars in {}ms (attempt {attempt})",
                        text.len(),
                        start.elapsed().as_millis()
                    );
                    return Ok(text);
                }
                Err(MimicError::RateLimited(msg)) if attempt < self.max_retries => {
                    let wait = self.retry_backoff * attempt;
                    warn!("openai: rate limited (attempt {attempt}), retrying in {wait:?}: {msg}");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
