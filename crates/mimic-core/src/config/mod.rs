mod defaults;


use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::MimicError;
use defaults::*;

/// Top-level Mimic configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mimic: MimicConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub style: StyleConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// General process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MimicConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// "text" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Directory for daily rolling log files. Unset = stderr only.
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Default for MimicConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            log_dir: None,
        }
    }
}

/// The one conversation this instance participates in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Chat whose messages are ingested. Required.
    #[serde(default)]
    pub chat_id: i64,
    /// Chat replies are posted to. Defaults to `chat_id`.
    #[serde(default)]
    pub reply_chat_id: Option<i64>,
    /// Bot handle without the leading `@`.
    #[serde(default)]
    pub bot_username: String,
    #[serde(default)]
    pub bot_user_id: Option<i64>,
}

impl ChatConfig {
    pub fn reply_target(&self) -> i64 {
        self.reply_chat_id.unwrap_or(self.chat_id)
    }
}

/// Reply decision tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Probability of replying to an otherwise unremarkable message.
    #[serde(default = "default_reply_probability")]
    pub reply_probability: f64,
    /// Minimum seconds between two replies (mentions excepted).
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Second-person words that count as addressing the bot.
    #[serde(default = "default_address_terms")]
    pub address_terms: Vec<String>,
    /// Messages of history handed to the generator.
    #[serde(default = "default_context_messages")]
    pub context_messages: usize,
    /// Fixed seed for random sampling. Unset = seeded from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            reply_probability: default_reply_probability(),
            cooldown_secs: default_cooldown_secs(),
            address_terms: default_address_terms(),
            context_messages: default_context_messages(),
            seed: None,
        }
    }
}

/// Style statistics tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleConfig {
    /// EMA window once warm-up is over.
    #[serde(default = "default_style_window")]
    pub window: usize,
    /// Vocabulary counter capacity.
    #[serde(default = "default_max_terms")]
    pub max_terms: usize,
    #[serde(default = "default_min_term_length")]
    pub min_term_length: usize,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            window: default_style_window(),
            max_terms: default_max_terms(),
            min_term_length: default_min_term_length(),
        }
    }
}

/// Queue consumer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Sentences kept from a generated reply. 0 = keep everything.
    #[serde(default = "default_max_reply_sentences")]
    pub max_reply_sentences: usize,
    /// A cycle running past this is abandoned without acknowledgment.
    #[serde(default = "default_cycle_deadline_secs")]
    pub cycle_deadline_secs: u64,
    /// Per-call timeout for store, AI and dispatch calls.
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_reply_sentences: default_max_reply_sentences(),
            cycle_deadline_secs: default_cycle_deadline_secs(),
            io_timeout_secs: default_io_timeout_secs(),
        }
    }
}

/// Where ingestion hands events off to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// SQLite table drained by the in-process pull worker.
    #[default]
    Local,
    /// Google Pub/Sub topic with a push subscription to `/queue/push`.
    Pubsub,
}

/// Durable queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackend,
    /// Deliveries before an event is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Longest time the substrate may keep redelivering one event.
    #[serde(default = "default_redelivery_window_secs")]
    pub redelivery_window_secs: u64,
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Token expected on push deliveries. Empty = no check.
    #[serde(default)]
    pub push_token: String,
    #[serde(default)]
    pub pubsub_project: String,
    #[serde(default)]
    pub pubsub_topic: String,
    /// OAuth access token for publishing.
    #[serde(default)]
    pub pubsub_token: String,
    #[serde(default = "default_pubsub_base_url")]
    pub pubsub_base_url: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            max_attempts: default_max_attempts(),
            redelivery_window_secs: default_redelivery_window_secs(),
            lease_secs: default_lease_secs(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            push_token: String::new(),
            pubsub_project: String::new(),
            pubsub_topic: String::new(),
            pubsub_token: String::new(),
            pubsub_base_url: default_pubsub_base_url(),
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Messages kept in a conversation's recent history.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Processed-event records older than this are pruned.
    #[serde(default = "default_retention_hours")]
    pub dedup_retention_hours: u64,
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            history_limit: default_history_limit(),
            dedup_retention_hours: default_retention_hours(),
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Shared secret expected on webhook calls.
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(default = "default_telegram_base_url")]
    pub api_base_url: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            webhook_secret: String::new(),
            api_base_url: default_telegram_base_url(),
        }
    }
}

/// OpenAI-compatible generator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Attempts on a rate-limited call before giving up.
    #[serde(default = "default_ai_retries")]
    pub max_retries: u32,
    /// Backoff unit; attempt `n` waits `n * retry_backoff_ms`.
    #[serde(default = "default_ai_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Opening of the system prompt.
    #[serde(default = "default_persona")]
    pub persona: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_retries: default_ai_retries(),
            retry_backoff_ms: default_ai_backoff_ms(),
            persona: default_persona(),
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit: default_body_limit(),
        }
    }
}

impl Config {
    /// Override secrets from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Override secrets through `lookup`. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("MIMIC_WEBHOOK_SECRET") {
            self.telegram.webhook_secret = v;
        }
        if let Some(v) = get("MIMIC_TELEGRAM_TOKEN") {
            self.telegram.bot_token = v;
        }
        if let Some(v) = get("MIMIC_OPENAI_API_KEY") {
            self.provider.api_key = v;
        }
        if let Some(v) = get("MIMIC_PUSH_TOKEN") {
            self.queue.push_token = v;
        }
        if let Some(v) = get("MIMIC_PUBSUB_TOKEN") {
            self.queue.pubsub_token = v;
        }
    }

    /// Reject configurations the pipeline cannot run safely with.
    pub fn validate(&self) -> Result<(), MimicError> {
        if self.chat.chat_id == 0 {
            return Err(MimicError::Config("chat.chat_id is required".into()));
        }
        if self.telegram.webhook_secret.trim().is_empty() {
            return Err(MimicError::Config(
                "telegram.webhook_secret must not be empty".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.decision.reply_probability) {
            return Err(MimicError::Config(format!(
                "decision.reply_probability must be within [0, 1], got {}",
                self.decision.reply_probability
            )));
        }
        if self.memory.history_limit == 0 {
            return Err(MimicError::Config(
                "memory.history_limit must be at least 1".into(),
            ));
        }
        let retention_secs = self.memory.dedup_retention_hours.saturating_mul(3600);
        if retention_secs <= self.queue.redelivery_window_secs {
            return Err(MimicError::Config(format!(
                "memory.dedup_retention_hours ({}h) must exceed queue.redelivery_window_secs ({}s)",
                self.memory.dedup_retention_hours, self.queue.redelivery_window_secs
            )));
        }
        if self.queue.max_attempts == 0 {
            return Err(MimicError::Config(
                "queue.max_attempts must be at least 1".into(),
            ));
        }
        if self.queue.backend == QueueBackend::Pubsub
            && (self.queue.pubsub_project.is_empty() || self.queue.pubsub_topic.is_empty())
        {
            return Err(MimicError::Config(
                "queue.pubsub_project and queue.pubsub_topic are required for the pubsub backend"
                    .into(),
            ));
        }
        Ok(())
    }
}

/// Expand `~` to home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, MimicError> {
    let path = Path::new(path);
    if !path.exists() {
        tracing::info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| MimicError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| MimicError::Config(format!("failed to parse config: {}", e)))?;

    Ok(config)
}
