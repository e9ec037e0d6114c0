//! Default value functions used by serde for config deserialization.

pub fn default_name() -> String {
    "Mimic".to_string()
}

pub fn default_data_dir() -> String {
    "~/.mimic".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_log_format() -> String {
    "text".to_string()
}

pub fn default_reply_probability() -> f64 {
    0.10
}

pub fn default_cooldown_secs() -> u64 {
    60
}

pub fn default_address_terms() -> Vec<String> {
    ["you", "your", "you're", "yours", "yourself"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn default_context_messages() -> usize {
    20
}

pub fn default_style_window() -> usize {
    50
}

pub fn default_max_terms() -> usize {
    200
}

pub fn default_min_term_length() -> usize {
    3
}

pub fn default_max_reply_sentences() -> usize {
    2
}

pub fn default_cycle_deadline_secs() -> u64 {
    90
}

pub fn default_io_timeout_secs() -> u64 {
    30
}

pub fn default_max_attempts() -> u32 {
    5
}

pub fn default_redelivery_window_secs() -> u64 {
    24 * 3600
}

pub fn default_lease_secs() -> u64 {
    120
}

pub fn default_backoff_base_secs() -> u64 {
    5
}

pub fn default_backoff_max_secs() -> u64 {
    300
}

pub fn default_poll_interval_ms() -> u64 {
    500
}

pub fn default_pubsub_base_url() -> String {
    "https://pubsub.googleapis.com/v1".to_string()
}

pub fn default_db_path() -> String {
    "~/.mimic/data/mimic.db".to_string()
}

pub fn default_history_limit() -> usize {
    50
}

pub fn default_retention_hours() -> u64 {
    168
}

pub fn default_prune_interval_secs() -> u64 {
    3600
}

pub fn default_telegram_base_url() -> String {
    "https://api.telegram.org".to_string()
}

pub fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

pub fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

pub fn default_temperature() -> f32 {
    0.8
}

pub fn default_max_tokens() -> u32 {
    150
}

pub fn default_ai_retries() -> u32 {
    3
}

pub fn default_ai_backoff_ms() -> u64 {
    1000
}

pub fn default_persona() -> String {
    "You are a friendly participant in a Telegram group chat. \
     Mimic the group tone and slang. \
     Do not mention being an AI or a bot."
        .to_string()
}

pub fn default_host() -> String {
    "0.0.0.0".to_string()
}

pub fn default_port() -> u16 {
    8080
}

pub fn default_body_limit() -> usize {
    1024 * 1024
}
