use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an inbound message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Text,
    Photo,
    Video,
    Link,
    Other,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Link => "link",
            Self::Other => "other",
        }
    }
}

/// A validated message event from the conversation transport.
///
/// Built once at the ingestion boundary and never mutated afterwards.
/// `event_id` is the transport's delivery id (Telegram `update_id`) and is the
/// key for deduplication and reply idempotency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub event_id: i64,
    pub chat_id: i64,
    pub sender_id: i64,
    /// Human-readable sender name.
    pub sender_name: Option<String>,
    /// Message text, or the caption for photos and videos. Empty when absent.
    #[serde(default)]
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    /// Transport message id inside the chat.
    #[serde(default)]
    pub message_id: Option<i64>,
    #[serde(default)]
    pub sender_username: Option<String>,
    #[serde(default)]
    pub sender_is_bot: bool,
    /// Message id this one replies to, if any.
    #[serde(default)]
    pub reply_to_message_id: Option<i64>,
}

impl InboundEvent {
    /// Snapshot this event as a history entry.
    pub fn to_message(&self) -> Message {
        Message {
            event_id: self.event_id,
            message_id: self.message_id,
            sender_id: self.sender_id,
            sender_name: self
                .sender_name
                .clone()
                .or_else(|| self.sender_username.clone()),
            text: self.text.clone(),
            timestamp: self.timestamp,
            kind: self.kind,
        }
    }

    /// Short preview of the text for log lines.
    pub fn preview(&self) -> String {
        if self.text.chars().count() > 60 {
            let truncated: String = self.text.chars().take(60).collect();
            format!("{truncated}...")
        } else {
            self.text.clone()
        }
    }
}

/// One entry of a conversation's recent history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Event that produced this entry. Used to make appends idempotent.
    pub event_id: i64,
    #[serde(default)]
    pub message_id: Option<i64>,
    pub sender_id: i64,
    pub sender_name: Option<String>,
    #[serde(default)]
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

/// Returns true when the text contains something that looks like a web link.
pub fn contains_link(text: &str) -> bool {
    text.split_whitespace().any(|word| {
        let lower = word.to_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("www.")
    })
}
