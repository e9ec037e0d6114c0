use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::{error::MimicError, event::Message, style::StyleProfile};

/// Reply pacing state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CooldownState {
    pub last_reply_timestamp: Option<DateTime<Utc>>,
    /// Messages processed since the last reply.
    #[serde(default)]
    pub consecutive_no_reply_count: u32,
}

impl CooldownState {
    /// Seconds since the last reply, or `None` if the bot never replied.
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_reply_timestamp
            .map(|last| (now - last).num_seconds())
    }
}

/// Everything the consumer remembers about the conversation.
///
/// Owned by the queue consumer for the duration of one cycle and persisted
/// after it. `recent_messages` is chronological and never longer than the
/// configured history limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub chat_id: i64,
    #[serde(default)]
    pub recent_messages: VecDeque<Message>,
    #[serde(default)]
    pub style_profile: StyleProfile,
    #[serde(default)]
    pub cooldown: CooldownState,
    /// Transport id of the bot's most recent reply.
    #[serde(default)]
    pub last_bot_message_id: Option<i64>,
}

impl ConversationContext {
    pub fn new(chat_id: i64) -> Self {
        Self {
            chat_id,
            recent_messages: VecDeque::new(),
            style_profile: StyleProfile::default(),
            cooldown: CooldownState::default(),
            last_bot_message_id: None,
        }
    }

    pub fn last_reply_timestamp(&self) -> Option<DateTime<Utc>> {
        self.cooldown.last_reply_timestamp
    }

    /// Whether a message produced by `event_id` is already in history.
    pub fn contains_event(&self, event_id: i64) -> bool {
        self.recent_messages.iter().any(|m| m.event_id == event_id)
    }

    /// Append a message, evicting the oldest past `capacity`.
    ///
    /// Returns `false` without touching history when the message's event is
    /// already present, so replaying a cycle never duplicates entries.
    pub fn append(&mut self, message: Message, capacity: usize) -> bool {
        if self.contains_event(message.event_id) {
            return false;
        }
        self.recent_messages.push_back(message);
        while self.recent_messages.len() > capacity {
            self.recent_messages.pop_front();
        }
        true
    }

    /// The last `n` messages, oldest first.
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &Message> {
        let skip = self.recent_messages.len().saturating_sub(n);
        self.recent_messages.iter().skip(skip)
    }

    pub fn record_reply(&mut self, at: DateTime<Utc>, message_id: Option<i64>) {
        self.cooldown.last_reply_timestamp = Some(at);
        self.cooldown.consecutive_no_reply_count = 0;
        if message_id.is_some() {
            self.last_bot_message_id = message_id;
        }
    }

    pub fn record_no_reply(&mut self) {
        self.cooldown.consecutive_no_reply_count =
            self.cooldown.consecutive_no_reply_count.saturating_add(1);
    }

    pub fn to_json(&self) -> Result<String, MimicError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a stored context. Undecodable data can never succeed on retry.
    pub fn from_json(chat_id: i64, raw: &str) -> Result<Self, MimicError> {
        serde_json::from_str(raw).map_err(|e| {
            MimicError::Permanent(format!("corrupt context for chat {chat_id}: {e}"))
        })
    }
}
