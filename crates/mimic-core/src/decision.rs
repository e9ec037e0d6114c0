//! Reply decision table.
//!
//! [`decide`] is a pure function: the same message, context, configuration,
//! clock reading and random draws always produce the same decision. Rules are
//! checked in order and the first match wins:
//!
//! 1. the bot's own messages never trigger anything;
//! 2. a mention of the bot's handle, or a reply to its last message, always
//!    triggers, cooldown or not;
//! 3. while the cooldown runs nothing else triggers;
//! 4. a question mark, then a second-person address term;
//! 5. a random sample with the configured probability.

use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    config::{ChatConfig, DecisionConfig},
    context::ConversationContext,
    event::{InboundEvent, Message},
};

/// Why the engine decided to reply (or not).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Mention,
    Question,
    AddressTerm,
    RandomSample,
    None,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mention => "mention",
            Self::Question => "question",
            Self::AddressTerm => "address_term",
            Self::RandomSample => "random_sample",
            Self::None => "none",
        }
    }
}

/// Input handed to the generator when a reply is warranted.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptContext {
    pub chat_id: i64,
    pub trigger: Trigger,
    /// The message being answered.
    pub current: Message,
    /// Recent history, oldest first, ending with `current`.
    pub history: Vec<Message>,
    /// Style notes for the system prompt.
    pub style_guidance: Option<String>,
    pub bot_username: String,
}

/// Outcome of one decision.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyDecision {
    pub should_reply: bool,
    pub trigger: Trigger,
    pub prompt_context: Option<PromptContext>,
}

impl ReplyDecision {
    fn silent() -> Self {
        Self {
            should_reply: false,
            trigger: Trigger::None,
            prompt_context: None,
        }
    }
}

/// Source of uniform samples in `[0, 1)`.
pub trait RandomSource: Send {
    fn next_f64(&mut self) -> f64;
}

/// `StdRng`-backed source. A fixed seed replays the same draws.
pub struct SeededRandom {
    rng: StdRng,
}

impl SeededRandom {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }
}

impl RandomSource for SeededRandom {
    fn next_f64(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Decide whether to reply to `event`.
///
/// `context` must already contain the event's message; it is the source of
/// history, cooldown state and style profile.
pub fn decide(
    event: &InboundEvent,
    context: &ConversationContext,
    chat: &ChatConfig,
    config: &DecisionConfig,
    now: DateTime<Utc>,
    random: &mut dyn RandomSource,
) -> ReplyDecision {
    if is_from_bot(event, chat) {
        return ReplyDecision::silent();
    }

    let trigger = if mentions(&event.text, &chat.bot_username)
        || is_reply_to_bot(event, context)
    {
        Trigger::Mention
    } else if in_cooldown(context, config, now) {
        Trigger::None
    } else if event.text.contains('?') {
        Trigger::Question
    } else if addresses(&event.text, &config.address_terms) {
        Trigger::AddressTerm
    } else if random.next_f64() < config.reply_probability {
        Trigger::RandomSample
    } else {
        Trigger::None
    };

    if trigger == Trigger::None {
        return ReplyDecision::silent();
    }

    ReplyDecision {
        should_reply: true,
        trigger,
        prompt_context: Some(PromptContext {
            chat_id: context.chat_id,
            trigger,
            current: event.to_message(),
            history: context.tail(config.context_messages).cloned().collect(),
            style_guidance: context.style_profile.guidance(),
            bot_username: chat.bot_username.clone(),
        }),
    }
}

/// The bot is recognised by user id, or by username on a bot account.
pub fn is_from_bot(event: &InboundEvent, chat: &ChatConfig) -> bool {
    if chat.bot_user_id == Some(event.sender_id) {
        return true;
    }
    event.sender_is_bot
        && !chat.bot_username.is_empty()
        && event
            .sender_username
            .as_deref()
            .is_some_and(|u| u.eq_ignore_ascii_case(chat.bot_username.trim_start_matches('@')))
}

/// Case-insensitive `@handle` not followed by another handle character.
pub fn mentions(text: &str, handle: &str) -> bool {
    let handle = handle.trim_start_matches('@');
    if handle.is_empty() {
        return false;
    }
    let needle = format!("@{}", handle.to_lowercase());
    let haystack = text.to_lowercase();

    let mut start = 0;
    while let Some(pos) = haystack[start..].find(&needle) {
        let end = start + pos + needle.len();
        let boundary = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_'));
        if boundary {
            return true;
        }
        start = end;
    }
    false
}

fn is_reply_to_bot(event: &InboundEvent, context: &ConversationContext) -> bool {
    matches!(
        (event.reply_to_message_id, context.last_bot_message_id),
        (Some(a), Some(b)) if a == b
    )
}

fn in_cooldown(context: &ConversationContext, config: &DecisionConfig, now: DateTime<Utc>) -> bool {
    context
        .cooldown
        .elapsed_secs(now)
        .is_some_and(|elapsed| elapsed < config.cooldown_secs as i64)
}

/// Whole-word, case-insensitive match against the address terms.
pub fn addresses(text: &str, terms: &[String]) -> bool {
    let normalized = text.replace('\u{2019}', "'").to_lowercase();
    normalized
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
        .any(|w| terms.iter().any(|t| t.eq_ignore_ascii_case(w)))
}
