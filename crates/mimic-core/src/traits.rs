use crate::{
    context::ConversationContext, decision::PromptContext, error::MimicError,
    event::InboundEvent,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text generator: the voice.
///
/// Every AI backend implements this trait. Implementations must fail fast with
/// `Timeout`, `RateLimited` or `Unavailable` so the consumer can retry through
/// redelivery. An empty string means "nothing worth saying".
#[async_trait]
pub trait Generator: Send + Sync {
    /// Human-readable backend name.
    fn name(&self) -> &str;

    /// Produce reply text for the prompt context.
    async fn generate(&self, prompt: &PromptContext) -> Result<String, MimicError>;
}

/// What the transport reported after sending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReceipt {
    /// Transport message id of the sent reply, if reported.
    pub message_id: Option<i64>,
    /// True when the reply had already been sent under the same key.
    #[serde(default)]
    pub duplicate: bool,
}

/// Reply dispatcher: the mouth.
#[async_trait]
pub trait ReplyDispatcher: Send + Sync {
    /// Send `text` to `chat_id`. `idempotency_key` identifies the logical reply.
    async fn send(
        &self,
        chat_id: i64,
        text: &str,
        idempotency_key: &str,
    ) -> Result<DispatchReceipt, MimicError>;
}

/// Producer side of the durable queue.
#[async_trait]
pub trait EventQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Durably hand the event off. Returns only after the substrate accepted it.
    async fn enqueue(&self, event: &InboundEvent) -> Result<(), MimicError>;
}

/// Persistent conversation state.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// `Ok(None)` when nothing was ever saved for the chat.
    async fn load(&self, chat_id: i64) -> Result<Option<ConversationContext>, MimicError>;

    async fn save(&self, context: &ConversationContext) -> Result<(), MimicError>;
}

/// Record of fully processed events.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn has(&self, event_id: i64) -> Result<bool, MimicError>;

    /// Idempotent: marking twice is not an error.
    async fn mark(&self, event_id: i64) -> Result<(), MimicError>;

    /// Drop records processed before `older_than`. Returns how many went.
    async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64, MimicError>;
}

/// A reply that reached the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentReply {
    pub idempotency_key: String,
    pub chat_id: i64,
    pub text: String,
    pub message_id: Option<i64>,
    pub sent_at: DateTime<Utc>,
}

/// Ledger of replies already sent, keyed by idempotency key.
#[async_trait]
pub trait ReplyLedger: Send + Sync {
    async fn find(&self, idempotency_key: &str) -> Result<Option<SentReply>, MimicError>;

    async fn record(&self, reply: &SentReply) -> Result<(), MimicError>;
}

/// Destination for events that can never be processed.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(
        &self,
        event_id: Option<i64>,
        payload: &str,
        reason: &str,
    ) -> Result<(), MimicError>;
}
