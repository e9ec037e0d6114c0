use thiserror::Error;

/// Top-level error type for Mimic.
///
/// Variants follow how the pipeline reacts to them: transient failures are
/// retried through queue redelivery, permanent ones are acknowledged and
/// dead-lettered, ingestion failures are dropped or rejected at the edge.
#[derive(Debug, Error)]
pub enum MimicError {
    /// Inbound payload is missing required fields or has an unknown shape.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Shared secret or delivery token did not match.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// An external call exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The AI backend (or transport) asked us to slow down.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// A downstream service could not be reached or answered with a server error.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The reply could not be delivered to the conversation.
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Context/dedup storage error.
    #[error("store error: {0}")]
    Store(String),

    /// Queue publish/claim/ack error.
    #[error("queue error: {0}")]
    Queue(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Processing can never succeed for this event (e.g. corrupt stored context).
    #[error("permanent processing failure: {0}")]
    Permanent(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MimicError {
    /// Whether redelivery may succeed where this attempt failed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::RateLimited(_)
                | Self::Unavailable(_)
                | Self::Delivery(_)
                | Self::Store(_)
                | Self::Queue(_)
                | Self::Io(_)
        )
    }

    /// Whether the event should be acknowledged and dead-lettered instead of retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_) | Self::Serialization(_))
    }
}
