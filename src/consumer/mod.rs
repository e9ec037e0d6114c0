//! Queue consumer: turns one delivered event into at most one reply.
//!
//! Events are processed strictly one at a time. Each cycle runs the dedup
//! check, loads the conversation context, appends the message, updates the
//! style profile, runs the decision engine, generates and dispatches a reply
//! when warranted, persists the context and finally marks the event
//! processed. Any transient failure leaves the event unmarked so the queue
//! redelivers it; permanent failures are dead-lettered and acknowledged.

mod pipeline;
pub mod worker;

#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use mimic_channels::GuardedDispatcher;
use mimic_core::{
    config::{ChatConfig, Config, DecisionConfig, MemoryConfig, StyleConfig, WorkerConfig},
    decision::{RandomSource, SeededRandom},
    error::MimicError,
    event::InboundEvent,
    traits::{DeadLetterSink, Generator, ReplyDispatcher},
};
use mimic_memory::{
    audit::{AuditEntry, AuditLogger, AuditOutcome},
    ContextCache, Store,
};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, info_span, warn, Instrument};

/// How a cycle ended, for acknowledgement and logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Already processed; nothing happened.
    Duplicate,
    /// The decision engine chose silence.
    NoReply,
    /// The generator had nothing to say.
    Empty,
    /// A reply reached the conversation. `fresh` is false when an earlier
    /// attempt had already sent it.
    Replied { text: String, fresh: bool },
    /// Permanently unprocessable; written to the dead-letter table.
    DeadLettered { reason: String },
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::NoReply => "no_reply",
            Self::Empty => "empty",
            Self::Replied { .. } => "replied",
            Self::DeadLettered { .. } => "dead_lettered",
        }
    }

    fn audit(&self) -> AuditOutcome {
        match self {
            Self::Duplicate => AuditOutcome::Duplicate,
            Self::NoReply => AuditOutcome::NoReply,
            Self::Empty => AuditOutcome::Empty,
            Self::Replied { .. } => AuditOutcome::Replied,
            Self::DeadLettered { .. } => AuditOutcome::DeadLettered,
        }
    }
}

/// The single consumer of the event queue.
pub struct Consumer {
    pub(super) store: Store,
    pub(super) generator: Arc<dyn Generator>,
    pub(super) dispatcher: GuardedDispatcher,
    pub(super) audit: AuditLogger,
    pub(super) cache: ContextCache,
    pub(super) chat: ChatConfig,
    pub(super) decision: DecisionConfig,
    pub(super) style: StyleConfig,
    pub(super) worker: WorkerConfig,
    pub(super) memory: MemoryConfig,
    /// Held for a whole cycle: one event at a time, and the random source
    /// sees draws in processing order.
    pub(super) cycle: Mutex<Box<dyn RandomSource>>,
}

impl Consumer {
    /// Build a consumer. `transport` is wrapped so every send goes through
    /// the store's reply ledger.
    pub fn new(
        store: Store,
        generator: Arc<dyn Generator>,
        transport: Arc<dyn ReplyDispatcher>,
        config: &Config,
    ) -> Self {
        let random = Box::new(SeededRandom::new(config.decision.seed));
        Self::with_random(store, generator, transport, config, random)
    }

    pub fn with_random(
        store: Store,
        generator: Arc<dyn Generator>,
        transport: Arc<dyn ReplyDispatcher>,
        config: &Config,
        random: Box<dyn RandomSource>,
    ) -> Self {
        let audit = AuditLogger::new(store.pool().clone());
        let dispatcher = GuardedDispatcher::new(transport, Arc::new(store.clone()));
        Self {
            store,
            generator,
            dispatcher,
            audit,
            cache: ContextCache::new(),
            chat: config.chat.clone(),
            decision: config.decision.clone(),
            style: config.style.clone(),
            worker: config.worker.clone(),
            memory: config.memory.clone(),
            cycle: Mutex::new(random),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Process one delivered event against the wall clock.
    pub async fn process(&self, event: &InboundEvent) -> Result<Outcome, MimicError> {
        self.process_at(event, Utc::now()).await
    }

    /// Process one delivered event.
    ///
    /// `Ok` means the event may be acknowledged. `Err` is always transient:
    /// the event was not marked processed and must be redelivered.
    pub async fn process_at(
        &self,
        event: &InboundEvent,
        now: DateTime<Utc>,
    ) -> Result<Outcome, MimicError> {
        let span = info_span!("event", event_id = event.event_id, chat_id = event.chat_id);
        async {
            let mut random = self.cycle.lock().await;
            let started = Instant::now();
            let deadline = Duration::from_secs(self.worker.cycle_deadline_secs);

            let result =
                match tokio::time::timeout(deadline, self.run_cycle(event, now, random.as_mut()))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(MimicError::Timeout(format!(
                        "cycle exceeded {}s deadline",
                        deadline.as_secs()
                    ))),
                };
            let processing_ms = started.elapsed().as_millis() as i64;

            match result {
                Ok(cycle) => {
                    self.record_audit(event, &cycle.outcome, cycle.trigger, processing_ms)
                        .await;
                    let fresh_reply = matches!(cycle.outcome, Outcome::Replied { fresh: true, .. });
                    info!(
                        outcome = cycle.outcome.as_str(),
                        fresh_reply,
                        processing_ms,
                        "update.processed"
                    );
                    Ok(cycle.outcome)
                }
                Err(e) if e.is_permanent() => {
                    self.cache.invalidate(event.chat_id);
                    let outcome = self.dead_letter_event(event, &e).await?;
                    self.record_audit(event, &outcome, None, processing_ms).await;
                    Ok(outcome)
                }
                Err(e) => {
                    self.cache.invalidate(event.chat_id);
                    warn!(error = %e, "update.failed");
                    self.write_audit(AuditEntry {
                        event_id: event.event_id,
                        chat_id: event.chat_id,
                        sender_id: Some(event.sender_id),
                        trigger: None,
                        outcome: AuditOutcome::Failed,
                        reply_text: None,
                        processing_ms: Some(processing_ms),
                        error: Some(e.to_string()),
                    })
                    .await;
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Record an unprocessable event, then mark it processed so redelivery
    /// is a no-op.
    async fn dead_letter_event(
        &self,
        event: &InboundEvent,
        cause: &MimicError,
    ) -> Result<Outcome, MimicError> {
        let reason = cause.to_string();
        let payload = serde_json::to_string(event)?;
        error!(error = %cause, "update.dead_lettered");
        self.store
            .dead_letter(Some(event.event_id), &payload, &reason)
            .await?;
        self.store.mark_processed(event.event_id, Utc::now()).await?;
        Ok(Outcome::DeadLettered { reason })
    }

    async fn record_audit(
        &self,
        event: &InboundEvent,
        outcome: &Outcome,
        trigger: Option<&'static str>,
        processing_ms: i64,
    ) {
        let (reply_text, error) = match outcome {
            Outcome::Replied { text, .. } => (Some(text.clone()), None),
            Outcome::DeadLettered { reason } => (None, Some(reason.clone())),
            _ => (None, None),
        };
        self.write_audit(AuditEntry {
            event_id: event.event_id,
            chat_id: event.chat_id,
            sender_id: Some(event.sender_id),
            trigger: trigger.map(String::from),
            outcome: outcome.audit(),
            reply_text,
            processing_ms: Some(processing_ms),
            error,
        })
        .await;
    }

    async fn write_audit(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.log(&entry).await {
            warn!("audit write failed for event {}: {e}", entry.event_id);
        }
    }

    /// Bound an external call by the per-call timeout.
    pub(super) async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T, MimicError>
    where
        F: Future<Output = Result<T, MimicError>>,
    {
        let limit = Duration::from_secs(self.worker.io_timeout_secs);
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(MimicError::Timeout(format!(
                "{what} exceeded {}s",
                limit.as_secs()
            ))),
        }
    }
}

/// What a completed cycle reports back.
pub(super) struct Cycle {
    pub outcome: Outcome,
    pub trigger: Option<&'static str>,
}
