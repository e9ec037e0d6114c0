//! One processing cycle, step by step.

use super::{Consumer, Cycle, Outcome};
use chrono::{DateTime, Utc};
use mimic_core::{
    context::ConversationContext,
    decision::{decide, is_from_bot, PromptContext, RandomSource},
    error::MimicError,
    event::InboundEvent,
    sanitize::trim_reply,
    traits::{ContextStore, DedupStore, ReplyDispatcher, ReplyLedger, SentReply},
};
use tracing::{debug, info};

impl Consumer {
    pub(super) async fn run_cycle(
        &self,
        event: &InboundEvent,
        now: DateTime<Utc>,
        random: &mut dyn RandomSource,
    ) -> Result<Cycle, MimicError> {
        // --- 1. DEDUP ---
        if self.bounded("dedup check", self.store.has(event.event_id)).await? {
            info!("update.duplicate");
            return Ok(Cycle {
                outcome: Outcome::Duplicate,
                trigger: None,
            });
        }

        // --- 2. CONTEXT ---
        let mut context = self.load_context(event.chat_id).await?;

        // --- 3. HISTORY + 4. STYLE ---
        let appended = context.append(event.to_message(), self.memory.history_limit);
        if appended && !is_from_bot(event, &self.chat) {
            context.style_profile = context.style_profile.updated(&event.text, &self.style);
        }
        if !appended {
            debug!("event already in history, replaying cycle");
        }

        // --- 5. DECISION + 6. GENERATE + DISPATCH ---
        let (outcome, trigger) = match self.find_sent(event).await? {
            Some(sent) => {
                // A previous attempt already replied: restore its effect
                // without a new decision or random draw.
                info!("reply already sent by an earlier attempt");
                context.record_reply(sent.sent_at, sent.message_id);
                let outcome = Outcome::Replied {
                    text: sent.text,
                    fresh: false,
                };
                (outcome, None)
            }
            None => {
                let decision = decide(event, &context, &self.chat, &self.decision, now, random);
                info!(
                    should_reply = decision.should_reply,
                    trigger = decision.trigger.as_str(),
                    "reply.decision"
                );
                let outcome = match decision.prompt_context {
                    Some(prompt) if decision.should_reply => {
                        self.reply(event, &prompt, &mut context, now).await?
                    }
                    _ => {
                        context.record_no_reply();
                        Outcome::NoReply
                    }
                };
                (outcome, Some(decision.trigger.as_str()))
            }
        };

        // --- 7. PERSIST ---
        self.bounded("context save", self.store.save(&context))
            .await?;
        self.cache.put(context);

        // --- 8. MARK PROCESSED ---
        self.bounded("dedup mark", self.store.mark(event.event_id))
            .await?;

        Ok(Cycle { outcome, trigger })
    }

    /// The ledger entry for a reply to `event`, if one already went out.
    async fn find_sent(&self, event: &InboundEvent) -> Result<Option<SentReply>, MimicError> {
        let key = event.event_id.to_string();
        self.bounded("ledger lookup", self.store.find(&key)).await
    }

    /// Cache first, then the store, then a fresh context.
    async fn load_context(&self, chat_id: i64) -> Result<ConversationContext, MimicError> {
        if let Some(context) = self.cache.get(chat_id) {
            return Ok(context);
        }
        let stored = self.bounded("context load", self.store.load(chat_id)).await?;
        Ok(stored.unwrap_or_else(|| {
            debug!("no stored context for chat {chat_id}, starting fresh");
            ConversationContext::new(chat_id)
        }))
    }

    async fn reply(
        &self,
        event: &InboundEvent,
        prompt: &PromptContext,
        context: &mut ConversationContext,
        now: DateTime<Utc>,
    ) -> Result<Outcome, MimicError> {
        let key = event.event_id.to_string();

        let generated = self
            .bounded("generation", self.generator.generate(prompt))
            .await
            .map_err(|e| match e {
                e if e.is_transient() => e,
                other => MimicError::Unavailable(format!(
                    "{} failed: {other}",
                    self.generator.name()
                )),
            })?;

        let text = trim_reply(&generated, self.worker.max_reply_sentences);
        if text.is_empty() {
            info!("reply.empty");
            context.record_no_reply();
            return Ok(Outcome::Empty);
        }

        let receipt = self
            .bounded(
                "dispatch",
                self.dispatcher.send(self.chat.reply_target(), &text, &key),
            )
            .await?;
        context.record_reply(now, receipt.message_id);
        info!(
            message_id = receipt.message_id,
            chars = text.chars().count(),
            "reply.sent"
        );

        Ok(Outcome::Replied {
            text,
            fresh: !receipt.duplicate,
        })
    }
}
