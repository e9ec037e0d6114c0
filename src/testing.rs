//! Test doubles shared by the consumer and API tests.

use crate::consumer::Consumer;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mimic_core::{
    config::{ChatConfig, Config},
    decision::PromptContext,
    error::MimicError,
    event::{EventKind, InboundEvent},
    traits::{DispatchReceipt, Generator, ReplyDispatcher},
};
use mimic_memory::Store;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CHAT_ID: i64 = -100;
pub const BOT_ID: i64 = 999;

/// Generator that counts calls and answers with a fixed reply.
pub struct MockGenerator {
    pub reply: String,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub delay: Option<Duration>,
    pub prompts: Mutex<Vec<PromptContext>>,
}

impl MockGenerator {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for MockGenerator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, prompt: &PromptContext) -> Result<String, MimicError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(MimicError::Unavailable("backend down".into()));
        }
        Ok(self.reply.clone())
    }
}

/// Transport that records every send.
#[derive(Default)]
pub struct MockTransport {
    pub sent: Mutex<Vec<(i64, String, String)>>,
    pub fail: AtomicBool,
}

impl MockTransport {
    pub fn sends(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl ReplyDispatcher for MockTransport {
    async fn send(
        &self,
        chat_id: i64,
        text: &str,
        idempotency_key: &str,
    ) -> Result<DispatchReceipt, MimicError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MimicError::Delivery("connection reset".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((chat_id, text.to_string(), idempotency_key.to_string()));
        Ok(DispatchReceipt {
            message_id: Some(5000 + sent.len() as i64),
            duplicate: false,
        })
    }
}

/// Config with deterministic decisions: no random replies, 60s cooldown.
pub fn config() -> Config {
    let mut config = Config::default();
    config.chat = ChatConfig {
        chat_id: CHAT_ID,
        reply_chat_id: None,
        bot_username: "MimicBot".into(),
        bot_user_id: Some(BOT_ID),
    };
    config.decision.reply_probability = 0.0;
    config.decision.cooldown_secs = 60;
    config.telegram.webhook_secret = "s3cret".into();
    config
}

pub fn t0() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

pub fn event(event_id: i64, text: &str) -> InboundEvent {
    InboundEvent {
        event_id,
        chat_id: CHAT_ID,
        sender_id: 7,
        sender_name: Some("Ana".into()),
        text: text.to_string(),
        timestamp: t0(),
        kind: EventKind::Text,
        message_id: Some(event_id + 100),
        sender_username: Some("ana".into()),
        sender_is_bot: false,
        reply_to_message_id: None,
    }
}

/// A consumer wired to mocks over `store`.
pub struct Harness {
    pub consumer: Arc<Consumer>,
    pub generator: Arc<MockGenerator>,
    pub transport: Arc<MockTransport>,
    pub store: Store,
}

impl Harness {
    pub async fn new(config: &Config) -> Self {
        let store = Store::in_memory().await.unwrap();
        Self::on(store, config, MockGenerator::new("haha same. we should go."))
    }

    pub fn on(store: Store, config: &Config, generator: MockGenerator) -> Self {
        let generator = Arc::new(generator);
        let transport = Arc::new(MockTransport::default());
        let consumer = Arc::new(Consumer::new(
            store.clone(),
            generator.clone(),
            transport.clone(),
            config,
        ));
        Self {
            consumer,
            generator,
            transport,
            store,
        }
    }

    /// A fresh consumer over the same store, as after a process restart.
    pub fn restart(&self, config: &Config) -> Self {
        let generator = Arc::new(MockGenerator::new(&self.generator.reply));
        let transport = Arc::new(MockTransport::default());
        let consumer = Arc::new(Consumer::new(
            self.store.clone(),
            generator.clone(),
            transport.clone(),
            config,
        ));
        Self {
            consumer,
            generator,
            transport,
            store: self.store.clone(),
        }
    }
}
