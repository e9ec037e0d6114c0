use super::worker::{drain_once, prune};
use super::*;
use crate::testing::{config, event, t0, Harness, MockGenerator, BOT_ID, CHAT_ID};
use chrono::Duration as ChronoDuration;
use mimic_core::traits::{ContextStore, DedupStore, ReplyLedger, SentReply};
use mimic_memory::store::QueuePolicy;
use std::sync::atomic::Ordering;

fn secs(n: i64) -> ChronoDuration {
    ChronoDuration::seconds(n)
}

fn is_fresh_reply(outcome: &Outcome) -> bool {
    matches!(outcome, Outcome::Replied { fresh: true, .. })
}

// ---------------------------------------------------------------------------
// Idempotence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_duplicate_delivery_makes_no_calls() {
    let h = Harness::new(&config()).await;
    let e = event(42, "anyone seen the new trailer?");

    let first = h.consumer.process_at(&e, t0()).await.unwrap();
    assert!(is_fresh_reply(&first));
    assert_eq!(h.generator.calls(), 1);
    assert_eq!(h.transport.sends(), 1);

    let second = h.consumer.process_at(&e, t0() + secs(1)).await.unwrap();
    assert_eq!(second, Outcome::Duplicate);
    assert_eq!(h.generator.calls(), 1);
    assert_eq!(h.transport.sends(), 1);
}

#[tokio::test]
async fn test_reply_is_keyed_by_event_id() {
    let h = Harness::new(&config()).await;
    h.consumer
        .process_at(&event(42, "pizza tonight?"), t0())
        .await
        .unwrap();

    let sent = h.transport.sent.lock().unwrap();
    assert_eq!(sent[0].0, CHAT_ID);
    assert_eq!(sent[0].2, "42");
    drop(sent);

    let ledger = h.store.find("42").await.unwrap().unwrap();
    assert_eq!(ledger.text, "haha same. we should go.");
}

// ---------------------------------------------------------------------------
// Decision rules through the full cycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cooldown_allows_one_reply_in_ten_seconds() {
    let h = Harness::new(&config()).await;

    let first = h
        .consumer
        .process_at(&event(1, "lunch anyone?"), t0())
        .await
        .unwrap();
    let second = h
        .consumer
        .process_at(&event(2, "what about sushi?"), t0() + secs(10))
        .await
        .unwrap();

    assert!(is_fresh_reply(&first));
    assert_eq!(second, Outcome::NoReply);
    assert_eq!(h.transport.sends(), 1);

    // Both events still count as processed.
    assert!(h.store.has(1).await.unwrap());
    assert!(h.store.has(2).await.unwrap());
}

#[tokio::test]
async fn test_mention_replies_during_cooldown() {
    let h = Harness::new(&config()).await;
    h.consumer
        .process_at(&event(1, "lunch anyone?"), t0())
        .await
        .unwrap();

    let outcome = h
        .consumer
        .process_at(&event(2, "@MimicBot are you there?"), t0() + secs(5))
        .await
        .unwrap();
    assert!(is_fresh_reply(&outcome));
    assert_eq!(h.transport.sends(), 2);

    let prompts = h.generator.prompts.lock().unwrap();
    assert_eq!(prompts[1].trigger.as_str(), "mention");
    assert_eq!(prompts[1].current.event_id, 2);
}

#[tokio::test]
async fn test_reply_to_bot_counts_as_mention() {
    let h = Harness::new(&config()).await;
    h.consumer
        .process_at(&event(1, "lunch anyone?"), t0())
        .await
        .unwrap();
    let bot_message_id = h.consumer.store().load(CHAT_ID).await.unwrap().unwrap().last_bot_message_id;
    assert_eq!(bot_message_id, Some(5001));

    let mut reply = event(2, "lol fair");
    reply.reply_to_message_id = bot_message_id;
    let outcome = h.consumer.process_at(&reply, t0() + secs(3)).await.unwrap();
    assert!(is_fresh_reply(&outcome));
}

#[tokio::test]
async fn test_bot_messages_never_trigger() {
    let h = Harness::new(&config()).await;

    let mut own = event(1, "@MimicBot are you there?");
    own.sender_id = BOT_ID;
    assert_eq!(
        h.consumer.process_at(&own, t0()).await.unwrap(),
        Outcome::NoReply
    );

    let mut by_username = event(2, "anyone?");
    by_username.sender_id = 12345;
    by_username.sender_is_bot = true;
    by_username.sender_username = Some("mimicbot".into());
    assert_eq!(
        h.consumer.process_at(&by_username, t0()).await.unwrap(),
        Outcome::NoReply
    );

    assert_eq!(h.generator.calls(), 0);
    assert_eq!(h.transport.sends(), 0);

    // Kept in history, but the bot's voice does not shape the group style.
    let context = h.store.load(CHAT_ID).await.unwrap().unwrap();
    assert_eq!(context.recent_messages.len(), 2);
    assert_eq!(context.style_profile.message_count, 0);
}

#[tokio::test]
async fn test_seeded_sampling_is_reproducible() {
    let mut cfg = config();
    cfg.decision.reply_probability = 0.5;
    cfg.decision.cooldown_secs = 0;
    cfg.decision.seed = Some(7);

    let mut runs = Vec::new();
    for _ in 0..2 {
        let h = Harness::new(&cfg).await;
        let mut replied = Vec::new();
        for id in 1..=20 {
            let outcome = h
                .consumer
                .process_at(&event(id, &format!("lol {id}")), t0() + secs(id))
                .await
                .unwrap();
            if matches!(outcome, Outcome::Replied { .. }) {
                replied.push(id);
            }
        }
        runs.push(replied);
    }

    assert_eq!(runs[0], runs[1]);
    assert!(!runs[0].is_empty());
    assert!(runs[0].len() < 20);
}

// ---------------------------------------------------------------------------
// Context and style
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_history_keeps_most_recent_n() {
    let mut cfg = config();
    cfg.memory.history_limit = 5;
    let h = Harness::new(&cfg).await;

    for id in 1..=10 {
        h.consumer
            .process_at(&event(id, &format!("message {id}")), t0() + secs(id))
            .await
            .unwrap();
    }

    let context = h.store.load(CHAT_ID).await.unwrap().unwrap();
    let ids: Vec<i64> = context.recent_messages.iter().map(|m| m.event_id).collect();
    assert_eq!(ids, vec![6, 7, 8, 9, 10]);
    assert_eq!(context.style_profile.message_count, 10);
}

#[tokio::test]
async fn test_prompt_carries_history_and_style() {
    let mut cfg = config();
    cfg.decision.context_messages = 3;
    let h = Harness::new(&cfg).await;

    for id in 1..=4 {
        h.consumer
            .process_at(&event(id, "lmao ok"), t0() + secs(id))
            .await
            .unwrap();
    }
    h.consumer
        .process_at(&event(5, "who's in lmao?"), t0() + secs(5))
        .await
        .unwrap();

    let prompts = h.generator.prompts.lock().unwrap();
    let prompt = &prompts[0];
    let ids: Vec<i64> = prompt.history.iter().map(|m| m.event_id).collect();
    assert_eq!(ids, vec![3, 4, 5]);
    assert!(prompt.style_guidance.is_some());
}

#[tokio::test]
async fn test_reply_is_trimmed_to_sentence_budget() {
    let mut cfg = config();
    cfg.worker.max_reply_sentences = 1;
    let h = Harness::on(
        mimic_memory::Store::in_memory().await.unwrap(),
        &cfg,
        MockGenerator::new("Totally. Me too. See you there."),
    );

    let outcome = h
        .consumer
        .process_at(&event(1, "movie later?"), t0())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        Outcome::Replied {
            text: "Totally.".into(),
            fresh: true
        }
    );
}

#[tokio::test]
async fn test_empty_generation_is_silence() {
    let h = Harness::on(
        mimic_memory::Store::in_memory().await.unwrap(),
        &config(),
        MockGenerator::new("   "),
    );

    let outcome = h
        .consumer
        .process_at(&event(1, "movie later?"), t0())
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Empty);
    assert_eq!(h.transport.sends(), 0);
    assert!(h.store.has(1).await.unwrap());

    // No reply means no cooldown.
    let context = h.store.load(CHAT_ID).await.unwrap().unwrap();
    assert!(context.last_reply_timestamp().is_none());
    assert_eq!(context.cooldown.consecutive_no_reply_count, 1);
}

#[tokio::test]
async fn test_replies_go_to_reply_chat() {
    let mut cfg = config();
    cfg.chat.reply_chat_id = Some(-200);
    let h = Harness::new(&cfg).await;

    h.consumer
        .process_at(&event(1, "movie later?"), t0())
        .await
        .unwrap();
    assert_eq!(h.transport.sent.lock().unwrap()[0].0, -200);
}

// ---------------------------------------------------------------------------
// Failures and crash recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_generator_failure_leaves_event_for_redelivery() {
    let h = Harness::new(&config()).await;
    h.generator.fail.store(true, Ordering::SeqCst);

    let e = event(1, "movie later?");
    let err = h.consumer.process_at(&e, t0()).await.unwrap_err();
    assert!(err.is_transient());
    assert!(!h.store.has(1).await.unwrap());
    assert!(h.store.load(CHAT_ID).await.unwrap().is_none());
    assert!(!h.consumer.cache.is_warm(CHAT_ID));

    h.generator.fail.store(false, Ordering::SeqCst);
    let outcome = h.consumer.process_at(&e, t0() + secs(30)).await.unwrap();
    assert!(is_fresh_reply(&outcome));
    assert_eq!(h.transport.sends(), 1);

    // The retried message is in history exactly once.
    let context = h.store.load(CHAT_ID).await.unwrap().unwrap();
    assert_eq!(context.recent_messages.len(), 1);
    assert_eq!(context.style_profile.message_count, 1);
}

#[tokio::test]
async fn test_dispatch_failure_is_transient() {
    let h = Harness::new(&config()).await;
    h.transport.fail.store(true, Ordering::SeqCst);

    let err = h
        .consumer
        .process_at(&event(1, "movie later?"), t0())
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert!(!h.store.has(1).await.unwrap());
    assert!(h.store.find("1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_restart_after_mark_does_not_reprocess() {
    let cfg = config();
    let h = Harness::new(&cfg).await;
    let e = event(7, "@MimicBot you up?");
    h.consumer.process_at(&e, t0()).await.unwrap();

    let restarted = h.restart(&cfg);
    let outcome = restarted.consumer.process_at(&e, t0() + secs(2)).await.unwrap();
    assert_eq!(outcome, Outcome::Duplicate);
    assert_eq!(restarted.generator.calls(), 0);
    assert_eq!(restarted.transport.sends(), 0);
}

#[tokio::test]
async fn test_restart_before_mark_does_not_reply_twice() {
    let cfg = config();
    let h = Harness::new(&cfg).await;
    let e = event(7, "@MimicBot you up?");
    h.consumer.process_at(&e, t0()).await.unwrap();

    // Lose the processed record: context saved, event not marked.
    h.store
        .prune(chrono::Utc::now() + ChronoDuration::days(1))
        .await
        .unwrap();
    assert!(!h.store.has(7).await.unwrap());

    let restarted = h.restart(&cfg);
    let outcome = restarted.consumer.process_at(&e, t0() + secs(2)).await.unwrap();
    assert!(matches!(outcome, Outcome::Replied { fresh: false, .. }));
    assert_eq!(restarted.generator.calls(), 0);
    assert_eq!(restarted.transport.sends(), 0);
    assert!(h.store.has(7).await.unwrap());

    let context = h.store.load(CHAT_ID).await.unwrap().unwrap();
    assert_eq!(context.recent_messages.len(), 1);
    assert_eq!(context.style_profile.message_count, 1);
}

#[tokio::test]
async fn test_restart_after_send_before_save_reuses_ledger() {
    let cfg = config();
    let h = Harness::new(&cfg).await;

    // Reply went out, then the process died before persisting anything else.
    h.store
        .record(&SentReply {
            idempotency_key: "9".into(),
            chat_id: CHAT_ID,
            text: "on my way".into(),
            message_id: Some(777),
            sent_at: t0(),
        })
        .await
        .unwrap();

    let outcome = h
        .consumer
        .process_at(&event(9, "@MimicBot where are you"), t0() + secs(1))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        Outcome::Replied {
            text: "on my way".into(),
            fresh: false
        }
    );
    assert_eq!(h.generator.calls(), 0);
    assert_eq!(h.transport.sends(), 0);

    let context = h.store.load(CHAT_ID).await.unwrap().unwrap();
    assert_eq!(context.last_bot_message_id, Some(777));
    assert_eq!(context.last_reply_timestamp(), Some(t0()));
}

async fn seed_sent(h: &Harness, key: &str, text: &str) {
    h.store
        .record(&SentReply {
            idempotency_key: key.into(),
            chat_id: CHAT_ID,
            text: text.into(),
            message_id: Some(777),
            sent_at: t0(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_ledger_hit_restores_cooldown_without_a_trigger() {
    let h = Harness::new(&config()).await;
    seed_sent(&h, "9", "same lol").await;

    // Nothing in the message would trigger a reply on its own.
    let outcome = h
        .consumer
        .process_at(&event(9, "just chilling"), t0() + secs(1))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        Outcome::Replied {
            text: "same lol".into(),
            fresh: false
        }
    );
    let context = h.store.load(CHAT_ID).await.unwrap().unwrap();
    assert_eq!(context.last_reply_timestamp(), Some(t0()));
    assert_eq!(context.last_bot_message_id, Some(777));
    assert_eq!(context.cooldown.consecutive_no_reply_count, 0);

    // The restored cooldown silences the next question.
    let next = h
        .consumer
        .process_at(&event(10, "anyone there?"), t0() + secs(5))
        .await
        .unwrap();
    assert_eq!(next, Outcome::NoReply);
    assert_eq!(h.generator.calls(), 0);
    assert_eq!(h.transport.sends(), 0);
}

#[tokio::test]
async fn test_question_reply_survives_restart_before_mark() {
    let cfg = config();
    let h = Harness::new(&cfg).await;
    let e = event(11, "pizza tonight?");
    assert!(is_fresh_reply(&h.consumer.process_at(&e, t0()).await.unwrap()));

    h.store
        .prune(chrono::Utc::now() + ChronoDuration::days(1))
        .await
        .unwrap();

    let restarted = h.restart(&cfg);
    let outcome = restarted.consumer.process_at(&e, t0() + secs(2)).await.unwrap();
    assert!(matches!(outcome, Outcome::Replied { fresh: false, .. }));
    assert_eq!(restarted.generator.calls(), 0);
    assert_eq!(restarted.transport.sends(), 0);

    let context = h.store.load(CHAT_ID).await.unwrap().unwrap();
    assert_eq!(context.recent_messages.len(), 1);
    assert_eq!(context.cooldown.consecutive_no_reply_count, 0);
    assert!(context.last_reply_timestamp().is_some());
}

#[tokio::test]
async fn test_question_reply_survives_restart_before_save() {
    let h = Harness::new(&config()).await;
    seed_sent(&h, "12", "yes pls").await;

    let outcome = h
        .consumer
        .process_at(&event(12, "pizza tonight?"), t0() + secs(1))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        Outcome::Replied {
            text: "yes pls".into(),
            fresh: false
        }
    );
    assert_eq!(h.generator.calls(), 0);
    assert_eq!(h.transport.sends(), 0);
    assert!(h.store.has(12).await.unwrap());
}

#[tokio::test]
async fn test_sampled_reply_survives_restart_before_mark() {
    let mut cfg = config();
    cfg.decision.reply_probability = 1.0;
    cfg.decision.cooldown_secs = 0;
    let h = Harness::new(&cfg).await;
    let e = event(13, "lol");
    assert!(is_fresh_reply(&h.consumer.process_at(&e, t0()).await.unwrap()));

    h.store
        .prune(chrono::Utc::now() + ChronoDuration::days(1))
        .await
        .unwrap();

    // With sampling off the redelivery can only be recovered from the ledger.
    let restarted = h.restart(&config());
    let outcome = restarted.consumer.process_at(&e, t0() + secs(2)).await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Replied {
            text: "haha same. we should go.".into(),
            fresh: false
        }
    );
    assert_eq!(restarted.generator.calls(), 0);
    assert_eq!(restarted.transport.sends(), 0);
    assert!(h.store.has(13).await.unwrap());
}

#[tokio::test]
async fn test_sampled_reply_survives_restart_before_save() {
    let h = Harness::new(&config()).await;
    seed_sent(&h, "14", "lmao").await;

    let outcome = h
        .consumer
        .process_at(&event(14, "lol"), t0() + secs(1))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        Outcome::Replied {
            text: "lmao".into(),
            fresh: false
        }
    );
    assert_eq!(h.generator.calls(), 0);
    assert_eq!(h.transport.sends(), 0);

    let context = h.store.load(CHAT_ID).await.unwrap().unwrap();
    assert_eq!(context.last_bot_message_id, Some(777));
    assert_eq!(context.recent_messages.len(), 1);
}

#[tokio::test]
async fn test_corrupt_context_is_dead_lettered() {
    let h = Harness::new(&config()).await;
    sqlx::query(
        "INSERT INTO conversation_contexts (chat_id, context_json, updated_at) VALUES (?, ?, ?)",
    )
    .bind(CHAT_ID)
    .bind("{not json")
    .bind("2024-01-01T00:00:00Z")
    .execute(h.store.pool())
    .await
    .unwrap();

    let outcome = h
        .consumer
        .process_at(&event(3, "movie later?"), t0())
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::DeadLettered { .. }));
    assert_eq!(h.store.dead_letter_count().await.unwrap(), 1);
    assert!(h.store.has(3).await.unwrap());
    assert_eq!(h.generator.calls(), 0);
}

#[tokio::test]
async fn test_cycle_past_deadline_is_abandoned() {
    let mut cfg = config();
    cfg.worker.cycle_deadline_secs = 1;
    let mut slow = MockGenerator::new("finally.");
    slow.delay = Some(std::time::Duration::from_secs(3));
    let h = Harness::on(mimic_memory::Store::in_memory().await.unwrap(), &cfg, slow);

    let err = h
        .consumer
        .process_at(&event(1, "movie later?"), t0())
        .await
        .unwrap_err();
    assert!(matches!(err, MimicError::Timeout(_)));
    assert!(!h.store.has(1).await.unwrap());
    assert_eq!(h.transport.sends(), 0);
}

#[tokio::test]
async fn test_every_cycle_is_audited() {
    let h = Harness::new(&config()).await;
    let e = event(1, "movie later?");
    h.consumer.process_at(&e, t0()).await.unwrap();
    h.consumer.process_at(&e, t0()).await.unwrap();
    h.consumer
        .process_at(&event(2, "ok"), t0() + secs(1))
        .await
        .unwrap();

    let counts = h.consumer.audit.outcome_counts().await.unwrap();
    assert_eq!(
        counts,
        vec![
            ("duplicate".to_string(), 1),
            ("no_reply".to_string(), 1),
            ("replied".to_string(), 1),
        ]
    );
}

// ---------------------------------------------------------------------------
// Local queue worker
// ---------------------------------------------------------------------------

fn policy(max_attempts: i64) -> QueuePolicy {
    QueuePolicy {
        lease_secs: 60,
        max_attempts,
        backoff_base_secs: 0,
        backoff_max_secs: 0,
    }
}

#[tokio::test]
async fn test_worker_drains_in_order() {
    let h = Harness::new(&config()).await;
    h.store.enqueue_event(&event(1, "movie later?")).await.unwrap();
    h.store.enqueue_event(&event(2, "ok")).await.unwrap();

    assert!(drain_once(&h.consumer, &policy(5)).await.unwrap());
    assert!(drain_once(&h.consumer, &policy(5)).await.unwrap());
    assert!(!drain_once(&h.consumer, &policy(5)).await.unwrap());

    let stats = h.store.queue_stats().await.unwrap();
    assert_eq!(stats.done, 2);
    let context = h.store.load(CHAT_ID).await.unwrap().unwrap();
    let ids: Vec<i64> = context.recent_messages.iter().map(|m| m.event_id).collect();
    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn test_worker_retries_then_dead_letters() {
    let h = Harness::new(&config()).await;
    h.generator.fail.store(true, Ordering::SeqCst);
    h.store.enqueue_event(&event(1, "movie later?")).await.unwrap();

    // First attempt fails and is released for retry.
    assert!(drain_once(&h.consumer, &policy(2)).await.unwrap());
    assert_eq!(h.store.queue_stats().await.unwrap().pending, 1);
    assert_eq!(h.store.dead_letter_count().await.unwrap(), 0);

    // Second attempt exhausts the budget.
    assert!(drain_once(&h.consumer, &policy(2)).await.unwrap());
    let stats = h.store.queue_stats().await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(h.store.dead_letter_count().await.unwrap(), 1);
    assert_eq!(h.transport.sends(), 0);
}

#[tokio::test]
async fn test_worker_dead_letters_undecodable_rows() {
    let h = Harness::new(&config()).await;
    sqlx::query(
        "INSERT INTO event_queue (event_id, payload_json, status, attempts, created_at) \
         VALUES (5, 'garbage', 'pending', 0, '2024-01-01T00:00:00Z')",
    )
    .execute(h.store.pool())
    .await
    .unwrap();

    assert!(drain_once(&h.consumer, &policy(5)).await.unwrap());
    assert_eq!(h.store.dead_letter_count().await.unwrap(), 1);
    assert_eq!(h.store.queue_stats().await.unwrap().done, 1);
}

#[tokio::test]
async fn test_prune_respects_retention() {
    let cfg = config();
    let h = Harness::new(&cfg).await;
    h.consumer
        .process_at(&event(1, "movie later?"), t0())
        .await
        .unwrap();

    // Rows well past the retention window in every append-only table.
    h.store
        .record(&SentReply {
            idempotency_key: "77".into(),
            chat_id: CHAT_ID,
            text: "old reply".into(),
            message_id: Some(1),
            sent_at: t0(),
        })
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO audit_log (id, event_id, chat_id, outcome, created_at) \
         VALUES ('old', 77, -100, 'replied', '2020-01-01 00:00:00')",
    )
    .execute(h.store.pool())
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO dead_letters (id, event_id, payload, reason, created_at) \
         VALUES ('old', 78, '{}', 'corrupt', '2020-01-01T00:00:00.000000Z')",
    )
    .execute(h.store.pool())
    .await
    .unwrap();

    let report = prune(&h.store, &cfg.memory).await.unwrap();
    assert_eq!(report.processed, 0);
    assert_eq!(report.replies, 1);
    assert_eq!(report.audit, 1);
    assert_eq!(report.dead_letters, 1);

    assert!(h.store.has(1).await.unwrap());
    assert!(h.store.find("77").await.unwrap().is_none());
    assert!(h.store.find("1").await.unwrap().is_some());
    assert_eq!(h.store.dead_letter_count().await.unwrap(), 0);
    let recent = h.consumer.audit.recent(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].event_id, 1);
}
