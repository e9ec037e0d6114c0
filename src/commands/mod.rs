//! Operator commands: `status`, `prune`, `replay`.
//!
//! Each handler returns the text to print so it can be tested without a
//! terminal.


use crate::consumer::worker;
use mimic_channels::parse_update;
use mimic_core::{config::Config, error::MimicError, traits::EventQueue};
use mimic_memory::{AuditLogger, Store};

/// Summarize configuration, queue and store state.
pub async fn status(store: &Store, config: &Config, config_path: &str) -> Result<String, MimicError> {
    let audit = AuditLogger::new(store.pool().clone());
    let queue = store.queue_stats().await?;
    let outcomes = audit.outcome_counts().await?;
    let db_size = store
        .db_size()
        .await
        .map(format_bytes)
        .unwrap_or_else(|_| "unknown".to_string());

    let mut out = format!(
        "{} status\n\n\
         Config: {config_path}\n\
         Chat: {} (replies to {})\n\
         Queue backend: {:?}\n\
         Model: {}\n\
         Database: {db_size}\n\n\
         Queue: {} pending, {} processing, {} done, {} failed\n\
         Processed events: {}\n\
         Replies sent: {}\n\
         Dead letters: {}\n",
        config.mimic.name,
        config.chat.chat_id,
        config.chat.reply_target(),
        config.queue.backend,
        config.provider.model,
        queue.pending,
        queue.processing,
        queue.done,
        queue.failed,
        store.processed_count().await?,
        store.reply_count().await?,
        store.dead_letter_count().await?,
    );

    if !outcomes.is_empty() {
        out.push_str("\nOutcomes:\n");
        for (outcome, count) in &outcomes {
            out.push_str(&format!("  {outcome}: {count}\n"));
        }
    }

    let dead = store.recent_dead_letters(5).await?;
    if !dead.is_empty() {
        out.push_str("\nRecent dead letters:\n");
        for d in &dead {
            let id = d.event_id.map_or_else(|| "-".to_string(), |id| id.to_string());
            out.push_str(&format!("  [{}] event {id}: {}\n", d.created_at, d.reason));
        }
    }

    Ok(out)
}

/// Run one retention pass; optionally drop the stored context so the next
/// event starts from a fresh one.
pub async fn prune(store: &Store, config: &Config, reset_context: bool) -> Result<String, MimicError> {
    let report = worker::prune(store, &config.memory).await?;
    let mut out = format!(
        "Pruned {} processed records, {} finished queue rows, {} sent replies, {} audit rows and {} dead letters.",
        report.processed, report.queue_rows, report.replies, report.audit, report.dead_letters
    );
    if reset_context {
        let removed = store.delete_context(config.chat.chat_id).await?;
        out.push_str(if removed {
            "\nConversation context reset."
        } else {
            "\nNo stored conversation context."
        });
    }
    Ok(out)
}

/// Feed a raw Telegram update through ingestion: parse, filter, enqueue.
pub async fn replay(raw: &[u8], config: &Config, queue: &dyn EventQueue) -> Result<String, MimicError> {
    let event = parse_update(raw)?;
    if event.chat_id != config.chat.chat_id {
        return Ok(format!(
            "Dropped event {}: chat {} is not {}.",
            event.event_id, event.chat_id, config.chat.chat_id
        ));
    }
    queue.enqueue(&event).await?;
    Ok(format!(
        "Queued event {} on {}: {}",
        event.event_id,
        queue.name(),
        event.preview()
    ))
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
