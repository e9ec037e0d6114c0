//! Background loops: the local queue pull worker and store maintenance.

use super::Consumer;
use chrono::{Duration as ChronoDuration, Utc};
use mimic_core::{config::MemoryConfig, error::MimicError, traits::DedupStore};
use mimic_memory::store::{QueuePolicy, QueueStatus, QueuedEvent};
use mimic_memory::{AuditLogger, Store};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Drain the SQLite queue until the task is aborted.
pub async fn pull_loop(consumer: Arc<Consumer>, policy: QueuePolicy, poll_interval: Duration) {
    info!(
        "queue worker running | lease {}s | max attempts {}",
        policy.lease_secs, policy.max_attempts
    );
    loop {
        match drain_once(&consumer, &policy).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => error!("queue worker: {e}"),
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Reap exhausted leases, then claim and process at most one event.
///
/// Returns whether an event was claimed.
pub async fn drain_once(consumer: &Consumer, policy: &QueuePolicy) -> Result<bool, MimicError> {
    let store = consumer.store();

    for row in store.reap_exhausted_events(policy, Utc::now()).await? {
        warn!(
            "queue: event {} abandoned after {} attempts",
            row.event_id, row.attempts
        );
        dead_letter_row(consumer, &row, "delivery attempts exhausted").await;
    }

    let Some(row) = store.claim_next_event(policy, Utc::now()).await? else {
        return Ok(false);
    };
    debug!("queue: claimed event {} (attempt {})", row.event_id, row.attempts);

    let event = match row.event() {
        Ok(event) => event,
        Err(e) => {
            dead_letter_row(consumer, &row, &e.to_string()).await;
            store.mark_event_done(row.id).await?;
            return Ok(true);
        }
    };

    match consumer.process(&event).await {
        Ok(_) => store.mark_event_done(row.id).await?,
        Err(e) => {
            let status = store
                .mark_event_failed(row.id, &e.to_string(), policy, Utc::now())
                .await?;
            if status == QueueStatus::Failed {
                let reason = format!("delivery attempts exhausted: {e}");
                dead_letter_row(consumer, &row, &reason).await;
            }
        }
    }
    Ok(true)
}

async fn dead_letter_row(consumer: &Consumer, row: &QueuedEvent, reason: &str) {
    error!("queue: dead-lettering event {}: {reason}", row.event_id);
    if let Err(e) = consumer
        .store()
        .record_dead_letter(Some(row.event_id), &row.payload_json, reason)
        .await
    {
        error!("queue: dead letter write failed for event {}: {e}", row.event_id);
    }
}

/// Periodically prune records past the retention window.
pub async fn maintenance_loop(store: Store, memory: MemoryConfig) {
    loop {
        tokio::time::sleep(Duration::from_secs(memory.prune_interval_secs)).await;
        if let Err(e) = prune(&store, &memory).await {
            warn!("maintenance: {e}");
        }
    }
}

/// Rows removed by one pruning pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    pub processed: u64,
    pub queue_rows: u64,
    pub replies: u64,
    pub audit: u64,
    pub dead_letters: u64,
}

impl PruneReport {
    pub fn total(&self) -> u64 {
        self.processed + self.queue_rows + self.replies + self.audit + self.dead_letters
    }
}

/// One pruning pass over every append-only table.
///
/// Every table shares the dedup retention window, so a sent-reply row never
/// expires before the processed record of its event.
pub async fn prune(store: &Store, memory: &MemoryConfig) -> Result<PruneReport, MimicError> {
    let cutoff = Utc::now() - ChronoDuration::hours(memory.dedup_retention_hours as i64);
    let report = PruneReport {
        processed: store.prune(cutoff).await?,
        queue_rows: store.purge_done_events(cutoff).await?,
        replies: store.prune_replies(cutoff).await?,
        audit: AuditLogger::new(store.pool().clone()).prune(cutoff).await?,
        dead_letters: store.prune_dead_letters(cutoff).await?,
    };
    if report.total() > 0 {
        info!(
            "maintenance: pruned {} processed records, {} queue rows, {} replies, {} audit rows, {} dead letters",
            report.processed, report.queue_rows, report.replies, report.audit, report.dead_letters
        );
    }
    Ok(report)
}
