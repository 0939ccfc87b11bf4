//! Metrics batcher.
//!
//! A single worker that coalesces metric entries into periodic
//! `policy_metrics` upserts rather than one round-trip per metric.
//! Grounded in the teacher's `MetricsCollector` atomics-plus-buffer
//! pattern (`observability.rs`), adapted from an in-memory snapshot to
//! a flush-to-database batcher per spec §4.1.

use std::time::Duration;

use tokio::sync::mpsc::Receiver;
use tokio::time::interval;
use tracing::warn;

use crate::audit::entry::AuditEntry;
use crate::db::Database;

const FLUSH_SIZE: usize = 100;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run(mut rx: Receiver<AuditEntry>, db: Database) {
    let mut buffer: Vec<AuditEntry> = Vec::with_capacity(FLUSH_SIZE);
    let mut ticker = interval(FLUSH_INTERVAL);
    // The first tick fires immediately; skip it so we don't flush an
    // empty buffer on startup.
    ticker.tick().await;

    loop {
        tokio::select! {
            maybe_entry = rx.recv() => {
                match maybe_entry {
                    Some(entry) => {
                        buffer.push(entry);
                        if buffer.len() >= FLUSH_SIZE {
                            flush(&db, &mut buffer).await;
                        }
                    }
                    None => {
                        flush(&db, &mut buffer).await;
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush(&db, &mut buffer).await;
                }
            }
        }
    }
}

/// A metric whose details omit `policy_id` is silently dropped, per
/// spec §4.1. `policy_type` defaults to `"unknown"` if the evaluator
/// didn't tag the triggering check with one.
async fn flush(db: &Database, buffer: &mut Vec<AuditEntry>) {
    for entry in buffer.drain(..) {
        let Some(policy_id) = entry.details.get_str("policy_id") else {
            continue;
        };
        let policy_type = entry.details.get_str("policy_type").unwrap_or_else(|| "unknown".to_string());
        let blocked = entry.details.get_bool("blocked").unwrap_or(false);
        if let Err(e) = db.upsert_policy_metric(&policy_id, &policy_type, blocked).await {
            warn!(policy_id, error = %e, "failed to upsert policy metric");
        }
    }
}
