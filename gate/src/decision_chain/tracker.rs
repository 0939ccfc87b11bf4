//! `DecisionChainTracker` (spec §4.2).
//!
//! Mirrors the shape of `AuditPipeline`: an `Arc`-wrapped inner core with
//! atomic counters, a `parking_lot`-guarded optional sender, and a
//! `JoinSet` of background workers. The difference is the extra memory
//! mode used when no database handle is configured, and a strictly
//! closed-tracker error on shutdown rather than a fallback write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError, Sender};
use tokio::task::JoinSet;
use tracing::warn;
use uuid::Uuid;

use super::entry::{DecisionEntry, DecisionOutcome, DecisionType, RiskLevel};
use super::hash::compute_audit_hash;
use super::summary::ChainSummary;
use crate::db::Database;
use crate::error::{CoreError, CoreResult};

/// Entries queued for the async worker pool per invocation of
/// `RecordDecision` are bounded by this fixed channel capacity; the
/// configured `async_workers` value only changes how many workers drain
/// it (spec §4.2's "queue capacity" is a worker-count knob, not a
/// channel-size knob).
const ASYNC_QUEUE_CAPACITY: usize = 1_000;

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub system_id: String,
    /// 0 forces synchronous writes; negative creates the async queue
    /// with no draining workers; positive spawns that many workers.
    pub async_workers: i64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            system_id: "unknown".to_string(),
            async_workers: 2,
        }
    }
}

/// Lightweight transparency record a policy evaluator hands the tracker
/// instead of building a `DecisionEntry` by hand (spec §4.2,
/// `RecordFromTransparencyInfo`).
#[derive(Debug, Clone, Default)]
pub struct TransparencyInfo {
    pub chain_id: String,
    pub request_id: String,
    pub parent_request_id: Option<String>,
    pub step_number: i64,
    pub org_id: String,
    pub tenant_id: String,
    pub client_id: Option<String>,
    pub user_id: Option<String>,
    pub system_id: Option<String>,
    pub model_provider: Option<String>,
    pub model_id: Option<String>,
    pub policies_evaluated: Vec<String>,
    pub risk_level: RiskLevel,
    pub requires_human_review: bool,
    pub processing_time_ms: i64,
    pub data_sources: Vec<String>,
}

#[derive(Debug, Default)]
struct Counters {
    decisions_recorded: AtomicU64,
    chains_created: AtomicU64,
    record_errors: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackerStats {
    pub decisions_recorded: u64,
    pub chains_created: u64,
    pub record_errors: u64,
    pub async_pending: u64,
    pub memory_mode: bool,
    pub memory_chains: u64,
}

struct Inner {
    config: TrackerConfig,
    db: Option<Database>,
    memory: Mutex<HashMap<String, Vec<DecisionEntry>>>,
    tx: Mutex<Option<Sender<DecisionEntry>>>,
    closed: AtomicBool,
    counters: Counters,
    tasks: Mutex<JoinSet<()>>,
}

/// Append-only, tamper-evident, ordered decision-step record. See spec
/// §4.2.
#[derive(Clone)]
pub struct DecisionChainTracker(Arc<Inner>);

impl DecisionChainTracker {
    /// `db = None` selects memory mode (spec §4.2 "absent ⇒ memory mode
    /// used for testing"); `async_workers` is otherwise ignored in that
    /// mode since there is nothing to enqueue towards.
    pub fn new(config: TrackerConfig, db: Option<Database>) -> Self {
        let inner = Arc::new(Inner {
            config,
            db: db.clone(),
            memory: Mutex::new(HashMap::new()),
            tx: Mutex::new(None),
            closed: AtomicBool::new(false),
            counters: Counters::default(),
            tasks: Mutex::new(JoinSet::new()),
        });

        if let Some(db) = db {
            let async_workers = inner.config.async_workers;
            if async_workers != 0 {
                let (tx, rx) = mpsc::channel(ASYNC_QUEUE_CAPACITY);
                *inner.tx.lock() = Some(tx);

                if async_workers > 0 {
                    let shared_rx = Arc::new(tokio::sync::Mutex::new(rx));
                    let mut tasks = inner.tasks.lock();
                    for _ in 0..async_workers {
                        let inner = Arc::clone(&inner);
                        let rx = Arc::clone(&shared_rx);
                        let db = db.clone();
                        tasks.spawn(async move { async_worker(inner, db, rx).await });
                    }
                }
                // async_workers < 0: the channel exists (so enqueue
                // attempts succeed up to capacity) but nothing drains
                // it, so every call past that capacity falls through to
                // a synchronous write. `rx` is simply dropped here.
            }
        }

        Self(inner)
    }

    pub async fn record_decision(&self, mut entry: DecisionEntry) -> CoreResult<DecisionEntry> {
        if self.0.closed.load(Ordering::SeqCst) {
            return Err(CoreError::TrackerClosed);
        }

        if entry.id.is_nil() {
            entry.id = Uuid::new_v4();
        }
        entry.created_at = Utc::now();
        if entry.system_id.is_empty() {
            entry.system_id = self.0.config.system_id.clone();
        }
        entry.audit_hash = compute_audit_hash(&entry);

        self.0.counters.decisions_recorded.fetch_add(1, Ordering::Relaxed);

        let Some(db) = self.0.db.as_ref() else {
            let mut memory = self.0.memory.lock();
            let is_new_chain = !memory.contains_key(&entry.chain_id);
            memory.entry(entry.chain_id.clone()).or_default().push(entry.clone());
            if is_new_chain {
                self.0.counters.chains_created.fetch_add(1, Ordering::Relaxed);
            }
            return Ok(entry);
        };

        let tx = self.0.tx.lock().clone();
        if let Some(tx) = tx {
            match tx.try_send(entry.clone()) {
                Ok(()) => return Ok(entry),
                Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                    // Falls through to the synchronous write below.
                }
            }
        }

        if let Err(e) = db.insert_decision(&entry).await {
            self.0.counters.record_errors.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }
        Ok(entry)
    }

    pub async fn record_from_transparency_info(
        &self,
        info: TransparencyInfo,
        decision_type: DecisionType,
        outcome: DecisionOutcome,
    ) -> CoreResult<DecisionEntry> {
        let mut entry = DecisionEntry::new(
            info.chain_id,
            info.request_id,
            info.org_id,
            info.tenant_id,
            info.step_number,
            decision_type,
            outcome,
        );
        entry.parent_request_id = info.parent_request_id;
        entry.client_id = info.client_id;
        entry.user_id = info.user_id;
        if let Some(system_id) = info.system_id {
            entry.system_id = system_id;
        }
        entry.model_provider = info.model_provider;
        entry.model_id = info.model_id;
        entry.policies_evaluated = info.policies_evaluated;
        entry.risk_level = info.risk_level;
        entry.requires_human_review = info.requires_human_review;
        entry.processing_time_ms = info.processing_time_ms;
        entry.data_sources = info.data_sources;

        if outcome == DecisionOutcome::Blocked {
            if let Some(last) = entry.policies_evaluated.last() {
                entry.policy_triggered = Some(last.clone());
            }
        }

        self.record_decision(entry).await
    }

    pub async fn get_chain(&self, chain_id: &str) -> CoreResult<Vec<DecisionEntry>> {
        match &self.0.db {
            Some(db) => db.fetch_chain(chain_id).await,
            None => {
                let memory = self.0.memory.lock();
                let mut entries = memory.get(chain_id).cloned().unwrap_or_default();
                entries.sort_by_key(|e| e.step_number);
                Ok(entries)
            }
        }
    }

    pub async fn get_chain_summary(&self, chain_id: &str) -> CoreResult<Option<ChainSummary>> {
        let entries = self.get_chain(chain_id).await?;
        if entries.is_empty() {
            return Ok(None);
        }
        Ok(Some(ChainSummary::from_entries(chain_id, &entries)))
    }

    pub async fn get_recent_chains(
        &self,
        org_id: &str,
        tenant_id: &str,
        since: Duration,
        limit: usize,
    ) -> CoreResult<Vec<ChainSummary>> {
        let cutoff = Utc::now() - chrono::Duration::from_std(since).unwrap_or_default();

        match &self.0.db {
            Some(db) => {
                let chain_ids = db
                    .fetch_recent_chain_ids(org_id, tenant_id, cutoff, limit as i64)
                    .await?;
                let mut summaries = Vec::with_capacity(chain_ids.len());
                for chain_id in chain_ids {
                    let entries = db.fetch_chain(&chain_id).await?;
                    if !entries.is_empty() {
                        summaries.push(ChainSummary::from_entries(&chain_id, &entries));
                    }
                }
                Ok(summaries)
            }
            None => {
                let memory = self.0.memory.lock();
                let mut summaries: Vec<ChainSummary> = memory
                    .iter()
                    .filter(|(_, entries)| {
                        entries
                            .iter()
                            .any(|e| e.org_id == org_id && e.tenant_id == tenant_id && e.created_at >= cutoff)
                    })
                    .map(|(chain_id, entries)| ChainSummary::from_entries(chain_id, entries))
                    .collect();
                summaries.sort_by(|a, b| b.last_decision_at.cmp(&a.last_decision_at));
                summaries.truncate(limit);
                Ok(summaries)
            }
        }
    }

    pub fn stats(&self) -> TrackerStats {
        let async_pending = self
            .0
            .tx
            .lock()
            .as_ref()
            .map(|tx| (ASYNC_QUEUE_CAPACITY - tx.capacity()) as u64)
            .unwrap_or(0);

        TrackerStats {
            decisions_recorded: self.0.counters.decisions_recorded.load(Ordering::Relaxed),
            chains_created: self.0.counters.chains_created.load(Ordering::Relaxed),
            record_errors: self.0.counters.record_errors.load(Ordering::Relaxed),
            async_pending,
            memory_mode: self.0.db.is_none(),
            memory_chains: self.0.memory.lock().len() as u64,
        }
    }

    pub async fn shutdown(&self, timeout: Duration) -> CoreResult<()> {
        self.0.closed.store(true, Ordering::SeqCst);
        self.0.tx.lock().take();

        let mut set = {
            let mut tasks = self.0.tasks.lock();
            std::mem::take(&mut *tasks)
        };
        let drain = async {
            while set.join_next().await.is_some() {}
        };

        tokio::time::timeout(timeout, drain)
            .await
            .map_err(|_| CoreError::Cancelled("decision chain tracker shutdown timed out".into()))
    }
}

async fn async_worker(
    inner: Arc<Inner>,
    db: Database,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<DecisionEntry>>>,
) {
    loop {
        let entry = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(entry) = entry else { return };

        let write = db.insert_decision(&entry);
        match tokio::time::timeout(Duration::from_secs(5), write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, chain_id = %entry.chain_id, "decision chain async write failed");
                inner.counters.record_errors.fetch_add(1, Ordering::Relaxed);
            }
            Err(_elapsed) => {
                warn!(chain_id = %entry.chain_id, "decision chain async write timed out");
                inner.counters.record_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(chain_id: &str, step: i64, outcome: DecisionOutcome, risk: RiskLevel) -> DecisionEntry {
        let mut e = DecisionEntry::new(
            chain_id,
            format!("req-{step}"),
            "org-1",
            "tenant-1",
            step,
            DecisionType::PolicyEnforcement,
            outcome,
        );
        e.risk_level = risk;
        e
    }

    #[tokio::test]
    async fn memory_mode_orders_chain_by_step_number() {
        let tracker = DecisionChainTracker::new(TrackerConfig::default(), None);
        tracker
            .record_decision(entry("chain-a", 2, DecisionOutcome::Approved, RiskLevel::Limited))
            .await
            .unwrap();
        tracker
            .record_decision(entry("chain-a", 1, DecisionOutcome::Approved, RiskLevel::Limited))
            .await
            .unwrap();

        let chain = tracker.get_chain("chain-a").await.unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].step_number, 1);
        assert_eq!(chain[1].step_number, 2);
    }

    #[tokio::test]
    async fn memory_mode_fills_missing_fields() {
        let tracker = DecisionChainTracker::new(TrackerConfig::default(), None);
        let recorded = tracker
            .record_decision(entry("chain-b", 1, DecisionOutcome::Approved, RiskLevel::Limited))
            .await
            .unwrap();

        assert!(!recorded.id.is_nil());
        assert!(!recorded.audit_hash.is_empty());
        assert_eq!(recorded.system_id, "unknown");
    }

    #[tokio::test]
    async fn chains_created_counts_distinct_chains_once() {
        let tracker = DecisionChainTracker::new(TrackerConfig::default(), None);
        tracker
            .record_decision(entry("chain-c", 1, DecisionOutcome::Approved, RiskLevel::Limited))
            .await
            .unwrap();
        tracker
            .record_decision(entry("chain-c", 2, DecisionOutcome::Approved, RiskLevel::Limited))
            .await
            .unwrap();
        tracker
            .record_decision(entry("chain-d", 1, DecisionOutcome::Approved, RiskLevel::Limited))
            .await
            .unwrap();

        let stats = tracker.stats();
        assert_eq!(stats.chains_created, 2);
        assert_eq!(stats.decisions_recorded, 3);
        assert!(stats.memory_mode);
    }

    #[tokio::test]
    async fn chain_summary_matches_recorded_entries() {
        let tracker = DecisionChainTracker::new(TrackerConfig::default(), None);
        tracker
            .record_decision(entry("chain-e", 1, DecisionOutcome::Blocked, RiskLevel::High))
            .await
            .unwrap();

        let summary = tracker.get_chain_summary("chain-e").await.unwrap().unwrap();
        assert_eq!(summary.total_steps, 1);
        assert!(summary.has_blocked);
        assert_eq!(summary.highest_risk_level, RiskLevel::High);
    }

    #[tokio::test]
    async fn missing_chain_summary_is_none() {
        let tracker = DecisionChainTracker::new(TrackerConfig::default(), None);
        assert!(tracker.get_chain_summary("no-such-chain").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_after_shutdown_returns_closed_error() {
        let tracker = DecisionChainTracker::new(TrackerConfig::default(), None);
        tracker.shutdown(Duration::from_secs(1)).await.unwrap();

        let err = tracker
            .record_decision(entry("chain-f", 1, DecisionOutcome::Approved, RiskLevel::Limited))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::TrackerClosed));
    }
}
