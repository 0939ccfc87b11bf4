//! Durable audit pipeline (spec §4.1).
//!
//! Dual-mode sync/async logging with bounded queues, retrying workers,
//! local-file fallback, and startup replay. The worker pool shape
//! mirrors the teacher's `ObservabilityPlane` (an `Arc`-wrapped shared
//! core with interior-mutable counters) generalized from an in-memory
//! metrics plane to a persistence pipeline with real background tasks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError, Sender};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::audit::batcher;
use crate::audit::entry::{AuditEntry, EntryType, Severity};
use crate::audit::fallback::Fallback;
use crate::config::{AuditConfig, PipelineMode};
use crate::db::Database;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub mode: &'static str,
    pub queued: u64,
    pub processed: u64,
    pub failed: u64,
    pub pending: u64,
}

struct Inner {
    config: AuditConfig,
    db: Database,
    fallback: Fallback,
    violation_tx: Mutex<Option<Sender<AuditEntry>>>,
    metrics_tx: Mutex<Option<Sender<AuditEntry>>>,
    violation_capacity: usize,
    closed: AtomicBool,
    counters: Counters,
    tasks: Mutex<JoinSet<()>>,
}

/// Asynchronous, crash-resilient logging pipeline. See spec §4.1.
#[derive(Clone)]
pub struct AuditPipeline(Arc<Inner>);

impl AuditPipeline {
    pub fn new(config: AuditConfig, db: Database) -> CoreResult<Self> {
        let fallback = Fallback::open(&config.fallback_path)?;
        let (violation_tx, violation_rx) = mpsc::channel(config.violation_queue_capacity);
        let (metrics_tx, metrics_rx) = mpsc::channel(config.metrics_queue_capacity);
        let violation_capacity = config.violation_queue_capacity;

        let inner = Arc::new(Inner {
            config,
            db: db.clone(),
            fallback,
            violation_tx: Mutex::new(Some(violation_tx)),
            metrics_tx: Mutex::new(Some(metrics_tx)),
            violation_capacity,
            closed: AtomicBool::new(false),
            counters: Counters::default(),
            tasks: Mutex::new(JoinSet::new()),
        });

        let worker_count = inner.config.worker_count;
        let shared_rx = Arc::new(tokio::sync::Mutex::new(violation_rx));
        {
            let mut tasks = inner.tasks.lock();
            for _ in 0..worker_count {
                let inner = Arc::clone(&inner);
                let rx = Arc::clone(&shared_rx);
                tasks.spawn(async move { worker_loop(inner, rx).await });
            }
            let db = db.clone();
            tasks.spawn(async move { batcher::run(metrics_rx, db).await });
        }

        Ok(Self(inner))
    }

    pub async fn log_violation(&self, entry: AuditEntry) -> CoreResult<()> {
        self.log_durable(entry, EntryType::Violation).await
    }

    pub async fn log_gateway_context(&self, entry: AuditEntry) -> CoreResult<()> {
        self.log_durable(entry, EntryType::GatewayContext).await
    }

    pub async fn log_llm_call_audit(&self, entry: AuditEntry) -> CoreResult<()> {
        self.log_durable(entry, EntryType::LlmCallAudit).await
    }

    /// Shared dual-mode policy for violation-class entries (violation,
    /// gateway_context, llm_call_audit, and the `audit` type submitted
    /// via `LogViolation` per spec §9's naming note).
    async fn log_durable(&self, mut entry: AuditEntry, entry_type: EntryType) -> CoreResult<()> {
        entry.entry_type = entry_type;
        entry.timestamp = chrono::Utc::now();

        if self.0.closed.load(Ordering::SeqCst) {
            self.0.fallback.append(&entry)?;
            return Ok(());
        }

        match self.0.config.mode {
            PipelineMode::Compliance => {
                match self.0.db.write_audit_entry(&mut entry).await {
                    Ok(()) => {
                        self.0.counters.processed.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    }
                    Err(e) => {
                        self.0.counters.failed.fetch_add(1, Ordering::Relaxed);
                        error!(error = %e, "compliance-mode write exhausted retries, writing to fallback");
                        self.0.fallback.append(&entry)?;
                        Ok(())
                    }
                }
            }
            PipelineMode::Performance => {
                let tx = self.0.violation_tx.lock().clone();
                match tx {
                    None => self.0.fallback.append(&entry).map_err(Into::into),
                    Some(tx) => match tx.try_send(entry) {
                        Ok(()) => {
                            self.0.counters.queued.fetch_add(1, Ordering::Relaxed);
                            Ok(())
                        }
                        Err(TrySendError::Full(entry)) | Err(TrySendError::Closed(entry)) => {
                            self.0.fallback.append(&entry).map_err(Into::into)
                        }
                    },
                }
            }
        }
    }

    /// Always enqueues; metrics are best-effort and are dropped
    /// silently on overflow or after shutdown, per spec §4.1.
    pub async fn log_metric(&self, mut entry: AuditEntry) -> CoreResult<()> {
        entry.entry_type = EntryType::Metric;
        entry.timestamp = chrono::Utc::now();

        let tx = self.0.metrics_tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.try_send(entry);
        }
        Ok(())
    }

    /// Reads the fallback file, attempts a synchronous write for each
    /// entry, and atomically rewrites the file to contain only the
    /// entries that still fail. Returns the count recovered.
    pub async fn recover_from_fallback(&self) -> CoreResult<usize> {
        let entries = self.0.fallback.read_all()?;
        let mut still_failing = Vec::new();
        let mut recovered = 0;

        for mut entry in entries {
            match self.0.db.write_audit_entry(&mut entry).await {
                Ok(()) => recovered += 1,
                Err(e) => {
                    error!(error = %e, "fallback entry still failing after recovery attempt");
                    still_failing.push(entry);
                }
            }
        }

        self.0.fallback.atomic_rewrite(&still_failing)?;
        info!(recovered, remaining = still_failing.len(), "fallback recovery complete");
        Ok(recovered)
    }

    pub fn stats(&self) -> PipelineStats {
        let pending = self
            .0
            .violation_tx
            .lock()
            .as_ref()
            .map(|tx| (self.0.violation_capacity - tx.capacity()) as u64)
            .unwrap_or(0);

        PipelineStats {
            mode: match self.0.config.mode {
                PipelineMode::Compliance => "compliance",
                PipelineMode::Performance => "performance",
            },
            queued: self.0.counters.queued.load(Ordering::Relaxed),
            processed: self.0.counters.processed.load(Ordering::Relaxed),
            failed: self.0.counters.failed.load(Ordering::Relaxed),
            pending,
        }
    }

    /// Marks the pipeline closed, drops both queue senders so the
    /// worker pool drains and exits, and waits for that drain bounded
    /// by `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> CoreResult<()> {
        self.0.closed.store(true, Ordering::SeqCst);
        self.0.violation_tx.lock().take();
        self.0.metrics_tx.lock().take();

        let mut set = {
            let mut tasks = self.0.tasks.lock();
            std::mem::take(&mut *tasks)
        };
        let drain = async {
            while set.join_next().await.is_some() {}
        };

        tokio::time::timeout(timeout, drain)
            .await
            .map_err(|_| CoreError::Cancelled("audit pipeline shutdown timed out".into()))
    }
}

async fn worker_loop(inner: Arc<Inner>, rx: Arc<tokio::sync::Mutex<mpsc::Receiver<AuditEntry>>>) {
    loop {
        let entry = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(mut entry) = entry else { return };

        match inner.db.write_audit_entry(&mut entry).await {
            Ok(()) => {
                inner.counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "violation worker exhausted retries, writing to fallback");
                if let Err(fallback_err) = inner.fallback.append(&entry) {
                    error!(error = %fallback_err, "fallback write also failed, entry lost");
                }
            }
        }
    }
}

pub fn severity_from_str(s: &str) -> Severity {
    match s.to_ascii_uppercase().as_str() {
        "CRITICAL" => Severity::Critical,
        "HIGH" => Severity::High,
        "MEDIUM" => Severity::Medium,
        _ => Severity::Low,
    }
}
