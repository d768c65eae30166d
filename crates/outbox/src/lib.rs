//! Search-outbox drain worker (component C6): applies queued `upsert`/
//! `delete` mutations to the ANN index at least once, in insertion order.
//!
//! Grounded on the teacher's generic supervised-background-task shape
//! (`engine/src/background.rs`): a `tokio::spawn`ed loop with an
//! `AtomicBool` stop flag and panic-safe bookkeeping, ticking on a poll
//! interval rather than a work-queue signal since there's no in-process
//! producer to notify it (writers land outbox rows via Postgres, not an
//! in-memory channel).

use akashi_core::{DecisionId, OutboxOp, Result};
use akashi_search::AnnIndexWriter;
use akashi_storage::Storage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const MIN_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Outcome of draining one claimed batch, surfaced for logging/tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub claimed: usize,
    pub applied: usize,
    pub failed: usize,
}

struct Inner {
    storage: Storage,
    ann: Arc<dyn AnnIndexWriter>,
    batch_size: i64,
    poll_interval: Duration,
    stop: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the running drain worker. Cheap to clone.
#[derive(Clone)]
pub struct OutboxWorker {
    inner: Arc<Inner>,
}

impl OutboxWorker {
    pub fn new(storage: Storage, ann: Arc<dyn AnnIndexWriter>, batch_size: i64, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                ann,
                batch_size,
                poll_interval,
                stop: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        }
    }

    /// Spawn the background drain loop. Calling twice without an
    /// intervening `stop` leaks the first task's handle but is otherwise
    /// harmless; callers are expected to call this once at startup.
    pub async fn start(&self) {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { run_loop(inner).await });
        *self.inner.task.lock().await = Some(handle);
    }

    /// Stop the loop and wait (briefly) for its current iteration to finish.
    pub async fn stop(&self) {
        self.inner.stop.store(true, Ordering::Release);
        if let Some(handle) = self.inner.task.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
    }

    /// Claim and drain exactly one batch. Exposed directly so tests and
    /// manual operator tooling don't have to wait on the poll interval.
    pub async fn drain_once(&self) -> Result<DrainStats> {
        drain_one_batch(&self.inner).await
    }
}

async fn run_loop(inner: Arc<Inner>) {
    let mut consecutive_empty_or_failed = 0u32;
    loop {
        if inner.stop.load(Ordering::Acquire) {
            break;
        }

        match drain_one_batch(&inner).await {
            Ok(stats) if stats.claimed == 0 => {
                consecutive_empty_or_failed = 0;
                tokio::time::sleep(inner.poll_interval).await;
            }
            Ok(stats) if stats.failed > 0 => {
                consecutive_empty_or_failed += 1;
                let backoff = (MIN_BACKOFF * 2u32.pow(consecutive_empty_or_failed.min(8))).min(MAX_BACKOFF);
                tracing::warn!(failed = stats.failed, applied = stats.applied, ?backoff, "outbox batch had failures");
                tokio::time::sleep(backoff).await;
            }
            Ok(_) => {
                consecutive_empty_or_failed = 0;
            }
            Err(e) => {
                consecutive_empty_or_failed += 1;
                let backoff = (MIN_BACKOFF * 2u32.pow(consecutive_empty_or_failed.min(8))).min(MAX_BACKOFF);
                tracing::error!(error = %e, ?backoff, "failed to claim outbox batch");
                tokio::time::sleep(backoff).await;
            }
        }
    }
    tracing::info!("outbox drain loop stopped");
}

/// Claim up to `batch_size` rows and apply each to the ANN index in order.
/// A row that fails to apply is released (attempts bumped, stays in the
/// table) rather than dropped; rows past the deadletter threshold are
/// logged loudly but — per specification §4.6 — never removed.
async fn drain_one_batch(inner: &Inner) -> Result<DrainStats> {
    let rows = inner.storage.claim_outbox_batch(inner.batch_size).await?;
    let mut stats = DrainStats { claimed: rows.len(), applied: 0, failed: 0 };

    for row in rows {
        let outcome = apply_row(inner, row.decision_id, row.op).await;
        match outcome {
            Ok(()) => {
                inner.storage.mark_outbox_sent(row.id).await?;
                stats.applied += 1;
            }
            Err(e) => {
                let attempts = inner.storage.release_outbox_claim(row.id).await?;
                stats.failed += 1;
                if attempts >= akashi_core::SearchOutboxRow::DEADLETTER_THRESHOLD {
                    tracing::warn!(
                        outbox_id = row.id, decision_id = %row.decision_id, attempts, error = %e,
                        "outbox row past deadletter threshold, still retained"
                    );
                } else {
                    tracing::warn!(outbox_id = row.id, decision_id = %row.decision_id, attempts, error = %e, "outbox apply failed");
                }
            }
        }
    }

    Ok(stats)
}

async fn apply_row(inner: &Inner, decision_id: DecisionId, op: OutboxOp) -> Result<()> {
    match op {
        OutboxOp::Delete => inner.ann.delete(decision_id),
        OutboxOp::Upsert => match inner.storage.get_decision_by_id(decision_id).await? {
            Some(decision) => inner.ann.upsert(&decision),
            None => {
                tracing::debug!(%decision_id, "outbox upsert for a decision no longer present, skipping");
                Ok(())
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_stats_default_is_all_zero() {
        let stats = DrainStats::default();
        assert_eq!(stats.claimed, 0);
        assert_eq!(stats.applied, 0);
        assert_eq!(stats.failed, 0);
    }
}
