//! Background flush loop: woken by a periodic ticker, a non-blocking
//! threshold signal, or drain/shutdown, the same three-source scheduling
//! shape as the teacher's `BufferedDurability` flush thread
//! (`engine/src/durability/buffered.rs`), translated from a `Condvar` to
//! `tokio::sync::Notify` for the async flush path.

use crate::Inner;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const MIN_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(2);

pub(crate) fn spawn(inner: Arc<Inner>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(inner.config.flush_timeout);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = inner.flush_signal.notified() => {}
            }

            if let Err(e) = flush_once(&inner).await {
                tracing::error!(error = %e, "ingest flush loop iteration failed");
            }
            inner.flush_completed.notify_waiters();

            let empty = inner.state.lock().await.buffer.is_empty();
            if inner.stop.load(Ordering::Acquire) && empty {
                break;
            }
        }
        tracing::info!("ingest flush loop stopped");
    })
}

/// One flush pass: snapshot the buffer without clearing it, bulk-insert,
/// then on success trim the front and advance the WAL checkpoint. Retries
/// the insert itself with capped exponential backoff on failure, since the
/// invariant is that no acked event may disappear without landing in the
/// store or staying in the WAL — giving up would do neither.
async fn flush_once(inner: &Inner) -> akashi_core::Result<()> {
    let batch: Vec<akashi_core::AgentEvent> = {
        let state = inner.state.lock().await;
        state.buffer.iter().cloned().collect()
    };
    if batch.is_empty() {
        return Ok(());
    }

    let mut delay = MIN_BACKOFF;
    loop {
        match inner.storage.insert_events(&batch).await {
            Ok(()) => break,
            Err(e) => {
                tracing::warn!(error = %e, batch_len = batch.len(), "flush attempt failed, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_BACKOFF);
            }
        }
    }

    let depth = {
        let mut state = inner.state.lock().await;
        state.buffer.drain(..batch.len());
        state.buffer.len()
    };
    inner.wal.checkpoint(batch.len() as u64)?;
    inner.metrics.set_buffer_depth(depth as i64);
    Ok(())
}
