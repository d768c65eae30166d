//! Typed metrics surface (specification §6 names the gauges/counters; this
//! gives them a home instead of scattering raw `tracing::info!` calls).
//!
//! Grounded on the teacher's per-layer instrumentation approach
//! (`engine/src/instrumentation.rs`): plain atomics behind an `Arc`, cheap
//! to clone and share across background tasks.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide metrics. Clone is cheap (all fields are `Arc`-shared
/// atomics); every subsystem gets its own clone at construction time.
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    buffer_depth: AtomicI64,
    buffer_dropped_total: AtomicU64,
    wal_segment_count: AtomicI64,
    wal_pending_bytes: AtomicI64,
    embedding_duration_ms_total: AtomicU64,
    embedding_duration_count: AtomicU64,
    search_duration_ms_total: AtomicU64,
    search_duration_count: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// `buffer.depth` gauge.
    pub fn set_buffer_depth(&self, depth: i64) {
        self.inner.buffer_depth.store(depth, Ordering::Relaxed);
    }

    pub fn buffer_depth(&self) -> i64 {
        self.inner.buffer_depth.load(Ordering::Relaxed)
    }

    /// `buffer.dropped_total` counter.
    pub fn incr_buffer_dropped(&self, by: u64) {
        self.inner.buffer_dropped_total.fetch_add(by, Ordering::Relaxed);
    }

    pub fn buffer_dropped_total(&self) -> u64 {
        self.inner.buffer_dropped_total.load(Ordering::Relaxed)
    }

    /// `wal.segment_count` gauge.
    pub fn set_wal_segment_count(&self, count: i64) {
        self.inner.wal_segment_count.store(count, Ordering::Relaxed);
    }

    pub fn wal_segment_count(&self) -> i64 {
        self.inner.wal_segment_count.load(Ordering::Relaxed)
    }

    /// `wal.pending_bytes` gauge.
    pub fn set_wal_pending_bytes(&self, bytes: i64) {
        self.inner.wal_pending_bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn wal_pending_bytes(&self) -> i64 {
        self.inner.wal_pending_bytes.load(Ordering::Relaxed)
    }

    /// `embedding.duration` histogram, recorded as a running sum/count so a
    /// mean is always cheaply available; a real exporter can still read the
    /// underlying sum+count as histogram bucket inputs.
    pub fn record_embedding_duration_ms(&self, ms: u64) {
        self.inner.embedding_duration_ms_total.fetch_add(ms, Ordering::Relaxed);
        self.inner.embedding_duration_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn embedding_duration_mean_ms(&self) -> f64 {
        mean(
            self.inner.embedding_duration_ms_total.load(Ordering::Relaxed),
            self.inner.embedding_duration_count.load(Ordering::Relaxed),
        )
    }

    /// `search.duration` histogram.
    pub fn record_search_duration_ms(&self, ms: u64) {
        self.inner.search_duration_ms_total.fetch_add(ms, Ordering::Relaxed);
        self.inner.search_duration_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn search_duration_mean_ms(&self) -> f64 {
        mean(
            self.inner.search_duration_ms_total.load(Ordering::Relaxed),
            self.inner.search_duration_count.load(Ordering::Relaxed),
        )
    }
}

fn mean(total: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_gauge_and_counter() {
        let m = Metrics::new();
        m.set_buffer_depth(42);
        assert_eq!(m.buffer_depth(), 42);
        m.incr_buffer_dropped(3);
        m.incr_buffer_dropped(2);
        assert_eq!(m.buffer_dropped_total(), 5);
    }

    #[test]
    fn duration_mean_with_no_samples_is_zero() {
        let m = Metrics::new();
        assert_eq!(m.embedding_duration_mean_ms(), 0.0);
    }

    #[test]
    fn duration_mean_averages_samples() {
        let m = Metrics::new();
        m.record_search_duration_ms(10);
        m.record_search_duration_ms(20);
        assert_eq!(m.search_duration_mean_ms(), 15.0);
    }

    #[test]
    fn metrics_clone_shares_state() {
        let m = Metrics::new();
        let clone = m.clone();
        clone.set_wal_segment_count(7);
        assert_eq!(m.wal_segment_count(), 7);
    }
}
