//! Crash-durable write-ahead log (component C1).
//!
//! `Wal` is the public facade: `write` appends and assigns LSNs,
//! `recover` replays everything since the last checkpoint at startup,
//! `checkpoint` advances the flushed-LSN watermark and reclaims segments,
//! `close` performs a final sync. Everything below (`format`, `segment`,
//! `writer`, `reader`, `checkpoint`) is the on-disk mechanics; `inspect` is
//! a read-only diagnostic scan used by metrics and operator tooling.

pub mod checkpoint;
pub mod format;
pub mod inspect;
pub mod reader;
pub mod segment;
pub mod writer;

use akashi_core::config::WalConfig;
use akashi_core::{Error, Result};
use format::WalRecord;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use writer::WalWriter;

pub use checkpoint::Checkpoint;
pub use inspect::InspectReport;

/// Crash-durable append log, shared across the writer and the background
/// batch-sync task. Cheap to clone: every field is `Arc`-shared, so clones
/// refer to the same on-disk log and the same background sync task.
#[derive(Clone)]
pub struct Wal {
    dir: PathBuf,
    writer: Arc<Mutex<WalWriter>>,
    flushed_lsn: Arc<Mutex<u64>>,
    stop_background_sync: Arc<AtomicBool>,
}

impl Wal {
    /// Open the log at `dir`, recovering the writer's bookkeeping from
    /// whatever segments already exist. Does not replay records into
    /// memory — call [`Wal::recover`] separately for that.
    pub fn open(dir: impl AsRef<Path>, config: WalConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let writer = WalWriter::open(&dir, config.clone())?;
        let flushed_lsn = checkpoint::read_checkpoint(&dir)?
            .map(|c| c.flushed_lsn)
            .unwrap_or(0);

        let wal = Self {
            dir: dir.clone(),
            writer: Arc::new(Mutex::new(writer)),
            flushed_lsn: Arc::new(Mutex::new(flushed_lsn)),
            stop_background_sync: Arc::new(AtomicBool::new(false)),
        };

        if matches!(config.sync_mode, akashi_core::config::WalSyncMode::Batch) {
            wal.spawn_background_sync(config.sync_interval);
        }

        Ok(wal)
    }

    fn spawn_background_sync(&self, interval: Duration) {
        let writer = Arc::clone(&self.writer);
        let stop = Arc::clone(&self.stop_background_sync);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = writer.lock().force_sync() {
                    tracing::warn!(error = %e, "background WAL sync failed");
                }
            }
        });
    }

    /// Append `payloads`, returning only after the configured durability
    /// level is satisfied. Serialized payloads are opaque to the WAL;
    /// `akashi-ingest` is responsible for their encoding.
    pub fn write(&self, payloads: &[Vec<u8>]) -> Result<Vec<u64>> {
        self.writer.lock().write(payloads)
    }

    /// Replay every record persisted beyond the last checkpoint. Intended
    /// to run once at startup before accepting new writes.
    pub fn recover(&self) -> Result<Vec<WalRecord>> {
        let flushed = *self.flushed_lsn.lock();
        let all = reader::recover_all(&self.dir)?;
        Ok(all.into_iter().filter(|r| r.lsn > flushed).collect())
    }

    /// Advance the flushed-LSN watermark by `flushed_count` (the number of
    /// records C2 just durably applied to the event store) and reclaim any
    /// segment that is now wholly redundant.
    pub fn checkpoint(&self, flushed_count: u64) -> Result<()> {
        let mut flushed_lsn = self.flushed_lsn.lock();
        *flushed_lsn += flushed_count;
        checkpoint::write_checkpoint(&self.dir, Checkpoint { flushed_lsn: *flushed_lsn })?;
        checkpoint::reclaim_segments(&self.dir, *flushed_lsn)?;
        Ok(())
    }

    /// Read-only diagnostic scan, used to populate `wal.segment_count` /
    /// `wal.pending_bytes`.
    pub fn inspect(&self) -> Result<InspectReport> {
        inspect::inspect(&self.dir)
    }

    /// Stop the background sync task (if any) and perform a final sync.
    pub fn close(self) -> Result<()> {
        self.stop_background_sync.store(true, Ordering::Relaxed);
        self.writer.lock().force_sync()
    }
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal").field("dir", &self.dir).finish()
    }
}

/// Surface errors from a failed `Write` the way the contract names them.
pub fn wal_write_error(detail: impl std::fmt::Display) -> Error {
    Error::Transient(format!("wal write: {detail}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use akashi_core::config::WalSyncMode;

    fn test_config() -> WalConfig {
        WalConfig {
            dir: String::new(),
            sync_mode: WalSyncMode::Full,
            sync_interval: Duration::from_millis(10),
            max_segment_size: 4096,
            max_segment_records: 1000,
        }
    }

    #[tokio::test]
    async fn write_then_recover_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let wal = Wal::open(dir.path(), test_config()).unwrap();
        wal.write(&[vec![1, 2, 3], vec![4, 5, 6]]).unwrap();

        let records = wal.recover().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].payload, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn checkpoint_hides_already_flushed_records_on_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let wal = Wal::open(dir.path(), test_config()).unwrap();
        wal.write(&[vec![1], vec![2], vec![3]]).unwrap();
        wal.checkpoint(2).unwrap();

        let records = wal.recover().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].lsn, 3);
    }

    #[tokio::test]
    async fn inspect_reports_segment_and_record_counts() {
        let dir = tempfile::tempdir().unwrap();
        let wal = Wal::open(dir.path(), test_config()).unwrap();
        wal.write(&[vec![1], vec![2]]).unwrap();

        let report = wal.inspect().unwrap();
        assert_eq!(report.segment_count, 1);
        assert_eq!(report.total_records, 2);
    }
}
