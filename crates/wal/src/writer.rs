//! Append path: assigns LSNs, rotates segments, and applies the
//! configured sync mode.

use crate::format::WalRecord;
use crate::segment::{list_segment_numbers, WalSegment};
use akashi_core::config::{WalConfig, WalSyncMode};
use akashi_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;

pub struct WalWriter {
    dir: PathBuf,
    config: WalConfig,
    segment: WalSegment,
    segment_record_count: u64,
    next_lsn: u64,
    last_sync: Instant,
}

impl WalWriter {
    /// Open (or create) the active segment, resuming from whatever's on
    /// disk. `next_lsn` starts one past the highest LSN found across every
    /// existing segment.
    pub fn open(dir: &Path, config: WalConfig) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let existing = list_segment_numbers(dir)?;

        let (segment, next_lsn, segment_record_count) = match existing.last() {
            Some(&num) => {
                let mut segment = WalSegment::open_append(dir, num)?;
                let (count, highest) = scan_record_count_and_highest_lsn(&mut segment)?;
                let next_lsn = highest.map(|h| h + 1).unwrap_or_else(|| segment.base_lsn());
                (segment, next_lsn, count)
            }
            None => (WalSegment::create(dir, 1, 1)?, 1, 0),
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            segment,
            segment_record_count,
            next_lsn,
            last_sync: Instant::now(),
        })
    }

    /// Append `payloads` as consecutive records, returning their assigned
    /// LSNs. Respects the configured sync mode before returning.
    pub fn write(&mut self, payloads: &[Vec<u8>]) -> Result<Vec<u64>> {
        let mut lsns = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let lsn = self.next_lsn;
            let record = WalRecord::new(lsn, payload.clone());
            let bytes = record.to_bytes();

            if self.should_rotate(bytes.len() as u64) {
                self.rotate()?;
            }

            self.segment.write(&bytes)?;
            self.segment_record_count += 1;
            self.next_lsn += 1;
            lsns.push(lsn);
        }

        self.maybe_sync()?;
        Ok(lsns)
    }

    fn should_rotate(&self, incoming_len: u64) -> bool {
        self.segment.size() + incoming_len > self.config.max_segment_size
            || self.segment_record_count >= self.config.max_segment_records
    }

    fn rotate(&mut self) -> Result<()> {
        self.segment.close()?;
        let next_number = self.segment.segment_number() + 1;
        self.segment = WalSegment::create(&self.dir, next_number, self.next_lsn)?;
        self.segment_record_count = 0;
        Ok(())
    }

    fn maybe_sync(&mut self) -> Result<()> {
        match self.config.sync_mode {
            WalSyncMode::Full => {
                self.segment.sync()?;
                self.last_sync = Instant::now();
            }
            WalSyncMode::Batch => {
                if self.last_sync.elapsed() >= self.config.sync_interval {
                    self.segment.sync()?;
                    self.last_sync = Instant::now();
                }
            }
            WalSyncMode::None => {}
        }
        Ok(())
    }

    /// Force a sync regardless of mode; used by the background batch-sync
    /// task and by `Close`.
    pub fn force_sync(&mut self) -> Result<()> {
        self.segment.sync()?;
        self.last_sync = Instant::now();
        Ok(())
    }

    pub fn next_lsn(&self) -> u64 {
        self.next_lsn
    }

    pub fn current_segment_number(&self) -> u64 {
        self.segment.segment_number()
    }

    pub fn close(mut self) -> Result<()> {
        self.segment.close()
    }
}

/// Scan a just-opened segment to recover in-memory bookkeeping (record count
/// since last rotation, highest LSN seen) without re-deriving it from a
/// separate sidecar file.
fn scan_record_count_and_highest_lsn(segment: &mut WalSegment) -> Result<(u64, Option<u64>)> {
    use std::io::Read;

    segment.seek_to_records_start()?;
    let mut buf = Vec::new();
    segment.file_mut().read_to_end(&mut buf).map_err(Error::Io)?;

    let mut offset = 0;
    let mut count = 0u64;
    let mut highest = None;
    while offset < buf.len() {
        match WalRecord::from_bytes(&buf[offset..]) {
            Ok((record, consumed)) => {
                highest = Some(record.lsn);
                count += 1;
                offset += consumed;
            }
            Err(_) => break,
        }
    }
    segment.file_mut().seek(std::io::SeekFrom::End(0)).map_err(Error::Io)?;
    Ok((count, highest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn test_config() -> WalConfig {
        WalConfig {
            dir: String::new(),
            sync_mode: WalSyncMode::Full,
            sync_interval: Duration::from_millis(10),
            max_segment_size: 1024,
            max_segment_records: 1000,
        }
    }

    #[test]
    fn assigns_monotonic_lsns() {
        let dir = tempdir().unwrap();
        let mut writer = WalWriter::open(dir.path(), test_config()).unwrap();
        let lsns = writer.write(&[vec![1], vec![2], vec![3]]).unwrap();
        assert_eq!(lsns, vec![1, 2, 3]);
        assert_eq!(writer.next_lsn(), 4);
    }

    #[test]
    fn rotates_on_size() {
        let dir = tempdir().unwrap();
        let mut cfg = test_config();
        cfg.max_segment_size = 64;
        let mut writer = WalWriter::open(dir.path(), cfg).unwrap();
        for _ in 0..20 {
            writer.write(&[vec![0u8; 8]]).unwrap();
        }
        assert!(writer.current_segment_number() > 1);
    }

    #[test]
    fn resumes_lsn_sequence_after_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut writer = WalWriter::open(dir.path(), test_config()).unwrap();
            writer.write(&[vec![1], vec![2]]).unwrap();
            writer.close().unwrap();
        }
        let writer = WalWriter::open(dir.path(), test_config()).unwrap();
        assert_eq!(writer.next_lsn(), 3);
    }
}
