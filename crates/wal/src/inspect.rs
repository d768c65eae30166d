//! Read-only WAL inspection: a dry-run over `recover_all`'s scan logic that
//! reports shape instead of records, used to populate `wal.segment_count` /
//! `wal.pending_bytes` without holding the writer's lock.

use crate::format::WalRecord;
use crate::segment::{list_segment_numbers, WalSegment};
use akashi_core::Result;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct InspectReport {
    pub segment_count: usize,
    pub total_records: u64,
    pub pending_bytes: u64,
    /// `(segment_number, byte_offset)` of the first corrupt record found,
    /// if any. Recovery truncates at this point; later segments still scan
    /// cleanly.
    pub first_corrupt_tail: Option<(u64, usize)>,
}

/// Scan every segment without decoding payloads into memory for the caller
/// — only counts and the corruption point are returned.
pub fn inspect(dir: &Path) -> Result<InspectReport> {
    let numbers = list_segment_numbers(dir)?;
    let mut report = InspectReport {
        segment_count: numbers.len(),
        ..Default::default()
    };

    for segment_number in numbers {
        let mut segment = WalSegment::open_read(dir, segment_number)?;
        report.pending_bytes += segment.size();
        segment.seek_to_records_start()?;

        let mut buf = Vec::new();
        segment.file_mut().read_to_end(&mut buf)?;

        let mut offset = 0;
        while offset < buf.len() {
            match WalRecord::from_bytes(&buf[offset..]) {
                Ok((_, consumed)) => {
                    report.total_records += 1;
                    offset += consumed;
                }
                Err(_) => {
                    if report.first_corrupt_tail.is_none() {
                        report.first_corrupt_tail = Some((segment_number, offset));
                    }
                    break;
                }
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::WalWriter;
    use akashi_core::config::{WalConfig, WalSyncMode};
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
    fn reports_clean_segment() {
        let dir = tempdir().unwrap();
        let mut writer = WalWriter::open(dir.path(), test_config()).unwrap();
        writer.write(&[vec![1], vec![2], vec![3]]).unwrap();
        writer.close().unwrap();

        let report = inspect(dir.path()).unwrap();
        assert_eq!(report.segment_count, 1);
        assert_eq!(report.total_records, 3);
        assert!(report.first_corrupt_tail.is_none());
    }

    #[test]
    fn reports_corrupt_tail_location() {
        let dir = tempdir().unwrap();
        let mut writer = WalWriter::open(dir.path(), test_config()).unwrap();
        writer.write(&[vec![1; 4], vec![2; 4]]).unwrap();
        writer.close().unwrap();

        let path = WalSegment::segment_path(dir.path(), 1);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let report = inspect(dir.path()).unwrap();
        assert_eq!(report.total_records, 1);
        assert!(report.first_corrupt_tail.is_some());
    }
}
