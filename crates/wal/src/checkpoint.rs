//! `checkpoint.json`: the flushed-LSN watermark, written atomically via
//! temp-file-then-rename, plus segment reclamation once a new checkpoint
//! makes older segments wholly redundant.

use crate::format::WalRecord;
use crate::segment::{list_segment_numbers, WalSegment};
use akashi_core::Result;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use tracing::info;

const CHECKPOINT_FILE_NAME: &str = "checkpoint.json";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    pub flushed_lsn: u64,
}

pub fn read_checkpoint(dir: &Path) -> Result<Option<Checkpoint>> {
    let path = dir.join(CHECKPOINT_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(&path)?;
    let checkpoint = serde_json::from_slice(&bytes)
        .map_err(|e| akashi_core::Error::Corruption(format!("bad checkpoint.json: {e}")))?;
    Ok(Some(checkpoint))
}

/// Write `checkpoint.json` via temp-file-then-rename so a crash mid-write
/// never leaves a torn checkpoint on disk.
pub fn write_checkpoint(dir: &Path, checkpoint: Checkpoint) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let final_path = dir.join(CHECKPOINT_FILE_NAME);
    let tmp_path = dir.join(format!("{CHECKPOINT_FILE_NAME}.tmp"));

    let bytes = serde_json::to_vec(&checkpoint).expect("checkpoint serializes");
    std::fs::write(&tmp_path, &bytes)?;
    {
        let f = std::fs::File::open(&tmp_path)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp_path, &final_path)?;
    Ok(())
}

/// Delete every segment whose highest LSN is `<= flushed_lsn`, keeping the
/// active (highest-numbered) segment untouched even if it happens to
/// qualify, so the writer always has somewhere to append next.
pub fn reclaim_segments(dir: &Path, flushed_lsn: u64) -> Result<Vec<u64>> {
    let numbers = list_segment_numbers(dir)?;
    let mut reclaimed = Vec::new();
    let Some(&active) = numbers.last() else {
        return Ok(reclaimed);
    };

    for number in numbers {
        if number == active {
            continue;
        }
        let high_lsn = highest_lsn_in_segment(dir, number)?;
        if high_lsn.map(|h| h <= flushed_lsn).unwrap_or(true) {
            let path = WalSegment::segment_path(dir, number);
            std::fs::remove_file(&path)?;
            info!(segment = number, flushed_lsn, "reclaimed checkpointed WAL segment");
            reclaimed.push(number);
        }
    }
    Ok(reclaimed)
}

fn highest_lsn_in_segment(dir: &Path, segment_number: u64) -> Result<Option<u64>> {
    let mut segment = WalSegment::open_read(dir, segment_number)?;
    segment.seek_to_records_start()?;
    let mut buf = Vec::new();
    segment.file_mut().read_to_end(&mut buf)?;

    let mut offset = 0;
    let mut highest = None;
    while offset < buf.len() {
        match WalRecord::from_bytes(&buf[offset..]) {
            Ok((record, consumed)) => {
                highest = Some(record.lsn);
                offset += consumed;
            }
            Err(_) => break,
        }
    }
    Ok(highest)
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
            max_segment_size: 64,
            max_segment_records: 1000,
        }
    }

    #[test]
    fn checkpoint_round_trips_atomically() {
        let dir = tempdir().unwrap();
        write_checkpoint(dir.path(), Checkpoint { flushed_lsn: 42 }).unwrap();
        let read = read_checkpoint(dir.path()).unwrap().unwrap();
        assert_eq!(read.flushed_lsn, 42);
        assert!(!dir.path().join("checkpoint.json.tmp").exists());
    }

    #[test]
    fn missing_checkpoint_is_none() {
        let dir = tempdir().unwrap();
        assert!(read_checkpoint(dir.path()).unwrap().is_none());
    }

    #[test]
    fn reclaims_fully_flushed_segments_but_keeps_active() {
        let dir = tempdir().unwrap();
        let mut writer = WalWriter::open(dir.path(), test_config()).unwrap();
        for i in 0..10u8 {
            writer.write(&[vec![i; 8]]).unwrap();
        }
        writer.close().unwrap();

        let numbers_before = crate::segment::list_segment_numbers(dir.path()).unwrap();
        assert!(numbers_before.len() > 1, "test setup should rotate segments");

        let reclaimed = reclaim_segments(dir.path(), 10).unwrap();
        assert!(!reclaimed.is_empty());

        let numbers_after = crate::segment::list_segment_numbers(dir.path()).unwrap();
        assert_eq!(numbers_after.last(), numbers_before.last());
    }
}
