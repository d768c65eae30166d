//! A single WAL segment file: header + appended records.
//!
//! Only the active (highest-numbered) segment is writable; closed segments
//! are immutable and safe to read concurrently with the writer appending to
//! the next one.

use crate::format::{segment_file_name, SegmentHeader, SEGMENT_HEADER_SIZE};
use akashi_core::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub struct WalSegment {
    file: File,
    segment_number: u64,
    base_lsn: u64,
    write_position: u64,
    path: PathBuf,
    closed: bool,
}

impl WalSegment {
    pub fn segment_path(dir: &Path, segment_number: u64) -> PathBuf {
        dir.join(segment_file_name(segment_number))
    }

    pub fn create(dir: &Path, segment_number: u64, base_lsn: u64) -> Result<Self> {
        let path = Self::segment_path(dir, segment_number);
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .read(true)
            .open(&path)?;

        let header = SegmentHeader::new(base_lsn);
        file.write_all(&header.to_bytes())?;

        Ok(Self {
            file,
            segment_number,
            base_lsn,
            write_position: SEGMENT_HEADER_SIZE as u64,
            path,
            closed: false,
        })
    }

    pub fn open_append(dir: &Path, segment_number: u64) -> Result<Self> {
        let path = Self::segment_path(dir, segment_number);
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let header = read_header(&mut file)?;
        let write_position = file.seek(SeekFrom::End(0))?;

        Ok(Self {
            file,
            segment_number,
            base_lsn: header.base_lsn,
            write_position,
            path,
            closed: false,
        })
    }

    pub fn open_read(dir: &Path, segment_number: u64) -> Result<Self> {
        let path = Self::segment_path(dir, segment_number);
        let mut file = OpenOptions::new().read(true).open(&path)?;

        let header = read_header(&mut file)?;
        let write_position = file.seek(SeekFrom::End(0))?;

        Ok(Self {
            file,
            segment_number,
            base_lsn: header.base_lsn,
            write_position,
            path,
            closed: true,
        })
    }

    pub fn segment_number(&self) -> u64 {
        self.segment_number
    }

    pub fn base_lsn(&self) -> u64 {
        self.base_lsn
    }

    pub fn size(&self) -> u64 {
        self.write_position
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::Fatal("cannot write to a closed WAL segment".into()));
        }
        self.file.write_all(data)?;
        self.write_position += data.len() as u64;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.file.sync_all()?;
            self.closed = true;
        }
        Ok(())
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    pub fn seek_to_records_start(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(SEGMENT_HEADER_SIZE as u64))?;
        Ok(())
    }

    pub fn truncate(&mut self, position: u64) -> Result<()> {
        if self.closed {
            return Err(Error::Fatal("cannot truncate a closed WAL segment".into()));
        }
        self.file.set_len(position)?;
        self.write_position = position;
        self.file.seek(SeekFrom::Start(position))?;
        Ok(())
    }
}

fn read_header(file: &mut File) -> Result<SegmentHeader> {
    let mut buf = [0u8; SEGMENT_HEADER_SIZE];
    file.read_exact(&mut buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Corruption("segment file shorter than header".into())
        } else {
            Error::Io(e)
        }
    })?;
    SegmentHeader::from_bytes(&buf)
}

/// List segment numbers present in `dir`, sorted ascending. Non-matching
/// entries are ignored rather than rejected, so an operator dropping a
/// README or `checkpoint.json` alongside the segments doesn't break startup.
pub fn list_segment_numbers(dir: &Path) -> Result<Vec<u64>> {
    let mut numbers = Vec::new();
    if !dir.exists() {
        return Ok(numbers);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(n) = crate::format::parse_segment_file_name(&name) {
            numbers.push(n);
        }
    }
    numbers.sort_unstable();
    Ok(numbers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_reopen_for_append() {
        let dir = tempdir().unwrap();
        let mut segment = WalSegment::create(dir.path(), 1, 0).unwrap();
        segment.write(b"hello").unwrap();
        segment.close().unwrap();

        let reopened = WalSegment::open_read(dir.path(), 1).unwrap();
        assert_eq!(reopened.segment_number(), 1);
        assert!(reopened.is_closed());
    }

    #[test]
    fn write_to_closed_segment_fails() {
        let dir = tempdir().unwrap();
        let mut segment = WalSegment::create(dir.path(), 1, 0).unwrap();
        segment.close().unwrap();
        assert!(segment.write(b"x").is_err());
    }

    #[test]
    fn list_segment_numbers_sorts_and_filters() {
        let dir = tempdir().unwrap();
        WalSegment::create(dir.path(), 3, 0).unwrap();
        WalSegment::create(dir.path(), 1, 0).unwrap();
        std::fs::write(dir.path().join("checkpoint.json"), b"{}").unwrap();

        let numbers = list_segment_numbers(dir.path()).unwrap();
        assert_eq!(numbers, vec![1, 3]);
    }
}
