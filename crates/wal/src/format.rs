//! On-disk segment and record framing.
//!
//! Segment header (20 bytes): magic(4) | version(4) | reserved(4) | base_lsn(8).
//! Record: lsn(8) | payload_len(4) | payload | crc32c(4) computed over
//! everything before the checksum field.

use akashi_core::Error;
use std::convert::TryInto;

/// Segment file magic: `0x414B5745` ("AKWE" little-endian read as bytes).
pub const SEGMENT_MAGIC: u32 = 0x414B_5745;

/// Current on-disk format version.
pub const SEGMENT_FORMAT_VERSION: u32 = 1;

pub const SEGMENT_HEADER_SIZE: usize = 20;

/// Minimum bytes needed to even read a record's fixed-size framing
/// (lsn + payload_len), before we know whether the payload itself is present.
const RECORD_FIXED_PREFIX: usize = 8 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub magic: u32,
    pub version: u32,
    pub base_lsn: u64,
}

impl SegmentHeader {
    pub fn new(base_lsn: u64) -> Self {
        Self {
            magic: SEGMENT_MAGIC,
            version: SEGMENT_FORMAT_VERSION,
            base_lsn,
        }
    }

    pub fn to_bytes(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut buf = [0u8; SEGMENT_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&0u32.to_le_bytes()); // reserved
        buf[12..20].copy_from_slice(&self.base_lsn.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; SEGMENT_HEADER_SIZE]) -> Result<Self, Error> {
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let base_lsn = u64::from_le_bytes(buf[12..20].try_into().unwrap());
        if magic != SEGMENT_MAGIC {
            return Err(Error::Corruption(format!(
                "bad segment magic: expected {SEGMENT_MAGIC:#010x}, got {magic:#010x}"
            )));
        }
        if version != SEGMENT_FORMAT_VERSION {
            return Err(Error::Corruption(format!(
                "unsupported segment format version {version}"
            )));
        }
        Ok(Self {
            magic,
            version,
            base_lsn,
        })
    }
}

/// A single durable record: its assigned LSN and opaque payload bytes.
/// The WAL has no opinion on payload contents; `akashi-ingest` serializes
/// `AgentEvent`s into this shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub lsn: u64,
    pub payload: Vec<u8>,
}

impl WalRecord {
    pub fn new(lsn: u64, payload: Vec<u8>) -> Self {
        Self { lsn, payload }
    }

    /// Serialize to `lsn | payload_len | payload | crc32c`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = Vec::with_capacity(RECORD_FIXED_PREFIX + self.payload.len());
        head.extend_from_slice(&self.lsn.to_le_bytes());
        head.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        head.extend_from_slice(&self.payload);

        let crc = crc32c::crc32c(&head);

        let mut out = head;
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    /// Parse one record from the front of `bytes`. Returns the record and
    /// the number of bytes consumed. Distinguishes a short read (expected at
    /// the tail of the active segment after a crash) from genuine
    /// corruption.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), Error> {
        if bytes.len() < RECORD_FIXED_PREFIX {
            return Err(Error::Corruption("short read: record prefix truncated".into()));
        }
        let lsn = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let payload_len = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;

        let total = RECORD_FIXED_PREFIX + payload_len + 4;
        if bytes.len() < total {
            return Err(Error::Corruption("short read: record body truncated".into()));
        }

        let head = &bytes[0..RECORD_FIXED_PREFIX + payload_len];
        let stored_crc = u32::from_le_bytes(
            bytes[RECORD_FIXED_PREFIX + payload_len..total].try_into().unwrap(),
        );
        let computed_crc = crc32c::crc32c(head);
        if computed_crc != stored_crc {
            return Err(Error::Corruption(format!(
                "crc32c mismatch at lsn {lsn}: expected {stored_crc:#010x}, computed {computed_crc:#010x}"
            )));
        }

        let payload = head[RECORD_FIXED_PREFIX..].to_vec();
        Ok((WalRecord { lsn, payload }, total))
    }
}

/// Segment file name: zero-padded nine digits, `.wal` extension.
pub fn segment_file_name(segment_number: u64) -> String {
    format!("{segment_number:09}.wal")
}

/// Parse a segment number back out of a directory entry name, if it matches
/// the `%09d.wal` pattern.
pub fn parse_segment_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(".wal")?;
    if stem.len() != 9 {
        return None;
    }
    stem.parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = SegmentHeader::new(42);
        let bytes = header.to_bytes();
        let parsed = SegmentHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut bytes = SegmentHeader::new(0).to_bytes();
        bytes[0] ^= 0xFF;
        assert!(SegmentHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn record_round_trips() {
        let record = WalRecord::new(7, vec![1, 2, 3, 4, 5]);
        let bytes = record.to_bytes();
        let (parsed, consumed) = WalRecord::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn record_detects_crc_corruption() {
        let record = WalRecord::new(1, vec![9, 9, 9]);
        let mut bytes = record.to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let err = WalRecord::from_bytes(&bytes).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn record_detects_short_read() {
        let record = WalRecord::new(1, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let bytes = record.to_bytes();
        let truncated = &bytes[..bytes.len() - 3];
        assert!(WalRecord::from_bytes(truncated).is_err());
    }

    #[test]
    fn segment_file_name_is_zero_padded() {
        assert_eq!(segment_file_name(7), "000000007.wal");
        assert_eq!(parse_segment_file_name("000000007.wal"), Some(7));
        assert_eq!(parse_segment_file_name("not-a-segment.wal"), None);
    }

    proptest::proptest! {
        #[test]
        fn record_round_trips_for_arbitrary_payloads(lsn: u64, payload: Vec<u8>) {
            let record = WalRecord::new(lsn, payload);
            let bytes = record.to_bytes();
            let (parsed, consumed) = WalRecord::from_bytes(&bytes).unwrap();
            prop_assert_eq!(parsed, record);
            prop_assert_eq!(consumed, bytes.len());
        }
    }
}
