//! Per-log-file header (spec §6).
//!
//! Laid out exactly as specified: the byte table is treated as
//! authoritative over the spec's illustrative "offset 32" prose (see
//! `DESIGN.md` and `crate::position::LogPosition::start_of_log`),
//! giving a 41-byte header. The `header_size` field keeps the
//! historical fixed value `32` as stored data; it is not used to
//! compute the real on-disk header length, which callers get from
//! [`HEADER_LEN`].

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, XlogError};
use crate::position::LogId;
use crate::record::tag;

pub const MAGIC: u32 = 0xAE88FE12;
pub const VERSION: u16 = 1;

/// Historical fixed value stored in the `header_size` field. Kept for
/// on-disk compatibility; not the real struct length (see module doc).
const LEGACY_HEADER_SIZE_FIELD: u32 = 32;

/// The real on-disk length of an encoded header record, derived from
/// the byte table in spec §6 (last field ends at offset 37+4=41).
pub const HEADER_LEN: usize = 41;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStatus {
    None,
    Source,
    Target,
}

impl CompactionStatus {
    fn to_byte(self) -> u8 {
        match self {
            CompactionStatus::None => 0,
            CompactionStatus::Source => 1,
            CompactionStatus::Target => 2,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        Ok(match b {
            0 => CompactionStatus::None,
            1 => CompactionStatus::Source,
            2 => CompactionStatus::Target,
            other => return Err(XlogError::corrupt(format!("invalid compaction status {}", other))),
        })
    }
}

/// A decoded log file header.
#[derive(Debug, Clone, PartialEq)]
pub struct LogHeader {
    pub accumulated_free_space: u64,
    /// Last known-clean EOF. Zero unless the file was closed cleanly.
    pub last_clean_eof: u64,
    pub compaction_position: u64,
    pub compaction_status: CompactionStatus,
    pub log_id: LogId,
}

impl LogHeader {
    pub fn new(log_id: LogId) -> Self {
        Self {
            accumulated_free_space: 0,
            last_clean_eof: 0,
            compaction_position: 0,
            compaction_status: CompactionStatus::None,
            log_id,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = BytesMut::with_capacity(HEADER_LEN);
        out.put_u8(tag::HEADER);
        out.put_u8(0); // checksum placeholder, patched below
        out.put_u32(LEGACY_HEADER_SIZE_FIELD);
        out.put_u64(self.accumulated_free_space);
        out.put_u64(self.last_clean_eof);
        out.put_u64(self.compaction_position);
        out.put_u8(self.compaction_status.to_byte());
        out.put_u32(self.log_id);
        out.put_u16(VERSION);
        out.put_u32(MAGIC);
        debug_assert_eq!(out.len(), HEADER_LEN);

        let sum = checksum(&out);
        out[1] = sum;

        let mut arr = [0u8; HEADER_LEN];
        arr.copy_from_slice(&out);
        arr
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(XlogError::bounds("buffer shorter than a log header"));
        }
        if buf[0] != tag::HEADER {
            return Err(XlogError::corrupt(format!("expected HEADER tag, got {}", buf[0])));
        }
        let claimed_checksum = buf[1];
        let actual = checksum(&buf[..HEADER_LEN]);
        if actual != claimed_checksum {
            return Err(XlogError::corrupt("header checksum mismatch"));
        }

        let mut rest = &buf[2..HEADER_LEN];
        let _header_size = rest.get_u32();
        let accumulated_free_space = rest.get_u64();
        let last_clean_eof = rest.get_u64();
        let compaction_position = rest.get_u64();
        let compaction_status = CompactionStatus::from_byte(rest.get_u8())?;
        let log_id = rest.get_u32();
        let version = rest.get_u16();
        let magic = rest.get_u32();

        if magic != MAGIC {
            return Err(XlogError::corrupt(format!("bad magic 0x{:08X}", magic)));
        }
        if version != VERSION {
            return Err(XlogError::corrupt(format!("unsupported header version {}", version)));
        }

        Ok(Self {
            accumulated_free_space,
            last_clean_eof,
            compaction_position,
            compaction_status,
            log_id,
        })
    }
}

fn checksum(record: &[u8]) -> u8 {
    let mut sum: u8 = 0;
    for (i, b) in record.iter().enumerate() {
        if i == 1 {
            continue;
        }
        sum = sum.wrapping_add(*b);
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrips() {
        let mut h = LogHeader::new(3);
        h.accumulated_free_space = 128;
        h.last_clean_eof = 4096;
        let encoded = h.encode();
        let decoded = LogHeader::decode(&encoded).unwrap();
        assert_eq!(decoded, h);
    }

    #[test]
    fn header_len_matches_spec_byte_table() {
        assert_eq!(HEADER_LEN, 41);
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let h = LogHeader::new(1);
        let mut encoded = h.encode();
        encoded[HEADER_LEN - 1] ^= 0xFF;
        let err = LogHeader::decode(&encoded).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Corrupt);
    }

    #[test]
    fn corrupted_checksum_is_detected() {
        let h = LogHeader::new(1);
        let mut encoded = h.encode();
        encoded[1] ^= 0xFF;
        let err = LogHeader::decode(&encoded).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Corrupt);
    }

    #[test]
    fn compaction_status_roundtrips_all_variants() {
        for status in [CompactionStatus::None, CompactionStatus::Source, CompactionStatus::Target] {
            let mut h = LogHeader::new(1);
            h.compaction_status = status;
            let decoded = LogHeader::decode(&h.encode()).unwrap();
            assert_eq!(decoded.compaction_status, status);
        }
    }
}
