//! The tagged on-disk log record format (spec §3).
//!
//! Every record begins with a 1-byte kind tag followed by a 1-byte
//! additive checksum covering every other byte in the record (tag
//! included). Fixed-size kinds are laid out field-by-field; the
//! variable-length kinds (mutations, extended records) carry an
//! explicit length prefix ahead of their payload.
//!
//! `REC_CLEANED` and `REC_CLEANED_1` are unified into a single
//! `RecMaintKind::Cleaned` with a `short_form` flag recording which
//! wire encoding produced it (spec §9 open questions).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, XlogError};
use crate::position::{LogId, OpSeq, RecId, RowId, TabId, XactId};

/// Numeric tags, copied verbatim from the original core so a hex dump
/// of a real log file remains self-describing against this codec.
pub mod tag {
    pub const EOF: u8 = 0;
    pub const HEADER: u8 = 1;
    pub const NEW_LOG: u8 = 2;
    pub const DEL_LOG: u8 = 3;
    pub const NEW_TAB: u8 = 4;
    pub const COMMIT: u8 = 5;
    pub const ABORT: u8 = 6;
    pub const CLEANUP: u8 = 7;
    pub const REC_MODIFIED: u8 = 8;
    pub const UPDATE: u8 = 9;
    pub const UPDATE_BG: u8 = 10;
    pub const UPDATE_FL: u8 = 11;
    pub const UPDATE_FL_BG: u8 = 12;
    pub const INSERT: u8 = 13;
    pub const INSERT_BG: u8 = 14;
    pub const INSERT_FL: u8 = 15;
    pub const INSERT_FL_BG: u8 = 16;
    pub const DELETE: u8 = 17;
    pub const DELETE_BG: u8 = 18;
    pub const DELETE_FL: u8 = 19;
    pub const DELETE_FL_BG: u8 = 20;
    pub const REC_FREED: u8 = 21;
    pub const REC_REMOVED: u8 = 22;
    pub const REC_REMOVED_EXT: u8 = 23;
    pub const REC_MOVED: u8 = 24;
    pub const REC_CLEANED: u8 = 25;
    pub const REC_CLEANED_1: u8 = 26;
    pub const REC_UNLINKED: u8 = 27;
    pub const ROW_NEW: u8 = 28;
    pub const ROW_NEW_FL: u8 = 29;
    pub const ROW_ADD_REC: u8 = 30;
    pub const ROW_SET: u8 = 31;
    pub const ROW_FREED: u8 = 32;
    pub const OP_SYNC: u8 = 33;
    pub const EXT_REC_OK: u8 = 34;
    pub const EXT_REC_DEL: u8 = 35;
    pub const NO_OP: u8 = 36;
    pub const END_OF_LOG: u8 = 37;
    pub const REC_REMOVED_BI: u8 = 38;
}

/// Whether a record kind may be applied by the applier even if it
/// observes a gap in the table's op-sequence (spec §3/§4.5).
pub fn is_background_applicable(t: u8) -> bool {
    matches!(
        t,
        tag::UPDATE_BG | tag::UPDATE_FL_BG | tag::INSERT_BG | tag::INSERT_FL_BG | tag::DELETE_BG | tag::DELETE_FL_BG
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    RecModified,
    Update,
    UpdateBg,
    UpdateFl,
    UpdateFlBg,
    Insert,
    InsertBg,
    InsertFl,
    InsertFlBg,
    Delete,
    DeleteBg,
    DeleteFl,
    DeleteFlBg,
}

impl MutationKind {
    fn tag(self) -> u8 {
        match self {
            MutationKind::RecModified => tag::REC_MODIFIED,
            MutationKind::Update => tag::UPDATE,
            MutationKind::UpdateBg => tag::UPDATE_BG,
            MutationKind::UpdateFl => tag::UPDATE_FL,
            MutationKind::UpdateFlBg => tag::UPDATE_FL_BG,
            MutationKind::Insert => tag::INSERT,
            MutationKind::InsertBg => tag::INSERT_BG,
            MutationKind::InsertFl => tag::INSERT_FL,
            MutationKind::InsertFlBg => tag::INSERT_FL_BG,
            MutationKind::Delete => tag::DELETE,
            MutationKind::DeleteBg => tag::DELETE_BG,
            MutationKind::DeleteFl => tag::DELETE_FL,
            MutationKind::DeleteFlBg => tag::DELETE_FL_BG,
        }
    }

    fn from_tag(t: u8) -> Option<Self> {
        Some(match t {
            tag::REC_MODIFIED => MutationKind::RecModified,
            tag::UPDATE => MutationKind::Update,
            tag::UPDATE_BG => MutationKind::UpdateBg,
            tag::UPDATE_FL => MutationKind::UpdateFl,
            tag::UPDATE_FL_BG => MutationKind::UpdateFlBg,
            tag::INSERT => MutationKind::Insert,
            tag::INSERT_BG => MutationKind::InsertBg,
            tag::INSERT_FL => MutationKind::InsertFl,
            tag::INSERT_FL_BG => MutationKind::InsertFlBg,
            tag::DELETE => MutationKind::Delete,
            tag::DELETE_BG => MutationKind::DeleteBg,
            tag::DELETE_FL => MutationKind::DeleteFl,
            tag::DELETE_FL_BG => MutationKind::DeleteFlBg,
            _ => return None,
        })
    }

    fn has_free_list(self) -> bool {
        matches!(
            self,
            MutationKind::UpdateFl | MutationKind::UpdateFlBg | MutationKind::InsertFl | MutationKind::InsertFlBg | MutationKind::DeleteFl | MutationKind::DeleteFlBg
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecFreeKind {
    Freed,
    Removed,
    RemovedExt,
    RemovedBi,
}

impl RecFreeKind {
    fn tag(self) -> u8 {
        match self {
            RecFreeKind::Freed => tag::REC_FREED,
            RecFreeKind::Removed => tag::REC_REMOVED,
            RecFreeKind::RemovedExt => tag::REC_REMOVED_EXT,
            RecFreeKind::RemovedBi => tag::REC_REMOVED_BI,
        }
    }

    fn from_tag(t: u8) -> Option<Self> {
        Some(match t {
            tag::REC_FREED => RecFreeKind::Freed,
            tag::REC_REMOVED => RecFreeKind::Removed,
            tag::REC_REMOVED_EXT => RecFreeKind::RemovedExt,
            tag::REC_REMOVED_BI => RecFreeKind::RemovedBi,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecMaintKind {
    Moved,
    /// Unifies `REC_CLEANED` / `REC_CLEANED_1`; `short_form` selects
    /// the wire encoding on output and records which one was read.
    Cleaned,
    Unlinked,
}

impl RecMaintKind {
    fn tag(self, short_form: bool) -> u8 {
        match self {
            RecMaintKind::Moved => tag::REC_MOVED,
            RecMaintKind::Cleaned => {
                if short_form {
                    tag::REC_CLEANED_1
                } else {
                    tag::REC_CLEANED
                }
            }
            RecMaintKind::Unlinked => tag::REC_UNLINKED,
        }
    }

    fn from_tag(t: u8) -> Option<(Self, bool)> {
        Some(match t {
            tag::REC_MOVED => (RecMaintKind::Moved, false),
            tag::REC_CLEANED => (RecMaintKind::Cleaned, false),
            tag::REC_CLEANED_1 => (RecMaintKind::Cleaned, true),
            tag::REC_UNLINKED => (RecMaintKind::Unlinked, false),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    New,
    NewFl,
    AddRec,
    Set,
    Freed,
}

impl RowKind {
    fn tag(self) -> u8 {
        match self {
            RowKind::New => tag::ROW_NEW,
            RowKind::NewFl => tag::ROW_NEW_FL,
            RowKind::AddRec => tag::ROW_ADD_REC,
            RowKind::Set => tag::ROW_SET,
            RowKind::Freed => tag::ROW_FREED,
        }
    }

    fn from_tag(t: u8) -> Option<Self> {
        Some(match t {
            tag::ROW_NEW => RowKind::New,
            tag::ROW_NEW_FL => RowKind::NewFl,
            tag::ROW_ADD_REC => RowKind::AddRec,
            tag::ROW_SET => RowKind::Set,
            tag::ROW_FREED => RowKind::Freed,
            _ => return None,
        })
    }
}

/// A decoded log record body (the part beyond `tag`+`checksum`).
#[derive(Debug, Clone, PartialEq)]
pub enum LogOperation {
    NewLog { log_id: LogId },
    DelLog { log_id: LogId },
    NewTab { tab_id: TabId },
    Commit { xact_id: XactId },
    Abort { xact_id: XactId },
    Cleanup { xact_id: XactId },
    Mutation {
        kind: MutationKind,
        op_seq: OpSeq,
        tab_id: TabId,
        rec_id: RecId,
        row_id: RowId,
        xact_id: XactId,
        free_list_head: Option<u32>,
        payload: Bytes,
    },
    RecFree {
        kind: RecFreeKind,
        op_seq: OpSeq,
        tab_id: TabId,
        rec_id: RecId,
        before_image: Option<Bytes>,
    },
    RecMaint {
        kind: RecMaintKind,
        short_form: bool,
        op_seq: OpSeq,
        tab_id: TabId,
        rec_id: RecId,
        aux: u64,
    },
    Row {
        kind: RowKind,
        op_seq: OpSeq,
        tab_id: TabId,
        row_id: RowId,
        rec_id: Option<RecId>,
        free_list_delta: Option<i32>,
    },
    OpSync { time: u64 },
    ExtRec {
        deleted: bool,
        tab_id: TabId,
        rec_id: RecId,
        ext_log_id: LogId,
        ext_offset: u64,
        payload: Bytes,
    },
    NoOp { op_seq: OpSeq, tab_id: TabId },
    EndOfLog { pad_len: u16 },
}

impl LogOperation {
    pub fn tag(&self) -> u8 {
        match self {
            LogOperation::NewLog { .. } => tag::NEW_LOG,
            LogOperation::DelLog { .. } => tag::DEL_LOG,
            LogOperation::NewTab { .. } => tag::NEW_TAB,
            LogOperation::Commit { .. } => tag::COMMIT,
            LogOperation::Abort { .. } => tag::ABORT,
            LogOperation::Cleanup { .. } => tag::CLEANUP,
            LogOperation::Mutation { kind, .. } => kind.tag(),
            LogOperation::RecFree { kind, .. } => kind.tag(),
            LogOperation::RecMaint { kind, short_form, .. } => kind.tag(*short_form),
            LogOperation::Row { kind, .. } => kind.tag(),
            LogOperation::OpSync { .. } => tag::OP_SYNC,
            LogOperation::ExtRec { deleted, .. } => {
                if *deleted {
                    tag::EXT_REC_DEL
                } else {
                    tag::EXT_REC_OK
                }
            }
            LogOperation::NoOp { .. } => tag::NO_OP,
            LogOperation::EndOfLog { .. } => tag::END_OF_LOG,
        }
    }

    /// The `tab_id` this record logically belongs to, if any (used by
    /// the applier's per-table op-sequence ordering).
    pub fn tab_id(&self) -> Option<TabId> {
        match self {
            LogOperation::NewTab { tab_id } => Some(*tab_id),
            LogOperation::Mutation { tab_id, .. }
            | LogOperation::RecFree { tab_id, .. }
            | LogOperation::RecMaint { tab_id, .. }
            | LogOperation::Row { tab_id, .. }
            | LogOperation::ExtRec { tab_id, .. }
            | LogOperation::NoOp { tab_id, .. } => Some(*tab_id),
            _ => None,
        }
    }

    pub fn op_seq(&self) -> Option<OpSeq> {
        match self {
            LogOperation::Mutation { op_seq, .. }
            | LogOperation::RecFree { op_seq, .. }
            | LogOperation::RecMaint { op_seq, .. }
            | LogOperation::Row { op_seq, .. }
            | LogOperation::NoOp { op_seq, .. } => Some(*op_seq),
            _ => None,
        }
    }

    /// Encode tag + checksum + body into a standalone buffer.
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::new();
        encode_body(self, &mut body);

        let mut out = BytesMut::with_capacity(body.len() + 2);
        out.put_u8(self.tag());
        out.put_u8(0); // checksum placeholder
        out.extend_from_slice(&body);

        let sum = checksum(&out);
        out[1] = sum;
        out.freeze()
    }

    /// Decode one record starting at `buf[0]`. Returns the operation
    /// and the number of bytes consumed. `EOF`/`HEADER` are not valid
    /// inputs here (`HEADER` is decoded by `crate::header`).
    pub fn decode(buf: &[u8]) -> Result<(LogOperation, usize)> {
        if buf.len() < 2 {
            return Err(XlogError::bounds("record shorter than tag+checksum"));
        }
        let t = buf[0];
        if t == tag::EOF || t == tag::HEADER {
            return Err(XlogError::corrupt(format!("tag {} is not a decodable record", t)));
        }
        let claimed_checksum = buf[1];
        let (op, consumed) = decode_body(t, &buf[2..])?;
        let actual = checksum(&buf[..consumed + 2]);
        // checksum() zeroes the checksum byte internally; compare against what was on disk.
        if actual != claimed_checksum {
            return Err(XlogError::corrupt(format!(
                "checksum mismatch for tag {}: expected {}, got {}",
                t, claimed_checksum, actual
            )));
        }
        Ok((op, consumed + 2))
    }
}

/// Additive checksum over every byte except the checksum byte
/// (index 1), which is treated as zero for the purpose of the sum.
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

fn encode_body(op: &LogOperation, out: &mut BytesMut) {
    match op {
        LogOperation::NewLog { log_id } | LogOperation::DelLog { log_id } => {
            out.put_u32(*log_id);
        }
        LogOperation::NewTab { tab_id } => out.put_u32(*tab_id),
        LogOperation::Commit { xact_id } | LogOperation::Abort { xact_id } | LogOperation::Cleanup { xact_id } => {
            out.put_u32(*xact_id);
        }
        LogOperation::Mutation {
            op_seq,
            tab_id,
            rec_id,
            row_id,
            xact_id,
            free_list_head,
            payload,
            ..
        } => {
            out.put_u64(*op_seq);
            out.put_u32(*tab_id);
            out.put_u32(*rec_id);
            out.put_u64(*row_id);
            out.put_u32(*xact_id);
            match free_list_head {
                Some(v) => {
                    out.put_u8(1);
                    out.put_u32(*v);
                }
                None => {
                    out.put_u8(0);
                    out.put_u32(0);
                }
            }
            out.put_u32(payload.len() as u32);
            out.extend_from_slice(payload);
        }
        LogOperation::RecFree {
            op_seq,
            tab_id,
            rec_id,
            before_image,
            ..
        } => {
            out.put_u64(*op_seq);
            out.put_u32(*tab_id);
            out.put_u32(*rec_id);
            match before_image {
                Some(bi) => {
                    out.put_u8(1);
                    out.put_u32(bi.len() as u32);
                    out.extend_from_slice(bi);
                }
                None => {
                    out.put_u8(0);
                    out.put_u32(0);
                }
            }
        }
        LogOperation::RecMaint {
            op_seq,
            tab_id,
            rec_id,
            aux,
            ..
        } => {
            out.put_u64(*op_seq);
            out.put_u32(*tab_id);
            out.put_u32(*rec_id);
            out.put_u64(*aux);
        }
        LogOperation::Row {
            op_seq,
            tab_id,
            row_id,
            rec_id,
            free_list_delta,
            ..
        } => {
            out.put_u64(*op_seq);
            out.put_u32(*tab_id);
            out.put_u64(*row_id);
            match rec_id {
                Some(r) => {
                    out.put_u8(1);
                    out.put_u32(*r);
                }
                None => {
                    out.put_u8(0);
                    out.put_u32(0);
                }
            }
            match free_list_delta {
                Some(d) => {
                    out.put_u8(1);
                    out.put_i32(*d);
                }
                None => {
                    out.put_u8(0);
                    out.put_i32(0);
                }
            }
        }
        LogOperation::OpSync { time } => out.put_u64(*time),
        LogOperation::ExtRec {
            tab_id,
            rec_id,
            ext_log_id,
            ext_offset,
            payload,
            ..
        } => {
            out.put_u32(*tab_id);
            out.put_u32(*rec_id);
            out.put_u32(*ext_log_id);
            out.put_u64(*ext_offset);
            out.put_u32(payload.len() as u32);
            out.extend_from_slice(payload);
        }
        LogOperation::NoOp { op_seq, tab_id } => {
            out.put_u64(*op_seq);
            out.put_u32(*tab_id);
        }
        LogOperation::EndOfLog { pad_len } => {
            out.put_u16(*pad_len);
            out.extend_from_slice(&vec![0u8; *pad_len as usize]);
        }
    }
}

fn decode_body(t: u8, rest: &[u8]) -> Result<(LogOperation, usize)> {
    let mut buf = rest;
    let start_len = buf.len();
    macro_rules! need {
        ($n:expr) => {
            if buf.len() < $n {
                return Err(XlogError::bounds(format!("truncated record body for tag {}", t)));
            }
        };
    }

    let op = match t {
        tag::NEW_LOG => {
            need!(4);
            LogOperation::NewLog { log_id: buf.get_u32() }
        }
        tag::DEL_LOG => {
            need!(4);
            LogOperation::DelLog { log_id: buf.get_u32() }
        }
        tag::NEW_TAB => {
            need!(4);
            LogOperation::NewTab { tab_id: buf.get_u32() }
        }
        tag::COMMIT => {
            need!(4);
            LogOperation::Commit { xact_id: buf.get_u32() }
        }
        tag::ABORT => {
            need!(4);
            LogOperation::Abort { xact_id: buf.get_u32() }
        }
        tag::CLEANUP => {
            need!(4);
            LogOperation::Cleanup { xact_id: buf.get_u32() }
        }
        _ if MutationKind::from_tag(t).is_some() => {
            let kind = MutationKind::from_tag(t).unwrap();
            need!(33);
            let op_seq = buf.get_u64();
            let tab_id = buf.get_u32();
            let rec_id = buf.get_u32();
            let row_id = buf.get_u64();
            let xact_id = buf.get_u32();
            let has_fl = buf.get_u8();
            let fl = buf.get_u32();
            need!(4);
            let payload_len = buf.get_u32() as usize;
            need!(payload_len);
            let payload = Bytes::copy_from_slice(&buf[..payload_len]);
            buf.advance(payload_len);
            LogOperation::Mutation {
                kind,
                op_seq,
                tab_id,
                rec_id,
                row_id,
                xact_id,
                free_list_head: if has_fl == 1 && kind.has_free_list() { Some(fl) } else { None },
                payload,
            }
        }
        _ if RecFreeKind::from_tag(t).is_some() => {
            let kind = RecFreeKind::from_tag(t).unwrap();
            need!(21);
            let op_seq = buf.get_u64();
            let tab_id = buf.get_u32();
            let rec_id = buf.get_u32();
            let has_bi = buf.get_u8();
            let bi_len = buf.get_u32() as usize;
            let before_image = if has_bi == 1 {
                need!(bi_len);
                let b = Bytes::copy_from_slice(&buf[..bi_len]);
                buf.advance(bi_len);
                Some(b)
            } else {
                None
            };
            LogOperation::RecFree { kind, op_seq, tab_id, rec_id, before_image }
        }
        _ if RecMaintKind::from_tag(t).is_some() => {
            let (kind, short_form) = RecMaintKind::from_tag(t).unwrap();
            need!(24);
            let op_seq = buf.get_u64();
            let tab_id = buf.get_u32();
            let rec_id = buf.get_u32();
            let aux = buf.get_u64();
            LogOperation::RecMaint { kind, short_form, op_seq, tab_id, rec_id, aux }
        }
        _ if RowKind::from_tag(t).is_some() => {
            let kind = RowKind::from_tag(t).unwrap();
            need!(30);
            let op_seq = buf.get_u64();
            let tab_id = buf.get_u32();
            let row_id = buf.get_u64();
            let has_rec = buf.get_u8();
            let rec_id = buf.get_u32();
            let has_fl = buf.get_u8();
            let fl_delta = buf.get_i32();
            LogOperation::Row {
                kind,
                op_seq,
                tab_id,
                row_id,
                rec_id: if has_rec == 1 { Some(rec_id) } else { None },
                free_list_delta: if has_fl == 1 { Some(fl_delta) } else { None },
            }
        }
        tag::OP_SYNC => {
            need!(8);
            LogOperation::OpSync { time: buf.get_u64() }
        }
        tag::EXT_REC_OK | tag::EXT_REC_DEL => {
            need!(24);
            let tab_id = buf.get_u32();
            let rec_id = buf.get_u32();
            let ext_log_id = buf.get_u32();
            let ext_offset = buf.get_u64();
            let payload_len = buf.get_u32() as usize;
            need!(payload_len);
            let payload = Bytes::copy_from_slice(&buf[..payload_len]);
            buf.advance(payload_len);
            LogOperation::ExtRec {
                deleted: t == tag::EXT_REC_DEL,
                tab_id,
                rec_id,
                ext_log_id,
                ext_offset,
                payload,
            }
        }
        tag::NO_OP => {
            need!(12);
            let op_seq = buf.get_u64();
            let tab_id = buf.get_u32();
            LogOperation::NoOp { op_seq, tab_id }
        }
        tag::END_OF_LOG => {
            need!(2);
            let pad_len = buf.get_u16();
            need!(pad_len as usize);
            buf.advance(pad_len as usize);
            LogOperation::EndOfLog { pad_len }
        }
        other => return Err(XlogError::corrupt(format!("unknown record tag {}", other))),
    };

    Ok((op, start_len - buf.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(op: LogOperation) {
        let encoded = op.encode();
        let (decoded, consumed) = LogOperation::decode(&encoded).expect("decode should succeed");
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, op);
    }

    #[test]
    fn new_log_roundtrips() {
        roundtrip(LogOperation::NewLog { log_id: 42 });
    }

    #[test]
    fn commit_and_abort_roundtrip() {
        roundtrip(LogOperation::Commit { xact_id: 7 });
        roundtrip(LogOperation::Abort { xact_id: 7 });
        roundtrip(LogOperation::Cleanup { xact_id: 7 });
    }

    #[test]
    fn insert_roundtrips_with_payload() {
        roundtrip(LogOperation::Mutation {
            kind: MutationKind::Insert,
            op_seq: 1,
            tab_id: 7,
            rec_id: 100,
            row_id: 1,
            xact_id: 9,
            free_list_head: None,
            payload: Bytes::from_static(b"A"),
        });
    }

    #[test]
    fn insert_fl_roundtrips_with_free_list_head() {
        roundtrip(LogOperation::Mutation {
            kind: MutationKind::InsertFl,
            op_seq: 2,
            tab_id: 7,
            rec_id: 101,
            row_id: 2,
            xact_id: 9,
            free_list_head: Some(55),
            payload: Bytes::from_static(b"hello world"),
        });
    }

    #[test]
    fn empty_payload_roundtrips() {
        roundtrip(LogOperation::Mutation {
            kind: MutationKind::Delete,
            op_seq: 3,
            tab_id: 1,
            rec_id: 1,
            row_id: 1,
            xact_id: 1,
            free_list_head: None,
            payload: Bytes::new(),
        });
    }

    #[test]
    fn rec_free_with_and_without_before_image_roundtrips() {
        roundtrip(LogOperation::RecFree {
            kind: RecFreeKind::Removed,
            op_seq: 4,
            tab_id: 2,
            rec_id: 9,
            before_image: None,
        });
        roundtrip(LogOperation::RecFree {
            kind: RecFreeKind::RemovedBi,
            op_seq: 5,
            tab_id: 2,
            rec_id: 9,
            before_image: Some(Bytes::from_static(b"old-bytes")),
        });
    }

    #[test]
    fn cleaned_short_and_long_form_both_roundtrip() {
        let long = LogOperation::RecMaint {
            kind: RecMaintKind::Cleaned,
            short_form: false,
            op_seq: 1,
            tab_id: 1,
            rec_id: 1,
            aux: 0,
        };
        let short = LogOperation::RecMaint {
            kind: RecMaintKind::Cleaned,
            short_form: true,
            op_seq: 1,
            tab_id: 1,
            rec_id: 1,
            aux: 0,
        };
        assert_eq!(long.tag(), tag::REC_CLEANED);
        assert_eq!(short.tag(), tag::REC_CLEANED_1);
        roundtrip(long);
        roundtrip(short);
    }

    #[test]
    fn row_new_fl_roundtrips() {
        roundtrip(LogOperation::Row {
            kind: RowKind::NewFl,
            op_seq: 1,
            tab_id: 1,
            row_id: 100,
            rec_id: None,
            free_list_delta: Some(-3),
        });
    }

    #[test]
    fn op_sync_and_no_op_roundtrip() {
        roundtrip(LogOperation::OpSync { time: 1_700_000_000 });
        roundtrip(LogOperation::NoOp { op_seq: 9, tab_id: 3 });
    }

    #[test]
    fn ext_rec_roundtrips() {
        roundtrip(LogOperation::ExtRec {
            deleted: false,
            tab_id: 1,
            rec_id: 1,
            ext_log_id: 9,
            ext_offset: 4096,
            payload: Bytes::from_static(b"overflow payload"),
        });
    }

    #[test]
    fn end_of_log_pad_roundtrips() {
        roundtrip(LogOperation::EndOfLog { pad_len: 8 });
    }

    #[test]
    fn corrupted_checksum_is_detected() {
        let op = LogOperation::Commit { xact_id: 1 };
        let mut encoded = op.encode().to_vec();
        encoded[1] ^= 0xFF;
        let err = LogOperation::decode(&encoded).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Corrupt);
    }

    #[test]
    fn truncated_record_is_a_bounds_error() {
        let op = LogOperation::Mutation {
            kind: MutationKind::Insert,
            op_seq: 1,
            tab_id: 1,
            rec_id: 1,
            row_id: 1,
            xact_id: 1,
            free_list_head: None,
            payload: Bytes::from_static(b"payload"),
        };
        let encoded = op.encode();
        let truncated = &encoded[..encoded.len() - 3];
        let err = LogOperation::decode(truncated).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Bounds);
    }

    #[test]
    fn mutation_torn_right_after_the_free_list_flag_is_a_bounds_error_not_a_panic() {
        let op = LogOperation::Mutation {
            kind: MutationKind::Insert,
            op_seq: 1,
            tab_id: 1,
            rec_id: 1,
            row_id: 1,
            xact_id: 1,
            free_list_head: None,
            payload: Bytes::from_static(b"payload"),
        };
        let encoded = op.encode();
        // tag(1) + checksum(1) + op_seq(8) + tab_id(4) + rec_id(4) + row_id(8)
        // + xact_id(4) + has_fl(1) = 31 bytes: the free-list u32 is missing entirely.
        let truncated = &encoded[..31];
        let err = LogOperation::decode(truncated).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Bounds);
    }

    #[test]
    fn rec_free_torn_right_after_the_before_image_flag_is_a_bounds_error_not_a_panic() {
        let op = LogOperation::RecFree {
            kind: RecFreeKind::Removed,
            op_seq: 1,
            tab_id: 1,
            rec_id: 1,
            before_image: Some(Bytes::from_static(b"old")),
        };
        let encoded = op.encode();
        // tag(1) + checksum(1) + op_seq(8) + tab_id(4) + rec_id(4) + has_bi(1) = 19 bytes:
        // the before-image length u32 is missing entirely.
        let truncated = &encoded[..19];
        let err = LogOperation::decode(truncated).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Bounds);
    }

    #[test]
    fn row_torn_mid_fixed_portion_is_a_bounds_error_not_a_panic() {
        let op = LogOperation::Row {
            kind: RowKind::Set,
            op_seq: 1,
            tab_id: 1,
            row_id: 1,
            rec_id: Some(1),
            free_list_delta: Some(-1),
        };
        let encoded = op.encode();
        // tag(1) + checksum(1) + op_seq(8) + tab_id(4) + row_id(8) + has_rec(1) = 23 bytes:
        // rec_id, has_fl, and fl_delta are all missing.
        let truncated = &encoded[..23];
        let err = LogOperation::decode(truncated).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Bounds);
    }

    #[test]
    fn background_applicable_tags_are_exactly_the_bg_variants() {
        assert!(is_background_applicable(tag::INSERT_BG));
        assert!(is_background_applicable(tag::DELETE_FL_BG));
        assert!(!is_background_applicable(tag::INSERT));
        assert!(!is_background_applicable(tag::COMMIT));
    }
}
