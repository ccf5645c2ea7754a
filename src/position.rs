//! Log identifiers and positions.
//!
//! `log_id = 0` is reserved ("none"); the first real log file is `1`.

use std::fmt;

pub type LogId = u32;
pub type LogOffset = u64;
pub type TabId = u32;
pub type XactId = u32;
pub type RecId = u32;
pub type RowId = u64;
pub type OpSeq = u64;

/// A reserved log id meaning "no log".
pub const NO_LOG_ID: LogId = 0;

/// A position in the total order over the log stream: `(log_id, log_offset)`,
/// ordered lexicographically with `log_id` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogPosition {
    pub log_id: LogId,
    pub log_offset: LogOffset,
}

impl LogPosition {
    pub const fn new(log_id: LogId, log_offset: LogOffset) -> Self {
        Self { log_id, log_offset }
    }

    /// The position at the very start of the log stream: the first
    /// byte of the first real log file, just past its header.
    ///
    /// The spec's own illustrative prose ("offset 32") predates the
    /// exact header byte table in spec §6, whose fields add up to 41
    /// bytes; this implementation treats the byte table as
    /// authoritative (see DESIGN.md) and derives this from
    /// `crate::header::HEADER_LEN` rather than hard-coding either
    /// number twice.
    pub const fn start_of_log() -> Self {
        Self::new(1, crate::header::HEADER_LEN as u64)
    }

    pub fn is_none(&self) -> bool {
        self.log_id == NO_LOG_ID
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.log_id, self.log_offset)
    }
}
