//! Error types for the log core.
//!
//! A single error type covers every subsystem (writer, cache, reader,
//! checkpointer, applier, recovery). Each variant maps to one of the
//! error kinds in the spec's error handling design.

use std::fmt;
use std::io;

/// Coarse classification used by callers that need to decide how to
/// react (retry, treat as fatal, skip a table) without matching on the
/// full variant set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Corrupt,
    Bounds,
    Retry,
    Shutdown,
}

/// Unified error type for the log core.
#[derive(Debug)]
pub enum XlogError {
    /// Filesystem error. Fatal for the writer, operational for the applier.
    Io(io::Error),
    /// Checksum, magic, or version mismatch.
    Corrupt(String),
    /// Request outside EOF for a random read.
    Bounds(String),
    /// Transient contention; caller should back off and retry.
    Retry(String),
    /// Thread observed a shutdown signal.
    Shutdown,
    /// The writer is in the failed state following an earlier I/O error.
    WriterFailed,
    /// A table the applier needs to act on is gone.
    TableGone(u32),
    /// Generic internal error not covered by the above.
    Internal(String),
}

impl XlogError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        XlogError::Corrupt(msg.into())
    }

    pub fn bounds(msg: impl Into<String>) -> Self {
        XlogError::Bounds(msg.into())
    }

    pub fn retry(msg: impl Into<String>) -> Self {
        XlogError::Retry(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            XlogError::Io(_) | XlogError::WriterFailed | XlogError::TableGone(_) => ErrorKind::Io,
            XlogError::Corrupt(_) => ErrorKind::Corrupt,
            XlogError::Bounds(_) => ErrorKind::Bounds,
            XlogError::Retry(_) => ErrorKind::Retry,
            XlogError::Shutdown => ErrorKind::Shutdown,
            XlogError::Internal(_) => ErrorKind::Io,
        }
    }
}

impl fmt::Display for XlogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XlogError::Io(e) => write!(f, "{}", e),
            XlogError::Corrupt(msg) => write!(f, "log corrupt: {}", msg),
            XlogError::Bounds(msg) => write!(f, "out of bounds: {}", msg),
            XlogError::Retry(msg) => write!(f, "retry: {}", msg),
            XlogError::Shutdown => write!(f, "shutdown"),
            XlogError::WriterFailed => write!(f, "writer is in the failed state; restart required"),
            XlogError::TableGone(tab_id) => write!(f, "table {} is gone", tab_id),
            XlogError::Internal(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for XlogError {}

impl From<io::Error> for XlogError {
    fn from(e: io::Error) -> Self {
        XlogError::Io(e)
    }
}

/// Result type alias used throughout the log core.
pub type Result<T> = std::result::Result<T, XlogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_mapping_matches_spec_error_kinds() {
        assert_eq!(XlogError::corrupt("bad checksum").kind(), ErrorKind::Corrupt);
        assert_eq!(XlogError::bounds("past eof").kind(), ErrorKind::Bounds);
        assert_eq!(XlogError::retry("buffer full").kind(), ErrorKind::Retry);
        assert_eq!(XlogError::Shutdown.kind(), ErrorKind::Shutdown);
        assert_eq!(XlogError::WriterFailed.kind(), ErrorKind::Io);
    }

    #[test]
    fn io_error_converts() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let e: XlogError = io_err.into();
        assert!(matches!(e, XlogError::Io(_)));
    }

    #[test]
    fn display_is_human_readable() {
        let e = XlogError::TableGone(7);
        assert_eq!(e.to_string(), "table 7 is gone");
    }
}
