//! `SeqReader`: a sequential, verifying stream reader over the log
//! files (spec §4.3).
//!
//! Generalises the length-prefixed scan loop in
//! `granite/recovery.rs::RecoveryManager::recover` (one file, one
//! record shape) to the tagged multi-file format here: `NEW_LOG`
//! switches files transparently, `END_OF_LOG` ends the current file's
//! data without erroring, and a torn tail — the expected shape of the
//! very last record written before a crash — stops the stream rather
//! than propagating an error. Per the capability-set redesign in
//! SPEC_FULL.md §9, this is one struct with one `next` operation
//! rather than a reader class hierarchy.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use bytes::Bytes;

use crate::cache::{self, LogCache};
use crate::config::Config;
use crate::error::{ErrorKind, Result};
use crate::header;
use crate::position::{LogId, LogOffset, LogPosition};
use crate::record::LogOperation;

const INITIAL_SCAN_WINDOW: u64 = 4096;

pub struct SeqReader {
    config: Config,
    file: File,
    log_id: LogId,
    offset: LogOffset,
    file_len: u64,
    /// Set once a torn or corrupted record stops the stream.
    truncated: bool,
    /// When set, reads go through the cache instead of the file
    /// directly (spec §4.3: "via the LogCache, or direct file I/O,
    /// configurable").
    cache: Option<Arc<LogCache>>,
}

impl SeqReader {
    /// Open the file containing `position` and seek to it, reading
    /// directly from the file.
    pub fn start(config: Config, position: LogPosition) -> Result<Self> {
        Self::start_inner(config, position, None)
    }

    /// Like `start`, but blocks are served from `cache` when possible
    /// instead of re-reading disk, and any block this reader loads on a
    /// miss is left warm for the next caller.
    pub fn start_with_cache(config: Config, position: LogPosition, cache: Arc<LogCache>) -> Result<Self> {
        Self::start_inner(config, position, Some(cache))
    }

    fn start_inner(config: Config, position: LogPosition, cache: Option<Arc<LogCache>>) -> Result<Self> {
        let path = config.log_file_path(position.log_id);
        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        file.seek(SeekFrom::Start(position.log_offset))?;
        Ok(Self { config, file, log_id: position.log_id, offset: position.log_offset, file_len, truncated: false, cache })
    }

    /// The position of the record that the next call to `next` will return.
    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.log_id, self.offset)
    }

    /// True once the stream has stopped because of a torn or corrupted
    /// record rather than a clean `END_OF_LOG`/EOF.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Read the next logical record. `NEW_LOG` and `END_OF_LOG` are
    /// handled transparently: `NEW_LOG` switches files and keeps
    /// going, `END_OF_LOG` ends the stream cleanly (`Ok(None)`) without
    /// surfacing the pad record itself.
    pub fn next(&mut self) -> Result<Option<LogOperation>> {
        loop {
            let remaining = self.file_len.saturating_sub(self.offset);
            if remaining == 0 {
                return Ok(None);
            }

            let mut window = remaining.min(INITIAL_SCAN_WINDOW);
            loop {
                let buf = self.read_at_offset(window)?;
                match LogOperation::decode(&buf) {
                    Ok((op, consumed)) => {
                        self.offset += consumed as u64;
                        match op {
                            LogOperation::NewLog { log_id } => {
                                self.switch_to(log_id)?;
                                break;
                            }
                            LogOperation::EndOfLog { .. } => {
                                self.offset = self.file_len;
                                return Ok(None);
                            }
                            other => return Ok(Some(other)),
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Bounds => {
                        if window >= remaining {
                            self.truncated = true;
                            return Ok(None);
                        }
                        window = (window * 2).min(remaining);
                        continue;
                    }
                    Err(e) if e.kind() == ErrorKind::Corrupt => {
                        self.truncated = true;
                        return Ok(None);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    /// Skip `n` records, discarding them. Stops early if the stream ends.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        for _ in 0..n {
            if self.next()?.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// Read exactly one record at an arbitrary position without
    /// disturbing any ongoing sequential scan. Goes through `cache`
    /// (spec §4.3).
    pub fn rnd_read(config: Config, position: LogPosition, cache: Arc<LogCache>) -> Result<LogOperation> {
        let mut reader = Self::start_with_cache(config, position, cache)?;
        reader.next()?.ok_or_else(|| crate::error::XlogError::bounds("no record at the given position"))
    }

    fn read_at_offset(&mut self, len: u64) -> Result<Vec<u8>> {
        match self.cache.clone() {
            Some(cache) => self.read_at_offset_cached(&cache, len),
            None => self.read_at_offset_uncached(len),
        }
    }

    fn read_at_offset_uncached(&mut self, len: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len as usize];
        self.file.seek(SeekFrom::Start(self.offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Serve the read from `cache` when the whole request falls inside
    /// one cache block; falls back to a direct read otherwise (spanning
    /// reads and reads past the recorded file length, e.g. a record
    /// straddling a still-growing tail, are rare enough not to be worth
    /// multi-block cache assembly).
    fn read_at_offset_cached(&mut self, cache: &LogCache, len: u64) -> Result<Vec<u8>> {
        let (block_no, in_block) = cache::locate(self.offset);
        if in_block + len > cache::BLOCK_SIZE {
            return self.read_at_offset_uncached(len);
        }

        let log_id = self.log_id;
        let block_start = block_no * cache::BLOCK_SIZE;
        let block_len = cache::BLOCK_SIZE.min(self.file_len.saturating_sub(block_start));
        let file = &mut self.file;
        let block = cache.read(log_id, block_no, || {
            let mut buf = vec![0u8; block_len as usize];
            file.seek(SeekFrom::Start(block_start))?;
            file.read_exact(&mut buf)?;
            Ok(Bytes::from(buf))
        })?;

        let start = in_block as usize;
        let end = start + len as usize;
        if end > block.len() {
            // The cached block is shorter than what we need (e.g. it
            // was warmed from a batch that did not yet include this
            // tail); fall back rather than read past what is cached.
            return self.read_at_offset_uncached(len);
        }
        Ok(block[start..end].to_vec())
    }

    fn switch_to(&mut self, log_id: LogId) -> Result<()> {
        let path = self.config.log_file_path(log_id);
        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        file.seek(SeekFrom::Start(header::HEADER_LEN as u64))?;
        self.file = file;
        self.log_id = log_id;
        self.offset = header::HEADER_LEN as u64;
        self.file_len = file_len;
        Ok(())
    }
}
