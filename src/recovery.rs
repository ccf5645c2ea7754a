//! Crash recovery (spec §4.6): pick a checkpoint, execute its deletable
//! log list, replay forward, and hand back a writer positioned exactly
//! where the durable stream ends.
//!
//! Generalises the overall shape of `RecoveryManager::recover` in
//! `granite/recovery.rs` — pick a starting point, scan forward,
//! dispatch each record, report progress, then hand control back to
//! normal operation — from a single-file length-prefixed scan with a
//! two-pass redo/undo split to the multi-file tagged stream here, which
//! is forward-only (every record is already the post-image; there is
//! no undo pass because nothing is logged before it is known durable).

use std::sync::Arc;

use crate::applier::{ApplyOutcome, Applier};
use crate::cache::LogCache;
use crate::checkpoint::Checkpoint;
use crate::checkpointer::Checkpointer;
use crate::config::{Config, RecoveryLogLevel};
use crate::error::Result;
use crate::header::LogHeader;
use crate::position::LogPosition;
use crate::reader::SeqReader;
use crate::record::LogOperation;
use crate::writer::LogWriter;

const PROGRESS_REPORT_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug)]
pub struct RecoveredState {
    pub checkpoint: Option<Checkpoint>,
    pub restart_position: LogPosition,
    /// Where a new writer should resume appending: just past the last
    /// fully valid record found.
    pub append_position: LogPosition,
    /// Whether the stream ended in a torn/corrupted trailing record
    /// rather than a clean `END_OF_LOG`/EOF.
    pub truncated: bool,
    pub records_applied: u64,
    pub records_skipped: u64,
}

/// Recover `config`'s data directory: pick the checkpoint with the
/// greatest valid checkpoint number (or the very start of the log if
/// none exists), delete the logs it already proved deletable, then
/// replay everything from the restart position through `applier`.
pub fn recover(config: &Config, applier: &Applier) -> Result<RecoveredState> {
    let checkpoint = Checkpointer::load_latest(config);

    if let Some(cp) = &checkpoint {
        for log_id in &cp.deletable_log_ids {
            let _ = std::fs::remove_file(config.log_file_path(*log_id));
        }
    }

    let restart_position =
        checkpoint.as_ref().map(|c| LogPosition::new(c.restart_log_id, c.restart_log_offset)).unwrap_or_else(LogPosition::start_of_log);

    let mut reader = SeqReader::start(config.clone(), restart_position)?;
    let mut records_applied = 0u64;
    let mut records_skipped = 0u64;
    let mut last_position = restart_position;
    let mut next_report = restart_position.log_offset + PROGRESS_REPORT_BYTES;

    loop {
        let position = reader.position();
        let Some(op) = reader.next()? else { break };

        if let LogOperation::DelLog { log_id } = op {
            let _ = std::fs::remove_file(config.log_file_path(log_id));
        }

        match applier.apply(position, &op)? {
            ApplyOutcome::Applied => records_applied += 1,
            _ => records_skipped += 1,
        }

        last_position = reader.position();
        if config.recovery_log_level != RecoveryLogLevel::Quiet && last_position.log_offset >= next_report {
            log::info!(
                "recovery: reached {}, {} applied, {} skipped",
                last_position,
                records_applied,
                records_skipped
            );
            next_report = last_position.log_offset + PROGRESS_REPORT_BYTES;
        }
        if config.recovery_log_level == RecoveryLogLevel::Verbose {
            log::debug!("recovery: applied {:?} at {}", op, position);
        }
    }

    applier.flush_all()?;

    log::info!(
        "recovery complete: restart {}, append {}, {} applied, {} skipped{}",
        restart_position,
        last_position,
        records_applied,
        records_skipped,
        if reader.truncated() { " (torn tail truncated)" } else { "" }
    );

    Ok(RecoveredState {
        checkpoint,
        restart_position,
        append_position: last_position,
        truncated: reader.truncated(),
        records_applied,
        records_skipped,
    })
}

/// Truncate the current log file to the recovered append position and
/// hand back a `LogWriter` ready to resume appending. Separate from
/// `recover` so callers that only want to inspect recovery (the
/// `xlogctl status`/`dump` subcommands) don't pay for reopening files
/// for write.
pub fn reopen_writer_after_recovery(config: Config, recovered: &RecoveredState, cache: Arc<LogCache>) -> Result<LogWriter> {
    use std::fs::OpenOptions;

    let path = config.log_file_path(recovered.append_position.log_id);
    let file = OpenOptions::new().read(true).write(true).open(&path)?;
    file.set_len(recovered.append_position.log_offset)?;

    let mut header_buf = vec![0u8; crate::header::HEADER_LEN];
    {
        use std::io::{Read, Seek, SeekFrom};
        let mut header_file = OpenOptions::new().read(true).open(&path)?;
        header_file.seek(SeekFrom::Start(0))?;
        header_file.read_exact(&mut header_buf)?;
    }
    let header = LogHeader::decode(&header_buf)?;

    Ok(LogWriter::from_recovered(config, recovered.append_position, header, file, cache))
}
