//! `Checkpointer`: automatic checkpoint triggering, the cooperative
//! per-table flush queue, and the two rotating checkpoint files (spec §4.4).
//!
//! The byte-threshold auto-checkpoint trigger generalises
//! `TransactionManager`'s `bytes_since_checkpoint` `AtomicU64` counter
//! and its `checkpoint_threshold_bytes` config knob in
//! `granite/manager.rs`. The four-state per-table flush bitset mirrors
//! `XTCheckPointState` from the original core's `restart_xt.h`
//! (`NoneFlushed` / `RecRowFlushed` / `IndexFlushed` / `AllFlushed`):
//! a checkpoint only needs to remember how far each table's own flush
//! has progressed, not re-flush tables that are already durable.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

use crate::checkpoint::{self, Checkpoint};
use crate::config::Config;
use crate::error::Result;
use crate::position::{LogId, LogPosition, TabId, XactId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    NoneFlushed,
    RecRowFlushed,
    IndexFlushed,
    AllFlushed,
}

struct CheckpointerState {
    checkpoint_number: u64,
    flush_states: HashMap<TabId, FlushState>,
    bytes_since_checkpoint: u64,
}

pub struct Checkpointer {
    config: Config,
    state: Mutex<CheckpointerState>,
}

impl Checkpointer {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: Mutex::new(CheckpointerState {
                checkpoint_number: 0,
                flush_states: HashMap::new(),
                bytes_since_checkpoint: 0,
            }),
        }
    }

    /// Resume from a checkpoint found during recovery.
    pub fn resume_from(config: Config, checkpoint_number: u64) -> Self {
        Self {
            config,
            state: Mutex::new(CheckpointerState {
                checkpoint_number,
                flush_states: HashMap::new(),
                bytes_since_checkpoint: 0,
            }),
        }
    }

    pub fn register_table(&self, tab_id: TabId) {
        self.state.lock().unwrap().flush_states.entry(tab_id).or_insert(FlushState::NoneFlushed);
    }

    pub fn forget_table(&self, tab_id: TabId) {
        self.state.lock().unwrap().flush_states.remove(&tab_id);
    }

    pub fn flush_state(&self, tab_id: TabId) -> Option<FlushState> {
        self.state.lock().unwrap().flush_states.get(&tab_id).copied()
    }

    pub fn mark_flushed(&self, tab_id: TabId, new_state: FlushState) {
        if let Some(entry) = self.state.lock().unwrap().flush_states.get_mut(&tab_id) {
            *entry = new_state;
        }
    }

    /// Next table whose flush hasn't reached `AllFlushed`, if any. The
    /// caller (the background checkpoint worker) flushes it and reports
    /// back via `mark_flushed`; this is a cooperative queue, not a
    /// work-stealing one, so at most one caller drives it at a time.
    pub fn next_to_flush(&self) -> Option<TabId> {
        let state = self.state.lock().unwrap();
        state
            .flush_states
            .iter()
            .find(|(_, s)| **s != FlushState::AllFlushed)
            .map(|(id, _)| *id)
    }

    pub fn note_appended_bytes(&self, n: u64) {
        self.state.lock().unwrap().bytes_since_checkpoint += n;
    }

    /// Whether enough has been appended since the last checkpoint to
    /// trigger another one automatically.
    pub fn should_checkpoint(&self) -> bool {
        self.state.lock().unwrap().bytes_since_checkpoint >= self.config.checkpoint_bytes
    }

    pub fn current_checkpoint_number(&self) -> u64 {
        self.state.lock().unwrap().checkpoint_number
    }

    /// Build, encode, and durably write the next checkpoint record,
    /// rotating between the two checkpoint files by parity. Resets
    /// every registered table's flush state to `NoneFlushed` and the
    /// byte counter, and returns the written checkpoint for the caller
    /// to log or inspect.
    pub fn perform_checkpoint(
        &self,
        restart_position: LogPosition,
        high_water_tab_id: TabId,
        high_water_xact_id: XactId,
        ind_recovery_position: LogPosition,
        deletable_log_ids: Vec<LogId>,
    ) -> Result<Checkpoint> {
        let mut state = self.state.lock().unwrap();
        let checkpoint_number = state.checkpoint_number + 1;

        let checkpoint = Checkpoint {
            checkpoint_number,
            restart_log_id: restart_position.log_id,
            restart_log_offset: restart_position.log_offset,
            high_water_tab_id,
            high_water_xact_id,
            ind_recovery_log_id: ind_recovery_position.log_id,
            ind_recovery_log_offset: ind_recovery_position.log_offset,
            deletable_log_ids,
        };

        let slot = checkpoint::file_slot(checkpoint_number);
        let path = self.config.checkpoint_file_path(slot);
        std::fs::create_dir_all(self.config.xlog_dir())?;
        let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(&path)?;
        file.write_all(&checkpoint.encode())?;
        file.sync_all()?;

        state.checkpoint_number = checkpoint_number;
        state.bytes_since_checkpoint = 0;
        for v in state.flush_states.values_mut() {
            *v = FlushState::NoneFlushed;
        }

        Ok(checkpoint)
    }

    /// Load whichever of the two checkpoint files has the greatest
    /// valid checkpoint number (spec §4.6 recovery rule). Returns
    /// `None` if neither file exists or decodes.
    pub fn load_latest(config: &Config) -> Option<Checkpoint> {
        let mut best: Option<Checkpoint> = None;
        for slot in 0..2u8 {
            let path = config.checkpoint_file_path(slot);
            let Ok(bytes) = std::fs::read(&path) else { continue };
            let Ok(cp) = Checkpoint::decode(&bytes) else { continue };
            if best.as_ref().map(|b| cp.checkpoint_number > b.checkpoint_number).unwrap_or(true) {
                best = Some(cp);
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn newly_registered_table_starts_none_flushed() {
        let dir = tempdir().unwrap();
        let cp = Checkpointer::new(Config::new(dir.path()));
        cp.register_table(1);
        assert_eq!(cp.flush_state(1), Some(FlushState::NoneFlushed));
    }

    #[test]
    fn next_to_flush_skips_tables_already_all_flushed() {
        let dir = tempdir().unwrap();
        let cp = Checkpointer::new(Config::new(dir.path()));
        cp.register_table(1);
        cp.register_table(2);
        cp.mark_flushed(1, FlushState::AllFlushed);
        assert_eq!(cp.next_to_flush(), Some(2));
    }

    #[test]
    fn should_checkpoint_follows_the_configured_byte_threshold() {
        let dir = tempdir().unwrap();
        let mut config = Config::new(dir.path());
        config.checkpoint_bytes = 100;
        let cp = Checkpointer::new(config);
        assert!(!cp.should_checkpoint());
        cp.note_appended_bytes(150);
        assert!(cp.should_checkpoint());
    }

    #[test]
    fn performing_a_checkpoint_resets_counters_and_flush_states() {
        let dir = tempdir().unwrap();
        let mut config = Config::new(dir.path());
        config.checkpoint_bytes = 100;
        let cp = Checkpointer::new(config);
        cp.register_table(1);
        cp.mark_flushed(1, FlushState::AllFlushed);
        cp.note_appended_bytes(200);

        let restart = LogPosition::new(1, 41);
        let written = cp.perform_checkpoint(restart, 1, 1, restart, vec![]).unwrap();

        assert_eq!(written.checkpoint_number, 1);
        assert!(!cp.should_checkpoint());
        assert_eq!(cp.flush_state(1), Some(FlushState::NoneFlushed));
    }

    #[test]
    fn checkpoint_files_rotate_by_parity() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path());
        let cp = Checkpointer::new(config.clone());
        let restart = LogPosition::new(1, 41);

        cp.perform_checkpoint(restart, 1, 1, restart, vec![]).unwrap();
        assert!(config.checkpoint_file_path(1).exists());

        cp.perform_checkpoint(restart, 1, 1, restart, vec![]).unwrap();
        assert!(config.checkpoint_file_path(0).exists());
    }

    #[test]
    fn load_latest_picks_the_greater_checkpoint_number() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path());
        let cp = Checkpointer::new(config.clone());
        let restart = LogPosition::new(1, 41);

        cp.perform_checkpoint(restart, 1, 1, restart, vec![]).unwrap();
        cp.perform_checkpoint(LogPosition::new(2, 41), 2, 2, restart, vec![]).unwrap();

        let latest = Checkpointer::load_latest(&config).unwrap();
        assert_eq!(latest.checkpoint_number, 2);
        assert_eq!(latest.restart_log_id, 2);
    }

    #[test]
    fn load_latest_is_none_when_no_checkpoint_file_exists() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path());
        assert!(Checkpointer::load_latest(&config).is_none());
    }
}
