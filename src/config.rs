//! Engine configuration (spec §6's configuration table).
//!
//! Mirrors the named-preset pattern of `GraniteConfig` in the
//! teacher's own WAL worker (`default()` / `synchronous()` /
//! `high_throughput()`): a plain struct constructed directly, with a
//! handful of constructors tuned for common deployment shapes.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding `xlog-*.xt`, `xlog-cp-*.xt`, `datalog-*.xt`.
    pub data_dir: PathBuf,
    /// Rotation size for each log file (`xlog_file_threshold`).
    pub file_threshold: u64,
    /// Retain at least this many log files (`xlog_file_count`, a
    /// static lower bound only — see SPEC_FULL.md §9 open questions).
    pub file_count: u32,
    /// Per-buffer byte size, both append and write (`xlog_buffer_size`).
    pub buffer_size: usize,
    /// Total bytes of LogCache (`xlog_cache_size`).
    pub cache_size: usize,
    /// Number of LogCache segments; must be a power of two, >= 8.
    pub cache_segments: usize,
    /// Bytes appended between automatic checkpoints (`checkpoint_bytes`).
    pub checkpoint_bytes: u64,
    /// Verbosity of recovery progress reporting (`recovery_log_level`).
    pub recovery_log_level: RecoveryLogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryLogLevel {
    Quiet,
    Progress,
    Verbose,
}

impl Config {
    /// General-purpose defaults.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            file_threshold: 32 * 1024 * 1024,
            file_count: 3,
            buffer_size: 1024 * 1024,
            cache_size: 64 * 1024 * 1024,
            cache_segments: 16,
            checkpoint_bytes: 16 * 1024 * 1024,
            recovery_log_level: RecoveryLogLevel::Progress,
        }
    }

    /// Smaller buffers, more frequent checkpoints: favours fast crash
    /// recovery over append throughput.
    pub fn durable(data_dir: impl Into<PathBuf>) -> Self {
        let mut cfg = Self::new(data_dir);
        cfg.buffer_size = 64 * 1024;
        cfg.checkpoint_bytes = 2 * 1024 * 1024;
        cfg.recovery_log_level = RecoveryLogLevel::Verbose;
        cfg
    }

    /// Larger buffers and file threshold, wider checkpoint interval:
    /// favours append throughput for bulk loads.
    pub fn bulk_load(data_dir: impl Into<PathBuf>) -> Self {
        let mut cfg = Self::new(data_dir);
        cfg.file_threshold = 256 * 1024 * 1024;
        cfg.buffer_size = 4 * 1024 * 1024;
        cfg.checkpoint_bytes = 128 * 1024 * 1024;
        cfg
    }

    pub fn xlog_dir(&self) -> PathBuf {
        self.data_dir.join("pbxt")
    }

    pub fn log_file_path(&self, log_id: crate::position::LogId) -> PathBuf {
        self.xlog_dir().join(format!("xlog-{:08}.xt", log_id))
    }

    pub fn checkpoint_file_path(&self, slot: u8) -> PathBuf {
        self.xlog_dir().join(format!("xlog-cp-{}.xt", slot))
    }

    pub fn data_log_file_path(&self, log_id: crate::position::LogId) -> PathBuf {
        self.xlog_dir().join(format!("datalog-{:08}.xt", log_id))
    }

    /// Build a `Config` for `data_dir`, optionally overlaying values
    /// read from a JSON config file (the only place in this crate that
    /// reads one — see SPEC_FULL.md §10.1). `path` not existing is not
    /// an error: callers fall back to `Config::new`'s defaults.
    pub fn load(data_dir: impl Into<PathBuf>, config_file: Option<&Path>) -> Result<Self> {
        let mut config = Self::new(data_dir);
        if let Some(path) = config_file {
            if let Ok(contents) = std::fs::read_to_string(path) {
                let overrides: ConfigOverrides = serde_json::from_str(&contents)
                    .map_err(|e| crate::error::XlogError::corrupt(format!("invalid config file {}: {}", path.display(), e)))?;
                overrides.apply_to(&mut config);
            }
        }
        Ok(config)
    }
}

/// The subset of `Config` fields a JSON config file may override,
/// named after the configuration keys in spec §6. Every field is
/// optional so a config file only needs to mention the keys it wants
/// to change.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
struct ConfigOverrides {
    xlog_file_threshold: Option<u64>,
    xlog_file_count: Option<u32>,
    xlog_buffer_size: Option<usize>,
    xlog_cache_size: Option<usize>,
    checkpoint_bytes: Option<u64>,
}

impl ConfigOverrides {
    fn apply_to(self, config: &mut Config) {
        if let Some(v) = self.xlog_file_threshold {
            config.file_threshold = v;
        }
        if let Some(v) = self.xlog_file_count {
            config.file_count = v;
        }
        if let Some(v) = self.xlog_buffer_size {
            config.buffer_size = v;
        }
        if let Some(v) = self.xlog_cache_size {
            config.cache_size = v;
        }
        if let Some(v) = self.checkpoint_bytes {
            config.checkpoint_bytes = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_are_sane() {
        let cfg = Config::new("/tmp/db");
        assert!(cfg.file_threshold > 0);
        assert!(cfg.cache_segments.is_power_of_two());
        assert!(cfg.cache_segments >= 8);
    }

    #[test]
    fn durable_preset_checkpoints_more_often_than_default() {
        let default = Config::new("/tmp/db");
        let durable = Config::durable("/tmp/db");
        assert!(durable.checkpoint_bytes < default.checkpoint_bytes);
    }

    #[test]
    fn bulk_load_preset_uses_larger_files_than_default() {
        let default = Config::new("/tmp/db");
        let bulk = Config::bulk_load("/tmp/db");
        assert!(bulk.file_threshold > default.file_threshold);
    }

    #[test]
    fn file_paths_are_namespaced_under_pbxt() {
        let cfg = Config::new("/tmp/db");
        assert_eq!(cfg.log_file_path(1), PathBuf::from("/tmp/db/pbxt/xlog-00000001.xt"));
        assert_eq!(cfg.checkpoint_file_path(0), PathBuf::from("/tmp/db/pbxt/xlog-cp-0.xt"));
        assert_eq!(cfg.data_log_file_path(2), PathBuf::from("/tmp/db/pbxt/datalog-00000002.xt"));
    }

    #[test]
    fn load_without_a_config_file_falls_back_to_defaults() {
        let cfg = Config::load("/tmp/db", None).unwrap();
        assert_eq!(cfg.file_threshold, Config::new("/tmp/db").file_threshold);
    }

    #[test]
    fn load_overlays_only_the_keys_present_in_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ashlar.json");
        std::fs::write(&path, r#"{"checkpoint_bytes": 4096}"#).unwrap();

        let cfg = Config::load(dir.path(), Some(path.as_path())).unwrap();
        assert_eq!(cfg.checkpoint_bytes, 4096);
        assert_eq!(cfg.file_threshold, Config::new(dir.path()).file_threshold, "unrelated keys keep their defaults");
    }

    #[test]
    fn load_ignores_a_missing_config_file() {
        let cfg = Config::load("/tmp/db", Some(Path::new("/tmp/db/does-not-exist.json"))).unwrap();
        assert_eq!(cfg.checkpoint_bytes, Config::new("/tmp/db").checkpoint_bytes);
    }
}
