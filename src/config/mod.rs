//! This module handles the configuration for `purge`.
//!
//! It defines the structure of the effective configuration and provides functionality for
//! loading, parsing, and merging it from an optional `.purge.toml` file, environment
//! variables, and command-line arguments. CLI wins over env, env wins over the config
//! file, the config file wins over built-in defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::types::{PurgeError, Result};

/// Verbosity levels accepted by `log_level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl LogLevel {
    pub fn as_tracing_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// System path prefixes a root must never equal or resolve inside.
pub const BLOCKED_PREFIXES: &[&str] = &[
    "/proc", "/sys", "/dev", "/run", "/boot", "/bin", "/sbin", "/lib", "/etc",
];

/// The fully validated, immutable configuration for one purge run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub root: PathBuf,
    pub max_age_days: f64,
    pub scan_slots: usize,
    pub delete_slots: usize,
    pub subdir_slots: usize,
    pub task_batch_size: usize,
    pub memory_limit_mb: u64,
    pub hard_memory_ratio: f64,
    pub dry_run: bool,
    pub remove_empty_dirs: bool,
    pub max_empty_dirs_per_run: u64,
    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            max_age_days: 30.0,
            scan_slots: 1000,
            delete_slots: 1000,
            subdir_slots: 100,
            task_batch_size: 500,
            memory_limit_mb: 0,
            hard_memory_ratio: 0.95,
            dry_run: false,
            remove_empty_dirs: false,
            max_empty_dirs_per_run: 500,
            log_level: LogLevel::Info,
        }
    }
}

impl Config {
    /// The mtime cutoff: files older than this are purge candidates.
    pub fn cutoff(&self, now: SystemTime) -> SystemTime {
        if self.max_age_days.is_infinite() {
            return SystemTime::UNIX_EPOCH;
        }
        let secs = (self.max_age_days * 86_400.0).max(0.0);
        now.checked_sub(Duration::from_secs_f64(secs))
            .unwrap_or(SystemTime::UNIX_EPOCH)
    }

    /// Validates domain constraints on the effective config. Run once, after every layer
    /// (file/env/CLI) has been merged in.
    pub fn validate(&self) -> Result<()> {
        if self.max_age_days < 0.0 {
            return Err(PurgeError::ConfigInvalid(
                "max_age_days must be >= 0".into(),
            ));
        }
        if self.scan_slots == 0 {
            return Err(PurgeError::ConfigInvalid(
                "max_concurrency_scanning must be > 0".into(),
            ));
        }
        if self.delete_slots == 0 {
            return Err(PurgeError::ConfigInvalid(
                "max_concurrency_deletion must be > 0".into(),
            ));
        }
        if self.subdir_slots == 0 {
            return Err(PurgeError::ConfigInvalid(
                "max_concurrent_subdirs must be > 0".into(),
            ));
        }
        if self.task_batch_size == 0 {
            return Err(PurgeError::ConfigInvalid(
                "task_batch_size must be >= 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.hard_memory_ratio) {
            return Err(PurgeError::ConfigInvalid(
                "hard_memory_ratio must be in [0, 1]".into(),
            ));
        }
        if !self.root.is_absolute() {
            return Err(PurgeError::ConfigInvalid(
                "root path must be absolute".into(),
            ));
        }
        Ok(())
    }

    /// Applies a legacy single-knob `max_concurrency` override to both scan and delete slots,
    /// emitting the mandated one-time deprecation warning.
    pub fn apply_legacy_max_concurrency(&mut self, value: usize) {
        tracing::warn!(
            value,
            "max_concurrency is deprecated; use max_concurrency_scanning and max_concurrency_deletion"
        );
        self.scan_slots = value;
        self.delete_slots = value;
    }

    /// Warns at startup when the reaper rate limit is unlimited, suggesting a safer value
    /// derived from the soft memory limit.
    pub fn warn_if_unlimited_empty_dir_rate(&self) {
        if self.max_empty_dirs_per_run == 0 && self.memory_limit_mb > 0 {
            const PER_PATH_OVERHEAD_BYTES: u64 = 200;
            let suggested =
                (self.memory_limit_mb * 1024 * 1024 * 70 / 100) / PER_PATH_OVERHEAD_BYTES;
            tracing::warn!(
                suggested_max_empty_dirs_per_run = suggested,
                "max_empty_dirs_per_run is unlimited (0); consider a bound near 70% of the soft memory limit"
            );
        }
    }
}

/// The `.purge.toml` file shape. Every field optional; absent fields fall through to
/// whatever the next-lower-priority layer supplies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub max_age_days: Option<f64>,
    pub max_concurrency_scanning: Option<usize>,
    pub max_concurrency_deletion: Option<usize>,
    pub max_concurrency: Option<usize>,
    pub max_concurrent_subdirs: Option<usize>,
    pub task_batch_size: Option<usize>,
    pub memory_limit_mb: Option<u64>,
    pub dry_run: Option<bool>,
    pub remove_empty_dirs: Option<bool>,
    pub max_empty_dirs_to_delete: Option<u64>,
    pub log_level: Option<LogLevel>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Searches `start` and its ancestors for a `.purge.toml`, returning the first hit.
    pub fn find_ancestor(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(".purge.toml"))
            .find(|candidate| candidate.is_file())
    }

    pub fn apply_to(&self, config: &mut Config) {
        if let Some(v) = self.max_age_days {
            config.max_age_days = v;
        }
        if let Some(v) = self.max_concurrency_scanning {
            config.scan_slots = v;
        }
        if let Some(v) = self.max_concurrency_deletion {
            config.delete_slots = v;
        }
        if let Some(v) = self.max_concurrency {
            config.apply_legacy_max_concurrency(v);
        }
        if let Some(v) = self.max_concurrent_subdirs {
            config.subdir_slots = v;
        }
        if let Some(v) = self.task_batch_size {
            config.task_batch_size = v;
        }
        if let Some(v) = self.memory_limit_mb {
            config.memory_limit_mb = v;
        }
        if let Some(v) = self.dry_run {
            config.dry_run = v;
        }
        if let Some(v) = self.remove_empty_dirs {
            config.remove_empty_dirs = v;
        }
        if let Some(v) = self.max_empty_dirs_to_delete {
            config.max_empty_dirs_per_run = v;
        }
        if let Some(v) = self.log_level {
            config.log_level = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_once_root_is_absolute() {
        let mut config = Config::default();
        config.root = PathBuf::from("/tmp/purge-default-test");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_batch_size() {
        let mut config = Config::default();
        config.root = PathBuf::from("/tmp");
        config.task_batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(PurgeError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn cutoff_moves_back_by_max_age_days() {
        let config = Config {
            max_age_days: 1.0,
            ..Config::default()
        };
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(86_400 * 10);
        let cutoff = config.cutoff(now);
        assert_eq!(cutoff, now - Duration::from_secs(86_400));
    }

    #[test]
    fn infinite_max_age_pins_cutoff_to_epoch() {
        let config = Config {
            max_age_days: f64::INFINITY,
            ..Config::default()
        };
        assert_eq!(config.cutoff(SystemTime::now()), SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn config_file_merge_prefers_present_fields() {
        let mut config = Config::default();
        let file = ConfigFile {
            task_batch_size: Some(42),
            ..ConfigFile::default()
        };
        file.apply_to(&mut config);
        assert_eq!(config.task_batch_size, 42);
        assert_eq!(config.scan_slots, 1000);
    }

    #[test]
    fn legacy_max_concurrency_sets_both_slots() {
        let mut config = Config::default();
        config.apply_legacy_max_concurrency(77);
        assert_eq!(config.scan_slots, 77);
        assert_eq!(config.delete_slots, 77);
    }
}
