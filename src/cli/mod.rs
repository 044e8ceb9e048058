//! Command-line surface: a single positional `path` plus the run's tunable options. Every
//! option also reads a `PURGE_*` environment variable; the CLI flag wins when both are
//! present.

use std::path::PathBuf;

use clap::Parser;

use crate::config::LogLevel;

#[derive(Debug, Parser)]
#[command(name = "purge", version, about = "Bulk-purge aged files from a directory tree")]
pub struct Cli {
    /// Root directory to purge. Never deleted, never recursed into via a symlink.
    pub path: PathBuf,

    /// Files with mtime >= now - max_age_days*86400 are preserved.
    #[arg(long, env = "PURGE_MAX_AGE_DAYS")]
    pub max_age_days: Option<f64>,

    /// Caps simultaneous stat/read operations.
    #[arg(long, env = "PURGE_MAX_CONCURRENCY_SCANNING")]
    pub max_concurrency_scanning: Option<usize>,

    /// Caps simultaneous unlink/rmdir operations.
    #[arg(long, env = "PURGE_MAX_CONCURRENCY_DELETION")]
    pub max_concurrency_deletion: Option<usize>,

    /// Deprecated: sets both scanning and deletion concurrency to the same value.
    #[arg(long, env = "PURGE_MAX_CONCURRENCY")]
    pub max_concurrency: Option<usize>,

    /// Caps simultaneous subdirectory walks.
    #[arg(long, env = "PURGE_MAX_CONCURRENT_SUBDIRS")]
    pub max_concurrent_subdirs: Option<usize>,

    /// File-pipeline flush threshold.
    #[arg(long, env = "PURGE_TASK_BATCH_SIZE")]
    pub task_batch_size: Option<usize>,

    /// Soft memory limit in MB; 0 disables memory logic.
    #[arg(long, env = "PURGE_MEMORY_LIMIT_MB")]
    pub memory_limit_mb: Option<u64>,

    /// Suppresses all mutations but keeps every `_to_*` counter.
    #[arg(long, env = "PURGE_DRY_RUN")]
    pub dry_run: bool,

    /// Enables the empty-directory reaper.
    #[arg(long, env = "PURGE_REMOVE_EMPTY_DIRS")]
    pub remove_empty_dirs: bool,

    /// Reaper rate limit; 0 = unlimited (warns at startup).
    #[arg(long, env = "PURGE_MAX_EMPTY_DIRS_TO_DELETE")]
    pub max_empty_dirs_to_delete: Option<u64>,

    /// Standard verbosity control.
    #[arg(long, env = "PURGE_LOG_LEVEL", value_enum)]
    pub log_level: Option<LogLevel>,

    /// Path to a `.purge.toml` config file, searched for by ancestor walk when omitted.
    #[arg(long, env = "PURGE_CONFIG")]
    pub config: Option<PathBuf>,
}

impl clap::ValueEnum for LogLevel {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }))
    }
}

impl Cli {
    /// Merges CLI-supplied fields onto `config`, the highest-priority layer.
    pub fn apply_to(&self, config: &mut crate::config::Config) {
        config.root = self.path.clone();
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
        if self.dry_run {
            config.dry_run = true;
        }
        if self.remove_empty_dirs {
            config.remove_empty_dirs = true;
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
    fn parses_positional_path_and_long_flags() {
        let cli = Cli::parse_from([
            "purge",
            "/data",
            "--max-age-days",
            "7",
            "--dry-run",
        ]);
        assert_eq!(cli.path, PathBuf::from("/data"));
        assert_eq!(cli.max_age_days, Some(7.0));
        assert!(cli.dry_run);
    }

    #[test]
    fn apply_to_overrides_only_present_fields() {
        let cli = Cli::parse_from(["purge", "/data", "--task-batch-size", "42"]);
        let mut config = crate::config::Config::default();
        cli.apply_to(&mut config);
        assert_eq!(config.task_batch_size, 42);
        assert_eq!(config.scan_slots, 1000);
        assert_eq!(config.root, PathBuf::from("/data"));
    }
}
