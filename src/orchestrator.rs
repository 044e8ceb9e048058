//! Top-level `purge()`: validates inputs, starts the reporter, runs the walker, runs the
//! reaper, stops the reporter, returns the final stats snapshot.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::Config;
use crate::empty_dirs::EmptyDirSet;
use crate::engine::reaper::{self, ReaperConfig};
use crate::engine::walker::{self, ActiveDirs, WalkContext};
use crate::memory::MemoryMonitor;
use crate::safety;
use crate::scheduling::Scheduler;
use crate::stats::{self, ProgressReporter, Snapshot, Stats};
use crate::types::{Phase, Result};

/// Runs one full purge against `config` and returns the terminal stats snapshot.
///
/// Fails only with `ConfigInvalid` or `RootBlocked`, both raised before any I/O. Every
/// other failure mode is absorbed into the returned `Stats` and logged.
pub async fn purge(config: Config, clock: Arc<dyn Clock>) -> Result<Snapshot> {
    config.validate()?;

    let root = config
        .root
        .canonicalize()
        .unwrap_or_else(|_| config.root.clone());
    safety::check_root_not_blocked(&root)?;

    config.warn_if_unlimited_empty_dir_rate();
    stats::log_startup(&config);

    let config = Arc::new(config);
    let stats = Stats::new();
    let memory = Arc::new(MemoryMonitor::new(config.memory_limit_mb, config.hard_memory_ratio));
    let scheduler = Scheduler::new(config.scan_slots, config.delete_slots, config.subdir_slots);
    let empty_dirs = EmptyDirSet::new();
    let aborted = Arc::new(AtomicBool::new(false));
    let effective_batch_size = Arc::new(AtomicUsize::new(config.task_batch_size));
    let active_dirs = ActiveDirs::new();

    let reporter = ProgressReporter::spawn(
        stats.clone(),
        memory.clone(),
        effective_batch_size.clone(),
        active_dirs.clone(),
    );

    stats.set_phase(Phase::Scanning).await;
    let now = clock.now();
    stats.mark_scan_start(now).await;
    let cutoff = config.cutoff(now);

    let walk_ctx = WalkContext::new(
        config.clone(),
        clock.clone(),
        scheduler.clone(),
        stats.clone(),
        empty_dirs.clone(),
        active_dirs,
        memory.clone(),
        cutoff,
        aborted.clone(),
        effective_batch_size,
    );
    walker::walk_root(walk_ctx, root.clone()).await;

    stats.mark_scan_end(clock.now()).await;

    if config.remove_empty_dirs && !aborted.load(Ordering::Relaxed) {
        stats.set_phase(Phase::RemovingEmptyDirs).await;
        reaper::run(
            empty_dirs,
            root.clone(),
            ReaperConfig {
                dry_run: config.dry_run,
                max_empty_dirs_per_run: config.max_empty_dirs_per_run,
                delete_slots: config.delete_slots,
            },
            scheduler.clone(),
            stats.clone(),
            memory.clone(),
            aborted.clone(),
        )
        .await;
    }

    if !aborted.load(Ordering::Relaxed) {
        stats.set_phase(Phase::Completed).await;
    }

    reporter.stop();

    let snapshot = stats.snapshot().await;
    stats::log_final(&snapshot);
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use tempfile::tempdir;

    #[tokio::test]
    async fn empty_root_produces_all_zero_counters() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.root = dir.path().to_path_buf();

        let snapshot = purge(config, Arc::new(SystemClock)).await.unwrap();

        assert_eq!(snapshot.files_scanned, 0);
        assert_eq!(snapshot.files_purged, 0);
        assert_eq!(snapshot.phase, Phase::Completed);
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn root_blocked_fails_before_any_io() {
        let mut config = Config::default();
        config.root = "/etc".into();

        let result = purge(config, Arc::new(SystemClock)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn invalid_config_fails_fast() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.root = dir.path().to_path_buf();
        config.task_batch_size = 0;

        let result = purge(config, Arc::new(SystemClock)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn idempotent_second_run_purges_nothing() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("stale.txt");
        std::fs::write(&file, b"x").unwrap();
        filetime::set_file_mtime(
            &file,
            filetime::FileTime::from_system_time(
                std::time::SystemTime::now() - std::time::Duration::from_secs(60 * 86_400),
            ),
        )
        .unwrap();

        let mut config = Config::default();
        config.root = dir.path().to_path_buf();
        config.max_age_days = 30.0;

        let first = purge(config.clone(), Arc::new(SystemClock)).await.unwrap();
        assert_eq!(first.files_purged, 1);

        let second = purge(config, Arc::new(SystemClock)).await.unwrap();
        assert_eq!(second.files_purged, 0);
    }
}
