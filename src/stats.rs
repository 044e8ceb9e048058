//! Process-wide counters and the periodic progress reporter.
//!
//! `Stats` is the single piece of widely-mutated shared state in the crate. Every counter
//! update goes through `stats_lock`; reads for logging take a snapshot under the lock and
//! release it before formatting or emitting anything.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::engine::walker::ActiveDirs;
use crate::memory::{shrink_batch_size, Escalation, MemoryMonitor};
use crate::types::Phase;

#[derive(Debug, Default)]
struct Counters {
    files_scanned: u64,
    files_to_purge: u64,
    files_purged: u64,
    dirs_scanned: u64,
    symlinks_skipped: u64,
    special_files_skipped: u64,
    empty_dirs_found: u64,
    empty_dirs_to_delete: u64,
    empty_dirs_deleted: u64,
    errors: u64,
    bytes_freed: u64,
    backpressure_events: u64,
    stuck_intervals: u64,
}

struct StatsInner {
    counters: Counters,
    peak_memory: u64,
    scan_start: Option<SystemTime>,
    scan_end: Option<SystemTime>,
    phase: Phase,
    abort_reason: Option<String>,
}

impl Default for StatsInner {
    fn default() -> Self {
        Self {
            counters: Counters::default(),
            peak_memory: 0,
            scan_start: None,
            scan_end: None,
            phase: Phase::Starting,
            abort_reason: None,
        }
    }
}

/// A point-in-time read of every counter, safe to serialize and log once the lock is
/// released.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub files_scanned: u64,
    pub files_to_purge: u64,
    pub files_purged: u64,
    pub dirs_scanned: u64,
    pub symlinks_skipped: u64,
    pub special_files_skipped: u64,
    pub empty_dirs_found: u64,
    pub empty_dirs_to_delete: u64,
    pub empty_dirs_deleted: u64,
    pub errors: u64,
    pub bytes_freed: u64,
    pub backpressure_events: u64,
    pub peak_memory: u64,
    pub stuck_intervals: u64,
    pub phase: Phase,
    pub abort_reason: Option<String>,
    /// RFC3339, not a `SystemTime` — `serde` has no blanket impl for that type.
    pub scan_start: Option<String>,
    pub scan_end: Option<String>,
    /// `scan_end - scan_start`, excluding empty-dir reaping. Zero until both are set.
    pub overall_files_per_sec: f64,
    pub overall_dirs_per_sec: f64,
}

fn to_rfc3339(at: Option<SystemTime>) -> Option<String> {
    at.map(|at| chrono::DateTime::<chrono::Utc>::from(at).to_rfc3339())
}

/// Shared, cloneable handle onto the single `Stats` instance for a run.
#[derive(Clone)]
pub struct Stats {
    inner: Arc<Mutex<StatsInner>>,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StatsInner::default())),
        }
    }

    pub async fn set_phase(&self, phase: Phase) {
        self.inner.lock().await.phase = phase;
    }

    pub async fn set_abort_reason(&self, reason: impl Into<String>) {
        let mut guard = self.inner.lock().await;
        guard.phase = Phase::Aborted;
        guard.abort_reason = Some(reason.into());
    }

    pub async fn mark_scan_start(&self, at: SystemTime) {
        self.inner.lock().await.scan_start = Some(at);
    }

    pub async fn mark_scan_end(&self, at: SystemTime) {
        self.inner.lock().await.scan_end = Some(at);
    }

    pub async fn scan_start(&self) -> Option<SystemTime> {
        self.inner.lock().await.scan_start
    }

    pub async fn scan_end(&self) -> Option<SystemTime> {
        self.inner.lock().await.scan_end
    }

    pub async fn incr_files_scanned(&self) {
        self.inner.lock().await.counters.files_scanned += 1;
    }

    pub async fn incr_dirs_scanned(&self) {
        self.inner.lock().await.counters.dirs_scanned += 1;
    }

    pub async fn incr_symlinks_skipped(&self) {
        self.inner.lock().await.counters.symlinks_skipped += 1;
    }

    pub async fn incr_special_files_skipped(&self) {
        self.inner.lock().await.counters.special_files_skipped += 1;
    }

    pub async fn record_purge_candidate(&self, size: u64) {
        let mut guard = self.inner.lock().await;
        guard.counters.files_to_purge += 1;
        guard.counters.bytes_freed += size;
    }

    pub async fn incr_files_purged(&self) {
        self.inner.lock().await.counters.files_purged += 1;
    }

    pub async fn incr_errors(&self) {
        self.inner.lock().await.counters.errors += 1;
    }

    pub async fn incr_backpressure_events(&self) {
        self.inner.lock().await.counters.backpressure_events += 1;
    }

    pub async fn incr_stuck_intervals(&self) -> u64 {
        let mut guard = self.inner.lock().await;
        guard.counters.stuck_intervals += 1;
        guard.counters.stuck_intervals
    }

    pub async fn incr_empty_dirs_found(&self) {
        self.inner.lock().await.counters.empty_dirs_found += 1;
    }

    pub async fn incr_empty_dirs_to_delete(&self) {
        self.inner.lock().await.counters.empty_dirs_to_delete += 1;
    }

    pub async fn incr_empty_dirs_deleted(&self) {
        self.inner.lock().await.counters.empty_dirs_deleted += 1;
    }

    pub async fn note_peak_memory(&self, candidate: u64) {
        let mut guard = self.inner.lock().await;
        guard.peak_memory = guard.peak_memory.max(candidate);
    }

    pub async fn phase(&self) -> Phase {
        self.inner.lock().await.phase
    }

    pub async fn snapshot(&self) -> Snapshot {
        let guard = self.inner.lock().await;
        let (overall_files_per_sec, overall_dirs_per_sec) = match (guard.scan_start, guard.scan_end) {
            (Some(start), Some(end)) => {
                let elapsed = end.duration_since(start).unwrap_or(Duration::from_secs(0));
                (
                    rate(guard.counters.files_scanned, elapsed),
                    rate(guard.counters.dirs_scanned, elapsed),
                )
            }
            _ => (0.0, 0.0),
        };
        Snapshot {
            files_scanned: guard.counters.files_scanned,
            files_to_purge: guard.counters.files_to_purge,
            files_purged: guard.counters.files_purged,
            dirs_scanned: guard.counters.dirs_scanned,
            symlinks_skipped: guard.counters.symlinks_skipped,
            special_files_skipped: guard.counters.special_files_skipped,
            empty_dirs_found: guard.counters.empty_dirs_found,
            empty_dirs_to_delete: guard.counters.empty_dirs_to_delete,
            empty_dirs_deleted: guard.counters.empty_dirs_deleted,
            errors: guard.counters.errors,
            bytes_freed: guard.counters.bytes_freed,
            backpressure_events: guard.counters.backpressure_events,
            peak_memory: guard.peak_memory,
            stuck_intervals: guard.counters.stuck_intervals,
            phase: guard.phase,
            abort_reason: guard.abort_reason.clone(),
            scan_start: to_rfc3339(guard.scan_start),
            scan_end: to_rfc3339(guard.scan_end),
            overall_files_per_sec,
            overall_dirs_per_sec,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

/// Rates computed for one reporter tick, in units per second.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Rates {
    pub instant_files_per_sec: f64,
    pub instant_dirs_per_sec: f64,
    pub short_term_files_per_sec: f64,
    pub short_term_dirs_per_sec: f64,
    pub overall_files_per_sec: f64,
    pub overall_dirs_per_sec: f64,
}

struct TickSample {
    at: SystemTime,
    files_scanned: u64,
    dirs_scanned: u64,
}

fn rate(delta: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        0.0
    } else {
        delta as f64 / secs
    }
}

/// Holds the handful of most recent tick samples needed to compute instant (most recent
/// interval) and short-term (last two intervals) rates, plus detects "stuck" when neither
/// file nor dir counters moved between two consecutive ticks.
struct RateWindow {
    history: Vec<TickSample>,
}

impl RateWindow {
    fn new() -> Self {
        Self { history: Vec::new() }
    }

    fn push_and_compute(
        &mut self,
        now: SystemTime,
        snapshot: &Snapshot,
        scan_start: Option<SystemTime>,
    ) -> (Rates, bool) {
        let sample = TickSample {
            at: now,
            files_scanned: snapshot.files_scanned,
            dirs_scanned: snapshot.dirs_scanned,
        };

        let stuck = self
            .history
            .last()
            .map(|prev| {
                prev.files_scanned == sample.files_scanned
                    && prev.dirs_scanned == sample.dirs_scanned
            })
            .unwrap_or(false);

        let instant = self.history.last().map(|prev| {
            let elapsed = sample
                .at
                .duration_since(prev.at)
                .unwrap_or(Duration::from_secs(1));
            (
                rate(sample.files_scanned.saturating_sub(prev.files_scanned), elapsed),
                rate(sample.dirs_scanned.saturating_sub(prev.dirs_scanned), elapsed),
            )
        });

        let short_term = self.history.first().map(|oldest| {
            let elapsed = sample
                .at
                .duration_since(oldest.at)
                .unwrap_or(Duration::from_secs(1));
            (
                rate(sample.files_scanned.saturating_sub(oldest.files_scanned), elapsed),
                rate(sample.dirs_scanned.saturating_sub(oldest.dirs_scanned), elapsed),
            )
        });

        let overall = scan_start.map(|start| {
            let elapsed = sample.at.duration_since(start).unwrap_or(Duration::from_secs(1));
            (
                rate(sample.files_scanned, elapsed),
                rate(sample.dirs_scanned, elapsed),
            )
        });

        self.history.push(sample);
        // Keep at most two intervals (~60s of history at a 30s tick) for short-term rates.
        if self.history.len() > 2 {
            self.history.remove(0);
        }

        let (inst_f, inst_d) = instant.unwrap_or((0.0, 0.0));
        let (st_f, st_d) = short_term.unwrap_or((inst_f, inst_d));
        let (ov_f, ov_d) = overall.unwrap_or((0.0, 0.0));

        (
            Rates {
                instant_files_per_sec: inst_f,
                instant_dirs_per_sec: inst_d,
                short_term_files_per_sec: st_f,
                short_term_dirs_per_sec: st_d,
                overall_files_per_sec: ov_f,
                overall_dirs_per_sec: ov_d,
            },
            stuck,
        )
    }
}

/// Threshold of consecutive stuck intervals after which the reporter shrinks the shared
/// batch size itself, independent of the memory monitor's own shrink triggers.
const STUCK_INTERVALS_BEFORE_SHRINK: u64 = 2;

/// Owns the background reporter task. Dropping or calling `stop` guarantees the task is
/// cancelled on every orchestrator exit path, success or failure.
pub struct ProgressReporter {
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    /// Spawns the 30-second reporter tick. When `stuck_intervals` crosses
    /// `STUCK_INTERVALS_BEFORE_SHRINK`, shrinks `effective_batch_size` directly — the same
    /// shared counter the walker reads before each flush. `active_dirs` is sampled
    /// alongside the stuck warning to show what the walker was doing when it stalled.
    pub fn spawn(
        stats: Stats,
        memory: Arc<MemoryMonitor>,
        effective_batch_size: Arc<AtomicUsize>,
        active_dirs: ActiveDirs,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            ticker.tick().await; // first tick fires immediately; skip it.
            let mut window = RateWindow::new();

            loop {
                ticker.tick().await;
                let snapshot = stats.snapshot().await;
                if matches!(snapshot.phase, Phase::Completed | Phase::Aborted) {
                    break;
                }

                let sample = memory.sample();
                stats.note_peak_memory(sample.rss_bytes).await;

                let scan_start = stats.scan_start().await;
                let (rates, stuck) = window.push_and_compute(
                    std::time::SystemTime::now(),
                    &snapshot,
                    scan_start,
                );

                if stuck {
                    let count = stats.incr_stuck_intervals().await;
                    let active_directories = active_dirs.len().await;
                    tracing::warn!(
                        stuck_intervals = count,
                        active_directories = active_directories,
                        "possible_hang: counters did not advance between intervals"
                    );
                    if count >= STUCK_INTERVALS_BEFORE_SHRINK {
                        let current = effective_batch_size.load(Ordering::Relaxed);
                        let shrunk = shrink_batch_size(current, Escalation::MildShrink, 0.0);
                        effective_batch_size.store(shrunk, Ordering::Relaxed);
                        tracing::warn!(
                            from = current,
                            to = shrunk,
                            "stuck threshold exceeded, shrinking batch size"
                        );
                    }
                }

                tracing::info!(
                    files_scanned = snapshot.files_scanned,
                    dirs_scanned = snapshot.dirs_scanned,
                    files_purged = snapshot.files_purged,
                    empty_dirs_deleted = snapshot.empty_dirs_deleted,
                    errors = snapshot.errors,
                    instant_files_per_sec = rates.instant_files_per_sec,
                    short_term_files_per_sec = rates.short_term_files_per_sec,
                    overall_files_per_sec = rates.overall_files_per_sec,
                    peak_memory = snapshot.peak_memory,
                    "progress"
                );
            }
        });

        Self { handle }
    }

    /// Aborts the background task. Safe to call more than once and safe to skip — dropping
    /// a `ProgressReporter` aborts it too.
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn log_startup(config: &Config) {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        root = %config.root.display(),
        max_age_days = config.max_age_days,
        scan_slots = config.scan_slots,
        delete_slots = config.delete_slots,
        subdir_slots = config.subdir_slots,
        task_batch_size = config.task_batch_size,
        memory_limit_mb = config.memory_limit_mb,
        dry_run = config.dry_run,
        remove_empty_dirs = config.remove_empty_dirs,
        max_empty_dirs_per_run = config.max_empty_dirs_per_run,
        "starting purge run"
    );
}

pub fn log_final(snapshot: &Snapshot) {
    use humansize::{format_size, BINARY};

    tracing::info!(
        files_scanned = snapshot.files_scanned,
        files_to_purge = snapshot.files_to_purge,
        files_purged = snapshot.files_purged,
        dirs_scanned = snapshot.dirs_scanned,
        empty_dirs_found = snapshot.empty_dirs_found,
        empty_dirs_to_delete = snapshot.empty_dirs_to_delete,
        empty_dirs_deleted = snapshot.empty_dirs_deleted,
        errors = snapshot.errors,
        bytes_freed = snapshot.bytes_freed,
        bytes_freed_human = %format_size(snapshot.bytes_freed, BINARY),
        backpressure_events = snapshot.backpressure_events,
        peak_memory = snapshot.peak_memory,
        peak_memory_human = %format_size(snapshot.peak_memory, BINARY),
        scan_start = snapshot.scan_start.as_deref().unwrap_or(""),
        scan_end = snapshot.scan_end.as_deref().unwrap_or(""),
        overall_files_per_sec = snapshot.overall_files_per_sec,
        overall_dirs_per_sec = snapshot.overall_dirs_per_sec,
        phase = ?snapshot.phase,
        abort_reason = snapshot.abort_reason.as_deref().unwrap_or(""),
        "purge run finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invariant_files_purged_le_to_purge_le_scanned() {
        let stats = Stats::new();
        stats.incr_files_scanned().await;
        stats.incr_files_scanned().await;
        stats.record_purge_candidate(100).await;
        stats.incr_files_purged().await;

        let snapshot = stats.snapshot().await;
        assert!(snapshot.files_purged <= snapshot.files_to_purge);
        assert!(snapshot.files_to_purge <= snapshot.files_scanned);
    }

    #[tokio::test]
    async fn peak_memory_is_monotonic_non_decreasing() {
        let stats = Stats::new();
        stats.note_peak_memory(100).await;
        stats.note_peak_memory(50).await;
        assert_eq!(stats.snapshot().await.peak_memory, 100);
        stats.note_peak_memory(200).await;
        assert_eq!(stats.snapshot().await.peak_memory, 200);
    }

    #[tokio::test]
    async fn abort_reason_sets_phase_aborted() {
        let stats = Stats::new();
        stats.set_abort_reason("memory critical").await;
        let snapshot = stats.snapshot().await;
        assert_eq!(snapshot.phase, Phase::Aborted);
        assert_eq!(snapshot.abort_reason.as_deref(), Some("memory critical"));
    }

    #[test]
    fn rate_window_detects_stuck_interval() {
        let mut window = RateWindow::new();
        let t0 = SystemTime::UNIX_EPOCH;
        let snap = |files: u64| Snapshot {
            files_scanned: files,
            files_to_purge: 0,
            files_purged: 0,
            dirs_scanned: 0,
            symlinks_skipped: 0,
            special_files_skipped: 0,
            empty_dirs_found: 0,
            empty_dirs_to_delete: 0,
            empty_dirs_deleted: 0,
            errors: 0,
            bytes_freed: 0,
            backpressure_events: 0,
            peak_memory: 0,
            stuck_intervals: 0,
            phase: Phase::Scanning,
            abort_reason: None,
            scan_start: None,
            scan_end: None,
            overall_files_per_sec: 0.0,
            overall_dirs_per_sec: 0.0,
        };

        let (_, stuck0) = window.push_and_compute(t0, &snap(10), None);
        assert!(!stuck0);

        let t1 = t0 + Duration::from_secs(30);
        let (_, stuck1) = window.push_and_compute(t1, &snap(10), None);
        assert!(stuck1);

        let t2 = t1 + Duration::from_secs(30);
        let (rates, stuck2) = window.push_and_compute(t2, &snap(40), None);
        assert!(!stuck2);
        assert!(rates.instant_files_per_sec > 0.0);
    }
}
