//! Empty-dir reaper: post-order bulk deletion of directories observed empty during the
//! walk, with cascading parent re-evaluation, a per-run rate limit, and memory-aware
//! dynamic batching.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::empty_dirs::{sort_deepest_first, EmptyDirSet};
use crate::memory::{Escalation, MemoryMonitor};
use crate::scheduling::Scheduler;
use crate::stats::Stats;

/// Base batch size for both reaper passes: `clamp(50, 200, delete_slots / 10)`.
pub fn base_batch_size(delete_slots: usize) -> usize {
    (delete_slots / 10).clamp(50, 200)
}

pub struct ReaperConfig {
    pub dry_run: bool,
    pub max_empty_dirs_per_run: u64,
    pub delete_slots: usize,
}

/// Runs both passes to completion (or until the circuit breaks / rate limit is hit) and
/// returns the root-relative root path so it is never considered for cascading.
pub async fn run(
    empty_dirs: EmptyDirSet,
    root: PathBuf,
    cfg: ReaperConfig,
    scheduler: Scheduler,
    stats: Stats,
    memory: Arc<MemoryMonitor>,
    aborted: Arc<AtomicBool>,
) {
    let initial = empty_dirs.drain_sorted_deepest_first().await;
    if initial.is_empty() {
        return;
    }

    let batch_size = base_batch_size(cfg.delete_slots).max(1);
    let mut rate_budget = RateBudget::new(cfg.max_empty_dirs_per_run);

    // Pass A: the initial sorted set.
    let cascade_candidates = process_in_batches(
        &initial,
        &root,
        batch_size,
        &cfg,
        &scheduler,
        &stats,
        &memory,
        &aborted,
        &mut rate_budget,
    )
    .await;

    if aborted.load(Ordering::Relaxed) || rate_budget.exhausted() {
        return;
    }

    // Pass B: cascading re-evaluation until the candidate set is dry or the rate limit
    // is hit.
    let mut candidates = cascade_candidates;
    let mut iterations: u64 = 0;
    let mut deletions_since_log: u64 = 0;

    while !candidates.is_empty() {
        if aborted.load(Ordering::Relaxed) || rate_budget.exhausted() {
            break;
        }

        let mut filtered: Vec<PathBuf> = Vec::with_capacity(candidates.len());
        for path in candidates {
            if path == root {
                continue;
            }
            if is_still_empty_directory(&path).await {
                // Cascade-discovered: this directory was not empty at walk time, so
                // it never went through walker.rs's found-counting. Count it now,
                // the first moment it is confirmed empty.
                stats.incr_empty_dirs_found().await;
                filtered.push(path);
            }
        }
        sort_deepest_first(&mut filtered);

        if filtered.is_empty() {
            break;
        }

        let next_candidates = process_in_batches(
            &filtered,
            &root,
            batch_size,
            &cfg,
            &scheduler,
            &stats,
            &memory,
            &aborted,
            &mut rate_budget,
        )
        .await;

        deletions_since_log += filtered.len() as u64;
        iterations += 1;
        if iterations % 100 == 0 || deletions_since_log >= 1000 {
            tracing::info!(
                iterations,
                deletions_since_log,
                "empty-dir cascading reap progress"
            );
            deletions_since_log = 0;
        }

        candidates = next_candidates;
    }
}

async fn is_still_empty_directory(path: &Path) -> bool {
    match crate::reader::list_directory(path).await {
        Ok(entries) => entries.is_empty(),
        Err(_) => false,
    }
}

/// Processes `paths` in sequential batches of `batch_size`, returning the parents of every
/// successfully deleted directory as the next pass's cascade candidates.
#[allow(clippy::too_many_arguments)]
async fn process_in_batches(
    paths: &[PathBuf],
    root: &Path,
    batch_size: usize,
    cfg: &ReaperConfig,
    scheduler: &Scheduler,
    stats: &Stats,
    memory: &Arc<MemoryMonitor>,
    aborted: &Arc<AtomicBool>,
    rate_budget: &mut RateBudget,
) -> Vec<PathBuf> {
    let mut cascade_candidates = Vec::new();

    for chunk in paths.chunks(batch_size.max(1)) {
        if aborted.load(Ordering::Relaxed) {
            break;
        }

        check_memory_before_batch(memory, stats, aborted).await;
        if aborted.load(Ordering::Relaxed) {
            break;
        }

        let allowed = rate_budget.take(chunk.len() as u64);
        let (to_process, skipped) = chunk.split_at(allowed as usize);

        let mut handles = Vec::with_capacity(to_process.len());
        for path in to_process {
            let path = path.clone();
            let scheduler = scheduler.clone();
            let stats = stats.clone();
            let dry_run = cfg.dry_run;
            handles.push(tokio::spawn(async move {
                delete_one(path, dry_run, scheduler, stats).await
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Some(parent)) => cascade_candidates.push(parent),
                Ok(None) => {}
                Err(err) => tracing::error!(error = %err, "reaper task panicked"),
            }
        }

        // Mandatory after-check: memory spikes happen during the batch, not only before.
        check_memory_after_batch(memory, stats, aborted).await;

        if !skipped.is_empty() {
            tracing::info!(
                unprocessed_in_batch = skipped.len(),
                "empty-dir rate limit reached mid-batch; finishing in-flight items and stopping"
            );
            break;
        }

        if aborted.load(Ordering::Relaxed) || rate_budget.exhausted() {
            break;
        }
    }

    cascade_candidates
        .into_iter()
        .filter(|p| p != root)
        .collect()
}

/// Deletes one directory if it is still empty at re-check, under a delete-slot held only
/// for the `rmdir` call itself. Returns the parent directory on success, to seed the next
/// cascading pass.
async fn delete_one(
    path: PathBuf,
    dry_run: bool,
    scheduler: Scheduler,
    stats: Stats,
) -> Option<PathBuf> {
    // Re-reading for emptiness does not need the delete slot; only the rmdir does.
    if !is_still_empty_directory(&path).await {
        return None;
    }

    let parent = path.parent().map(Path::to_path_buf);

    if dry_run {
        stats.incr_empty_dirs_to_delete().await;
        return parent;
    }

    let permit = scheduler.acquire_delete().await;
    let result = tokio::task::spawn_blocking({
        let path = path.clone();
        move || std::fs::remove_dir(&path)
    })
    .await
    .expect("blocking rmdir task panicked");
    drop(permit);

    match result {
        Ok(()) => {
            stats.incr_empty_dirs_to_delete().await;
            stats.incr_empty_dirs_deleted().await;
            parent
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            stats.incr_errors().await;
            tracing::warn!(path = %path.display(), error = %err, "rmdir failed");
            None
        }
    }
}

async fn check_memory_before_batch(memory: &Arc<MemoryMonitor>, stats: &Stats, aborted: &Arc<AtomicBool>) {
    check_memory(memory, stats, aborted).await;
}

async fn check_memory_after_batch(memory: &Arc<MemoryMonitor>, stats: &Stats, aborted: &Arc<AtomicBool>) {
    check_memory(memory, stats, aborted).await;
}

async fn check_memory(memory: &Arc<MemoryMonitor>, stats: &Stats, aborted: &Arc<AtomicBool>) {
    if !memory.enabled() {
        return;
    }
    let sample = memory.sample();
    stats.note_peak_memory(sample.rss_bytes).await;

    match memory.escalation(sample) {
        Escalation::CircuitBreak => {
            aborted.store(true, Ordering::SeqCst);
            stats
                .set_abort_reason(format!(
                    "memory usage ratio {:.3} crossed the circuit-break threshold during reap",
                    sample.usage_ratio
                ))
                .await;
        }
        Escalation::BackPressure => {
            stats.incr_backpressure_events().await;
            crate::memory::apply_back_pressure_pause().await;
        }
        Escalation::MildShrink | Escalation::Normal => {}
    }
}

/// Tracks how many more deletions the per-run rate limit allows. `limit == 0` means
/// unlimited.
struct RateBudget {
    limit: u64,
    used: u64,
}

impl RateBudget {
    fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    fn exhausted(&self) -> bool {
        self.limit != 0 && self.used >= self.limit
    }

    /// Returns how many of `requested` may proceed without crossing the limit — never
    /// negative, always relative to what is actually attempted in this call.
    fn take(&mut self, requested: u64) -> u64 {
        if self.limit == 0 {
            self.used += requested;
            return requested;
        }
        let room = self.limit.saturating_sub(self.used);
        let allowed = requested.min(room);
        self.used += allowed;
        allowed
    }
}
