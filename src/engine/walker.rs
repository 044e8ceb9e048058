//! Directory walker: recursive, controlled-concurrency subdirectory processor implementing
//! the hybrid sliding-window algorithm (see module docs on `process_subdirs`).

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::clock::Clock;
use crate::config::Config;
use crate::empty_dirs::EmptyDirSet;
use crate::engine::pipeline;
use crate::memory::{shrink_batch_size, Escalation, MemoryMonitor};
use crate::reader::list_directory;
use crate::scheduling::Scheduler;
use crate::stats::Stats;
use crate::types::{EntryKind, FileTask};

/// Set of paths currently being walked, kept only for stuck-diagnostics.
#[derive(Clone)]
pub struct ActiveDirs {
    inner: Arc<Mutex<HashSet<PathBuf>>>,
}

impl ActiveDirs {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    async fn enter(&self, path: &Path) {
        self.inner.lock().await.insert(path.to_path_buf());
    }

    async fn exit(&self, path: &Path) {
        self.inner.lock().await.remove(path);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

impl Default for ActiveDirs {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a directory frame needs, cheap to clone (every field is an `Arc` or a plain
/// `Copy` value) so each recursive child gets its own owned copy instead of borrowing.
#[derive(Clone)]
pub struct WalkContext {
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub scheduler: Scheduler,
    pub stats: Stats,
    pub empty_dirs: EmptyDirSet,
    pub active_dirs: ActiveDirs,
    pub memory: Arc<MemoryMonitor>,
    pub cutoff: SystemTime,
    pub aborted: Arc<AtomicBool>,
    effective_batch_size: Arc<AtomicUsize>,
}

impl WalkContext {
    /// `effective_batch_size` is shared with the progress reporter, which shrinks it
    /// further on sustained stuck-interval detection — not just the memory monitor.
    /// `active_dirs` is likewise shared with the reporter, which samples its count
    /// alongside a stuck-interval warning.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        clock: Arc<dyn Clock>,
        scheduler: Scheduler,
        stats: Stats,
        empty_dirs: EmptyDirSet,
        active_dirs: ActiveDirs,
        memory: Arc<MemoryMonitor>,
        cutoff: SystemTime,
        aborted: Arc<AtomicBool>,
        effective_batch_size: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            config,
            clock,
            scheduler,
            stats,
            empty_dirs,
            active_dirs,
            memory,
            cutoff,
            aborted,
            effective_batch_size,
        }
    }

    fn batch_threshold(&self) -> usize {
        self.effective_batch_size.load(Ordering::Relaxed).max(1)
    }
}

/// Walks `root` to completion. `root` is never deleted and never added to `EmptyDirSet`
/// regardless of how empty it is found to be.
pub async fn walk_root(ctx: WalkContext, root: PathBuf) {
    walk_directory_with_permit(ctx, root, true, false).await;
}

/// `holds_subdir_permit` is true when this frame itself is running under an acquired
/// subdir-slot permit (i.e. it was spawned as a concurrent child, not run inline via the
/// sequential fallback). It decides how this frame's own children acquire their slots.
///
/// Recurses indirectly through `process_subdirs`, so the recursive call there goes through
/// `walk_directory_boxed` to give the compiler a finite future type.
async fn walk_directory_with_permit(
    ctx: WalkContext,
    path: PathBuf,
    is_root: bool,
    holds_subdir_permit: bool,
) {
    ctx.active_dirs.enter(&path).await;
    let result = walk_directory_inner(&ctx, &path, is_root, holds_subdir_permit).await;
    ctx.active_dirs.exit(&path).await;

    if let Err(err) = result {
        ctx.stats.incr_errors().await;
        tracing::error!(path = %path.display(), error = %err, "directory listing failed");
    }
}

fn walk_directory_boxed(
    ctx: WalkContext,
    path: PathBuf,
    is_root: bool,
    holds_subdir_permit: bool,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(walk_directory_with_permit(ctx, path, is_root, holds_subdir_permit))
}

async fn walk_directory_inner(
    ctx: &WalkContext,
    path: &Path,
    is_root: bool,
    holds_subdir_permit: bool,
) -> std::io::Result<()> {
    ctx.stats.incr_dirs_scanned().await;

    let entries = list_directory(path).await?;

    let mut buffer: Vec<FileTask> = Vec::with_capacity(ctx.batch_threshold());
    let mut subdirs: Vec<PathBuf> = Vec::new();

    for entry in entries {
        match entry.kind {
            EntryKind::Symlink => ctx.stats.incr_symlinks_skipped().await,
            EntryKind::File => {
                buffer.push(FileTask { path: entry.path });
                if buffer.len() >= ctx.batch_threshold() {
                    let batch = std::mem::take(&mut buffer);
                    flush_with_backpressure(ctx, batch).await;
                }
            }
            EntryKind::Directory => subdirs.push(entry.path),
            EntryKind::Other => ctx.stats.incr_special_files_skipped().await,
        }
    }

    // Unconditional: the buffer is cleared by `flush_with_backpressure` taking ownership
    // regardless of how the loop above exited.
    if !buffer.is_empty() {
        flush_with_backpressure(ctx, buffer).await;
    }

    process_subdirs(ctx, subdirs, holds_subdir_permit).await;

    if ctx.config.remove_empty_dirs && !is_root {
        reevaluate_emptiness(ctx, path).await;
    }

    Ok(())
}

async fn reevaluate_emptiness(ctx: &WalkContext, path: &Path) {
    match list_directory(path).await {
        Ok(entries) if entries.is_empty() => {
            ctx.stats.incr_empty_dirs_found().await;
            ctx.empty_dirs
                .insert_if_empty(path.to_path_buf(), true)
                .await;
        }
        Ok(_) => {}
        Err(err) => {
            ctx.stats.incr_errors().await;
            tracing::error!(path = %path.display(), error = %err, "re-read for emptiness failed");
        }
    }
}

async fn flush_with_backpressure(ctx: &WalkContext, batch: Vec<FileTask>) {
    if ctx.aborted.load(Ordering::Relaxed) {
        // Circuit already broken: stop scheduling new unlinks, let already-scheduled
        // tasks finish elsewhere.
        return;
    }

    if ctx.memory.enabled() {
        let sample = ctx.memory.sample();
        ctx.stats.note_peak_memory(sample.rss_bytes).await;

        match ctx.memory.escalation(sample) {
            Escalation::CircuitBreak => {
                ctx.aborted.store(true, Ordering::SeqCst);
                ctx.stats
                    .set_abort_reason(format!(
                        "memory usage ratio {:.3} crossed the circuit-break threshold",
                        sample.usage_ratio
                    ))
                    .await;
                return;
            }
            Escalation::BackPressure => {
                ctx.stats.incr_backpressure_events().await;
                crate::memory::apply_back_pressure_pause().await;
                let current = ctx.effective_batch_size.load(Ordering::Relaxed);
                ctx.effective_batch_size.store(
                    shrink_batch_size(current, Escalation::BackPressure, sample.usage_ratio),
                    Ordering::Relaxed,
                );
            }
            Escalation::MildShrink => {
                let current = ctx.effective_batch_size.load(Ordering::Relaxed);
                ctx.effective_batch_size.store(
                    shrink_batch_size(current, Escalation::MildShrink, sample.usage_ratio),
                    Ordering::Relaxed,
                );
            }
            Escalation::Normal => {}
        }
    }

    pipeline::flush_batch(
        batch,
        ctx.cutoff,
        ctx.config.dry_run,
        ctx.clock.clone(),
        &ctx.scheduler,
        &ctx.stats,
    )
    .await;
}

/// The hybrid sliding-window subdirectory processor.
///
/// Maintains a `remaining` queue and an `active` set bounded by `subdir_slots`, starting
/// new child walks as slots free up rather than waiting for an entire batch to drain.
///
/// Deadlock avoidance: a frame that does not itself hold a subdir permit (the root, or a
/// frame reached via the sequential fallback below) may safely block waiting for one — no
/// ancestor in its call stack is holding the permit it would be waiting on. A frame that
/// *does* hold a permit must never block waiting for another: if none are free, it falls
/// back to walking its next child inline, sequentially, consuming no subdir slot at all.
async fn process_subdirs(ctx: &WalkContext, subdirs: Vec<PathBuf>, holds_subdir_permit: bool) {
    if subdirs.is_empty() {
        return;
    }

    if ctx.aborted.load(Ordering::Relaxed) {
        // Circuit break: open no new subdir slots, but this frame itself still completes.
        return;
    }

    let subdir_slots = ctx.scheduler.subdir_slots();
    let mut remaining: VecDeque<PathBuf> = subdirs.into();
    let mut active: JoinSet<()> = JoinSet::new();

    const SAFETY_CEILING: u64 = 10_000;
    let mut iterations: u64 = 0;

    while !remaining.is_empty() || !active.is_empty() {
        iterations += 1;
        if iterations > SAFETY_CEILING {
            tracing::error!(
                remaining = remaining.len(),
                active = active.len(),
                "hybrid sliding-window safety ceiling reached; breaking out"
            );
            break;
        }

        if ctx.aborted.load(Ordering::Relaxed) {
            break;
        }

        while active.len() < subdir_slots && !remaining.is_empty() {
            let next = remaining.pop_front().expect("checked non-empty above");

            if holds_subdir_permit {
                match ctx.scheduler.try_acquire_subdir() {
                    Some(permit) => {
                        let child_ctx = ctx.clone();
                        active.spawn(async move {
                            let _permit = permit;
                            walk_directory_boxed(child_ctx, next, false, true).await;
                        });
                    }
                    None => {
                        // Exhausted while we ourselves hold a permit: process inline to
                        // avoid waiting on a slot an ancestor may be holding.
                        walk_directory_boxed(ctx.clone(), next, false, false).await;
                    }
                }
            } else {
                let permit = ctx.scheduler.acquire_subdir().await;
                let child_ctx = ctx.clone();
                active.spawn(async move {
                    let _permit = permit;
                    walk_directory_boxed(child_ctx, next, false, true).await;
                });
            }
        }

        if !active.is_empty() {
            active.join_next().await;
        }
    }
}
