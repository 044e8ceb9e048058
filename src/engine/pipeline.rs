//! File pipeline: per-directory batched flush.
//!
//! Each task in a flushed batch runs independently and concurrently: acquire a scan-slot,
//! stat the file, decide against the cutoff, and — if eligible and not a dry run — acquire
//! a delete-slot and unlink. A batch is a fan-out, not a `gather`-and-ignore: every task's
//! outcome is logged individually, so a panic or unexpected error in one never disappears
//! silently.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use crate::clock::Clock;
use crate::scheduling::Scheduler;
use crate::stats::Stats;
use crate::types::{EntryKind, FileTask};

/// Flushes one batch of file-tasks to completion. Returns once every task in the batch has
/// run, not merely been scheduled — the caller clears its local buffer immediately after.
pub async fn flush_batch(
    tasks: Vec<FileTask>,
    cutoff: SystemTime,
    dry_run: bool,
    clock: Arc<dyn Clock>,
    scheduler: &Scheduler,
    stats: &Stats,
) {
    let mut handles = Vec::with_capacity(tasks.len());
    for task in tasks {
        let clock = clock.clone();
        let scheduler = scheduler.clone();
        let stats = stats.clone();
        handles.push(tokio::spawn(process_one_task(
            task, cutoff, dry_run, clock, scheduler, stats,
        )));
    }
    for handle in handles {
        if let Err(join_err) = handle.await {
            tracing::error!(error = %join_err, "file pipeline task panicked");
        }
    }
}

async fn process_one_task(
    task: FileTask,
    cutoff: SystemTime,
    dry_run: bool,
    clock: Arc<dyn Clock>,
    scheduler: Scheduler,
    stats: Stats,
) {
    let scan_permit = scheduler.acquire_scan().await;
    let stat_result = clock.stat(&task.path);
    drop(scan_permit);

    let stat = match stat_result {
        Ok(stat) => stat,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            // TransientFileGone: benign race between listing and stat, not an error.
            tracing::debug!(path = %task.path.display(), "file vanished before stat");
            return;
        }
        Err(err) => {
            stats.incr_errors().await;
            tracing::error!(path = %task.path.display(), error = %err, "stat failed");
            return;
        }
    };

    // A race may have turned this path into a directory or something else between the
    // listing and the stat; that is benign, not an error.
    if stat.kind != EntryKind::File {
        return;
    }

    stats.incr_files_scanned().await;

    if stat.mtime >= cutoff {
        return;
    }

    stats.record_purge_candidate(stat.size).await;

    if dry_run {
        return;
    }

    let delete_permit = scheduler.acquire_delete().await;
    let unlink_result = unlink(task.path.clone()).await;
    drop(delete_permit);

    match unlink_result {
        Ok(()) => stats.incr_files_purged().await,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %task.path.display(), "file already gone at unlink");
        }
        Err(err) if err.kind() == std::io::ErrorKind::IsADirectory => {
            tracing::debug!(path = %task.path.display(), "path became a directory before unlink");
        }
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            stats.incr_errors().await;
            tracing::warn!(path = %task.path.display(), error = %err, "permission denied on unlink");
        }
        Err(err) => {
            stats.incr_errors().await;
            tracing::error!(path = %task.path.display(), error = %err, "unlink failed");
        }
    }
}

async fn unlink(path: PathBuf) -> std::io::Result<()> {
    tokio::task::spawn_blocking(move || std::fs::remove_file(&path))
        .await
        .expect("blocking unlink task panicked")
}
