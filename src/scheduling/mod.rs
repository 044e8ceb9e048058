//! The scheduling fabric: three independent counting semaphores that are the only shapers
//! of concurrency in the engine. No implicit unbounded queue exists between producer and
//! consumer anywhere else in the crate — every slow filesystem operation acquires one of
//! these three permits first.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Owns the scan-slots, delete-slots, and subdir-slots semaphores for one purge run.
#[derive(Clone)]
pub struct Scheduler {
    scan: Arc<Semaphore>,
    delete: Arc<Semaphore>,
    subdir: Arc<Semaphore>,
    subdir_slots: usize,
}

impl Scheduler {
    pub fn new(scan_slots: usize, delete_slots: usize, subdir_slots: usize) -> Self {
        Self {
            scan: Arc::new(Semaphore::new(scan_slots)),
            delete: Arc::new(Semaphore::new(delete_slots)),
            subdir: Arc::new(Semaphore::new(subdir_slots)),
            subdir_slots,
        }
    }

    pub async fn acquire_scan(&self) -> OwnedSemaphorePermit {
        self.scan
            .clone()
            .acquire_owned()
            .await
            .expect("scan semaphore never closed")
    }

    pub async fn acquire_delete(&self) -> OwnedSemaphorePermit {
        self.delete
            .clone()
            .acquire_owned()
            .await
            .expect("delete semaphore never closed")
    }

    /// Blocking acquire of a subdir slot. Used by the top-level call into a directory
    /// frame, where waiting is safe because the caller does not itself hold a subdir
    /// permit (see `try_acquire_subdir` for the recursive, deadlock-sensitive case).
    pub async fn acquire_subdir(&self) -> OwnedSemaphorePermit {
        self.subdir
            .clone()
            .acquire_owned()
            .await
            .expect("subdir semaphore never closed")
    }

    /// Non-blocking acquire, used by the hybrid sliding-window processor to detect
    /// exhaustion before recursing under an already-held permit without blocking an
    /// ancestor that is itself waiting on this same semaphore.
    pub fn try_acquire_subdir(&self) -> Option<OwnedSemaphorePermit> {
        self.subdir.clone().try_acquire_owned().ok()
    }

    pub fn subdir_slots(&self) -> usize {
        self.subdir_slots
    }

    pub fn subdir_available_permits(&self) -> usize {
        self.subdir.available_permits()
    }
}

/// Sizes the blocking-listing worker pool proportionally to `subdir_slots`:
/// `max(32, min(500, subdir_slots * 0.1))`. An undersized pool serializes directory
/// listings and caps throughput even when `subdir_slots` is huge.
pub fn listing_pool_size(subdir_slots: usize) -> usize {
    let scaled = (subdir_slots as f64 * 0.1).round() as usize;
    scaled.clamp(32, 500)
}
