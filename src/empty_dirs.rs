//! `EmptyDirSet`: the deduplicated set of directories observed empty during the walk.
//!
//! The walker is the sole producer, the reaper the sole consumer. Insertion is a single
//! locked operation so two concurrent observers of the same parent directory — a named
//! boundary case — never produce two entries.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

#[derive(Clone)]
pub struct EmptyDirSet {
    inner: Arc<Mutex<HashSet<PathBuf>>>,
}

impl EmptyDirSet {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Inserts `path` if `is_empty` is true. Returns whether this call performed the
    /// insertion (false if another observer already recorded the same path, or if
    /// `is_empty` was false). Never inserts the root — callers must not pass it in.
    pub async fn insert_if_empty(&self, path: PathBuf, is_empty: bool) -> bool {
        if !is_empty {
            return false;
        }
        let mut guard = self.inner.lock().await;
        guard.insert(path)
    }

    pub async fn contains(&self, path: &Path) -> bool {
        self.inner.lock().await.contains(path)
    }

    pub async fn remove(&self, path: &Path) -> bool {
        self.inner.lock().await.remove(path)
    }

    pub async fn insert(&self, path: PathBuf) -> bool {
        self.inner.lock().await.insert(path)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Removes and returns every path, sorted deepest-first so the reaper processes
    /// leaves before their parents (post-order).
    pub async fn drain_sorted_deepest_first(&self) -> Vec<PathBuf> {
        let mut guard = self.inner.lock().await;
        let mut paths: Vec<PathBuf> = guard.drain().collect();
        sort_deepest_first(&mut paths);
        paths
    }
}

impl Default for EmptyDirSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Sorts by path-component count, descending, so deletion proceeds leaf-first.
pub fn sort_deepest_first(paths: &mut [PathBuf]) {
    paths.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
}
