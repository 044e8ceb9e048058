//! Directory reader: lists one directory's entries as a finite, fully-materialized batch.
//!
//! Wraps the blocking native `read_dir` call in `spawn_blocking` so it cannot starve the
//! cooperative scheduler. The pool those blocking calls run on is sized by the caller via
//! `tokio::runtime::Builder::max_blocking_threads` (see `scheduling::listing_pool_size`) —
//! an undersized pool serializes listings and caps throughput regardless of how generous
//! `subdir_slots` is.

use std::path::{Path, PathBuf};

use crate::types::EntryKind;

/// One directory entry, classified without following any symlink.
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// Reads `path` to completion off the async executor and returns every entry.
pub async fn list_directory(path: &Path) -> std::io::Result<Vec<DirEntryInfo>> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&path)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let kind = if file_type.is_symlink() {
                EntryKind::Symlink
            } else if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                EntryKind::Other
            };
            out.push(DirEntryInfo {
                path: entry.path(),
                kind,
            });
        }
        Ok(out)
    })
    .await
    .expect("blocking directory listing task panicked")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn lists_files_and_dirs_with_correct_kinds() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let entries = list_directory(dir.path()).await.unwrap();
        assert_eq!(entries.len(), 2);
        let kinds: Vec<EntryKind> = entries.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&EntryKind::File));
        assert!(kinds.contains(&EntryKind::Directory));
    }

    #[tokio::test]
    async fn classifies_symlinks_without_following_them() {
        #[cfg(unix)]
        {
            let dir = tempdir().unwrap();
            let target = dir.path().join("target.txt");
            std::fs::write(&target, b"x").unwrap();
            std::os::unix::fs::symlink(&target, dir.path().join("link")).unwrap();

            let entries = list_directory(dir.path()).await.unwrap();
            let link = entries.iter().find(|e| e.path.ends_with("link")).unwrap();
            assert_eq!(link.kind, EntryKind::Symlink);
        }
    }

    #[tokio::test]
    async fn missing_directory_returns_io_error() {
        let result = list_directory(Path::new("/no/such/path/at/all")).await;
        assert!(result.is_err());
    }
}
