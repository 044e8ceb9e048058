//! Abstracts wall-clock "now" and file stat results behind a trait, so tests can run with a
//! fixed clock and synthetic mtimes instead of depending on real elapsed time.

use std::fs::Metadata;
use std::path::Path;
use std::time::SystemTime;

use crate::types::EntryKind;

/// A stat result reduced to the fields the engine cares about.
#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub kind: EntryKind,
    pub mtime: SystemTime,
    pub size: u64,
}

impl FileStat {
    pub fn from_metadata(meta: &Metadata) -> Self {
        let kind = if meta.file_type().is_symlink() {
            EntryKind::Symlink
        } else if meta.is_dir() {
            EntryKind::Directory
        } else if meta.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };
        let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        Self {
            kind,
            mtime,
            size: meta.len(),
        }
    }
}

/// Seam for "now" and for stat, so tests can hold both fixed.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;

    /// Stats a path using `symlink_metadata` (never follows the final symlink component,
    /// matching the engine's "never traverse a symlink" contract).
    fn stat(&self, path: &Path) -> std::io::Result<FileStat> {
        let meta = std::fs::symlink_metadata(path)?;
        Ok(FileStat::from_metadata(&meta))
    }
}

/// The production clock: real wall time, real filesystem stat.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock fixed at construction time, for deterministic cutoff-boundary tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub SystemTime);

impl Clock for FixedClock {
    fn now(&self) -> SystemTime {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn system_clock_stats_a_real_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"hi").unwrap();

        let stat = SystemClock.stat(&file).unwrap();
        assert_eq!(stat.kind, EntryKind::File);
        assert_eq!(stat.size, 2);
    }

    #[test]
    fn fixed_clock_returns_constant_now() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let clock = FixedClock(t);
        assert_eq!(clock.now(), t);
        assert_eq!(clock.now(), t);
    }

    #[test]
    fn symlink_metadata_classifies_symlink_not_target() {
        #[cfg(unix)]
        {
            let dir = tempdir().unwrap();
            let target = dir.path().join("target.txt");
            std::fs::write(&target, b"x").unwrap();
            let link = dir.path().join("link.txt");
            std::os::unix::fs::symlink(&target, &link).unwrap();

            let stat = SystemClock.stat(&link).unwrap();
            assert_eq!(stat.kind, EntryKind::Symlink);
        }
    }
}
