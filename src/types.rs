//! This module defines the core data types and error types used throughout the `purge` crate.
//!
//! It provides a centralized location for structures that represent the state and results
//! of a purge run, ensuring consistency across different modules. These types are designed
//! to be serializable with `serde` for the JSON log lines emitted at startup and completion.

use serde::Serialize;
use std::path::PathBuf;

/// The lifecycle phase of a single purge run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Starting,
    Scanning,
    RemovingEmptyDirs,
    Completed,
    Aborted,
}

/// The kind of a file system entry as classified by the walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

/// The crate-wide error type.
///
/// Only `ConfigInvalid` and `RootBlocked` ever escape `purge()` as an `Err`. Every other
/// kind is absorbed into `Stats.errors` and logged, never returned.
#[derive(Debug, thiserror::Error)]
pub enum PurgeError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("root path {path} is blocked: resolves inside protected prefix {prefix}")]
    RootBlocked { path: PathBuf, prefix: PathBuf },

    #[error("memory usage critical: {ratio:.3} of hard limit")]
    MemoryCritical { ratio: f64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PurgeError>;

/// A single file-deletion work item produced while iterating one directory.
///
/// Owned exclusively by the directory frame that produced it until the pipeline consumes it.
#[derive(Debug, Clone)]
pub struct FileTask {
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Phase::RemovingEmptyDirs).unwrap(),
            "\"removing_empty_dirs\""
        );
    }

    #[test]
    fn config_invalid_is_display_friendly() {
        let err = PurgeError::ConfigInvalid("task_batch_size must be >= 1".into());
        assert!(err.to_string().contains("task_batch_size"));
    }
}
