//! Safety checks performed once, before any traversal begins.
//!
//! `check_root_not_blocked` is the sole gate standing between a misconfigured invocation
//! and recursively deleting files out of `/etc` or `/proc`. It is deliberately the only
//! thing in this module: "don't nuke the OS" is a single, fatal, pre-flight check rather
//! than an ongoing guard.

use std::path::{Path, PathBuf};

use crate::config::BLOCKED_PREFIXES;
use crate::types::{PurgeError, Result};

/// Fails with `RootBlocked` if `root` equals or resolves inside any denylisted system
/// prefix. `root` must already be canonicalized by the caller.
pub fn check_root_not_blocked(root: &Path) -> Result<()> {
    for prefix in BLOCKED_PREFIXES {
        let prefix_path = PathBuf::from(prefix);
        if root == prefix_path || root.starts_with(&prefix_path) {
            return Err(PurgeError::RootBlocked {
                path: root.to_path_buf(),
                prefix: prefix_path,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_exact_prefix_match() {
        assert!(check_root_not_blocked(Path::new("/etc")).is_err());
    }

    #[test]
    fn blocks_nested_path_under_prefix() {
        assert!(check_root_not_blocked(Path::new("/proc/1/fd")).is_err());
    }

    #[test]
    fn allows_ordinary_path() {
        assert!(check_root_not_blocked(Path::new("/tmp/data-to-purge")).is_ok());
    }

    #[test]
    fn does_not_false_positive_on_prefix_substring() {
        // "/etcetera" is not inside "/etc" — starts_with is component-aware.
        assert!(check_root_not_blocked(Path::new("/etcetera")).is_ok());
    }
}
