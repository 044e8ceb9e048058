//! Property-based checks for the counter invariants that must hold across arbitrary trees,
//! not just the hand-picked scenarios in `scenarios.rs`.

use std::sync::Arc;

use proptest::prelude::*;
use tempfile::tempdir;
use tokio::runtime::Runtime;

use purge::clock::SystemClock;
use purge::config::Config;

fn build_tree(root: &std::path::Path, file_count: usize, old_count: usize) {
    let old_mtime = std::time::SystemTime::now() - std::time::Duration::from_secs(60 * 86_400);
    for i in 0..file_count {
        let path = root.join(format!("f{i}.txt"));
        std::fs::write(&path, b"payload").unwrap();
        if i < old_count {
            filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(old_mtime))
                .unwrap();
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn invariant_purged_le_to_purge_le_scanned(
        file_count in 0usize..40,
        old_fraction in 0usize..=100,
    ) {
        let old_count = (file_count * old_fraction) / 100;
        let dir = tempdir().unwrap();
        build_tree(dir.path(), file_count, old_count);

        let mut config = Config::default();
        config.root = dir.path().to_path_buf();
        config.max_age_days = 30.0;

        let runtime = Runtime::new().unwrap();
        let snapshot = runtime
            .block_on(purge::purge(config, Arc::new(SystemClock)))
            .unwrap();

        prop_assert!(snapshot.files_purged <= snapshot.files_to_purge);
        prop_assert!(snapshot.files_to_purge <= snapshot.files_scanned);
        prop_assert_eq!(snapshot.files_scanned as usize, file_count);
        prop_assert_eq!(snapshot.files_to_purge as usize, old_count);
        prop_assert_eq!(snapshot.files_purged as usize, old_count);
    }

    #[test]
    fn invariant_dry_run_deletes_nothing(
        file_count in 0usize..30,
        old_fraction in 0usize..=100,
    ) {
        let old_count = (file_count * old_fraction) / 100;
        let dir = tempdir().unwrap();
        build_tree(dir.path(), file_count, old_count);

        let mut config = Config::default();
        config.root = dir.path().to_path_buf();
        config.max_age_days = 30.0;
        config.dry_run = true;

        let runtime = Runtime::new().unwrap();
        let snapshot = runtime
            .block_on(purge::purge(config, Arc::new(SystemClock)))
            .unwrap();

        prop_assert_eq!(snapshot.files_purged, 0);
        let remaining = std::fs::read_dir(dir.path()).unwrap().count();
        prop_assert_eq!(remaining, file_count);
    }
}
