//! End-to-end scenarios driven through the public `purge()` entry point, one per named
//! concrete case. Directory-internal unit behavior lives alongside the modules that
//! implement it; these exercise the whole orchestrator sequence instead.

use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use purge::clock::SystemClock;
use purge::config::Config;
use purge::Phase;

fn base_config(root: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.root = root.to_path_buf();
    config
}

#[tokio::test]
async fn s2_dry_run_preserves_every_byte() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    let c = dir.path().join("c.txt");
    std::fs::write(&a, b"old-a").unwrap();
    std::fs::write(&b, b"old-b").unwrap();
    std::fs::write(&c, b"fresh-c").unwrap();

    let old_mtime = std::time::SystemTime::now() - Duration::from_secs(60 * 86_400);
    filetime::set_file_mtime(&a, filetime::FileTime::from_system_time(old_mtime)).unwrap();
    filetime::set_file_mtime(&b, filetime::FileTime::from_system_time(old_mtime)).unwrap();

    let mut config = base_config(dir.path());
    config.max_age_days = 30.0;
    config.dry_run = true;

    let snapshot = purge::purge(config, Arc::new(SystemClock)).await.unwrap();

    assert_eq!(snapshot.files_to_purge, 2);
    assert_eq!(snapshot.files_purged, 0);
    assert!(a.exists());
    assert!(b.exists());
    assert!(c.exists());
}

#[tokio::test]
async fn s6_deep_tree_concurrency_completes_without_deadlock() {
    let dir = tempdir().unwrap();

    // Wide enough to exercise the sliding window (subdir_slots below the fan-out width)
    // without making the test slow.
    for i in 0..20 {
        let level1 = dir.path().join(format!("d{i}"));
        for j in 0..10 {
            let level2 = level1.join(format!("d{j}"));
            std::fs::create_dir_all(&level2).unwrap();
        }
    }

    let mut config = base_config(dir.path());
    config.remove_empty_dirs = true;
    config.subdir_slots = 8;

    let result = tokio::time::timeout(
        Duration::from_secs(30),
        purge::purge(config, Arc::new(SystemClock)),
    )
    .await;

    let snapshot = result.expect("walk must not deadlock").unwrap();
    assert_eq!(snapshot.phase, Phase::Completed);
    assert!(dir.path().exists());

    let remaining_entries = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(remaining_entries, 0);
}

#[tokio::test]
async fn infinite_max_age_deletes_nothing() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("ancient.txt");
    std::fs::write(&file, b"x").unwrap();
    filetime::set_file_mtime(
        &file,
        filetime::FileTime::from_system_time(std::time::SystemTime::UNIX_EPOCH),
    )
    .unwrap();

    let mut config = base_config(dir.path());
    config.max_age_days = f64::INFINITY;

    let snapshot = purge::purge(config, Arc::new(SystemClock)).await.unwrap();

    assert_eq!(snapshot.files_purged, 0);
    assert!(file.exists());
}

#[tokio::test]
async fn task_batch_size_of_one_still_completes() {
    let dir = tempdir().unwrap();
    for i in 0..5 {
        std::fs::write(dir.path().join(format!("f{i}.txt")), b"x").unwrap();
    }

    let mut config = base_config(dir.path());
    config.task_batch_size = 1;
    config.max_age_days = 0.0;

    let snapshot = purge::purge(config, Arc::new(SystemClock)).await.unwrap();

    assert_eq!(snapshot.files_scanned, 5);
    assert_eq!(snapshot.files_purged, 5);
}
