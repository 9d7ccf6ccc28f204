use std::fs;

use tempfile::TempDir;

use super::*;

fn storable(dir: &TempDir, name: &str, contents: &str) -> StorableTarget {
    let abs = dir.path().join("produced").join(name);
    fs::create_dir_all(abs.parent().unwrap()).unwrap();
    fs::write(&abs, contents).unwrap();
    StorableTarget {
        target: BuildPath::new(format!("default/{name}")).unwrap(),
        abs_path: abs,
        digest: Digest::of_string(contents),
        executable: false,
    }
}

#[tokio::test]
async fn store_then_restore() {
    let dir = TempDir::new().unwrap();
    let cache = FsSharedCache::new(dir.path().join("cache"));
    let build_root = dir.path().join("_build");

    let rule_digest = Digest::of_string("rule-1");
    let targets = vec![storable(&dir, "out.txt", "cached contents")];

    let stored = cache
        .store_artifacts(CacheStorageMode::Copy, &rule_digest, &targets)
        .await;
    assert!(matches!(stored, StoreResult::Stored));

    let wanted: std::collections::BTreeSet<BuildPath> =
        [BuildPath::new("default/out.txt").unwrap()].into();
    let restored = cache
        .restore_artifacts(
            CacheStorageMode::Copy,
            &rule_digest,
            &wanted,
            &build_root,
        )
        .await;

    match restored {
        RestoreResult::Restored(files) => {
            assert_eq!(files.len(), 1);
            assert_eq!(
                fs::read_to_string(build_root.join("default/out.txt"))
                    .unwrap(),
                "cached contents"
            );
        }
        other => panic!("expected restore, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_digest_is_not_found() {
    let dir = TempDir::new().unwrap();
    let cache = FsSharedCache::new(dir.path().join("cache"));

    let wanted: std::collections::BTreeSet<BuildPath> =
        [BuildPath::new("default/x").unwrap()].into();
    let restored = cache
        .restore_artifacts(
            CacheStorageMode::Copy,
            &Digest::of_string("never stored"),
            &wanted,
            dir.path(),
        )
        .await;
    assert!(matches!(restored, RestoreResult::NotFound));
}

#[tokio::test]
async fn storing_same_entry_twice_is_already_present() {
    let dir = TempDir::new().unwrap();
    let cache = FsSharedCache::new(dir.path().join("cache"));
    let rule_digest = Digest::of_string("rule-2");
    let targets = vec![storable(&dir, "a.txt", "same")];

    let first = cache
        .store_artifacts(CacheStorageMode::Copy, &rule_digest, &targets)
        .await;
    assert!(matches!(first, StoreResult::Stored));

    let second = cache
        .store_artifacts(CacheStorageMode::Copy, &rule_digest, &targets)
        .await;
    assert!(matches!(second, StoreResult::AlreadyPresent));
}

#[tokio::test]
async fn nondeterminism_is_detected() {
    let dir = TempDir::new().unwrap();
    let cache = FsSharedCache::new(dir.path().join("cache"));
    let rule_digest = Digest::of_string("rule-3");

    let first_run = vec![storable(&dir, "b.txt", "first contents")];
    let stored = cache
        .store_artifacts(CacheStorageMode::Copy, &rule_digest, &first_run)
        .await;
    assert!(matches!(stored, StoreResult::Stored));

    // same rule digest, different output
    let second_run = vec![storable(&dir, "b.txt", "different contents")];
    let stored = cache
        .store_artifacts(CacheStorageMode::Copy, &rule_digest, &second_run)
        .await;
    assert!(matches!(
        stored,
        StoreResult::WillNotStoreNonDeterminism { .. }
    ));
}

#[tokio::test]
async fn restore_rejects_mismatched_target_sets() {
    let dir = TempDir::new().unwrap();
    let cache = FsSharedCache::new(dir.path().join("cache"));
    let rule_digest = Digest::of_string("rule-4");
    let targets = vec![storable(&dir, "c.txt", "x")];

    cache
        .store_artifacts(CacheStorageMode::Copy, &rule_digest, &targets)
        .await;

    let wanted: std::collections::BTreeSet<BuildPath> =
        [BuildPath::new("default/other.txt").unwrap()].into();
    let restored = cache
        .restore_artifacts(
            CacheStorageMode::Copy,
            &rule_digest,
            &wanted,
            dir.path(),
        )
        .await;
    assert!(matches!(restored, RestoreResult::Error(_)));
}
