use std::{fs, io::Write as _};

use tempfile::TempDir;

use super::{Digest, DigestCache, DigestResult};

#[test]
fn bytes_digest_is_deterministic() {
    assert_eq!(Digest::of_bytes(b"hi"), Digest::of_bytes(b"hi"));
    assert_ne!(Digest::of_bytes(b"hi"), Digest::of_bytes(b"ho"));
}

#[test]
fn generic_digest_distinguishes_structures() {
    let a = Digest::generic(&("ab".to_owned(), "c".to_owned())).unwrap();
    let b = Digest::generic(&("a".to_owned(), "bc".to_owned())).unwrap();
    assert_ne!(a, b);
}

#[test]
fn file_digest_tracks_contents() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("f.txt");

    fs::write(&path, "one").unwrap();
    let first = Digest::file(&path).unwrap();

    fs::write(&path, "two").unwrap();
    let second = Digest::file(&path).unwrap();

    assert_ne!(first, second);
}

#[cfg(unix)]
#[test]
fn file_digest_includes_executable_bit() {
    use std::os::unix::fs::PermissionsExt as _;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("script.sh");
    fs::write(&path, "#!/bin/sh\n").unwrap();

    let plain = Digest::file(&path).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    let executable = Digest::file(&path).unwrap();

    assert_ne!(plain, executable);
}

#[test]
fn cache_returns_same_digest_without_rereading() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("f.txt");
    fs::write(&path, "contents").unwrap();

    let cache = DigestCache::new();
    let first = cache.refresh(&path, false);
    let second = cache.refresh(&path, false);
    assert_eq!(first, second);
    assert!(first.ok().is_some());
}

#[test]
fn cache_detects_content_change() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("f.txt");

    let mut file = fs::File::create(&path).unwrap();
    file.write_all(b"one").unwrap();
    drop(file);

    let cache = DigestCache::new();
    let first = cache.refresh(&path, false).ok().unwrap();

    // a different size guarantees a stat-key change even on coarse clocks
    fs::write(&path, "twotwo").unwrap();
    let second = cache.refresh(&path, false).ok().unwrap();

    assert_ne!(first, second);
}

#[test]
fn cache_reports_missing_files() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent");

    let cache = DigestCache::new();
    assert!(matches!(cache.refresh(&path, false), DigestResult::NoSuchFile));
}

#[test]
fn invalidate_forgets_entry() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("f.txt");
    fs::write(&path, "x").unwrap();

    let cache = DigestCache::new();
    let before = cache.refresh(&path, false).ok().unwrap();
    cache.invalidate(&path);
    let after = cache.refresh(&path, false).ok().unwrap();
    assert_eq!(before, after);
}

#[cfg(unix)]
#[test]
fn refresh_can_strip_write_permissions() {
    use std::os::unix::fs::PermissionsExt as _;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("f.txt");
    fs::write(&path, "x").unwrap();

    let cache = DigestCache::new();
    cache.refresh(&path, true).ok().unwrap();

    let mode = fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o222, 0);
}
