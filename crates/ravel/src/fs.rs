//! Filesystem helpers.
//!
//! Blocking filesystem work runs on the blocking thread pool via
//! [`tokio::task::spawn_blocking`]; the async scheduler threads only ever
//! suspend, they never block on disk I/O.

use std::{fs, io, path::Path, path::PathBuf};

use crate::error::{BuildError, Result, io_error};

/// What kind of entry a directory listing found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryKind {
    File,
    Dir,
    Other,
}

/// Runs a blocking closure on the blocking pool.
pub(crate) async fn blocking<T: Send + 'static>(
    f: impl FnOnce() -> T + Send + 'static,
) -> T {
    tokio::task::spawn_blocking(f)
        .await
        .expect("blocking task panicked or was aborted")
}

/// Lists a directory's entries, sorted by name.
///
/// Returns `None` when the directory does not exist.
///
/// # Errors
///
/// Propagates other filesystem errors.
pub async fn read_dir_sorted(
    path: PathBuf,
) -> Result<Option<Vec<(String, EntryKind)>>> {
    blocking(move || {
        let entries = match fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("reading directory", &path, e)),
        };

        let mut out = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| io_error("reading directory", &path, e))?;
            let kind = match entry.file_type() {
                Ok(t) if t.is_dir() => EntryKind::Dir,
                Ok(t) if t.is_file() => EntryKind::File,
                Ok(_) => EntryKind::Other,
                Err(e) => {
                    return Err(io_error("stating entry", &entry.path(), e));
                }
            };
            out.push((entry.file_name().to_string_lossy().into_owned(), kind));
        }
        out.sort();
        Ok(Some(out))
    })
    .await
}

/// Removes a file or an entire directory tree. Missing paths are fine.
///
/// # Errors
///
/// Propagates other filesystem errors.
pub async fn remove_all(path: PathBuf) -> Result<()> {
    blocking(move || remove_all_sync(&path)).await
}

pub(crate) fn remove_all_sync(path: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io_error("stating", path, e)),
    };
    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error("removing", path, e)),
    }
}

/// Creates a directory and all of its parents.
///
/// # Errors
///
/// Propagates filesystem errors.
pub async fn create_dir_all(path: PathBuf) -> Result<()> {
    blocking(move || {
        fs::create_dir_all(&path)
            .map_err(|e| io_error("creating directory", &path, e))
    })
    .await
}

/// Copies `src` to `dst`, preserving permissions (notably the executable
/// bit).
///
/// # Errors
///
/// Propagates filesystem errors.
pub async fn copy_file(src: PathBuf, dst: PathBuf) -> Result<()> {
    blocking(move || copy_file_sync(&src, &dst)).await
}

pub(crate) fn copy_file_sync(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| io_error("creating directory", parent, e))?;
    }
    // copying over a read-only previous artifact fails; unlink it first
    match fs::remove_file(dst) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_error("removing old file", dst, e)),
    }
    fs::copy(src, dst).map_err(|e| {
        BuildError::io(
            format!("copying {} to {}", src.display(), dst.display()),
            e,
        )
    })?;
    let permissions = fs::metadata(src)
        .map_err(|e| io_error("stating", src, e))?
        .permissions();
    fs::set_permissions(dst, permissions)
        .map_err(|e| io_error("setting permissions on", dst, e))
}

/// Writes `contents` to `path`, creating parent directories.
///
/// # Errors
///
/// Propagates filesystem errors.
pub async fn write_file(path: PathBuf, contents: Vec<u8>) -> Result<()> {
    blocking(move || {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| io_error("creating directory", parent, e))?;
        }
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error("removing old file", &path, e)),
        }
        fs::write(&path, contents).map_err(|e| io_error("writing", &path, e))
    })
    .await
}

/// Re-adds the user-write bit, e.g. on files promoted back into the source
/// tree.
///
/// # Errors
///
/// Propagates filesystem errors.
pub(crate) fn make_user_writable_sync(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        let metadata =
            fs::metadata(path).map_err(|e| io_error("stating", path, e))?;
        let mode = metadata.permissions().mode();
        fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o200))
            .map_err(|e| io_error("setting permissions on", path, e))
    }
    #[cfg(not(unix))]
    {
        let mut permissions = fs::metadata(path)
            .map_err(|e| io_error("stating", path, e))?
            .permissions();
        permissions.set_readonly(false);
        fs::set_permissions(path, permissions)
            .map_err(|e| io_error("setting permissions on", path, e))
    }
}

/// Whether a regular file exists at `path`.
pub async fn file_exists(path: PathBuf) -> bool {
    blocking(move || path.is_file()).await
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn read_dir_sorted_orders_entries() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.txt"), "").unwrap();
        fs::write(dir.path().join("a.txt"), "").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let entries = read_dir_sorted(dir.path().to_path_buf())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            entries,
            vec![
                ("a.txt".to_owned(), EntryKind::File),
                ("b.txt".to_owned(), EntryKind::File),
                ("sub".to_owned(), EntryKind::Dir),
            ]
        );
    }

    #[tokio::test]
    async fn read_dir_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let entries =
            read_dir_sorted(dir.path().join("missing")).await.unwrap();
        assert!(entries.is_none());
    }

    #[tokio::test]
    async fn remove_all_handles_files_dirs_and_absence() {
        let dir = TempDir::new().unwrap();

        let file = dir.path().join("f");
        fs::write(&file, "").unwrap();
        remove_all(file.clone()).await.unwrap();
        assert!(!file.exists());

        let tree = dir.path().join("tree");
        fs::create_dir_all(tree.join("nested")).unwrap();
        fs::write(tree.join("nested/f"), "").unwrap();
        remove_all(tree.clone()).await.unwrap();
        assert!(!tree.exists());

        remove_all(dir.path().join("never-existed")).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn copy_preserves_executable_bit() {
        use std::os::unix::fs::PermissionsExt as _;

        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src.sh");
        fs::write(&src, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o755)).unwrap();

        let dst = dir.path().join("out/dst.sh");
        copy_file(src, dst.clone()).await.unwrap();

        let mode = fs::metadata(&dst).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0);
    }
}
