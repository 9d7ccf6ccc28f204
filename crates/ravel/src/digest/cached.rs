//! Digest cache keyed by file identity.
//!
//! Hashing large files on every run would dominate no-op build times. The
//! cache maps each absolute path to `(stat key, digest)`; as long as the stat
//! key (mtime, size, inode, permission bits) is unchanged the cached digest
//! is reused without reading the file.

use std::{fs, io, path::Path, path::PathBuf, sync::Arc};

use dashmap::DashMap;
use fxhash::FxBuildHasher;

use super::Digest;

/// Identity of a file's stat information.
///
/// If any of these change, the cached digest is discarded and the file is
/// re-read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatKey {
    mtime_secs: i64,
    mtime_nanos: u32,
    size: u64,
    ino: u64,
    mode: u32,
}

impl StatKey {
    fn of(metadata: &fs::Metadata) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt as _;
            Self {
                mtime_secs: metadata.mtime(),
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                mtime_nanos: metadata.mtime_nsec() as u32,
                size: metadata.size(),
                ino: metadata.ino(),
                mode: metadata.mode(),
            }
        }
        #[cfg(not(unix))]
        {
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| {
                    t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok()
                })
                .unwrap_or_default();
            Self {
                mtime_secs: mtime.as_secs() as i64,
                mtime_nanos: mtime.subsec_nanos(),
                size: metadata.len(),
                ino: 0,
                mode: u32::from(metadata.permissions().readonly()),
            }
        }
    }
}

/// The outcome of refreshing a path's digest.
#[derive(Debug, Clone)]
pub enum DigestResult {
    Ok(Digest),
    NoSuchFile,
    Error(Arc<io::Error>),
}

impl DigestResult {
    /// The digest, if the file was hashed successfully.
    #[must_use]
    pub fn ok(&self) -> Option<Digest> {
        match self {
            Self::Ok(digest) => Some(*digest),
            Self::NoSuchFile | Self::Error(_) => None,
        }
    }
}

impl PartialEq for DigestResult {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Ok(a), Self::Ok(b)) => a == b,
            (Self::NoSuchFile, Self::NoSuchFile) => true,
            // errors are never considered equal, so downstream work re-runs
            // until the error is resolved
            _ => false,
        }
    }
}

/// In-memory cache of file digests, invalidated by stat-key changes.
#[derive(Debug, Default)]
pub struct DigestCache {
    entries: DashMap<PathBuf, (StatKey, Digest), FxBuildHasher>,
}

impl DigestCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stats `path` and returns its digest, re-reading the file only when the
    /// stat key changed since the last refresh.
    ///
    /// With `remove_write_permissions`, write bits are chmod'ed off before
    /// hashing so that hardlink sharing with a content-addressed cache cannot
    /// be corrupted by later writes through the build tree.
    pub fn refresh(
        &self,
        path: &Path,
        remove_write_permissions: bool,
    ) -> DigestResult {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.entries.remove(path);
                return DigestResult::NoSuchFile;
            }
            Err(e) => return DigestResult::Error(Arc::new(e)),
        };

        if !metadata.is_file() {
            // directories and symlinks are digested by name elsewhere
            return DigestResult::Error(Arc::new(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            )));
        }

        let metadata = if remove_write_permissions {
            match strip_write_bits(path, &metadata) {
                Ok(metadata) => metadata,
                Err(e) => return DigestResult::Error(Arc::new(e)),
            }
        } else {
            metadata
        };

        let key = StatKey::of(&metadata);
        if let Some(entry) = self.entries.get(path)
            && entry.0 == key
        {
            return DigestResult::Ok(entry.1);
        }

        match Digest::file(path) {
            Ok(digest) => {
                self.entries.insert(path.to_path_buf(), (key, digest));
                DigestResult::Ok(digest)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.entries.remove(path);
                DigestResult::NoSuchFile
            }
            Err(e) => DigestResult::Error(Arc::new(e)),
        }
    }

    /// Drops the cached digest for `path`.
    ///
    /// Called when the engine deletes a stale target, so a later refresh
    /// cannot return the digest of the deleted contents.
    pub fn invalidate(&self, path: &Path) {
        self.entries.remove(path);
    }
}

#[cfg(unix)]
fn strip_write_bits(
    path: &Path,
    metadata: &fs::Metadata,
) -> io::Result<fs::Metadata> {
    use std::os::unix::fs::PermissionsExt as _;

    let mode = metadata.permissions().mode();
    if mode & 0o222 == 0 {
        return Ok(metadata.clone());
    }
    fs::set_permissions(path, fs::Permissions::from_mode(mode & !0o222))?;
    fs::symlink_metadata(path)
}

#[cfg(not(unix))]
fn strip_write_bits(
    path: &Path,
    metadata: &fs::Metadata,
) -> io::Result<fs::Metadata> {
    let mut permissions = metadata.permissions();
    if permissions.readonly() {
        return Ok(metadata.clone());
    }
    permissions.set_readonly(true);
    fs::set_permissions(path, permissions)?;
    fs::symlink_metadata(path)
}
