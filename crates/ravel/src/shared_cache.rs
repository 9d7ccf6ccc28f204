//! The shared artifact cache contract and a filesystem implementation.
//!
//! The cache maps rule digests to stored target files, addressed by content.
//! Restoring skips action execution entirely; storing makes the outcome
//! available to other build directories (or machines, with a shared mount).

use std::{collections::BTreeSet, fs, path::Path, path::PathBuf};

use futures::future::BoxFuture;
use ravel_serialize::{Decode, Encode};
use tracing::{debug, warn};

use crate::{digest::Digest, path::BuildPath};

/// How restored files are materialized into the build tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStorageMode {
    /// Hardlink from the cache; requires write permissions to be stripped
    /// from build outputs.
    Hardlink,
    /// Copy out of the cache.
    Copy,
}

/// Outcome of a restore attempt.
#[derive(Debug)]
pub enum RestoreResult {
    /// All targets materialized; their digests are reported.
    Restored(Vec<(BuildPath, Digest)>),
    /// The rule digest is not in the cache.
    NotFound,
    /// The cache is unusable for this entry; the caller executes the rule.
    Error(String),
}

/// Outcome of a store attempt.
#[derive(Debug)]
pub enum StoreResult {
    Stored,
    /// The same rule digest was already stored with identical contents.
    AlreadyPresent,
    /// The same rule digest was already stored with *different* contents:
    /// the rule is not reproducible. Reported as a warning by the executor.
    WillNotStoreNonDeterminism { reason: String },
    Error(String),
}

/// One target to store: its build path, absolute location, and digest.
#[derive(Debug, Clone)]
pub struct StorableTarget {
    pub target: BuildPath,
    pub abs_path: PathBuf,
    pub digest: Digest,
    pub executable: bool,
}

/// The shared cache contract consumed by the rule executor.
pub trait SharedCache: Send + Sync + 'static {
    /// Attempts to materialize every target of `rule_digest` into the build
    /// tree.
    fn restore_artifacts<'a>(
        &'a self,
        mode: CacheStorageMode,
        rule_digest: &'a Digest,
        targets: &'a BTreeSet<BuildPath>,
        build_root: &'a Path,
    ) -> BoxFuture<'a, RestoreResult>;

    /// Attempts to store the produced targets under `rule_digest`.
    fn store_artifacts<'a>(
        &'a self,
        mode: CacheStorageMode,
        rule_digest: &'a Digest,
        targets: &'a [StorableTarget],
    ) -> BoxFuture<'a, StoreResult>;
}

/// Metadata persisted per rule digest: target name, content digest,
/// executable bit.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
struct MetaEntry {
    target: BuildPath,
    digest: Digest,
    executable: bool,
}

const META_MAGIC: &[u8; 8] = b"RAVLCACH";
const META_VERSION: u32 = 1;

/// A content-addressed cache in a local directory.
///
/// Layout:
///
/// ```text
/// <root>/
/// ├── files/<aa>/<digest>      # file contents, named by digest
/// └── meta/<aa>/<rule_digest>  # target list for one rule digest
/// ```
#[derive(Debug)]
pub struct FsSharedCache {
    root: PathBuf,
}

impl FsSharedCache {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn file_path(&self, digest: &Digest) -> PathBuf {
        let hex = digest.to_hex();
        self.root.join("files").join(&hex[..2]).join(&hex)
    }

    fn meta_path(&self, rule_digest: &Digest) -> PathBuf {
        let hex = rule_digest.to_hex();
        self.root.join("meta").join(&hex[..2]).join(&hex)
    }

    fn restore_sync(
        &self,
        mode: CacheStorageMode,
        rule_digest: &Digest,
        targets: &BTreeSet<BuildPath>,
        build_root: &Path,
    ) -> RestoreResult {
        let meta: Vec<MetaEntry> = match crate::persist::load(
            &self.meta_path(rule_digest),
            META_MAGIC,
            META_VERSION,
        ) {
            Some(meta) => meta,
            None => return RestoreResult::NotFound,
        };

        // the stored entry must cover exactly the declared targets
        let stored: BTreeSet<&BuildPath> =
            meta.iter().map(|e| &e.target).collect();
        if stored != targets.iter().collect() {
            return RestoreResult::Error(
                "cache entry does not match the rule's declared targets"
                    .to_owned(),
            );
        }

        let mut restored = Vec::with_capacity(meta.len());
        for entry in &meta {
            let cached = self.file_path(&entry.digest);
            if !cached.is_file() {
                return RestoreResult::NotFound;
            }
            let dst = entry.target.rel().to_fs_path(build_root);
            if let Err(e) = materialize(mode, &cached, &dst) {
                return RestoreResult::Error(format!(
                    "failed to materialize {}: {e}",
                    entry.target
                ));
            }
            restored.push((entry.target.clone(), entry.digest));
        }
        debug!(rule_digest = %rule_digest, "restored from shared cache");
        RestoreResult::Restored(restored)
    }

    fn store_sync(
        &self,
        _mode: CacheStorageMode,
        rule_digest: &Digest,
        targets: &[StorableTarget],
    ) -> StoreResult {
        let meta: Vec<MetaEntry> = targets
            .iter()
            .map(|t| MetaEntry {
                target: t.target.clone(),
                digest: t.digest,
                executable: t.executable,
            })
            .collect();

        let meta_path = self.meta_path(rule_digest);
        if let Some(existing) = crate::persist::load::<Vec<MetaEntry>>(
            &meta_path,
            META_MAGIC,
            META_VERSION,
        ) {
            if existing == meta {
                return StoreResult::AlreadyPresent;
            }
            return StoreResult::WillNotStoreNonDeterminism {
                reason: format!(
                    "rule digest {rule_digest} was previously stored with \
                     different target contents"
                ),
            };
        }

        for target in targets {
            let cached = self.file_path(&target.digest);
            if cached.is_file() {
                continue;
            }
            if let Some(parent) = cached.parent()
                && let Err(e) = fs::create_dir_all(parent)
            {
                return StoreResult::Error(e.to_string());
            }
            // copy to a temp name then rename, so concurrent stores of the
            // same content cannot observe partial files
            let tmp = cached.with_extension("part");
            if let Err(e) = fs::copy(&target.abs_path, &tmp)
                .and_then(|_| fs::rename(&tmp, &cached))
            {
                return StoreResult::Error(e.to_string());
            }
        }

        match crate::persist::dump(&meta_path, META_MAGIC, META_VERSION, &meta)
        {
            Ok(()) => {
                debug!(rule_digest = %rule_digest, "stored in shared cache");
                StoreResult::Stored
            }
            Err(e) => StoreResult::Error(e.to_string()),
        }
    }
}

fn materialize(
    mode: CacheStorageMode,
    cached: &Path,
    dst: &Path,
) -> std::io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::remove_file(dst) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    match mode {
        CacheStorageMode::Hardlink => match fs::hard_link(cached, dst) {
            Ok(()) => Ok(()),
            Err(e) => {
                // cross-device links degrade to copies
                warn!(error = %e, "hardlink from cache failed, copying");
                fs::copy(cached, dst).map(|_| ())
            }
        },
        CacheStorageMode::Copy => fs::copy(cached, dst).map(|_| ()),
    }
}

impl SharedCache for FsSharedCache {
    fn restore_artifacts<'a>(
        &'a self,
        mode: CacheStorageMode,
        rule_digest: &'a Digest,
        targets: &'a BTreeSet<BuildPath>,
        build_root: &'a Path,
    ) -> BoxFuture<'a, RestoreResult> {
        Box::pin(async move {
            let this_root = self.root.clone();
            let rule_digest = *rule_digest;
            let targets = targets.clone();
            let build_root = build_root.to_path_buf();
            crate::fs::blocking(move || {
                Self::new(this_root).restore_sync(
                    mode,
                    &rule_digest,
                    &targets,
                    &build_root,
                )
            })
            .await
        })
    }

    fn store_artifacts<'a>(
        &'a self,
        mode: CacheStorageMode,
        rule_digest: &'a Digest,
        targets: &'a [StorableTarget],
    ) -> BoxFuture<'a, StoreResult> {
        Box::pin(async move {
            let this_root = self.root.clone();
            let rule_digest = *rule_digest;
            let targets = targets.to_vec();
            crate::fs::blocking(move || {
                Self::new(this_root).store_sync(mode, &rule_digest, &targets)
            })
            .await
        })
    }
}

// the trait must stay usable behind a pointer in the engine
static_assertions::assert_obj_safe!(SharedCache);

#[cfg(test)]
mod test;
