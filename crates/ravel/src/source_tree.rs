//! The source-tree oracle.
//!
//! Source-tree traversal (VCS ignores, project discovery) is owned by the
//! host; the engine only needs directory listings, consumed through the
//! [`SourceTree`] trait. [`FsSourceTree`] is the plain filesystem-backed
//! implementation used by hosts without a fancier view of the tree.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use futures::future::BoxFuture;

use crate::{
    error::Result,
    fs::{self, EntryKind},
    path::SourcePath,
};

/// A listing of one source directory: entry name to kind.
///
/// Only files and subdirectories are listed; sockets, fifos and friends are
/// not part of the build model.
pub type SourceListing = BTreeMap<String, EntryKind>;

/// Read-only view of the source tree.
pub trait SourceTree: Send + Sync + 'static {
    /// Lists a source directory, or `None` if it does not exist.
    fn list_dir<'a>(
        &'a self,
        dir: &'a SourcePath,
    ) -> BoxFuture<'a, Result<Option<Arc<SourceListing>>>>;
}

/// A [`SourceTree`] reading directly from disk.
#[derive(Debug)]
pub struct FsSourceTree {
    root: PathBuf,
}

impl FsSourceTree {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SourceTree for FsSourceTree {
    fn list_dir<'a>(
        &'a self,
        dir: &'a SourcePath,
    ) -> BoxFuture<'a, Result<Option<Arc<SourceListing>>>> {
        Box::pin(async move {
            let abs = dir.rel().to_fs_path(&self.root);
            let Some(entries) = fs::read_dir_sorted(abs).await? else {
                return Ok(None);
            };

            let listing: SourceListing = entries
                .into_iter()
                .filter(|(_, kind)| {
                    matches!(kind, EntryKind::File | EntryKind::Dir)
                })
                .collect();
            Ok(Some(Arc::new(listing)))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs as std_fs;

    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn lists_files_and_dirs() {
        let dir = TempDir::new().unwrap();
        std_fs::write(dir.path().join("a.txt"), "").unwrap();
        std_fs::create_dir(dir.path().join("sub")).unwrap();

        let tree = FsSourceTree::new(dir.path());
        let listing =
            tree.list_dir(&SourcePath::root()).await.unwrap().unwrap();

        assert_eq!(listing.get("a.txt"), Some(&EntryKind::File));
        assert_eq!(listing.get("sub"), Some(&EntryKind::Dir));
    }

    #[tokio::test]
    async fn missing_dir_is_none() {
        let dir = TempDir::new().unwrap();
        let tree = FsSourceTree::new(dir.path());
        let listing = tree
            .list_dir(&SourcePath::new("nope").unwrap())
            .await
            .unwrap();
        assert!(listing.is_none());
    }
}
