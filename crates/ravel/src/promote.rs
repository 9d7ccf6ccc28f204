//! The promoted-to-delete set.
//!
//! Promotion copies build outputs back into the source tree. Files promoted
//! with [`PromoteLifetime::UntilClean`](crate::rules::PromoteLifetime) are
//! recorded here so that `clean` knows which source-tree files the build
//! owns and may remove.

use std::{
    collections::BTreeSet,
    path::PathBuf,
    sync::OnceLock,
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;

use crate::{path::SourcePath, persist};

const PROMOTED_DB_MAGIC: &[u8; 8] = b"RAVLPRMT";
const PROMOTED_DB_VERSION: u32 = 1;

/// Name of the database file under the build root.
pub const PROMOTED_DB_FILE: &str = ".to-delete-in-source-tree";

/// The persistent set of source-tree paths the build wrote.
#[derive(Debug)]
pub struct PromotedToDelete {
    path: PathBuf,
    state: OnceLock<Mutex<BTreeSet<SourcePath>>>,
    dirty: AtomicBool,
}

impl PromotedToDelete {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path, state: OnceLock::new(), dirty: AtomicBool::new(false) }
    }

    fn set(&self) -> &Mutex<BTreeSet<SourcePath>> {
        self.state.get_or_init(|| {
            Mutex::new(
                persist::load(
                    &self.path,
                    PROMOTED_DB_MAGIC,
                    PROMOTED_DB_VERSION,
                )
                .unwrap_or_default(),
            )
        })
    }

    /// Records a promoted file for later `clean`.
    pub fn add(&self, path: SourcePath) {
        if self.set().lock().insert(path) {
            self.dirty.store(true, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn contains(&self, path: &SourcePath) -> bool {
        self.set().lock().contains(path)
    }

    /// Takes the whole set, leaving it empty. Used by `clean`.
    #[must_use]
    pub fn take_all(&self) -> BTreeSet<SourcePath> {
        let taken = std::mem::take(&mut *self.set().lock());
        if !taken.is_empty() {
            self.dirty.store(true, Ordering::Relaxed);
        }
        taken
    }

    /// Persists the set if it changed since loading.
    ///
    /// # Errors
    ///
    /// Propagates filesystem errors.
    pub fn dump(&self) -> std::io::Result<()> {
        if !self.dirty.swap(false, Ordering::Relaxed) {
            return Ok(());
        }
        let set = self.set().lock();
        persist::dump(
            &self.path,
            PROMOTED_DB_MAGIC,
            PROMOTED_DB_VERSION,
            &*set,
        )
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn round_trip_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(PROMOTED_DB_FILE);
        let promoted = SourcePath::new("gen.ml").unwrap();

        {
            let db = PromotedToDelete::new(path.clone());
            db.add(promoted.clone());
            db.dump().unwrap();
        }

        let reloaded = PromotedToDelete::new(path);
        assert!(reloaded.contains(&promoted));
    }

    #[test]
    fn take_all_empties_the_set() {
        let dir = TempDir::new().unwrap();
        let db = PromotedToDelete::new(dir.path().join(PROMOTED_DB_FILE));
        db.add(SourcePath::new("a").unwrap());
        db.add(SourcePath::new("b").unwrap());

        let taken = db.take_all();
        assert_eq!(taken.len(), 2);
        assert!(db.take_all().is_empty());
    }
}
