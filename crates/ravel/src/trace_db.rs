//! The rule trace database.
//!
//! Maps each rule's head target to what is needed to decide whether the
//! rule can be skipped: the rule digest, the recorded dynamic-dependency
//! stages, and the digest of the produced targets. Loaded lazily on first
//! use, dumped once at end of build.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::OnceLock,
    sync::atomic::{AtomicBool, Ordering},
};

use fxhash::FxBuildHasher;
use parking_lot::Mutex;
use ravel_serialize::{Decode, Encode};

use crate::{deps::DepSet, digest::Digest, path::BuildPath, persist};

/// Bump on any change to [`TraceEntry`]'s schema. Old files load as absent,
/// which costs a rebuild and nothing else.
pub const TRACE_DB_VERSION: u32 = 6;

const TRACE_DB_MAGIC: &[u8; 8] = b"RAVLTRDB";

/// Name of the database file under the build root.
pub const TRACE_DB_FILE: &str = ".db";

/// The persisted record of one rule execution.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct TraceEntry {
    /// Digest of everything that determines the rule's behavior.
    pub rule_digest: Digest,
    /// One `(deps, facts digest)` pair per dynamic-dependency stage, in
    /// discovery order. Empty for static rules.
    pub dynamic_deps_stages: Vec<(DepSet, Digest)>,
    /// Combined digest of all produced targets.
    pub targets_digest: Digest,
}

type Table = HashMap<BuildPath, TraceEntry, FxBuildHasher>;

/// The trace database: lazily loaded, explicitly dumped.
#[derive(Debug)]
pub struct TraceDb {
    path: PathBuf,
    state: OnceLock<Mutex<Table>>,
    dirty: AtomicBool,
}

impl TraceDb {
    /// A database backed by the given file. Nothing is read until the first
    /// access.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path, state: OnceLock::new(), dirty: AtomicBool::new(false) }
    }

    fn table(&self) -> &Mutex<Table> {
        self.state.get_or_init(|| {
            Mutex::new(
                persist::load(&self.path, TRACE_DB_MAGIC, TRACE_DB_VERSION)
                    .unwrap_or_default(),
            )
        })
    }

    /// The prior trace for a head target.
    #[must_use]
    pub fn get(&self, head_target: &BuildPath) -> Option<TraceEntry> {
        self.table().lock().get(head_target).cloned()
    }

    /// Records a new trace after a successful execution.
    pub fn set(&self, head_target: BuildPath, entry: TraceEntry) {
        self.table().lock().insert(head_target, entry);
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// Forgets a head target, e.g. when its rule disappeared.
    pub fn remove(&self, head_target: &BuildPath) {
        if self.table().lock().remove(head_target).is_some() {
            self.dirty.store(true, Ordering::Relaxed);
        }
    }

    /// Persists the database if it changed since loading.
    ///
    /// # Errors
    ///
    /// Propagates filesystem errors.
    pub fn dump(&self) -> std::io::Result<()> {
        if !self.dirty.swap(false, Ordering::Relaxed) {
            return Ok(());
        }
        let table = self.table().lock();
        persist::dump(&self.path, TRACE_DB_MAGIC, TRACE_DB_VERSION, &*table)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn entry(n: u8) -> TraceEntry {
        TraceEntry {
            rule_digest: Digest::of_bytes(&[n]),
            dynamic_deps_stages: vec![(
                DepSet::new().with(crate::deps::Dep::Env("CC".to_owned())),
                Digest::of_bytes(&[n, n]),
            )],
            targets_digest: Digest::of_bytes(&[n, n, n]),
        }
    }

    #[test]
    fn round_trip_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(TRACE_DB_FILE);
        let target = BuildPath::new("default/a.o").unwrap();

        let db = TraceDb::new(path.clone());
        assert!(db.get(&target).is_none());
        db.set(target.clone(), entry(1));
        db.dump().unwrap();

        let reloaded = TraceDb::new(path);
        assert_eq!(reloaded.get(&target), Some(entry(1)));
    }

    #[test]
    fn dump_without_changes_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(TRACE_DB_FILE);

        let db = TraceDb::new(path.clone());
        let _ = db.get(&BuildPath::new("default/x").unwrap());
        db.dump().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn remove_is_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(TRACE_DB_FILE);
        let target = BuildPath::new("default/a.o").unwrap();

        {
            let db = TraceDb::new(path.clone());
            db.set(target.clone(), entry(2));
            db.dump().unwrap();
        }
        {
            let db = TraceDb::new(path.clone());
            db.remove(&target);
            db.dump().unwrap();
        }

        let reloaded = TraceDb::new(path);
        assert!(reloaded.get(&target).is_none());
    }
}
