//! Dependencies and their resolved facts.
//!
//! A [`Dep`] is a *declared* dependency: a file, an alias, a predicate over a
//! directory, an environment variable, the universe marker, or a sandbox
//! constraint. A [`Fact`] is the *resolved* form observed at build time: the
//! file's digest, the alias's expanded file set, and so on. [`Facts`] maps
//! each requested dep to its fact and has a total digest, which is what rule
//! digests are built from.

use std::collections::{BTreeMap, BTreeSet};

use enum_as_inner::EnumAsInner;
use ravel_serialize::{Decode, Encode};
use ravel_stable_hash::StableHash;

use crate::{
    alias::Alias,
    digest::Digest,
    error::{BuildError, Result},
    path::TreePath,
    sandbox::SandboxConfig,
};

/// A predicate over file basenames, used by [`Dep::FileSelector`].
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    StableHash,
    Encode,
    Decode,
)]
pub enum Predicate {
    /// Matches every file.
    All,
    /// Matches files with the given extension (without the dot).
    Ext(String),
    /// Glob with `*` wildcards, e.g. `*.ml` or `test_*`.
    Glob(String),
}

impl Predicate {
    /// Whether `basename` satisfies the predicate.
    #[must_use]
    pub fn matches(&self, basename: &str) -> bool {
        match self {
            Self::All => true,
            Self::Ext(ext) => {
                basename.rsplit_once('.').is_some_and(|(_, e)| e == ext)
            }
            Self::Glob(pattern) => glob_match(pattern, basename),
        }
    }
}

/// Matches `pattern` with `*` wildcards against `input`.
fn glob_match(pattern: &str, input: &str) -> bool {
    fn inner(pattern: &[u8], input: &[u8]) -> bool {
        match pattern.split_first() {
            None => input.is_empty(),
            Some((b'*', rest)) => (0..=input.len())
                .any(|skip| inner(rest, &input[skip..])),
            Some((c, rest)) => {
                input.split_first().is_some_and(|(i, itail)| {
                    i == c && inner(rest, itail)
                })
            }
        }
    }
    inner(pattern.as_bytes(), input.as_bytes())
}

/// All files in a directory matching a predicate.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    StableHash,
    Encode,
    Decode,
)]
pub struct FileSelector {
    pub dir: TreePath,
    pub predicate: Predicate,
}

impl std::fmt::Display for FileSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "files of {} matching {:?}", self.dir, self.predicate)
    }
}

/// A declared dependency.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    StableHash,
    Encode,
    Decode,
    EnumAsInner,
)]
pub enum Dep {
    /// The file must exist after its producer runs.
    File(TreePath),
    /// The alias expands transitively.
    Alias(Alias),
    /// Every file in a directory matching a predicate.
    FileSelector(FileSelector),
    /// The value of an environment variable.
    Env(String),
    /// Opaque "rebuild every time" marker.
    Universe,
    /// Constrains which sandbox modes the consuming rule may use.
    SandboxConfig(SandboxConfig),
}

/// A set of declared dependencies with deterministic iteration order.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    StableHash,
    Encode,
    Decode,
)]
pub struct DepSet(BTreeSet<Dep>);

impl DepSet {
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn insert(&mut self, dep: Dep) {
        self.0.insert(dep);
    }

    #[must_use]
    pub fn with(mut self, dep: Dep) -> Self {
        self.insert(dep);
        self
    }

    pub fn union_with(&mut self, other: &Self) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dep> {
        self.0.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn contains(&self, dep: &Dep) -> bool {
        self.0.contains(dep)
    }

    /// Whether the set contains the universe marker.
    #[must_use]
    pub fn has_universe(&self) -> bool {
        self.0.contains(&Dep::Universe)
    }

    /// The intersection of every sandbox constraint in the set.
    #[must_use]
    pub fn sandbox_config(&self) -> SandboxConfig {
        self.0
            .iter()
            .filter_map(|dep| dep.as_sandbox_config().copied())
            .fold(SandboxConfig::no_special_requirements(), SandboxConfig::inter)
    }
}

impl FromIterator<Dep> for DepSet {
    fn from_iter<I: IntoIterator<Item = Dep>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A set of files with their digests, e.g. an alias expansion.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    StableHash,
    Encode,
    Decode,
)]
pub struct FileFacts(pub BTreeMap<TreePath, Digest>);

impl FileFacts {
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, path: TreePath, digest: Digest) {
        self.0.insert(path, digest);
    }

    pub fn union_with(&mut self, other: &Self) {
        for (path, digest) in &other.0 {
            self.0.insert(path.clone(), *digest);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &TreePath> {
        self.0.keys()
    }

    /// A digest of the whole file set.
    ///
    /// # Errors
    ///
    /// See [`Digest::generic`].
    pub fn digest(&self) -> Result<Digest> {
        Digest::generic(self).map_err(|e| {
            BuildError::io("digesting file facts".to_owned(), e)
        })
    }
}

/// The resolved form of one dependency.
#[derive(
    Debug, Clone, PartialEq, Eq, StableHash, Encode, Decode, EnumAsInner,
)]
pub enum Fact {
    /// The digest of a file dependency.
    File { digest: Digest },
    /// The files an alias expanded to.
    Alias(FileFacts),
    /// The files a selector matched.
    FileSelector(FileFacts),
    /// The value of an environment variable, or `None` if unset.
    Env(Option<String>),
    /// Deps with no observable content (universe, sandbox constraints).
    Nothing,
}

/// Resolved facts for every dependency a computation requested.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, StableHash, Encode, Decode,
)]
pub struct Facts(BTreeMap<Dep, Fact>);

impl Facts {
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, dep: Dep, fact: Fact) {
        self.0.insert(dep, fact);
    }

    pub fn union_with(&mut self, other: &Self) {
        for (dep, fact) in &other.0 {
            self.0.insert(dep.clone(), fact.clone());
        }
    }

    #[must_use]
    pub fn get(&self, dep: &Dep) -> Option<&Fact> {
        self.0.get(dep)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Dep, &Fact)> {
        self.0.iter()
    }

    /// The declared deps these facts resolve.
    #[must_use]
    pub fn dep_set(&self) -> DepSet {
        self.0.keys().cloned().collect()
    }

    /// Every file mentioned by any fact, with its digest.
    #[must_use]
    pub fn file_facts(&self) -> FileFacts {
        let mut out = FileFacts::new();
        for (dep, fact) in &self.0 {
            match (dep, fact) {
                (Dep::File(path), Fact::File { digest }) => {
                    out.insert(path.clone(), *digest);
                }
                (_, Fact::Alias(files) | Fact::FileSelector(files)) => {
                    out.union_with(files);
                }
                _ => {}
            }
        }
        out
    }

    /// The total digest over all facts.
    ///
    /// # Errors
    ///
    /// See [`Digest::generic`].
    pub fn digest(&self) -> Result<Digest> {
        Digest::generic(self)
            .map_err(|e| BuildError::io("digesting facts".to_owned(), e))
    }
}

impl FromIterator<(Dep, Fact)> for Facts {
    fn from_iter<I: IntoIterator<Item = (Dep, Fact)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod test;
