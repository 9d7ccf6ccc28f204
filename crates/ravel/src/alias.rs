//! Aliases: named, per-directory dependency sets.
//!
//! An alias is not a file. It names a lazy, append-only set of dependency
//! contributions; requesting an alias builds everything every contribution
//! declared and yields the union of the resulting file facts.

use std::fmt;

use ravel_serialize::{Decode, Encode};
use ravel_stable_hash::StableHash;

use crate::{
    error::{BuildError, Result},
    path::BuildPath,
};

/// A validated alias name, e.g. `all`, `default`, `runtest`.
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
pub struct AliasName(String);

impl AliasName {
    /// Parses an alias name.
    ///
    /// # Errors
    ///
    /// Alias names may not be empty, contain `/`, or start with `.`.
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if s.is_empty() || s.contains('/') || s.starts_with('.') {
            return Err(BuildError::code(
                "invalid alias name",
                vec![("name".into(), s)],
            ));
        }
        Ok(Self(s))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The implicit `default` alias requested by bare build commands.
    #[must_use]
    pub fn default_() -> Self {
        Self("default".to_owned())
    }

    /// The `all` alias covering every rule of a directory.
    #[must_use]
    pub fn all() -> Self {
        Self("all".to_owned())
    }

    /// The `install` alias covering installable artifacts.
    #[must_use]
    pub fn install() -> Self {
        Self("install".to_owned())
    }
}

impl fmt::Display for AliasName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An alias: a name scoped to one build directory.
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
pub struct Alias {
    pub dir: BuildPath,
    pub name: AliasName,
}

impl Alias {
    #[must_use]
    pub const fn new(dir: BuildPath, name: AliasName) -> Self {
        Self { dir, name }
    }

    #[must_use]
    pub fn default_(dir: BuildPath) -> Self {
        Self::new(dir, AliasName::default_())
    }

    #[must_use]
    pub fn all(dir: BuildPath) -> Self {
        Self::new(dir, AliasName::all())
    }

    #[must_use]
    pub fn install(dir: BuildPath) -> Self {
        Self::new(dir, AliasName::install())
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alias {}/{}", self.dir, self.name)
    }
}
