//! Tagged path model.
//!
//! Every path the engine touches is tagged by the tree it lives in:
//!
//! - [`SourcePath`]: read-only inputs, relative to the source root.
//! - [`BuildPath`]: outputs, relative to the build root. A build path
//!   further decomposes via [`BuildPath::kind`] into a context subtree, the
//!   install subtree, the anonymous-actions subtree, or engine-private
//!   dotfiles.
//! - [`ExternalPath`]: absolute paths outside both trees.
//!
//! [`TreePath`] is the sum of the three. All equality and ordering respects
//! the tag: a source `foo` and a build `foo` are distinct values.

use std::{fmt, path::PathBuf};

use enum_as_inner::EnumAsInner;
use ravel_serialize::{Decode, Encode};
use ravel_stable_hash::StableHash;

use crate::error::{BuildError, Result};

/// A normalized relative path: `/`-separated, no empty, `.` or `..` segments.
///
/// The empty path is the root of its tree.
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
pub struct RelPath(String);

impl RelPath {
    /// The root (empty) relative path.
    #[must_use]
    pub const fn root() -> Self {
        Self(String::new())
    }

    /// Parses and normalizes a relative path.
    ///
    /// # Errors
    ///
    /// Fails on absolute paths, `.` or `..` segments, backslashes, and empty
    /// segments (`a//b`).
    pub fn new(s: impl AsRef<str>) -> Result<Self> {
        let s = s.as_ref();
        if s.is_empty() {
            return Ok(Self::root());
        }
        if s.starts_with('/') {
            return Err(BuildError::code(
                "absolute path used where a relative path is required",
                vec![("path".into(), s.into())],
            ));
        }
        if s.contains('\\') {
            return Err(BuildError::code(
                "backslash in relative path",
                vec![("path".into(), s.into())],
            ));
        }
        let trimmed = s.strip_suffix('/').unwrap_or(s);
        for segment in trimmed.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(BuildError::code(
                    "invalid segment in relative path",
                    vec![
                        ("path".into(), s.into()),
                        ("segment".into(), segment.into()),
                    ],
                ));
            }
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Builds from an already-normalized string. Internal fast path.
    pub(crate) fn from_normalized(s: String) -> Self {
        Self(s)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends a single segment or a normalized relative suffix.
    #[must_use]
    pub fn join(&self, suffix: &str) -> Self {
        debug_assert!(!suffix.is_empty() && !suffix.starts_with('/'));
        if self.is_root() {
            Self(suffix.to_owned())
        } else {
            Self(format!("{}/{suffix}", self.0))
        }
    }

    /// The parent path; `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(match self.0.rfind('/') {
            Some(idx) => Self(self.0[..idx].to_owned()),
            None => Self::root(),
        })
    }

    /// The final segment; `None` for the root.
    #[must_use]
    pub fn basename(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        Some(match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        })
    }

    /// Iterates over the path segments.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Whether `self` is equal to or lies under `prefix`.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        if prefix.is_root() {
            return true;
        }
        self.0 == prefix.0
            || (self.0.starts_with(&prefix.0)
                && self.0.as_bytes().get(prefix.0.len()) == Some(&b'/'))
    }

    /// Strips `prefix`, returning the remainder.
    #[must_use]
    pub fn strip_prefix(&self, prefix: &Self) -> Option<Self> {
        if prefix.is_root() {
            return Some(self.clone());
        }
        if self.0 == prefix.0 {
            return Some(Self::root());
        }
        if self.starts_with(prefix) {
            Some(Self(self.0[prefix.0.len() + 1..].to_owned()))
        } else {
            None
        }
    }

    /// Resolves against an absolute filesystem root.
    #[must_use]
    pub fn to_fs_path(&self, root: &std::path::Path) -> PathBuf {
        if self.is_root() {
            root.to_path_buf()
        } else {
            root.join(&self.0)
        }
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() { write!(f, ".") } else { write!(f, "{}", self.0) }
    }
}

/// The name of a build context, e.g. `default`.
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
pub struct ContextName(String);

impl ContextName {
    /// Validates a context name.
    ///
    /// # Errors
    ///
    /// Context names may not be empty, contain `/`, start with `.`, or be the
    /// reserved word `install`.
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        let valid = !s.is_empty()
            && !s.contains('/')
            && !s.starts_with('.')
            && s != BuildPath::INSTALL_DIR;
        if valid {
            Ok(Self(s))
        } else {
            Err(BuildError::code(
                "invalid context name",
                vec![("name".into(), s)],
            ))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A path under the source tree.
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
pub struct SourcePath(RelPath);

impl SourcePath {
    #[must_use]
    pub const fn root() -> Self {
        Self(RelPath::root())
    }

    /// Parses a source-relative path.
    ///
    /// # Errors
    ///
    /// See [`RelPath::new`].
    pub fn new(s: impl AsRef<str>) -> Result<Self> {
        Ok(Self(RelPath::new(s)?))
    }

    #[must_use]
    pub const fn rel(&self) -> &RelPath {
        &self.0
    }

    #[must_use]
    pub fn join(&self, suffix: &str) -> Self {
        Self(self.0.join(suffix))
    }

    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0.parent().map(Self)
    }

    #[must_use]
    pub fn basename(&self) -> Option<&str> {
        self.0.basename()
    }
}

impl From<RelPath> for SourcePath {
    fn from(rel: RelPath) -> Self {
        Self(rel)
    }
}

impl fmt::Display for SourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An absolute path outside both the source and build trees.
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
pub struct ExternalPath(PathBuf);

impl ExternalPath {
    /// Wraps an absolute path.
    ///
    /// # Errors
    ///
    /// Fails if the path is relative.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.is_absolute() {
            Ok(Self(path))
        } else {
            Err(BuildError::code(
                "external path must be absolute",
                vec![("path".into(), path.display().to_string())],
            ))
        }
    }

    #[must_use]
    pub fn as_path(&self) -> &std::path::Path {
        &self.0
    }
}

impl fmt::Display for ExternalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// A path under the build root.
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
pub struct BuildPath(RelPath);

/// The decomposition of a build path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildPathKind<'a> {
    /// The build root itself.
    Root,
    /// `<ctx>`
    ContextRoot(&'a str),
    /// `<ctx>/<sub>`
    Context { context: &'a str, sub: RelPath },
    /// `install`
    InstallRoot,
    /// `install/<ctx>`
    InstallContextRoot(&'a str),
    /// `install/<ctx>/<sub>`
    Install { context: &'a str, sub: RelPath },
    /// `.actions/<basename>` — an anonymous action target.
    Anonymous(&'a str),
    /// Engine-private dotfiles (`.db`, `.sandbox`, ...).
    Hidden,
}

impl BuildPath {
    /// Directory holding per-context install trees.
    pub const INSTALL_DIR: &'static str = "install";
    /// Directory holding anonymous action targets.
    pub const ANONYMOUS_ACTIONS_DIR: &'static str = ".actions";

    #[must_use]
    pub const fn build_root() -> Self {
        Self(RelPath::root())
    }

    /// Parses a build-root-relative path.
    ///
    /// # Errors
    ///
    /// See [`RelPath::new`].
    pub fn new(s: impl AsRef<str>) -> Result<Self> {
        Ok(Self(RelPath::new(s)?))
    }

    /// The root of a context's subtree.
    #[must_use]
    pub fn context_root(context: &ContextName) -> Self {
        Self(RelPath::from_normalized(context.as_str().to_owned()))
    }

    /// A path inside a context's subtree.
    #[must_use]
    pub fn in_context(context: &ContextName, sub: &RelPath) -> Self {
        if sub.is_root() {
            Self::context_root(context)
        } else {
            Self(Self::context_root(context).0.join(sub.as_str()))
        }
    }

    /// An anonymous action target path.
    #[must_use]
    pub fn anonymous(basename: &str) -> Self {
        Self(
            RelPath::from_normalized(Self::ANONYMOUS_ACTIONS_DIR.to_owned())
                .join(basename),
        )
    }

    #[must_use]
    pub const fn rel(&self) -> &RelPath {
        &self.0
    }

    #[must_use]
    pub fn join(&self, suffix: &str) -> Self {
        Self(self.0.join(suffix))
    }

    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0.parent().map(Self)
    }

    #[must_use]
    pub fn basename(&self) -> Option<&str> {
        self.0.basename()
    }

    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Classifies this path within the build tree layout.
    #[must_use]
    pub fn kind(&self) -> BuildPathKind<'_> {
        let mut components = self.0.components();
        let Some(first) = components.next() else {
            return BuildPathKind::Root;
        };
        let rest: Vec<&str> = components.collect();

        if first == Self::INSTALL_DIR {
            return match rest.split_first() {
                None => BuildPathKind::InstallRoot,
                Some((&context, [])) => {
                    BuildPathKind::InstallContextRoot(context)
                }
                Some((&context, sub)) => BuildPathKind::Install {
                    context,
                    sub: RelPath::from_normalized(sub.join("/")),
                },
            };
        }

        if first == Self::ANONYMOUS_ACTIONS_DIR {
            return match rest.as_slice() {
                [basename] => BuildPathKind::Anonymous(*basename),
                _ => BuildPathKind::Hidden,
            };
        }

        if first.starts_with('.') {
            return BuildPathKind::Hidden;
        }

        if rest.is_empty() {
            BuildPathKind::ContextRoot(first)
        } else {
            BuildPathKind::Context {
                context: first,
                sub: RelPath::from_normalized(rest.join("/")),
            }
        }
    }

    /// The context this path belongs to, if any.
    #[must_use]
    pub fn context(&self) -> Option<&str> {
        match self.kind() {
            BuildPathKind::ContextRoot(c)
            | BuildPathKind::Context { context: c, .. }
            | BuildPathKind::InstallContextRoot(c)
            | BuildPathKind::Install { context: c, .. } => Some(c),
            _ => None,
        }
    }
}

impl fmt::Display for BuildPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_build/{}", self.0.as_str())
    }
}

/// A path tagged by the tree it lives in.
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
pub enum TreePath {
    Source(SourcePath),
    External(ExternalPath),
    Build(BuildPath),
}

impl TreePath {
    /// The parent directory, staying within the same tree.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        match self {
            Self::Source(p) => p.parent().map(Self::Source),
            Self::Build(p) => p.parent().map(Self::Build),
            Self::External(p) => p
                .as_path()
                .parent()
                .map(|parent| {
                    ExternalPath::new(parent.to_path_buf()).ok().map(Self::External)
                })
                .flatten(),
        }
    }

    /// The final path segment, when there is one.
    #[must_use]
    pub fn basename(&self) -> Option<String> {
        match self {
            Self::Source(p) => p.basename().map(str::to_owned),
            Self::Build(p) => p.basename().map(str::to_owned),
            Self::External(p) => p
                .as_path()
                .file_name()
                .map(|s| s.to_string_lossy().into_owned()),
        }
    }
}

impl From<SourcePath> for TreePath {
    fn from(p: SourcePath) -> Self {
        Self::Source(p)
    }
}

impl From<BuildPath> for TreePath {
    fn from(p: BuildPath) -> Self {
        Self::Build(p)
    }
}

impl From<ExternalPath> for TreePath {
    fn from(p: ExternalPath) -> Self {
        Self::External(p)
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source(p) => write!(f, "{p}"),
            Self::External(p) => write!(f, "{p}"),
            Self::Build(p) => write!(f, "{p}"),
        }
    }
}

/// The filesystem anchoring of the two trees.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub source_root: PathBuf,
    pub build_root: PathBuf,
}

impl Workspace {
    #[must_use]
    pub fn new(
        source_root: impl Into<PathBuf>,
        build_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source_root: source_root.into(),
            build_root: build_root.into(),
        }
    }

    /// The absolute filesystem path of a tree path.
    #[must_use]
    pub fn abs(&self, path: &TreePath) -> PathBuf {
        match path {
            TreePath::Source(p) => self.abs_source(p),
            TreePath::Build(p) => self.abs_build(p),
            TreePath::External(p) => p.as_path().to_path_buf(),
        }
    }

    #[must_use]
    pub fn abs_source(&self, path: &SourcePath) -> PathBuf {
        path.rel().to_fs_path(&self.source_root)
    }

    #[must_use]
    pub fn abs_build(&self, path: &BuildPath) -> PathBuf {
        path.rel().to_fs_path(&self.build_root)
    }
}

#[cfg(test)]
mod test;
