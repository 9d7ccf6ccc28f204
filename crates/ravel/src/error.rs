//! Error types for the build engine.
//!
//! The taxonomy mirrors how errors surface to people:
//!
//! - [`UserError`]: misconfiguration or rule conflicts. Carries a location
//!   and hints; rendered to the user as-is.
//! - [`CycleError`]: a dependency cycle closed inside the memo runtime.
//!   Converted to a user error when the cycle contains file or alias frames,
//!   and to a code error otherwise.
//! - [`CodeError`]: an engine invariant was violated. Always a bug.
//! - I/O errors keep their syscall context.
//!
//! [`BuildError`] is cheap to clone (`Arc` payloads) because the memo runtime
//! caches failed results the same way it caches successful ones.

use std::{fmt, io, path::PathBuf, sync::Arc};

/// Result alias used throughout the engine.
pub type Result<T, E = BuildError> = std::result::Result<T, E>;

/// A source location attached to user-facing diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Loc {
    /// File the rule or stanza was declared in.
    pub file: PathBuf,
    /// 1-based line number.
    pub line: u32,
}

impl Loc {
    #[must_use]
    pub fn new(file: impl Into<PathBuf>, line: u32) -> Self {
        Self { file: file.into(), line }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

/// An error caused by the user's build setup rather than by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserError {
    /// Where the offending declaration lives, when known.
    pub loc: Option<Loc>,
    /// Message paragraphs, rendered in order.
    pub paragraphs: Vec<String>,
    /// Optional "did you mean" style hints.
    pub hints: Vec<String>,
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(loc) = &self.loc {
            write!(f, "{loc}: ")?;
        }
        for (i, paragraph) in self.paragraphs.iter().enumerate() {
            if i > 0 {
                write!(f, "\n")?;
            }
            write!(f, "{paragraph}")?;
        }
        for hint in &self.hints {
            write!(f, "\nHint: {hint}")?;
        }
        Ok(())
    }
}

/// What kind of computation a cycle frame describes.
///
/// Cycles that pass through at least one `File` or `Alias` frame are caused
/// by the user's rules and are reported as user errors; cycles made only of
/// `Internal` frames indicate an engine bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FrameKind {
    File,
    Alias,
    Internal,
}

/// One frame of a dependency cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleFrame {
    pub kind: FrameKind,
    /// Human-readable description, e.g. `_build/default/foo.o`.
    pub description: String,
}

impl CycleFrame {
    #[must_use]
    pub fn new(kind: FrameKind, description: impl Into<String>) -> Self {
        Self { kind, description: description.into() }
    }
}

/// A dependency cycle detected by the memo runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    /// The frames between the two occurrences of the repeated computation.
    pub frames: Vec<CycleFrame>,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dependency cycle between:")?;
        for frame in &self.frames {
            writeln!(f, "- {}", frame.description)?;
        }
        Ok(())
    }
}

impl CycleError {
    /// Whether the cycle involves user-visible frames.
    #[must_use]
    pub fn is_user_visible(&self) -> bool {
        self.frames
            .iter()
            .any(|f| matches!(f.kind, FrameKind::File | FrameKind::Alias))
    }
}

/// An engine invariant violation. Fatal and always a bug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeError {
    pub message: String,
    /// Structured debug data, rendered as `key: value` lines.
    pub details: Vec<(String, String)>,
}

impl fmt::Display for CodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Internal error, please report upstream: {}", self.message)?;
        for (key, value) in &self.details {
            write!(f, "\n  {key}: {value}")?;
        }
        Ok(())
    }
}

impl std::error::Error for UserError {}
impl std::error::Error for CycleError {}
impl std::error::Error for CodeError {}

/// Any error that can surface from a build.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BuildError {
    #[error("{0}")]
    User(Arc<UserError>),

    #[error("{0}")]
    Cycle(Arc<CycleError>),

    #[error("{0}")]
    Code(Arc<CodeError>),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: Arc<io::Error>,
    },

    /// Several independent failures collected from concurrent computations.
    #[error("{} errors occurred during the build", .0.len())]
    Multiple(Arc<Vec<BuildError>>),
}

impl BuildError {
    /// A user error with a single message paragraph.
    #[must_use]
    pub fn user(loc: Option<Loc>, message: impl Into<String>) -> Self {
        Self::User(Arc::new(UserError {
            loc,
            paragraphs: vec![message.into()],
            hints: Vec::new(),
        }))
    }

    /// A user error with several paragraphs and hints.
    #[must_use]
    pub fn user_full(
        loc: Option<Loc>,
        paragraphs: Vec<String>,
        hints: Vec<String>,
    ) -> Self {
        Self::User(Arc::new(UserError { loc, paragraphs, hints }))
    }

    /// An engine invariant violation.
    #[must_use]
    pub fn code(
        message: impl Into<String>,
        details: Vec<(String, String)>,
    ) -> Self {
        Self::Code(Arc::new(CodeError { message: message.into(), details }))
    }

    /// Wraps an I/O error with syscall context.
    #[must_use]
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io { context: context.into(), source: Arc::new(source) }
    }

    /// A cycle error; user-visible cycles become user diagnostics.
    #[must_use]
    pub fn cycle(cycle: CycleError) -> Self {
        if cycle.is_user_visible() {
            Self::Cycle(Arc::new(cycle))
        } else {
            Self::code(
                "dependency cycle with no file or alias frames",
                cycle
                    .frames
                    .iter()
                    .enumerate()
                    .map(|(i, f)| (format!("frame {i}"), f.description.clone()))
                    .collect(),
            )
        }
    }

    /// Folds a non-empty error list into a single error.
    ///
    /// # Panics
    ///
    /// Panics if the list is empty.
    #[must_use]
    pub fn reraise_all(mut errors: Vec<BuildError>) -> Self {
        assert!(!errors.is_empty(), "reraise_all requires at least one error");
        if errors.len() == 1 {
            errors.pop().unwrap()
        } else {
            Self::Multiple(Arc::new(errors))
        }
    }

    /// Whether this is a user-facing error (as opposed to an engine bug).
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        match self {
            Self::User(_) | Self::Cycle(_) => true,
            Self::Io { .. } => true,
            Self::Code(_) => false,
            Self::Multiple(errors) => {
                errors.iter().all(BuildError::is_user_error)
            }
        }
    }
}

/// Shorthand for an I/O error annotated with the path it concerns.
pub(crate) fn io_error(
    what: &str,
    path: &std::path::Path,
    source: io::Error,
) -> BuildError {
    BuildError::io(format!("{what} {}", path.display()), source)
}
