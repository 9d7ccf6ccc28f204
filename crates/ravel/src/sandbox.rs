//! Sandboxed rule execution.
//!
//! A sandbox is an ephemeral directory containing only a rule's declared
//! dependencies. Running the action inside it turns undeclared dependencies
//! into hard failures instead of silent staleness bugs.
//!
//! Four materialization strategies are supported ([`SandboxMode`]); rules
//! restrict which ones are acceptable via [`SandboxConfig`], and the engine
//! picks the first mode from its configured preference list that the rule
//! permits.

use std::{fs, io, path::Path, path::PathBuf};

use ravel_serialize::{Decode, Encode};
use ravel_stable_hash::StableHash;
use tracing::debug;

use crate::{
    error::{BuildError, Result, io_error},
    path::{BuildPath, Workspace},
};

/// How dependencies are materialized into the sandbox.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    StableHash,
    Encode,
    Decode,
)]
pub enum SandboxMode {
    /// No sandbox; the action runs directly in the build tree.
    None,
    /// Dependencies are symlinked in.
    Symlink,
    /// Dependencies are hardlinked in.
    Hardlink,
    /// Dependencies are copied in.
    Copy,
    /// Like `Copy`, but on success every file in the sandboxed source tree
    /// copy that changed is patched back into the real source tree.
    PatchBackSourceTree,
}

impl SandboxMode {
    /// All modes, in the order used for bitmask assignment.
    pub const ALL: [Self; 5] = [
        Self::None,
        Self::Symlink,
        Self::Hardlink,
        Self::Copy,
        Self::PatchBackSourceTree,
    ];

    const fn bit(self) -> u8 {
        match self {
            Self::None => 1,
            Self::Symlink => 1 << 1,
            Self::Hardlink => 1 << 2,
            Self::Copy => 1 << 3,
            Self::PatchBackSourceTree => 1 << 4,
        }
    }

    /// The mode actually used on this platform.
    ///
    /// Windows has no usable symlinks for unprivileged processes and
    /// hardlink semantics differ, so both degrade to copying.
    #[must_use]
    pub fn effective(self) -> Self {
        if cfg!(windows) && matches!(self, Self::Symlink | Self::Hardlink) {
            Self::Copy
        } else {
            self
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Symlink => "symlink",
            Self::Hardlink => "hardlink",
            Self::Copy => "copy",
            Self::PatchBackSourceTree => "patch_back_source_tree",
        }
    }
}

impl std::fmt::Display for SandboxMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The set of sandbox modes a rule permits.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    StableHash,
    Encode,
    Decode,
)]
pub struct SandboxConfig(u8);

impl SandboxConfig {
    /// Every mode is acceptable.
    #[must_use]
    pub const fn no_special_requirements() -> Self {
        Self(0b1_1111)
    }

    /// Only running unsandboxed is acceptable.
    #[must_use]
    pub const fn no_sandboxing() -> Self {
        Self(SandboxMode::None.bit())
    }

    /// Any mode except `None` is acceptable.
    #[must_use]
    pub const fn needs_sandboxing() -> Self {
        Self(0b1_1111 & !SandboxMode::None.bit())
    }

    /// A config permitting exactly the given modes.
    #[must_use]
    pub fn permitting<I: IntoIterator<Item = SandboxMode>>(modes: I) -> Self {
        let mut bits = 0;
        for mode in modes {
            bits |= mode.bit();
        }
        Self(bits)
    }

    #[must_use]
    pub const fn allows(self, mode: SandboxMode) -> bool {
        self.0 & mode.bit() != 0
    }

    /// Intersection of two configs.
    #[must_use]
    pub const fn inter(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Whether no mode is permitted (an unsatisfiable rule).
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The permitted modes, in [`SandboxMode::ALL`] order.
    pub fn modes(self) -> impl Iterator<Item = SandboxMode> {
        SandboxMode::ALL.into_iter().filter(move |m| self.allows(*m))
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::no_special_requirements()
    }
}

/// Picks the sandbox mode for a rule.
///
/// An action that is clearly not useful to sandbox (a pure file operation
/// with no command execution) runs unsandboxed when allowed; if such an
/// action's dependencies nevertheless demand sandboxing, the rule is
/// unsatisfiable. Otherwise, the first entry of the engine's preference list
/// that the rule permits wins.
pub fn select_mode(
    clearly_not_useful_to_sandbox: bool,
    config: SandboxConfig,
    preference: &[SandboxMode],
    loc: Option<&crate::error::Loc>,
) -> Result<SandboxMode> {
    if clearly_not_useful_to_sandbox {
        if config.allows(SandboxMode::None) {
            return Ok(SandboxMode::None);
        }
        return Err(BuildError::user(
            loc.cloned(),
            "This rule requires sandboxing, but its action has nothing that \
             can usefully run in a sandbox",
        ));
    }

    for mode in preference {
        if config.allows(*mode) {
            return Ok(mode.effective());
        }
    }

    Err(BuildError::user(
        loc.cloned(),
        format!(
            "None of the configured sandboxing modes ({}) are permitted by \
             this rule",
            preference
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    ))
}

/// An ephemeral sandbox directory for one rule execution.
///
/// Lives under `.sandbox/<rule_digest>/` inside the build root and mirrors
/// the build tree layout, so relative paths inside the action behave exactly
/// as they would unsandboxed.
#[derive(Debug)]
pub struct Sandbox {
    /// Absolute root of this sandbox instance.
    root: PathBuf,
    mode: SandboxMode,
}

impl Sandbox {
    /// Directory under the build root holding sandbox workspaces.
    pub const SANDBOX_DIR: &'static str = ".sandbox";

    /// Creates an empty sandbox for the given rule digest.
    ///
    /// # Errors
    ///
    /// Fails on filesystem errors. A leftover sandbox from a crashed run at
    /// the same digest is removed first.
    pub fn create(
        workspace: &Workspace,
        rule_digest_hex: &str,
        mode: SandboxMode,
    ) -> Result<Self> {
        let root = workspace
            .build_root
            .join(Self::SANDBOX_DIR)
            .join(rule_digest_hex);
        if root.exists() {
            fs::remove_dir_all(&root)
                .map_err(|e| io_error("removing stale sandbox", &root, e))?;
        }
        fs::create_dir_all(&root)
            .map_err(|e| io_error("creating sandbox", &root, e))?;
        debug!(sandbox = %root.display(), mode = %mode, "created sandbox");
        Ok(Self { root, mode })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The absolute path of a build path inside this sandbox.
    #[must_use]
    pub fn abs_build(&self, path: &BuildPath) -> PathBuf {
        path.rel().to_fs_path(&self.root)
    }

    /// Materializes one dependency file into the sandbox.
    ///
    /// `dep_abs` is the real file, `dep_in_sandbox` its relative location
    /// under the sandbox root.
    ///
    /// # Errors
    ///
    /// Fails on filesystem errors; hardlinking across devices falls back to
    /// copying.
    pub fn materialize(
        &self,
        dep_abs: &Path,
        dep_in_sandbox: &Path,
    ) -> Result<()> {
        let dst = self.root.join(dep_in_sandbox);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| io_error("creating sandbox dir", parent, e))?;
        }

        match self.mode.effective() {
            SandboxMode::None => Ok(()),
            SandboxMode::Symlink => {
                symlink_file(dep_abs, &dst)
                    .map_err(|e| io_error("symlinking into sandbox", &dst, e))
            }
            SandboxMode::Hardlink => match fs::hard_link(dep_abs, &dst) {
                Ok(()) => Ok(()),
                // EXDEV and filesystems without hardlinks
                Err(_) => copy_preserving_permissions(dep_abs, &dst)
                    .map_err(|e| io_error("copying into sandbox", &dst, e)),
            },
            SandboxMode::Copy | SandboxMode::PatchBackSourceTree => {
                copy_preserving_permissions(dep_abs, &dst)
                    .map_err(|e| io_error("copying into sandbox", &dst, e))
            }
        }
    }

    /// Moves a produced target from the sandbox back to its real location.
    ///
    /// # Errors
    ///
    /// A target the action failed to produce is reported by the caller's
    /// validation step, so a missing source here is surfaced as-is.
    pub fn move_target_back(
        &self,
        target: &BuildPath,
        real_abs: &Path,
    ) -> Result<()> {
        let in_sandbox = self.abs_build(target);
        if !in_sandbox.exists() {
            // validation will produce the user-facing diagnostic
            return Ok(());
        }
        if let Some(parent) = real_abs.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| io_error("creating target dir", parent, e))?;
        }
        if real_abs.exists() {
            fs::remove_file(real_abs)
                .map_err(|e| io_error("removing old target", real_abs, e))?;
        }
        match fs::rename(&in_sandbox, real_abs) {
            Ok(()) => Ok(()),
            // EXDEV: sandbox on another filesystem
            Err(_) => {
                copy_preserving_permissions(&in_sandbox, real_abs)
                    .map_err(|e| io_error("copying target back", real_abs, e))
            }
        }
    }

    /// Removes the sandbox directory.
    pub fn destroy(self) {
        if let Err(e) = fs::remove_dir_all(&self.root) {
            // not worth failing the build over
            tracing::warn!(
                sandbox = %self.root.display(),
                error = %e,
                "failed to remove sandbox"
            );
        }
    }
}

#[cfg(unix)]
fn symlink_file(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(not(unix))]
fn symlink_file(src: &Path, dst: &Path) -> io::Result<()> {
    // unreachable in practice: SandboxMode::effective maps Symlink to Copy
    // on non-unix platforms
    copy_preserving_permissions(src, dst)
}

fn copy_preserving_permissions(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst)?;
    let permissions = fs::metadata(src)?.permissions();
    fs::set_permissions(dst, permissions)
}

#[cfg(test)]
mod test;
