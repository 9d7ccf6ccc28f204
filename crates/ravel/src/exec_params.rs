//! Per-directory execution parameters.
//!
//! An immutable policy bundle consulted by the rule executor. Parameters
//! take part in the rule digest: changing a policy invalidates the rules it
//! governs.

use ravel_serialize::{Decode, Encode};
use ravel_stable_hash::StableHash;

/// What to do with captured output when the action succeeds.
#[derive(
    Debug,
    Clone,
    Copy,
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
pub enum OutputOnSuccess {
    /// Forward it to the user.
    #[default]
    Print,
    /// Discard it.
    Swallow,
    /// Fail the rule if the action printed anything.
    MustBeEmpty,
}

/// The execution policy bundle for a directory.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, StableHash, Encode, Decode,
)]
pub struct ExecutionParameters {
    /// Strip write bits from produced targets, making hardlink sharing with
    /// the shared cache safe.
    pub remove_write_permissions: bool,
    pub stdout_on_success: OutputOnSuccess,
    pub stderr_on_success: OutputOnSuccess,
    /// Whether alias expansions are materialized inside sandboxes.
    pub expand_aliases_in_sandbox: bool,
}

impl Default for ExecutionParameters {
    fn default() -> Self {
        Self {
            remove_write_permissions: true,
            stdout_on_success: OutputOnSuccess::Print,
            stderr_on_success: OutputOnSuccess::Print,
            expand_aliases_in_sandbox: true,
        }
    }
}
