//! # Ravel — incremental build engine core
//!
//! Ravel decides, given a declarative set of rules producing files and
//! aliases, which rules must be (re-)executed to bring a build directory
//! into a state consistent with its inputs, executes those rules with
//! optional sandboxing and shared-cache lookup, and memoizes intermediate
//! computations so that only work affected by changed inputs is redone.
//!
//! ## Key Components
//!
//! - **Memo runtime** ([`memo`]): generic memoization of async
//!   computations with ordered dependency recording, cycle detection, and
//!   cross-run verification with early cutoff.
//! - **Action builder** ([`action_builder`]): a monadic description of
//!   "build this value, declaring these dependencies as you go"; executing
//!   one yields the value plus the resolved [`deps::Facts`].
//! - **Rules model** ([`rules`], [`alias`]): immutable rules, append-only
//!   aliases, and the `Rules` container produced implicitly by generators.
//! - **Directory loader** ([`load_rules`]): the authoritative rule map per
//!   directory, with source-file copy rules, fallback filtering, conflict
//!   diagnostics, and stale-artifact cleanup.
//! - **Rule executor** ([`rule_executor`]): rule digests, the persistent
//!   trace database, sandbox selection, shared-cache restore/store, action
//!   execution, and promotion back into the source tree.
//!
//! ## External Collaborators
//!
//! The engine consumes, through traits, what it deliberately does not own:
//! the rule generator ([`engine::RuleGenerator`]), the action interpreter
//! ([`action::ActionInterpreter`]), the source-tree oracle
//! ([`source_tree::SourceTree`]), and the shared cache
//! ([`shared_cache::SharedCache`]). Reference implementations are provided
//! for the latter three.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ravel::{
//!     action::BasicInterpreter,
//!     engine::{Engine, EngineConfig, EngineOptions, NoRules},
//!     path::{BuildPath, TreePath},
//!     source_tree::FsSourceTree,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> ravel::error::Result<()> {
//! let engine = Engine::new(EngineConfig {
//!     source_root: "/project".into(),
//!     build_root: "/project/_build".into(),
//!     rule_generator: Arc::new(NoRules),
//!     interpreter: Arc::new(BasicInterpreter),
//!     source_tree: Arc::new(FsSourceTree::new("/project")),
//!     shared_cache: None,
//!     options: EngineOptions::default(),
//! });
//!
//! let digest = engine
//!     .run(async |session| {
//!         session
//!             .build_file(TreePath::Build(BuildPath::new(
//!                 "default/hello.txt",
//!             )?))
//!             .await
//!     })
//!     .await?;
//! println!("built: {digest}");
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod action_builder;
pub mod alias;
pub mod deps;
pub mod digest;
pub mod engine;
pub mod error;
pub mod exec_params;
pub mod fs;
pub mod load_rules;
pub mod locks;
pub mod memo;
pub mod path;
pub mod persist;
pub mod promote;
pub mod rule_executor;
pub mod rules;
pub mod sandbox;
pub mod shared_cache;
pub mod source_tree;
pub mod trace_db;

pub use action::{Action, ActionFull, ActionInterpreter, BasicInterpreter};
pub use action_builder::ActionBuilder;
pub use alias::{Alias, AliasName};
pub use deps::{Dep, DepSet, Fact, Facts};
pub use digest::Digest;
pub use engine::{
    BuildSession, Engine, EngineConfig, EngineOptions, RuleGenerator,
};
pub use error::{BuildError, Loc, Result};
pub use memo::{Computation, Compute, Cutoff, Memo, MemoHandle};
pub use path::{BuildPath, ContextName, RelPath, SourcePath, TreePath};
pub use rules::{Rule, RuleInfo, RuleMode, Rules};
pub use sandbox::{SandboxConfig, SandboxMode};
