//! Actions and the action interpreter contract.
//!
//! An [`Action`] is a concrete description of what a rule does: run a
//! program, copy a file, redirect stdout. The engine never interprets
//! actions itself; it hands them to an [`ActionInterpreter`] together with a
//! callback for dynamically discovered dependencies. [`BasicInterpreter`]
//! is the built-in reference interpreter covering the primitive actions.

use std::{collections::BTreeMap, fmt, path::PathBuf, sync::Arc};

use futures::future::BoxFuture;
use ravel_serialize::{Decode, Encode};
use ravel_stable_hash::StableHash;
use tokio::process::Command;
use tracing::{debug, info};

use crate::{
    deps::{DepSet, Facts},
    error::{BuildError, Loc, Result},
    exec_params::{ExecutionParameters, OutputOnSuccess},
    path::{BuildPath, ContextName, TreePath},
};

/// A concrete action description.
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
pub enum Action {
    /// Run a program with arguments.
    Run { program: String, args: Vec<String> },
    /// Copy a file into the build tree.
    Copy { src: TreePath, dst: BuildPath },
    /// Write a literal string to a target.
    WriteFile { target: BuildPath, contents: String },
    /// Run the inner action with its stdout redirected to a target.
    WithStdoutTo { target: BuildPath, inner: Box<Action> },
    /// Emit a message on stdout.
    Echo { message: String },
    /// Run several actions in sequence.
    Progn(Vec<Action>),
}

impl Action {
    /// Whether sandboxing this action can catch anything.
    ///
    /// Pure engine-implemented file operations cannot read undeclared
    /// dependencies, so putting them in a sandbox only costs time.
    #[must_use]
    pub fn is_useful_to_sandbox(&self) -> bool {
        match self {
            Self::Run { .. } => true,
            Self::Copy { .. } | Self::WriteFile { .. } | Self::Echo { .. } => {
                false
            }
            Self::WithStdoutTo { inner, .. } => inner.is_useful_to_sandbox(),
            Self::Progn(actions) => {
                actions.iter().any(Self::is_useful_to_sandbox)
            }
        }
    }

    /// A stable, shell-like rendering used as a rule digest component and
    /// in diagnostics.
    #[must_use]
    pub fn for_shell(&self) -> String {
        match self {
            Self::Run { program, args } => {
                let mut out = program.clone();
                for arg in args {
                    out.push(' ');
                    out.push_str(arg);
                }
                out
            }
            Self::Copy { src, dst } => format!("cp {src} {dst}"),
            Self::WriteFile { target, contents } => {
                format!("echo -n {contents:?} > {target}")
            }
            Self::WithStdoutTo { target, inner } => {
                format!("{} > {target}", inner.for_shell())
            }
            Self::Echo { message } => format!("echo {message:?}"),
            Self::Progn(actions) => {
                let parts: Vec<String> =
                    actions.iter().map(Self::for_shell).collect();
                format!("({})", parts.join("; "))
            }
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.for_shell())
    }
}

/// A fully specified action: the description plus its execution envelope.
#[derive(Debug, Clone, PartialEq, Eq, StableHash)]
pub struct ActionFull {
    pub action: Action,
    /// Environment the action runs with. The engine clears the process
    /// environment first; only these variables are visible.
    pub env: BTreeMap<String, String>,
    /// Named locks held while the action runs, acquired in order.
    pub locks: Vec<BuildPath>,
    /// Whether the outcome may be stored in and restored from the shared
    /// cache.
    pub can_go_in_shared_cache: bool,
}

impl ActionFull {
    /// An action with the minimal environment (the parent's `PATH`) and no
    /// locks.
    #[must_use]
    pub fn new(action: Action) -> Self {
        let mut env = BTreeMap::new();
        if let Ok(path) = std::env::var("PATH") {
            env.insert("PATH".to_owned(), path);
        }
        Self { action, env, locks: Vec::new(), can_go_in_shared_cache: true }
    }

    #[must_use]
    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_owned(), value.to_owned());
        self
    }

    #[must_use]
    pub fn with_locks(mut self, locks: Vec<BuildPath>) -> Self {
        self.locks = locks;
        self
    }

    #[must_use]
    pub fn uncacheable(mut self) -> Self {
        self.can_go_in_shared_cache = false;
        self
    }
}

/// Everything an interpreter needs to run one action.
#[derive(Debug)]
pub struct ExecContext {
    /// Stand-in for the build root: the real one, or the sandbox root.
    pub exec_root: PathBuf,
    /// The real source tree root (read-only inputs).
    pub source_root: PathBuf,
    /// Absolute working directory the action starts in.
    pub chdir: PathBuf,
    /// Environment to run with (the process environment is cleared).
    pub env: BTreeMap<String, String>,
    /// Declared targets, relative to the build root.
    pub targets: std::collections::BTreeSet<BuildPath>,
    /// Rule provenance for error messages.
    pub loc: Option<Loc>,
    /// The owning build context, if any.
    pub context: Option<ContextName>,
    pub params: ExecutionParameters,
}

impl ExecContext {
    /// Resolves a tree path against this execution's roots.
    #[must_use]
    pub fn resolve(&self, path: &TreePath) -> PathBuf {
        match path {
            TreePath::Source(p) => p.rel().to_fs_path(&self.source_root),
            TreePath::Build(p) => p.rel().to_fs_path(&self.exec_root),
            TreePath::External(p) => p.as_path().to_path_buf(),
        }
    }
}

/// The result of interpreting an action.
#[derive(Debug, Default)]
pub struct ExecResult {
    /// One entry per dynamic-dependency stage: the deps discovered
    /// mid-action and the facts they resolved to. Empty for static actions.
    pub dynamic_deps_stages: Vec<(DepSet, Facts)>,
}

/// Callback an interpreter uses to resolve dynamically discovered deps.
///
/// Each invocation builds the requested deps and becomes one stage in
/// [`ExecResult::dynamic_deps_stages`].
pub trait DynamicDeps: Send + Sync {
    fn build<'a>(&'a self, deps: DepSet) -> BoxFuture<'a, Result<Facts>>;
}

/// A no-op [`DynamicDeps`] for actions that cannot discover dependencies
/// mid-run.
pub struct NoDynamicDeps;

impl DynamicDeps for NoDynamicDeps {
    fn build<'a>(&'a self, _deps: DepSet) -> BoxFuture<'a, Result<Facts>> {
        Box::pin(async { Ok(Facts::new()) })
    }
}

/// Borrowed dynamic-deps callback handed to interpreters.
pub type BuildDeps<'a> = &'a (dyn DynamicDeps + 'a);

/// The action interpreter contract.
pub trait ActionInterpreter: Send + Sync + 'static {
    /// Executes `action` within `ctx`.
    fn exec<'a>(
        &'a self,
        ctx: &'a ExecContext,
        action: &'a Action,
        build_deps: BuildDeps<'a>,
    ) -> BoxFuture<'a, Result<ExecResult>>;
}

/// The built-in interpreter for the primitive actions.
///
/// Commands run with a cleared environment so undeclared environment
/// dependencies fail fast rather than going stale silently.
#[derive(Debug, Default)]
pub struct BasicInterpreter;

impl BasicInterpreter {
    fn exec_inner<'a>(
        &'a self,
        ctx: &'a ExecContext,
        action: &'a Action,
        capture: Option<Arc<parking_lot::Mutex<Vec<u8>>>>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match action {
                Action::Run { program, args } => {
                    self.run_program(ctx, program, args, capture).await
                }

                Action::Copy { src, dst } => {
                    let src_abs = ctx.resolve(src);
                    let dst_abs = ctx.resolve(&TreePath::Build(dst.clone()));
                    debug!(src = %src_abs.display(), dst = %dst_abs.display(), "copy");
                    crate::fs::copy_file(src_abs, dst_abs).await
                }

                Action::WriteFile { target, contents } => {
                    let abs = ctx.resolve(&TreePath::Build(target.clone()));
                    crate::fs::write_file(abs, contents.clone().into_bytes())
                        .await
                }

                Action::WithStdoutTo { target, inner } => {
                    let sink = Arc::new(parking_lot::Mutex::new(Vec::new()));
                    self.exec_inner(ctx, inner, Some(Arc::clone(&sink))).await?;
                    let abs = ctx.resolve(&TreePath::Build(target.clone()));
                    let captured =
                        std::mem::take(&mut *sink.lock());
                    crate::fs::write_file(abs, captured).await
                }

                Action::Echo { message } => {
                    if let Some(sink) = capture {
                        sink.lock().extend_from_slice(message.as_bytes());
                    } else {
                        info!(target: "ravel::action", "{message}");
                    }
                    Ok(())
                }

                Action::Progn(actions) => {
                    for action in actions {
                        self.exec_inner(ctx, action, capture.clone()).await?;
                    }
                    Ok(())
                }
            }
        })
    }

    async fn run_program(
        &self,
        ctx: &ExecContext,
        program: &str,
        args: &[String],
        capture: Option<Arc<parking_lot::Mutex<Vec<u8>>>>,
    ) -> Result<()> {
        tokio::fs::create_dir_all(&ctx.chdir).await.map_err(|e| {
            crate::error::io_error("creating working dir", &ctx.chdir, e)
        })?;

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&ctx.chdir)
            .env_clear()
            .envs(&ctx.env);

        debug!(program, cwd = %ctx.chdir.display(), "spawning process");
        let output = command.output().await.map_err(|e| {
            BuildError::io(format!("spawning {program}"), e)
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BuildError::user_full(
                ctx.loc.clone(),
                vec![
                    format!(
                        "Command exited with code {}: {program} {}",
                        output.status.code().unwrap_or(-1),
                        args.join(" "),
                    ),
                    stderr.trim_end().to_owned(),
                ],
                Vec::new(),
            ));
        }

        match capture {
            Some(sink) => {
                sink.lock().extend_from_slice(&output.stdout);
                handle_success_output(
                    ctx.params.stderr_on_success,
                    &output.stderr,
                    "stderr",
                    ctx.loc.as_ref(),
                )?;
            }
            None => {
                handle_success_output(
                    ctx.params.stdout_on_success,
                    &output.stdout,
                    "stdout",
                    ctx.loc.as_ref(),
                )?;
                handle_success_output(
                    ctx.params.stderr_on_success,
                    &output.stderr,
                    "stderr",
                    ctx.loc.as_ref(),
                )?;
            }
        }
        Ok(())
    }
}

fn handle_success_output(
    policy: OutputOnSuccess,
    bytes: &[u8],
    stream: &str,
    loc: Option<&Loc>,
) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    match policy {
        OutputOnSuccess::Print => {
            info!(target: "ravel::action", "{}", String::from_utf8_lossy(bytes).trim_end());
            Ok(())
        }
        OutputOnSuccess::Swallow => Ok(()),
        OutputOnSuccess::MustBeEmpty => Err(BuildError::user(
            loc.cloned(),
            format!("The command printed something on {stream} but was required to be silent"),
        )),
    }
}

impl ActionInterpreter for BasicInterpreter {
    fn exec<'a>(
        &'a self,
        ctx: &'a ExecContext,
        action: &'a Action,
        _build_deps: BuildDeps<'a>,
    ) -> BoxFuture<'a, Result<ExecResult>> {
        Box::pin(async move {
            self.exec_inner(ctx, action, None).await?;
            // the primitive actions have no dynamic dependencies
            Ok(ExecResult::default())
        })
    }
}

#[cfg(test)]
mod test;
