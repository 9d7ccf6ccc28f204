//! The build engine: wiring, sessions, and lifecycle.
//!
//! [`Engine::new`] assembles the memo runtime, the persistent databases, and
//! the external collaborators (rule generator, action interpreter, source
//! tree, shared cache), then registers the engine's computations. Executors
//! hold a [`Weak`] reference back to the engine, bound after construction,
//! which is what ties the `build_file ↔ load_dir` recursion without a
//! global.
//!
//! A [`BuildSession`] is the scope of one build run: it is only handed out
//! by [`Engine::run`], which serializes runs, bumps the memo run, and always
//! dumps the persistent databases and fires end-of-run hooks on the way
//! out — including on failure.

use std::{
    collections::BTreeMap,
    collections::BTreeSet,
    path::PathBuf,
    sync::{Arc, Weak},
};

use dashmap::DashSet;
use futures::future::BoxFuture;
use fxhash::FxBuildHasher;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    action::ActionInterpreter,
    action_builder::DepResolver,
    alias::Alias,
    deps::{Dep, DepSet, Fact, Facts, FileFacts},
    digest::{Digest, DigestCache},
    error::{BuildError, Result},
    exec_params::ExecutionParameters,
    load_rules,
    locks::LockMap,
    memo::{Memo, MemoHandle},
    path::{BuildPath, ContextName, SourcePath, TreePath, Workspace},
    promote::{PROMOTED_DB_FILE, PromotedToDelete},
    rule_executor::{self, PathDigest},
    rules::RulesCollector,
    sandbox::SandboxMode,
    shared_cache::{CacheStorageMode, SharedCache},
    source_tree::SourceTree,
    trace_db::{TRACE_DB_FILE, TraceDb},
};

/// Environment variable enabling the incremental (watch-style) mode that
/// preserves the memo node table across runs.
pub const INCREMENTAL_ENV_VAR: &str = "RAVEL_INCREMENTAL";

/// What `gen_rules` is asked to generate rules for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenRulesTarget {
    pub context: ContextName,
    /// Whether this is the context's install subtree.
    pub install: bool,
    /// The directory, relative to the context root, as components.
    pub sub_path: Vec<String>,
    /// The full build directory being loaded.
    pub dir: BuildPath,
}

/// The external rule generator contract.
///
/// Rules are emitted by producing into the collector; the return value
/// carries the generated subdirectories the directory is allowed to
/// contain. Returning `None` for a directory the engine asked about is a
/// programming error in the generator.
pub trait RuleGenerator: Send + Sync + 'static {
    fn gen_rules<'a>(
        &'a self,
        target: &'a GenRulesTarget,
        collector: &'a RulesCollector,
    ) -> BoxFuture<'a, Result<Option<BTreeSet<String>>>>;

    /// Rules not tied to any generator invocation (the engine consults them
    /// for every directory).
    fn global_rules<'a>(
        &'a self,
        _collector: &'a RulesCollector,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Engine-wide policy knobs.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Build contexts, each owning a subtree under the build root.
    pub contexts: Vec<ContextName>,
    /// Sandbox modes tried in order; the first one a rule permits wins.
    pub sandbox_preference: Vec<SandboxMode>,
    /// How shared-cache artifacts are materialized.
    pub cache_storage_mode: CacheStorageMode,
    /// Probability of re-executing a cache-eligible rule anyway, to check
    /// reproducibility. The sampling decision is deterministic per rule
    /// digest.
    pub repro_check_probability: f64,
    /// Project rules version; ≥ 2 makes the implicit `default` alias point
    /// at `all` instead of `install`.
    pub rules_version: u32,
    /// Re-run alias-attached anonymous actions even when up to date.
    pub force: bool,
    /// Keep the memo node table across runs (watch mode).
    pub incremental: bool,
    /// Execution parameters applied to every directory.
    pub exec_params: ExecutionParameters,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            contexts: vec![
                ContextName::new("default").expect("valid context name"),
            ],
            sandbox_preference: vec![
                SandboxMode::None,
                SandboxMode::Symlink,
                SandboxMode::Copy,
                SandboxMode::Hardlink,
                SandboxMode::PatchBackSourceTree,
            ],
            cache_storage_mode: CacheStorageMode::Copy,
            repro_check_probability: 0.0,
            rules_version: 2,
            force: false,
            incremental: std::env::var(INCREMENTAL_ENV_VAR)
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            exec_params: ExecutionParameters::default(),
        }
    }
}

/// Everything needed to construct an [`Engine`].
pub struct EngineConfig {
    pub source_root: PathBuf,
    pub build_root: PathBuf,
    pub rule_generator: Arc<dyn RuleGenerator>,
    pub interpreter: Arc<dyn ActionInterpreter>,
    pub source_tree: Arc<dyn SourceTree>,
    pub shared_cache: Option<Arc<dyn SharedCache>>,
    pub options: EngineOptions,
}

pub(crate) struct EngineInner {
    pub workspace: Workspace,
    pub options: EngineOptions,
    pub memo: Memo,
    pub digests: DigestCache,
    pub trace: TraceDb,
    pub promoted: PromotedToDelete,
    pub locks: LockMap,
    /// Targets currently being produced; a crash handler unlinks them so a
    /// later run cannot mistake half-written outputs for valid ones.
    pub pending_targets: DashSet<BuildPath, FxBuildHasher>,
    pub rule_generator: Arc<dyn RuleGenerator>,
    pub interpreter: Arc<dyn ActionInterpreter>,
    pub shared_cache: Option<Arc<dyn SharedCache>>,
    pub source_tree: Arc<dyn SourceTree>,
    pub build_mutex: tokio::sync::Mutex<()>,
    /// Environment snapshot taken at engine creation; `Dep::Env` resolves
    /// against it, so env reads are stable within and across runs of one
    /// process.
    pub env: BTreeMap<String, String>,
    end_of_run_hooks: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
}

impl EngineInner {
    /// Per-directory execution parameters.
    ///
    /// One bundle for the whole tree today; the signature is the extension
    /// point for per-directory policies.
    pub fn exec_params(&self, _dir: &BuildPath) -> ExecutionParameters {
        self.options.exec_params.clone()
    }
}

/// The incremental build engine.
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Assembles an engine and registers its computations.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let workspace =
            Workspace::new(config.source_root, config.build_root.clone());

        let inner = Arc::new(EngineInner {
            trace: TraceDb::new(config.build_root.join(TRACE_DB_FILE)),
            promoted: PromotedToDelete::new(
                config.build_root.join(PROMOTED_DB_FILE),
            ),
            workspace,
            options: config.options,
            memo: Memo::new(),
            digests: DigestCache::new(),
            locks: LockMap::new(),
            pending_targets: DashSet::with_hasher(FxBuildHasher::default()),
            rule_generator: config.rule_generator,
            interpreter: config.interpreter,
            shared_cache: config.shared_cache,
            source_tree: config.source_tree,
            build_mutex: tokio::sync::Mutex::new(()),
            env: std::env::vars().collect(),
            end_of_run_hooks: Mutex::new(Vec::new()),
        });

        // bind the executors to the engine after construction; this is the
        // knot of the build_file ↔ load_dir recursion
        load_rules::register(&inner);
        rule_executor::register(&inner);

        Self { inner }
    }

    /// Registers a hook that fires at the end of every run, successful or
    /// not.
    pub fn at_end_of_run(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.inner.end_of_run_hooks.lock().push(Box::new(hook));
    }

    /// Runs one build.
    ///
    /// Only one run executes at a time per process. The memo run is bumped
    /// on entry; on exit the persistent databases are dumped, leftover
    /// pending targets are unlinked, and end-of-run hooks fire — all
    /// regardless of the body's outcome.
    ///
    /// # Errors
    ///
    /// Propagates the body's error after running the end-of-run work.
    pub async fn run<T>(
        &self,
        body: impl AsyncFnOnce(&BuildSession) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.inner.build_mutex.lock().await;

        self.inner.memo.reset();
        debug!(run = ?self.inner.memo.run_id(), "starting build run");

        let session = BuildSession { inner: Arc::clone(&self.inner) };
        let result = body(&session).await;

        self.finish_run().await;

        if !self.inner.options.incremental {
            self.inner.memo.clear();
        }

        result
    }

    async fn finish_run(&self) {
        // half-written outputs of a failed or cancelled rule
        let leftover: Vec<BuildPath> = self
            .inner
            .pending_targets
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for target in leftover {
            let abs = self.inner.workspace.abs_build(&target);
            self.inner.digests.invalidate(&abs);
            if let Err(e) = crate::fs::remove_all(abs).await {
                warn!(target = %target, error = %e, "failed to remove pending target");
            }
            self.inner.pending_targets.remove(&target);
        }

        if let Err(e) = self.inner.trace.dump() {
            warn!(error = %e, "failed to dump trace database");
        }
        if let Err(e) = self.inner.promoted.dump() {
            warn!(error = %e, "failed to dump promoted-to-delete database");
        }

        for hook in self.inner.end_of_run_hooks.lock().iter() {
            hook();
        }
    }

    /// Removes promoted files recorded for deletion, then forgets them.
    ///
    /// # Errors
    ///
    /// Propagates filesystem errors for files that exist but cannot be
    /// removed.
    pub async fn clean(&self) -> Result<()> {
        let _guard = self.inner.build_mutex.lock().await;

        for path in self.inner.promoted.take_all() {
            let abs = self.inner.workspace.abs_source(&path);
            info!(path = %path, "removing promoted file");
            crate::fs::remove_all(abs).await?;
        }
        self.inner
            .promoted
            .dump()
            .map_err(|e| BuildError::io("dumping promoted set", e))?;
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("workspace", &self.inner.workspace)
            .finish_non_exhaustive()
    }
}

/// The scope of one build run.
pub struct BuildSession {
    inner: Arc<EngineInner>,
}

impl BuildSession {
    /// Builds a file and returns its digest.
    ///
    /// For a build path this produces the file by executing its rule (or
    /// hitting the trace); for source and external paths it digests the
    /// existing file.
    ///
    /// # Errors
    ///
    /// A missing file (or a build path no rule produces) is a user error.
    pub async fn build_file(&self, path: TreePath) -> Result<Digest> {
        let handle = self.inner.memo.handle();
        match handle.demand(&PathDigest(path.clone())).await? {
            Some(digest) => Ok(digest),
            None => Err(no_file_error(&path)),
        }
    }

    /// Builds everything an alias expands to and returns the file facts.
    ///
    /// # Errors
    ///
    /// An undefined alias is a user error.
    pub async fn build_alias(&self, alias: Alias) -> Result<FileFacts> {
        let handle = self.inner.memo.handle();
        match handle.demand(&rule_executor::ExpandAlias(alias.clone())).await?
        {
            Some(facts) => Ok(facts),
            None => Err(BuildError::user(
                None,
                format!("Alias {alias} is not defined"),
            )),
        }
    }

    /// Runs an anonymous action: a rule synthesized on the fly whose target
    /// lives under `.actions/`, keyed by the digest of the action itself.
    ///
    /// Two callers demanding the same action within a run share one
    /// execution. Returns the target path and its digest.
    ///
    /// # Errors
    ///
    /// Propagates dependency and execution failures.
    pub async fn run_anonymous_action(
        &self,
        spec: rule_executor::AnonymousActionSpec,
    ) -> Result<(BuildPath, Digest)> {
        let handle = self.inner.memo.handle();
        handle.demand(&rule_executor::AnonymousActionNode(spec)).await
    }

    /// Builds an arbitrary dependency set and returns its facts.
    ///
    /// # Errors
    ///
    /// Propagates the first failing dependency's error.
    pub async fn build_deps(&self, deps: DepSet) -> Result<Facts> {
        let resolver = Arc::new(EngineResolver {
            engine: Arc::downgrade(&self.inner),
        });
        let handle = self.inner.memo.handle();
        resolve_deps(&*resolver, &handle, &deps).await
    }
}

pub(crate) fn no_file_error(path: &TreePath) -> BuildError {
    match path {
        TreePath::Build(p) => BuildError::user(
            None,
            format!("No rule found for {p}"),
        ),
        TreePath::Source(p) => BuildError::user(
            None,
            format!("Source file {p} does not exist"),
        ),
        TreePath::External(p) => BuildError::user(
            None,
            format!("External file {p} does not exist"),
        ),
    }
}

/// Resolves a full dependency set through a resolver, concurrently.
pub(crate) async fn resolve_deps(
    resolver: &dyn DepResolver,
    memo: &MemoHandle,
    deps: &DepSet,
) -> Result<Facts> {
    let resolved = crate::memo::combinators::parallel_map(
        deps.iter().cloned().collect::<Vec<_>>(),
        |dep| async move {
            let fact = resolver.resolve(memo, &dep, false).await?.ok_or_else(
                || {
                    BuildError::code(
                        "non-optional dep resolved to nothing",
                        vec![("dep".into(), format!("{dep:?}"))],
                    )
                },
            )?;
            Ok((dep, fact))
        },
    )
    .await?;
    Ok(resolved.into_iter().collect())
}

/// The engine-backed dependency resolver used by action builders.
pub(crate) struct EngineResolver {
    pub engine: Weak<EngineInner>,
}

impl EngineResolver {
    fn engine(&self) -> Result<Arc<EngineInner>> {
        self.engine.upgrade().ok_or_else(|| {
            BuildError::code("engine dropped while resolving deps", vec![])
        })
    }
}

impl DepResolver for EngineResolver {
    fn resolve<'a>(
        &'a self,
        memo: &'a MemoHandle,
        dep: &'a Dep,
        optional: bool,
    ) -> BoxFuture<'a, Result<Option<Fact>>> {
        Box::pin(async move {
            let engine = self.engine()?;
            match dep {
                Dep::File(path) => {
                    match memo.demand(&PathDigest(path.clone())).await? {
                        Some(digest) => Ok(Some(Fact::File { digest })),
                        None if optional => Ok(None),
                        None => Err(no_file_error(path)),
                    }
                }

                Dep::Alias(alias) => {
                    let expansion = memo
                        .demand(&rule_executor::ExpandAlias(alias.clone()))
                        .await?;
                    match expansion {
                        Some(facts) => Ok(Some(Fact::Alias(facts))),
                        None if optional => Ok(None),
                        None => Err(BuildError::user(
                            None,
                            format!("Alias {alias} is not defined"),
                        )),
                    }
                }

                Dep::FileSelector(selector) => {
                    let facts =
                        rule_executor::eval_file_selector(
                            &engine, memo, selector,
                        )
                        .await?;
                    Ok(Some(Fact::FileSelector(facts)))
                }

                Dep::Env(name) => {
                    Ok(Some(Fact::Env(engine.env.get(name).cloned())))
                }

                Dep::Universe => {
                    memo.depend_on_current_run();
                    Ok(Some(Fact::Nothing))
                }

                Dep::SandboxConfig(_) => Ok(Some(Fact::Nothing)),
            }
        })
    }
}

/// A generator for hosts that have no rules at all (useful in tests and for
/// pure source-tree mirroring).
#[derive(Debug, Default)]
pub struct NoRules;

impl RuleGenerator for NoRules {
    fn gen_rules<'a>(
        &'a self,
        _target: &'a GenRulesTarget,
        _collector: &'a RulesCollector,
    ) -> BoxFuture<'a, Result<Option<BTreeSet<String>>>> {
        Box::pin(async { Ok(Some(BTreeSet::new())) })
    }
}

pub(crate) fn source_dir_of_build_dir(dir: &BuildPath) -> Option<SourcePath> {
    match dir.kind() {
        crate::path::BuildPathKind::ContextRoot(_) => {
            Some(SourcePath::root())
        }
        crate::path::BuildPathKind::Context { sub, .. } => {
            Some(SourcePath::from(sub))
        }
        _ => None,
    }
}
