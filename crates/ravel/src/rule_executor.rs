//! The rule executor.
//!
//! For each rule the executor decides whether cached outputs are still
//! valid (rule digest + trace database), optionally restores outputs from
//! the shared cache, otherwise runs the action — possibly sandboxed — then
//! digests the outputs, stores them, updates the trace, and applies
//! promotion.
//!
//! The executor is exposed as memoized computations:
//!
//! - [`PathDigest`]: the digest of any path, producing it first if it is a
//!   build path (the engine's `build_file`).
//! - [`ExecuteRule`]: runs one rule, keyed by its head target.
//! - [`ExpandAlias`]: builds everything an alias expands to.
//! - [`AnonymousActionNode`]: rules synthesized on the fly, keyed by the
//!   digest of their action.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Weak},
};

use futures::future::BoxFuture;
use ravel_stable_hash::StableHash;
use tracing::{debug, info, warn};

use crate::{
    action::{Action, ActionFull, ExecContext},
    action_builder::{ActionBuilder, DepResolver},
    alias::Alias,
    deps::{Dep, DepSet, Facts, FileFacts, FileSelector},
    digest::{Digest, DigestResult},
    engine::{EngineInner, EngineResolver, resolve_deps, source_dir_of_build_dir},
    error::{BuildError, CycleFrame, FrameKind, Result},
    exec_params::ExecutionParameters,
    load_rules::{self, LoadDir, Loaded},
    memo::{Computation, Compute, Cutoff, MemoHandle},
    path::{BuildPath, SourcePath, TreePath},
    rules::{PromoteLifetime, PromoteSpec, Rule, RuleInfo, RuleMode},
    sandbox::{Sandbox, SandboxMode},
    shared_cache::{RestoreResult, StorableTarget, StoreResult},
    trace_db::TraceEntry,
};

/// Version folded into every rule digest; bump to invalidate all traces
/// when the digest's composition changes.
const RULE_DIGEST_VERSION: u32 = 1;

/// The digests of all targets of one rule.
pub(crate) type TargetDigests = Arc<BTreeMap<BuildPath, Digest>>;

// ============================================================================
// Computations
// ============================================================================

/// The digest of a path, producing it first when it is a build path.
///
/// `None` means the file does not exist and no rule produces it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, StableHash)]
pub struct PathDigest(pub TreePath);

impl Computation for PathDigest {
    type Output = Option<Digest>;
    const NAME: &'static str = "path-digest";

    fn cutoff() -> Cutoff<Self::Output> {
        Cutoff::by_eq()
    }

    fn frame(&self) -> CycleFrame {
        CycleFrame::new(FrameKind::File, self.0.to_string())
    }
}

pub(crate) struct PathDigestExec {
    pub engine: Weak<EngineInner>,
}

impl Compute<PathDigest> for PathDigestExec {
    async fn compute(
        &self,
        input: &PathDigest,
        memo: &MemoHandle,
    ) -> Result<Option<Digest>> {
        let engine = upgrade(&self.engine)?;
        match &input.0 {
            path @ (TreePath::Source(_) | TreePath::External(_)) => {
                // re-statted every run; the digest cache makes this cheap
                // and the equality cutoff stops unchanged files from
                // invalidating anything downstream
                memo.depend_on_current_run();
                refresh_digest(&engine, engine.workspace.abs(path), false)
                    .await
            }

            TreePath::Build(target) => {
                let Some(dir) = target.parent() else {
                    return Ok(None);
                };
                let loaded =
                    memo.demand(&LoadDir(TreePath::Build(dir))).await?;
                let Loaded::Build(loaded) = loaded else {
                    return Ok(None);
                };
                let Some(rule) = loaded.rules_here.get(target) else {
                    return Ok(None);
                };

                let digests = memo
                    .demand(&ExecuteRule(rule.head_target().clone()))
                    .await?;
                digests.get(target).copied().map(Some).ok_or_else(|| {
                    BuildError::code(
                        "rule execution did not report a digest for one of \
                         its targets",
                        vec![("target".into(), target.to_string())],
                    )
                })
            }
        }
    }
}

/// Runs the rule owning the given head target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, StableHash)]
pub(crate) struct ExecuteRule(pub BuildPath);

impl Computation for ExecuteRule {
    type Output = TargetDigests;
    const NAME: &'static str = "execute-rule";

    fn cutoff() -> Cutoff<Self::Output> {
        Cutoff::by_eq()
    }

    fn frame(&self) -> CycleFrame {
        CycleFrame::new(FrameKind::File, self.0.to_string())
    }
}

pub(crate) struct ExecuteRuleExec {
    pub engine: Weak<EngineInner>,
}

impl Compute<ExecuteRule> for ExecuteRuleExec {
    async fn compute(
        &self,
        input: &ExecuteRule,
        memo: &MemoHandle,
    ) -> Result<TargetDigests> {
        let engine = upgrade(&self.engine)?;
        let dir = input.0.parent().ok_or_else(|| {
            BuildError::code(
                "rule head target at the build root",
                vec![("target".into(), input.0.to_string())],
            )
        })?;
        let loaded = load_rules::load_build_dir_of(memo, &dir).await?;
        let rule = loaded.rules_here.get(&input.0).ok_or_else(|| {
            BuildError::code(
                "execute-rule demanded for a target with no rule",
                vec![("target".into(), input.0.to_string())],
            )
        })?;
        execute_rule(&engine, memo, rule, false).await
    }
}

/// Builds everything an alias expands to; `None` when the alias is not
/// defined in its directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, StableHash)]
pub struct ExpandAlias(pub Alias);

impl Computation for ExpandAlias {
    type Output = Option<FileFacts>;
    const NAME: &'static str = "expand-alias";

    fn cutoff() -> Cutoff<Self::Output> {
        Cutoff::by_eq()
    }

    fn frame(&self) -> CycleFrame {
        CycleFrame::new(FrameKind::Alias, self.0.to_string())
    }
}

pub(crate) struct ExpandAliasExec {
    pub engine: Weak<EngineInner>,
}

impl Compute<ExpandAlias> for ExpandAliasExec {
    async fn compute(
        &self,
        input: &ExpandAlias,
        memo: &MemoHandle,
    ) -> Result<Option<FileFacts>> {
        let engine = upgrade(&self.engine)?;
        let loaded =
            load_rules::load_build_dir_of(memo, &input.0.dir).await?;
        let Some(contributions) = loaded.aliases.get(&input.0.name) else {
            return Ok(None);
        };

        let resolver: Arc<dyn DepResolver> = Arc::new(EngineResolver {
            engine: Arc::downgrade(&engine),
        });

        // expansions were appended in insertion order; their facts compose
        // as a union, so they can be evaluated concurrently
        let all_facts = crate::memo::combinators::parallel_map(
            contributions.clone(),
            |contribution| {
                let resolver = Arc::clone(&resolver);
                let memo = memo.clone();
                async move {
                    let ((), facts) =
                        contribution.expansion.exec(resolver, memo).await?;
                    Ok(facts)
                }
            },
        )
        .await?;

        let mut union = FileFacts::new();
        for facts in &all_facts {
            union.union_with(&facts.file_facts());
        }
        Ok(Some(union))
    }
}

/// A rule synthesized on the fly, keyed by the digest of its action.
///
/// Two code paths demanding the same anonymous action share one execution
/// through memoization; the target lives under `.actions/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, StableHash)]
pub struct AnonymousActionSpec {
    pub action: Action,
    pub env: BTreeMap<String, String>,
    pub deps: DepSet,
    /// Redirect the action's stdout into the target file.
    pub capture_stdout: bool,
    /// Whether the action was attached to an alias; `--force` reruns those.
    pub attached_to_alias: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, StableHash)]
pub struct AnonymousActionNode(pub AnonymousActionSpec);

impl Computation for AnonymousActionNode {
    type Output = (BuildPath, Digest);
    const NAME: &'static str = "anonymous-action";

    fn cutoff() -> Cutoff<Self::Output> {
        Cutoff::by_eq()
    }

    fn frame(&self) -> CycleFrame {
        CycleFrame::new(
            FrameKind::File,
            format!("anonymous action ({})", self.0.action.for_shell()),
        )
    }
}

pub(crate) struct AnonymousActionExec {
    pub engine: Weak<EngineInner>,
}

impl Compute<AnonymousActionNode> for AnonymousActionExec {
    async fn compute(
        &self,
        input: &AnonymousActionNode,
        memo: &MemoHandle,
    ) -> Result<(BuildPath, Digest)> {
        let engine = upgrade(&self.engine)?;
        let spec = &input.0;

        let basename = Digest::generic(&(
            &spec.action,
            &spec.env,
            &spec.deps,
            spec.capture_stdout,
        ))
        .map_err(|e| BuildError::io("digesting anonymous action", e))?
        .to_hex();
        let target = BuildPath::anonymous(&basename);

        let action = if spec.capture_stdout {
            Action::WithStdoutTo {
                target: target.clone(),
                inner: Box::new(spec.action.clone()),
            }
        } else {
            spec.action.clone()
        };
        let action_full = ActionFull {
            action,
            env: spec.env.clone(),
            locks: Vec::new(),
            can_go_in_shared_cache: true,
        };

        let deps = spec.deps.clone();
        let rule = Rule::new(
            target.parent().expect("anonymous targets have a parent"),
            [target.clone()].into(),
            ActionBuilder::deps(deps).and_then(move |()| {
                ActionBuilder::pure(action_full.clone())
            }),
            RuleMode::Standard,
            RuleInfo::Internal,
            None,
            crate::sandbox::SandboxConfig::no_special_requirements(),
        )?;

        let digests =
            execute_rule(&engine, memo, &rule, spec.attached_to_alias)
                .await?;
        let digest = *digests.get(&target).ok_or_else(|| {
            BuildError::code("anonymous action produced no target", vec![])
        })?;
        Ok((target, digest))
    }
}

/// Registers the executor computations.
pub(crate) fn register(engine: &Arc<EngineInner>) {
    engine.memo.register::<PathDigest, _>(Arc::new(PathDigestExec {
        engine: Arc::downgrade(engine),
    }));
    engine.memo.register::<ExecuteRule, _>(Arc::new(ExecuteRuleExec {
        engine: Arc::downgrade(engine),
    }));
    engine.memo.register::<ExpandAlias, _>(Arc::new(ExpandAliasExec {
        engine: Arc::downgrade(engine),
    }));
    engine.memo.register::<AnonymousActionNode, _>(Arc::new(
        AnonymousActionExec { engine: Arc::downgrade(engine) },
    ));
}

// ============================================================================
// File selectors
// ============================================================================

/// Resolves a file selector: all files of a directory matching the
/// predicate, built and digested.
pub(crate) async fn eval_file_selector(
    engine: &Arc<EngineInner>,
    memo: &MemoHandle,
    selector: &FileSelector,
) -> Result<FileFacts> {
    let mut facts = FileFacts::new();

    match &selector.dir {
        TreePath::Source(dir) => {
            let listing = memo
                .demand(&load_rules::SourceListingNode(dir.clone()))
                .await?;
            if let Some(listing) = listing {
                for (name, kind) in listing.iter() {
                    if *kind != crate::fs::EntryKind::File
                        || !selector.predicate.matches(name)
                    {
                        continue;
                    }
                    let path = TreePath::Source(dir.join(name));
                    if let Some(digest) =
                        memo.demand(&PathDigest(path.clone())).await?
                    {
                        facts.insert(path, digest);
                    }
                }
            }
        }

        TreePath::Build(dir) => {
            // in the build tree, "the files of a directory" are its rule
            // targets
            let loaded = load_rules::load_build_dir_of(memo, dir).await?;
            for target in loaded.rules_here.keys() {
                let matches = target
                    .basename()
                    .is_some_and(|name| selector.predicate.matches(name));
                if !matches {
                    continue;
                }
                let path = TreePath::Build(target.clone());
                if let Some(digest) =
                    memo.demand(&PathDigest(path.clone())).await?
                {
                    facts.insert(path, digest);
                }
            }
        }

        TreePath::External(dir) => {
            let listing = memo
                .demand(&load_rules::ExternalListingNode(dir.clone()))
                .await?;
            if let Some(listing) = listing {
                for (name, kind) in listing.iter() {
                    if *kind != crate::fs::EntryKind::File
                        || !selector.predicate.matches(name)
                    {
                        continue;
                    }
                    let path = TreePath::External(
                        crate::path::ExternalPath::new(
                            dir.as_path().join(name),
                        )?,
                    );
                    if let Some(digest) =
                        memo.demand(&PathDigest(path.clone())).await?
                    {
                        facts.insert(path, digest);
                    }
                }
            }
        }
    }

    Ok(facts)
}

// ============================================================================
// The core algorithm
// ============================================================================

/// Executes one rule, going through the trace database and the shared
/// cache first. Returns the digests of all targets.
pub(crate) async fn execute_rule(
    engine: &Arc<EngineInner>,
    memo: &MemoHandle,
    rule: &Rule,
    anonymous_attached_to_alias: bool,
) -> Result<TargetDigests> {
    // the trace check must observe the on-disk state of every run (targets
    // can disappear without any input changing), so rule execution is
    // re-entered each run; the digest-map cutoff keeps downstream nodes
    // from recomputing when the outcome is unchanged
    memo.depend_on_current_run();

    let resolver: Arc<dyn DepResolver> =
        Arc::new(EngineResolver { engine: Arc::downgrade(engine) });

    // 1. evaluate the action builder: deps become facts
    let (action_full, facts) =
        rule.action().exec(Arc::clone(&resolver), memo.clone()).await?;

    // 2. the directory's execution policy
    let params = engine.exec_params(rule.dir());

    // 3. the target directory must exist before anything touches it
    crate::fs::create_dir_all(engine.workspace.abs_build(rule.dir()))
        .await?;

    // 4. sandbox mode
    let deps = facts.dep_set();
    let config = rule.sandbox().inter(deps.sandbox_config());
    let mode = crate::sandbox::select_mode(
        !action_full.action.is_useful_to_sandbox(),
        config,
        &engine.options.sandbox_preference,
        rule.loc(),
    )?;

    // 5. always-rerun rules can never hit the trace
    let always_rerun = deps.has_universe()
        || (anonymous_attached_to_alias && engine.options.force);
    if always_rerun {
        memo.depend_on_current_run();
    }

    // 6. the rule digest
    let rule_digest =
        compute_rule_digest(rule, &action_full, &facts, mode, &params)?;
    let head = rule.head_target().clone();

    // 7. trace check
    if !always_rerun
        && let Some(prior) = engine.trace.get(&head)
        && prior.rule_digest == rule_digest
        && let Some(digests) =
            targets_unchanged(engine, rule, &params, prior.targets_digest)
                .await?
        && replay_dynamic_stages(memo, &resolver, &prior.dynamic_deps_stages)
            .await?
    {
        debug!(rule = %head, "trace hit");
        return Ok(Arc::new(digests));
    }

    // 8a. delete stale targets; register them for crash cleanup
    for target in rule.targets() {
        let abs = engine.workspace.abs_build(target);
        engine.digests.invalidate(&abs);
        crate::fs::remove_all(abs).await?;
        engine.pending_targets.insert(target.clone());
    }

    // 8b. shared-cache restore
    let cacheable = action_full.can_go_in_shared_cache && !always_rerun;
    if cacheable
        && let Some(cache) = &engine.shared_cache
        && use_cache_for(engine, &rule_digest)
    {
        match cache
            .restore_artifacts(
                engine.options.cache_storage_mode,
                &rule_digest,
                rule.targets(),
                &engine.workspace.build_root,
            )
            .await
        {
            RestoreResult::Restored(files) => {
                let digests: BTreeMap<BuildPath, Digest> =
                    files.into_iter().collect();
                for target in rule.targets() {
                    engine.pending_targets.remove(target);
                }
                engine.trace.set(head, TraceEntry {
                    rule_digest,
                    dynamic_deps_stages: Vec::new(),
                    targets_digest: combined_digest(&digests),
                });
                debug!(rule = %rule.head_target(), "restored from cache");
                return Ok(Arc::new(digests));
            }
            RestoreResult::NotFound => {}
            RestoreResult::Error(reason) => {
                warn!(rule = %head, reason = %reason, "shared cache restore failed");
            }
        }
    }

    // 8c. execute the action, in a sandbox when one was selected
    let sandbox = match mode {
        SandboxMode::None => None,
        mode => Some(
            prepare_sandbox(engine, &facts, &rule_digest, mode, &params)
                .await?,
        ),
    };

    let exec_root = sandbox.as_ref().map_or_else(
        || engine.workspace.build_root.clone(),
        |sandbox| sandbox.root().to_path_buf(),
    );
    let ctx = ExecContext {
        chdir: rule.dir().rel().to_fs_path(&exec_root),
        exec_root,
        source_root: engine.workspace.source_root.clone(),
        env: action_full.env.clone(),
        targets: rule.targets().clone(),
        loc: rule.loc().cloned(),
        context: rule.context().cloned(),
        params: params.clone(),
    };

    let stage_resolver =
        StageResolver { resolver: &*resolver, memo };

    let exec_result = engine
        .locks
        .with_locks(
            &action_full.locks,
            engine.interpreter.exec(
                &ctx,
                &action_full.action,
                &stage_resolver,
            ),
        )
        .await?;

    // move sandboxed outputs back, then drop the sandbox
    if let Some(sandbox) = sandbox {
        let targets = rule.targets().clone();
        let workspace = engine.workspace.clone();
        crate::fs::blocking(move || -> Result<()> {
            for target in &targets {
                sandbox
                    .move_target_back(target, &workspace.abs_build(target))?;
            }
            sandbox.destroy();
            Ok(())
        })
        .await?;
    }

    // 8d. every declared target must now exist
    validate_targets(engine, rule).await?;

    // 8e/f. digest the targets, stripping write bits when configured
    let digests = digest_targets(engine, rule, &params).await?;

    // 8g. store in the shared cache
    if cacheable && let Some(cache) = &engine.shared_cache {
        let storable = storable_targets(engine, &digests).await;
        match cache
            .store_artifacts(
                engine.options.cache_storage_mode,
                &rule_digest,
                &storable,
            )
            .await
        {
            StoreResult::Stored | StoreResult::AlreadyPresent => {}
            StoreResult::WillNotStoreNonDeterminism { reason } => {
                warn!(rule = %head, reason = %reason, "rule is not reproducible");
            }
            StoreResult::Error(reason) => {
                warn!(rule = %head, reason = %reason, "shared cache store failed");
            }
        }
    }

    // 8h. record the new trace
    let mut stages = Vec::with_capacity(
        exec_result.dynamic_deps_stages.len(),
    );
    for (set, stage_facts) in &exec_result.dynamic_deps_stages {
        stages.push((set.clone(), stage_facts.digest()?));
    }
    engine.trace.set(head, TraceEntry {
        rule_digest,
        dynamic_deps_stages: stages,
        targets_digest: combined_digest(&digests),
    });

    // 9. promotion
    if let RuleMode::Promote(spec) = rule.mode() {
        apply_promotion(engine, rule, spec, &digests).await?;
    }

    for target in rule.targets() {
        engine.pending_targets.remove(target);
    }

    Ok(Arc::new(digests))
}

fn compute_rule_digest(
    rule: &Rule,
    action_full: &ActionFull,
    facts: &Facts,
    mode: SandboxMode,
    params: &ExecutionParameters,
) -> Result<Digest> {
    let facts_digest = facts.digest()?;
    let targets: Vec<&BuildPath> = rule.targets().iter().collect();

    Digest::generic(&(
        (RULE_DIGEST_VERSION, facts_digest, mode, &action_full.env),
        (
            targets,
            rule.context().map(crate::path::ContextName::as_str),
            action_full.action.for_shell(),
        ),
        (
            action_full.can_go_in_shared_cache,
            &action_full.locks,
            params.stdout_on_success,
            params.stderr_on_success,
        ),
    ))
    .map_err(|e| BuildError::io("computing rule digest", e))
}

/// On a candidate trace hit: all targets still exist and their combined
/// digest equals the recorded one. Returns the per-target digests.
async fn targets_unchanged(
    engine: &Arc<EngineInner>,
    rule: &Rule,
    params: &ExecutionParameters,
    recorded: Digest,
) -> Result<Option<BTreeMap<BuildPath, Digest>>> {
    let mut digests = BTreeMap::new();
    for target in rule.targets() {
        let abs = engine.workspace.abs_build(target);
        match refresh_digest(engine, abs, params.remove_write_permissions)
            .await?
        {
            Some(digest) => {
                digests.insert(target.clone(), digest);
            }
            None => return Ok(None),
        }
    }
    if combined_digest(&digests) == recorded {
        Ok(Some(digests))
    } else {
        Ok(None)
    }
}

/// The dynamic-deps callback: each interpreter invocation resolves one dep
/// set and becomes one recorded stage.
struct StageResolver<'e> {
    resolver: &'e dyn DepResolver,
    memo: &'e MemoHandle,
}

impl crate::action::DynamicDeps for StageResolver<'_> {
    fn build<'a>(
        &'a self,
        deps: DepSet,
    ) -> BoxFuture<'a, Result<Facts>> {
        Box::pin(async move {
            resolve_deps(self.resolver, self.memo, &deps).await
        })
    }
}

/// Replays recorded dynamic-dependency stages in order; any mismatch (or
/// resolution failure) means the rule must re-run.
async fn replay_dynamic_stages(
    memo: &MemoHandle,
    resolver: &Arc<dyn DepResolver>,
    stages: &[(DepSet, Digest)],
) -> Result<bool> {
    for (set, recorded) in stages {
        let facts = match resolve_deps(&**resolver, memo, set).await {
            Ok(facts) => facts,
            // the execution path will surface the underlying failure
            Err(_) => return Ok(false),
        };
        if facts.digest()? != *recorded {
            return Ok(false);
        }
    }
    Ok(true)
}

async fn prepare_sandbox(
    engine: &Arc<EngineInner>,
    facts: &Facts,
    rule_digest: &Digest,
    mode: SandboxMode,
    params: &ExecutionParameters,
) -> Result<Sandbox> {
    let workspace = engine.workspace.clone();
    let digest_hex = rule_digest.to_hex();
    let expand_aliases = params.expand_aliases_in_sandbox;

    // collect what must be materialized before leaving the async world
    let mut build_files: Vec<BuildPath> = Vec::new();
    for (dep, fact) in facts.iter() {
        let files = match (dep, fact) {
            (Dep::File(TreePath::Build(p)), _) => {
                build_files.push(p.clone());
                continue;
            }
            (_, crate::deps::Fact::Alias(files)) if expand_aliases => files,
            (_, crate::deps::Fact::FileSelector(files)) => files,
            _ => continue,
        };
        for path in files.paths() {
            if let TreePath::Build(p) = path {
                build_files.push(p.clone());
            }
        }
    }

    let external_deps: Vec<std::path::PathBuf> = facts
        .iter()
        .filter_map(|(dep, _)| match dep {
            Dep::File(TreePath::External(p)) => {
                Some(p.as_path().to_path_buf())
            }
            _ => None,
        })
        .collect();

    crate::fs::blocking(move || {
        // external deps are not materialized, only asserted
        for external in &external_deps {
            if !external.exists() {
                return Err(BuildError::user(
                    None,
                    format!(
                        "External dependency {} does not exist",
                        external.display()
                    ),
                ));
            }
        }

        let sandbox = Sandbox::create(&workspace, &digest_hex, mode)?;
        for path in &build_files {
            let abs = workspace.abs_build(path);
            sandbox.materialize(
                &abs,
                std::path::Path::new(path.rel().as_str()),
            )?;
        }
        Ok(sandbox)
    })
    .await
}

async fn validate_targets(
    engine: &Arc<EngineInner>,
    rule: &Rule,
) -> Result<()> {
    let mut missing = Vec::new();
    for target in rule.targets() {
        let abs = engine.workspace.abs_build(target);
        if !crate::fs::file_exists(abs).await {
            missing.push(target.to_string());
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(BuildError::user(
            rule.loc().cloned(),
            format!(
                "Rule failed to generate the following targets: {}",
                missing.join(", ")
            ),
        ))
    }
}

async fn digest_targets(
    engine: &Arc<EngineInner>,
    rule: &Rule,
    params: &ExecutionParameters,
) -> Result<BTreeMap<BuildPath, Digest>> {
    let mut digests = BTreeMap::new();
    for target in rule.targets() {
        let abs = engine.workspace.abs_build(target);
        let digest = refresh_digest(
            engine,
            abs,
            params.remove_write_permissions,
        )
        .await?
        .ok_or_else(|| {
            BuildError::user(
                rule.loc().cloned(),
                format!("Produced target {target} disappeared"),
            )
        })?;
        digests.insert(target.clone(), digest);
    }
    Ok(digests)
}

async fn storable_targets(
    engine: &Arc<EngineInner>,
    digests: &BTreeMap<BuildPath, Digest>,
) -> Vec<StorableTarget> {
    let mut out = Vec::with_capacity(digests.len());
    for (target, digest) in digests {
        let abs = engine.workspace.abs_build(target);
        let executable = is_executable(&abs).await;
        out.push(StorableTarget {
            target: target.clone(),
            abs_path: abs,
            digest: *digest,
            executable,
        });
    }
    out
}

async fn is_executable(abs: &std::path::Path) -> bool {
    let abs = abs.to_path_buf();
    crate::fs::blocking(move || {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            std::fs::metadata(&abs)
                .map(|m| m.permissions().mode() & 0o100 != 0)
                .unwrap_or(false)
        }
        #[cfg(not(unix))]
        {
            let _ = abs;
            false
        }
    })
    .await
}

/// Copies promotable targets back into the source tree.
async fn apply_promotion(
    engine: &Arc<EngineInner>,
    rule: &Rule,
    spec: &PromoteSpec,
    digests: &BTreeMap<BuildPath, Digest>,
) -> Result<()> {
    let Some(source_dir) = source_dir_of_build_dir(rule.dir()) else {
        return Err(BuildError::code(
            "promotion rule outside a context directory",
            vec![("dir".into(), rule.dir().to_string())],
        ));
    };
    let dest_dir = match &spec.into {
        Some(sub) => {
            let mut dir = source_dir;
            for component in sub.components() {
                dir = dir.join(component);
            }
            dir
        }
        None => source_dir,
    };

    for (target, digest) in digests {
        let basename = target.basename().expect("targets have a basename");
        if let Some(only) = &spec.only
            && !only.matches(basename)
        {
            continue;
        }

        let dest: SourcePath = dest_dir.join(basename);
        let dest_abs = engine.workspace.abs_source(&dest);
        let src_abs = engine.workspace.abs_build(target);
        let digest = *digest;

        let promoted = crate::fs::blocking(move || -> Result<bool> {
            let unchanged = dest_abs.is_file()
                && Digest::file(&dest_abs)
                    .map(|existing| existing == digest)
                    .unwrap_or(false);
            if unchanged {
                return Ok(false);
            }
            crate::fs::copy_file_sync(&src_abs, &dest_abs)?;
            // promoted files belong to the user now
            crate::fs::make_user_writable_sync(&dest_abs)?;
            Ok(true)
        })
        .await?;

        if promoted {
            info!(path = %dest, "promoted");
        }
        if spec.lifetime == PromoteLifetime::UntilClean {
            engine.promoted.add(dest);
        }
    }
    Ok(())
}

// ============================================================================
// Shared helpers
// ============================================================================

async fn refresh_digest(
    engine: &Arc<EngineInner>,
    abs: std::path::PathBuf,
    remove_write_permissions: bool,
) -> Result<Option<Digest>> {
    let engine = Arc::clone(engine);
    let result = crate::fs::blocking(move || {
        engine.digests.refresh(&abs, remove_write_permissions)
    })
    .await;
    match result {
        DigestResult::Ok(digest) => Ok(Some(digest)),
        DigestResult::NoSuchFile => Ok(None),
        DigestResult::Error(error) => Err(BuildError::Io {
            context: "digesting file".to_owned(),
            source: error,
        }),
    }
}

/// The combined digest of a rule's targets, in target order.
fn combined_digest(digests: &BTreeMap<BuildPath, Digest>) -> Digest {
    Digest::combine(digests.values().copied())
}

/// The reproducibility-check sampling decision: `false` means "skip the
/// cache and execute, to compare".
///
/// Deterministic per rule digest, so a given rule's behavior is stable
/// within a configuration.
fn use_cache_for(engine: &Arc<EngineInner>, rule_digest: &Digest) -> bool {
    let probability = engine.options.repro_check_probability;
    if probability <= 0.0 {
        return true;
    }
    if probability >= 1.0 {
        return false;
    }
    let bytes = rule_digest.as_bytes();
    let sample = u64::from_le_bytes(
        bytes[..8].try_into().expect("digest has at least 8 bytes"),
    );
    #[allow(clippy::cast_precision_loss)]
    let unit = sample as f64 / u64::MAX as f64;
    unit >= probability
}

fn upgrade(engine: &Weak<EngineInner>) -> Result<Arc<EngineInner>> {
    engine.upgrade().ok_or_else(|| {
        BuildError::code("engine dropped during rule execution", vec![])
    })
}
