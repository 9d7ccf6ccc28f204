//! The directory loader.
//!
//! `load_dir` turns a directory path into the authoritative description of
//! what lives there: for source and external directories just the listing,
//! for build directories the full rule map — generated rules plus the
//! implicit source-file copy rules — with every structural invariant
//! checked and stale build artifacts removed.
//!
//! The computation is memoized: loading a directory twice within a run
//! returns the same value, and the rule generator runs exactly once per
//! directory per (re)load.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Weak},
};

use ravel_stable_hash::StableHash;
use tracing::{debug, info};

use crate::{
    action::{Action, ActionFull},
    action_builder::ActionBuilder,
    alias::{Alias, AliasName},
    engine::{EngineInner, GenRulesTarget},
    error::{BuildError, Result},
    fs::EntryKind,
    memo::{
        Computation, Compute, Cutoff, MemoHandle, collect::collect,
    },
    path::{
        BuildPath, BuildPathKind, ContextName, ExternalPath, SourcePath,
        TreePath,
    },
    rules::{
        AliasContribution, PromoteSpec, Rule, RuleInfo, RuleMode, Rules,
    },
    sandbox::SandboxConfig,
    source_tree::SourceListing,
};

/// A loaded directory.
#[derive(Debug, Clone)]
pub enum Loaded {
    /// A source or external directory: just the listing (`None` when the
    /// directory does not exist).
    NonBuild(Option<Arc<SourceListing>>),
    /// A directory under the build root.
    Build(Arc<LoadedBuildDir>),
}

/// The authoritative contents of one build directory.
#[derive(Debug)]
pub struct LoadedBuildDir {
    pub dir: BuildPath,
    /// Generated subdirectories this directory may contain, plus its source
    /// subdirectories. Anything else on disk is stale and removed.
    pub allowed_subdirs: BTreeSet<String>,
    /// Everything the rule generator produced for this directory.
    pub rules_produced: Rules,
    /// Target path to owning rule, for every target of this directory.
    pub rules_here: BTreeMap<BuildPath, Rule>,
    /// Alias expansions declared here, in insertion order.
    pub aliases: BTreeMap<AliasName, Vec<AliasContribution>>,
}

impl LoadedBuildDir {
    fn empty(dir: BuildPath, allowed_subdirs: BTreeSet<String>) -> Self {
        Self {
            dir,
            allowed_subdirs,
            rules_produced: Rules::new(),
            rules_here: BTreeMap::new(),
            aliases: BTreeMap::new(),
        }
    }
}

// ============================================================================
// Computations
// ============================================================================

/// Memoized listing of a source directory. Re-read every run; equality
/// cutoff stops unchanged listings from invalidating dependents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, StableHash)]
pub(crate) struct SourceListingNode(pub SourcePath);

impl Computation for SourceListingNode {
    type Output = Option<Arc<SourceListing>>;
    const NAME: &'static str = "source-listing";

    fn cutoff() -> Cutoff<Self::Output> {
        Cutoff::by_eq()
    }
}

pub(crate) struct SourceListingExec {
    pub engine: Weak<EngineInner>,
}

impl Compute<SourceListingNode> for SourceListingExec {
    async fn compute(
        &self,
        input: &SourceListingNode,
        memo: &MemoHandle,
    ) -> Result<Option<Arc<SourceListing>>> {
        let engine = upgrade(&self.engine)?;
        memo.depend_on_current_run();
        engine.source_tree.list_dir(&input.0).await
    }
}

/// Memoized listing of an external directory; `ENOENT` is tolerated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, StableHash)]
pub(crate) struct ExternalListingNode(pub ExternalPath);

impl Computation for ExternalListingNode {
    type Output = Option<Arc<SourceListing>>;
    const NAME: &'static str = "external-listing";

    fn cutoff() -> Cutoff<Self::Output> {
        Cutoff::by_eq()
    }
}

pub(crate) struct ExternalListingExec;

impl Compute<ExternalListingNode> for ExternalListingExec {
    async fn compute(
        &self,
        input: &ExternalListingNode,
        memo: &MemoHandle,
    ) -> Result<Option<Arc<SourceListing>>> {
        memo.depend_on_current_run();
        let entries =
            crate::fs::read_dir_sorted(input.0.as_path().to_path_buf())
                .await?;
        Ok(entries.map(|entries| {
            Arc::new(
                entries
                    .into_iter()
                    .filter(|(_, kind)| {
                        matches!(kind, EntryKind::File | EntryKind::Dir)
                    })
                    .collect(),
            )
        }))
    }
}

/// The generator's global rules, produced once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StableHash)]
pub(crate) struct GlobalRulesNode;

impl Computation for GlobalRulesNode {
    type Output = Rules;
    const NAME: &'static str = "global-rules";
}

pub(crate) struct GlobalRulesExec {
    pub engine: Weak<EngineInner>,
}

impl Compute<GlobalRulesNode> for GlobalRulesExec {
    async fn compute(
        &self,
        _input: &GlobalRulesNode,
        _memo: &MemoHandle,
    ) -> Result<Rules> {
        let engine = upgrade(&self.engine)?;
        let ((), rules) = collect(async |collector| {
            engine.rule_generator.global_rules(collector).await
        })
        .await?;
        Ok(rules)
    }
}

/// The memoized `load_dir` computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, StableHash)]
pub(crate) struct LoadDir(pub TreePath);

impl Computation for LoadDir {
    type Output = Loaded;
    const NAME: &'static str = "load-dir";
}

pub(crate) struct LoadDirExec {
    pub engine: Weak<EngineInner>,
}

impl Compute<LoadDir> for LoadDirExec {
    async fn compute(
        &self,
        input: &LoadDir,
        memo: &MemoHandle,
    ) -> Result<Loaded> {
        let engine = upgrade(&self.engine)?;
        match &input.0 {
            TreePath::Source(dir) => {
                let listing =
                    memo.demand(&SourceListingNode(dir.clone())).await?;
                Ok(Loaded::NonBuild(listing))
            }
            TreePath::External(dir) => {
                let listing =
                    memo.demand(&ExternalListingNode(dir.clone())).await?;
                Ok(Loaded::NonBuild(listing))
            }
            TreePath::Build(dir) => {
                load_build_dir(&engine, memo, dir).await.map(Loaded::Build)
            }
        }
    }
}

/// Registers the loader computations.
pub(crate) fn register(engine: &Arc<EngineInner>) {
    engine.memo.register::<SourceListingNode, _>(Arc::new(
        SourceListingExec { engine: Arc::downgrade(engine) },
    ));
    engine
        .memo
        .register::<ExternalListingNode, _>(Arc::new(ExternalListingExec));
    engine.memo.register::<GlobalRulesNode, _>(Arc::new(GlobalRulesExec {
        engine: Arc::downgrade(engine),
    }));
    engine.memo.register::<LoadDir, _>(Arc::new(LoadDirExec {
        engine: Arc::downgrade(engine),
    }));
}

/// Demands a loaded build directory, failing on non-build results.
pub(crate) async fn load_build_dir_of(
    memo: &MemoHandle,
    dir: &BuildPath,
) -> Result<Arc<LoadedBuildDir>> {
    match memo.demand(&LoadDir(TreePath::Build(dir.clone()))).await? {
        Loaded::Build(loaded) => Ok(loaded),
        Loaded::NonBuild(_) => Err(BuildError::code(
            "expected a build directory",
            vec![("dir".into(), dir.to_string())],
        )),
    }
}

// ============================================================================
// Loading a build directory
// ============================================================================

async fn load_build_dir(
    engine: &Arc<EngineInner>,
    memo: &MemoHandle,
    dir: &BuildPath,
) -> Result<Arc<LoadedBuildDir>> {
    let contexts: BTreeSet<String> = engine
        .options
        .contexts
        .iter()
        .map(|c| c.as_str().to_owned())
        .collect();

    let (context, install, sub_components) = match dir.kind() {
        BuildPathKind::Root => {
            // per-context subtrees plus the install tree hang off the root
            let mut allowed = contexts;
            allowed.insert(BuildPath::INSTALL_DIR.to_owned());
            return Ok(Arc::new(LoadedBuildDir::empty(dir.clone(), allowed)));
        }
        BuildPathKind::InstallRoot => {
            return Ok(Arc::new(LoadedBuildDir::empty(dir.clone(), contexts)));
        }
        BuildPathKind::ContextRoot(context) => {
            (context.to_owned(), false, Vec::new())
        }
        BuildPathKind::Context { context, sub } => (
            context.to_owned(),
            false,
            sub.components().map(str::to_owned).collect(),
        ),
        BuildPathKind::InstallContextRoot(context) => {
            (context.to_owned(), true, Vec::new())
        }
        BuildPathKind::Install { context, sub } => (
            context.to_owned(),
            true,
            sub.components().map(str::to_owned).collect(),
        ),
        BuildPathKind::Anonymous(_) | BuildPathKind::Hidden => {
            return Err(BuildError::code(
                "load_dir called on an engine-private directory",
                vec![("dir".into(), dir.to_string())],
            ));
        }
    };

    if !contexts.contains(&context) {
        return Err(BuildError::code(
            "unknown build context",
            vec![
                ("context".into(), context),
                ("dir".into(), dir.to_string()),
            ],
        ));
    }
    let context = ContextName::new(context)?;

    // generated-directory restriction: a generated subdirectory must have
    // been declared by its parent, otherwise stale-artifact cleanup could
    // wipe content the engine does not understand
    if let Some(parent) = dir.parent() {
        let parent_loaded = load_build_dir_of(memo, &parent).await?;
        let basename =
            dir.basename().expect("non-root dirs have a basename");
        if !parent_loaded.allowed_subdirs.contains(basename) {
            return Err(BuildError::code(
                "generated directory was not declared by its parent",
                vec![
                    ("dir".into(), dir.to_string()),
                    ("parent".into(), parent.to_string()),
                ],
            ));
        }
    }

    // step 1: the rule generator, composed with the global rules
    let target = GenRulesTarget {
        context: context.clone(),
        install,
        sub_path: sub_components,
        dir: dir.clone(),
    };
    let (subdirs_to_keep, generated) = collect(async |collector| {
        engine.rule_generator.gen_rules(&target, collector).await
    })
    .await?;
    let Some(subdirs_to_keep) = subdirs_to_keep else {
        return Err(BuildError::code(
            "rule generator returned nothing for a directory the engine \
             asked about",
            vec![("dir".into(), dir.to_string())],
        ));
    };
    let global = memo.demand(&GlobalRulesNode).await?;
    let rules_produced =
        crate::memo::collect::ImplicitOutput::union(generated, global);

    // step 2: this directory's contributions
    let consumed = rules_produced
        .dir_rules(dir)
        .map(crate::rules::DirRules::consume)
        .unwrap_or_default();
    let mut rules = consumed.rules;
    let mut aliases = consumed.aliases;

    // the source directory shadowed by this build directory
    let source_dir = crate::engine::source_dir_of_build_dir(dir);
    let source_listing = match &source_dir {
        Some(source_dir) => {
            memo.demand(&SourceListingNode(source_dir.clone())).await?
        }
        None => None,
    };

    // default-alias expansion for context dirs
    if !install && !aliases.contains_key(&AliasName::default_()) {
        let target_alias = if engine.options.rules_version >= 2 {
            Alias::all(dir.clone())
        } else {
            Alias::install(dir.clone())
        };
        aliases.insert(AliasName::default_(), vec![AliasContribution {
            loc: None,
            expansion: ActionBuilder::dep_on_alias_if_exists(target_alias)
                .map(|_| ()),
        }]);
    }

    // step 3: source files shadowed by rule targets
    let source_files_to_ignore = compute_source_files_to_ignore(&rules);

    // step 4: copy rules for the remaining source files
    if let (Some(source_dir), Some(listing)) = (&source_dir, &source_listing)
    {
        for (name, kind) in listing.iter() {
            if *kind != EntryKind::File
                || source_files_to_ignore.contains(name.as_str())
            {
                continue;
            }
            let src = source_dir.join(name);
            let dst = dir.join(name);
            rules.push(source_file_copy_rule(
                dir.clone(),
                src,
                dst,
                context.clone(),
            )?);
        }
    }

    // step 5: fallback filtering
    let source_files: BTreeSet<&str> = source_listing
        .as_deref()
        .map(|listing| {
            listing
                .iter()
                .filter(|(_, kind)| **kind == EntryKind::File)
                .map(|(name, _)| name.as_str())
                .collect()
        })
        .unwrap_or_default();
    let rules = filter_fallback_rules(rules, &source_files)?;

    // step 6: the target map, with collision diagnostics
    let source_subdirs: BTreeSet<&str> = source_listing
        .as_deref()
        .map(|listing| {
            listing
                .iter()
                .filter(|(_, kind)| **kind == EntryKind::Dir)
                .map(|(name, _)| name.as_str())
                .collect()
        })
        .unwrap_or_default();

    let mut rules_here: BTreeMap<BuildPath, Rule> = BTreeMap::new();
    for rule in &rules {
        for target in rule.targets() {
            let basename =
                target.basename().expect("targets have a basename");
            if source_subdirs.contains(basename) {
                return Err(BuildError::user(
                    rule.loc().cloned(),
                    format!(
                        "{} produces the target {basename}, but a \
                         directory with the same name exists in the source \
                         tree",
                        rule.info().describe(),
                    ),
                ));
            }
            if let Some(previous) = rules_here.get(target) {
                return Err(BuildError::user_full(
                    rule.loc().cloned(),
                    vec![format!(
                        "Multiple rules produce the target {target}:"
                    )],
                    vec![
                        previous.info().describe(),
                        rule.info().describe(),
                    ],
                ));
            }
            rules_here.insert(target.clone(), rule.clone());
        }
    }

    // step 7: allowed subdirs = generated + source
    let mut allowed_subdirs = subdirs_to_keep;
    allowed_subdirs.extend(source_subdirs.iter().map(|s| (*s).to_owned()));

    // step 8: stale-artifact cleanup
    cleanup_stale_artifacts(engine, dir, &rules_here, &allowed_subdirs)
        .await?;

    debug!(dir = %dir, rules = rules_here.len(), "loaded build directory");

    Ok(Arc::new(LoadedBuildDir {
        dir: dir.clone(),
        allowed_subdirs,
        rules_produced,
        rules_here,
        aliases,
    }))
}

/// Source files shadowed by rules rather than copied: targets of
/// `IgnoreSourceFiles` rules, and targets of promotion rules (honoring the
/// `only` predicate).
fn compute_source_files_to_ignore(rules: &[Rule]) -> BTreeSet<String> {
    let mut ignore = BTreeSet::new();
    for rule in rules {
        let matching: Box<dyn Fn(&str) -> bool> = match rule.mode() {
            RuleMode::IgnoreSourceFiles => Box::new(|_| true),
            RuleMode::Promote(PromoteSpec { only: Some(pred), .. }) => {
                let pred = pred.clone();
                Box::new(move |name| pred.matches(name))
            }
            RuleMode::Promote(PromoteSpec { only: None, .. }) => {
                Box::new(|_| true)
            }
            RuleMode::Standard | RuleMode::Fallback => continue,
        };
        for target in rule.targets() {
            if let Some(basename) = target.basename()
                && matching(basename)
            {
                ignore.insert(basename.to_owned());
            }
        }
    }
    ignore
}

fn source_file_copy_rule(
    dir: BuildPath,
    src: SourcePath,
    dst: BuildPath,
    context: ContextName,
) -> Result<Rule> {
    let copy_action = ActionFull::new(Action::Copy {
        src: TreePath::Source(src.clone()),
        dst: dst.clone(),
    });
    let action = ActionBuilder::path(TreePath::Source(src.clone()))
        .and_then(move |()| ActionBuilder::pure(copy_action.clone()));

    Rule::new(
        dir,
        [dst].into(),
        action,
        RuleMode::Standard,
        RuleInfo::SourceFileCopy(src),
        Some(context),
        SandboxConfig::no_special_requirements(),
    )
}

/// A fallback rule is dropped iff *all* of its targets exist as source
/// files; keeping a partially-shadowed fallback rule would produce a
/// build tree mixing generated and source versions of the same rule's
/// outputs.
fn filter_fallback_rules(
    rules: Vec<Rule>,
    source_files: &BTreeSet<&str>,
) -> Result<Vec<Rule>> {
    let mut out = Vec::with_capacity(rules.len());
    for rule in rules {
        if !matches!(rule.mode(), RuleMode::Fallback) {
            out.push(rule);
            continue;
        }

        let (present, absent): (Vec<_>, Vec<_>) =
            rule.targets().iter().partition(|target| {
                target
                    .basename()
                    .is_some_and(|name| source_files.contains(name))
            });

        if absent.is_empty() {
            // fully shadowed by source files: the copy rules win
            debug!(rule = %rule.id(), "dropping fully-shadowed fallback rule");
            continue;
        }
        if present.is_empty() {
            out.push(rule);
            continue;
        }

        return Err(BuildError::user_full(
            rule.loc().cloned(),
            vec![
                "Some of the targets of this fallback rule are present in \
                 the source tree, and some are not. This is not allowed; \
                 either none or all of the targets must be present."
                    .to_owned(),
                format!(
                    "present: {}",
                    present
                        .iter()
                        .map(|t| t.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                format!(
                    "not present: {}",
                    absent
                        .iter()
                        .map(|t| t.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ],
            Vec::new(),
        ));
    }
    Ok(out)
}

/// Deletes everything in the build directory that is neither a live target
/// nor an allowed subdirectory.
async fn cleanup_stale_artifacts(
    engine: &Arc<EngineInner>,
    dir: &BuildPath,
    rules_here: &BTreeMap<BuildPath, Rule>,
    allowed_subdirs: &BTreeSet<String>,
) -> Result<()> {
    let abs_dir = engine.workspace.abs_build(dir);
    let Some(entries) = crate::fs::read_dir_sorted(abs_dir.clone()).await?
    else {
        return Ok(());
    };

    let live_targets: BTreeSet<&str> = rules_here
        .keys()
        .filter_map(|target| target.basename())
        .collect();

    for (name, _kind) in entries {
        if live_targets.contains(name.as_str())
            || allowed_subdirs.contains(&name)
        {
            continue;
        }
        let stale = abs_dir.join(&name);
        info!(path = %stale.display(), "removing stale artifact");
        engine.digests.invalidate(&stale);
        crate::fs::remove_all(stale).await?;
    }
    Ok(())
}

fn upgrade(engine: &Weak<EngineInner>) -> Result<Arc<EngineInner>> {
    engine.upgrade().ok_or_else(|| {
        BuildError::code("engine dropped during directory load", vec![])
    })
}
