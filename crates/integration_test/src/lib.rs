//! Shared fixtures for ravel's end-to-end tests.
//!
//! Provides a throwaway project on disk, a rule generator serving a fixed
//! rule set, and an interpreter wrapper that counts executions so tests can
//! assert "no action ran".

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use futures::future::BoxFuture;
use ravel::{
    Action, ActionBuilder, ActionFull, Alias, BuildPath, ContextName, Engine,
    EngineConfig, EngineOptions, Rule, RuleInfo, RuleMode, SandboxConfig,
    SourcePath, TreePath,
    action::{ActionInterpreter, BasicInterpreter, BuildDeps, ExecContext},
    engine::{GenRulesTarget, RuleGenerator},
    error::Result,
    rules::{AliasContribution, RulesCollector, produce_alias, produce_rule},
    shared_cache::SharedCache,
    source_tree::FsSourceTree,
};
use tempfile::TempDir;

// ============================================================================
// Rule generator fixture
// ============================================================================

/// A rule generator serving a fixed set of rules and alias contributions.
#[derive(Default)]
pub struct StaticRules {
    rules: Vec<Rule>,
    aliases: Vec<(Alias, AliasContribution)>,
    subdirs: HashMap<BuildPath, BTreeSet<String>>,
}

impl StaticRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn alias(
        mut self,
        alias: Alias,
        contribution: AliasContribution,
    ) -> Self {
        self.aliases.push((alias, contribution));
        self
    }

    pub fn keep_subdir(mut self, dir: &BuildPath, name: &str) -> Self {
        self.subdirs
            .entry(dir.clone())
            .or_default()
            .insert(name.to_owned());
        self
    }
}

impl RuleGenerator for StaticRules {
    fn gen_rules<'a>(
        &'a self,
        target: &'a GenRulesTarget,
        collector: &'a RulesCollector,
    ) -> BoxFuture<'a, Result<Option<BTreeSet<String>>>> {
        Box::pin(async move {
            for rule in &self.rules {
                if rule.dir() == &target.dir {
                    produce_rule(collector, rule.clone());
                }
            }
            for (alias, contribution) in &self.aliases {
                if alias.dir == target.dir {
                    produce_alias(
                        collector,
                        alias.clone(),
                        contribution.clone(),
                    );
                }
            }
            Ok(Some(
                self.subdirs.get(&target.dir).cloned().unwrap_or_default(),
            ))
        })
    }
}

// ============================================================================
// Counting interpreter
// ============================================================================

/// Wraps the basic interpreter, counting how many actions actually ran.
#[derive(Debug, Default)]
pub struct CountingInterpreter {
    inner: BasicInterpreter,
    executions: AtomicUsize,
}

impl CountingInterpreter {
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

impl ActionInterpreter for CountingInterpreter {
    fn exec<'a>(
        &'a self,
        ctx: &'a ExecContext,
        action: &'a Action,
        build_deps: BuildDeps<'a>,
    ) -> BoxFuture<'a, Result<ravel::action::ExecResult>> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.inner.exec(ctx, action, build_deps)
    }
}

// ============================================================================
// Project fixture
// ============================================================================

/// A throwaway source tree plus build root.
pub struct TestProject {
    _dir: TempDir,
    pub source_root: PathBuf,
    pub build_root: PathBuf,
}

impl TestProject {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let source_root = dir.path().join("project");
        let build_root = source_root.join("_build");
        std::fs::create_dir_all(&source_root).unwrap();
        Self { _dir: dir, source_root, build_root }
    }

    pub fn write_source(&self, rel: &str, contents: &str) {
        let path = self.source_root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    pub fn remove_source(&self, rel: &str) {
        std::fs::remove_file(self.source_root.join(rel)).unwrap();
    }

    pub fn read_build(&self, rel: &str) -> String {
        std::fs::read_to_string(self.build_root.join(rel)).unwrap()
    }

    pub fn build_file_exists(&self, rel: &str) -> bool {
        self.build_root.join(rel).is_file()
    }

    pub fn read_source(&self, rel: &str) -> String {
        std::fs::read_to_string(self.source_root.join(rel)).unwrap()
    }

    pub fn source_file_exists(&self, rel: &str) -> bool {
        self.source_root.join(rel).is_file()
    }

    /// An engine over this project with a counting interpreter.
    pub fn engine(
        &self,
        rules: StaticRules,
    ) -> (Engine, Arc<CountingInterpreter>) {
        self.engine_with(rules, EngineOptions::default(), None)
    }

    pub fn engine_with(
        &self,
        rules: StaticRules,
        options: EngineOptions,
        shared_cache: Option<Arc<dyn SharedCache>>,
    ) -> (Engine, Arc<CountingInterpreter>) {
        let interpreter = Arc::new(CountingInterpreter::default());
        let engine = Engine::new(EngineConfig {
            source_root: self.source_root.clone(),
            build_root: self.build_root.clone(),
            rule_generator: Arc::new(rules),
            interpreter: Arc::clone(&interpreter) as Arc<dyn ActionInterpreter>,
            source_tree: Arc::new(FsSourceTree::new(&self.source_root)),
            shared_cache,
            options,
        });
        (engine, interpreter)
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Rule construction helpers
// ============================================================================

pub fn ctx() -> ContextName {
    ContextName::new("default").unwrap()
}

pub fn build(rel: &str) -> BuildPath {
    BuildPath::new(rel).unwrap()
}

pub fn source(rel: &str) -> SourcePath {
    SourcePath::new(rel).unwrap()
}

fn rule_with_mode(
    dir: &str,
    targets: &[&str],
    deps: Vec<TreePath>,
    action: Action,
    mode: RuleMode,
    loc_line: u32,
) -> Rule {
    let action_full = ActionFull::new(action);
    let builder = ActionBuilder::paths(deps)
        .and_then(move |()| ActionBuilder::pure(action_full.clone()));

    Rule::new(
        build(dir),
        targets.iter().map(|t| build(t)).collect(),
        builder,
        mode,
        RuleInfo::FromRulesFile(ravel::Loc::new("rules.spec", loc_line)),
        Some(ctx()),
        SandboxConfig::no_special_requirements(),
    )
    .unwrap()
}

/// A rule copying one in-build file to another.
pub fn copy_rule(src: &str, dst: &str) -> Rule {
    let dst_path = build(dst);
    rule_with_mode(
        dst_path.parent().unwrap().rel().as_str(),
        &[dst],
        vec![TreePath::Build(build(src))],
        Action::Copy { src: TreePath::Build(build(src)), dst: dst_path },
        RuleMode::Standard,
        1,
    )
}

/// A rule writing fixed contents to a target, with no dependencies.
pub fn write_rule(target: &str, contents: &str) -> Rule {
    write_rule_at(target, contents, RuleMode::Standard, 1)
}

pub fn write_rule_at(
    target: &str,
    contents: &str,
    mode: RuleMode,
    loc_line: u32,
) -> Rule {
    let target_path = build(target);
    rule_with_mode(
        target_path.parent().unwrap().rel().as_str(),
        &[target],
        vec![],
        Action::WriteFile {
            target: target_path,
            contents: contents.to_owned(),
        },
        mode,
        loc_line,
    )
}

/// A multi-target rule writing fixed contents to each target.
pub fn multi_write_rule(targets: &[&str], mode: RuleMode) -> Rule {
    let dir = build(targets[0]).parent().unwrap();
    let actions = targets
        .iter()
        .map(|t| Action::WriteFile {
            target: build(t),
            contents: format!("generated {t}"),
        })
        .collect();
    rule_with_mode(
        dir.rel().as_str(),
        targets,
        vec![],
        Action::Progn(actions),
        mode,
        1,
    )
}

/// A rule whose action depends on an alias.
pub fn rule_depending_on_alias(target: &str, alias: Alias) -> Rule {
    let target_path = build(target);
    let action_full = ActionFull::new(Action::WriteFile {
        target: target_path.clone(),
        contents: "built after alias".to_owned(),
    });
    let builder = ActionBuilder::dep_on_alias(alias)
        .and_then(move |()| ActionBuilder::pure(action_full.clone()));

    Rule::new(
        target_path.parent().unwrap(),
        [target_path].into(),
        builder,
        RuleMode::Standard,
        RuleInfo::FromRulesFile(ravel::Loc::new("rules.spec", 1)),
        Some(ctx()),
        SandboxConfig::no_special_requirements(),
    )
    .unwrap()
}

/// An alias contribution depending on the given files.
pub fn alias_on_paths(paths: Vec<TreePath>, loc_line: u32) -> AliasContribution {
    AliasContribution {
        loc: Some(ravel::Loc::new("rules.spec", loc_line)),
        expansion: ActionBuilder::paths(paths),
    }
}
