//! The rule data model and the `Rules` container.
//!
//! A [`Rule`] is an immutable declaration: a set of targets in one build
//! directory, an action builder producing the action, a mode, and
//! provenance. [`Rules`] maps build directories to their contributions
//! (plain rules and alias expansions) and is the implicit output produced by
//! rule generators (see [`crate::memo::collect`]).

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{
    action::ActionFull,
    action_builder::ActionBuilder,
    alias::{Alias, AliasName},
    deps::Predicate,
    error::{BuildError, Loc, Result},
    memo::collect::{Collector, ImplicitOutput},
    path::{BuildPath, ContextName, RelPath, SourcePath},
    sandbox::SandboxConfig,
};

/// Unique identity of a rule instance within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleId(u64);

impl RuleId {
    fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule#{}", self.0)
    }
}

/// Where a rule came from, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleInfo {
    /// Declared in the user's rules file at this location.
    FromRulesFile(Loc),
    /// Synthesized by the engine or a generator.
    Internal,
    /// The implicit rule copying a source file into the build tree.
    SourceFileCopy(SourcePath),
}

impl RuleInfo {
    /// The user-facing location, when there is one.
    #[must_use]
    pub fn loc(&self) -> Option<&Loc> {
        match self {
            Self::FromRulesFile(loc) => Some(loc),
            Self::Internal | Self::SourceFileCopy(_) => None,
        }
    }

    /// Renders the provenance for conflict diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::FromRulesFile(loc) => format!("the rule at {loc}"),
            Self::Internal => "an internal rule".to_owned(),
            Self::SourceFileCopy(src) => {
                format!("the copy of the source file {src}")
            }
        }
    }
}

/// How long a promoted file stays promoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PromoteLifetime {
    /// Kept until the user deletes it.
    Unlimited,
    /// Recorded for removal by `clean`.
    UntilClean,
}

/// Configuration of a promotion rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoteSpec {
    pub lifetime: PromoteLifetime,
    /// Subdirectory of the rule's source directory to promote into.
    pub into: Option<RelPath>,
    /// Only targets matching this predicate are promoted.
    pub only: Option<Predicate>,
}

/// Execution mode of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleMode {
    /// The normal mode: the rule's targets must not exist in the source
    /// tree.
    Standard,
    /// The rule is dropped when all of its targets already exist as source
    /// files (the copy rules win).
    Fallback,
    /// After building, targets are copied back into the source tree.
    Promote(PromoteSpec),
    /// Source files with the same names are ignored rather than copied.
    IgnoreSourceFiles,
}

struct RuleInner {
    id: RuleId,
    dir: BuildPath,
    targets: BTreeSet<BuildPath>,
    action: ActionBuilder<ActionFull>,
    mode: RuleMode,
    info: RuleInfo,
    context: Option<ContextName>,
    sandbox: SandboxConfig,
}

/// An immutable build rule. Cheap to clone; equality is identity.
#[derive(Clone)]
pub struct Rule {
    inner: Arc<RuleInner>,
}

impl Rule {
    /// Creates a rule after checking the target invariant: the target set
    /// is non-empty and every target lies directly in `dir`.
    ///
    /// # Errors
    ///
    /// Violations are code errors; rule producers construct targets from
    /// the directory they are generating for.
    pub fn new(
        dir: BuildPath,
        targets: BTreeSet<BuildPath>,
        action: ActionBuilder<ActionFull>,
        mode: RuleMode,
        info: RuleInfo,
        context: Option<ContextName>,
        sandbox: SandboxConfig,
    ) -> Result<Self> {
        if targets.is_empty() {
            return Err(BuildError::code(
                "rule with no targets",
                vec![("dir".into(), dir.to_string())],
            ));
        }
        for target in &targets {
            if target.parent().as_ref() != Some(&dir) {
                return Err(BuildError::code(
                    "rule target is not directly inside the rule directory",
                    vec![
                        ("dir".into(), dir.to_string()),
                        ("target".into(), target.to_string()),
                    ],
                ));
            }
        }
        Ok(Self {
            inner: Arc::new(RuleInner {
                id: RuleId::fresh(),
                dir,
                targets,
                action,
                mode,
                info,
                context,
                sandbox,
            }),
        })
    }

    #[must_use]
    pub fn id(&self) -> RuleId {
        self.inner.id
    }

    #[must_use]
    pub fn dir(&self) -> &BuildPath {
        &self.inner.dir
    }

    #[must_use]
    pub fn targets(&self) -> &BTreeSet<BuildPath> {
        &self.inner.targets
    }

    /// The representative target keying the trace database entry.
    #[must_use]
    pub fn head_target(&self) -> &BuildPath {
        self.inner
            .targets
            .first()
            .expect("rules always have at least one target")
    }

    #[must_use]
    pub fn action(&self) -> &ActionBuilder<ActionFull> {
        &self.inner.action
    }

    #[must_use]
    pub fn mode(&self) -> &RuleMode {
        &self.inner.mode
    }

    #[must_use]
    pub fn info(&self) -> &RuleInfo {
        &self.inner.info
    }

    #[must_use]
    pub fn context(&self) -> Option<&ContextName> {
        self.inner.context.as_ref()
    }

    #[must_use]
    pub fn sandbox(&self) -> SandboxConfig {
        self.inner.sandbox
    }

    #[must_use]
    pub fn loc(&self) -> Option<&Loc> {
        self.inner.info.loc()
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Rule {}

impl std::hash::Hash for Rule {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.inner.id)
            .field("dir", &self.inner.dir)
            .field("targets", &self.inner.targets)
            .field("mode", &self.inner.mode)
            .finish_non_exhaustive()
    }
}

/// One appended expansion of an alias.
#[derive(Debug, Clone)]
pub struct AliasContribution {
    pub loc: Option<Loc>,
    /// Evaluating the builder declares the expansion's dependencies.
    pub expansion: ActionBuilder<()>,
}

/// A contribution to one directory: a rule or an alias expansion.
#[derive(Debug, Clone)]
enum Contribution {
    Rule(Rule),
    Alias { name: AliasName, contribution: AliasContribution },
}

/// The contributions of one build directory, keyed by id.
///
/// Ids are globally unique, which is what makes [`Rules::union`] disjoint
/// by construction.
#[derive(Debug, Clone, Default)]
pub struct DirRules {
    by_id: BTreeMap<RuleId, Contribution>,
}

/// The result of consuming a [`DirRules`]: plain rules and alias expansion
/// lists, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ConsumedDirRules {
    pub rules: Vec<Rule>,
    pub aliases: BTreeMap<AliasName, Vec<AliasContribution>>,
}

impl DirRules {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Partitions contributions into rules and alias expansions.
    #[must_use]
    pub fn consume(&self) -> ConsumedDirRules {
        let mut out = ConsumedDirRules::default();
        for contribution in self.by_id.values() {
            match contribution {
                Contribution::Rule(rule) => out.rules.push(rule.clone()),
                Contribution::Alias { name, contribution } => out
                    .aliases
                    .entry(name.clone())
                    .or_default()
                    .push(contribution.clone()),
            }
        }
        out
    }
}

/// Rules and alias expansions grouped by build directory.
#[derive(Debug, Clone, Default)]
pub struct Rules {
    dirs: BTreeMap<BuildPath, DirRules>,
}

impl Rules {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A container holding a single rule.
    #[must_use]
    pub fn of_rule(rule: Rule) -> Self {
        let mut rules = Self::new();
        rules.add_rule(rule);
        rules
    }

    /// Adds a rule under its directory.
    pub fn add_rule(&mut self, rule: Rule) {
        let dir = rule.dir().clone();
        self.dirs
            .entry(dir)
            .or_default()
            .by_id
            .insert(rule.id(), Contribution::Rule(rule));
    }

    /// Appends an alias expansion. Append-only: expansions accumulate in
    /// insertion order, and the alias's value is their union.
    pub fn add_alias_contribution(
        &mut self,
        alias: Alias,
        contribution: AliasContribution,
    ) {
        self.dirs.entry(alias.dir).or_default().by_id.insert(
            RuleId::fresh(),
            Contribution::Alias { name: alias.name, contribution },
        );
    }

    /// The contributions of one directory.
    #[must_use]
    pub fn dir_rules(&self, dir: &BuildPath) -> Option<&DirRules> {
        self.dirs.get(dir)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// Directories that have contributions.
    pub fn dirs(&self) -> impl Iterator<Item = &BuildPath> {
        self.dirs.keys()
    }
}

impl ImplicitOutput for Rules {
    fn empty() -> Self {
        Self::new()
    }

    fn union(mut self, other: Self) -> Self {
        for (dir, dir_rules) in other.dirs {
            let target = self.dirs.entry(dir).or_default();
            for (id, contribution) in dir_rules.by_id {
                let previous = target.by_id.insert(id, contribution);
                assert!(
                    previous.is_none(),
                    "two Rules values claim the same contribution id {id}"
                );
            }
        }
        self
    }
}

/// The producer-side handle rule generators receive.
pub type RulesCollector = Collector<Rules>;

/// Produces one rule into a collector.
pub fn produce_rule(collector: &RulesCollector, rule: Rule) {
    collector.produce(Rules::of_rule(rule));
}

/// Produces one alias expansion into a collector.
pub fn produce_alias(
    collector: &RulesCollector,
    alias: Alias,
    contribution: AliasContribution,
) {
    let mut rules = Rules::new();
    rules.add_alias_contribution(alias, contribution);
    collector.produce(rules);
}

#[cfg(test)]
mod test;
