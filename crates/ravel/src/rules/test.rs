use super::*;
use crate::action::{Action, ActionFull};

fn dir() -> BuildPath {
    BuildPath::new("default").unwrap()
}

fn simple_rule(target: &str) -> Rule {
    let target = BuildPath::new(target).unwrap();
    Rule::new(
        dir(),
        [target.clone()].into(),
        ActionBuilder::pure(ActionFull::new(Action::WriteFile {
            target,
            contents: String::new(),
        })),
        RuleMode::Standard,
        RuleInfo::Internal,
        None,
        SandboxConfig::no_special_requirements(),
    )
    .unwrap()
}

#[test]
fn rule_identity_is_per_instance() {
    let a = simple_rule("default/x");
    let b = simple_rule("default/x");
    assert_ne!(a, b);
    assert_eq!(a, a.clone());
}

#[test]
fn rule_targets_must_be_in_dir() {
    let result = Rule::new(
        dir(),
        [BuildPath::new("other/x").unwrap()].into(),
        ActionBuilder::pure(ActionFull::new(Action::Echo {
            message: String::new(),
        })),
        RuleMode::Standard,
        RuleInfo::Internal,
        None,
        SandboxConfig::no_special_requirements(),
    );
    assert!(result.is_err());
}

#[test]
fn rule_needs_targets() {
    let result = Rule::new(
        dir(),
        BTreeSet::new(),
        ActionBuilder::pure(ActionFull::new(Action::Echo {
            message: String::new(),
        })),
        RuleMode::Standard,
        RuleInfo::Internal,
        None,
        SandboxConfig::no_special_requirements(),
    );
    assert!(result.is_err());
}

#[test]
fn head_target_is_smallest() {
    let a = BuildPath::new("default/a").unwrap();
    let z = BuildPath::new("default/z").unwrap();
    let rule = Rule::new(
        dir(),
        [z, a.clone()].into(),
        ActionBuilder::pure(ActionFull::new(Action::Echo {
            message: String::new(),
        })),
        RuleMode::Standard,
        RuleInfo::Internal,
        None,
        SandboxConfig::no_special_requirements(),
    )
    .unwrap();
    assert_eq!(rule.head_target(), &a);
}

#[test]
fn union_is_disjoint_and_preserves_everything() {
    let rule_a = simple_rule("default/a");
    let rule_b = simple_rule("default/b");

    let combined =
        Rules::of_rule(rule_a.clone()).union(Rules::of_rule(rule_b.clone()));
    let consumed = combined.dir_rules(&dir()).unwrap().consume();

    assert_eq!(consumed.rules.len(), 2);
    assert!(consumed.rules.contains(&rule_a));
    assert!(consumed.rules.contains(&rule_b));
}

#[test]
fn alias_contributions_accumulate_in_order() {
    let alias = Alias::all(dir());
    let mut rules = Rules::new();

    for i in 0..3 {
        rules.add_alias_contribution(
            alias.clone(),
            AliasContribution {
                loc: Some(Loc::new("rules", i)),
                expansion: ActionBuilder::pure(()),
            },
        );
    }

    let consumed = rules.dir_rules(&dir()).unwrap().consume();
    let contributions = &consumed.aliases[&AliasName::all()];
    assert_eq!(contributions.len(), 3);
    let lines: Vec<u32> =
        contributions.iter().map(|c| c.loc.as_ref().unwrap().line).collect();
    assert_eq!(lines, vec![0, 1, 2]);
}

#[tokio::test]
async fn collector_unions_produced_rules() {
    let (value, rules) = crate::memo::collect::collect(
        async |collector: &RulesCollector| {
            produce_rule(collector, simple_rule("default/one"));
            produce_rule(collector, simple_rule("default/two"));
            Ok(42)
        },
    )
    .await
    .unwrap();

    assert_eq!(value, 42);
    assert_eq!(rules.dir_rules(&dir()).unwrap().consume().rules.len(), 2);
}
