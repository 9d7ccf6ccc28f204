//! Dependency cycles through rules and aliases surface as user errors.

use ravel::{Alias, AliasName, TreePath, error::Result};
use ravel_integration_test::{
    StaticRules, TestProject, alias_on_paths, build, rule_depending_on_alias,
};

async fn build_one(engine: &ravel::Engine, target: &str) -> Result<()> {
    let target = TreePath::Build(build(target));
    engine
        .run(async |session| {
            session.build_file(target.clone()).await.map(|_| ())
        })
        .await
}

#[tokio::test]
async fn rule_and_alias_cycle_is_reported() {
    let project = TestProject::new();

    // rule A depends on alias b; alias b depends on A's target
    let alias_b =
        Alias::new(build("default"), AliasName::new("b").unwrap());
    let rules = StaticRules::new()
        .rule(rule_depending_on_alias("default/a.out", alias_b.clone()))
        .alias(
            alias_b,
            alias_on_paths(
                vec![TreePath::Build(build("default/a.out"))],
                5,
            ),
        );
    let (engine, _) = project.engine(rules);

    let error = build_one(&engine, "default/a.out").await.unwrap_err();
    let message = error.to_string();
    assert!(message.contains("Dependency cycle"), "{message}");
    assert!(message.contains("a.out"), "{message}");
    assert!(message.contains("alias"), "{message}");
}

#[tokio::test]
async fn two_rules_depending_on_each_other() {
    use ravel::{
        Action, ActionBuilder, ActionFull, Rule, RuleInfo, RuleMode,
        SandboxConfig,
    };

    let project = TestProject::new();

    let make = |target: &str, dep: &str| {
        let target_path = build(target);
        let action_full = ActionFull::new(Action::Copy {
            src: TreePath::Build(build(dep)),
            dst: target_path.clone(),
        });
        Rule::new(
            build("default"),
            [target_path].into(),
            ActionBuilder::path(TreePath::Build(build(dep)))
                .and_then(move |()| ActionBuilder::pure(action_full.clone())),
            RuleMode::Standard,
            RuleInfo::FromRulesFile(ravel::Loc::new("rules.spec", 1)),
            Some(ravel_integration_test::ctx()),
            SandboxConfig::no_special_requirements(),
        )
        .unwrap()
    };

    let rules = StaticRules::new()
        .rule(make("default/one", "default/two"))
        .rule(make("default/two", "default/one"));
    let (engine, _) = project.engine(rules);

    let error = build_one(&engine, "default/one").await.unwrap_err();
    assert!(error.to_string().contains("Dependency cycle"), "{error}");
}
