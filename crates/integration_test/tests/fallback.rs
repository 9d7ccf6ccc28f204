//! Fallback-mode rules: dropped when fully shadowed by source files, kept
//! when not shadowed at all, rejected in between.

use ravel::{RuleMode, TreePath, error::Result};
use ravel_integration_test::{
    StaticRules, TestProject, build, multi_write_rule, write_rule_at,
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
async fn fallback_rule_runs_when_source_is_absent() {
    let project = TestProject::new();

    let rules = StaticRules::new().rule(write_rule_at(
        "default/x.out",
        "generated",
        RuleMode::Fallback,
        1,
    ));
    let (engine, interpreter) = project.engine(rules);

    build_one(&engine, "default/x.out").await.unwrap();
    assert_eq!(project.read_build("default/x.out"), "generated");
    assert_eq!(interpreter.executions(), 1);
}

#[tokio::test]
async fn fallback_rule_is_shadowed_by_the_source_file() {
    let project = TestProject::new();
    project.write_source("x.out", "from the source tree");

    let rules = StaticRules::new().rule(write_rule_at(
        "default/x.out",
        "generated",
        RuleMode::Fallback,
        1,
    ));
    let (engine, _) = project.engine(rules);

    build_one(&engine, "default/x.out").await.unwrap();
    // the copy rule won
    assert_eq!(project.read_build("default/x.out"), "from the source tree");
}

#[tokio::test]
async fn partially_shadowed_fallback_rule_is_an_error() {
    let project = TestProject::new();
    // only one of the two targets exists as a source file
    project.write_source("x.out", "from the source tree");

    let rules = StaticRules::new().rule(multi_write_rule(
        &["default/x.out", "default/y.out"],
        RuleMode::Fallback,
    ));
    let (engine, _) = project.engine(rules);

    let error = build_one(&engine, "default/y.out").await.unwrap_err();
    let message = error.to_string();
    assert!(message.contains("present"), "{message}");
    assert!(message.contains("not"), "{message}");
}
