//! Rule conflict diagnostics from the directory loader.

use ravel::{TreePath, error::Result};
use ravel_integration_test::{
    StaticRules, TestProject, build, write_rule_at,
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
async fn duplicate_targets_report_both_rules() {
    let project = TestProject::new();

    let rules = StaticRules::new()
        .rule(write_rule_at(
            "default/t",
            "from rule one",
            ravel::RuleMode::Standard,
            3,
        ))
        .rule(write_rule_at(
            "default/t",
            "from rule two",
            ravel::RuleMode::Standard,
            7,
        ));
    let (engine, _) = project.engine(rules);

    let error = build_one(&engine, "default/t").await.unwrap_err();
    let message = error.to_string();

    assert!(message.contains("Multiple rules produce"), "{message}");
    assert!(message.contains("rules.spec:3"), "{message}");
    assert!(message.contains("rules.spec:7"), "{message}");
}

#[tokio::test]
async fn target_shadowing_a_source_file_is_a_conflict() {
    let project = TestProject::new();
    // the source file spawns a copy rule for default/t, conflicting with
    // the explicit rule
    project.write_source("t", "source version");

    let rules = StaticRules::new().rule(write_rule_at(
        "default/t",
        "generated version",
        ravel::RuleMode::Standard,
        1,
    ));
    let (engine, _) = project.engine(rules);

    let error = build_one(&engine, "default/t").await.unwrap_err();
    assert!(
        error.to_string().contains("Multiple rules produce"),
        "{error}"
    );
}

#[tokio::test]
async fn target_colliding_with_source_directory_name() {
    let project = TestProject::new();
    project.write_source("sub/inner.txt", "x");

    let rules = StaticRules::new().rule(write_rule_at(
        "default/sub",
        "clashes with a directory",
        ravel::RuleMode::Standard,
        1,
    ));
    let (engine, _) = project.engine(rules);

    let error = build_one(&engine, "default/sub").await.unwrap_err();
    assert!(
        error.to_string().contains("directory with the same name"),
        "{error}"
    );
}

#[tokio::test]
async fn ignore_source_files_mode_wins_over_copy_rule() {
    let project = TestProject::new();
    project.write_source("gen.txt", "stale source version");

    let rules = StaticRules::new().rule(write_rule_at(
        "default/gen.txt",
        "generated version",
        ravel::RuleMode::IgnoreSourceFiles,
        1,
    ));
    let (engine, _) = project.engine(rules);

    build_one(&engine, "default/gen.txt").await.unwrap();
    assert_eq!(project.read_build("default/gen.txt"), "generated version");
}
