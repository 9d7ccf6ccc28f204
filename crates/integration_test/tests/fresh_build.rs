//! Fresh builds, trace hits, and input-change propagation.

use ravel::{TreePath, error::Result};
use ravel_integration_test::{StaticRules, TestProject, build, copy_rule};

async fn build_one(
    engine: &ravel::Engine,
    target: &str,
) -> Result<ravel::Digest> {
    let target = TreePath::Build(build(target));
    engine
        .run(async |session| session.build_file(target.clone()).await)
        .await
}

#[tokio::test]
async fn fresh_build_of_one_rule() {
    let project = TestProject::new();
    project.write_source("a.txt", "hi");

    let rules =
        StaticRules::new().rule(copy_rule("default/a.txt", "default/b.txt"));
    let (engine, interpreter) = project.engine(rules);

    build_one(&engine, "default/b.txt").await.unwrap();

    assert_eq!(project.read_build("default/b.txt"), "hi");
    // two actions: the source-file copy of a.txt, then the rule itself
    assert_eq!(interpreter.executions(), 2);
    // the trace database was dumped at end of run
    assert!(project.build_root.join(".db").is_file());
}

#[tokio::test]
async fn second_build_hits_the_trace() {
    let project = TestProject::new();
    project.write_source("a.txt", "hi");

    let rules =
        StaticRules::new().rule(copy_rule("default/a.txt", "default/b.txt"));
    let (engine, interpreter) = project.engine(rules);

    build_one(&engine, "default/b.txt").await.unwrap();
    let after_first = interpreter.executions();

    build_one(&engine, "default/b.txt").await.unwrap();

    assert_eq!(interpreter.executions(), after_first);
    assert_eq!(project.read_build("default/b.txt"), "hi");
}

#[tokio::test]
async fn trace_survives_engine_restart() {
    let project = TestProject::new();
    project.write_source("a.txt", "hi");

    {
        let rules = StaticRules::new()
            .rule(copy_rule("default/a.txt", "default/b.txt"));
        let (engine, _) = project.engine(rules);
        build_one(&engine, "default/b.txt").await.unwrap();
    }

    // a fresh engine, as a new process would have
    let rules =
        StaticRules::new().rule(copy_rule("default/a.txt", "default/b.txt"));
    let (engine, interpreter) = project.engine(rules);
    build_one(&engine, "default/b.txt").await.unwrap();

    assert_eq!(interpreter.executions(), 0);
}

#[tokio::test]
async fn input_change_reruns_the_action() {
    let project = TestProject::new();
    project.write_source("a.txt", "hi");

    let rules =
        StaticRules::new().rule(copy_rule("default/a.txt", "default/b.txt"));
    let (engine, interpreter) = project.engine(rules);

    build_one(&engine, "default/b.txt").await.unwrap();
    assert_eq!(project.read_build("default/b.txt"), "hi");
    let after_first = interpreter.executions();

    project.write_source("a.txt", "bye");
    build_one(&engine, "default/b.txt").await.unwrap();

    assert_eq!(project.read_build("default/b.txt"), "bye");
    assert!(interpreter.executions() > after_first);
}

#[tokio::test]
async fn building_twice_within_a_run_is_memoized() {
    let project = TestProject::new();
    project.write_source("a.txt", "hi");

    let rules =
        StaticRules::new().rule(copy_rule("default/a.txt", "default/b.txt"));
    let (engine, interpreter) = project.engine(rules);

    let target = TreePath::Build(build("default/b.txt"));
    engine
        .run(async |session| {
            let first = session.build_file(target.clone()).await?;
            let second = session.build_file(target.clone()).await?;
            assert_eq!(first, second);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(interpreter.executions(), 2);
}

#[tokio::test]
async fn missing_rule_is_a_user_error() {
    let project = TestProject::new();
    let (engine, _) = project.engine(StaticRules::new());

    let error = build_one(&engine, "default/ghost.txt").await.unwrap_err();
    assert!(error.to_string().contains("No rule found"), "{error}");
}

#[tokio::test]
async fn universe_dep_reruns_every_run() {
    use ravel::{
        Action, ActionBuilder, ActionFull, Rule, RuleInfo, RuleMode,
        SandboxConfig,
    };

    let project = TestProject::new();

    let target = build("default/stamp.txt");
    let action_full = ActionFull::new(Action::WriteFile {
        target: target.clone(),
        contents: "stamp".to_owned(),
    });
    let rule = Rule::new(
        build("default"),
        [target].into(),
        ActionBuilder::universe()
            .and_then(move |()| ActionBuilder::pure(action_full.clone())),
        RuleMode::Standard,
        RuleInfo::Internal,
        Some(ravel_integration_test::ctx()),
        SandboxConfig::no_special_requirements(),
    )
    .unwrap();

    let (engine, interpreter) =
        project.engine(StaticRules::new().rule(rule));

    build_one(&engine, "default/stamp.txt").await.unwrap();
    build_one(&engine, "default/stamp.txt").await.unwrap();

    assert_eq!(interpreter.executions(), 2);
}
