//! Shared-cache restore and sandboxed execution.

use std::sync::Arc;

use ravel::{
    EngineOptions, SandboxConfig, TreePath,
    shared_cache::FsSharedCache,
};
use ravel_integration_test::{
    StaticRules, TestProject, build, write_rule,
};

async fn build_one(engine: &ravel::Engine, target: &str) {
    let target = TreePath::Build(build(target));
    engine
        .run(async |session| {
            session.build_file(target.clone()).await.map(|_| ())
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn artifacts_are_restored_from_the_shared_cache() {
    let project = TestProject::new();
    let cache_dir = tempfile::TempDir::new().unwrap();

    // first build populates the cache
    {
        let rules =
            StaticRules::new().rule(write_rule("default/out.txt", "cached"));
        let (engine, interpreter) = project.engine_with(
            rules,
            EngineOptions::default(),
            Some(Arc::new(FsSharedCache::new(cache_dir.path()))),
        );
        build_one(&engine, "default/out.txt").await;
        assert_eq!(interpreter.executions(), 1);
    }

    // wipe the whole build tree, including the trace database
    std::fs::remove_dir_all(&project.build_root).unwrap();

    // a fresh engine restores from the cache without running the action
    let rules =
        StaticRules::new().rule(write_rule("default/out.txt", "cached"));
    let (engine, interpreter) = project.engine_with(
        rules,
        EngineOptions::default(),
        Some(Arc::new(FsSharedCache::new(cache_dir.path()))),
    );
    build_one(&engine, "default/out.txt").await;

    assert_eq!(interpreter.executions(), 0);
    assert_eq!(project.read_build("default/out.txt"), "cached");
}

#[cfg(unix)]
#[tokio::test]
async fn sandboxed_rule_sees_only_declared_deps() {
    use ravel::{
        Action, ActionBuilder, ActionFull, Rule, RuleInfo, RuleMode,
    };

    let project = TestProject::new();
    project.write_source("declared.txt", "declared contents");
    project.write_source("undeclared.txt", "should be invisible");

    let make_rule = |target: &str, read: &str| {
        let target_path = build(target);
        let action_full = ActionFull::new(Action::Run {
            program: "sh".to_owned(),
            args: vec![
                "-c".to_owned(),
                format!("cat {read} > {}", target_path.basename().unwrap()),
            ],
        });
        Rule::new(
            build("default"),
            [target_path].into(),
            ActionBuilder::path(TreePath::Build(build("default/declared.txt")))
                .and_then(move |()| ActionBuilder::pure(action_full.clone())),
            RuleMode::Standard,
            RuleInfo::FromRulesFile(ravel::Loc::new("rules.spec", 1)),
            Some(ravel_integration_test::ctx()),
            SandboxConfig::needs_sandboxing(),
        )
        .unwrap()
    };

    // reading the declared dep works inside the sandbox
    {
        let rules =
            StaticRules::new().rule(make_rule("default/ok.txt", "declared.txt"));
        let (engine, _) = project.engine(rules);
        build_one(&engine, "default/ok.txt").await;
        assert_eq!(project.read_build("default/ok.txt"), "declared contents");
    }

    // reading an undeclared file fails: it was never materialized
    {
        let rules = StaticRules::new()
            .rule(make_rule("default/bad.txt", "undeclared.txt"));
        let (engine, _) = project.engine(rules);
        let target = TreePath::Build(build("default/bad.txt"));
        let error = engine
            .run(async |session| {
                session.build_file(target.clone()).await.map(|_| ())
            })
            .await
            .unwrap_err();
        assert!(error.is_user_error(), "{error}");
    }
}

#[tokio::test]
async fn stale_artifacts_are_cleaned_up() {
    let project = TestProject::new();

    // a file in the build dir that no rule produces
    std::fs::create_dir_all(project.build_root.join("default")).unwrap();
    std::fs::write(
        project.build_root.join("default/stale.txt"),
        "left over from an old rule",
    )
    .unwrap();

    let rules =
        StaticRules::new().rule(write_rule("default/live.txt", "live"));
    let (engine, _) = project.engine(rules);
    build_one(&engine, "default/live.txt").await;

    assert!(!project.build_file_exists("default/stale.txt"));
    assert!(project.build_file_exists("default/live.txt"));
}
