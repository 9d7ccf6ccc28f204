//! Promotion back into the source tree, and `clean`.

use ravel::{
    Action, ActionBuilder, ActionFull, Rule, RuleInfo, RuleMode,
    SandboxConfig, TreePath,
    rules::{PromoteLifetime, PromoteSpec},
};
use ravel_integration_test::{StaticRules, TestProject, build, ctx};

fn promote_rule(target: &str, contents: &str, lifetime: PromoteLifetime) -> Rule {
    let target_path = build(target);
    let action_full = ActionFull::new(Action::WriteFile {
        target: target_path.clone(),
        contents: contents.to_owned(),
    });
    Rule::new(
        target_path.parent().unwrap(),
        [target_path].into(),
        ActionBuilder::pure(action_full),
        RuleMode::Promote(PromoteSpec { lifetime, into: None, only: None }),
        RuleInfo::FromRulesFile(ravel::Loc::new("rules.spec", 1)),
        Some(ctx()),
        SandboxConfig::no_special_requirements(),
    )
    .unwrap()
}

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
async fn promoted_file_lands_in_the_source_tree() {
    let project = TestProject::new();

    let rules = StaticRules::new().rule(promote_rule(
        "default/gen.ml",
        "let generated = true",
        PromoteLifetime::UntilClean,
    ));
    let (engine, _) = project.engine(rules);

    build_one(&engine, "default/gen.ml").await;

    assert_eq!(project.read_source("gen.ml"), "let generated = true");
    // promoted files are user-writable
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        let mode = std::fs::metadata(project.source_root.join("gen.ml"))
            .unwrap()
            .permissions()
            .mode();
        assert_ne!(mode & 0o200, 0);
    }
    // and recorded for clean
    assert!(
        project.build_root.join(".to-delete-in-source-tree").is_file()
    );
}

#[tokio::test]
async fn clean_removes_promoted_files() {
    let project = TestProject::new();

    let rules = StaticRules::new().rule(promote_rule(
        "default/gen.ml",
        "let generated = true",
        PromoteLifetime::UntilClean,
    ));
    let (engine, _) = project.engine(rules);

    build_one(&engine, "default/gen.ml").await;
    assert!(project.source_file_exists("gen.ml"));

    engine.clean().await.unwrap();
    assert!(!project.source_file_exists("gen.ml"));
}

#[tokio::test]
async fn promotion_does_not_conflict_with_its_own_source_copy() {
    let project = TestProject::new();

    let rules = StaticRules::new().rule(promote_rule(
        "default/gen.ml",
        "contents",
        PromoteLifetime::UntilClean,
    ));
    let (engine, _) = project.engine(rules);

    // first build promotes gen.ml into the source tree; the second build
    // must not treat the promoted file as a conflicting source file
    build_one(&engine, "default/gen.ml").await;
    build_one(&engine, "default/gen.ml").await;

    assert_eq!(project.read_source("gen.ml"), "contents");
}

#[tokio::test]
async fn unchanged_promoted_file_is_not_rewritten() {
    let project = TestProject::new();

    let rules = StaticRules::new().rule(promote_rule(
        "default/gen.ml",
        "stable",
        PromoteLifetime::Unlimited,
    ));
    let (engine, _) = project.engine(rules);

    build_one(&engine, "default/gen.ml").await;
    let mtime_before = std::fs::metadata(project.source_root.join("gen.ml"))
        .unwrap()
        .modified()
        .unwrap();

    build_one(&engine, "default/gen.ml").await;
    let mtime_after = std::fs::metadata(project.source_root.join("gen.ml"))
        .unwrap()
        .modified()
        .unwrap();

    assert_eq!(mtime_before, mtime_after);
}
