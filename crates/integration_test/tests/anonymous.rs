//! Anonymous actions: synthesized rules keyed by their action digest.

use std::collections::BTreeMap;

use ravel::{
    Action, DepSet, TreePath,
    rule_executor::AnonymousActionSpec,
};
use ravel_integration_test::{StaticRules, TestProject, build};

fn echo_spec(message: &str) -> AnonymousActionSpec {
    AnonymousActionSpec {
        action: Action::Echo { message: message.to_owned() },
        env: BTreeMap::new(),
        deps: DepSet::new(),
        capture_stdout: true,
        attached_to_alias: false,
    }
}

#[tokio::test]
async fn anonymous_action_writes_its_target() {
    let project = TestProject::new();
    let (engine, _) = project.engine(StaticRules::new());

    let (target, _digest) = engine
        .run(async |session| {
            session.run_anonymous_action(echo_spec("captured output")).await
        })
        .await
        .unwrap();

    let abs = project.build_root.join(target.rel().as_str());
    assert!(abs.starts_with(project.build_root.join(".actions")));
    assert_eq!(std::fs::read_to_string(abs).unwrap(), "captured output");
}

#[tokio::test]
async fn same_spec_shares_one_execution() {
    let project = TestProject::new();
    let (engine, interpreter) = project.engine(StaticRules::new());

    engine
        .run(async |session| {
            let first =
                session.run_anonymous_action(echo_spec("shared")).await?;
            let second =
                session.run_anonymous_action(echo_spec("shared")).await?;
            assert_eq!(first, second);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(interpreter.executions(), 1);
}

#[tokio::test]
async fn different_specs_have_different_targets() {
    let project = TestProject::new();
    let (engine, _) = project.engine(StaticRules::new());

    let (a, b) = engine
        .run(async |session| {
            let a = session.run_anonymous_action(echo_spec("one")).await?;
            let b = session.run_anonymous_action(echo_spec("two")).await?;
            Ok((a, b))
        })
        .await
        .unwrap();

    assert_ne!(a.0, b.0);
}

#[tokio::test]
async fn anonymous_action_with_a_dependency() {
    use ravel::Dep;

    let project = TestProject::new();
    project.write_source("data.txt", "payload");
    let (engine, _) = project.engine(StaticRules::new());

    let spec = AnonymousActionSpec {
        action: Action::Echo { message: "depends on data".to_owned() },
        env: BTreeMap::new(),
        deps: DepSet::new()
            .with(Dep::File(TreePath::Build(build("default/data.txt")))),
        capture_stdout: true,
        attached_to_alias: false,
    };

    engine
        .run(async |session| session.run_anonymous_action(spec.clone()).await)
        .await
        .unwrap();

    // demanding the dep built the copy of the source file
    assert!(project.build_file_exists("default/data.txt"));
}
