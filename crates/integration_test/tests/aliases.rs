//! Alias expansion, the implicit default alias, and monotonicity.

use ravel::{Alias, AliasName, TreePath};
use ravel_integration_test::{
    StaticRules, TestProject, alias_on_paths, build, write_rule,
};

#[tokio::test]
async fn alias_builds_its_expansion() {
    let project = TestProject::new();
    project.write_source("input.txt", "source contents");

    let things =
        Alias::new(build("default"), AliasName::new("things").unwrap());
    let rules = StaticRules::new()
        .rule(write_rule("default/generated.txt", "made by a rule"))
        .alias(
            things.clone(),
            alias_on_paths(
                vec![
                    TreePath::Build(build("default/input.txt")),
                    TreePath::Build(build("default/generated.txt")),
                ],
                1,
            ),
        );
    let (engine, _) = project.engine(rules);

    let facts = engine
        .run(async |session| session.build_alias(things.clone()).await)
        .await
        .unwrap();

    // both files were built and appear in the expansion
    assert!(project.build_file_exists("default/input.txt"));
    assert!(project.build_file_exists("default/generated.txt"));
    assert_eq!(facts.0.len(), 2);
}

#[tokio::test]
async fn alias_expansion_is_the_union_of_all_contributions() {
    let project = TestProject::new();

    let things =
        Alias::new(build("default"), AliasName::new("things").unwrap());
    let rules = StaticRules::new()
        .rule(write_rule("default/one.txt", "1"))
        .rule(write_rule("default/two.txt", "2"))
        .alias(
            things.clone(),
            alias_on_paths(vec![TreePath::Build(build("default/one.txt"))], 1),
        )
        .alias(
            things.clone(),
            alias_on_paths(vec![TreePath::Build(build("default/two.txt"))], 2),
        );
    let (engine, _) = project.engine(rules);

    let facts = engine
        .run(async |session| session.build_alias(things.clone()).await)
        .await
        .unwrap();

    let paths: Vec<String> =
        facts.paths().map(std::string::ToString::to_string).collect();
    assert_eq!(facts.0.len(), 2, "expansion was {paths:?}");
}

#[tokio::test]
async fn undefined_alias_is_a_user_error() {
    let project = TestProject::new();
    let (engine, _) = project.engine(StaticRules::new());

    let ghost =
        Alias::new(build("default"), AliasName::new("ghost").unwrap());
    let error = engine
        .run(async |session| session.build_alias(ghost.clone()).await)
        .await
        .unwrap_err();

    assert!(error.to_string().contains("not defined"), "{error}");
}

#[tokio::test]
async fn default_alias_points_at_all() {
    let project = TestProject::new();

    let all = Alias::all(build("default"));
    let rules = StaticRules::new()
        .rule(write_rule("default/artifact.txt", "built"))
        .alias(
            all,
            alias_on_paths(
                vec![TreePath::Build(build("default/artifact.txt"))],
                1,
            ),
        );
    let (engine, _) = project.engine(rules);

    // the implicit default alias expands to `all`
    let facts = engine
        .run(async |session| {
            session.build_alias(Alias::default_(build("default"))).await
        })
        .await
        .unwrap();

    assert_eq!(facts.0.len(), 1);
    assert_eq!(project.read_build("default/artifact.txt"), "built");
}
