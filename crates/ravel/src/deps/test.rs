use super::*;
use crate::path::{BuildPath, SourcePath};

fn source(p: &str) -> TreePath {
    TreePath::Source(SourcePath::new(p).unwrap())
}

#[test]
fn predicate_matching() {
    assert!(Predicate::All.matches("anything"));

    let ml = Predicate::Ext("ml".to_owned());
    assert!(ml.matches("foo.ml"));
    assert!(!ml.matches("foo.mli"));
    assert!(!ml.matches("ml"));

    let glob = Predicate::Glob("test_*.txt".to_owned());
    assert!(glob.matches("test_a.txt"));
    assert!(glob.matches("test_.txt"));
    assert!(!glob.matches("atest_b.txt"));

    let star = Predicate::Glob("*".to_owned());
    assert!(star.matches(""));
    assert!(star.matches("x"));
}

#[test]
fn dep_set_universe_and_sandbox() {
    let mut deps = DepSet::new();
    assert!(!deps.has_universe());

    deps.insert(Dep::Universe);
    assert!(deps.has_universe());

    // no constraint means everything is allowed
    assert!(
        deps.sandbox_config().allows(crate::sandbox::SandboxMode::None)
    );

    deps.insert(Dep::SandboxConfig(
        crate::sandbox::SandboxConfig::needs_sandboxing(),
    ));
    assert!(
        !deps.sandbox_config().allows(crate::sandbox::SandboxMode::None)
    );
}

#[test]
fn facts_digest_is_stable_and_sensitive() {
    let digest_a = Digest::of_bytes(b"a");
    let digest_b = Digest::of_bytes(b"b");

    let facts_1: Facts = [(
        Dep::File(source("x.txt")),
        Fact::File { digest: digest_a },
    )]
    .into_iter()
    .collect();

    let facts_same: Facts = [(
        Dep::File(source("x.txt")),
        Fact::File { digest: digest_a },
    )]
    .into_iter()
    .collect();

    let facts_2: Facts = [(
        Dep::File(source("x.txt")),
        Fact::File { digest: digest_b },
    )]
    .into_iter()
    .collect();

    assert_eq!(facts_1.digest().unwrap(), facts_same.digest().unwrap());
    assert_ne!(facts_1.digest().unwrap(), facts_2.digest().unwrap());
}

#[test]
fn facts_collect_file_facts_from_aliases() {
    let digest = Digest::of_bytes(b"z");
    let mut expansion = FileFacts::new();
    expansion.insert(
        TreePath::Build(BuildPath::new("default/a.out").unwrap()),
        digest,
    );

    let mut facts = Facts::new();
    facts.insert(Dep::File(source("in.txt")), Fact::File { digest });
    facts.insert(
        Dep::Alias(crate::alias::Alias::all(
            BuildPath::new("default").unwrap(),
        )),
        Fact::Alias(expansion),
    );

    let files = facts.file_facts();
    assert_eq!(files.0.len(), 2);
}

#[test]
fn dep_set_encode_round_trip() {
    let deps: DepSet = [
        Dep::File(source("a")),
        Dep::Env("PATH".to_owned()),
        Dep::Universe,
    ]
    .into_iter()
    .collect();

    let bytes = ravel_serialize::to_bytes(&deps).unwrap();
    let decoded: DepSet = ravel_serialize::from_bytes(&bytes).unwrap();
    assert_eq!(deps, decoded);
}
