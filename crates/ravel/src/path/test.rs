use super::*;

#[test]
fn rel_path_normalization() {
    assert_eq!(RelPath::new("a/b/c").unwrap().as_str(), "a/b/c");
    assert_eq!(RelPath::new("a/b/").unwrap().as_str(), "a/b");
    assert!(RelPath::new("").unwrap().is_root());
    assert!(RelPath::new("/abs").is_err());
    assert!(RelPath::new("a//b").is_err());
    assert!(RelPath::new("a/./b").is_err());
    assert!(RelPath::new("a/../b").is_err());
}

#[test]
fn rel_path_navigation() {
    let p = RelPath::new("a/b/c").unwrap();
    assert_eq!(p.basename(), Some("c"));
    assert_eq!(p.parent().unwrap().as_str(), "a/b");
    assert_eq!(
        p.parent().unwrap().parent().unwrap().parent(),
        Some(RelPath::root())
    );
    assert_eq!(RelPath::root().parent(), None);
    assert_eq!(RelPath::root().join("x").as_str(), "x");
}

#[test]
fn rel_path_prefixes() {
    let p = RelPath::new("a/b/c").unwrap();
    assert!(p.starts_with(&RelPath::new("a/b").unwrap()));
    assert!(p.starts_with(&RelPath::root()));
    assert!(!p.starts_with(&RelPath::new("a/bc").unwrap()));
    assert_eq!(
        p.strip_prefix(&RelPath::new("a").unwrap()).unwrap().as_str(),
        "b/c"
    );
    assert_eq!(p.strip_prefix(&RelPath::new("x").unwrap()), None);
}

#[test]
fn build_path_classification() {
    let ctx = ContextName::new("default").unwrap();

    assert_eq!(BuildPath::build_root().kind(), BuildPathKind::Root);
    assert_eq!(
        BuildPath::context_root(&ctx).kind(),
        BuildPathKind::ContextRoot("default")
    );
    assert_eq!(
        BuildPath::new("default/foo/bar.o").unwrap().kind(),
        BuildPathKind::Context {
            context: "default",
            sub: RelPath::new("foo/bar.o").unwrap()
        }
    );
    assert_eq!(
        BuildPath::new("install").unwrap().kind(),
        BuildPathKind::InstallRoot
    );
    assert_eq!(
        BuildPath::new("install/default/bin/x").unwrap().kind(),
        BuildPathKind::Install {
            context: "default",
            sub: RelPath::new("bin/x").unwrap()
        }
    );
    assert_eq!(
        BuildPath::anonymous("0123abcd").kind(),
        BuildPathKind::Anonymous("0123abcd")
    );
    assert_eq!(BuildPath::new(".db").unwrap().kind(), BuildPathKind::Hidden);
}

#[test]
fn context_name_validation() {
    assert!(ContextName::new("default").is_ok());
    assert!(ContextName::new("install").is_err());
    assert!(ContextName::new(".hidden").is_err());
    assert!(ContextName::new("a/b").is_err());
    assert!(ContextName::new("").is_err());
}

#[test]
fn tree_path_ordering_respects_tag() {
    let source = TreePath::Source(SourcePath::new("foo").unwrap());
    let build = TreePath::Build(BuildPath::new("foo").unwrap());
    assert_ne!(source, build);

    // all source paths sort before all build paths
    let later_source = TreePath::Source(SourcePath::new("zzz").unwrap());
    assert!(later_source < build);
}

#[test]
fn workspace_resolution() {
    let ws = Workspace::new("/src", "/src/_build");
    assert_eq!(
        ws.abs(&TreePath::Source(SourcePath::new("a/b").unwrap())),
        PathBuf::from("/src/a/b")
    );
    assert_eq!(
        ws.abs(&TreePath::Build(BuildPath::new("default/x").unwrap())),
        PathBuf::from("/src/_build/default/x")
    );
}
