use std::fs;

use tempfile::TempDir;

use super::*;
use crate::path::Workspace;

#[test]
fn config_bit_operations() {
    let all = SandboxConfig::no_special_requirements();
    for mode in SandboxMode::ALL {
        assert!(all.allows(mode));
    }

    let none_only = SandboxConfig::no_sandboxing();
    assert!(none_only.allows(SandboxMode::None));
    assert!(!none_only.allows(SandboxMode::Copy));

    let sandboxed = SandboxConfig::needs_sandboxing();
    assert!(!sandboxed.allows(SandboxMode::None));
    assert!(sandboxed.allows(SandboxMode::Symlink));

    assert!(none_only.inter(sandboxed).is_empty());
}

#[test]
fn select_prefers_first_permitted() {
    let preference =
        [SandboxMode::None, SandboxMode::Symlink, SandboxMode::Copy];

    let mode = select_mode(
        false,
        SandboxConfig::no_special_requirements(),
        &preference,
        None,
    )
    .unwrap();
    assert_eq!(mode, SandboxMode::None);

    let mode =
        select_mode(false, SandboxConfig::needs_sandboxing(), &preference, None)
            .unwrap();
    assert_eq!(mode, SandboxMode::Symlink.effective());
}

#[test]
fn select_not_useful_to_sandbox() {
    // a pure fs action never sandboxes when allowed to skip it
    let mode = select_mode(
        true,
        SandboxConfig::no_special_requirements(),
        &[SandboxMode::Copy],
        None,
    )
    .unwrap();
    assert_eq!(mode, SandboxMode::None);

    // and errors when deps insist on sandboxing
    let err = select_mode(
        true,
        SandboxConfig::needs_sandboxing(),
        &[SandboxMode::Copy],
        None,
    );
    assert!(err.is_err());
}

#[test]
fn select_fails_when_nothing_permitted() {
    let err = select_mode(
        false,
        SandboxConfig::no_sandboxing(),
        &[SandboxMode::Copy, SandboxMode::Symlink],
        None,
    );
    assert!(err.is_err());
}

#[test]
fn sandbox_materialize_and_move_back() {
    let dir = TempDir::new().unwrap();
    let source_root = dir.path().join("src");
    let build_root = dir.path().join("src/_build");
    fs::create_dir_all(&source_root).unwrap();
    fs::create_dir_all(&build_root).unwrap();

    let workspace = Workspace::new(&source_root, &build_root);

    let dep = source_root.join("input.txt");
    fs::write(&dep, "data").unwrap();

    let sandbox =
        Sandbox::create(&workspace, "cafebabe", SandboxMode::Copy).unwrap();

    sandbox
        .materialize(&dep, std::path::Path::new("default/input.txt"))
        .unwrap();
    assert_eq!(
        fs::read_to_string(sandbox.root().join("default/input.txt")).unwrap(),
        "data"
    );

    // simulate the action writing a target inside the sandbox
    let target = crate::path::BuildPath::new("default/out.txt").unwrap();
    fs::write(sandbox.abs_build(&target), "result").unwrap();

    let real = workspace.abs_build(&target);
    sandbox.move_target_back(&target, &real).unwrap();
    assert_eq!(fs::read_to_string(&real).unwrap(), "result");

    let root = sandbox.root().to_path_buf();
    sandbox.destroy();
    assert!(!root.exists());
}
