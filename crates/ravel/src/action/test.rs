use std::collections::{BTreeMap, BTreeSet};

use tempfile::TempDir;

use super::*;
use crate::path::SourcePath;

fn test_ctx(dir: &TempDir) -> ExecContext {
    let source_root = dir.path().join("src");
    let build_root = dir.path().join("src/_build");
    std::fs::create_dir_all(&source_root).unwrap();
    std::fs::create_dir_all(&build_root).unwrap();

    let mut env = BTreeMap::new();
    if let Ok(path) = std::env::var("PATH") {
        env.insert("PATH".to_owned(), path);
    }

    ExecContext {
        exec_root: build_root.clone(),
        source_root,
        chdir: build_root,
        env,
        targets: BTreeSet::new(),
        loc: None,
        context: None,
        params: ExecutionParameters::default(),
    }
}

#[tokio::test]
async fn copy_action_copies_from_source() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);
    std::fs::write(ctx.source_root.join("in.txt"), "payload").unwrap();

    let action = Action::Copy {
        src: TreePath::Source(SourcePath::new("in.txt").unwrap()),
        dst: BuildPath::new("default/in.txt").unwrap(),
    };

    BasicInterpreter.exec(&ctx, &action, &NoDynamicDeps).await.unwrap();

    assert_eq!(
        std::fs::read_to_string(ctx.exec_root.join("default/in.txt")).unwrap(),
        "payload"
    );
}

#[tokio::test]
async fn write_file_action() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);

    let action = Action::WriteFile {
        target: BuildPath::new("default/gen.txt").unwrap(),
        contents: "generated".to_owned(),
    };

    BasicInterpreter.exec(&ctx, &action, &NoDynamicDeps).await.unwrap();

    assert_eq!(
        std::fs::read_to_string(ctx.exec_root.join("default/gen.txt"))
            .unwrap(),
        "generated"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn run_captures_stdout_into_target() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);

    let action = Action::WithStdoutTo {
        target: BuildPath::new("default/out.txt").unwrap(),
        inner: Box::new(Action::Run {
            program: "printf".to_owned(),
            args: vec!["hello".to_owned()],
        }),
    };

    BasicInterpreter.exec(&ctx, &action, &NoDynamicDeps).await.unwrap();

    assert_eq!(
        std::fs::read_to_string(ctx.exec_root.join("default/out.txt"))
            .unwrap(),
        "hello"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn failed_command_is_a_user_error() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx(&dir);

    let action = Action::Run {
        program: "false".to_owned(),
        args: vec![],
    };

    let error =
        BasicInterpreter.exec(&ctx, &action, &NoDynamicDeps).await.unwrap_err();
    assert!(error.is_user_error());
    assert!(error.to_string().contains("exited with code"));
}

#[cfg(unix)]
#[tokio::test]
async fn environment_is_cleared() {
    let dir = TempDir::new().unwrap();
    let mut ctx = test_ctx(&dir);
    ctx.env.insert("ONLY_THIS".to_owned(), "1".to_owned());

    // `sh -c` exits non-zero when the undeclared variable is set
    let action = Action::Run {
        program: "sh".to_owned(),
        args: vec![
            "-c".to_owned(),
            "test -z \"$UNDECLARED_VAR\" && test \"$ONLY_THIS\" = 1"
                .to_owned(),
        ],
    };

    // the test process itself has the variable set
    unsafe { std::env::set_var("UNDECLARED_VAR", "leaked") };
    BasicInterpreter.exec(&ctx, &action, &NoDynamicDeps).await.unwrap();
}

#[test]
fn for_shell_rendering() {
    let action = Action::Progn(vec![
        Action::Run {
            program: "gcc".to_owned(),
            args: vec!["-c".to_owned(), "main.c".to_owned()],
        },
        Action::Echo { message: "done".to_owned() },
    ]);
    assert_eq!(action.for_shell(), "(gcc -c main.c; echo \"done\")");
}

#[test]
fn sandbox_usefulness() {
    let run = Action::Run { program: "cc".to_owned(), args: vec![] };
    assert!(run.is_useful_to_sandbox());

    let copy = Action::Copy {
        src: TreePath::Source(SourcePath::new("a").unwrap()),
        dst: BuildPath::new("default/a").unwrap(),
    };
    assert!(!copy.is_useful_to_sandbox());

    assert!(Action::Progn(vec![copy, run]).is_useful_to_sandbox());
}
