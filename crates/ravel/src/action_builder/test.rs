use std::sync::Arc;

use futures::future::BoxFuture;

use super::*;
use crate::{
    deps::{Dep, Fact, Facts},
    digest::Digest,
    memo::Memo,
    path::SourcePath,
};

/// A resolver serving canned facts, for exercising builders without an
/// engine.
#[derive(Default)]
struct StaticResolver {
    defined_aliases: std::collections::BTreeSet<crate::alias::Alias>,
}

impl DepResolver for StaticResolver {
    fn resolve<'a>(
        &'a self,
        _memo: &'a crate::memo::MemoHandle,
        dep: &'a Dep,
        optional: bool,
    ) -> BoxFuture<'a, crate::error::Result<Option<Fact>>> {
        Box::pin(async move {
            match dep {
                Dep::File(path) => Ok(Some(Fact::File {
                    digest: Digest::of_string(&path.to_string()),
                })),
                Dep::Alias(alias) => {
                    if self.defined_aliases.contains(alias) || !optional {
                        Ok(Some(Fact::Alias(crate::deps::FileFacts::new())))
                    } else {
                        Ok(None)
                    }
                }
                Dep::Env(name) => {
                    Ok(Some(Fact::Env(Some(format!("value-of-{name}")))))
                }
                Dep::FileSelector(_) => {
                    Ok(Some(Fact::FileSelector(crate::deps::FileFacts::new())))
                }
                Dep::Universe | Dep::SandboxConfig(_) => {
                    Ok(Some(Fact::Nothing))
                }
            }
        })
    }
}

fn exec_builder<T: Send + 'static>(
    builder: &ActionBuilder<T>,
) -> crate::error::Result<(T, Facts)> {
    let resolver = Arc::new(StaticResolver::default());
    let memo = Memo::new();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    runtime.block_on(builder.exec(resolver, memo.handle()))
}

fn src(path: &str) -> crate::path::TreePath {
    crate::path::TreePath::Source(SourcePath::new(path).unwrap())
}

#[test]
fn pure_builder_has_no_deps() {
    let (value, facts) = exec_builder(&ActionBuilder::pure(7u32)).unwrap();
    assert_eq!(value, 7);
    assert!(facts.is_empty());
}

#[test]
fn path_records_file_fact() {
    let builder = ActionBuilder::path(src("a.txt"));
    let ((), facts) = exec_builder(&builder).unwrap();
    assert!(facts.get(&Dep::File(src("a.txt"))).is_some());
}

#[test]
fn and_then_accumulates_facts_from_both_stages() {
    let builder = ActionBuilder::path(src("first"))
        .and_then(|()| ActionBuilder::path(src("second")));
    let ((), facts) = exec_builder(&builder).unwrap();

    assert!(facts.get(&Dep::File(src("first"))).is_some());
    assert!(facts.get(&Dep::File(src("second"))).is_some());
}

#[test]
fn map_transforms_value() {
    let builder = ActionBuilder::pure(21u32).map(|n| n * 2);
    let (value, _) = exec_builder(&builder).unwrap();
    assert_eq!(value, 42);
}

#[test]
fn both_runs_two_builders() {
    let builder = ActionBuilder::path(src("left"))
        .map(|()| 1u8)
        .both(ActionBuilder::path(src("right")).map(|()| 2u8));
    let ((l, r), facts) = exec_builder(&builder).unwrap();

    assert_eq!((l, r), (1, 2));
    assert!(facts.get(&Dep::File(src("left"))).is_some());
    assert!(facts.get(&Dep::File(src("right"))).is_some());
}

#[test]
fn all_collects_values_in_order() {
    let builder = ActionBuilder::all(vec![
        ActionBuilder::pure("a"),
        ActionBuilder::pure("b"),
        ActionBuilder::pure("c"),
    ]);
    let (values, _) = exec_builder(&builder).unwrap();
    assert_eq!(values, vec!["a", "b", "c"]);
}

#[test]
fn env_var_evaluates_to_fact_value() {
    let builder = ActionBuilder::env_var("CC");
    let (value, facts) = exec_builder(&builder).unwrap();
    assert_eq!(value.as_deref(), Some("value-of-CC"));
    assert!(facts.get(&Dep::Env("CC".to_owned())).is_some());
}

#[test]
fn alias_if_exists_reports_absence_without_fact() {
    let alias = crate::alias::Alias::all(
        crate::path::BuildPath::new("default").unwrap(),
    );
    let builder = ActionBuilder::dep_on_alias_if_exists(alias.clone());
    let (existed, facts) = exec_builder(&builder).unwrap();

    assert!(!existed);
    assert!(facts.get(&Dep::Alias(alias)).is_none());
}

#[test]
fn fail_propagates() {
    let builder: ActionBuilder<()> =
        ActionBuilder::fail(crate::error::BuildError::user(None, "nope"));
    assert!(exec_builder(&builder).is_err());
}

#[test]
fn error_handler_observes_failure() {
    let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let seen_clone = Arc::clone(&seen);
    let builder: ActionBuilder<()> =
        ActionBuilder::fail(crate::error::BuildError::user(None, "nope"))
            .with_error_handler(move |_| {
                seen_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            });

    assert!(exec_builder(&builder).is_err());
    assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
}
