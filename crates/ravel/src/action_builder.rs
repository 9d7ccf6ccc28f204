//! The action builder: a description of "build this value, declaring these
//! dependencies as you go".
//!
//! An [`ActionBuilder<T>`] is a deferred computation over an
//! [`EvalContext`]. Its primitives declare dependencies — files, aliases,
//! file selectors, environment variables — and executing the builder yields
//! both the computed value and the full [`Facts`] for every dependency the
//! computation ever requested. The rule executor digests those facts to
//! decide whether the rule needs to run.
//!
//! Dependency resolution is delegated to a [`DepResolver`] (implemented by
//! the engine), which is where requesting a build-tree file recursively
//! triggers the production of that file.

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::{
    alias::Alias,
    deps::{Dep, Fact, FileSelector},
    error::{BuildError, Result},
    memo::{Computation, MemoHandle, combinators},
    path::TreePath,
    sandbox::SandboxConfig,
};

/// Resolves one declared dependency to its fact.
///
/// With `optional`, a dependency that does not exist resolves to `None`
/// instead of an error (used by
/// [`ActionBuilder::dep_on_alias_if_exists`]).
pub trait DepResolver: Send + Sync + 'static {
    fn resolve<'a>(
        &'a self,
        memo: &'a MemoHandle,
        dep: &'a Dep,
        optional: bool,
    ) -> BoxFuture<'a, Result<Option<Fact>>>;
}

/// The evaluation context of one builder execution.
///
/// Accumulates the facts of every dependency declared during the run.
pub struct EvalContext {
    resolver: Arc<dyn DepResolver>,
    memo: MemoHandle,
    facts: Mutex<crate::deps::Facts>,
}

impl EvalContext {
    #[must_use]
    pub fn new(resolver: Arc<dyn DepResolver>, memo: MemoHandle) -> Self {
        Self { resolver, memo, facts: Mutex::new(crate::deps::Facts::new()) }
    }

    /// The memo handle builders use for `memo_build`.
    #[must_use]
    pub fn memo(&self) -> &MemoHandle {
        &self.memo
    }

    /// Resolves `dep` through the engine and records its fact.
    async fn resolve_and_record(
        &self,
        dep: Dep,
        optional: bool,
    ) -> Result<Option<Fact>> {
        let fact = self.resolver.resolve(&self.memo, &dep, optional).await?;
        if let Some(fact) = &fact {
            self.facts.lock().insert(dep, fact.clone());
        }
        Ok(fact)
    }

    /// The facts accumulated so far.
    #[must_use]
    pub fn into_facts(self) -> crate::deps::Facts {
        self.facts.into_inner()
    }
}

type BuilderFn<T> =
    Arc<dyn for<'c> Fn(&'c EvalContext) -> BoxFuture<'c, Result<T>> + Send + Sync>;

/// A monadic computation that declares dependencies while computing a `T`.
pub struct ActionBuilder<T> {
    run: BuilderFn<T>,
}

impl<T> Clone for ActionBuilder<T> {
    fn clone(&self) -> Self {
        Self { run: Arc::clone(&self.run) }
    }
}

impl<T> std::fmt::Debug for ActionBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionBuilder").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> ActionBuilder<T> {
    fn from_fn<F>(f: F) -> Self
    where
        F: for<'c> Fn(&'c EvalContext) -> BoxFuture<'c, Result<T>>
            + Send
            + Sync
            + 'static,
    {
        Self { run: Arc::new(f) }
    }

    /// A builder returning `value` with no dependencies.
    #[must_use]
    pub fn pure(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_fn(move |_| {
            let value = value.clone();
            Box::pin(async move { Ok(value) })
        })
    }

    /// A builder that always fails.
    #[must_use]
    pub fn fail(error: BuildError) -> Self {
        Self::from_fn(move |_| {
            let error = error.clone();
            Box::pin(async move { Err(error) })
        })
    }

    /// Transforms the computed value.
    #[must_use]
    pub fn map<U: Send + 'static>(
        self,
        f: impl Fn(T) -> U + Send + Sync + 'static,
    ) -> ActionBuilder<U> {
        let f = Arc::new(f);
        ActionBuilder::from_fn(move |ctx| {
            let this = self.clone();
            let f = Arc::clone(&f);
            Box::pin(async move { Ok(f(this.eval(ctx).await?)) })
        })
    }

    /// Monadic bind: the continuation's dependencies are declared into the
    /// same evaluation.
    #[must_use]
    pub fn and_then<U: Send + 'static>(
        self,
        f: impl Fn(T) -> ActionBuilder<U> + Send + Sync + 'static,
    ) -> ActionBuilder<U> {
        let f = Arc::new(f);
        ActionBuilder::from_fn(move |ctx| {
            let this = self.clone();
            let f = Arc::clone(&f);
            Box::pin(async move {
                let value = this.eval(ctx).await?;
                f(value).eval(ctx).await
            })
        })
    }

    /// Runs two builders concurrently and pairs their values.
    #[must_use]
    pub fn both<U: Send + 'static>(
        self,
        other: ActionBuilder<U>,
    ) -> ActionBuilder<(T, U)> {
        ActionBuilder::from_fn(move |ctx| {
            let left = self.clone();
            let right = other.clone();
            Box::pin(async move {
                combinators::both(left.eval(ctx), right.eval(ctx)).await
            })
        })
    }

    /// Runs all builders concurrently, preserving order.
    #[must_use]
    pub fn all(builders: Vec<Self>) -> ActionBuilder<Vec<T>> {
        ActionBuilder::from_fn(move |ctx| {
            let builders = builders.clone();
            Box::pin(async move {
                combinators::parallel_map(builders, |builder| async move {
                    builder.eval(ctx).await
                })
                .await
            })
        })
    }

    /// Invokes `handler` on failure before re-raising.
    #[must_use]
    pub fn with_error_handler(
        self,
        handler: impl Fn(&BuildError) + Send + Sync + 'static,
    ) -> Self {
        let handler = Arc::new(handler);
        Self::from_fn(move |ctx| {
            let this = self.clone();
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                combinators::with_error_handler(this.eval(ctx), |e| handler(e))
                    .await
            })
        })
    }

    /// Evaluates within an existing context, merging facts into it.
    pub async fn eval(&self, ctx: &EvalContext) -> Result<T> {
        (self.run)(ctx).await
    }

    /// Executes the builder from scratch: a fresh context, returning the
    /// value plus every fact the computation requested.
    pub async fn exec(
        &self,
        resolver: Arc<dyn DepResolver>,
        memo: MemoHandle,
    ) -> Result<(T, crate::deps::Facts)> {
        let ctx = EvalContext::new(resolver, memo);
        let value = self.eval(&ctx).await?;
        Ok((value, ctx.into_facts()))
    }
}

impl ActionBuilder<()> {
    /// Declares a dependency on a single file.
    #[must_use]
    pub fn path(path: TreePath) -> Self {
        Self::deps(crate::deps::DepSet::new().with(Dep::File(path)))
    }

    /// Declares dependencies on several files.
    #[must_use]
    pub fn paths<I: IntoIterator<Item = TreePath>>(paths: I) -> Self {
        Self::deps(paths.into_iter().map(Dep::File).collect())
    }

    /// Declares a set of dependencies, resolved concurrently.
    #[must_use]
    pub fn deps(set: crate::deps::DepSet) -> Self {
        Self::from_fn(move |ctx| {
            let set = set.clone();
            Box::pin(async move {
                combinators::parallel_map(
                    set.iter().cloned().collect::<Vec<_>>(),
                    |dep| async move {
                        ctx.resolve_and_record(dep, false).await?;
                        Ok(())
                    },
                )
                .await?;
                Ok(())
            })
        })
    }

    /// Declares a dependency on an alias.
    #[must_use]
    pub fn dep_on_alias(alias: Alias) -> Self {
        Self::from_fn(move |ctx| {
            let alias = alias.clone();
            Box::pin(async move {
                ctx.resolve_and_record(Dep::Alias(alias), false).await?;
                Ok(())
            })
        })
    }

    /// Declares the permitted sandbox modes of the consuming rule.
    #[must_use]
    pub fn sandbox_config(config: SandboxConfig) -> Self {
        Self::from_fn(move |ctx| {
            Box::pin(async move {
                ctx.resolve_and_record(Dep::SandboxConfig(config), false)
                    .await?;
                Ok(())
            })
        })
    }

    /// Declares the universe dependency: the consumer reruns every build.
    #[must_use]
    pub fn universe() -> Self {
        Self::from_fn(move |ctx| {
            Box::pin(async move {
                ctx.resolve_and_record(Dep::Universe, false).await?;
                Ok(())
            })
        })
    }
}

impl ActionBuilder<bool> {
    /// Declares a dependency on an alias if it is defined; evaluates to
    /// whether it was.
    #[must_use]
    pub fn dep_on_alias_if_exists(alias: Alias) -> Self {
        ActionBuilder::from_fn(move |ctx| {
            let alias = alias.clone();
            Box::pin(async move {
                let fact = ctx
                    .resolve_and_record(Dep::Alias(alias), true)
                    .await?;
                Ok(fact.is_some())
            })
        })
    }
}

impl ActionBuilder<Vec<TreePath>> {
    /// Declares a dependency on every file of a directory matching a
    /// predicate; evaluates to the matched paths.
    #[must_use]
    pub fn file_selector(selector: FileSelector) -> Self {
        ActionBuilder::from_fn(move |ctx| {
            let selector = selector.clone();
            Box::pin(async move {
                let fact = ctx
                    .resolve_and_record(
                        Dep::FileSelector(selector),
                        false,
                    )
                    .await?;
                match fact {
                    Some(Fact::FileSelector(files)) => {
                        Ok(files.paths().cloned().collect())
                    }
                    _ => Err(BuildError::code(
                        "file selector resolved to a non-selector fact",
                        vec![],
                    )),
                }
            })
        })
    }
}

impl ActionBuilder<Option<String>> {
    /// Declares a dependency on an environment variable; evaluates to its
    /// value.
    #[must_use]
    pub fn env_var(name: impl Into<String>) -> Self {
        let name = name.into();
        ActionBuilder::from_fn(move |ctx| {
            let name = name.clone();
            Box::pin(async move {
                let fact =
                    ctx.resolve_and_record(Dep::Env(name), false).await?;
                match fact {
                    Some(Fact::Env(value)) => Ok(value),
                    _ => Err(BuildError::code(
                        "env dep resolved to a non-env fact",
                        vec![],
                    )),
                }
            })
        })
    }
}

/// Runs a memoized computation inside a builder.
#[must_use]
pub fn memo_build<Q: Computation>(input: Q) -> ActionBuilder<Q::Output> {
    ActionBuilder::from_fn(move |ctx| {
        let input = input.clone();
        Box::pin(async move { ctx.memo().demand(&input).await })
    })
}

#[cfg(test)]
mod test;
