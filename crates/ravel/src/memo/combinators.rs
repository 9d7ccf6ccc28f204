//! Composition combinators for build computations.
//!
//! Build computations are ordinary futures returning
//! [`Result`](crate::error::Result); these combinators express the parallel
//! and error-collecting composition patterns the engine uses. Parallelism
//! here is interleaving on the async runtime: blocking work is pushed to the
//! blocking pool by the leaf operations themselves.

use futures::future::join_all;

use crate::error::{BuildError, Result};

/// Applies `f` to every item concurrently, preserving input order.
///
/// All computations run to completion even if some fail, so side effects
/// and memoization are not cut short; the errors are then folded into one.
///
/// # Errors
///
/// Fails if any element fails.
pub async fn parallel_map<I, T, U, F, Fut>(items: I, f: F) -> Result<Vec<U>>
where
    I: IntoIterator<Item = T>,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<U>>,
{
    let results = join_all(items.into_iter().map(f)).await;

    let mut values = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(error) => errors.push(error),
        }
    }
    if errors.is_empty() {
        Ok(values)
    } else {
        Err(BuildError::reraise_all(errors))
    }
}

/// Applies `f` to every item one after another, stopping at the first
/// failure.
///
/// # Errors
///
/// Fails with the first element's error.
pub async fn sequential_map<I, T, U, F, Fut>(items: I, f: F) -> Result<Vec<U>>
where
    I: IntoIterator<Item = T>,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<U>>,
{
    let mut values = Vec::new();
    for item in items {
        values.push(f(item).await?);
    }
    Ok(values)
}

/// Runs two computations concurrently and returns both results.
///
/// # Errors
///
/// Fails if either side fails; both run to completion first.
pub async fn both<A, B>(
    fa: impl Future<Output = Result<A>>,
    fb: impl Future<Output = Result<B>>,
) -> Result<(A, B)> {
    let (a, b) = futures::join!(fa, fb);
    match (a, b) {
        (Ok(a), Ok(b)) => Ok((a, b)),
        (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
        (Err(e1), Err(e2)) => Err(BuildError::reraise_all(vec![e1, e2])),
    }
}

/// Forks two thunks, runs them concurrently, and joins their results.
///
/// # Errors
///
/// Same policy as [`both`].
pub async fn fork_and_join<A, B, FA, FB, FutA, FutB>(
    fa: FA,
    fb: FB,
) -> Result<(A, B)>
where
    FA: FnOnce() -> FutA,
    FB: FnOnce() -> FutB,
    FutA: Future<Output = Result<A>>,
    FutB: Future<Output = Result<B>>,
{
    both(fa(), fb()).await
}

/// Runs every computation to completion and partitions the outcomes.
///
/// Unlike [`parallel_map`], failures do not collapse into one error; the
/// caller gets the full list, which is what a top-level build loop reports.
///
/// # Errors
///
/// Fails with all collected errors if any computation failed.
pub async fn collect_errors<T, Fut>(
    futures: Vec<Fut>,
) -> Result<Vec<T>, Vec<BuildError>>
where
    Fut: Future<Output = Result<T>>,
{
    let results = join_all(futures).await;

    let mut values = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(error) => errors.push(error),
        }
    }
    if errors.is_empty() { Ok(values) } else { Err(errors) }
}

/// Runs `body`, then always runs `cleanup`, even when the body failed.
///
/// # Errors
///
/// The body's error wins; a cleanup failure is surfaced only when the body
/// succeeded.
pub async fn finalize<T, Fut, Fin, FinFut>(body: Fut, cleanup: Fin) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
    Fin: FnOnce() -> FinFut,
    FinFut: Future<Output = Result<()>>,
{
    let result = body.await;
    let cleanup_result = cleanup().await;
    match result {
        Ok(value) => {
            cleanup_result?;
            Ok(value)
        }
        Err(error) => Err(error),
    }
}

/// Invokes `handler` on the error before re-raising it.
///
/// # Errors
///
/// Transparent: the body's result is returned unchanged.
pub async fn with_error_handler<T, Fut, H>(body: Fut, handler: H) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
    H: FnOnce(&BuildError),
{
    match body.await {
        Ok(value) => Ok(value),
        Err(error) => {
            handler(&error);
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn parallel_map_preserves_order() {
        let out = parallel_map([3u64, 1, 2], |n| async move { Ok(n * 10) })
            .await
            .unwrap();
        assert_eq!(out, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn parallel_map_collects_all_errors() {
        let result = parallel_map([1u64, 2, 3], |n| async move {
            if n == 2 {
                Ok(n)
            } else {
                Err(BuildError::user(None, format!("bad {n}")))
            }
        })
        .await;

        match result {
            Err(BuildError::Multiple(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected Multiple, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sequential_map_stops_at_first_error() {
        let touched = AtomicUsize::new(0);
        let result = sequential_map([1u64, 2, 3], |n| {
            touched.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 2 {
                    Err(BuildError::user(None, "stop"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(touched.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn finalize_runs_cleanup_on_failure() {
        let cleaned = AtomicUsize::new(0);
        let result: Result<()> = finalize(
            async { Err(BuildError::user(None, "body failed")) },
            || async {
                cleaned.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn with_error_handler_sees_error() {
        let seen = AtomicUsize::new(0);
        let result: Result<()> = with_error_handler(
            async { Err(BuildError::user(None, "boom")) },
            |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
