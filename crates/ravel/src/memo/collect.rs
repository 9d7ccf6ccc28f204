//! Implicit output collection.
//!
//! Some computations *produce* values as a side channel while computing
//! something else: rule generators emit [`Rules`](crate::rules::Rules) while
//! the directory loader computes a listing. The produced values form a
//! commutative monoid, so concurrent producers compose without ordering
//! guarantees.
//!
//! [`collect`] runs a closure with a [`Collector`]; everything produced into
//! it during the call is unioned and returned next to the closure's value.

use parking_lot::Mutex;

use crate::error::Result;

/// A value that can be produced implicitly: a commutative monoid.
pub trait ImplicitOutput: Send + 'static {
    /// The identity element.
    #[must_use]
    fn empty() -> Self;

    /// Combines two outputs. Must be commutative: producers run
    /// concurrently and compose in nondeterministic order.
    #[must_use]
    fn union(self, other: Self) -> Self;
}

/// A collection context accepting produced values.
pub struct Collector<O: ImplicitOutput> {
    slot: Mutex<O>,
}

impl<O: ImplicitOutput> Collector<O> {
    #[must_use]
    pub fn new() -> Self {
        Self { slot: Mutex::new(O::empty()) }
    }

    /// Adds to the currently collected output.
    pub fn produce(&self, value: O) {
        let mut slot = self.slot.lock();
        let current = std::mem::replace(&mut *slot, O::empty());
        *slot = current.union(value);
    }

    /// Takes the collected output, leaving the identity behind.
    #[must_use]
    pub fn finish(&self) -> O {
        std::mem::replace(&mut *self.slot.lock(), O::empty())
    }
}

impl<O: ImplicitOutput> Default for Collector<O> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `f`, capturing everything it produces into a fresh collector.
///
/// # Errors
///
/// Propagates the closure's error; anything produced before the failure is
/// discarded with the collector.
pub async fn collect<O: ImplicitOutput, T>(
    f: impl AsyncFnOnce(&Collector<O>) -> Result<T>,
) -> Result<(T, O)> {
    let collector = Collector::new();
    let value = f(&collector).await?;
    Ok((value, collector.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Sum(u64);

    impl ImplicitOutput for Sum {
        fn empty() -> Self {
            Self(0)
        }

        fn union(self, other: Self) -> Self {
            Self(self.0 + other.0)
        }
    }

    #[tokio::test]
    async fn collect_captures_produced_values() {
        let (value, output) = collect(async |collector: &Collector<Sum>| {
            collector.produce(Sum(1));
            collector.produce(Sum(2));
            Ok("done")
        })
        .await
        .unwrap();

        assert_eq!(value, "done");
        assert_eq!(output, Sum(3));
    }

    #[tokio::test]
    async fn nested_collects_are_independent() {
        let (_, outer) = collect(async |outer: &Collector<Sum>| {
            outer.produce(Sum(1));
            let (_, inner) = collect(async |inner: &Collector<Sum>| {
                inner.produce(Sum(10));
                Ok(())
            })
            .await?;
            assert_eq!(inner, Sum(10));
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(outer, Sum(1));
    }
}
