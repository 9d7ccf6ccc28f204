//! General-purpose memoization runtime.
//!
//! Computations are keyed nodes: a [`Computation`] type is the input key, its
//! executor ([`Compute`]) is the body, and the runtime records every
//! `demand` edge between nodes while a body runs. Across runs, a node is
//! re-verified by replaying its recorded dependency edges in order and
//! comparing change fingerprints; only nodes whose dependencies actually
//! changed are recomputed ("early cutoff").
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                         Memo                              │
//! │  ┌───────────────────┐   ┌─────────────────────────────┐  │
//! │  │  Node table       │   │  Executor registry          │  │
//! │  │  id → Computing   │   │  computation type → body    │  │
//! │  │       | Computed  │   └─────────────────────────────┘  │
//! │  └───────────────────┘                                    │
//! └───────────────────────────────────────────────────────────┘
//!                    │ memo.handle()
//!                    ▼
//!        MemoHandle { caller frame }  ── demand() ──► nodes
//! ```
//!
//! Executors are registered *after* the engine wires itself up, which is how
//! the `build_file ↔ load_dir` recursion is tied without a global singleton:
//! each executor holds a weak reference to the engine and reaches the other
//! computations through the [`MemoHandle`] it is given.
//!
//! # Concurrency
//!
//! Two tasks demanding the same node share one execution: the second waits
//! on the first's [`Notify`](tokio::sync::Notify). Waiting on a node whose
//! in-flight callee graph already reaches the caller is a dependency cycle
//! and raises [`CycleError`](crate::error::CycleError) instead of
//! deadlocking.
//!
//! # The current run
//!
//! A distinguished `current_run` node changes identity every
//! [`Memo::reset`]. Nodes that depend on it (directly or transitively) can
//! never verify across runs and are recomputed; nodes that do not are reused
//! as long as their recorded dependencies are unchanged.

use std::{fmt, sync::Arc, sync::atomic::Ordering};

use ravel_stable_hash::StableHash;
use tracing::trace;

use crate::error::{BuildError, CycleFrame, FrameKind, Result};

pub mod collect;
pub mod combinators;
pub(crate) mod cycle;
pub(crate) mod store;

use store::{
    CallerFrame, ComputingGuard, ComputingState, DynValue, EdgeGuard,
    MemoInner, NodeId, NodeState,
};

/// Identity of one build run. Bumped by [`Memo::reset`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, StableHash,
)]
pub struct RunId(pub u64);

/// An opaque change token for a node's output.
///
/// Two equal fingerprints mean "the output has not changed since the edge
/// was recorded". A node with [`Cutoff::Simple`] gets a fresh token on every
/// recomputation; a node with [`Cutoff::AllowCutoff`] keeps its token when
/// the new output compares equal to the old one, which is what stops
/// invalidation from propagating further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub(crate) u128);

/// Output cutoff policy of a computation.
pub enum Cutoff<T> {
    /// Never short-circuit: downstream nodes recompute whenever this node
    /// recomputes.
    Simple,
    /// Skip downstream recomputation when the new output equals the old.
    AllowCutoff(fn(&T, &T) -> bool),
}

impl<T: PartialEq> Cutoff<T> {
    /// Cutoff via `PartialEq`.
    #[must_use]
    pub fn by_eq() -> Self {
        Self::AllowCutoff(|a, b| a == b)
    }
}

/// A memoized computation's input key.
///
/// The type itself identifies the node kind (via [`NAME`](Self::NAME)); the
/// value identifies the instance. Stable hashing keys the node table, so the
/// same input always maps to the same node within a process.
pub trait Computation:
    StableHash
    + Eq
    + std::hash::Hash
    + Clone
    + fmt::Debug
    + Send
    + Sync
    + 'static
{
    /// The value this computation produces.
    type Output: Clone + fmt::Debug + Send + Sync + 'static;

    /// Node name, unique per computation type.
    const NAME: &'static str;

    /// Output cutoff policy. Defaults to [`Cutoff::Simple`].
    #[must_use]
    fn cutoff() -> Cutoff<Self::Output> {
        Cutoff::Simple
    }

    /// The frame shown if this node participates in a dependency cycle.
    ///
    /// Computations that correspond to user-visible files or aliases should
    /// override this with [`FrameKind::File`] / [`FrameKind::Alias`] frames;
    /// cycles without any such frame are reported as engine bugs.
    fn frame(&self) -> CycleFrame {
        CycleFrame::new(
            FrameKind::Internal,
            format!("{}({self:?})", Self::NAME),
        )
    }
}

/// The body of a memoized computation.
pub trait Compute<Q: Computation>: Send + Sync + 'static {
    /// Computes the output for `input`, demanding dependencies through
    /// `memo`.
    fn compute<'s, 'q, 'h>(
        &'s self,
        input: &'q Q,
        memo: &'h MemoHandle,
    ) -> impl Future<Output = Result<Q::Output>>
    + Send
    + use<'s, 'q, 'h, Self, Q>;
}

/// The memoization engine.
///
/// Owns the node table and the executor registry. Handles for demanding
/// computations are created with [`handle`](Self::handle); computation
/// bodies receive a handle that additionally carries their caller frame for
/// dependency recording.
pub struct Memo {
    inner: Arc<MemoInner>,
}

impl Memo {
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// A memo engine whose node identities are derived with the given seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self { inner: Arc::new(MemoInner::new(seed)) }
    }

    /// Registers the executor for a computation type.
    ///
    /// Must be called before the first `demand` of that type. Registering
    /// the same type twice replaces the previous executor.
    pub fn register<Q: Computation, E: Compute<Q>>(&self, executor: Arc<E>) {
        self.inner.register::<Q, E>(executor);
    }

    /// A handle with no caller frame, for demanding computations from
    /// outside any executor.
    #[must_use]
    pub fn handle(&self) -> MemoHandle {
        MemoHandle { memo: Arc::clone(&self.inner), caller: None }
    }

    /// Starts a new run: every node transitively depending on the current
    /// run becomes stale, and other nodes will be re-verified on demand.
    pub fn reset(&self) {
        let previous = self.inner.run.fetch_add(1, Ordering::SeqCst);
        trace!(run = previous + 1, "memo reset");
    }

    /// Drops every memoized node.
    ///
    /// Used at the end of non-incremental runs; in watch mode the table is
    /// kept and [`reset`](Self::reset) alone invalidates selectively.
    pub fn clear(&self) {
        self.inner.nodes.clear();
    }

    /// The current run.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        RunId(self.inner.run.load(Ordering::SeqCst))
    }
}

impl Default for Memo {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Memo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("run", &self.inner.run.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// A handle for demanding computations.
///
/// Handles created inside an executor carry the caller's frame, so every
/// `demand` records a dependency edge from the caller to the callee.
#[derive(Clone)]
pub struct MemoHandle {
    pub(crate) memo: Arc<MemoInner>,
    pub(crate) caller: Option<CallerFrame>,
}

static_assertions::assert_impl_all!(MemoHandle: Send, Sync);

impl fmt::Debug for MemoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoHandle")
            .field("has_caller", &self.caller.is_some())
            .finish()
    }
}

impl MemoHandle {
    /// Demands a computation, returning its (possibly cached) output.
    ///
    /// # Errors
    ///
    /// Propagates the computation's own error, or a
    /// [`CycleError`](crate::error::CycleError) if demanding it closes a
    /// dependency cycle.
    pub async fn demand<Q: Computation>(
        &self,
        input: &Q,
    ) -> Result<Q::Output> {
        let table = self.memo.table_index::<Q>()?;
        let id = NodeId {
            table,
            hash: ravel_stable_hash::hash_128(input, self.memo.seed),
        };
        let input_dyn: DynValue = Arc::new(input.clone());

        let (_fingerprint, outcome) =
            demand_erased(&self.memo, id, input_dyn, self.caller.clone())
                .await?;
        let value = outcome?;
        let typed = value.downcast_ref::<Q::Output>().unwrap_or_else(|| {
            panic!("output type mismatch for node {}", Q::NAME)
        });
        Ok(typed.clone())
    }

    /// Records a dependency on the distinguished current-run node and
    /// returns the current run.
    ///
    /// The caller (and everything that depends on it) will be re-executed
    /// every run from now on. This is how `Universe` dependencies taint
    /// their consumers.
    pub fn depend_on_current_run(&self) -> RunId {
        let run = RunId(self.memo.run.load(Ordering::SeqCst));
        if let Some(caller) = &self.caller {
            caller.computing.register_callee(store::CURRENT_RUN_NODE);
            caller
                .computing
                .observe(store::CURRENT_RUN_NODE, current_run_fingerprint(run));
        }
        run
    }

    /// The current run, without recording a dependency on it.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        RunId(self.memo.run.load(Ordering::SeqCst))
    }
}

pub(crate) fn current_run_fingerprint(run: RunId) -> Fingerprint {
    // high bit marks current-run tokens so they can never collide with
    // counter-derived ones
    Fingerprint((1u128 << 127) | u128::from(run.0))
}

/// Waits until `computing` is no longer the node's in-flight state.
///
/// The waiter is registered *before* re-checking the node table: completion
/// publishes the new state first and notifies second, so if the state still
/// holds our instance after registration, the notification cannot have been
/// sent yet and no wakeup is lost.
pub(crate) async fn wait_for_completion(
    memo: &Arc<MemoInner>,
    id: NodeId,
    computing: &Arc<ComputingState>,
) {
    let notify = Arc::clone(&computing.notify);
    let mut notified = std::pin::pin!(notify.notified());
    notified.as_mut().enable();

    let still_ours = matches!(
        memo.nodes.get(&id).map(|entry| entry.value().clone()),
        Some(NodeState::Computing(current)) if Arc::ptr_eq(&current, computing)
    );
    if still_ours {
        notified.await;
    }
}

/// The type-erased demand loop shared by typed demands and dependency
/// replay.
///
/// Returns the node's change fingerprint plus its stored outcome. The outer
/// `Result` carries infrastructure failures (cycles); the inner one is the
/// computation's own memoized result.
pub(crate) fn demand_erased<'a>(
    memo: &'a Arc<MemoInner>,
    id: NodeId,
    input: DynValue,
    caller: Option<CallerFrame>,
) -> futures::future::BoxFuture<
    'a,
    Result<(Fingerprint, Result<DynValue, BuildError>)>,
> {
    Box::pin(async move {
        if id == store::CURRENT_RUN_NODE {
            let run = RunId(memo.run.load(Ordering::SeqCst));
            let fingerprint = current_run_fingerprint(run);
            if let Some(caller) = &caller {
                caller.computing.register_callee(id);
                caller.computing.observe(id, fingerprint);
            }
            let value: DynValue = Arc::new(run);
            return Ok((fingerprint, Ok(value)));
        }

        let current_run = RunId(memo.run.load(Ordering::SeqCst));
        let edge = EdgeGuard::new(caller.clone(), id);

        loop {
            let state = memo.nodes.get(&id).map(|entry| entry.value().clone());

            match state {
                Some(NodeState::Computing(computing)) => {
                    if let Some(cycle_error) = cycle::find_cycle(
                        memo,
                        id,
                        &computing,
                        caller.as_ref(),
                    ) {
                        return Err(BuildError::cycle(cycle_error));
                    }

                    wait_for_completion(memo, id, &computing).await;
                }

                Some(NodeState::Computed(node))
                    if node.verified_at == current_run =>
                {
                    edge.observe_and_defuse(node.fingerprint);
                    return Ok((node.fingerprint, node.result.clone()));
                }

                _ => {
                    let entry = memo.table(id.table)?;
                    let computing = Arc::new(ComputingState::new(
                        (entry.frame_of)(input.as_ref()),
                    ));

                    // claim the computing slot, re-checking under the shard
                    // lock since the read above was racy
                    let prior = match memo.nodes.entry(id) {
                        dashmap::Entry::Occupied(mut occupied) => {
                            match occupied.get() {
                                NodeState::Computing(_) => continue,
                                NodeState::Computed(node)
                                    if node.verified_at == current_run =>
                                {
                                    let node = Arc::clone(node);
                                    edge.observe_and_defuse(node.fingerprint);
                                    return Ok((
                                        node.fingerprint,
                                        node.result.clone(),
                                    ));
                                }
                                NodeState::Computed(stale) => {
                                    let prior = Arc::clone(stale);
                                    occupied.insert(NodeState::Computing(
                                        Arc::clone(&computing),
                                    ));
                                    Some(prior)
                                }
                            }
                        }
                        dashmap::Entry::Vacant(vacant) => {
                            vacant.insert(NodeState::Computing(Arc::clone(
                                &computing,
                            )));
                            None
                        }
                    };

                    let guard = ComputingGuard::new(
                        Arc::clone(memo),
                        id,
                        Arc::clone(&computing),
                    );

                    // replay recorded dependencies: if none changed, the old
                    // result is still valid and downstream sees the old
                    // fingerprint
                    if let Some(prior) = &prior {
                        let clean = store::verify_deps(
                            memo,
                            id,
                            prior,
                            &computing,
                            current_run,
                        )
                        .await?;

                        if clean {
                            let refreshed =
                                Arc::new(prior.reverified_at(current_run));
                            let fingerprint = refreshed.fingerprint;
                            let result = refreshed.result.clone();
                            guard.complete(NodeState::Computed(refreshed));
                            edge.observe_and_defuse(fingerprint);
                            trace!(
                                node = entry.name,
                                "verified without recompute"
                            );
                            return Ok((fingerprint, result));
                        }

                        // verification registered edges; the fresh execution
                        // records its own
                        computing.reset_callees();
                    }

                    let handle = MemoHandle {
                        memo: Arc::clone(memo),
                        caller: Some(CallerFrame {
                            id,
                            computing: Arc::clone(&computing),
                        }),
                    };

                    trace!(node = entry.name, "computing");
                    let outcome = (entry.invoke)(
                        Arc::clone(&entry.executor),
                        Arc::clone(&input),
                        handle,
                    )
                    .await;

                    let fingerprint = match (&outcome, &prior) {
                        (Ok(new_value), Some(prior))
                            if matches!(&prior.result, Ok(old)
                                if (entry.cutoff_compare)(old, new_value)) =>
                        {
                            prior.fingerprint
                        }
                        _ => memo.fresh_fingerprint(current_run),
                    };

                    let deps = computing.take_deps();
                    let stored = Arc::new(store::ComputedState {
                        input,
                        result: outcome.clone(),
                        fingerprint,
                        deps,
                        verified_at: current_run,
                    });
                    guard.complete(NodeState::Computed(stored));
                    edge.observe_and_defuse(fingerprint);
                    return Ok((fingerprint, outcome));
                }
            }
        }
    })
}
