//! Node table, executor registry, and the guards that keep both consistent
//! under concurrency and cancellation.

use std::{
    any::{Any, TypeId},
    sync::Arc,
    sync::atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use fxhash::{FxBuildHasher, FxHashMap, FxHashSet};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use super::{Computation, Compute, Fingerprint, MemoHandle, RunId, cycle};
use crate::error::{BuildError, CycleFrame, FrameKind, Result};

/// Type-erased node input or output.
pub(crate) type DynValue = Arc<dyn Any + Send + Sync>;

/// Identity of a memoized node: its computation table plus the stable hash
/// of its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId {
    pub table: u32,
    pub hash: u128,
}

/// The distinguished current-run node (see module docs of [`super`]).
pub(crate) const CURRENT_RUN_NODE: NodeId =
    NodeId { table: u32::MAX, hash: 0 };

/// Ordered callee records of an in-flight computation.
#[derive(Debug, Default)]
struct CalleeRecord {
    order: Vec<NodeId>,
    seen: FxHashSet<NodeId>,
    observed: FxHashMap<NodeId, Fingerprint>,
}

/// State of a node that is currently being computed or verified.
#[derive(Debug)]
pub(crate) struct ComputingState {
    /// Wakes tasks waiting for this computation to finish.
    pub notify: Arc<Notify>,
    /// Frame used in cycle reports.
    pub frame: CycleFrame,
    callees: Mutex<CalleeRecord>,
}

impl ComputingState {
    pub fn new(frame: CycleFrame) -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            frame,
            callees: Mutex::new(CalleeRecord::default()),
        }
    }

    /// Records an outgoing edge; returns `false` if it was already present.
    pub fn register_callee(&self, callee: NodeId) -> bool {
        let mut record = self.callees.lock();
        if record.seen.insert(callee) {
            record.order.push(callee);
            true
        } else {
            false
        }
    }

    /// Undoes a registration whose demand was cancelled mid-flight.
    pub fn abort_callee(&self, callee: &NodeId) {
        let mut record = self.callees.lock();
        if record.seen.remove(callee) {
            record.order.retain(|id| id != callee);
            record.observed.remove(callee);
        }
    }

    /// Records the fingerprint observed for a completed callee.
    pub fn observe(&self, callee: NodeId, fingerprint: Fingerprint) {
        self.callees.lock().observed.insert(callee, fingerprint);
    }

    /// Clears everything recorded so far. Used between a failed
    /// verification pass and the fresh execution that follows it.
    pub fn reset_callees(&self) {
        *self.callees.lock() = CalleeRecord::default();
    }

    /// The recorded edges in registration order with their observations.
    pub fn take_deps(&self) -> Vec<(NodeId, Fingerprint)> {
        let mut record = self.callees.lock();
        let record = std::mem::take(&mut *record);
        record
            .order
            .into_iter()
            .filter_map(|id| record.observed.get(&id).map(|fp| (id, *fp)))
            .collect()
    }

    /// Snapshot of the registered callees, for cycle detection.
    pub fn callee_ids(&self) -> Vec<NodeId> {
        self.callees.lock().order.clone()
    }
}

/// State of a node whose computation finished.
#[derive(Debug)]
pub(crate) struct ComputedState {
    /// The input key, kept for dependency replay.
    pub input: DynValue,
    /// The memoized outcome. Errors are memoized like values.
    pub result: Result<DynValue, BuildError>,
    /// Change token of the outcome.
    pub fingerprint: Fingerprint,
    /// Recorded dependency edges, in demand order.
    pub deps: Vec<(NodeId, Fingerprint)>,
    /// Run in which the node was last computed or verified.
    pub verified_at: RunId,
}

impl ComputedState {
    /// The same state, stamped as verified in `run`.
    pub fn reverified_at(&self, run: RunId) -> Self {
        Self {
            input: Arc::clone(&self.input),
            result: self.result.clone(),
            fingerprint: self.fingerprint,
            deps: self.deps.clone(),
            verified_at: run,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum NodeState {
    Computing(Arc<ComputingState>),
    Computed(Arc<ComputedState>),
}

/// The frame identifying the caller inside an executor.
#[derive(Clone)]
pub(crate) struct CallerFrame {
    pub id: NodeId,
    pub computing: Arc<ComputingState>,
}

type InvokeFn = fn(
    Arc<dyn Any + Send + Sync>,
    DynValue,
    MemoHandle,
) -> BoxFuture<'static, Result<DynValue>>;

type RepairFn = fn(
    Arc<MemoInner>,
    NodeId,
    DynValue,
    Option<CallerFrame>,
) -> BoxFuture<'static, Result<Fingerprint>>;

/// Registration-time vtable for one computation type.
#[derive(Clone)]
pub(crate) struct TableEntry {
    pub name: &'static str,
    pub executor: Arc<dyn Any + Send + Sync>,
    pub invoke: InvokeFn,
    pub repair: RepairFn,
    pub cutoff_compare: fn(&DynValue, &DynValue) -> bool,
    pub frame_of: fn(&(dyn Any + Send + Sync)) -> CycleFrame,
}

pub(crate) struct MemoInner {
    pub nodes: DashMap<NodeId, NodeState, FxBuildHasher>,
    tables: RwLock<Vec<TableEntry>>,
    table_by_type: RwLock<FxHashMap<TypeId, u32>>,
    pub run: AtomicU64,
    token: AtomicU64,
    pub seed: u64,
}

impl MemoInner {
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: DashMap::with_hasher(FxBuildHasher::default()),
            tables: RwLock::new(Vec::new()),
            table_by_type: RwLock::new(FxHashMap::default()),
            run: AtomicU64::new(0),
            token: AtomicU64::new(0),
            seed,
        }
    }

    pub fn register<Q: Computation, E: Compute<Q>>(&self, executor: Arc<E>) {
        let entry = table_entry::<Q, E>(executor);
        let mut tables = self.tables.write();
        let mut by_type = self.table_by_type.write();
        if let Some(&index) = by_type.get(&TypeId::of::<Q>()) {
            tables[index as usize] = entry;
        } else {
            let index = u32::try_from(tables.len())
                .expect("more than u32::MAX computation tables");
            tables.push(entry);
            by_type.insert(TypeId::of::<Q>(), index);
        }
    }

    pub fn table_index<Q: Computation>(&self) -> Result<u32> {
        self.table_by_type
            .read()
            .get(&TypeId::of::<Q>())
            .copied()
            .ok_or_else(|| {
                BuildError::code(
                    "computation type is not registered",
                    vec![("name".into(), Q::NAME.into())],
                )
            })
    }

    pub fn table(&self, index: u32) -> Result<TableEntry> {
        self.tables.read().get(index as usize).cloned().ok_or_else(|| {
            BuildError::code(
                "invalid computation table index",
                vec![("index".into(), index.to_string())],
            )
        })
    }

    /// A token no other output in this process has ever had.
    pub fn fresh_fingerprint(&self, run: RunId) -> Fingerprint {
        let counter = self.token.fetch_add(1, Ordering::Relaxed);
        Fingerprint((u128::from(run.0) << 64) | u128::from(counter))
    }
}

/// Keeps the caller's callee record consistent if a demand is cancelled
/// before it observed a fingerprint.
pub(crate) struct EdgeGuard {
    caller: Option<CallerFrame>,
    callee: NodeId,
    newly_registered: bool,
    defused: bool,
}

impl EdgeGuard {
    pub fn new(caller: Option<CallerFrame>, callee: NodeId) -> Self {
        let newly_registered = caller
            .as_ref()
            .is_some_and(|c| c.computing.register_callee(callee));
        Self { caller, callee, newly_registered, defused: false }
    }

    /// Records the observed fingerprint and disarms the guard.
    pub fn observe_and_defuse(mut self, fingerprint: Fingerprint) {
        if let Some(caller) = &self.caller {
            caller.computing.observe(self.callee, fingerprint);
        }
        self.defused = true;
    }
}

impl Drop for EdgeGuard {
    fn drop(&mut self) {
        if !self.defused
            && self.newly_registered
            && let Some(caller) = &self.caller
        {
            caller.computing.abort_callee(&self.callee);
        }
    }
}

/// Removes a claimed computing slot and wakes waiters if the computation is
/// dropped before completing (task cancellation or a panic unwinding
/// through the executor).
pub(crate) struct ComputingGuard {
    memo: Arc<MemoInner>,
    id: NodeId,
    state: Arc<ComputingState>,
    completed: bool,
}

impl ComputingGuard {
    pub fn new(
        memo: Arc<MemoInner>,
        id: NodeId,
        state: Arc<ComputingState>,
    ) -> Self {
        Self { memo, id, state, completed: false }
    }

    /// Publishes the finished state and wakes waiters.
    pub fn complete(mut self, new_state: NodeState) {
        self.memo.nodes.insert(self.id, new_state);
        self.state.notify.notify_waiters();
        self.completed = true;
    }
}

impl Drop for ComputingGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        // only remove the slot if it is still ours
        self.memo.nodes.remove_if(&self.id, |_, state| {
            matches!(state, NodeState::Computing(c) if Arc::ptr_eq(c, &self.state))
        });
        self.state.notify.notify_waiters();
    }
}

/// Replays a node's recorded dependencies in order.
///
/// Returns `Ok(true)` when every dependency's post-repair fingerprint
/// matches the recorded observation, i.e. the node's cached result is still
/// valid.
pub(crate) async fn verify_deps(
    memo: &Arc<MemoInner>,
    id: NodeId,
    prior: &Arc<ComputedState>,
    computing: &Arc<ComputingState>,
    current_run: RunId,
) -> Result<bool> {
    for (dep_id, old_fingerprint) in &prior.deps {
        let new_fingerprint = if *dep_id == CURRENT_RUN_NODE {
            super::current_run_fingerprint(current_run)
        } else {
            // the dep's stored input is needed to re-demand it
            let dep_input = loop {
                let state =
                    memo.nodes.get(dep_id).map(|entry| entry.value().clone());
                match state {
                    Some(NodeState::Computed(state)) => {
                        break Arc::clone(&state.input);
                    }
                    Some(NodeState::Computing(dep_computing)) => {
                        let caller = CallerFrame {
                            id,
                            computing: Arc::clone(computing),
                        };
                        if let Some(cycle_error) = cycle::find_cycle(
                            memo,
                            *dep_id,
                            &dep_computing,
                            Some(&caller),
                        ) {
                            return Err(BuildError::cycle(cycle_error));
                        }
                        super::wait_for_completion(memo, *dep_id, &dep_computing)
                            .await;
                    }
                    None => return Ok(false),
                }
            };

            let entry = memo.table(dep_id.table)?;
            let caller =
                CallerFrame { id, computing: Arc::clone(computing) };
            (entry.repair)(
                Arc::clone(memo),
                *dep_id,
                dep_input,
                Some(caller),
            )
            .await?
        };

        if new_fingerprint != *old_fingerprint {
            return Ok(false);
        }
    }
    Ok(true)
}

fn invoke_executor<Q: Computation, E: Compute<Q>>(
    executor: Arc<dyn Any + Send + Sync>,
    input: DynValue,
    memo: MemoHandle,
) -> BoxFuture<'static, Result<DynValue>> {
    Box::pin(async move {
        let executor = executor.downcast::<E>().map_err(|_| {
            BuildError::code(
                "executor type mismatch in registry",
                vec![("node".into(), Q::NAME.into())],
            )
        })?;
        let input = input.downcast::<Q>().map_err(|_| {
            BuildError::code(
                "input type mismatch in registry",
                vec![("node".into(), Q::NAME.into())],
            )
        })?;
        let value = executor.compute(input.as_ref(), &memo).await?;
        Ok(Arc::new(value) as DynValue)
    })
}

fn repair_node<Q: Computation>(
    memo: Arc<MemoInner>,
    id: NodeId,
    input: DynValue,
    caller: Option<CallerFrame>,
) -> BoxFuture<'static, Result<Fingerprint>> {
    Box::pin(async move {
        let (fingerprint, _result) =
            super::demand_erased(&memo, id, input, caller).await?;
        Ok(fingerprint)
    })
}

fn cutoff_compare<Q: Computation>(old: &DynValue, new: &DynValue) -> bool {
    match Q::cutoff() {
        super::Cutoff::Simple => false,
        super::Cutoff::AllowCutoff(eq) => match (
            old.downcast_ref::<Q::Output>(),
            new.downcast_ref::<Q::Output>(),
        ) {
            (Some(old), Some(new)) => eq(old, new),
            _ => false,
        },
    }
}

fn frame_of<Q: Computation>(input: &(dyn Any + Send + Sync)) -> CycleFrame {
    input.downcast_ref::<Q>().map_or_else(
        || CycleFrame::new(FrameKind::Internal, Q::NAME),
        Computation::frame,
    )
}

fn table_entry<Q: Computation, E: Compute<Q>>(
    executor: Arc<E>,
) -> TableEntry {
    TableEntry {
        name: Q::NAME,
        executor,
        invoke: invoke_executor::<Q, E>,
        repair: repair_node::<Q>,
        cutoff_compare: cutoff_compare::<Q>,
        frame_of: frame_of::<Q>,
    }
}
