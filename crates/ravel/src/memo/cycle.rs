//! Cycle detection over the in-flight computation graph.
//!
//! When a demand finds its node already being computed by another task, it
//! must wait. Before waiting, the callee graph of the in-flight node is
//! walked: if it reaches back to the caller, waiting would deadlock and the
//! demand raises a cycle error carrying the frames along the loop instead.

use std::sync::Arc;

use fxhash::FxHashSet;

use super::store::{CallerFrame, ComputingState, MemoInner, NodeId, NodeState};
use crate::error::{CycleError, CycleFrame};

/// Checks whether waiting on `waited` from `caller` would close a cycle.
///
/// Returns the cycle's frames (in dependency order, starting at the waited
/// node and ending with the caller) when it would.
pub(crate) fn find_cycle(
    memo: &Arc<MemoInner>,
    waited_id: NodeId,
    waited: &Arc<ComputingState>,
    caller: Option<&CallerFrame>,
) -> Option<CycleError> {
    // a demand with no caller is a build root; it can wait on anything
    let caller = caller?;

    if waited_id == caller.id {
        // direct self-dependency
        return Some(CycleError {
            frames: vec![waited.frame.clone(), caller.computing.frame.clone()],
        });
    }

    let mut visited = FxHashSet::default();
    visited.insert(waited_id);
    let mut frames = dfs(memo, waited, caller.id, &mut visited)?;

    frames.insert(0, waited.frame.clone());
    frames.push(caller.computing.frame.clone());
    Some(CycleError { frames })
}

/// Depth-first search for `target` through the callees of in-flight nodes.
///
/// Only `Computing` nodes are traversed: a completed callee cannot be
/// waiting on anything.
fn dfs(
    memo: &Arc<MemoInner>,
    state: &ComputingState,
    target: NodeId,
    visited: &mut FxHashSet<NodeId>,
) -> Option<Vec<CycleFrame>> {
    for callee in state.callee_ids() {
        if callee == target {
            return Some(Vec::new());
        }
        if !visited.insert(callee) {
            continue;
        }

        // clone out of the shard before recursing: holding a dashmap ref
        // while re-entering the same shard can deadlock
        let callee_state =
            memo.nodes.get(&callee).map(|entry| entry.value().clone());

        if let Some(NodeState::Computing(callee_computing)) = callee_state
            && let Some(mut frames) =
                dfs(memo, &callee_computing, target, visited)
        {
            frames.insert(0, callee_computing.frame.clone());
            return Some(frames);
        }
    }
    None
}
