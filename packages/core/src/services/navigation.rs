//! Graph Navigation
//!
//! Read-only walks over a provenance graph store. States and actions
//! alternate along `next`/`resultsIn` edges; inverse actions point back at
//! earlier states and are skipped wherever a walk must not loop.

use crate::db::GraphBase;
use crate::models::{EdgeKind, NodeId, NodeKind};
use std::collections::HashSet;

pub fn is_kind(store: &GraphBase, id: NodeId, kind: NodeKind) -> bool {
    store.node(id).map(|n| n.kind() == kind).unwrap_or(false)
}

/// True if the action undoes another action
pub fn is_inverse(store: &GraphBase, action: NodeId) -> bool {
    !store.outgoing(action, EdgeKind::Inverses).is_empty()
}

/// The cached inverse of `action`, if one was created
pub fn inverse_of(store: &GraphBase, action: NodeId) -> Option<NodeId> {
    store.first_source(action, EdgeKind::Inverses)
}

/// The action an inverse action undoes
pub fn inverted_by(store: &GraphBase, inverse: NodeId) -> Option<NodeId> {
    store.first_target(inverse, EdgeKind::Inverses)
}

pub fn results_in(store: &GraphBase, action: NodeId) -> Option<NodeId> {
    store.first_target(action, EdgeKind::ResultsIn)
}

/// Every action leading into `state`, inverse actions included
pub fn results_from(store: &GraphBase, state: NodeId) -> Vec<NodeId> {
    store.sources(state, EdgeKind::ResultsIn)
}

/// The non-inverse action that produced `state`
pub fn creator_of(store: &GraphBase, state: NodeId) -> Option<NodeId> {
    results_from(store, state)
        .into_iter()
        .find(|a| !is_inverse(store, *a))
}

/// The state an action was executed in
pub fn previous(store: &GraphBase, action: NodeId) -> Option<NodeId> {
    store.first_source(action, EdgeKind::Next)
}

pub fn previous_state(store: &GraphBase, state: NodeId) -> Option<NodeId> {
    creator_of(store, state).and_then(|a| previous(store, a))
}

pub fn next_actions(store: &GraphBase, state: NodeId) -> Vec<NodeId> {
    store.targets(state, EdgeKind::Next)
}

/// States reachable with one non-inverse action
pub fn next_states(store: &GraphBase, state: NodeId) -> Vec<NodeId> {
    next_actions(store, state)
        .into_iter()
        .filter(|a| !is_inverse(store, *a))
        .filter_map(|a| results_in(store, a))
        .collect()
}

pub fn requires(store: &GraphBase, action: NodeId) -> Vec<NodeId> {
    store.indexed_targets(action, EdgeKind::Requires)
}

pub fn creates(store: &GraphBase, action: NodeId) -> Vec<NodeId> {
    store.indexed_targets(action, EdgeKind::Creates)
}

pub fn removes(store: &GraphBase, action: NodeId) -> Vec<NodeId> {
    store.targets(action, EdgeKind::Removes)
}

pub fn consists_of(store: &GraphBase, state: NodeId) -> Vec<NodeId> {
    store.targets(state, EdgeKind::ConsistsOf)
}

/// States from the root to `state`, inclusive
///
/// Stops at the first repeated state, so a malformed loop yields a finite,
/// duplicate-free path.
pub fn path(store: &GraphBase, state: NodeId) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    let mut path = Vec::new();
    let mut current = Some(state);
    while let Some(s) = current {
        if !seen.insert(s) {
            break;
        }
        path.push(s);
        current = previous_state(store, s);
    }
    path.reverse();
    path
}

/// Deepest element shared by two root-first paths, as indices into both
pub fn find_common(a: &[NodeId], b: &[NodeId]) -> Option<(usize, usize)> {
    a.iter()
        .enumerate()
        .rev()
        .find_map(|(i, node)| b.iter().position(|other| other == node).map(|j| (i, j)))
}

/// Drops adjacent action/inverse pairs from a chain
pub fn compress(store: &GraphBase, chain: Vec<NodeId>) -> Vec<NodeId> {
    let mut out: Vec<NodeId> = Vec::with_capacity(chain.len());
    for action in chain {
        if let Some(&last) = out.last() {
            let cancels = inverted_by(store, action) == Some(last)
                || inverted_by(store, last) == Some(action);
            if cancels {
                out.pop();
                continue;
            }
        }
        out.push(action);
    }
    out
}

/// Every state reachable from `start` through non-inverse actions, `start` included
pub fn reachable_states(store: &GraphBase, start: NodeId) -> HashSet<NodeId> {
    let mut seen = HashSet::from([start]);
    let mut queue = vec![start];
    while let Some(state) = queue.pop() {
        for next in next_states(store, state) {
            if seen.insert(next) {
                queue.push(next);
            }
        }
    }
    seen
}
