//! Graph Store
//!
//! `GraphBase` owns the node/edge arena of one graph and is the only place
//! where nodes and edges are created or destroyed. Every mutation is first
//! handed to the graph's [`GraphBackend`]; the arena changes only when the
//! backend accepted the mutation.
//!
//! # Identity
//!
//! Node and edge ids come from one per-graph counter, so an id never names
//! both a node and an edge. Restoring or migrating a graph moves the counter
//! past the largest id it has seen.

use super::backend::{GraphBackend, Mutation};
use super::error::{GraphError, RestoreError, Result};
use super::events::{EventBus, ProvenanceEvent};
use super::memory_store::MemoryBackend;
use super::sync::{SyncHandle, SyncTicket};
use crate::models::{
    EdgeId, EdgeKind, GraphDesc, GraphDump, GraphEdge, GraphNode, NodeId, NodeRecord,
    ValueContext,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Nodes and edges handed over by [`GraphBase::migrate`]
#[derive(Debug, Default)]
pub struct MigratedGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Position in the id sequence, see [`GraphBase::rollback`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(u64);

pub struct GraphBase {
    desc: GraphDesc,
    nodes: BTreeMap<NodeId, GraphNode>,
    edges: BTreeMap<EdgeId, GraphEdge>,
    next_id: u64,
    backend: Arc<dyn GraphBackend>,
    events: EventBus,
    tickets: Vec<SyncTicket>,
}

impl GraphBase {
    pub fn new(desc: GraphDesc, backend: Arc<dyn GraphBackend>) -> Self {
        Self {
            desc,
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            next_id: 0,
            backend,
            events: EventBus::new(),
            tickets: Vec::new(),
        }
    }

    pub fn in_memory(desc: GraphDesc) -> Self {
        Self::new(desc, Arc::new(MemoryBackend::new()))
    }

    /// Rebuilds a store around nodes and edges taken from another store
    ///
    /// Node values and ids are kept as they are; nothing is written to the
    /// new backend.
    pub fn from_migrated(
        desc: GraphDesc,
        migrated: MigratedGraph,
        backend: Arc<dyn GraphBackend>,
    ) -> Self {
        let mut store = Self::new(desc, backend);
        let max_node = migrated.nodes.iter().map(|n| n.id).max();
        let max_edge = migrated.edges.iter().map(|e| e.id).max();
        store.nodes = migrated.nodes.into_iter().map(|n| (n.id, n)).collect();
        store.edges = migrated.edges.into_iter().map(|e| (e.id, e)).collect();
        store.bump_ids(max_node.max(max_edge));
        store
    }

    pub fn desc(&self) -> &GraphDesc {
        &self.desc
    }

    pub fn set_desc(&mut self, desc: GraphDesc) {
        self.desc = desc;
    }

    pub fn backend(&self) -> Arc<dyn GraphBackend> {
        Arc::clone(&self.backend)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Routes store events (and backend sync events) into `events`
    pub fn attach_events(&mut self, events: EventBus) {
        self.backend.attach_events(events.clone());
        self.events = events;
    }

    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(&id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&GraphEdge> {
        self.edges.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.edges.values()
    }

    pub fn nnodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn nedges(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Outgoing edges of `id` with the given kind, in insertion order
    pub fn outgoing(&self, id: NodeId, kind: EdgeKind) -> Vec<&GraphEdge> {
        self.collect_edges(id, kind, true)
    }

    /// Incoming edges of `id` with the given kind, in insertion order
    pub fn incoming(&self, id: NodeId, kind: EdgeKind) -> Vec<&GraphEdge> {
        self.collect_edges(id, kind, false)
    }

    fn collect_edges(&self, id: NodeId, kind: EdgeKind, outgoing: bool) -> Vec<&GraphEdge> {
        let Some(node) = self.nodes.get(&id) else {
            return Vec::new();
        };
        let ids = if outgoing {
            &node.outgoing
        } else {
            &node.incoming
        };
        ids.iter()
            .filter_map(|e| self.edges.get(e))
            .filter(|e| e.kind == kind)
            .collect()
    }

    pub fn targets(&self, id: NodeId, kind: EdgeKind) -> Vec<NodeId> {
        self.outgoing(id, kind).into_iter().map(|e| e.target).collect()
    }

    /// Targets ordered by the edges' `index` attribute
    pub fn indexed_targets(&self, id: NodeId, kind: EdgeKind) -> Vec<NodeId> {
        let mut edges = self.outgoing(id, kind);
        edges.sort_by_key(|e| e.index.unwrap_or(usize::MAX));
        edges.into_iter().map(|e| e.target).collect()
    }

    pub fn sources(&self, id: NodeId, kind: EdgeKind) -> Vec<NodeId> {
        self.incoming(id, kind).into_iter().map(|e| e.source).collect()
    }

    pub fn first_target(&self, id: NodeId, kind: EdgeKind) -> Option<NodeId> {
        self.outgoing(id, kind).first().map(|e| e.target)
    }

    pub fn first_source(&self, id: NodeId, kind: EdgeKind) -> Option<NodeId> {
        self.incoming(id, kind).first().map(|e| e.source)
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn bump_ids(&mut self, max_seen: Option<u64>) {
        if let Some(max) = max_seen {
            self.next_id = self.next_id.max(max + 1);
        }
    }

    fn write_through(&mut self, mutation: impl FnOnce() -> Mutation) -> Result<()> {
        if !self.backend.wants_dumps() {
            return Ok(());
        }
        let ticket = self.backend.apply(mutation())?;
        if !ticket.is_done() {
            self.tickets.push(ticket);
        }
        Ok(())
    }

    /// Acknowledgements of every mutation since the last call
    pub fn take_sync(&mut self) -> SyncHandle {
        SyncHandle::from_tickets(std::mem::take(&mut self.tickets))
    }

    pub fn add_node(&mut self, record: NodeRecord) -> Result<NodeId> {
        let id = self.alloc_id();
        let node = GraphNode::new(id, record);
        self.write_through(|| Mutation::AddNode {
            node: node.persist(),
        })?;
        let kind = node.kind();
        self.nodes.insert(id, node);
        tracing::trace!("graph {}: added {} node {}", self.desc.id, kind.as_str(), id);
        self.events.emit(ProvenanceEvent::NodeAdded { id, kind });
        Ok(id)
    }

    /// Changes a node's record in place and writes it through
    pub fn update_node(&mut self, id: NodeId, update: impl FnOnce(&mut NodeRecord)) -> Result<()> {
        let node = self.nodes.get(&id).ok_or(GraphError::NodeNotFound(id))?;
        let mut updated = node.clone();
        update(&mut updated.record);
        self.write_through(|| Mutation::UpdateNode {
            node: updated.persist(),
        })?;
        self.nodes.insert(id, updated);
        self.events.emit(ProvenanceEvent::NodeUpdated { id });
        Ok(())
    }

    /// Removes a node and every edge attached to it
    pub fn remove_node(&mut self, id: NodeId) -> Result<bool> {
        let Some(node) = self.nodes.get(&id) else {
            return Ok(false);
        };
        let mut attached: Vec<EdgeId> = node.outgoing.iter().chain(&node.incoming).copied().collect();
        attached.sort_unstable();
        attached.dedup();
        for edge in attached {
            self.remove_edge(edge)?;
        }
        self.write_through(|| Mutation::RemoveNode { id })?;
        self.nodes.remove(&id);
        self.events.emit(ProvenanceEvent::NodeRemoved { id });
        Ok(true)
    }

    pub fn add_edge(&mut self, source: NodeId, kind: EdgeKind, target: NodeId) -> Result<EdgeId> {
        self.insert_edge(source, kind, target, None)
    }

    /// Adds an edge carrying an argument position
    pub fn add_indexed_edge(
        &mut self,
        source: NodeId,
        kind: EdgeKind,
        target: NodeId,
        index: usize,
    ) -> Result<EdgeId> {
        self.insert_edge(source, kind, target, Some(index))
    }

    fn insert_edge(
        &mut self,
        source: NodeId,
        kind: EdgeKind,
        target: NodeId,
        index: Option<usize>,
    ) -> Result<EdgeId> {
        for endpoint in [source, target] {
            if !self.nodes.contains_key(&endpoint) {
                return Err(GraphError::dangling_edge(kind.as_str(), endpoint));
            }
        }
        let id = self.alloc_id();
        let edge = GraphEdge {
            id,
            kind,
            source,
            target,
            index,
        };
        self.write_through(|| Mutation::AddEdge {
            edge: edge.persist(),
        })?;
        self.link(edge);
        self.events.emit(ProvenanceEvent::EdgeAdded {
            id,
            kind,
            source,
            target,
        });
        Ok(id)
    }

    fn link(&mut self, edge: GraphEdge) {
        if let Some(src) = self.nodes.get_mut(&edge.source) {
            src.outgoing.push(edge.id);
        }
        if let Some(tgt) = self.nodes.get_mut(&edge.target) {
            tgt.incoming.push(edge.id);
        }
        self.edges.insert(edge.id, edge);
    }

    pub fn update_edge(&mut self, id: EdgeId, index: Option<usize>) -> Result<()> {
        let edge = self.edges.get(&id).ok_or(GraphError::EdgeNotFound(id))?;
        let mut updated = edge.clone();
        updated.index = index;
        self.write_through(|| Mutation::UpdateEdge {
            edge: updated.persist(),
        })?;
        self.edges.insert(id, updated);
        self.events.emit(ProvenanceEvent::EdgeUpdated { id });
        Ok(())
    }

    pub fn remove_edge(&mut self, id: EdgeId) -> Result<bool> {
        if !self.edges.contains_key(&id) {
            return Ok(false);
        }
        self.write_through(|| Mutation::RemoveEdge { id })?;
        self.unlink(id);
        Ok(true)
    }

    fn unlink(&mut self, id: EdgeId) {
        if let Some(edge) = self.edges.remove(&id) {
            if let Some(src) = self.nodes.get_mut(&edge.source) {
                src.outgoing.retain(|e| *e != id);
            }
            if let Some(tgt) = self.nodes.get_mut(&edge.target) {
                tgt.incoming.retain(|e| *e != id);
            }
        }
        self.events.emit(ProvenanceEvent::EdgeRemoved { id });
    }

    /// Marks the current end of the id sequence
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.next_id)
    }

    /// Removes every node and edge added since `checkpoint`
    ///
    /// Removals are written through. A backend refusing one is logged and the
    /// arena is rolled back regardless. Edges added since the checkpoint only
    /// ever touch nodes that existed then or were added since.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        let edges: Vec<EdgeId> = self.edges.range(checkpoint.0..).map(|(id, _)| *id).rev().collect();
        let nodes: Vec<NodeId> = self.nodes.range(checkpoint.0..).map(|(id, _)| *id).rev().collect();
        for id in edges {
            if let Err(e) = self.write_through(|| Mutation::RemoveEdge { id }) {
                tracing::warn!("graph {}: rollback of edge {} not written: {}", self.desc.id, id, e);
            }
            self.unlink(id);
        }
        for id in nodes {
            if let Err(e) = self.write_through(|| Mutation::RemoveNode { id }) {
                tracing::warn!("graph {}: rollback of node {} not written: {}", self.desc.id, id, e);
            }
            self.nodes.remove(&id);
            self.events.emit(ProvenanceEvent::NodeRemoved { id });
        }
        tracing::debug!("graph {}: rolled back to id {}", self.desc.id, checkpoint.0);
    }

    pub fn persist(&self) -> GraphDump {
        GraphDump {
            root: self.desc.id.clone(),
            nodes: self.nodes.values().map(GraphNode::persist).collect(),
            edges: self.edges.values().map(GraphEdge::persist).collect(),
        }
    }

    /// Adds the content of `dump` and writes it through to the backend
    ///
    /// Nodes are rebuilt first, edges are then resolved against the restored
    /// node ids. Validation happens before anything is written, so a failed
    /// restore leaves both the arena and the backend untouched.
    pub fn restore(&mut self, dump: GraphDump, context: &ValueContext) -> Result<()> {
        let (nodes, edges) = self.rebuild(dump, context)?;
        if self.backend.wants_dumps() {
            for node in &nodes {
                self.write_through(|| Mutation::AddNode {
                    node: node.persist(),
                })?;
            }
            for edge in &edges {
                self.write_through(|| Mutation::AddEdge {
                    edge: edge.persist(),
                })?;
            }
        }
        self.insert_rebuilt(nodes, edges);
        Ok(())
    }

    /// Like [`restore`](Self::restore) but without writing to the backend,
    /// for content that was just read from it
    pub fn hydrate(&mut self, dump: GraphDump, context: &ValueContext) -> Result<()> {
        let (nodes, edges) = self.rebuild(dump, context)?;
        self.insert_rebuilt(nodes, edges);
        Ok(())
    }

    fn rebuild(
        &self,
        dump: GraphDump,
        context: &ValueContext,
    ) -> std::result::Result<(Vec<GraphNode>, Vec<GraphEdge>), RestoreError> {
        let mut node_ids = HashSet::with_capacity(dump.nodes.len());
        let mut nodes = Vec::with_capacity(dump.nodes.len());
        for node in dump.nodes {
            if self.nodes.contains_key(&node.id) || !node_ids.insert(node.id) {
                return Err(RestoreError::DuplicateNode(node.id));
            }
            nodes.push(GraphNode::restore(node, context));
        }

        let mut edge_ids = HashSet::with_capacity(dump.edges.len());
        let mut edges = Vec::with_capacity(dump.edges.len());
        for edge in dump.edges {
            for endpoint in [edge.source, edge.target] {
                if !node_ids.contains(&endpoint) {
                    return Err(RestoreError::DanglingEdge {
                        edge: edge.id,
                        missing: endpoint,
                    });
                }
            }
            if self.edges.contains_key(&edge.id) || !edge_ids.insert(edge.id) {
                return Err(RestoreError::DuplicateEdge(edge.id));
            }
            edges.push(GraphEdge::restore(edge));
        }
        Ok((nodes, edges))
    }

    fn insert_rebuilt(&mut self, nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) {
        let max_node = nodes.iter().map(|n| n.id).max();
        let max_edge = edges.iter().map(|e| e.id).max();
        let (nnodes, nedges) = (nodes.len(), edges.len());
        for node in nodes {
            self.nodes.insert(node.id, node);
        }
        for edge in edges {
            self.link(edge);
        }
        self.bump_ids(max_node.max(max_edge));
        tracing::debug!(
            "graph {}: restored {} nodes and {} edges",
            self.desc.id,
            nnodes,
            nedges
        );
    }

    /// Hands over all nodes and edges, leaving this store empty
    ///
    /// Nothing is written to the backend; the caller rebuilds a store around
    /// the returned arrays with [`from_migrated`](Self::from_migrated).
    pub fn migrate(&mut self) -> MigratedGraph {
        let nodes = std::mem::take(&mut self.nodes).into_values().collect();
        let edges = std::mem::take(&mut self.edges).into_values().collect();
        MigratedGraph { nodes, edges }
    }

    /// Writes whatever changed in the arena since `base` was persisted
    ///
    /// Used after a migration: the new backend received `base`, and edits
    /// made while it was uploaded still have to reach it. Returns the number
    /// of mutations written.
    pub fn write_changes_since(&mut self, base: &GraphDump) -> Result<usize> {
        let old_nodes: HashMap<NodeId, _> = base.nodes.iter().map(|n| (n.id, n)).collect();
        let old_edges: HashMap<EdgeId, _> = base.edges.iter().map(|e| (e.id, e)).collect();

        let mut mutations = Vec::new();
        for edge in &base.edges {
            if !self.edges.contains_key(&edge.id) {
                mutations.push(Mutation::RemoveEdge { id: edge.id });
            }
        }
        for node in &base.nodes {
            if !self.nodes.contains_key(&node.id) {
                mutations.push(Mutation::RemoveNode { id: node.id });
            }
        }
        for node in self.nodes.values() {
            let dump = node.persist();
            match old_nodes.get(&node.id) {
                None => mutations.push(Mutation::AddNode { node: dump }),
                Some(old) if **old != dump => mutations.push(Mutation::UpdateNode { node: dump }),
                Some(_) => {}
            }
        }
        for edge in self.edges.values() {
            let dump = edge.persist();
            match old_edges.get(&edge.id) {
                None => mutations.push(Mutation::AddEdge { edge: dump }),
                Some(old) if **old != dump => mutations.push(Mutation::UpdateEdge { edge: dump }),
                Some(_) => {}
            }
        }

        let written = mutations.len();
        for mutation in mutations {
            self.write_through(move || mutation)?;
        }
        if written > 0 {
            tracing::debug!(
                "graph {}: wrote {} changes made during migration",
                self.desc.id,
                written
            );
        }
        Ok(written)
    }

    /// Removes every node and edge
    pub fn clear(&mut self) -> Result<()> {
        self.write_through(|| Mutation::Clear)?;
        self.nodes.clear();
        self.edges.clear();
        Ok(())
    }
}

impl std::fmt::Debug for GraphBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphBase")
            .field("id", &self.desc.id)
            .field("backend", &self.backend.kind())
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::local_store::LocalStorageBackend;
    use crate::db::storage::{KeyValueStorage, MemoryStorage};
    use crate::models::{EdgeDump, StateNode};

    fn store() -> GraphBase {
        GraphBase::in_memory(GraphDesc::in_memory("test"))
    }

    fn state(name: &str) -> NodeRecord {
        NodeRecord::State(StateNode::new(name))
    }

    #[test]
    fn add_edge_maintains_adjacency() {
        let mut g = store();
        let a = g.add_node(state("a")).unwrap();
        let b = g.add_node(state("b")).unwrap();
        let e = g.add_edge(a, EdgeKind::Next, b).unwrap();

        assert_eq!(g.node(a).unwrap().outgoing(), &[e]);
        assert_eq!(g.node(b).unwrap().incoming(), &[e]);
        assert_eq!(g.targets(a, EdgeKind::Next), vec![b]);
        assert!(g.targets(a, EdgeKind::ResultsIn).is_empty());
    }

    #[test]
    fn add_edge_rejects_missing_endpoint() {
        let mut g = store();
        let a = g.add_node(state("a")).unwrap();
        let err = g.add_edge(a, EdgeKind::Next, 99).unwrap_err();
        assert!(matches!(err, GraphError::DanglingEdge { missing: 99, .. }));
        assert_eq!(g.nedges(), 0);
    }

    #[test]
    fn remove_node_removes_attached_edges() {
        let mut g = store();
        let a = g.add_node(state("a")).unwrap();
        let b = g.add_node(state("b")).unwrap();
        g.add_edge(a, EdgeKind::Next, b).unwrap();
        g.add_edge(b, EdgeKind::Next, a).unwrap();

        assert!(g.remove_node(b).unwrap());
        assert_eq!(g.nedges(), 0);
        assert!(g.node(a).unwrap().outgoing().is_empty());
        assert!(g.node(a).unwrap().incoming().is_empty());
    }

    #[test]
    fn indexed_targets_follow_index() {
        let mut g = store();
        let a = g.add_node(state("a")).unwrap();
        let x = g.add_node(state("x")).unwrap();
        let y = g.add_node(state("y")).unwrap();
        g.add_indexed_edge(a, EdgeKind::Requires, y, 1).unwrap();
        g.add_indexed_edge(a, EdgeKind::Requires, x, 0).unwrap();
        assert_eq!(g.indexed_targets(a, EdgeKind::Requires), vec![x, y]);
    }

    #[test]
    fn restore_bumps_id_allocator() {
        let mut source = store();
        let a = source.add_node(state("a")).unwrap();
        let b = source.add_node(state("b")).unwrap();
        source.add_edge(a, EdgeKind::Next, b).unwrap();

        let mut target = store();
        target
            .restore(source.persist(), &ValueContext::new())
            .unwrap();
        let c = target.add_node(state("c")).unwrap();
        assert!(c > 2);
        assert_eq!(target.nnodes(), 3);
    }

    #[test]
    fn restore_rejects_dangling_edge_without_side_effects() {
        let mut source = store();
        let a = source.add_node(state("a")).unwrap();
        let mut dump = source.persist();
        dump.edges.push(EdgeDump {
            kind: EdgeKind::Next,
            id: 10,
            source: 42,
            target: a,
            index: None,
        });

        let storage = Arc::new(MemoryStorage::new());
        let mut target = GraphBase::new(
            GraphDesc::new("t", "t", "test", "me"),
            Arc::new(LocalStorageBackend::new("t", storage.clone())),
        );
        let err = target.restore(dump, &ValueContext::new()).unwrap_err();
        assert!(matches!(
            err,
            GraphError::Restore(RestoreError::DanglingEdge {
                edge: 10,
                missing: 42
            })
        ));
        assert!(target.is_empty());
        assert_eq!(target.nedges(), 0);
        assert!(storage.get_item("grapht.nodes").unwrap().is_none());
    }

    #[test]
    fn rollback_drops_everything_after_checkpoint() {
        let storage = Arc::new(MemoryStorage::new());
        let mut g = GraphBase::new(
            GraphDesc::new("r", "r", "test", "me"),
            Arc::new(LocalStorageBackend::new("r", storage.clone())),
        );
        let a = g.add_node(state("a")).unwrap();
        let mark = g.checkpoint();
        let b = g.add_node(state("b")).unwrap();
        g.add_edge(a, EdgeKind::Next, b).unwrap();

        g.rollback(mark);
        assert_eq!(g.nnodes(), 1);
        assert_eq!(g.nedges(), 0);
        assert!(g.node(a).unwrap().outgoing().is_empty());
        assert!(storage.get_item(&format!("graphr.node.{}", b)).unwrap().is_none());
        assert!(storage.get_item(&format!("graphr.node.{}", a)).unwrap().is_some());
    }

    #[test]
    fn migrate_hands_over_identity() {
        let mut g = store();
        let a = g.add_node(state("a")).unwrap();
        let migrated = g.migrate();
        assert!(g.is_empty());

        let mut next = GraphBase::from_migrated(
            GraphDesc::in_memory("test"),
            migrated,
            Arc::new(MemoryBackend::new()),
        );
        assert_eq!(next.node(a).unwrap().record.name(), "a");
        assert!(next.add_node(state("b")).unwrap() > a);
    }

    #[test]
    fn changes_since_dump_are_written() {
        let mut g = store();
        let a = g.add_node(state("a")).unwrap();
        let b = g.add_node(state("b")).unwrap();
        let base = g.persist();

        let c = g.add_node(state("c")).unwrap();
        g.add_edge(a, EdgeKind::Next, c).unwrap();
        g.remove_node(b).unwrap();

        let storage = Arc::new(MemoryStorage::new());
        let backend = Arc::new(LocalStorageBackend::new("m", storage.clone()));
        let mut moved =
            GraphBase::from_migrated(GraphDesc::new("m", "m", "test", "me"), g.migrate(), backend);
        assert_eq!(moved.write_changes_since(&base).unwrap(), 3);
        assert!(storage.get_item(&format!("graphm.node.{}", c)).unwrap().is_some());
        assert!(storage.get_item(&format!("graphm.node.{}", a)).unwrap().is_none());
        assert_eq!(moved.write_changes_since(&moved.persist()).unwrap(), 0);
    }

    #[test]
    fn update_node_writes_through() {
        let storage = Arc::new(MemoryStorage::new());
        let mut g = GraphBase::new(
            GraphDesc::new("u", "u", "test", "me"),
            Arc::new(LocalStorageBackend::new("u", storage.clone())),
        );
        let a = g.add_node(state("before")).unwrap();
        g.update_node(a, |record| {
            if let NodeRecord::State(s) = record {
                s.name = "after".into();
            }
        })
        .unwrap();
        let stored = storage.get_item(&format!("graphu.node.{}", a)).unwrap().unwrap();
        assert!(stored.contains("after"));
    }
}
