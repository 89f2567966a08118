//! Remote Transport Contracts
//!
//! The remote backend talks to its server through [`RemoteTransport`]
//! (mutation batches and bulk imports) and the remote graph manager through
//! [`RemoteCatalog`] (graph descriptions and full dumps). [`InMemoryRemote`]
//! implements both in-process; it backs the development graph server and
//! tests. [`HttpRemote`](super::HttpRemote) implements both over HTTP.

use super::backend::Mutation;
use super::error::TransportError;
use crate::models::{DescPatch, EdgeDump, EdgeId, GraphDesc, GraphDump, NodeDump, NodeId};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sends store mutations to a remote graph
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Applies a batch of mutations, in order
    async fn send_batch(&self, graph_id: &str, batch: &[Mutation]) -> Result<(), TransportError>;

    /// Adds nodes and edges in bulk
    async fn import(
        &self,
        graph_id: &str,
        nodes: &[NodeDump],
        edges: &[EdgeDump],
    ) -> Result<(), TransportError>;
}

/// A stored remote graph: description plus content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteGraph {
    pub desc: GraphDesc,
    pub dump: GraphDump,
}

/// Upload request body: a description and optional initial content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    pub desc: GraphDesc,
    #[serde(default)]
    pub dump: Option<GraphDump>,
}

/// Registry of remote graphs
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    async fn list(&self) -> Result<Vec<GraphDesc>, TransportError>;

    async fn get(&self, id: &str) -> Result<Option<RemoteGraph>, TransportError>;

    /// Stores a new graph; the remote assigns the id when `desc.id` is empty
    async fn upload(
        &self,
        desc: GraphDesc,
        dump: Option<GraphDump>,
    ) -> Result<GraphDesc, TransportError>;

    async fn remove(&self, id: &str) -> Result<bool, TransportError>;

    async fn modify(&self, id: &str, patch: DescPatch) -> Result<GraphDesc, TransportError>;
}

#[derive(Debug, Clone)]
struct StoredGraph {
    desc: GraphDesc,
    nodes: BTreeMap<NodeId, NodeDump>,
    edges: BTreeMap<EdgeId, EdgeDump>,
}

impl StoredGraph {
    fn apply(&mut self, mutation: &Mutation) {
        match mutation {
            Mutation::AddNode { node } | Mutation::UpdateNode { node } => {
                self.nodes.insert(node.id, node.clone());
            }
            Mutation::RemoveNode { id } => {
                self.nodes.remove(id);
                self.edges.retain(|_, e| e.source != *id && e.target != *id);
            }
            Mutation::AddEdge { edge } | Mutation::UpdateEdge { edge } => {
                self.edges.insert(edge.id, edge.clone());
            }
            Mutation::RemoveEdge { id } => {
                self.edges.remove(id);
            }
            Mutation::Clear => {
                self.nodes.clear();
                self.edges.clear();
            }
        }
        self.refresh_size();
    }

    fn refresh_size(&mut self) {
        self.desc.size = [self.nodes.len(), self.edges.len()];
    }

    fn to_remote(&self) -> RemoteGraph {
        RemoteGraph {
            desc: self.desc.clone(),
            dump: GraphDump {
                root: self.desc.id.clone(),
                nodes: self.nodes.values().cloned().collect(),
                edges: self.edges.values().cloned().collect(),
            },
        }
    }
}

/// In-process remote holding graphs in memory
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    graphs: RwLock<BTreeMap<String, StoredGraph>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn graph_count(&self) -> usize {
        self.graphs.read().len()
    }

    /// Current content of a graph
    pub fn snapshot(&self, id: &str) -> Option<RemoteGraph> {
        self.graphs.read().get(id).map(StoredGraph::to_remote)
    }
}

#[async_trait]
impl RemoteTransport for InMemoryRemote {
    async fn send_batch(&self, graph_id: &str, batch: &[Mutation]) -> Result<(), TransportError> {
        let mut graphs = self.graphs.write();
        let graph = graphs
            .get_mut(graph_id)
            .ok_or_else(|| TransportError::UnknownGraph(graph_id.to_string()))?;
        for mutation in batch {
            graph.apply(mutation);
        }
        Ok(())
    }

    async fn import(
        &self,
        graph_id: &str,
        nodes: &[NodeDump],
        edges: &[EdgeDump],
    ) -> Result<(), TransportError> {
        let mut graphs = self.graphs.write();
        let graph = graphs
            .get_mut(graph_id)
            .ok_or_else(|| TransportError::UnknownGraph(graph_id.to_string()))?;
        for node in nodes {
            graph.nodes.insert(node.id, node.clone());
        }
        for edge in edges {
            graph.edges.insert(edge.id, edge.clone());
        }
        graph.refresh_size();
        Ok(())
    }
}

#[async_trait]
impl RemoteCatalog for InMemoryRemote {
    async fn list(&self) -> Result<Vec<GraphDesc>, TransportError> {
        Ok(self.graphs.read().values().map(|g| g.desc.clone()).collect())
    }

    async fn get(&self, id: &str) -> Result<Option<RemoteGraph>, TransportError> {
        Ok(self.snapshot(id))
    }

    async fn upload(
        &self,
        mut desc: GraphDesc,
        dump: Option<GraphDump>,
    ) -> Result<GraphDesc, TransportError> {
        if desc.id.is_empty() {
            desc.id = uuid::Uuid::new_v4().to_string();
        }
        desc.local = false;

        let mut graphs = self.graphs.write();
        if graphs.contains_key(&desc.id) {
            return Err(TransportError::rejected(format!(
                "graph '{}' already exists",
                desc.id
            )));
        }
        let mut stored = StoredGraph {
            desc: desc.clone(),
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
        };
        if let Some(dump) = dump {
            stored.nodes = dump.nodes.into_iter().map(|n| (n.id, n)).collect();
            stored.edges = dump.edges.into_iter().map(|e| (e.id, e)).collect();
        }
        stored.refresh_size();
        let desc = stored.desc.clone();
        graphs.insert(desc.id.clone(), stored);
        tracing::info!("Stored remote graph {} ({})", desc.id, desc.name);
        Ok(desc)
    }

    async fn remove(&self, id: &str) -> Result<bool, TransportError> {
        Ok(self.graphs.write().remove(id).is_some())
    }

    async fn modify(&self, id: &str, patch: DescPatch) -> Result<GraphDesc, TransportError> {
        let mut graphs = self.graphs.write();
        let graph = graphs
            .get_mut(id)
            .ok_or_else(|| TransportError::UnknownGraph(id.to_string()))?;
        patch.apply_to(&mut graph.desc);
        Ok(graph.desc.clone())
    }
}
