//! Local Storage Backend
//!
//! Write-through persistence into a [`KeyValueStorage`]. Every mutation is
//! serialized immediately. Layout for a graph with id `g`:
//!
//! | key              | value                     |
//! |------------------|---------------------------|
//! | `graphg.nodes`   | JSON array of node ids    |
//! | `graphg.node.N`  | node dump of node `N`     |
//! | `graphg.edges`   | JSON array of edge ids    |
//! | `graphg.edge.E`  | edge dump of edge `E`     |

use super::backend::{BackendKind, GraphBackend, Mutation};
use super::error::Result;
use super::storage::{read_json, write_json, KeyValueStorage};
use super::sync::SyncTicket;
use crate::models::{EdgeDump, GraphDump, NodeDump};
use async_trait::async_trait;
use std::sync::Arc;

pub struct LocalStorageBackend {
    uid: String,
    graph_id: String,
    storage: Arc<dyn KeyValueStorage>,
}

impl LocalStorageBackend {
    pub fn new(graph_id: impl Into<String>, storage: Arc<dyn KeyValueStorage>) -> Self {
        let graph_id = graph_id.into();
        Self {
            uid: format!("graph{}", graph_id),
            graph_id,
            storage,
        }
    }

    pub fn graph_id(&self) -> &str {
        &self.graph_id
    }

    fn nodes_key(&self) -> String {
        format!("{}.nodes", self.uid)
    }

    fn node_key(&self, id: u64) -> String {
        format!("{}.node.{}", self.uid, id)
    }

    fn edges_key(&self) -> String {
        format!("{}.edges", self.uid)
    }

    fn edge_key(&self, id: u64) -> String {
        format!("{}.edge.{}", self.uid, id)
    }

    fn read_ids(&self, key: &str) -> Result<Vec<u64>> {
        Ok(read_json::<Vec<u64>>(self.storage.as_ref(), key)?.unwrap_or_default())
    }

    fn add_id(&self, key: &str, id: u64) -> Result<()> {
        let mut ids = self.read_ids(key)?;
        if !ids.contains(&id) {
            ids.push(id);
            write_json(self.storage.as_ref(), key, &ids)?;
        }
        Ok(())
    }

    fn remove_id(&self, key: &str, id: u64) -> Result<()> {
        let mut ids = self.read_ids(key)?;
        let before = ids.len();
        ids.retain(|i| *i != id);
        if ids.len() != before {
            write_json(self.storage.as_ref(), key, &ids)?;
        }
        Ok(())
    }

    /// Reads the stored graph, `None` if nothing was ever written
    pub fn load(&self) -> Result<Option<GraphDump>> {
        let Some(node_ids) = read_json::<Vec<u64>>(self.storage.as_ref(), &self.nodes_key())?
        else {
            return Ok(None);
        };
        let edge_ids = self.read_ids(&self.edges_key())?;

        let mut nodes = Vec::with_capacity(node_ids.len());
        for id in node_ids {
            match read_json::<NodeDump>(self.storage.as_ref(), &self.node_key(id))? {
                Some(node) => nodes.push(node),
                None => tracing::warn!("Graph {}: node {} listed but missing", self.graph_id, id),
            }
        }
        let mut edges = Vec::with_capacity(edge_ids.len());
        for id in edge_ids {
            match read_json::<EdgeDump>(self.storage.as_ref(), &self.edge_key(id))? {
                Some(edge) => edges.push(edge),
                None => tracing::warn!("Graph {}: edge {} listed but missing", self.graph_id, id),
            }
        }

        tracing::debug!(
            "Loaded graph {} from local storage: {} nodes, {} edges",
            self.graph_id,
            nodes.len(),
            edges.len()
        );
        Ok(Some(GraphDump {
            root: self.graph_id.clone(),
            nodes,
            edges,
        }))
    }

    /// Removes every key of the graph
    pub fn delete(&self) -> Result<()> {
        for id in self.read_ids(&self.nodes_key())? {
            self.storage.remove_item(&self.node_key(id))?;
        }
        for id in self.read_ids(&self.edges_key())? {
            self.storage.remove_item(&self.edge_key(id))?;
        }
        self.storage.remove_item(&self.nodes_key())?;
        self.storage.remove_item(&self.edges_key())?;
        Ok(())
    }
}

#[async_trait]
impl GraphBackend for LocalStorageBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn apply(&self, mutation: Mutation) -> Result<SyncTicket> {
        let storage = self.storage.as_ref();
        match mutation {
            Mutation::AddNode { node } => {
                write_json(storage, &self.node_key(node.id), &node)?;
                self.add_id(&self.nodes_key(), node.id)?;
            }
            Mutation::UpdateNode { node } => {
                write_json(storage, &self.node_key(node.id), &node)?;
            }
            Mutation::RemoveNode { id } => {
                self.remove_id(&self.nodes_key(), id)?;
                storage.remove_item(&self.node_key(id))?;
            }
            Mutation::AddEdge { edge } => {
                write_json(storage, &self.edge_key(edge.id), &edge)?;
                self.add_id(&self.edges_key(), edge.id)?;
            }
            Mutation::UpdateEdge { edge } => {
                write_json(storage, &self.edge_key(edge.id), &edge)?;
            }
            Mutation::RemoveEdge { id } => {
                self.remove_id(&self.edges_key(), id)?;
                storage.remove_item(&self.edge_key(id))?;
            }
            Mutation::Clear => {
                self.delete()?;
                write_json(storage, &self.nodes_key(), &Vec::<u64>::new())?;
                write_json(storage, &self.edges_key(), &Vec::<u64>::new())?;
            }
        }
        Ok(SyncTicket::done())
    }

    async fn add_all(&self, nodes: Vec<NodeDump>, edges: Vec<EdgeDump>) -> Result<()> {
        let storage = self.storage.as_ref();
        let mut node_ids = self.read_ids(&self.nodes_key())?;
        for node in &nodes {
            write_json(storage, &self.node_key(node.id), node)?;
            if !node_ids.contains(&node.id) {
                node_ids.push(node.id);
            }
        }
        let mut edge_ids = self.read_ids(&self.edges_key())?;
        for edge in &edges {
            write_json(storage, &self.edge_key(edge.id), edge)?;
            if !edge_ids.contains(&edge.id) {
                edge_ids.push(edge.id);
            }
        }
        write_json(storage, &self.nodes_key(), &node_ids)?;
        write_json(storage, &self.edges_key(), &edge_ids)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::storage::MemoryStorage;
    use crate::models::{EdgeKind, RecordDump, StateNode};

    fn state_dump(id: u64, name: &str) -> NodeDump {
        NodeDump {
            id,
            record: RecordDump::State(StateNode::new(name)),
        }
    }

    #[test]
    fn mutations_use_documented_keys() {
        let storage = Arc::new(MemoryStorage::new());
        let backend = LocalStorageBackend::new("7", storage.clone());

        backend
            .apply(Mutation::AddNode {
                node: state_dump(1, "Start"),
            })
            .unwrap();
        backend
            .apply(Mutation::AddNode {
                node: state_dump(2, "Next"),
            })
            .unwrap();
        backend
            .apply(Mutation::AddEdge {
                edge: EdgeDump {
                    kind: EdgeKind::Next,
                    id: 3,
                    source: 1,
                    target: 2,
                    index: None,
                },
            })
            .unwrap();

        assert_eq!(
            storage.keys(),
            vec!["graph7.edge.3", "graph7.edges", "graph7.node.1", "graph7.node.2", "graph7.nodes"]
        );
        assert_eq!(storage.get_item("graph7.nodes").unwrap().unwrap(), "[1,2]");
    }

    #[test]
    fn load_returns_none_for_unknown_graph() {
        let backend = LocalStorageBackend::new("x", Arc::new(MemoryStorage::new()));
        assert!(backend.load().unwrap().is_none());
    }

    #[test]
    fn remove_and_clear_drop_keys() {
        let storage = Arc::new(MemoryStorage::new());
        let backend = LocalStorageBackend::new("1", storage.clone());
        backend
            .apply(Mutation::AddNode {
                node: state_dump(1, "Start"),
            })
            .unwrap();
        backend.apply(Mutation::RemoveNode { id: 1 }).unwrap();
        assert_eq!(storage.get_item("graph1.nodes").unwrap().unwrap(), "[]");
        assert!(storage.get_item("graph1.node.1").unwrap().is_none());

        backend
            .apply(Mutation::AddNode {
                node: state_dump(2, "Other"),
            })
            .unwrap();
        backend.apply(Mutation::Clear).unwrap();
        let dump = backend.load().unwrap().unwrap();
        assert!(dump.nodes.is_empty());
    }

    #[tokio::test]
    async fn add_all_then_load() {
        let backend = LocalStorageBackend::new("b", Arc::new(MemoryStorage::new()));
        backend
            .add_all(vec![state_dump(0, "Start"), state_dump(1, "S1")], vec![])
            .await
            .unwrap();
        let dump = backend.load().unwrap().unwrap();
        assert_eq!(dump.nodes.len(), 2);
        assert_eq!(dump.root, "b");
    }
}
