//! Graph Backend Abstraction
//!
//! A [`GraphBackend`] receives every mutation the graph store applies to its
//! in-memory arena and makes it durable in its own way: not at all
//! (memory), synchronously (local key-value storage) or batched over a
//! network transport (remote).
//!
//! The arena is always the source of truth for reads. Backends are write
//! targets plus a load path used when a graph is opened.
//!
//! # Implementations
//!
//! - [`MemoryBackend`](super::MemoryBackend)
//! - [`LocalStorageBackend`](super::LocalStorageBackend)
//! - [`RemoteStoreBackend`](super::RemoteStoreBackend)

use super::error::Result;
use super::events::EventBus;
use super::sync::SyncTicket;
use crate::models::{EdgeDump, EdgeId, NodeDump, NodeId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Local,
    Remote,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Local => "local",
            BackendKind::Remote => "remote",
        }
    }
}

/// A single store mutation, also the unit of a remote batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Mutation {
    AddNode { node: NodeDump },
    UpdateNode { node: NodeDump },
    RemoveNode { id: NodeId },
    AddEdge { edge: EdgeDump },
    UpdateEdge { edge: EdgeDump },
    RemoveEdge { id: EdgeId },
    Clear,
}

impl Mutation {
    pub fn op_name(&self) -> &'static str {
        match self {
            Mutation::AddNode { .. } => "addNode",
            Mutation::UpdateNode { .. } => "updateNode",
            Mutation::RemoveNode { .. } => "removeNode",
            Mutation::AddEdge { .. } => "addEdge",
            Mutation::UpdateEdge { .. } => "updateEdge",
            Mutation::RemoveEdge { .. } => "removeEdge",
            Mutation::Clear => "clear",
        }
    }
}

/// Write target of a graph store
#[async_trait]
pub trait GraphBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether mutations need serialized node/edge dumps
    ///
    /// The store skips building dumps for backends that discard them.
    fn wants_dumps(&self) -> bool {
        true
    }

    /// Hands the backend the graph's event channel for sync notifications
    fn attach_events(&self, _events: EventBus) {}

    /// Records one mutation
    ///
    /// Called before the arena is changed; an error leaves the arena as it
    /// was. The returned ticket resolves when the mutation is durable.
    fn apply(&self, mutation: Mutation) -> Result<SyncTicket>;

    /// Bulk write used by import, clone and migration
    async fn add_all(&self, nodes: Vec<NodeDump>, edges: Vec<EdgeDump>) -> Result<()>;

    /// Forces pending mutations out and waits for them
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Number of flushes currently in flight
    fn active_sync_operations(&self) -> usize {
        0
    }
}
