//! Graph Store Error Types
//!
//! Errors raised by the arena, the storage backends and the remote
//! transport. Service-layer errors wrap these.

use crate::models::{EdgeId, NodeId};
use thiserror::Error;

/// Reasons a dump could not be restored
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RestoreError {
    /// An edge references a node id that is not part of the restored set
    #[error("Edge {edge} references unknown node {missing}")]
    DanglingEdge { edge: EdgeId, missing: NodeId },

    #[error("Duplicate node id {0} in dump")]
    DuplicateNode(NodeId),

    #[error("Duplicate edge id {0} in dump")]
    DuplicateEdge(EdgeId),
}

/// Graph store errors
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Failed to restore graph: {0}")]
    Restore(#[from] RestoreError),

    /// `add_edge` was called with an endpoint that does not exist
    #[error("Cannot add {kind} edge: node {missing} does not exist")]
    DanglingEdge { kind: &'static str, missing: NodeId },

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Edge not found: {0}")]
    EdgeNotFound(EdgeId),

    #[error("Storage operation on '{key}' failed: {source}")]
    Storage {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    BackendSync(#[from] BackendSyncError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl GraphError {
    pub fn dangling_edge(kind: &'static str, missing: NodeId) -> Self {
        Self::DanglingEdge { kind, missing }
    }

    pub fn storage(key: impl Into<String>, source: std::io::Error) -> Self {
        Self::Storage {
            key: key.into(),
            source,
        }
    }
}

/// A batch of mutations was rejected by the remote side
///
/// Every ticket of the batch resolves with a clone of the same error.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Remote sync of {batch_len} mutation(s) for graph '{graph_id}' failed: {message}")]
pub struct BackendSyncError {
    pub graph_id: String,
    pub batch_len: usize,
    pub message: String,
}

impl BackendSyncError {
    pub fn new(graph_id: impl Into<String>, batch_len: usize, message: impl Into<String>) -> Self {
        Self {
            graph_id: graph_id.into(),
            batch_len,
            message: message.into(),
        }
    }

    /// The backend went away before acknowledging the mutation
    pub fn abandoned() -> Self {
        Self::new("", 0, "backend stopped before the mutation was synced")
    }
}

/// Remote transport failures
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Graph '{0}' is not known to the remote")]
    UnknownGraph(String),

    #[error("Remote rejected the request: {0}")]
    Rejected(String),

    #[error("Invalid payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransportError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_error_converts() {
        let err: GraphError = RestoreError::DanglingEdge { edge: 4, missing: 9 }.into();
        assert!(matches!(
            err,
            GraphError::Restore(RestoreError::DanglingEdge { edge: 4, missing: 9 })
        ));
        assert_eq!(
            err.to_string(),
            "Failed to restore graph: Edge 4 references unknown node 9"
        );
    }

    #[test]
    fn sync_error_is_shared_by_clones() {
        let err = BackendSyncError::new("g1", 3, "503");
        let copy = err.clone();
        assert_eq!(err, copy);
        assert!(copy.to_string().contains("3 mutation(s)"));
    }
}
