//! Service Layer Error Types
//!
//! Errors of the provenance orchestrator and the graph managers. Store and
//! transport failures are wrapped with their original error as source.

use crate::config::ConfigError;
use crate::db::{GraphError, TransportError};
use crate::models::NodeId;
use thiserror::Error;

/// Error type returned by command functions and inverse creators
pub type CommandError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Orchestrator errors
///
/// A returned error always means the requested operation did not happen;
/// the graph is left as it was before the call.
#[derive(Error, Debug)]
pub enum ProvenanceError {
    /// The command function reported a failure
    #[error("Command '{function_id}' failed: {source}")]
    CommandExecution {
        function_id: String,
        #[source]
        source: CommandError,
    },

    #[error("No command registered for '{0}'")]
    UnknownCommand(String),

    /// The action has no cached inverse and no way to create one
    #[error("Action {action} ('{name}') cannot be undone: no inverse available")]
    InverseUnavailable { action: NodeId, name: String },

    #[error("Unknown state: {0}")]
    UnknownState(NodeId),

    #[error("Unknown action: {0}")]
    UnknownAction(NodeId),

    #[error("Unknown object: {0}")]
    UnknownObject(NodeId),

    #[error("Unknown slide: {0}")]
    UnknownSlide(NodeId),

    #[error("Graph operation failed: {0}")]
    Graph(#[from] GraphError),

    /// Uploading the graph's content to its new home failed; the graph
    /// stays on its old backend
    #[error("Migration failed: {0}")]
    Migration(#[source] TransportError),

    /// The worker task is gone; the graph was dropped or the runtime shut down
    #[error("Provenance worker stopped")]
    WorkerStopped,
}

impl ProvenanceError {
    pub fn command_execution(function_id: impl Into<String>, source: CommandError) -> Self {
        Self::CommandExecution {
            function_id: function_id.into(),
            source,
        }
    }

    pub fn inverse_unavailable(action: NodeId, name: impl Into<String>) -> Self {
        Self::InverseUnavailable {
            action,
            name: name.into(),
        }
    }
}

/// Graph manager errors
#[derive(Error, Debug)]
pub enum GraphManagerError {
    #[error("Graph not found: {0}")]
    GraphNotFound(String),

    #[error("Storage operation failed: {0}")]
    Storage(#[from] GraphError),

    #[error("Remote operation failed: {0}")]
    Remote(#[from] TransportError),

    #[error(transparent)]
    Provenance(#[from] ProvenanceError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl GraphManagerError {
    pub fn graph_not_found(id: impl Into<String>) -> Self {
        Self::GraphNotFound(id.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_error_keeps_source() {
        let err = ProvenanceError::command_execution("sort", "column missing".into());
        assert_eq!(err.to_string(), "Command 'sort' failed: column missing");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn graph_error_converts_to_manager_error() {
        let err: GraphManagerError = GraphError::NodeNotFound(3).into();
        assert!(matches!(err, GraphManagerError::Storage(_)));
    }
}
