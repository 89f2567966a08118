//! Graph Managers
//!
//! A graph manager keeps the catalogue of an application's provenance
//! graphs: it lists their descriptions, opens them as [`ProvenanceGraph`]s,
//! and creates, clones, imports, edits and deletes them.
//!
//! - [`LocalStorageGraphManager`] - descriptions and content in key-value storage
//! - [`RemoteStorageGraphManager`] - descriptions and content on a remote server
//! - [`MixedStorageGraphManager`] - both, dispatching on `desc.local`
//!
//! [`open_manager`] builds the manager a [`ProvenanceConfig`] asks for.

mod local;
mod mixed;
mod remote;

pub use local::LocalStorageGraphManager;
pub use mixed::MixedStorageGraphManager;
pub use remote::RemoteStorageGraphManager;

use super::commands::CommandRegistry;
use super::error::GraphManagerError;
use super::provenance_graph::{GraphEnvironment, GraphSnapshot, ProvenanceGraph};
use crate::config::{BackendConfig, ProvenanceConfig};
use crate::db::{HttpRemote, MemoryStorage};
use crate::models::{DescPatch, GraphDesc, ProvenanceGraphDump, ValueContext};
use async_trait::async_trait;
use std::sync::Arc;

pub type ManagerResult<T> = std::result::Result<T, GraphManagerError>;

/// Catalogue of provenance graphs
#[async_trait]
pub trait ProvenanceGraphManager: Send + Sync {
    /// Descriptions of this application's graphs
    async fn list(&self) -> ManagerResult<Vec<GraphDesc>>;

    /// Opens a graph
    async fn get(&self, desc: &GraphDesc) -> ManagerResult<ProvenanceGraph>;

    /// Creates an empty graph holding only its start state
    async fn create(&self, patch: DescPatch) -> ManagerResult<ProvenanceGraph>;

    /// Creates a new graph with the content of `source`
    async fn clone_graph(
        &self,
        source: &GraphSnapshot,
        patch: DescPatch,
    ) -> ManagerResult<ProvenanceGraph>;

    /// Creates a new graph from a dump
    async fn import(
        &self,
        dump: ProvenanceGraphDump,
        patch: DescPatch,
    ) -> ManagerResult<ProvenanceGraph>;

    /// Removes a graph and its content; false if it was unknown
    async fn delete(&self, desc: &GraphDesc) -> ManagerResult<bool>;

    /// Updates a stored description and returns the result
    async fn edit(&self, desc: &GraphDesc, patch: DescPatch) -> ManagerResult<GraphDesc>;

    /// Edits the description of an open graph and updates the graph with it
    async fn edit_graph(
        &self,
        graph: &ProvenanceGraph,
        patch: DescPatch,
    ) -> ManagerResult<GraphDesc> {
        let desc = self.edit(&graph.desc(), patch).await?;
        graph.set_desc(desc.clone());
        Ok(desc)
    }
}

/// Builds the manager selected by `config.backend`
///
/// The memory backend gets a local manager over session storage, so graphs
/// can still be listed and reopened while the process runs.
pub fn open_manager(
    config: &ProvenanceConfig,
    registry: Arc<CommandRegistry>,
    values: ValueContext,
) -> ManagerResult<Arc<dyn ProvenanceGraphManager>> {
    config.validate().map_err(crate::config::ConfigError::Invalid)?;
    let env = GraphEnvironment::from_config(config, registry, values);

    let manager: Arc<dyn ProvenanceGraphManager> = match &config.backend {
        BackendConfig::Memory => Arc::new(
            LocalStorageGraphManager::new(Arc::new(MemoryStorage::new()), env)
                .with_application(&config.application)
                .with_user(&config.user),
        ),
        BackendConfig::Local { storage, .. } => Arc::new(LocalStorageGraphManager::from_config(
            config,
            storage.open()?,
            env,
        )),
        BackendConfig::Remote { endpoint } => {
            let remote = Arc::new(HttpRemote::new(endpoint.clone())?);
            Arc::new(
                RemoteStorageGraphManager::new(remote, env)
                    .with_sync_config(config.remote_sync.clone())
                    .with_application(&config.application)
                    .with_user(&config.user),
            )
        }
    };
    tracing::info!(
        "Opened {} graph manager for application '{}'",
        match &config.backend {
            BackendConfig::Memory => "memory",
            BackendConfig::Local { .. } => "local",
            BackendConfig::Remote { .. } => "remote",
        },
        config.application
    );
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_config_opens_working_manager() {
        let config = ProvenanceConfig {
            backend: BackendConfig::Memory,
            ..Default::default()
        };
        let manager = open_manager(&config, Arc::new(CommandRegistry::new()), ValueContext::new())
            .unwrap();
        let graph = manager.create(DescPatch::named("Session")).await.unwrap();
        assert_eq!(graph.states().len(), 1);

        let listed = manager.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Session");
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = ProvenanceConfig {
            application: String::new(),
            ..Default::default()
        };
        let err = open_manager(&config, Arc::new(CommandRegistry::new()), ValueContext::new())
            .err()
            .unwrap();
        assert!(matches!(err, GraphManagerError::Config(_)));
    }
}
