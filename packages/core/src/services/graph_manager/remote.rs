//! Remote Storage Graph Manager
//!
//! Graph descriptions and content live on a remote server reached through a
//! [`RemoteCatalog`]. Opened graphs write through a [`RemoteStoreBackend`]
//! over the matching [`RemoteTransport`].

use super::{ManagerResult, ProvenanceGraphManager};
use crate::config::{RemoteSyncConfig, DEFAULT_APPLICATION};
use crate::db::{
    GraphBackend, GraphBase, RemoteCatalog, RemoteStoreBackend, RemoteTransport, TransportError,
};
use crate::models::{DescPatch, GraphDesc, GraphDump, NodeId, ProvenanceGraphDump};
use crate::services::error::GraphManagerError;
use crate::services::provenance_graph::{
    GraphEnvironment, GraphSnapshot, MigrationUpload, ProvenanceGraph,
};
use async_trait::async_trait;
use futures::FutureExt;
use std::sync::Arc;

const PERSISTENT_SESSION_NAME: &str = "Persistent WS";

pub struct RemoteStorageGraphManager {
    catalog: Arc<dyn RemoteCatalog>,
    transport: Arc<dyn RemoteTransport>,
    env: GraphEnvironment,
    sync: RemoteSyncConfig,
    application: String,
    user: String,
}

impl RemoteStorageGraphManager {
    /// Manager over a remote that serves both the catalogue and the batches
    pub fn new<R>(remote: Arc<R>, env: GraphEnvironment) -> Self
    where
        R: RemoteCatalog + RemoteTransport + 'static,
    {
        Self::from_parts(remote.clone(), remote, env)
    }

    pub fn from_parts(
        catalog: Arc<dyn RemoteCatalog>,
        transport: Arc<dyn RemoteTransport>,
        env: GraphEnvironment,
    ) -> Self {
        Self {
            catalog,
            transport,
            env,
            sync: RemoteSyncConfig::default(),
            application: DEFAULT_APPLICATION.to_string(),
            user: "anonymous".to_string(),
        }
    }

    pub fn with_sync_config(mut self, sync: RemoteSyncConfig) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.application = application.into();
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Description for a new graph; the remote assigns the id
    fn new_desc(&self, patch: &DescPatch) -> GraphDesc {
        let mut desc = GraphDesc::new("", PERSISTENT_SESSION_NAME, &self.application, &self.user);
        desc.fqname = format!("provenance_graphs/{}", PERSISTENT_SESSION_NAME);
        patch.apply_to(&mut desc);
        desc
    }

    fn backend(&self, desc: &GraphDesc) -> Arc<RemoteStoreBackend> {
        Arc::new(RemoteStoreBackend::new(
            desc.id.clone(),
            Arc::clone(&self.transport),
            self.sync.clone(),
        ))
    }

    /// Wraps content the remote already holds
    fn open(
        &self,
        desc: GraphDesc,
        dump: GraphDump,
        act: Option<NodeId>,
        last_action: Option<NodeId>,
    ) -> ManagerResult<ProvenanceGraph> {
        let mut store = GraphBase::new(desc.clone(), self.backend(&desc));
        store.hydrate(dump, &self.env.values)?;
        Ok(ProvenanceGraph::restored(
            store,
            self.env.clone(),
            act,
            last_action,
        )?)
    }

    /// Moves a graph onto this remote
    ///
    /// The graph's current content is uploaded as a new remote graph, then
    /// the graph switches to a remote backend without changing node ids or
    /// live values. The move runs on the graph's job queue, so actions
    /// pushed meanwhile land on the remote.
    pub async fn migrate(
        &self,
        graph: &ProvenanceGraph,
        patch: DescPatch,
    ) -> ManagerResult<ProvenanceGraph> {
        let catalog = Arc::clone(&self.catalog);
        let transport = Arc::clone(&self.transport);
        let sync = self.sync.clone();
        let desc = self.new_desc(&patch);
        let from = graph.desc().id;

        let upload: MigrationUpload = Box::new(move |dump: GraphDump| {
            async move {
                let mut desc = desc;
                desc.size = [dump.nodes.len(), dump.edges.len()];
                let uploaded = catalog.upload(desc, Some(dump)).await?;
                let backend: Arc<dyn GraphBackend> = Arc::new(RemoteStoreBackend::new(
                    uploaded.id.clone(),
                    transport,
                    sync,
                ));
                Ok::<_, TransportError>((uploaded, backend))
            }
            .boxed()
        });
        let uploaded = graph.migrate_with(upload).await?;
        tracing::info!("Migrated graph {} to remote graph {}", from, uploaded.id);
        Ok(graph.clone())
    }
}

#[async_trait]
impl ProvenanceGraphManager for RemoteStorageGraphManager {
    async fn list(&self) -> ManagerResult<Vec<GraphDesc>> {
        let descs = self.catalog.list().await?;
        Ok(descs
            .into_iter()
            .filter(|d| d.is_provenance_graph_of(&self.application))
            .collect())
    }

    async fn get(&self, desc: &GraphDesc) -> ManagerResult<ProvenanceGraph> {
        let remote = self
            .catalog
            .get(&desc.id)
            .await?
            .ok_or_else(|| GraphManagerError::graph_not_found(&desc.id))?;
        self.open(remote.desc, remote.dump, None, None)
    }

    async fn create(&self, patch: DescPatch) -> ManagerResult<ProvenanceGraph> {
        let uploaded = self.catalog.upload(self.new_desc(&patch), None).await?;
        tracing::info!("Created remote graph {}", uploaded.id);
        self.open(uploaded, GraphDump::default(), None, None)
    }

    async fn clone_graph(
        &self,
        source: &GraphSnapshot,
        patch: DescPatch,
    ) -> ManagerResult<ProvenanceGraph> {
        self.import(source.dump.clone(), patch).await
    }

    async fn import(
        &self,
        dump: ProvenanceGraphDump,
        patch: DescPatch,
    ) -> ManagerResult<ProvenanceGraph> {
        let mut desc = self.new_desc(&patch);
        desc.size = [dump.graph.nodes.len(), dump.graph.edges.len()];
        let uploaded = self
            .catalog
            .upload(desc, Some(dump.graph.clone()))
            .await?;
        self.open(uploaded, dump.graph, dump.act, dump.last_action)
    }

    async fn delete(&self, desc: &GraphDesc) -> ManagerResult<bool> {
        Ok(self.catalog.remove(&desc.id).await?)
    }

    async fn edit(&self, desc: &GraphDesc, patch: DescPatch) -> ManagerResult<GraphDesc> {
        Ok(self.catalog.modify(&desc.id, patch).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{BackendKind, InMemoryRemote};
    use crate::services::CommandRegistry;

    fn manager(remote: Arc<InMemoryRemote>) -> RemoteStorageGraphManager {
        RemoteStorageGraphManager::new(
            remote,
            GraphEnvironment::new(Arc::new(CommandRegistry::new())),
        )
        .with_application("app")
    }

    #[tokio::test]
    async fn create_uploads_and_syncs_start_state() {
        let remote = Arc::new(InMemoryRemote::new());
        let manager = manager(remote.clone());

        let graph = manager.create(DescPatch::named("Shared")).await.unwrap();
        let desc = graph.desc();
        assert!(!desc.id.is_empty());
        assert!(!desc.local);
        assert_eq!(graph.backend_kind(), BackendKind::Remote);

        graph.flush().await.unwrap();
        let stored = remote.snapshot(&desc.id).unwrap();
        assert_eq!(stored.dump.nodes.len(), 1);
        assert_eq!(manager.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_unknown_graph_fails() {
        let manager = manager(Arc::new(InMemoryRemote::new()));
        let desc = GraphDesc::new("nope", "n", "app", "me");
        assert!(matches!(
            manager.get(&desc).await,
            Err(GraphManagerError::GraphNotFound(_))
        ));
    }

    #[tokio::test]
    async fn migrate_keeps_ids_and_writes_remotely() {
        let remote = Arc::new(InMemoryRemote::new());
        let manager = manager(remote.clone());
        let env = GraphEnvironment::new(Arc::new(CommandRegistry::new()));
        let local = ProvenanceGraph::new(GraphBase::in_memory(GraphDesc::in_memory("app")), env)
            .unwrap();
        let start = local.act();

        let migrated = manager.migrate(&local, DescPatch::named("Moved")).await.unwrap();
        assert_eq!(migrated.act(), start);
        assert_eq!(local.backend_kind(), BackendKind::Remote);

        let slide = local.make_text_slide(Some("after")).unwrap();
        local.flush().await.unwrap();
        let stored = remote.snapshot(&local.desc().id).unwrap();
        assert!(stored.dump.nodes.iter().any(|n| n.id == slide));
        assert!(stored.dump.nodes.iter().any(|n| n.id == start));
    }
}
