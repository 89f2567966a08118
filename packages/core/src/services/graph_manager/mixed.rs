//! Mixed Storage Graph Manager
//!
//! Combines a local and a remote manager. Existing graphs are routed by
//! `desc.local`; new graphs are local unless created through one of the
//! `*_remote` methods.

use super::{
    LocalStorageGraphManager, ManagerResult, ProvenanceGraphManager, RemoteStorageGraphManager,
};
use crate::models::{DescPatch, GraphDesc, ProvenanceGraphDump};
use crate::services::provenance_graph::{GraphSnapshot, ProvenanceGraph, ProvenanceResult};
use async_trait::async_trait;

pub struct MixedStorageGraphManager {
    local: LocalStorageGraphManager,
    remote: RemoteStorageGraphManager,
}

impl MixedStorageGraphManager {
    pub fn new(local: LocalStorageGraphManager, remote: RemoteStorageGraphManager) -> Self {
        Self { local, remote }
    }

    pub fn local(&self) -> &LocalStorageGraphManager {
        &self.local
    }

    pub fn remote(&self) -> &RemoteStorageGraphManager {
        &self.remote
    }

    pub async fn list_local(&self) -> ManagerResult<Vec<GraphDesc>> {
        self.local.list().await
    }

    pub async fn list_remote(&self) -> ManagerResult<Vec<GraphDesc>> {
        self.remote.list().await
    }

    /// Copies any graph into local storage
    pub async fn clone_local(
        &self,
        desc: &GraphDesc,
        patch: DescPatch,
    ) -> ManagerResult<ProvenanceGraph> {
        let source = self.get(desc).await?.snapshot();
        self.local.clone_graph(&source, patch).await
    }

    /// Copies any graph onto the remote
    pub async fn clone_remote(
        &self,
        desc: &GraphDesc,
        patch: DescPatch,
    ) -> ManagerResult<ProvenanceGraph> {
        let source = self.get(desc).await?.snapshot();
        self.remote.clone_graph(&source, patch).await
    }

    /// Moves an open graph onto the remote, see [`RemoteStorageGraphManager::migrate`]
    pub async fn migrate_remote(
        &self,
        graph: &ProvenanceGraph,
        patch: DescPatch,
    ) -> ManagerResult<ProvenanceGraph> {
        self.remote.migrate(graph, patch).await
    }

    pub async fn import_local(
        &self,
        dump: ProvenanceGraphDump,
        patch: DescPatch,
    ) -> ManagerResult<ProvenanceGraph> {
        self.local.import(dump, patch).await
    }

    pub async fn import_remote(
        &self,
        dump: ProvenanceGraphDump,
        patch: DescPatch,
    ) -> ManagerResult<ProvenanceGraph> {
        self.remote.import(dump, patch).await
    }

    pub async fn create_local(&self, patch: DescPatch) -> ManagerResult<ProvenanceGraph> {
        self.local.create(patch).await
    }

    pub async fn create_remote(&self, patch: DescPatch) -> ManagerResult<ProvenanceGraph> {
        self.remote.create(patch).await
    }

    pub fn create_in_memory(&self) -> ProvenanceResult<ProvenanceGraph> {
        self.local.create_in_memory()
    }

    pub async fn clone_in_memory(&self, desc: &GraphDesc) -> ManagerResult<ProvenanceGraph> {
        let source = self.get(desc).await?.snapshot();
        Ok(self.local.clone_in_memory(&source)?)
    }
}

#[async_trait]
impl ProvenanceGraphManager for MixedStorageGraphManager {
    /// Local graphs first, then remote ones
    async fn list(&self) -> ManagerResult<Vec<GraphDesc>> {
        let (local, remote) = tokio::join!(self.local.list(), self.remote.list());
        let mut descs = local?;
        descs.extend(remote?);
        Ok(descs)
    }

    async fn get(&self, desc: &GraphDesc) -> ManagerResult<ProvenanceGraph> {
        if desc.local {
            self.local.get(desc).await
        } else {
            self.remote.get(desc).await
        }
    }

    async fn create(&self, patch: DescPatch) -> ManagerResult<ProvenanceGraph> {
        self.create_local(patch).await
    }

    async fn clone_graph(
        &self,
        source: &GraphSnapshot,
        patch: DescPatch,
    ) -> ManagerResult<ProvenanceGraph> {
        self.local.clone_graph(source, patch).await
    }

    async fn import(
        &self,
        dump: ProvenanceGraphDump,
        patch: DescPatch,
    ) -> ManagerResult<ProvenanceGraph> {
        self.import_local(dump, patch).await
    }

    async fn delete(&self, desc: &GraphDesc) -> ManagerResult<bool> {
        if desc.local {
            self.local.delete(desc).await
        } else {
            self.remote.delete(desc).await
        }
    }

    async fn edit(&self, desc: &GraphDesc, patch: DescPatch) -> ManagerResult<GraphDesc> {
        if desc.local {
            self.local.edit(desc, patch).await
        } else {
            self.remote.edit(desc, patch).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryRemote, MemoryStorage};
    use crate::services::{CommandRegistry, GraphEnvironment};
    use std::sync::Arc;

    fn mixed() -> MixedStorageGraphManager {
        let env = GraphEnvironment::new(Arc::new(CommandRegistry::new()));
        MixedStorageGraphManager::new(
            LocalStorageGraphManager::new(Arc::new(MemoryStorage::new()), env.clone())
                .with_application("app"),
            RemoteStorageGraphManager::new(Arc::new(InMemoryRemote::new()), env)
                .with_application("app"),
        )
    }

    #[tokio::test]
    async fn list_merges_local_then_remote() {
        let manager = mixed();
        manager.create_remote(DescPatch::named("R")).await.unwrap();
        manager.create(DescPatch::named("L")).await.unwrap();

        let names: Vec<String> = manager
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["L", "R"]);
    }

    #[tokio::test]
    async fn routes_by_locality() {
        let manager = mixed();
        let remote = manager.create_remote(DescPatch::named("R")).await.unwrap();
        let desc = remote.desc();
        assert!(!desc.local);

        let copy = manager.clone_local(&desc, DescPatch::default()).await.unwrap();
        assert!(copy.desc().local);
        assert_eq!(copy.desc().name, "Clone of R");

        assert!(manager.delete(&desc).await.unwrap());
        assert_eq!(manager.list_remote().await.unwrap().len(), 0);
        assert_eq!(manager.list_local().await.unwrap().len(), 1);
    }
}
