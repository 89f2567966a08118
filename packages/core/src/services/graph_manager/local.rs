//! Local Storage Graph Manager
//!
//! Keeps graph descriptions next to the graphs' content in one
//! [`KeyValueStorage`]:
//!
//! | key                             | value                          |
//! |---------------------------------|--------------------------------|
//! | `{prefix}_provenance_graphs`    | JSON array of graph ids        |
//! | `{prefix}_provenance_graph.{id}`| description of graph `id`      |
//!
//! Graph ids are `{prefix}{n}` with `n` one above the highest id in use.
//! Content is written by a [`LocalStorageBackend`] per graph.

use super::{ManagerResult, ProvenanceGraphManager};
use crate::config::{ProvenanceConfig, DEFAULT_APPLICATION, DEFAULT_PREFIX};
use crate::db::{read_json, write_json, GraphBase, KeyValueStorage, LocalStorageBackend};
use crate::services::error::GraphManagerError;
use crate::services::provenance_graph::{
    GraphEnvironment, GraphSnapshot, ProvenanceGraph, ProvenanceResult,
};
use crate::models::{DescPatch, GraphDesc, ProvenanceGraphDump};
use async_trait::async_trait;
use std::sync::Arc;

const CLONE_PREFIX: &str = "Clone of ";
const MEMORY_SESSION_NAME: &str = "In Memory Session";

pub struct LocalStorageGraphManager {
    storage: Arc<dyn KeyValueStorage>,
    env: GraphEnvironment,
    prefix: String,
    application: String,
    user: String,
}

impl LocalStorageGraphManager {
    pub fn new(storage: Arc<dyn KeyValueStorage>, env: GraphEnvironment) -> Self {
        Self {
            storage,
            env,
            prefix: DEFAULT_PREFIX.to_string(),
            application: DEFAULT_APPLICATION.to_string(),
            user: "anonymous".to_string(),
        }
    }

    /// Manager over the storage named by a local backend config
    pub fn from_config(
        config: &ProvenanceConfig,
        storage: Arc<dyn KeyValueStorage>,
        env: GraphEnvironment,
    ) -> Self {
        let manager = Self::new(storage, env)
            .with_application(&config.application)
            .with_user(&config.user);
        match &config.backend {
            crate::config::BackendConfig::Local { prefix, .. } => manager.with_prefix(prefix),
            _ => manager,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
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

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn list_key(&self) -> String {
        format!("{}_provenance_graphs", self.prefix)
    }

    fn desc_key(&self, id: &str) -> String {
        format!("{}_provenance_graph.{}", self.prefix, id)
    }

    fn graph_ids(&self) -> ManagerResult<Vec<String>> {
        Ok(read_json::<Vec<String>>(self.storage.as_ref(), &self.list_key())?.unwrap_or_default())
    }

    fn stored_desc(&self, id: &str) -> ManagerResult<Option<GraphDesc>> {
        match read_json::<GraphDesc>(self.storage.as_ref(), &self.desc_key(id)) {
            Ok(desc) => Ok(desc),
            Err(crate::db::GraphError::Serialization(e)) => {
                tracing::warn!("Skipping unreadable description of graph {}: {}", id, e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Registers a new description and returns it
    fn create_desc(&self, patch: &DescPatch) -> ManagerResult<GraphDesc> {
        let mut ids = self.graph_ids()?;
        let uid = ids
            .iter()
            .filter_map(|id| id.strip_prefix(self.prefix.as_str()))
            .filter_map(|n| n.parse::<u64>().ok())
            .max()
            .map(|max| max + 1)
            .unwrap_or(0);
        let id = format!("{}{}", self.prefix, uid);
        let name = format!("Temporary Session {}", uid);

        let mut desc = GraphDesc::new(id.clone(), name.clone(), &self.application, &self.user);
        desc.fqname = format!("{}{}", self.prefix, name);
        desc.local = true;
        patch.apply_to(&mut desc);

        ids.push(id.clone());
        write_json(self.storage.as_ref(), &self.list_key(), &ids)?;
        write_json(self.storage.as_ref(), &self.desc_key(&id), &desc)?;
        tracing::debug!("Registered local graph {} ('{}')", id, desc.name);
        Ok(desc)
    }

    fn backend(&self, desc: &GraphDesc) -> Arc<LocalStorageBackend> {
        Arc::new(LocalStorageBackend::new(
            desc.id.clone(),
            Arc::clone(&self.storage),
        ))
    }

    /// Opens a graph, loading whatever content its backend holds
    fn open(&self, desc: &GraphDesc) -> ManagerResult<ProvenanceGraph> {
        let backend = self.backend(desc);
        let mut store = GraphBase::new(desc.clone(), backend.clone());
        if let Some(dump) = backend.load()? {
            store.hydrate(dump, &self.env.values)?;
        }
        Ok(ProvenanceGraph::new(store, self.env.clone())?)
    }

    /// Creates a graph from `dump` under a freshly registered description
    fn open_restored(
        &self,
        desc: GraphDesc,
        dump: ProvenanceGraphDump,
    ) -> ManagerResult<ProvenanceGraph> {
        let store = GraphBase::new(desc.clone(), self.backend(&desc));
        match ProvenanceGraph::from_dump(store, self.env.clone(), dump) {
            Ok(graph) => Ok(graph),
            Err(e) => {
                // nothing was written for a rejected dump; drop the registration too
                self.unregister(&desc.id)?;
                Err(e.into())
            }
        }
    }

    fn unregister(&self, id: &str) -> ManagerResult<bool> {
        let mut ids = self.graph_ids()?;
        let before = ids.len();
        ids.retain(|i| i != id);
        self.storage.remove_item(&self.desc_key(id))?;
        write_json(self.storage.as_ref(), &self.list_key(), &ids)?;
        Ok(ids.len() != before)
    }

    fn in_memory_desc(&self, base: Option<&GraphDesc>) -> GraphDesc {
        let mut desc = match base {
            Some(base) => base.clone(),
            None => {
                let mut desc = GraphDesc::new(
                    "memory",
                    MEMORY_SESSION_NAME,
                    &self.application,
                    &self.user,
                );
                desc.fqname = MEMORY_SESSION_NAME.to_string();
                desc
            }
        };
        desc.id = "memory".to_string();
        desc.local = true;
        desc
    }

    /// A graph that lives only in memory and is never listed
    pub fn create_in_memory(&self) -> ProvenanceResult<ProvenanceGraph> {
        let store = GraphBase::in_memory(self.in_memory_desc(None));
        ProvenanceGraph::new(store, self.env.clone())
    }

    /// An in-memory copy of another graph
    pub fn clone_in_memory(&self, source: &GraphSnapshot) -> ProvenanceResult<ProvenanceGraph> {
        let store = GraphBase::in_memory(self.in_memory_desc(Some(&source.desc)));
        ProvenanceGraph::from_dump(store, self.env.clone(), source.dump.clone())
    }
}

#[async_trait]
impl ProvenanceGraphManager for LocalStorageGraphManager {
    async fn list(&self) -> ManagerResult<Vec<GraphDesc>> {
        let mut descs = Vec::new();
        for id in self.graph_ids()? {
            if let Some(desc) = self.stored_desc(&id)? {
                if desc.is_provenance_graph_of(&self.application) {
                    descs.push(desc);
                }
            }
        }
        Ok(descs)
    }

    async fn get(&self, desc: &GraphDesc) -> ManagerResult<ProvenanceGraph> {
        self.open(desc)
    }

    async fn create(&self, patch: DescPatch) -> ManagerResult<ProvenanceGraph> {
        let desc = self.create_desc(&patch)?;
        self.open(&desc)
    }

    async fn clone_graph(
        &self,
        source: &GraphSnapshot,
        patch: DescPatch,
    ) -> ManagerResult<ProvenanceGraph> {
        let name = &source.desc.name;
        let new_name = if name.contains(CLONE_PREFIX) {
            name.clone()
        } else {
            format!("{}{}", CLONE_PREFIX, name)
        };
        let mut merged = DescPatch {
            name: Some(new_name),
            description: Some(format!(
                "Cloned from {} created by {}\n{}",
                name, source.desc.creator, source.desc.description
            )),
            ..Default::default()
        };
        merged.name = patch.name.or(merged.name);
        merged.description = patch.description.or(merged.description);
        merged.creator = patch.creator;
        merged.permissions = patch.permissions;

        let desc = self.create_desc(&merged)?;
        self.open_restored(desc, source.dump.clone())
    }

    async fn import(
        &self,
        dump: ProvenanceGraphDump,
        patch: DescPatch,
    ) -> ManagerResult<ProvenanceGraph> {
        let desc = self.create_desc(&patch)?;
        self.open_restored(desc, dump)
    }

    async fn delete(&self, desc: &GraphDesc) -> ManagerResult<bool> {
        self.backend(desc).delete()?;
        let known = self.unregister(&desc.id)?;
        tracing::info!("Deleted local graph {}", desc.id);
        Ok(known)
    }

    async fn edit(&self, desc: &GraphDesc, patch: DescPatch) -> ManagerResult<GraphDesc> {
        let mut stored = self
            .stored_desc(&desc.id)?
            .ok_or_else(|| GraphManagerError::graph_not_found(&desc.id))?;
        patch.apply_to(&mut stored);
        write_json(self.storage.as_ref(), &self.desc_key(&desc.id), &stored)?;
        Ok(stored)
    }
}
