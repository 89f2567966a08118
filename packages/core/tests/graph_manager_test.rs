//! Integration tests for graph managers and the HTTP remote
//!
//! HTTP tests run against a wiremock server standing in for the graph
//! server.

#[cfg(test)]
mod graph_manager_tests {
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::Notify;
    use trailgraph_core::db::{
        BackendKind, HttpRemote, InMemoryRemote, MemoryStorage, Mutation, RemoteCatalog,
        RemoteGraph, RemoteTransport, TransportError,
    };
    use trailgraph_core::{
        open_manager, ActionMeta, ActionSpec, BackendConfig, CmdContext, CmdResult, CommandError,
        CommandRegistry, DescPatch, EdgeDump, GraphDesc, GraphDump, GraphEnvironment,
        GraphManagerError, LocalStorageGraphManager, MixedStorageGraphManager, NodeDump,
        ObjectCategory, ProvenanceConfig, ProvenanceGraphManager, RemoteStorageGraphManager,
        StorageConfig, ValueContext,
    };
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn registry() -> Arc<CommandRegistry> {
        let registry = CommandRegistry::new();
        registry.register("step", |_ctx: CmdContext| async move {
            Ok::<_, CommandError>(CmdResult::new())
        });
        Arc::new(registry)
    }

    fn step(name: &str) -> ActionSpec {
        ActionSpec::new(ActionMeta::new(name, ObjectCategory::Logic), "step")
    }

    fn mixed(remote: Arc<InMemoryRemote>) -> MixedStorageGraphManager {
        let env = GraphEnvironment::new(registry());
        MixedStorageGraphManager::new(
            LocalStorageGraphManager::new(Arc::new(MemoryStorage::new()), env.clone())
                .with_application("app"),
            RemoteStorageGraphManager::new(remote, env).with_application("app"),
        )
    }

    #[tokio::test]
    async fn test_migrated_graph_keeps_content_and_writes_remotely() -> Result<()> {
        let remote = Arc::new(InMemoryRemote::new());
        let manager = mixed(remote.clone());

        let graph = manager.create(DescPatch::named("Draft")).await?;
        graph.push(step("Load")).await?;
        let before = graph.persist();

        let migrated = manager
            .migrate_remote(&graph, DescPatch::named("Shared"))
            .await?;
        let desc = migrated.desc();
        assert!(!desc.local);
        assert_eq!(desc.name, "Shared");
        assert_eq!(graph.backend_kind(), BackendKind::Remote);
        assert_eq!(migrated.act(), graph.act());

        let stored = remote.snapshot(&desc.id).expect("uploaded");
        assert_eq!(stored.dump.nodes, before.graph.nodes);
        assert_eq!(stored.dump.edges, before.graph.edges);

        let next = graph.push(step("Plot")).await?;
        graph.flush().await?;
        let stored = remote.snapshot(&desc.id).expect("still there");
        assert!(stored.dump.nodes.iter().any(|n| n.id == next.state));

        let reopened = manager.get(&desc).await?;
        assert_eq!(reopened.states().len(), graph.states().len());
        assert_eq!(manager.list_remote().await?.len(), 1);
        Ok(())
    }

    /// In-memory remote whose uploads wait until released
    #[derive(Default)]
    struct GatedRemote {
        inner: InMemoryRemote,
        uploading: Notify,
        release: Notify,
    }

    #[async_trait]
    impl RemoteCatalog for GatedRemote {
        async fn list(&self) -> Result<Vec<GraphDesc>, TransportError> {
            self.inner.list().await
        }

        async fn get(&self, id: &str) -> Result<Option<RemoteGraph>, TransportError> {
            self.inner.get(id).await
        }

        async fn upload(
            &self,
            desc: GraphDesc,
            dump: Option<GraphDump>,
        ) -> Result<GraphDesc, TransportError> {
            self.uploading.notify_one();
            self.release.notified().await;
            self.inner.upload(desc, dump).await
        }

        async fn remove(&self, id: &str) -> Result<bool, TransportError> {
            self.inner.remove(id).await
        }

        async fn modify(&self, id: &str, patch: DescPatch) -> Result<GraphDesc, TransportError> {
            self.inner.modify(id, patch).await
        }
    }

    #[async_trait]
    impl RemoteTransport for GatedRemote {
        async fn send_batch(&self, graph_id: &str, batch: &[Mutation]) -> Result<(), TransportError> {
            self.inner.send_batch(graph_id, batch).await
        }

        async fn import(
            &self,
            graph_id: &str,
            nodes: &[NodeDump],
            edges: &[EdgeDump],
        ) -> Result<(), TransportError> {
            self.inner.import(graph_id, nodes, edges).await
        }
    }

    #[tokio::test]
    async fn test_edits_during_migration_reach_the_remote() -> Result<()> {
        let remote = Arc::new(GatedRemote::default());
        let env = GraphEnvironment::new(registry());
        let local = LocalStorageGraphManager::new(Arc::new(MemoryStorage::new()), env.clone())
            .with_application("app");
        let manager = Arc::new(RemoteStorageGraphManager::new(remote.clone(), env).with_application("app"));

        let graph = local.create(DescPatch::named("Draft")).await?;
        graph.push(step("Load")).await?;

        let migration = tokio::spawn({
            let manager = Arc::clone(&manager);
            let graph = graph.clone();
            async move {
                manager
                    .migrate(&graph, DescPatch::named("Shared"))
                    .await
                    .map(|migrated| migrated.desc())
            }
        });
        remote.uploading.notified().await;

        // queued behind the migration, so it runs on the remote backend
        let pushed = graph.push(step("Plot"));
        // written directly while the upload is in flight
        let slide = graph.make_text_slide(Some("Notes"))?;
        remote.release.notify_one();

        let desc = migration.await??;
        let plotted = pushed.await?;
        assert_eq!(graph.backend_kind(), BackendKind::Remote);
        graph.flush().await?;

        let stored = remote.inner.snapshot(&desc.id).expect("uploaded");
        let content = graph.persist().graph;
        assert_eq!(stored.dump.nodes, content.nodes);
        assert_eq!(stored.dump.edges, content.edges);
        assert!(stored.dump.nodes.iter().any(|n| n.id == plotted.state));
        assert!(stored.dump.nodes.iter().any(|n| n.id == slide));
        Ok(())
    }

    #[tokio::test]
    async fn test_clone_remote_copies_content() -> Result<()> {
        let remote = Arc::new(InMemoryRemote::new());
        let manager = mixed(remote.clone());

        let local = manager.create(DescPatch::named("Draft")).await?;
        local.push(step("Load")).await?;
        local.push(step("Filter")).await?;

        let copy = manager
            .clone_remote(&local.desc(), DescPatch::named("Shared copy"))
            .await?;
        assert!(!copy.desc().local);
        assert_eq!(copy.states().len(), 3);
        assert_eq!(remote.graph_count(), 1);

        // the copy is independent of its source
        copy.push(step("Plot")).await?;
        assert_eq!(local.states().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_edit_and_delete_route_by_locality() -> Result<()> {
        let remote = Arc::new(InMemoryRemote::new());
        let manager = mixed(remote.clone());
        let local = manager.create(DescPatch::named("Local")).await?;
        let shared = manager.create_remote(DescPatch::named("Remote")).await?;

        let patch = DescPatch {
            description: Some("cleaned up".to_string()),
            ..Default::default()
        };
        let edited = manager.edit_graph(&local, patch.clone()).await?;
        assert_eq!(edited.description, "cleaned up");
        assert_eq!(local.desc().description, "cleaned up");
        assert_eq!(manager.list_local().await?[0].description, "cleaned up");

        manager.edit(&shared.desc(), patch).await?;
        let stored = remote.snapshot(&shared.desc().id).expect("remote graph");
        assert_eq!(stored.desc.description, "cleaned up");

        assert!(manager.delete(&shared.desc()).await?);
        assert_eq!(remote.graph_count(), 0);
        assert!(matches!(
            manager.get(&shared.desc()).await,
            Err(GraphManagerError::GraphNotFound(_))
        ));
        assert_eq!(manager.list().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_in_memory_clone_is_not_listed() -> Result<()> {
        let manager = mixed(Arc::new(InMemoryRemote::new()));
        let local = manager.create(DescPatch::named("Local")).await?;
        local.push(step("Load")).await?;

        let scratch = manager.clone_in_memory(&local.desc()).await?;
        assert_eq!(scratch.states().len(), 2);
        assert_eq!(scratch.backend_kind(), BackendKind::Memory);
        assert_eq!(manager.list().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_open_manager_with_directory_storage() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = ProvenanceConfig {
            application: "notebook".to_string(),
            backend: BackendConfig::Local {
                storage: StorageConfig::Directory {
                    path: Some(dir.path().to_path_buf()),
                },
                prefix: "nb".to_string(),
            },
            ..Default::default()
        };

        let manager = open_manager(&config, registry(), ValueContext::new())?;
        let graph = manager.create(DescPatch::default()).await?;
        assert_eq!(graph.desc().id, "nb0");
        assert_eq!(graph.desc().attrs.of, "notebook");

        let again = open_manager(&config, registry(), ValueContext::new())?;
        assert_eq!(again.list().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_http_remote_lists_and_misses() -> Result<()> {
        let server = MockServer::start().await;
        let desc = GraphDesc::new("g1", "Shared", "app", "ana");
        Mock::given(method("GET"))
            .and(path("/api/graphs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vec![desc.clone()]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/graphs/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let remote = HttpRemote::new(server.uri())?;
        let listed = remote.list().await?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "g1");
        assert_eq!(listed[0].name, "Shared");
        assert!(remote.get("missing").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_http_remote_posts_batches() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/graphs/g1/batch"))
            .and(body_partial_json(json!({ "mutations": [{ "op": "clear" }] })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let remote = HttpRemote::new(format!("{}/", server.uri()))?;
        remote.send_batch("g1", &[Mutation::Clear]).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_http_remote_reports_server_errors() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/graphs"))
            .respond_with(ResponseTemplate::new(409).set_body_string("graph exists"))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/graphs/g1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "removed": true })))
            .mount(&server)
            .await;

        let remote = HttpRemote::new(server.uri())?;
        let err = remote
            .upload(GraphDesc::new("g1", "Shared", "app", "ana"), None)
            .await
            .unwrap_err();
        match err {
            TransportError::Server { status, body } => {
                assert_eq!(status, 409);
                assert_eq!(body, "graph exists");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(remote.remove("g1").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_remote_manager_over_http() -> Result<()> {
        let server = MockServer::start().await;
        let mine = GraphDesc::new("g1", "Mine", "app", "ana");
        let other = GraphDesc::new("g2", "Other", "another-app", "ana");
        Mock::given(method("GET"))
            .and(path("/api/graphs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vec![mine, other]))
            .mount(&server)
            .await;

        let config = ProvenanceConfig {
            application: "app".to_string(),
            backend: BackendConfig::Remote {
                endpoint: server.uri(),
            },
            ..Default::default()
        };
        let manager = open_manager(&config, registry(), ValueContext::new())?;
        let listed = manager.list().await?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "g1");
        Ok(())
    }
}
