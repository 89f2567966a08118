//! HTTP Remote
//!
//! [`RemoteTransport`] and [`RemoteCatalog`] over the JSON API served by the
//! development graph server:
//!
//! | method | path                        | body            | response            |
//! |--------|-----------------------------|-----------------|---------------------|
//! | GET    | `/api/graphs`               |                 | `GraphDesc[]`       |
//! | POST   | `/api/graphs`               | `UploadRequest` | `GraphDesc`         |
//! | GET    | `/api/graphs/{id}`          |                 | `RemoteGraph`       |
//! | PATCH  | `/api/graphs/{id}`          | `DescPatch`     | `GraphDesc`         |
//! | DELETE | `/api/graphs/{id}`          |                 | `{"removed": bool}` |
//! | POST   | `/api/graphs/{id}/batch`    | `BatchRequest`  | empty               |
//! | POST   | `/api/graphs/{id}/import`   | `ImportRequest` | empty               |

use super::backend::Mutation;
use super::error::TransportError;
use super::transport::{RemoteCatalog, RemoteGraph, RemoteTransport, UploadRequest};
use crate::models::{DescPatch, EdgeDump, GraphDesc, GraphDump, NodeDump};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchRequest {
    pub mutations: Vec<Mutation>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportRequest {
    pub nodes: Vec<NodeDump>,
    pub edges: Vec<EdgeDump>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveResponse {
    pub removed: bool,
}

/// Client for a graph server
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn graphs_url(&self) -> String {
        format!("{}/api/graphs", self.base_url)
    }

    fn graph_url(&self, id: &str) -> String {
        format!("{}/api/graphs/{}", self.base_url, id)
    }

    async fn check(response: Response) -> Result<Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Server {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl RemoteTransport for HttpRemote {
    async fn send_batch(&self, graph_id: &str, batch: &[Mutation]) -> Result<(), TransportError> {
        let url = format!("{}/batch", self.graph_url(graph_id));
        let body = BatchRequest {
            mutations: batch.to_vec(),
        };
        let response = self.client.post(&url).json(&body).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn import(
        &self,
        graph_id: &str,
        nodes: &[NodeDump],
        edges: &[EdgeDump],
    ) -> Result<(), TransportError> {
        let url = format!("{}/import", self.graph_url(graph_id));
        let body = ImportRequest {
            nodes: nodes.to_vec(),
            edges: edges.to_vec(),
        };
        let response = self.client.post(&url).json(&body).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteCatalog for HttpRemote {
    async fn list(&self) -> Result<Vec<GraphDesc>, TransportError> {
        let response = self.client.get(self.graphs_url()).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn get(&self, id: &str) -> Result<Option<RemoteGraph>, TransportError> {
        let response = self.client.get(self.graph_url(id)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::check(response).await?.json().await?))
    }

    async fn upload(
        &self,
        desc: GraphDesc,
        dump: Option<GraphDump>,
    ) -> Result<GraphDesc, TransportError> {
        let body = UploadRequest { desc, dump };
        let response = self.client.post(self.graphs_url()).json(&body).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn remove(&self, id: &str) -> Result<bool, TransportError> {
        let response = self.client.delete(self.graph_url(id)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let removed: RemoveResponse = Self::check(response).await?.json().await?;
        Ok(removed.removed)
    }

    async fn modify(&self, id: &str, patch: DescPatch) -> Result<GraphDesc, TransportError> {
        let response = self
            .client
            .patch(self.graph_url(id))
            .json(&patch)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(TransportError::UnknownGraph(id.to_string()));
        }
        Ok(Self::check(response).await?.json().await?)
    }
}
