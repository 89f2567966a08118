//! Development Graph Server
//!
//! Serves an in-memory remote graph store over the JSON API spoken by
//! `trailgraph_core::db::HttpRemote`, so the remote backend and the remote
//! graph manager can be exercised without real infrastructure.
//!
//! Graphs are lost when the server stops.
//!
//! # Usage
//!
//! ```bash
//! GRAPH_SERVER_PORT=3050 cargo run --bin graph-server
//! ```
//!
//! Log output follows `RUST_LOG` (default `graph_server=debug,trailgraph_core=debug`).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use trailgraph_core::db::{
    BatchRequest, ImportRequest, InMemoryRemote, RemoteCatalog, RemoteGraph, RemoteTransport,
    RemoveResponse, TransportError, UploadRequest,
};
use trailgraph_core::models::{DescPatch, GraphDesc};

const DEFAULT_PORT: u16 = 3050;

#[derive(Clone)]
struct AppState {
    remote: Arc<InMemoryRemote>,
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HttpError {
    /// User-facing error message
    message: String,
    /// Machine-readable error code
    code: String,
}

impl HttpError {
    fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
        }
    }

    fn not_found(id: &str) -> Self {
        Self::new(format!("Graph not found: {}", id), "GRAPH_NOT_FOUND")
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match self.code.as_str() {
            "GRAPH_NOT_FOUND" => StatusCode::NOT_FOUND,
            "REJECTED" => StatusCode::CONFLICT,
            "INVALID_INPUT" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

impl From<TransportError> for HttpError {
    fn from(err: TransportError) -> Self {
        match &err {
            TransportError::UnknownGraph(id) => HttpError::not_found(id),
            TransportError::Rejected(_) => HttpError::new(err.to_string(), "REJECTED"),
            TransportError::Serialization(_) => HttpError::new(err.to_string(), "INVALID_INPUT"),
            _ => HttpError::new(err.to_string(), "INTERNAL_ERROR"),
        }
    }
}

type ApiResult<T> = Result<Json<T>, HttpError>;

async fn health_check() -> &'static str {
    "OK"
}

async fn list_graphs(State(state): State<AppState>) -> ApiResult<Vec<GraphDesc>> {
    Ok(Json(state.remote.list().await?))
}

async fn upload_graph(
    State(state): State<AppState>,
    Json(request): Json<UploadRequest>,
) -> Result<(StatusCode, Json<GraphDesc>), HttpError> {
    let desc = state.remote.upload(request.desc, request.dump).await?;
    Ok((StatusCode::CREATED, Json(desc)))
}

async fn get_graph(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<RemoteGraph> {
    state
        .remote
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| HttpError::not_found(&id))
}

async fn modify_graph(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<DescPatch>,
) -> ApiResult<GraphDesc> {
    Ok(Json(state.remote.modify(&id, patch).await?))
}

async fn remove_graph(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<RemoveResponse> {
    let removed = state.remote.remove(&id).await?;
    if removed {
        tracing::info!("Removed graph {}", id);
    }
    Ok(Json(RemoveResponse { removed }))
}

async fn apply_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<BatchRequest>,
) -> Result<StatusCode, HttpError> {
    tracing::debug!("Graph {}: applying {} mutation(s)", id, request.mutations.len());
    state.remote.send_batch(&id, &request.mutations).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn import_graph(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ImportRequest>,
) -> Result<StatusCode, HttpError> {
    tracing::debug!(
        "Graph {}: importing {} nodes and {} edges",
        id,
        request.nodes.len(),
        request.edges.len()
    );
    state
        .remote
        .import(&id, &request.nodes, &request.edges)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/graphs", get(list_graphs).post(upload_graph))
        .route(
            "/api/graphs/:id",
            get(get_graph).patch(modify_graph).delete(remove_graph),
        )
        .route("/api/graphs/:id/batch", post(apply_batch))
        .route("/api/graphs/:id/import", post(import_graph))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn port_from_env() -> anyhow::Result<u16> {
    match std::env::var("GRAPH_SERVER_PORT") {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid GRAPH_SERVER_PORT '{}'", value)),
        Err(_) => Ok(DEFAULT_PORT),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("graph_server=debug,trailgraph_core=debug")),
        )
        .init();

    let port = port_from_env()?;
    let state = AppState {
        remote: Arc::new(InMemoryRemote::new()),
    };
    let app = router(state);

    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Graph server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<InMemoryRemote>) {
        let remote = Arc::new(InMemoryRemote::new());
        let app = router(AppState {
            remote: remote.clone(),
        });
        (app, remote)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn upload_then_batch_then_get() {
        let (app, remote) = app();
        let desc = GraphDesc::new("", "Shared", "app", "me");

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/graphs",
                serde_json::json!({ "desc": desc }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = body_json(response).await["id"].as_str().unwrap().to_string();

        let batch = serde_json::json!({
            "mutations": [
                { "op": "addNode", "node": { "type": "state", "id": 0, "name": "Start" } }
            ]
        });
        let response = app
            .clone()
            .oneshot(json_request("POST", &format!("/api/graphs/{}/batch", id), batch))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(remote.snapshot(&id).unwrap().dump.nodes.len(), 1);

        let response = app
            .oneshot(
                Request::get(format!("/api/graphs/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["desc"]["size"][0], 1);
    }

    #[tokio::test]
    async fn unknown_graph_is_not_found() {
        let (app, _) = app();
        let response = app
            .clone()
            .oneshot(Request::get("/api/graphs/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/graphs/nope/batch",
                serde_json::json!({ "mutations": [] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "GRAPH_NOT_FOUND");
    }
}
