//! Test utilities for ledgerline-core
//!
//! Provides a mock REST server that serves the finance API routes out of a
//! [`MemoryBackend`], so the HTTP client can be exercised end to end.

use std::net::SocketAddr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::backend::{Backend, MemoryBackend};
use crate::error::Error;
use crate::models::{
    BatchDeleteResponse, BatchOperationResponse, EntityRecord, EntityType, ListPage,
};

type ApiResult<T> = std::result::Result<Json<T>, (StatusCode, String)>;

/// Mock finance API server for tests
pub struct MockBackendServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockBackendServer {
    /// Start the mock server on an available port, serving `store`
    pub async fn start(store: MemoryBackend) -> Self {
        let app = Router::new()
            .route(
                "/api/categories",
                get(handle_categories).put(handle_replace_categories),
            )
            .route("/api/wealth-over-time", get(handle_wealth))
            .route("/api/:endpoint", get(handle_list))
            .route("/api/:endpoint/batch", post(handle_batch_create))
            .route("/api/:endpoint/batch-delete", post(handle_batch_delete))
            .route("/api/:endpoint/:id", delete(handle_delete_one))
            .with_state(store);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockBackendServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn to_response(err: Error) -> (StatusCode, String) {
    let status = match &err {
        Error::Transport {
            status: Some(code), ..
        } => StatusCode::from_u16(*code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn entity_type(endpoint: &str) -> std::result::Result<EntityType, (StatusCode, String)> {
    EntityType::from_endpoint(endpoint)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("unknown collection {}", endpoint)))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page_size: Option<usize>,
    page: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct BatchCreateBody {
    items: Vec<EntityRecord>,
}

#[derive(Debug, Deserialize)]
struct BatchDeleteBody {
    ids: Vec<i64>,
}

async fn handle_list(
    State(store): State<MemoryBackend>,
    Path(endpoint): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<ListPage> {
    let t = entity_type(&endpoint)?;
    store
        .list(t, query.page_size.unwrap_or(100), query.page.unwrap_or(1))
        .await
        .map(Json)
        .map_err(to_response)
}

async fn handle_batch_create(
    State(store): State<MemoryBackend>,
    Path(endpoint): Path<String>,
    Json(body): Json<BatchCreateBody>,
) -> ApiResult<BatchOperationResponse> {
    let t = entity_type(&endpoint)?;
    store
        .batch_create(t, body.items)
        .await
        .map(Json)
        .map_err(to_response)
}

async fn handle_batch_delete(
    State(store): State<MemoryBackend>,
    Path(endpoint): Path<String>,
    Json(body): Json<BatchDeleteBody>,
) -> ApiResult<BatchDeleteResponse> {
    let t = entity_type(&endpoint)?;
    store
        .batch_delete(t, &body.ids)
        .await
        .map(Json)
        .map_err(to_response)
}

async fn handle_delete_one(
    State(store): State<MemoryBackend>,
    Path((endpoint, id)): Path<(String, i64)>,
) -> std::result::Result<StatusCode, (StatusCode, String)> {
    let t = entity_type(&endpoint)?;
    store
        .delete_one(t, id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(to_response)
}

async fn handle_categories(State(store): State<MemoryBackend>) -> ApiResult<Vec<EntityRecord>> {
    store.categories().await.map(Json).map_err(to_response)
}

async fn handle_replace_categories(
    State(store): State<MemoryBackend>,
    Json(body): Json<Vec<EntityRecord>>,
) -> ApiResult<Vec<EntityRecord>> {
    store
        .replace_categories(body)
        .await
        .map(Json)
        .map_err(to_response)
}

async fn handle_wealth(State(store): State<MemoryBackend>) -> ApiResult<Value> {
    store.wealth_over_time().await.map(Json).map_err(to_response)
}
