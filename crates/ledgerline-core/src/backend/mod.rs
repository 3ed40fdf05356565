//! Backend abstraction over the finance tracker's REST API
//!
//! The engine never talks to storage directly. Every read, create and delete
//! goes through the `Backend` trait, which mirrors the endpoints the API
//! exposes per entity type.
//!
//! # Architecture
//!
//! - `Backend` trait: list / batch-create / batch-delete / single-delete per
//!   entity type, plus the global category structure and the derived
//!   wealth-over-time series
//! - `BackendClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - Implementations: `HttpBackend` (reqwest), `MemoryBackend` (in-process)
//!
//! # Configuration
//!
//! See [`crate::config::EngineConfig`]: `backend.kind` picks the
//! implementation, `backend.url` and `backend.timeout_secs` configure HTTP.

mod http;
mod memory;

pub use http::HttpBackend;
pub use memory::{BackendCall, MemoryBackend};

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::config::{BackendKind, EngineConfig};
use crate::error::Result;
use crate::models::{
    BatchDeleteResponse, BatchOperationResponse, EntityRecord, EntityType, ListPage,
};

/// Trait defining the operations the engine consumes
///
/// Backends should be Send + Sync so a run can be driven from any task.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Read one page of an entity collection (pages are 1-based)
    async fn list(&self, entity_type: EntityType, page_size: usize, page: usize)
        -> Result<ListPage>;

    /// Create many records; items are accepted or rejected independently
    async fn batch_create(
        &self,
        entity_type: EntityType,
        items: Vec<EntityRecord>,
    ) -> Result<BatchOperationResponse>;

    /// Delete many records by id; ids are accepted or rejected independently
    async fn batch_delete(&self, entity_type: EntityType, ids: &[i64])
        -> Result<BatchDeleteResponse>;

    /// Delete a single record (for types without a batch-delete endpoint)
    async fn delete_one(&self, entity_type: EntityType, id: i64) -> Result<()>;

    /// Read the global category structure
    async fn categories(&self) -> Result<Vec<EntityRecord>>;

    /// Replace the global category structure wholesale
    async fn replace_categories(&self, categories: Vec<EntityRecord>)
        -> Result<Vec<EntityRecord>>;

    /// Derived wealth time series (export only)
    async fn wealth_over_time(&self) -> Result<Value>;

    /// Get a short name for logging
    fn name(&self) -> &str;
}

/// Concrete backend client enum
///
/// Provides Clone and compile-time dispatch without Box<dyn> overhead.
#[derive(Clone)]
pub enum BackendClient {
    /// REST API over HTTP
    Http(HttpBackend),
    /// In-process store
    Memory(MemoryBackend),
}

impl BackendClient {
    /// Create a backend client from configuration.
    ///
    /// The memory kind starts empty and is dropped with the client, so
    /// nothing carries over between processes.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        match config.backend_kind {
            BackendKind::Http => Ok(BackendClient::Http(HttpBackend::new(
                &config.backend_url,
                config.timeout,
            )?)),
            BackendKind::Memory => {
                warn!("Using the in-memory backend: it starts empty and keeps nothing after exit");
                Ok(BackendClient::Memory(MemoryBackend::new()))
            }
        }
    }

    /// Create an in-memory backend directly
    pub fn memory() -> Self {
        BackendClient::Memory(MemoryBackend::new())
    }
}

// Implement Backend for BackendClient by delegating to the inner backend
#[async_trait]
impl Backend for BackendClient {
    async fn list(
        &self,
        entity_type: EntityType,
        page_size: usize,
        page: usize,
    ) -> Result<ListPage> {
        match self {
            BackendClient::Http(b) => b.list(entity_type, page_size, page).await,
            BackendClient::Memory(b) => b.list(entity_type, page_size, page).await,
        }
    }

    async fn batch_create(
        &self,
        entity_type: EntityType,
        items: Vec<EntityRecord>,
    ) -> Result<BatchOperationResponse> {
        match self {
            BackendClient::Http(b) => b.batch_create(entity_type, items).await,
            BackendClient::Memory(b) => b.batch_create(entity_type, items).await,
        }
    }

    async fn batch_delete(
        &self,
        entity_type: EntityType,
        ids: &[i64],
    ) -> Result<BatchDeleteResponse> {
        match self {
            BackendClient::Http(b) => b.batch_delete(entity_type, ids).await,
            BackendClient::Memory(b) => b.batch_delete(entity_type, ids).await,
        }
    }

    async fn delete_one(&self, entity_type: EntityType, id: i64) -> Result<()> {
        match self {
            BackendClient::Http(b) => b.delete_one(entity_type, id).await,
            BackendClient::Memory(b) => b.delete_one(entity_type, id).await,
        }
    }

    async fn categories(&self) -> Result<Vec<EntityRecord>> {
        match self {
            BackendClient::Http(b) => b.categories().await,
            BackendClient::Memory(b) => b.categories().await,
        }
    }

    async fn replace_categories(
        &self,
        categories: Vec<EntityRecord>,
    ) -> Result<Vec<EntityRecord>> {
        match self {
            BackendClient::Http(b) => b.replace_categories(categories).await,
            BackendClient::Memory(b) => b.replace_categories(categories).await,
        }
    }

    async fn wealth_over_time(&self) -> Result<Value> {
        match self {
            BackendClient::Http(b) => b.wealth_over_time().await,
            BackendClient::Memory(b) => b.wealth_over_time().await,
        }
    }

    fn name(&self) -> &str {
        match self {
            BackendClient::Http(b) => b.name(),
            BackendClient::Memory(b) => b.name(),
        }
    }
}

/// Fetch every record of a type, following pages until `total` is reached.
///
/// The first request asks for `page_size` items, which is expected to cover
/// the whole collection; later pages only happen when the backend caps it.
pub async fn fetch_all(
    backend: &dyn Backend,
    entity_type: EntityType,
    page_size: usize,
) -> Result<Vec<EntityRecord>> {
    if entity_type == EntityType::Category {
        return backend.categories().await;
    }

    let mut items = Vec::new();
    let mut page = 1;
    loop {
        let result = backend.list(entity_type, page_size, page).await?;
        let received = result.items.len();
        items.extend(result.items);
        if received == 0 || items.len() >= result.total {
            break;
        }
        page += 1;
    }

    tracing::debug!(
        entity_type = %entity_type,
        count = items.len(),
        pages = page,
        "Fetched collection"
    );
    Ok(items)
}
