//! REST backend
//!
//! JSON client for the finance API. Every failed call, whether the
//! connection broke or the server answered non-2xx, surfaces as
//! [`Error::Transport`] naming the endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{
    BatchDeleteResponse, BatchOperationResponse, EntityRecord, EntityType, ListPage,
};

use super::Backend;

/// Body of a batch-create request
#[derive(Debug, Serialize)]
struct BatchCreateRequest<'a> {
    items: &'a [EntityRecord],
}

/// Categories come back either bare or wrapped
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CategoriesResponse {
    Bare(Vec<EntityRecord>),
    Wrapped { categories: Vec<EntityRecord> },
}

impl CategoriesResponse {
    fn into_records(self) -> Vec<EntityRecord> {
        match self {
            Self::Bare(records) | Self::Wrapped { categories: records } => records,
        }
    }
}

/// HTTP backend
#[derive(Clone)]
pub struct HttpBackend {
    http_client: Client,
    base_url: String,
}

impl HttpBackend {
    /// Create a client for the API at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http_client
            .request(method, format!("{}{}", self.base_url, path))
    }

    /// Send a request and decode its JSON body
    async fn send<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::transport(endpoint, None, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                body
            };
            return Err(Error::transport(endpoint, Some(status.as_u16()), message));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::transport(endpoint, Some(status.as_u16()), e))
    }

    /// Send a request whose response body is irrelevant
    async fn send_empty(&self, endpoint: &str, request: RequestBuilder) -> Result<()> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::transport(endpoint, None, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::transport(endpoint, Some(status.as_u16()), body));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn list(
        &self,
        entity_type: EntityType,
        page_size: usize,
        page: usize,
    ) -> Result<ListPage> {
        let path = format!("/api/{}", entity_type.endpoint());
        let endpoint = format!("GET {}", path);
        debug!(endpoint = %endpoint, page_size, page, "Listing");
        let request = self
            .request(Method::GET, &path)
            .query(&[("page_size", page_size), ("page", page)]);
        self.send(&endpoint, request).await
    }

    async fn batch_create(
        &self,
        entity_type: EntityType,
        items: Vec<EntityRecord>,
    ) -> Result<BatchOperationResponse> {
        let path = format!("/api/{}/batch", entity_type.endpoint());
        let endpoint = format!("POST {}", path);
        debug!(endpoint = %endpoint, count = items.len(), "Batch create");
        let request = self
            .request(Method::POST, &path)
            .json(&BatchCreateRequest { items: &items });
        self.send(&endpoint, request).await
    }

    async fn batch_delete(
        &self,
        entity_type: EntityType,
        ids: &[i64],
    ) -> Result<BatchDeleteResponse> {
        let path = format!("/api/{}/batch-delete", entity_type.endpoint());
        let endpoint = format!("POST {}", path);
        debug!(endpoint = %endpoint, count = ids.len(), "Batch delete");
        let request = self.request(Method::POST, &path).json(&json!({ "ids": ids }));
        self.send(&endpoint, request).await
    }

    async fn delete_one(&self, entity_type: EntityType, id: i64) -> Result<()> {
        let path = format!("/api/{}/{}", entity_type.endpoint(), id);
        let endpoint = format!("DELETE {}", path);
        self.send_empty(&endpoint, self.request(Method::DELETE, &path))
            .await
    }

    async fn categories(&self) -> Result<Vec<EntityRecord>> {
        let endpoint = "GET /api/categories";
        let response: CategoriesResponse = self
            .send(endpoint, self.request(Method::GET, "/api/categories"))
            .await?;
        Ok(response.into_records())
    }

    async fn replace_categories(
        &self,
        categories: Vec<EntityRecord>,
    ) -> Result<Vec<EntityRecord>> {
        let endpoint = "PUT /api/categories";
        debug!(endpoint, count = categories.len(), "Replacing categories");
        let request = self
            .request(Method::PUT, "/api/categories")
            .json(&categories);
        let response: CategoriesResponse = self.send(endpoint, request).await?;
        Ok(response.into_records())
    }

    async fn wealth_over_time(&self) -> Result<Value> {
        self.send(
            "GET /api/wealth-over-time",
            self.request(Method::GET, "/api/wealth-over-time"),
        )
        .await
    }

    fn name(&self) -> &str {
        &self.base_url
    }
}
