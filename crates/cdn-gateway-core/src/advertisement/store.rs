//! Advertisement lookup port and implementations.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::tags::Advertisement;
use crate::{Error, Result};

/// A tag query: every listed tag must be present on a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdvertisementQuery {
    pub tags: Vec<String>,
    pub limit: usize,
    pub offset: usize,
}

/// Source of advertisement records
#[async_trait]
pub trait AdvertisementStore: Send + Sync {
    async fn find(&self, query: &AdvertisementQuery) -> Result<Vec<Advertisement>>;
}

/// In-memory advertisement store (for testing)
#[derive(Default)]
pub struct MemoryAdvertisementStore {
    records: RwLock<Vec<Advertisement>>,
}

impl MemoryAdvertisementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, advertisement: Advertisement) {
        self.records.write().push(advertisement);
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl AdvertisementStore for MemoryAdvertisementStore {
    async fn find(&self, query: &AdvertisementQuery) -> Result<Vec<Advertisement>> {
        let records = self.records.read();
        Ok(records
            .iter()
            .filter(|ad| query.tags.iter().all(|tag| ad.has_tag(tag)))
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
    tags: &'a [String],
    tag_query_mode: &'static str,
    limit: usize,
    offset: usize,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    outputs: Vec<Advertisement>,
}

/// Advertisement store backed by an HTTP tag-query endpoint
pub struct HttpAdvertisementStore {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpAdvertisementStore {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl AdvertisementStore for HttpAdvertisementStore {
    async fn find(&self, query: &AdvertisementQuery) -> Result<Vec<Advertisement>> {
        debug!("Advertisement lookup: {} tags", query.tags.len());

        let body = LookupRequest {
            tags: &query.tags,
            tag_query_mode: "all",
            limit: query.limit,
            offset: query.offset,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Lookup(format!("Failed to reach lookup service: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Lookup(format!(
                "Lookup service returned {}: {}",
                status, text
            )));
        }

        let parsed: LookupResponse = response
            .json()
            .await
            .map_err(|e| Error::Lookup(format!("Failed to parse lookup response: {}", e)))?;
        Ok(parsed.outputs)
    }
}
