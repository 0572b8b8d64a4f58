//! Instrumented storage backend decorator.
//!
//! Wraps any `StorageBackend` and records latency and errors per operation.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::labels::{ErrorType, StorageOperation};
use super::registry::GatewayMetrics;
use crate::storage::{
    create_backend, ByteStream, CapabilityProfile, CustomMetadata, GrantRequest, ListPage,
    MetadataPatch, ObjectMetadata, StorageBackend, StorageBackendConfig, UploadGrant,
};
use crate::Result;

/// A storage backend wrapper that records metrics for all operations.
///
/// # Example
///
/// ```rust,ignore
/// use cdn_gateway_core::metrics::{GatewayMetrics, InstrumentedStorageBackend};
///
/// let backend = create_backend(&StorageBackendConfig::memory())?;
/// let metrics = Arc::new(GatewayMetrics::new());
/// let instrumented = InstrumentedStorageBackend::new(backend, metrics);
/// ```
pub struct InstrumentedStorageBackend {
    inner: Arc<dyn StorageBackend>,
    metrics: Arc<GatewayMetrics>,
}

impl InstrumentedStorageBackend {
    pub fn new(inner: Arc<dyn StorageBackend>, metrics: Arc<GatewayMetrics>) -> Self {
        Self { inner, metrics }
    }

    pub fn inner(&self) -> &Arc<dyn StorageBackend> {
        &self.inner
    }

    /// Record latency since `start` and classify a failure, passing the
    /// result through.
    fn observe<T>(&self, operation: StorageOperation, start: Instant, result: Result<T>) -> Result<T> {
        let backend = self.inner.name();
        self.metrics
            .record_storage_latency(backend, operation, start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            // Absence is an answer, not a failure
            if !e.is_not_found() {
                self.metrics
                    .inc_storage_error(backend, operation, ErrorType::from_error(e));
            }
        }
        result
    }
}

#[async_trait]
impl StorageBackend for InstrumentedStorageBackend {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn capabilities(&self) -> CapabilityProfile {
        self.inner.capabilities()
    }

    async fn issue_upload_grant(&self, request: &GrantRequest) -> Result<UploadGrant> {
        let start = Instant::now();
        let result = self.inner.issue_upload_grant(request).await;
        self.observe(StorageOperation::UploadGrant, start, result)
    }

    async fn head(&self, key: &str) -> Result<ObjectMetadata> {
        let start = Instant::now();
        let result = self.inner.head(key).await;
        self.observe(StorageOperation::Head, start, result)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let start = Instant::now();
        let result = self.inner.delete(key).await;
        self.observe(StorageOperation::Delete, start, result)
    }

    async fn list(
        &self,
        prefix: &str,
        page_size: usize,
        continuation_token: Option<&str>,
    ) -> Result<ListPage> {
        let start = Instant::now();
        let result = self.inner.list(prefix, page_size, continuation_token).await;
        self.observe(StorageOperation::List, start, result)
    }

    async fn issue_download_grant(&self, key: &str, ttl: Duration) -> Result<String> {
        let start = Instant::now();
        let result = self.inner.issue_download_grant(key, ttl).await;
        self.observe(StorageOperation::DownloadGrant, start, result)
    }

    /// Times opening the stream, not draining it.
    async fn download(&self, key: &str) -> Result<ByteStream> {
        let start = Instant::now();
        let result = self.inner.download(key).await;
        self.observe(StorageOperation::Download, start, result)
    }

    async fn update_metadata(&self, key: &str, patch: &MetadataPatch) -> Result<()> {
        let start = Instant::now();
        let result = self.inner.update_metadata(key, patch).await;
        self.observe(StorageOperation::UpdateMetadata, start, result)
    }

    async fn patch_metadata_in_place(&self, key: &str, patch: &MetadataPatch) -> Result<()> {
        self.inner.patch_metadata_in_place(key, patch).await
    }

    async fn copy_with_metadata(
        &self,
        key: &str,
        metadata: &CustomMetadata,
        content_type: Option<&str>,
    ) -> Result<()> {
        self.inner
            .copy_with_metadata(key, metadata, content_type)
            .await
    }
}

/// Build a backend from configuration, wrapped with metrics.
pub fn create_instrumented_backend(
    config: &StorageBackendConfig,
    metrics: Arc<GatewayMetrics>,
) -> Result<Arc<dyn StorageBackend>> {
    let backend = create_backend(config)?;
    Ok(Arc::new(InstrumentedStorageBackend::new(backend, metrics)))
}
