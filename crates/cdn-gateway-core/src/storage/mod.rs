//! Storage adapter abstraction and implementations.
//!
//! This module provides a unified interface over the content-delivery buckets
//! the gateway fronts:
//!
//! - **S3**: AWS S3 and S3-compatible services (copy-based metadata updates,
//!   header-signed or form-policy grants)
//! - **GCS**: Google Cloud Storage (in-place metadata updates, header-signed
//!   grants)
//! - **Memory**: In-memory storage with a configurable capability profile
//!   (for testing)

mod backend;
mod config;
mod gcs;
mod memory;
mod s3;

pub use backend::{
    format_custom_time, is_managed_key, object_identifier_from_key, object_key,
    parse_custom_time, ByteStream, CapabilityProfile, CustomMetadata, GrantRequest,
    GrantStrategy, ListPage, MetadataPatch, MetadataUpdateMode, ObjectMetadata, ObjectSummary,
    StorageBackend, UploadGrant, CDN_PREFIX, META_CUSTOM_TIME, META_UPLOADER_IDENTITY_KEY,
};
pub(crate) use backend::{attributes_from_parts, metadata_from_parts};
pub use config::StorageBackendConfig;
pub use gcs::{GcsBackend, GcsConfig};
pub use memory::{MemoryBackend, UploadAttempt};
pub use s3::{S3Backend, S3Config};

use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path;
use object_store::ObjectStore;
use std::sync::Arc;

use crate::error::StorageError;
use crate::{Error, Result};

/// Create a storage backend from configuration.
///
/// The returned handle is constructed once and shared by the grant issuer,
/// the resolver and the ingestion pipeline.
///
/// # Example
///
/// ```rust,ignore
/// use cdn_gateway_core::storage::{create_backend, StorageBackendConfig};
///
/// let backend = create_backend(&StorageBackendConfig::memory())?;
/// ```
pub fn create_backend(config: &StorageBackendConfig) -> Result<Arc<dyn StorageBackend>> {
    config.validate()?;

    match config {
        StorageBackendConfig::S3 {
            bucket,
            region,
            endpoint,
            access_key,
            secret_key,
            session_token,
            allow_http,
            grant_strategy,
        } => {
            let s3_config = S3Config {
                bucket: bucket.clone(),
                region: region.clone().unwrap_or_else(|| "us-east-1".to_string()),
                endpoint: endpoint.clone(),
                access_key_id: access_key.clone(),
                secret_access_key: secret_key.clone(),
                session_token: session_token.clone(),
                allow_http: *allow_http,
                grant_strategy: *grant_strategy,
            };
            Ok(Arc::new(S3Backend::new(s3_config)?))
        }

        StorageBackendConfig::Gcs {
            bucket,
            service_account_path,
            hmac_access_id,
            hmac_secret,
        } => {
            let gcs_config = GcsConfig {
                bucket: bucket.clone(),
                service_account_path: service_account_path.clone(),
                hmac_access_id: or_env(hmac_access_id, "GCS_HMAC_ACCESS_ID"),
                hmac_secret: or_env(hmac_secret, "GCS_HMAC_SECRET"),
            };
            Ok(Arc::new(GcsBackend::new(gcs_config)?))
        }

        StorageBackendConfig::Memory {
            metadata_update,
            grant_strategy,
        } => Ok(Arc::new(MemoryBackend::with_capabilities(CapabilityProfile {
            metadata_update: *metadata_update,
            grant_strategy: *grant_strategy,
        }))),
    }
}

/// Configured value, else the environment variable `var`.
fn or_env(value: &Option<String>, var: &str) -> Option<String> {
    value.clone().or_else(|| std::env::var(var).ok())
}

/// List one page under `prefix`, using the last key of the previous page as
/// the continuation token.
pub(crate) async fn list_page(
    store: &dyn ObjectStore,
    backend: &str,
    prefix: &str,
    page_size: usize,
    continuation_token: Option<&str>,
) -> Result<ListPage> {
    let prefix_path = Path::from(prefix.trim_end_matches('/'));
    let mut stream = match continuation_token {
        Some(token) => store.list_with_offset(Some(&prefix_path), &Path::from(token)),
        None => store.list(Some(&prefix_path)),
    };

    let page_size = page_size.max(1);
    let mut objects = Vec::with_capacity(page_size);
    let mut is_truncated = false;

    while let Some(result) = stream.next().await {
        let meta = result
            .map_err(|e| Error::Storage(StorageError::from_object_store(backend, "LIST", prefix, e)))?;
        if objects.len() == page_size {
            is_truncated = true;
            break;
        }
        objects.push(ObjectSummary {
            key: meta.location.to_string(),
            size: meta.size as u64,
            last_modified: meta.last_modified,
        });
    }

    let next_token = if is_truncated {
        objects.last().map(|o| o.key.clone())
    } else {
        None
    };

    Ok(ListPage {
        objects,
        next_token,
        is_truncated,
    })
}

/// Open a streamed GET for `key`.
pub(crate) async fn stream_object(
    store: &dyn ObjectStore,
    backend: &'static str,
    key: &str,
) -> Result<ByteStream> {
    let path = Path::from(key);
    let result = store
        .get(&path)
        .await
        .map_err(|e| Error::Storage(StorageError::from_object_store(backend, "GET", key, e)))?;

    let key = key.to_string();
    Ok(result
        .into_stream()
        .map_err(move |e| Error::Storage(StorageError::from_object_store(backend, "GET", &key, e)))
        .boxed())
}

/// Drain a body stream into memory.
pub async fn collect_bytes(mut stream: ByteStream) -> Result<Bytes> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_memory_backend() {
        let backend = create_backend(&StorageBackendConfig::memory()).unwrap();
        assert_eq!(backend.name(), "memory");
        assert_eq!(
            backend.capabilities().metadata_update,
            MetadataUpdateMode::CopyReplace
        );
        assert!(!backend.exists("cdn/missing").await.unwrap());
    }

    #[test]
    fn test_hmac_keys_fall_back_to_environment() {
        std::env::set_var("CDN_GATEWAY_TEST_HMAC_ID", "GOOG1FROMENV");
        assert_eq!(
            or_env(&None, "CDN_GATEWAY_TEST_HMAC_ID").as_deref(),
            Some("GOOG1FROMENV")
        );
        assert_eq!(
            or_env(&Some("GOOG1CONFIG".to_string()), "CDN_GATEWAY_TEST_HMAC_ID").as_deref(),
            Some("GOOG1CONFIG")
        );
        assert_eq!(or_env(&None, "CDN_GATEWAY_TEST_HMAC_UNSET"), None);
    }

    #[test]
    fn test_create_backend_rejects_empty_bucket() {
        let config = StorageBackendConfig::S3 {
            bucket: " ".to_string(),
            region: None,
            endpoint: None,
            access_key: None,
            secret_key: None,
            session_token: None,
            allow_http: false,
            grant_strategy: GrantStrategy::SignedHeaders,
        };
        assert!(matches!(create_backend(&config), Err(Error::Config(_))));
    }
}
