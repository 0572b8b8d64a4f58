//! In-memory storage backend for testing.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{GetOptions, ObjectStore, PutOptions, PutPayload};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{
    attributes_from_parts, list_page, metadata_from_parts, stream_object, ByteStream,
    CapabilityProfile, CustomMetadata, GrantRequest, GrantStrategy, ListPage, MetadataPatch,
    MetadataUpdateMode, ObjectMetadata, StorageBackend, UploadGrant,
};
use crate::clock::{system_clock, SharedClock};
use crate::error::StorageError;
use crate::signing::{encode_key_path, PostPolicy, Signer, SigningCredentials, SigningScheme};
use crate::{Error, Result};

const NAME: &str = "memory";
const ENDPOINT: &str = "http://memory.invalid/cdn-bucket";
const BUCKET: &str = "cdn-bucket";

/// A client upload presented against a grant
#[derive(Debug, Clone)]
pub struct UploadAttempt {
    /// Headers sent with a PUT
    pub headers: BTreeMap<String, String>,
    /// Fields sent with a multipart POST
    pub form_fields: BTreeMap<String, String>,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl UploadAttempt {
    /// An upload that follows the grant exactly.
    pub fn from_grant(grant: &UploadGrant, body: impl Into<Bytes>) -> Self {
        Self {
            headers: grant.required_headers.clone(),
            form_fields: grant.form_fields.clone().unwrap_or_default(),
            content_type: Some("application/octet-stream".to_string()),
            body: body.into(),
        }
    }
}

/// Terms recorded for each issued grant
#[derive(Debug, Clone)]
struct IssuedGrant {
    key: String,
    upload_url: String,
    size: u64,
    metadata: CustomMetadata,
    expires_at: chrono::DateTime<Utc>,
}

/// In-memory storage backend using object_store
///
/// Its capability profile is configurable so both metadata-update strategies
/// and both grant shapes can be exercised without a cloud account.
pub struct MemoryBackend {
    store: Arc<InMemory>,
    capabilities: CapabilityProfile,
    signer: Signer,
    credentials: SigningCredentials,
    grants: RwLock<HashMap<String, IssuedGrant>>,
    clock: SharedClock,
}

impl MemoryBackend {
    /// Create a new in-memory backend behaving like S3 (copy-based updates,
    /// header-signed grants)
    pub fn new() -> Self {
        Self::with_capabilities(CapabilityProfile {
            metadata_update: MetadataUpdateMode::CopyReplace,
            grant_strategy: GrantStrategy::SignedHeaders,
        })
    }

    pub fn with_capabilities(capabilities: CapabilityProfile) -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            capabilities,
            signer: Signer::new(SigningScheme::Aws, "us-east-1", "s3"),
            credentials: SigningCredentials::new("memory", "memory-secret"),
            grants: RwLock::new(HashMap::new()),
            clock: system_clock(),
        }
    }

    /// Use `clock` when checking grant expiry and signing download URLs.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Write an object directly, bypassing grants.
    pub async fn put_object(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        metadata: &CustomMetadata,
        content_type: Option<&str>,
    ) -> Result<()> {
        let path = Path::from(key);
        let options = PutOptions {
            attributes: attributes_from_parts(metadata, content_type),
            ..Default::default()
        };
        self.store
            .put_opts(&path, PutPayload::from_bytes(data.into()), options)
            .await
            .map_err(|e| Error::Storage(StorageError::from_object_store(NAME, "PUT", key, e)))?;
        Ok(())
    }

    /// Perform a client upload against a previously issued grant, enforcing
    /// the same bindings the cloud providers enforce.
    pub async fn accept_upload(&self, grant: &UploadGrant, attempt: UploadAttempt) -> Result<()> {
        let issued = self
            .grants
            .read()
            .get(&grant.storage_key)
            .filter(|issued| issued.upload_url == grant.upload_url)
            .cloned()
            .ok_or_else(|| reject("grant was not issued by this backend"))?;

        if self.clock.now() > issued.expires_at {
            return Err(reject("grant has expired"));
        }
        if attempt.body.len() as u64 != issued.size {
            return Err(reject(&format!(
                "content length {} does not match granted size {}",
                attempt.body.len(),
                issued.size
            )));
        }

        let presented = match self.capabilities.grant_strategy {
            GrantStrategy::SignedHeaders => lower_keys(&attempt.headers),
            GrantStrategy::FormPolicy => lower_keys(&attempt.form_fields),
        };
        let required = match self.capabilities.grant_strategy {
            GrantStrategy::SignedHeaders => lower_keys(&grant.required_headers),
            GrantStrategy::FormPolicy => lower_keys(&grant.form_fields.clone().unwrap_or_default()),
        };
        for (name, value) in &required {
            if name == "content-length" {
                continue;
            }
            if presented.get(name) != Some(value) {
                return Err(reject(&format!("`{}` does not match the grant", name)));
            }
        }

        // Only metadata the grant bound is stored, as a signature would cover it
        self.put_object(
            &issued.key,
            attempt.body,
            &issued.metadata,
            attempt.content_type.as_deref(),
        )
        .await
    }

    fn object_url(&self, key: &str) -> Result<Url> {
        Url::parse(&format!("{}/{}", ENDPOINT, encode_key_path(key)))
            .map_err(|e| Error::Config(format!("Invalid memory object URL: {}", e)))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn reject(reason: &str) -> Error {
    Error::Storage(StorageError::SignatureOrPolicyRejected(reason.to_string()))
}

fn lower_keys(map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
        .collect()
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn capabilities(&self) -> CapabilityProfile {
        self.capabilities
    }

    async fn issue_upload_grant(&self, request: &GrantRequest) -> Result<UploadGrant> {
        let key = request.key();
        let metadata = request.bound_metadata();
        let expires_at = request.expires_at()?;

        let grant = match self.capabilities.grant_strategy {
            GrantStrategy::SignedHeaders => {
                let mut headers = BTreeMap::new();
                headers.insert("content-length".to_string(), request.size.to_string());
                for (name, value) in metadata.iter() {
                    headers.insert(self.signer.scheme.meta_header(name), value.to_string());
                }
                let url = self.signer.presign_url(
                    &self.credentials,
                    "PUT",
                    &self.object_url(&key)?,
                    &headers,
                    request.ttl,
                    request.issued_at,
                )?;
                UploadGrant {
                    upload_url: url.to_string(),
                    required_headers: headers,
                    form_fields: None,
                    storage_key: key.clone(),
                    expires_at,
                }
            }
            GrantStrategy::FormPolicy => {
                let fields = PostPolicy {
                    bucket: BUCKET,
                    key: &key,
                    size: request.size,
                    metadata: &metadata,
                    expires_at,
                }
                .form_fields(&self.signer, &self.credentials, request.issued_at);
                UploadGrant {
                    upload_url: format!("{}/", ENDPOINT),
                    required_headers: BTreeMap::new(),
                    form_fields: Some(fields),
                    storage_key: key.clone(),
                    expires_at,
                }
            }
        };

        // A newer grant for the same key supersedes the previous one
        self.grants.write().insert(
            key.clone(),
            IssuedGrant {
                key,
                upload_url: grant.upload_url.clone(),
                size: request.size,
                metadata,
                expires_at,
            },
        );

        Ok(grant)
    }

    async fn head(&self, key: &str) -> Result<ObjectMetadata> {
        let path = Path::from(key);
        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = self
            .store
            .get_opts(&path, options)
            .await
            .map_err(|e| Error::Storage(StorageError::from_object_store(NAME, "HEAD", key, e)))?;

        Ok(metadata_from_parts(&result.meta, &result.attributes))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = Path::from(key);
        self.store
            .delete(&path)
            .await
            .map_err(|e| Error::Storage(StorageError::from_object_store(NAME, "DELETE", key, e)))?;
        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        page_size: usize,
        continuation_token: Option<&str>,
    ) -> Result<ListPage> {
        list_page(self.store.as_ref(), NAME, prefix, page_size, continuation_token).await
    }

    async fn issue_download_grant(&self, key: &str, ttl: Duration) -> Result<String> {
        let url = self.signer.presign_url(
            &self.credentials,
            "GET",
            &self.object_url(key)?,
            &BTreeMap::new(),
            ttl,
            self.clock.now(),
        )?;
        Ok(url.to_string())
    }

    async fn download(&self, key: &str) -> Result<ByteStream> {
        stream_object(self.store.as_ref(), NAME, key).await
    }

    async fn patch_metadata_in_place(&self, key: &str, patch: &MetadataPatch) -> Result<()> {
        if self.capabilities.metadata_update != MetadataUpdateMode::InPlace {
            return Err(Error::Storage(StorageError::Unsupported {
                backend: NAME,
                operation: "patch_metadata_in_place",
            }));
        }
        let current = self.head(key).await?;
        let merged = patch.apply_to(&current.custom);
        self.rewrite(key, &merged, current.content_type.as_deref())
            .await
    }

    async fn copy_with_metadata(
        &self,
        key: &str,
        metadata: &CustomMetadata,
        content_type: Option<&str>,
    ) -> Result<()> {
        if self.capabilities.metadata_update != MetadataUpdateMode::CopyReplace {
            return Err(Error::Storage(StorageError::Unsupported {
                backend: NAME,
                operation: "copy_with_metadata",
            }));
        }
        self.rewrite(key, metadata, content_type).await
    }
}

impl MemoryBackend {
    /// Replace the object with itself under new attributes. The single PUT
    /// swaps the entry atomically.
    async fn rewrite(
        &self,
        key: &str,
        metadata: &CustomMetadata,
        content_type: Option<&str>,
    ) -> Result<()> {
        debug!("Memory REWRITE: {}", key);
        let data = super::collect_bytes(self.download(key).await?).await?;
        self.put_object(key, data, metadata, content_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{collect_bytes, META_CUSTOM_TIME, META_UPLOADER_IDENTITY_KEY};
    use chrono::DateTime;

    fn grant_request(id: &str, size: u64) -> GrantRequest {
        GrantRequest {
            object_identifier: id.to_string(),
            size,
            custom_time: DateTime::from_timestamp(1_900_000_000, 0).unwrap(),
            uploader_identity_key: "03owner".to_string(),
            ttl: Duration::from_secs(3600),
            issued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_memory_backend_basic() {
        let backend = MemoryBackend::new();
        let metadata: CustomMetadata = [("uploaderidentitykey", "03owner")].into_iter().collect();

        backend
            .put_object("cdn/a", "Hello, World!", &metadata, Some("text/plain"))
            .await
            .unwrap();

        assert!(backend.exists("cdn/a").await.unwrap());
        let head = backend.head("cdn/a").await.unwrap();
        assert_eq!(head.size, 13);
        assert_eq!(head.content_type.as_deref(), Some("text/plain"));
        assert_eq!(head.uploader_identity_key(), Some("03owner"));

        let body = collect_bytes(backend.download("cdn/a").await.unwrap())
            .await
            .unwrap();
        assert_eq!(body, Bytes::from("Hello, World!"));

        backend.delete("cdn/a").await.unwrap();
        assert!(!backend.exists("cdn/a").await.unwrap());
    }

    #[tokio::test]
    async fn test_head_missing_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend.head("cdn/nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_signed_header_upload_round_trip() {
        let backend = MemoryBackend::new();
        let grant = backend
            .issue_upload_grant(&grant_request("abc", 4))
            .await
            .unwrap();

        assert!(!grant.is_form_upload());
        assert!(grant.upload_url.contains("X-Amz-Signature="));

        backend
            .accept_upload(&grant, UploadAttempt::from_grant(&grant, "data"))
            .await
            .unwrap();

        let head = backend.head("cdn/abc").await.unwrap();
        assert_eq!(head.custom.get(META_UPLOADER_IDENTITY_KEY), Some("03owner"));
        assert_eq!(head.custom.get("CustomTime"), Some("2030-03-17T17:46:40Z"));
    }

    #[tokio::test]
    async fn test_upload_with_wrong_size_rejected() {
        let backend = MemoryBackend::new();
        let grant = backend
            .issue_upload_grant(&grant_request("abc", 4))
            .await
            .unwrap();

        let err = backend
            .accept_upload(&grant, UploadAttempt::from_grant(&grant, "too long"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Storage(StorageError::SignatureOrPolicyRejected(_))
        ));
        assert!(!backend.exists("cdn/abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_upload_with_tampered_header_rejected() {
        let backend = MemoryBackend::new();
        let grant = backend
            .issue_upload_grant(&grant_request("abc", 4))
            .await
            .unwrap();

        let mut attempt = UploadAttempt::from_grant(&grant, "data");
        attempt
            .headers
            .insert("x-amz-meta-customtime".to_string(), "2099-01-01T00:00:00Z".to_string());

        assert!(backend.accept_upload(&grant, attempt).await.is_err());
    }

    #[tokio::test]
    async fn test_form_policy_grant_shape() {
        let backend = MemoryBackend::with_capabilities(CapabilityProfile {
            metadata_update: MetadataUpdateMode::CopyReplace,
            grant_strategy: GrantStrategy::FormPolicy,
        });
        let grant = backend
            .issue_upload_grant(&grant_request("abc", 4))
            .await
            .unwrap();

        let fields = grant.form_fields.as_ref().unwrap();
        assert!(grant.required_headers.is_empty());
        assert_eq!(fields["key"], "cdn/abc");
        assert_eq!(fields["x-amz-meta-uploaderidentitykey"], "03owner");
        assert!(fields.contains_key(&format!("x-amz-meta-{}", META_CUSTOM_TIME)));
    }

    #[tokio::test]
    async fn test_list_pages() {
        let backend = MemoryBackend::new();
        for id in ["a", "b", "c"] {
            backend
                .put_object(&format!("cdn/{}", id), "x", &CustomMetadata::new(), None)
                .await
                .unwrap();
        }
        backend
            .put_object("other/z", "x", &CustomMetadata::new(), None)
            .await
            .unwrap();

        let first = backend.list("cdn/", 2, None).await.unwrap();
        assert_eq!(first.objects.len(), 2);
        assert!(first.is_truncated);
        assert_eq!(first.next_token.as_deref(), Some("cdn/b"));

        let second = backend
            .list("cdn/", 2, first.next_token.as_deref())
            .await
            .unwrap();
        assert_eq!(second.objects.len(), 1);
        assert_eq!(second.objects[0].key, "cdn/c");
        assert!(!second.is_truncated);
        assert!(second.next_token.is_none());
    }
}
