//! S3-compatible storage backend using object_store.
//!
//! Reads, listings and deletes go through `object_store`. Grants are signed
//! locally with the store's own credentials, and metadata updates use a raw
//! `CopyObject` with `x-amz-metadata-directive: REPLACE`, which
//! `object_store` does not expose.

use async_trait::async_trait;
use chrono::Utc;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::{CredentialProvider, GetOptions, ObjectStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{
    list_page, metadata_from_parts, stream_object, ByteStream, CapabilityProfile, CustomMetadata,
    GrantRequest, GrantStrategy, ListPage, MetadataUpdateMode, ObjectMetadata, StorageBackend,
    UploadGrant,
};
use crate::error::StorageError;
use crate::signing::{
    encode_key_path, sha256_hex, PostPolicy, Signer, SigningCredentials, SigningScheme,
};
use crate::{Error, Result};

const NAME: &str = "s3";

/// S3 storage backend configuration
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// AWS region, also the signing region of grants
    pub region: String,
    /// Custom endpoint (for S3-compatible services like MinIO)
    pub endpoint: Option<String>,
    /// Access key ID
    pub access_key_id: Option<String>,
    /// Secret access key
    pub secret_access_key: Option<String>,
    /// Session token for temporary credentials
    pub session_token: Option<String>,
    /// Allow HTTP (insecure) connections
    pub allow_http: bool,
    /// Shape of the upload grants this backend issues
    pub grant_strategy: GrantStrategy,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            allow_http: false,
            grant_strategy: GrantStrategy::SignedHeaders,
        }
    }
}

/// S3 storage backend
pub struct S3Backend {
    store: Arc<AmazonS3>,
    http: reqwest::Client,
    signer: Signer,
    bucket: String,
    /// Base URL of the bucket, without a trailing slash
    bucket_url: String,
    grant_strategy: GrantStrategy,
}

impl S3Backend {
    /// Create a new S3 backend
    pub fn new(config: S3Config) -> Result<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
            // Custom endpoints are addressed path-style
            builder = builder.with_virtual_hosted_style_request(false);
        }

        if let Some(access_key) = &config.access_key_id {
            builder = builder.with_access_key_id(access_key);
        }

        if let Some(secret_key) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret_key);
        }

        if let Some(token) = &config.session_token {
            builder = builder.with_token(token);
        }

        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = builder.build().map_err(|e| {
            Error::Storage(StorageError::Backend(format!(
                "Failed to create S3 client: {}",
                e
            )))
        })?;

        let bucket_url = match &config.endpoint {
            Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), config.bucket),
            None => format!(
                "https://{}.s3.{}.amazonaws.com",
                config.bucket, config.region
            ),
        };

        info!(
            "Created S3 backend for bucket: {}, grants: {:?}",
            config.bucket, config.grant_strategy
        );

        Ok(Self {
            store: Arc::new(store),
            http: reqwest::Client::new(),
            signer: Signer::new(SigningScheme::Aws, config.region, "s3"),
            bucket: config.bucket,
            bucket_url,
            grant_strategy: config.grant_strategy,
        })
    }

    fn object_url(&self, key: &str) -> Result<Url> {
        Url::parse(&format!("{}/{}", self.bucket_url, encode_key_path(key)))
            .map_err(|e| Error::Config(format!("Invalid S3 object URL: {}", e)))
    }

    /// Current signing credentials of the underlying store
    async fn signing_credentials(&self) -> Result<SigningCredentials> {
        let credential = self
            .store
            .credentials()
            .get_credential()
            .await
            .map_err(|e| {
                Error::Storage(StorageError::Backend(format!(
                    "Failed to load S3 credentials: {}",
                    e
                )))
            })?;

        Ok(
            SigningCredentials::new(credential.key_id.clone(), credential.secret_key.clone())
                .with_session_token(credential.token.clone()),
        )
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn capabilities(&self) -> CapabilityProfile {
        CapabilityProfile {
            metadata_update: MetadataUpdateMode::CopyReplace,
            grant_strategy: self.grant_strategy,
        }
    }

    async fn issue_upload_grant(&self, request: &GrantRequest) -> Result<UploadGrant> {
        let credentials = self.signing_credentials().await?;
        let key = request.key();
        let metadata = request.bound_metadata();
        let expires_at = request.expires_at()?;

        match self.grant_strategy {
            GrantStrategy::SignedHeaders => {
                let mut headers = BTreeMap::new();
                headers.insert("content-length".to_string(), request.size.to_string());
                for (name, value) in metadata.iter() {
                    headers.insert(self.signer.scheme.meta_header(name), value.to_string());
                }

                let url = self.signer.presign_url(
                    &credentials,
                    "PUT",
                    &self.object_url(&key)?,
                    &headers,
                    request.ttl,
                    request.issued_at,
                )?;
                debug!("S3 upload grant issued for {}", key);

                Ok(UploadGrant {
                    upload_url: url.to_string(),
                    required_headers: headers,
                    form_fields: None,
                    storage_key: key,
                    expires_at,
                })
            }
            GrantStrategy::FormPolicy => {
                let fields = PostPolicy {
                    bucket: &self.bucket,
                    key: &key,
                    size: request.size,
                    metadata: &metadata,
                    expires_at,
                }
                .form_fields(&self.signer, &credentials, request.issued_at);
                debug!("S3 POST policy issued for {}", key);

                Ok(UploadGrant {
                    upload_url: format!("{}/", self.bucket_url),
                    required_headers: BTreeMap::new(),
                    form_fields: Some(fields),
                    storage_key: key,
                    expires_at,
                })
            }
        }
    }

    async fn head(&self, key: &str) -> Result<ObjectMetadata> {
        let path = Path::from(key);
        debug!("S3 HEAD: {}", path);

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
        debug!("S3 DELETE: {}", path);

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
        debug!("S3 LIST: {}", prefix);
        list_page(self.store.as_ref(), NAME, prefix, page_size, continuation_token).await
    }

    async fn issue_download_grant(&self, key: &str, ttl: Duration) -> Result<String> {
        let credentials = self.signing_credentials().await?;
        let url = self.signer.presign_url(
            &credentials,
            "GET",
            &self.object_url(key)?,
            &BTreeMap::new(),
            ttl,
            Utc::now(),
        )?;
        Ok(url.to_string())
    }

    async fn download(&self, key: &str) -> Result<ByteStream> {
        debug!("S3 GET: {}", key);
        stream_object(self.store.as_ref(), NAME, key).await
    }

    async fn copy_with_metadata(
        &self,
        key: &str,
        metadata: &CustomMetadata,
        content_type: Option<&str>,
    ) -> Result<()> {
        debug!("S3 COPY (REPLACE): {}", key);

        let credentials = self.signing_credentials().await?;
        let url = self.object_url(key)?;
        let now = Utc::now();
        let payload_hash = sha256_hex(b"");

        let mut headers = BTreeMap::new();
        headers.insert("x-amz-date".to_string(), self.signer.scope(now).timestamp);
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        headers.insert(
            "x-amz-copy-source".to_string(),
            format!("/{}/{}", self.bucket, encode_key_path(key)),
        );
        headers.insert("x-amz-metadata-directive".to_string(), "REPLACE".to_string());
        if let Some(content_type) = content_type {
            headers.insert("content-type".to_string(), content_type.to_string());
        }
        if let Some(token) = &credentials.session_token {
            headers.insert("x-amz-security-token".to_string(), token.clone());
        }
        for (name, value) in metadata.iter() {
            headers.insert(self.signer.scheme.meta_header(name), value.to_string());
        }

        let authorization =
            self.signer
                .authorization_header(&credentials, "PUT", &url, &headers, &payload_hash, now)?;

        let mut request = self
            .http
            .put(url)
            .header("authorization", authorization)
            .header("content-length", "0");
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| {
            Error::Storage(StorageError::Transient(format!("S3 COPY failed: {}", e)))
        })?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        // CopyObject can report a failure inside a 200 response
        if status >= 300 || body.contains("<Error>") {
            let status = if status >= 300 { status } else { 500 };
            return Err(Error::Storage(StorageError::from_status(
                status,
                &body,
                &format!("S3 COPY {}", key),
            )));
        }

        Ok(())
    }
}
