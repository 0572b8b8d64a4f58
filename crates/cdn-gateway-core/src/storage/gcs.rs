//! Google Cloud Storage backend implementation.
//!
//! Upload and download grants are V4 signed URLs using an HMAC key, since
//! the service-account OAuth token held by `object_store` cannot sign them.
//! Metadata is patched in place through the JSON API.

use async_trait::async_trait;
use chrono::Utc;
use object_store::gcp::{GoogleCloudStorage, GoogleCloudStorageBuilder};
use object_store::path::Path;
use object_store::{CredentialProvider, GetOptions, ObjectStore};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{
    list_page, metadata_from_parts, stream_object, ByteStream, CapabilityProfile, GrantRequest,
    GrantStrategy, ListPage, MetadataPatch, MetadataUpdateMode, ObjectMetadata, StorageBackend,
    UploadGrant,
};
use crate::error::StorageError;
use crate::signing::{encode_key_path, uri_encode, Signer, SigningCredentials, SigningScheme};
use crate::{Error, Result};

const NAME: &str = "gcs";
const XML_ENDPOINT: &str = "https://storage.googleapis.com";
const JSON_ENDPOINT: &str = "https://storage.googleapis.com/storage/v1";

/// Google Cloud Storage backend configuration
#[derive(Debug, Clone)]
pub struct GcsConfig {
    /// GCS bucket name
    pub bucket: String,
    /// Path to service account JSON key file (if None, uses Application Default Credentials)
    pub service_account_path: Option<String>,
    /// HMAC access ID used to sign grants
    pub hmac_access_id: Option<String>,
    /// HMAC secret used to sign grants
    pub hmac_secret: Option<String>,
}

/// Google Cloud Storage backend
pub struct GcsBackend {
    store: Arc<GoogleCloudStorage>,
    http: reqwest::Client,
    signer: Signer,
    bucket: String,
    hmac: Option<SigningCredentials>,
}

impl GcsBackend {
    /// Create a new Google Cloud Storage backend
    ///
    /// If `service_account_path` is not provided, the SDK will attempt to use
    /// Application Default Credentials (ADC) which tries:
    /// 1. GOOGLE_APPLICATION_CREDENTIALS environment variable
    /// 2. Google Cloud SDK default credentials
    /// 3. Compute Engine/GKE metadata service
    pub fn new(config: GcsConfig) -> Result<Self> {
        let mut builder = GoogleCloudStorageBuilder::new().with_bucket_name(&config.bucket);

        if let Some(path) = &config.service_account_path {
            builder = builder.with_service_account_path(path);
        }

        let store = builder.build().map_err(|e| {
            Error::Storage(StorageError::Backend(format!(
                "Failed to create GCS client: {}",
                e
            )))
        })?;

        let hmac = match (config.hmac_access_id, config.hmac_secret) {
            (Some(id), Some(secret)) => Some(SigningCredentials::new(id, secret)),
            _ => None,
        };

        info!(
            "Created GCS backend for bucket: {}, signed grants: {}",
            config.bucket,
            hmac.is_some()
        );

        Ok(Self {
            store: Arc::new(store),
            http: reqwest::Client::new(),
            signer: Signer::new(SigningScheme::Goog, "auto", "storage"),
            bucket: config.bucket,
            hmac,
        })
    }

    fn object_url(&self, key: &str) -> Result<Url> {
        Url::parse(&format!(
            "{}/{}/{}",
            XML_ENDPOINT,
            self.bucket,
            encode_key_path(key)
        ))
        .map_err(|e| Error::Config(format!("Invalid GCS object URL: {}", e)))
    }

    fn hmac_credentials(&self) -> Result<&SigningCredentials> {
        self.hmac.as_ref().ok_or_else(|| {
            Error::Config("GCS signed URLs require hmac_access_id and hmac_secret".to_string())
        })
    }

    async fn bearer_token(&self) -> Result<String> {
        let credential = self
            .store
            .credentials()
            .get_credential()
            .await
            .map_err(|e| {
                Error::Storage(StorageError::Backend(format!(
                    "Failed to load GCS credentials: {}",
                    e
                )))
            })?;
        Ok(credential.bearer.clone())
    }
}

/// JSON API body for a metadata patch; `null` deletes a key.
fn patch_body(patch: &MetadataPatch) -> Value {
    let metadata: Map<String, Value> = patch
        .entries()
        .map(|(key, value)| {
            let value = value.map_or(Value::Null, |v| Value::String(v.to_string()));
            (key.to_string(), value)
        })
        .collect();
    serde_json::json!({ "metadata": metadata })
}

#[async_trait]
impl StorageBackend for GcsBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn capabilities(&self) -> CapabilityProfile {
        CapabilityProfile {
            metadata_update: MetadataUpdateMode::InPlace,
            grant_strategy: GrantStrategy::SignedHeaders,
        }
    }

    async fn issue_upload_grant(&self, request: &GrantRequest) -> Result<UploadGrant> {
        let credentials = self.hmac_credentials()?;
        let key = request.key();

        let mut headers = BTreeMap::new();
        headers.insert("content-length".to_string(), request.size.to_string());
        for (name, value) in request.bound_metadata().iter() {
            headers.insert(self.signer.scheme.meta_header(name), value.to_string());
        }

        let url = self.signer.presign_url(
            credentials,
            "PUT",
            &self.object_url(&key)?,
            &headers,
            request.ttl,
            request.issued_at,
        )?;
        debug!("GCS upload grant issued for {}", key);

        Ok(UploadGrant {
            upload_url: url.to_string(),
            required_headers: headers,
            form_fields: None,
            storage_key: key,
            expires_at: request.expires_at()?,
        })
    }

    async fn head(&self, key: &str) -> Result<ObjectMetadata> {
        let path = Path::from(key);
        debug!("GCS HEAD: {}", path);

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
        debug!("GCS DELETE: {}", path);

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
        debug!("GCS LIST: {}", prefix);
        list_page(self.store.as_ref(), NAME, prefix, page_size, continuation_token).await
    }

    async fn issue_download_grant(&self, key: &str, ttl: Duration) -> Result<String> {
        let url = self.signer.presign_url(
            self.hmac_credentials()?,
            "GET",
            &self.object_url(key)?,
            &BTreeMap::new(),
            ttl,
            Utc::now(),
        )?;
        Ok(url.to_string())
    }

    async fn download(&self, key: &str) -> Result<ByteStream> {
        debug!("GCS GET: {}", key);
        stream_object(self.store.as_ref(), NAME, key).await
    }

    async fn patch_metadata_in_place(&self, key: &str, patch: &MetadataPatch) -> Result<()> {
        debug!("GCS PATCH: {}", key);

        let url = format!(
            "{}/b/{}/o/{}",
            JSON_ENDPOINT,
            uri_encode(&self.bucket),
            uri_encode(key)
        );
        let token = self.bearer_token().await?;

        let response = self
            .http
            .patch(&url)
            .bearer_auth(token)
            .json(&patch_body(patch))
            .send()
            .await
            .map_err(|e| {
                Error::Storage(StorageError::Transient(format!("GCS PATCH failed: {}", e)))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Storage(StorageError::from_status(
                status.as_u16(),
                &body,
                &format!("GCS PATCH {}", key),
            )));
        }

        Ok(())
    }
}
