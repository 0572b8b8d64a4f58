//! Storage adapter contract.
//!
//! Every backend implements [`StorageBackend`]; grant issuance, resolution and
//! ingestion only ever see this trait. Backend differences that callers must
//! not branch on are described by [`CapabilityProfile`].

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::BoxStream;
use object_store::{Attribute, AttributeValue, Attributes, ObjectMeta};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::StorageError;
use crate::{Error, Result};

/// Prefix of every managed object key
pub const CDN_PREFIX: &str = "cdn/";

/// Bound metadata field carrying the uploader's identity key
pub const META_UPLOADER_IDENTITY_KEY: &str = "uploaderidentitykey";

/// Bound metadata field carrying the expiry (+ grace) as ISO-8601
pub const META_CUSTOM_TIME: &str = "customtime";

/// Storage key for an object identifier.
pub fn object_key(object_identifier: &str) -> String {
    format!("{}{}", CDN_PREFIX, object_identifier)
}

/// Trailing path segment of a key, which is the object identifier for
/// managed objects.
pub fn object_identifier_from_key(key: &str) -> Option<&str> {
    key.rsplit('/').next().filter(|s| !s.is_empty())
}

/// Whether a key lives under the managed prefix.
pub fn is_managed_key(key: &str) -> bool {
    key.starts_with(CDN_PREFIX) && key.len() > CDN_PREFIX.len()
}

/// Custom object metadata with case-insensitive keys.
///
/// Keys are stored lower-cased; S3 and GCS both fold user metadata names to
/// lower case on the wire, so lookups must ignore case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomMetadata(BTreeMap<String, String>);

impl CustomMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.0.insert(key.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(&key.to_ascii_lowercase())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(&key.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for CustomMetadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = CustomMetadata::new();
        for (k, v) in iter {
            metadata.insert(k, v);
        }
        metadata
    }
}

/// A partial metadata update. `None` removes the key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataPatch(BTreeMap<String, Option<String>>);

impl MetadataPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.0
            .insert(key.as_ref().to_ascii_lowercase(), Some(value.into()));
        self
    }

    pub fn remove(mut self, key: impl AsRef<str>) -> Self {
        self.0.insert(key.as_ref().to_ascii_lowercase(), None);
        self
    }

    /// Patch setting the bound custom-time field.
    pub fn custom_time(at: DateTime<Utc>) -> Self {
        Self::new().set(META_CUSTOM_TIME, format_custom_time(at))
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge this patch over `current`; the patch wins on collisions.
    pub fn apply_to(&self, current: &CustomMetadata) -> CustomMetadata {
        let mut merged = current.clone();
        for (key, value) in self.entries() {
            match value {
                Some(v) => merged.insert(key, v),
                None => {
                    merged.remove(key);
                }
            }
        }
        merged
    }
}

/// Format a timestamp the way the `customtime` field carries it.
pub fn format_custom_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a `customtime` value.
pub fn parse_custom_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Metadata about a stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectMetadata {
    /// Size in bytes
    pub size: u64,
    /// Content type (if the backend reported one)
    pub content_type: Option<String>,
    /// Last modified timestamp
    pub last_modified: DateTime<Utc>,
    /// ETag or content hash (if available)
    pub e_tag: Option<String>,
    /// User metadata
    pub custom: CustomMetadata,
}

impl ObjectMetadata {
    pub fn uploader_identity_key(&self) -> Option<&str> {
        self.custom
            .get(META_UPLOADER_IDENTITY_KEY)
            .filter(|v| !v.is_empty())
    }

    pub fn custom_time(&self) -> Option<DateTime<Utc>> {
        self.custom.get(META_CUSTOM_TIME).and_then(parse_custom_time)
    }
}

/// One entry of a listing page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    /// Token to pass back for the next page
    pub next_token: Option<String>,
    pub is_truncated: bool,
}

/// How a backend changes metadata on an existing object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataUpdateMode {
    /// Metadata can be patched without rewriting the object
    InPlace,
    /// The object must be copied onto itself with replaced metadata
    CopyReplace,
}

/// How an upload grant binds size and metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStrategy {
    /// Signature covers content-length and the metadata headers; the client
    /// PUTs with exactly the returned headers.
    #[default]
    SignedHeaders,
    /// A signed policy constrains the length range; metadata travels as form
    /// fields in a multipart POST.
    FormPolicy,
}

/// Fixed behavioral differences of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityProfile {
    pub metadata_update: MetadataUpdateMode,
    pub grant_strategy: GrantStrategy,
}

/// Everything a backend needs to sign one upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRequest {
    pub object_identifier: String,
    /// Exact byte size the upload must have
    pub size: u64,
    /// Value for the bound `customtime` field
    pub custom_time: DateTime<Utc>,
    pub uploader_identity_key: String,
    /// How long the grant itself stays valid
    pub ttl: Duration,
    /// Signing time
    pub issued_at: DateTime<Utc>,
}

impl GrantRequest {
    pub fn key(&self) -> String {
        object_key(&self.object_identifier)
    }

    /// The metadata every upload under this grant must carry.
    pub fn bound_metadata(&self) -> CustomMetadata {
        let mut metadata = CustomMetadata::new();
        metadata.insert(META_UPLOADER_IDENTITY_KEY, self.uploader_identity_key.clone());
        metadata.insert(META_CUSTOM_TIME, format_custom_time(self.custom_time));
        metadata
    }

    pub fn expires_at(&self) -> Result<DateTime<Utc>> {
        i64::try_from(self.ttl.as_secs())
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|ttl| self.issued_at.checked_add_signed(ttl))
            .ok_or_else(|| {
                Error::InvalidRequest(format!("grant ttl out of range: {}s", self.ttl.as_secs()))
            })
    }
}

/// A signed authorization for one client upload.
///
/// Exactly one of "PUT with `required_headers`" or "multipart POST with
/// `form_fields`" applies; `form_fields` is `Some` only for form-policy grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadGrant {
    #[serde(rename = "uploadURL")]
    pub upload_url: String,
    pub required_headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_fields: Option<BTreeMap<String, String>>,
    pub storage_key: String,
    pub expires_at: DateTime<Utc>,
}

impl UploadGrant {
    pub fn is_form_upload(&self) -> bool {
        self.form_fields.is_some()
    }
}

/// Streamed object body
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Trait for storage backends
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Backend identifier, for diagnostics only
    fn name(&self) -> &'static str;

    /// Behavioral profile of this backend
    fn capabilities(&self) -> CapabilityProfile;

    /// Sign an upload grant for `cdn/{object_identifier}`. Performs no I/O
    /// beyond fetching signing credentials.
    async fn issue_upload_grant(&self, request: &GrantRequest) -> Result<UploadGrant>;

    /// Get object metadata; fails with `NotFound` if absent
    async fn head(&self, key: &str) -> Result<ObjectMetadata>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> Result<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete a key
    async fn delete(&self, key: &str) -> Result<()>;

    /// List one page of keys under `prefix`
    async fn list(
        &self,
        prefix: &str,
        page_size: usize,
        continuation_token: Option<&str>,
    ) -> Result<ListPage>;

    /// Presigned GET URL valid for `ttl`
    async fn issue_download_grant(&self, key: &str, ttl: Duration) -> Result<String>;

    /// Stream the object body
    async fn download(&self, key: &str) -> Result<ByteStream>;

    /// Apply a partial metadata update, whatever the backend's capability
    async fn update_metadata(&self, key: &str, patch: &MetadataPatch) -> Result<()> {
        crate::mutator::update_metadata(self, key, patch).await
    }

    /// Patch metadata without rewriting the object
    async fn patch_metadata_in_place(&self, _key: &str, _patch: &MetadataPatch) -> Result<()> {
        Err(Error::Storage(StorageError::Unsupported {
            backend: self.name(),
            operation: "patch_metadata_in_place",
        }))
    }

    /// Copy the object onto itself replacing all custom metadata
    async fn copy_with_metadata(
        &self,
        _key: &str,
        _metadata: &CustomMetadata,
        _content_type: Option<&str>,
    ) -> Result<()> {
        Err(Error::Storage(StorageError::Unsupported {
            backend: self.name(),
            operation: "copy_with_metadata",
        }))
    }
}

/// Build [`ObjectMetadata`] from an `object_store` head result.
pub(crate) fn metadata_from_parts(meta: &ObjectMeta, attributes: &Attributes) -> ObjectMetadata {
    let mut custom = CustomMetadata::new();
    let mut content_type = None;

    for (attribute, value) in attributes.iter() {
        match attribute {
            Attribute::ContentType => content_type = Some(value.to_string()),
            Attribute::Metadata(name) => custom.insert(name.as_ref(), value.to_string()),
            _ => {}
        }
    }

    ObjectMetadata {
        size: meta.size as u64,
        content_type,
        last_modified: meta.last_modified,
        e_tag: meta.e_tag.clone(),
        custom,
    }
}

/// Build `object_store` attributes carrying custom metadata and content type.
pub(crate) fn attributes_from_parts(
    custom: &CustomMetadata,
    content_type: Option<&str>,
) -> Attributes {
    let mut attributes = Attributes::new();
    if let Some(content_type) = content_type {
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(content_type.to_string()),
        );
    }
    for (key, value) in custom.iter() {
        attributes.insert(
            Attribute::Metadata(key.to_string().into()),
            AttributeValue::from(value.to_string()),
        );
    }
    attributes
}
