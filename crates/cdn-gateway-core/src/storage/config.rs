//! Storage configuration types.

use serde::{Deserialize, Serialize};

use super::{GrantStrategy, MetadataUpdateMode};

/// Storage backend configuration using tagged enum for type-safe configuration.
///
/// Supports:
/// - S3 and S3-compatible endpoints (MinIO, Ceph RGW, etc.)
/// - Google Cloud Storage
/// - In-memory (for testing and local runs)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend")]
pub enum StorageBackendConfig {
    /// AWS S3 or S3-compatible storage
    #[serde(rename = "s3")]
    S3 {
        /// S3 bucket name
        bucket: String,
        /// AWS region (e.g., "us-east-1"); also used in grant signatures
        #[serde(default)]
        region: Option<String>,
        /// Custom endpoint URL (for S3-compatible services like MinIO)
        #[serde(default)]
        endpoint: Option<String>,
        /// Access key ID (falls back to AWS_ACCESS_KEY_ID env var)
        #[serde(default)]
        access_key: Option<String>,
        /// Secret access key (falls back to AWS_SECRET_ACCESS_KEY env var)
        #[serde(default)]
        secret_key: Option<String>,
        /// Session token for temporary credentials (falls back to AWS_SESSION_TOKEN)
        #[serde(default)]
        session_token: Option<String>,
        /// Allow HTTP (insecure) connections
        #[serde(default)]
        allow_http: bool,
        /// Header-signed PUT grants or form-policy POST grants
        #[serde(default)]
        grant_strategy: GrantStrategy,
    },

    /// Google Cloud Storage
    #[serde(rename = "gcs")]
    Gcs {
        /// GCS bucket name
        bucket: String,
        /// Path to service account JSON key file (if None, uses Application Default Credentials)
        #[serde(default)]
        service_account_path: Option<String>,
        /// HMAC access ID used to sign grants (falls back to GCS_HMAC_ACCESS_ID)
        #[serde(default)]
        hmac_access_id: Option<String>,
        /// HMAC secret used to sign grants (falls back to GCS_HMAC_SECRET)
        #[serde(default)]
        hmac_secret: Option<String>,
    },

    /// In-memory storage (for testing)
    #[serde(rename = "memory")]
    Memory {
        #[serde(default = "default_memory_update_mode")]
        metadata_update: MetadataUpdateMode,
        #[serde(default)]
        grant_strategy: GrantStrategy,
    },
}

fn default_memory_update_mode() -> MetadataUpdateMode {
    MetadataUpdateMode::CopyReplace
}

impl StorageBackendConfig {
    /// In-memory storage with S3-like capabilities
    pub fn memory() -> Self {
        Self::Memory {
            metadata_update: default_memory_update_mode(),
            grant_strategy: GrantStrategy::default(),
        }
    }

    /// Parse configuration from a URL string
    ///
    /// Supported URL formats:
    /// - `s3://bucket-name?region=us-east-1&grant_strategy=form_policy`
    /// - `gcs://bucket-name`
    /// - `memory://?metadata_update=in_place`
    pub fn from_url(url: &str) -> crate::Result<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| crate::Error::Config(format!("Invalid storage URL: {}", e)))?;
        let query = |name: &str| {
            parsed
                .query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.to_string())
        };

        match parsed.scheme() {
            "s3" | "s3a" => {
                let bucket = parsed.host_str().unwrap_or_default().to_string();
                let grant_strategy = match query("grant_strategy").as_deref() {
                    None | Some("signed_headers") => GrantStrategy::SignedHeaders,
                    Some("form_policy") => GrantStrategy::FormPolicy,
                    Some(other) => {
                        return Err(crate::Error::Config(format!(
                            "Unknown grant strategy: {}",
                            other
                        )))
                    }
                };
                let endpoint = query("endpoint");
                let allow_http = endpoint
                    .as_ref()
                    .is_some_and(|e| e.starts_with("http://"));

                Ok(Self::S3 {
                    bucket,
                    region: query("region"),
                    endpoint,
                    access_key: std::env::var("AWS_ACCESS_KEY_ID").ok(),
                    secret_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
                    session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
                    allow_http,
                    grant_strategy,
                })
            }
            "gcs" | "gs" => {
                let bucket = parsed.host_str().unwrap_or_default().to_string();

                Ok(Self::Gcs {
                    bucket,
                    service_account_path: std::env::var("GOOGLE_APPLICATION_CREDENTIALS").ok(),
                    hmac_access_id: std::env::var("GCS_HMAC_ACCESS_ID").ok(),
                    hmac_secret: std::env::var("GCS_HMAC_SECRET").ok(),
                })
            }
            "memory" => {
                let metadata_update = match query("metadata_update").as_deref() {
                    Some("in_place") => MetadataUpdateMode::InPlace,
                    _ => MetadataUpdateMode::CopyReplace,
                };
                let grant_strategy = match query("grant_strategy").as_deref() {
                    Some("form_policy") => GrantStrategy::FormPolicy,
                    _ => GrantStrategy::SignedHeaders,
                };
                Ok(Self::Memory {
                    metadata_update,
                    grant_strategy,
                })
            }
            scheme => Err(crate::Error::Config(format!(
                "Unknown storage scheme: {}",
                scheme
            ))),
        }
    }

    /// Backend name used for metric labels
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::S3 { .. } => "s3",
            Self::Gcs { .. } => "gcs",
            Self::Memory { .. } => "memory",
        }
    }

    /// Reject configurations that cannot possibly work
    pub fn validate(&self) -> crate::Result<()> {
        match self {
            Self::S3 { bucket, .. } | Self::Gcs { bucket, .. } if bucket.trim().is_empty() => Err(
                crate::Error::Config(format!("{} bucket is required", self.backend_name())),
            ),
            _ => Ok(()),
        }
    }
}
