//! Configuration structures for the gateway.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::signing::MAX_PRESIGN_EXPIRY;
use crate::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Storage configuration (supports S3, GCS, Memory)
    pub storage: crate::storage::StorageBackendConfig,

    /// Upload grant options
    #[serde(default)]
    pub grants: GrantOptions,

    /// Change-notification channel (required for `ingest`)
    #[serde(default)]
    pub notifications: Option<NotificationConfig>,

    /// Downstream registration endpoint (required for `ingest`)
    #[serde(default)]
    pub registration: Option<RegistrationConfig>,

    /// Advertisement lookup service (required for `resolve`)
    #[serde(default)]
    pub advertisements: Option<AdvertisementConfig>,

    /// Ingestion loop options
    #[serde(default)]
    pub ingest: IngestOptions,

    /// Metrics server options
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
}

/// Upload grant options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantOptions {
    /// How long an issued grant stays valid, in seconds (default: one week)
    #[serde(default = "default_grant_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for GrantOptions {
    fn default() -> Self {
        Self {
            ttl_secs: default_grant_ttl_secs(),
        }
    }
}

impl GrantOptions {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// SQS queue receiving bucket change notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub queue_url: String,

    /// AWS region (default: us-east-1)
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint (for LocalStack, ElasticMQ)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Static access key; when unset the AWS provider chain applies
    /// (`AWS_ACCESS_KEY_ID`, web identity, ECS task role, instance metadata)
    #[serde(default)]
    pub access_key: Option<String>,

    #[serde(default)]
    pub secret_key: Option<String>,

    #[serde(default)]
    pub session_token: Option<String>,
}

impl NotificationConfig {
    /// Keys left unset here are resolved per request by the AWS provider
    /// chain, so instance and task roles keep working across rotation.
    pub fn to_sqs_config(&self) -> crate::ingest::SqsConfig {
        crate::ingest::SqsConfig {
            queue_url: self.queue_url.clone(),
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            access_key_id: self.access_key.clone(),
            secret_access_key: self.secret_key.clone(),
            session_token: self.session_token.clone(),
        }
    }
}

/// Registration endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    pub endpoint: String,
    pub admin_token: String,

    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

/// Advertisement lookup service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvertisementConfig {
    pub endpoint: String,

    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

/// Ingestion loop options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOptions {
    /// Messages requested per receive (default: 10, SQS maximum)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Long-poll wait in seconds (default: 20)
    #[serde(default = "default_wait_time_secs")]
    pub wait_time_secs: u64,

    /// Messages processed concurrently within a batch (default: 4)
    #[serde(default = "default_max_concurrent_messages")]
    pub max_concurrent_messages: usize,

    /// Expiry used when an object has no `customtime` (default: 30 days)
    #[serde(default = "default_fallback_expiry_days")]
    pub fallback_expiry_days: i64,

    /// Consecutive receive failures tolerated before the loop gives up
    /// (default: 10)
    #[serde(default = "default_max_consecutive_poll_failures")]
    pub max_consecutive_poll_failures: u32,

    /// Base delay for exponential poll backoff in milliseconds (default: 500)
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Backoff cap in milliseconds (default: 30000)
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            wait_time_secs: default_wait_time_secs(),
            max_concurrent_messages: default_max_concurrent_messages(),
            fallback_expiry_days: default_fallback_expiry_days(),
            max_consecutive_poll_failures: default_max_consecutive_poll_failures(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl IngestOptions {
    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_secs)
    }

    /// Delay before the next receive after `failures` consecutive failures.
    pub fn poll_backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let delay_ms = self
            .retry_base_delay_ms
            .saturating_mul(2u64.pow(exponent))
            .min(self.retry_max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.batch_size > 10 {
            return Err(Error::Config(format!(
                "ingest.batch_size must be between 1 and 10, got {}",
                self.batch_size
            )));
        }
        if self.wait_time_secs > 20 {
            return Err(Error::Config(format!(
                "ingest.wait_time_secs must be at most 20, got {}",
                self.wait_time_secs
            )));
        }
        if self.max_concurrent_messages == 0 {
            return Err(Error::Config(
                "ingest.max_concurrent_messages must be > 0".to_string(),
            ));
        }
        if !(1..=MAX_FALLBACK_EXPIRY_DAYS).contains(&self.fallback_expiry_days) {
            return Err(Error::Config(format!(
                "ingest.fallback_expiry_days must be between 1 and {}",
                MAX_FALLBACK_EXPIRY_DAYS
            )));
        }
        if self.max_consecutive_poll_failures == 0 {
            return Err(Error::Config(
                "ingest.max_consecutive_poll_failures must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Metrics server options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Bind address (default: 0.0.0.0:9090)
    #[serde(default = "default_metrics_bind_address")]
    pub bind_address: String,
}

fn default_grant_ttl_secs() -> u64 {
    crate::grant::DEFAULT_GRANT_TTL.as_secs()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_batch_size() -> usize {
    10
}

fn default_wait_time_secs() -> u64 {
    20
}

fn default_max_concurrent_messages() -> usize {
    4
}

/// A century; keeps `now + fallback` representable
const MAX_FALLBACK_EXPIRY_DAYS: i64 = 36_500;

fn default_fallback_expiry_days() -> i64 {
    30
}

fn default_max_consecutive_poll_failures() -> u32 {
    10
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_metrics_bind_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl GatewayConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatewayConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;

        if self.grants.ttl_secs == 0 {
            return Err(Error::Config("grants.ttl_secs must be > 0".to_string()));
        }
        if self.grants.ttl_secs > MAX_PRESIGN_EXPIRY.as_secs() {
            return Err(Error::Config(format!(
                "grants.ttl_secs must be <= {} (longest presigned URL validity)",
                MAX_PRESIGN_EXPIRY.as_secs()
            )));
        }

        if let Some(notifications) = &self.notifications {
            if notifications.queue_url.trim().is_empty() {
                return Err(Error::Config(
                    "notifications.queue_url cannot be empty".to_string(),
                ));
            }
        }

        if let Some(registration) = &self.registration {
            if registration.endpoint.trim().is_empty() {
                return Err(Error::Config(
                    "registration.endpoint cannot be empty".to_string(),
                ));
            }
            if registration.admin_token.is_empty() {
                return Err(Error::Config(
                    "registration.admin_token cannot be empty".to_string(),
                ));
            }
        }

        if let Some(advertisements) = &self.advertisements {
            if advertisements.endpoint.trim().is_empty() {
                return Err(Error::Config(
                    "advertisements.endpoint cannot be empty".to_string(),
                ));
            }
        }

        self.ingest.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageBackendConfig;
    use std::io::Write;

    const FULL: &str = r#"
storage:
  backend: s3
  bucket: cdn-bucket
  region: eu-west-1
grants:
  ttl_secs: 3600
notifications:
  queue_url: https://sqs.eu-west-1.amazonaws.com/123456789012/cdn-events
  region: eu-west-1
  access_key: AKIDEXAMPLE
  secret_key: secret
registration:
  endpoint: https://overlay.example.com/advertise
  admin_token: token
advertisements:
  endpoint: https://overlay.example.com/lookup
ingest:
  max_concurrent_messages: 8
metrics:
  bind_address: 127.0.0.1:9100
"#;

    #[test]
    fn test_full_config_with_defaults() {
        let config = GatewayConfig::from_yaml(FULL).unwrap();

        assert!(matches!(config.storage, StorageBackendConfig::S3 { .. }));
        assert_eq!(config.grants.ttl(), Duration::from_secs(3600));
        assert_eq!(config.ingest.batch_size, 10);
        assert_eq!(config.ingest.wait_time_secs, 20);
        assert_eq!(config.ingest.max_concurrent_messages, 8);
        assert_eq!(config.ingest.fallback_expiry_days, 30);
        assert_eq!(config.registration.unwrap().timeout_secs, 30);
        assert_eq!(config.metrics.unwrap().bind_address, "127.0.0.1:9100");

        let sqs = config.notifications.unwrap().to_sqs_config();
        assert_eq!(sqs.region, "eu-west-1");
        assert_eq!(sqs.access_key_id.as_deref(), Some("AKIDEXAMPLE"));
        assert!(sqs.session_token.is_none());
    }

    #[test]
    fn test_minimal_config() {
        let config = GatewayConfig::from_yaml("storage:\n  backend: memory\n").unwrap();
        assert_eq!(config.grants.ttl_secs, 7 * 24 * 60 * 60);
        assert!(config.notifications.is_none());
    }

    #[test]
    fn test_validation_errors() {
        let bad_batch = "storage:\n  backend: memory\ningest:\n  batch_size: 11\n";
        assert!(matches!(
            GatewayConfig::from_yaml(bad_batch),
            Err(Error::Config(_))
        ));

        let bad_fallback = "storage:\n  backend: memory\ningest:\n  fallback_expiry_days: 99999999999999\n";
        assert!(matches!(
            GatewayConfig::from_yaml(bad_fallback),
            Err(Error::Config(_))
        ));

        let bad_token = r#"
storage:
  backend: memory
registration:
  endpoint: https://overlay.example.com/advertise
  admin_token: ""
"#;
        assert!(matches!(
            GatewayConfig::from_yaml(bad_token),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_grant_ttl_limited_to_presign_window() {
        let two_weeks = "storage:\n  backend: memory\ngrants:\n  ttl_secs: 1209600\n";
        assert!(matches!(
            GatewayConfig::from_yaml(two_weeks),
            Err(Error::Config(_))
        ));

        let one_week = "storage:\n  backend: memory\ngrants:\n  ttl_secs: 604800\n";
        assert!(GatewayConfig::from_yaml(one_week).is_ok());
    }

    #[test]
    fn test_poll_backoff_is_capped() {
        let options = IngestOptions::default();
        assert_eq!(options.poll_backoff(1), Duration::from_millis(500));
        assert_eq!(options.poll_backoff(3), Duration::from_millis(2000));
        assert_eq!(options.poll_backoff(40), Duration::from_millis(30_000));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"storage:\n  backend: memory\n").unwrap();

        let config = GatewayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.storage.backend_name(), "memory");
        assert!(GatewayConfig::from_file("/nonexistent/gateway.yaml").is_err());
    }
}
