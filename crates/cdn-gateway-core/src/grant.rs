//! Upload grant issuance.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::clock::SharedClock;
use crate::signing::MAX_PRESIGN_EXPIRY;
use crate::storage::{GrantRequest, StorageBackend, UploadGrant};
use crate::{Error, Result};

/// Grace period added on top of the requested retention when binding
/// `customtime`, so an advertisement never outlives its object.
pub const CUSTOM_TIME_GRACE: Duration = Duration::from_secs(300);

/// Default validity window of an upload grant (one week)
pub const DEFAULT_GRANT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Issues ownership-bound, size-constrained upload grants.
///
/// Stateless per call; cheap to share behind an `Arc`.
pub struct UploadGrantIssuer {
    backend: Arc<dyn StorageBackend>,
    clock: SharedClock,
    ttl: Duration,
}

impl UploadGrantIssuer {
    pub fn new(backend: Arc<dyn StorageBackend>, clock: SharedClock) -> Self {
        Self {
            backend,
            clock,
            ttl: DEFAULT_GRANT_TTL,
        }
    }

    /// Override how long issued grants stay valid.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Issue a grant to upload exactly `size` bytes as `cdn/{object_identifier}`.
    ///
    /// The stored object will carry `uploaderidentitykey` and
    /// `customtime = now + retention + 5 minutes`.
    pub async fn issue(
        &self,
        size: u64,
        retention_minutes: u64,
        object_identifier: &str,
        uploader_identity_key: &str,
    ) -> Result<UploadGrant> {
        if size == 0 {
            return Err(Error::InvalidRequest("size must be positive".to_string()));
        }
        if retention_minutes == 0 {
            return Err(Error::InvalidRequest(
                "retention period must be positive".to_string(),
            ));
        }
        if uploader_identity_key.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "uploader identity key is required".to_string(),
            ));
        }
        if object_identifier.is_empty() || object_identifier.contains('/') {
            return Err(Error::InvalidRequest(format!(
                "object identifier must be a single non-empty key segment, got {:?}",
                object_identifier
            )));
        }

        if self.ttl.is_zero() || self.ttl > MAX_PRESIGN_EXPIRY {
            return Err(Error::InvalidRequest(format!(
                "grant validity must be between 1s and {}s, got {}s",
                MAX_PRESIGN_EXPIRY.as_secs(),
                self.ttl.as_secs()
            )));
        }

        let too_large = || Error::InvalidRequest("retention period too large".to_string());
        let retention = retention_minutes
            .checked_mul(60)
            .and_then(|s| i64::try_from(s).ok())
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(too_large)?;
        let grace = chrono::Duration::try_seconds(CUSTOM_TIME_GRACE.as_secs() as i64)
            .ok_or_else(too_large)?;

        let issued_at = self.clock.now();
        let custom_time = issued_at
            .checked_add_signed(retention)
            .and_then(|t| t.checked_add_signed(grace))
            .ok_or_else(too_large)?;

        let request = GrantRequest {
            object_identifier: object_identifier.to_string(),
            size,
            custom_time,
            uploader_identity_key: uploader_identity_key.to_string(),
            ttl: self.ttl,
            issued_at,
        };

        let grant = self.backend.issue_upload_grant(&request).await?;
        info!(
            "Issued {} upload grant for {} ({} bytes, expires {})",
            self.backend.name(),
            grant.storage_key,
            size,
            grant.expires_at
        );
        Ok(grant)
    }
}
