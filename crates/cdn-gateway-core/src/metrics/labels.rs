//! Label types for Prometheus metrics.

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use std::fmt::Write;

use crate::error::StorageError;

/// Labels for storage operation metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StorageLabels {
    pub backend: String,
    pub operation: StorageOperation,
}

impl StorageLabels {
    pub fn new(backend: impl Into<String>, operation: StorageOperation) -> Self {
        Self {
            backend: backend.into(),
            operation,
        }
    }
}

/// Labels for storage error metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StorageErrorLabels {
    pub backend: String,
    pub operation: StorageOperation,
    pub error_type: ErrorType,
}

impl StorageErrorLabels {
    pub fn new(backend: impl Into<String>, operation: StorageOperation, error_type: ErrorType) -> Self {
        Self {
            backend: backend.into(),
            operation,
            error_type,
        }
    }
}

/// Labels for ingestion failure metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct IngestErrorLabels {
    pub error_type: ErrorType,
}

/// Labels for ignored notification events.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct IgnoredEventLabels {
    pub reason: IgnoreReason,
}

/// Why a notification event produced no registration.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Key outside the managed prefix
    Unmanaged,
    /// Not an object-created event
    NotCreate,
    /// Provider test message
    TestEvent,
}

impl IgnoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnoreReason::Unmanaged => "unmanaged_key",
            IgnoreReason::NotCreate => "not_create",
            IgnoreReason::TestEvent => "test_event",
        }
    }
}

impl EncodeLabelValue for IgnoreReason {
    fn encode(
        &self,
        encoder: &mut prometheus_client::encoding::LabelValueEncoder,
    ) -> std::result::Result<(), std::fmt::Error> {
        encoder.write_str(self.as_str())
    }
}

/// Storage adapter operation.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum StorageOperation {
    UploadGrant,
    Head,
    Delete,
    List,
    DownloadGrant,
    Download,
    UpdateMetadata,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::UploadGrant => "upload_grant",
            StorageOperation::Head => "head",
            StorageOperation::Delete => "delete",
            StorageOperation::List => "list",
            StorageOperation::DownloadGrant => "download_grant",
            StorageOperation::Download => "download",
            StorageOperation::UpdateMetadata => "update_metadata",
        }
    }
}

impl EncodeLabelValue for StorageOperation {
    fn encode(
        &self,
        encoder: &mut prometheus_client::encoding::LabelValueEncoder,
    ) -> std::result::Result<(), std::fmt::Error> {
        encoder.write_str(self.as_str())
    }
}

/// Error type classification for metrics.
///
/// - not_found: object or advertisement absent
/// - expired: freshest advertisement already lapsed
/// - missing_metadata: ingested object lacks a bound field
/// - signature: grant signature or policy rejected
/// - transient: throttling, 5xx, connection failures
/// - registration: downstream registration failed
/// - queue: notification channel unreachable
/// - lookup: advertisement lookup failed
/// - invalid: bad input or undecodable payload
/// - config: misconfiguration
/// - unknown: unclassified
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ErrorType {
    NotFound,
    Expired,
    MissingMetadata,
    Signature,
    Transient,
    Registration,
    Queue,
    Lookup,
    Invalid,
    Config,
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::NotFound => "not_found",
            ErrorType::Expired => "expired",
            ErrorType::MissingMetadata => "missing_metadata",
            ErrorType::Signature => "signature",
            ErrorType::Transient => "transient",
            ErrorType::Registration => "registration",
            ErrorType::Queue => "queue",
            ErrorType::Lookup => "lookup",
            ErrorType::Invalid => "invalid",
            ErrorType::Config => "config",
            ErrorType::Unknown => "unknown",
        }
    }

    /// Classify an error into an ErrorType.
    pub fn from_error(error: &crate::Error) -> Self {
        match error {
            crate::Error::Storage(storage_err) => Self::classify_storage_error(storage_err),
            crate::Error::NoAdvertisementFound { .. } => ErrorType::NotFound,
            crate::Error::AdvertisementExpired { .. } => ErrorType::Expired,
            crate::Error::MissingBoundMetadata { .. } => ErrorType::MissingMetadata,
            crate::Error::InvalidRequest(_) | crate::Error::Serialization(_) => ErrorType::Invalid,
            crate::Error::Registration(_) => ErrorType::Registration,
            crate::Error::Queue(_) => ErrorType::Queue,
            crate::Error::Lookup(_) => ErrorType::Lookup,
            crate::Error::Config(_) => ErrorType::Config,
            crate::Error::Io(_) => ErrorType::Transient,
        }
    }

    fn classify_storage_error(error: &StorageError) -> Self {
        match error {
            StorageError::NotFound(_) => ErrorType::NotFound,
            StorageError::SignatureOrPolicyRejected(_) => ErrorType::Signature,
            StorageError::Transient(_) => ErrorType::Transient,
            StorageError::Unsupported { .. } => ErrorType::Config,
            StorageError::Backend(msg) => {
                let lower = msg.to_lowercase();
                if lower.contains("timeout") || lower.contains("timed out") {
                    ErrorType::Transient
                } else {
                    ErrorType::Unknown
                }
            }
        }
    }
}

impl EncodeLabelValue for ErrorType {
    fn encode(
        &self,
        encoder: &mut prometheus_client::encoding::LabelValueEncoder,
    ) -> std::result::Result<(), std::fmt::Error> {
        encoder.write_str(self.as_str())
    }
}
