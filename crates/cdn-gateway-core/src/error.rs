//! Error types for the CDN gateway core library.

use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gateway.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or inconsistent configuration (bucket, region, credentials, endpoints)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage adapter error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// No advertisement carried both an object identifier and an expiry tag
    #[error("No advertisement found for {pointer}")]
    NoAdvertisementFound { pointer: String },

    /// The freshest advertisement has already lapsed
    #[error("Advertisement for {pointer} expired at {expiry_secs}")]
    AdvertisementExpired { pointer: String, expiry_secs: i64 },

    /// An ingested object was not uploaded through a valid grant
    #[error("Object {key} is missing bound metadata field `{field}`")]
    MissingBoundMetadata { key: String, field: String },

    /// Rejected caller input (sizes, retention, identifiers)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The external registration endpoint refused or failed the call
    #[error("Registration error: {0}")]
    Registration(String),

    /// The change-notification channel could not be reached
    #[error("Notification queue error: {0}")]
    Queue(String),

    /// Advertisement lookup failure
    #[error("Advertisement lookup error: {0}")]
    Lookup(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage-specific errors, normalized across backends
#[derive(Error, Debug)]
pub enum StorageError {
    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Client-supplied headers or form fields did not match the issued grant
    #[error("Signature or policy rejected: {0}")]
    SignatureOrPolicyRejected(String),

    /// Network failure or throttling; safe to retry with backoff
    #[error("Transient backend error: {0}")]
    Transient(String),

    /// The backend cannot perform the requested operation
    #[error("Unsupported by {backend}: {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    /// Any other backend failure
    #[error("Backend error: {0}")]
    Backend(String),
}

impl Error {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Storage(StorageError::Transient(_)) => true,
            Error::Storage(StorageError::Backend(_)) => true,
            Error::Registration(_) | Error::Queue(_) | Error::Lookup(_) | Error::Io(_) => true,
            _ => false,
        }
    }

    /// Whether this error means the object was absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Storage(StorageError::NotFound(_)))
    }
}

impl StorageError {
    /// Map an `object_store` failure for `key` onto the common taxonomy.
    pub fn from_object_store(backend: &str, operation: &str, key: &str, err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { .. } => StorageError::NotFound(key.to_string()),
            // Retry-exhausted HTTP and connection failures surface as `Generic`
            object_store::Error::Generic { .. } => {
                StorageError::Transient(format!("{} {} failed: {}", backend, operation, err))
            }
            _ => StorageError::Backend(format!("{} {} failed: {}", backend, operation, err)),
        }
    }

    /// Classify an HTTP failure returned by a raw backend call.
    pub fn from_status(status: u16, body: &str, context: &str) -> Self {
        if status == 404 {
            return StorageError::NotFound(context.to_string());
        }
        if status == 403
            && (body.contains("SignatureDoesNotMatch")
                || body.contains("AccessDenied")
                || body.contains("InvalidPolicyDocument"))
        {
            return StorageError::SignatureOrPolicyRejected(format!("{}: {}", context, body));
        }
        if status == 429 || status >= 500 || body.contains("SlowDown") {
            return StorageError::Transient(format!("{} returned {}: {}", context, status, body));
        }
        StorageError::Backend(format!("{} returned {}: {}", context, status, body))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
