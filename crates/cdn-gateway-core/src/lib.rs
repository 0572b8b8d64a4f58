//! CDN Gateway Core Library
//!
//! This crate provides provider-agnostic upload grants, content-pointer
//! resolution and change-notification ingestion for objects stored in
//! S3 or GCS content-delivery buckets.

pub mod advertisement;
pub mod clock;
pub mod config;
pub mod error;
pub mod grant;
pub mod health;
pub mod ingest;
pub mod metrics;
pub mod mutator;
pub mod pointer;
pub mod signing;
pub mod storage;

pub use advertisement::{
    Advertisement, AdvertisementResolver, AdvertisementStore, ResolveRequest, ResolvedObject,
};
pub use clock::{system_clock, Clock, FixedClock, SharedClock, SystemClock};
pub use config::{GatewayConfig, IngestOptions};
pub use error::{Error, Result, StorageError};
pub use grant::UploadGrantIssuer;
pub use health::{HealthCheck, HealthStatus};
pub use ingest::{IngestPipeline, MessageOutcome};
pub use metrics::{GatewayMetrics, MetricsServer, MetricsServerConfig};
pub use pointer::ContentPointer;
pub use storage::{create_backend, StorageBackend, StorageBackendConfig, UploadGrant};
