//! Metrics collection and exposure.
//!
//! - [`labels`] - Label types for Prometheus metrics dimensions
//! - [`registry`] - The `GatewayMetrics` registry
//! - [`instrumented_storage`] - Storage backend decorator recording latency and errors
//! - [`server`] - HTTP server for `/metrics` and `/health`
//!
//! ```rust,ignore
//! use cdn_gateway_core::metrics::{GatewayMetrics, MetricsServer, MetricsServerConfig};
//!
//! let metrics = Arc::new(GatewayMetrics::new());
//! let server = MetricsServer::new(MetricsServerConfig::default(), metrics.clone());
//! // server.run(shutdown_rx).await?;
//! ```

pub mod instrumented_storage;
pub mod labels;
pub mod registry;
pub mod server;

pub use instrumented_storage::{create_instrumented_backend, InstrumentedStorageBackend};
pub use labels::{
    ErrorType, IgnoreReason, IgnoredEventLabels, IngestErrorLabels, StorageErrorLabels,
    StorageLabels, StorageOperation,
};
pub use registry::GatewayMetrics;
pub use server::{MetricsServer, MetricsServerConfig};
