//! Prometheus metrics registry for the gateway.

use parking_lot::RwLock;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use std::time::Instant;

use super::labels::{
    ErrorType, IgnoreReason, IgnoredEventLabels, IngestErrorLabels, StorageErrorLabels,
    StorageLabels, StorageOperation,
};

/// Storage latency histogram buckets (in seconds).
/// Covers typical cloud storage latencies: 10ms to 10s.
const STORAGE_LATENCY_BUCKETS: [f64; 9] = [0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Poll latency buckets (in seconds); long polls run up to 20s.
const POLL_LATENCY_BUCKETS: [f64; 8] = [0.05, 0.25, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0];

/// Prometheus metrics for storage adapters and the ingestion pipeline.
pub struct GatewayMetrics {
    registry: RwLock<Registry>,

    // ========================================
    // Storage Adapter Metrics
    // ========================================
    /// Storage operation latency (by backend and operation).
    pub storage_latency_seconds: Family<StorageLabels, Histogram>,

    /// Storage operation errors by type.
    pub storage_errors_total: Family<StorageErrorLabels, Counter>,

    // ========================================
    // Ingestion Metrics
    // ========================================
    /// Notifications received from the channel.
    pub messages_received_total: Counter,

    /// Notifications acknowledged after every event succeeded.
    pub messages_acknowledged_total: Counter,

    /// Objects registered downstream.
    pub objects_registered_total: Counter,

    /// Events that needed no registration.
    pub events_ignored_total: Family<IgnoredEventLabels, Counter>,

    /// Per-event failures by type.
    pub ingest_failures_total: Family<IngestErrorLabels, Counter>,

    /// Objects lacking a bound metadata field.
    pub missing_bound_metadata_total: Counter,

    /// Object bytes streamed through the content hasher.
    pub bytes_hashed_total: Counter,

    /// Messages currently in flight.
    pub in_flight_messages: Gauge,

    /// Time spent in one channel receive.
    pub poll_latency_seconds: Histogram,

    start_time: Instant,
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let storage_latency_seconds =
            Family::<StorageLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(STORAGE_LATENCY_BUCKETS.iter().cloned())
            });
        let storage_errors_total = Family::<StorageErrorLabels, Counter>::default();

        let messages_received_total = Counter::default();
        let messages_acknowledged_total = Counter::default();
        let objects_registered_total = Counter::default();
        let events_ignored_total = Family::<IgnoredEventLabels, Counter>::default();
        let ingest_failures_total = Family::<IngestErrorLabels, Counter>::default();
        let missing_bound_metadata_total = Counter::default();
        let bytes_hashed_total = Counter::default();
        let in_flight_messages = Gauge::default();
        let poll_latency_seconds = Histogram::new(POLL_LATENCY_BUCKETS.iter().cloned());

        // Storage Adapter Metrics
        registry.register(
            "cdn_gateway_storage_latency_seconds",
            "Storage adapter operation latency",
            storage_latency_seconds.clone(),
        );
        registry.register(
            "cdn_gateway_storage_errors",
            "Storage adapter errors by type",
            storage_errors_total.clone(),
        );

        // Ingestion Metrics
        registry.register(
            "cdn_gateway_messages_received",
            "Change notifications received",
            messages_received_total.clone(),
        );
        registry.register(
            "cdn_gateway_messages_acknowledged",
            "Change notifications acknowledged",
            messages_acknowledged_total.clone(),
        );
        registry.register(
            "cdn_gateway_objects_registered",
            "Objects registered downstream",
            objects_registered_total.clone(),
        );
        registry.register(
            "cdn_gateway_events_ignored",
            "Notification events that required no registration",
            events_ignored_total.clone(),
        );
        registry.register(
            "cdn_gateway_ingest_failures",
            "Per-event ingestion failures by type",
            ingest_failures_total.clone(),
        );
        registry.register(
            "cdn_gateway_missing_bound_metadata",
            "Ingested objects missing a bound metadata field",
            missing_bound_metadata_total.clone(),
        );
        registry.register(
            "cdn_gateway_bytes_hashed",
            "Object bytes streamed through the content hasher",
            bytes_hashed_total.clone(),
        );
        registry.register(
            "cdn_gateway_in_flight_messages",
            "Messages currently being processed",
            in_flight_messages.clone(),
        );
        registry.register(
            "cdn_gateway_poll_latency_seconds",
            "Latency of one notification channel receive",
            poll_latency_seconds.clone(),
        );

        Self {
            registry: RwLock::new(registry),
            storage_latency_seconds,
            storage_errors_total,
            messages_received_total,
            messages_acknowledged_total,
            objects_registered_total,
            events_ignored_total,
            ingest_failures_total,
            missing_bound_metadata_total,
            bytes_hashed_total,
            in_flight_messages,
            poll_latency_seconds,
            start_time: Instant::now(),
        }
    }

    // ========================================
    // Storage Methods
    // ========================================

    pub fn record_storage_latency(
        &self,
        backend: &str,
        operation: StorageOperation,
        latency_secs: f64,
    ) {
        self.storage_latency_seconds
            .get_or_create(&StorageLabels::new(backend, operation))
            .observe(latency_secs);
    }

    pub fn inc_storage_error(
        &self,
        backend: &str,
        operation: StorageOperation,
        error_type: ErrorType,
    ) {
        self.storage_errors_total
            .get_or_create(&StorageErrorLabels::new(backend, operation, error_type))
            .inc();
    }

    // ========================================
    // Ingestion Methods
    // ========================================

    pub fn inc_messages_received(&self, count: u64) {
        self.messages_received_total.inc_by(count);
    }

    pub fn inc_messages_acknowledged(&self) {
        self.messages_acknowledged_total.inc();
    }

    pub fn inc_objects_registered(&self) {
        self.objects_registered_total.inc();
    }

    pub fn inc_event_ignored(&self, reason: IgnoreReason) {
        self.events_ignored_total
            .get_or_create(&IgnoredEventLabels { reason })
            .inc();
    }

    /// Count a failed event; missing bound metadata is also counted on its own.
    pub fn record_ingest_failure(&self, error: &crate::Error) {
        let error_type = ErrorType::from_error(error);
        if error_type == ErrorType::MissingMetadata {
            self.missing_bound_metadata_total.inc();
        }
        self.inc_ingest_failure(error_type);
    }

    pub fn inc_ingest_failure(&self, error_type: ErrorType) {
        self.ingest_failures_total
            .get_or_create(&IngestErrorLabels { error_type })
            .inc();
    }

    pub fn inc_bytes_hashed(&self, bytes: u64) {
        self.bytes_hashed_total.inc_by(bytes);
    }

    pub fn record_poll_latency(&self, latency_secs: f64) {
        self.poll_latency_seconds.observe(latency_secs);
    }

    // ========================================
    // Utility Methods
    // ========================================

    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Encode all metrics to Prometheus text format.
    pub fn encode(&self) -> String {
        let registry = self.registry.read();
        let mut buffer = String::new();
        if encode(&mut buffer, &registry).is_err() {
            return String::new();
        }
        buffer
    }
}
