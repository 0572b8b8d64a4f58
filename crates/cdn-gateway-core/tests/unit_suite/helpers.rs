//! Test helper utilities.
//!
//! Provides the in-memory wiring and notification bodies shared across
//! unit tests.

use std::sync::Arc;
use std::time::Duration;

use cdn_gateway_core::clock::FixedClock;
use cdn_gateway_core::grant::UploadGrantIssuer;
use cdn_gateway_core::ingest::{
    IngestPipeline, MemoryQueue, NotificationQueue, QueueMessage, RecordingRegistrar,
};
use cdn_gateway_core::storage::{
    CapabilityProfile, GrantStrategy, MemoryBackend, MetadataUpdateMode, UploadAttempt,
    UploadGrant,
};
use cdn_gateway_core::IngestOptions;

/// Fixed "now" for every test: 2023-11-14T22:13:20Z
pub const T0: i64 = 1_700_000_000;

pub const OWNER: &str = "03f1c3a1b2d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f";

pub fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::at_secs(T0))
}

/// Memory backend on the shared clock with the given capability profile
pub fn memory_backend(
    clock: &Arc<FixedClock>,
    metadata_update: MetadataUpdateMode,
    grant_strategy: GrantStrategy,
) -> Arc<MemoryBackend> {
    Arc::new(
        MemoryBackend::with_capabilities(CapabilityProfile {
            metadata_update,
            grant_strategy,
        })
        .with_clock(clock.clone()),
    )
}

/// S3 event notification body with one record per `(event_name, raw_key)`
pub fn notification_body(events: &[(&str, &str)]) -> String {
    let records: Vec<serde_json::Value> = events
        .iter()
        .map(|(event_name, key)| {
            serde_json::json!({
                "eventVersion": "2.1",
                "eventSource": "aws:s3",
                "awsRegion": "us-east-1",
                "eventName": event_name,
                "s3": {
                    "s3SchemaVersion": "1.0",
                    "bucket": { "name": "cdn-bucket" },
                    "object": { "key": key }
                }
            })
        })
        .collect();
    serde_json::json!({ "Records": records }).to_string()
}

/// Notification for a single object creation
pub fn created(key: &str) -> String {
    notification_body(&[("ObjectCreated:Put", key)])
}

/// Everything the ingestion pipeline talks to, all in memory
pub struct IngestHarness {
    pub clock: Arc<FixedClock>,
    pub backend: Arc<MemoryBackend>,
    pub queue: Arc<MemoryQueue>,
    pub registrar: Arc<RecordingRegistrar>,
    pub pipeline: Arc<IngestPipeline>,
}

impl IngestHarness {
    pub fn new() -> Self {
        let clock = fixed_clock();
        let backend = memory_backend(
            &clock,
            MetadataUpdateMode::CopyReplace,
            GrantStrategy::SignedHeaders,
        );
        let queue = Arc::new(MemoryQueue::new(Duration::from_secs(30)));
        let registrar = Arc::new(RecordingRegistrar::new());

        let pipeline = IngestPipeline::new(
            queue.clone(),
            backend.clone(),
            registrar.clone(),
            clock.clone(),
        )
        .with_options(IngestOptions {
            wait_time_secs: 1,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 5,
            ..Default::default()
        });

        Self {
            clock,
            backend,
            queue,
            registrar,
            pipeline: Arc::new(pipeline),
        }
    }

    /// Upload `body` as `cdn/{object_identifier}` through a real grant.
    pub async fn upload(
        &self,
        object_identifier: &str,
        body: &[u8],
        retention_minutes: u64,
    ) -> UploadGrant {
        let issuer = UploadGrantIssuer::new(self.backend.clone(), self.clock.clone());
        let grant = issuer
            .issue(body.len() as u64, retention_minutes, object_identifier, OWNER)
            .await
            .unwrap();
        self.backend
            .accept_upload(&grant, UploadAttempt::from_grant(&grant, body.to_vec()))
            .await
            .unwrap();
        grant
    }

    /// Take every visible message off the queue without waiting.
    pub async fn receive_all(&self) -> Vec<QueueMessage> {
        self.queue.receive(10, Duration::ZERO).await.unwrap()
    }
}

impl Default for IngestHarness {
    fn default() -> Self {
        Self::new()
    }
}
