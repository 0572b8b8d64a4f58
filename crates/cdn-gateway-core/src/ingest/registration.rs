//! Downstream advertisement registration port.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::{Error, Result};

/// What gets advertised for one ingested object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub pointer: String,
    pub uploader_identity_key: String,
    pub object_identifier: String,
    /// Seconds since the epoch
    pub expiry_time: i64,
    pub file_size: u64,
}

/// Receiver of registrations. Implementations must tolerate repeats of the
/// same registration.
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn register(&self, registration: &Registration) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationRequest<'a> {
    admin_token: &'a str,
    #[serde(flatten)]
    registration: &'a Registration,
}

/// Registrar calling an HTTP endpoint authenticated by an admin token
pub struct HttpRegistrar {
    endpoint: String,
    admin_token: String,
    client: reqwest::Client,
}

impl HttpRegistrar {
    pub fn new(
        endpoint: impl Into<String>,
        admin_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.into(),
            admin_token: admin_token.into(),
            client,
        })
    }
}

#[async_trait]
impl Registrar for HttpRegistrar {
    async fn register(&self, registration: &Registration) -> Result<()> {
        debug!(
            "Registering {} for {}",
            registration.pointer, registration.object_identifier
        );

        let body = RegistrationRequest {
            admin_token: &self.admin_token,
            registration,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Registration(format!("Failed to reach registrar: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Registration(format!(
                "Registrar returned {}: {}",
                status, text
            )));
        }
        Ok(())
    }
}

/// Registrar that keeps registrations in memory, keyed by
/// (pointer, object identifier) so repeats overwrite (for testing)
#[derive(Default)]
pub struct RecordingRegistrar {
    records: RwLock<BTreeMap<(String, String), Registration>>,
    calls: AtomicUsize,
    failures_remaining: AtomicUsize,
}

impl RecordingRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls with a retryable error.
    pub fn fail_next(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    pub fn registrations(&self) -> Vec<Registration> {
        self.records.read().values().cloned().collect()
    }

    pub fn get(&self, pointer: &str, object_identifier: &str) -> Option<Registration> {
        self.records
            .read()
            .get(&(pointer.to_string(), object_identifier.to_string()))
            .cloned()
    }

    /// Total calls, including repeats and failures
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Registrar for RecordingRegistrar {
    async fn register(&self, registration: &Registration) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Registration("injected failure".to_string()));
        }

        self.records.write().insert(
            (
                registration.pointer.clone(),
                registration.object_identifier.clone(),
            ),
            registration.clone(),
        );
        Ok(())
    }
}
