//! Change-notification channel port.
//!
//! Messages are delivered at least once. A message stays invisible for the
//! visibility timeout after each receive and is redelivered unless deleted.

use async_trait::async_trait;
use chrono::Utc;
use object_store::aws::{AmazonS3Builder, AwsCredentialProvider};
use object_store::CredentialProvider;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::debug;
use url::Url;

use crate::signing::{sha256_hex, Signer, SigningCredentials, SigningScheme};
use crate::{Error, Result};

/// One received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,
    /// Handle used to acknowledge this particular delivery
    pub receipt_handle: String,
    pub body: String,
}

/// Source of change notifications
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Long-poll for up to `max_messages`, waiting at most `wait`.
    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<QueueMessage>>;

    /// Acknowledge a delivery so it is never redelivered.
    async fn delete(&self, receipt_handle: &str) -> Result<()>;
}

/// SQS queue configuration
#[derive(Debug, Clone)]
pub struct SqsConfig {
    pub queue_url: String,
    pub region: String,
    /// Override of the API endpoint (LocalStack, VPC endpoints)
    pub endpoint: Option<String>,
    /// Static keys; when unset the AWS provider chain is used
    /// (environment, web identity, ECS task role, instance metadata).
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

/// Amazon SQS over its JSON protocol
pub struct SqsQueue {
    queue_url: String,
    endpoint: Url,
    client: reqwest::Client,
    signer: Signer,
    credentials: AwsCredentialProvider,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ReceiveMessageRequest<'a> {
    queue_url: &'a str,
    max_number_of_messages: usize,
    wait_time_seconds: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DeleteMessageRequest<'a> {
    queue_url: &'a str,
    receipt_handle: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReceiveMessageResponse {
    #[serde(default)]
    messages: Vec<SqsMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SqsMessage {
    message_id: String,
    receipt_handle: String,
    body: String,
}

/// SQS caps a single receive at ten messages and twenty seconds
const SQS_MAX_MESSAGES: usize = 10;
const SQS_MAX_WAIT_SECS: u64 = 20;

/// Resolve the credential provider for `config`.
///
/// Built through `AmazonS3Builder` so SQS shares the S3 backend's provider
/// chain and refresh behavior. The builder insists on a bucket name, which
/// is never used.
fn credential_provider(config: &SqsConfig) -> Result<AwsCredentialProvider> {
    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name("sqs-credentials")
        .with_region(&config.region);
    if let Some(key) = &config.access_key_id {
        builder = builder.with_access_key_id(key);
    }
    if let Some(secret) = &config.secret_access_key {
        builder = builder.with_secret_access_key(secret);
    }
    if let Some(token) = &config.session_token {
        builder = builder.with_token(token);
    }
    let store = builder
        .build()
        .map_err(|e| Error::Config(format!("Failed to resolve SQS credentials: {}", e)))?;
    Ok(store.credentials().clone())
}

impl SqsQueue {
    pub fn new(config: SqsConfig) -> Result<Self> {
        let credentials = credential_provider(&config)?;
        Self::with_credential_provider(config, credentials)
    }

    /// Use an explicit provider; it is asked for credentials on every request.
    pub fn with_credential_provider(
        config: SqsConfig,
        credentials: AwsCredentialProvider,
    ) -> Result<Self> {
        let endpoint = match &config.endpoint {
            Some(endpoint) => Url::parse(endpoint),
            None => Url::parse(&config.queue_url).map(|mut url| {
                url.set_path("/");
                url.set_query(None);
                url
            }),
        }
        .map_err(|e| Error::Config(format!("Invalid SQS endpoint: {}", e)))?;

        // Long polls must not be cut short by the client timeout
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(SQS_MAX_WAIT_SECS + 10))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            queue_url: config.queue_url,
            endpoint,
            client,
            signer: Signer::new(SigningScheme::Aws, config.region, "sqs"),
            credentials,
        })
    }

    async fn signing_credentials(&self) -> Result<SigningCredentials> {
        let credential = self
            .credentials
            .get_credential()
            .await
            .map_err(|e| Error::Queue(format!("Failed to load SQS credentials: {}", e)))?;
        Ok(
            SigningCredentials::new(credential.key_id.clone(), credential.secret_key.clone())
                .with_session_token(credential.token.clone()),
        )
    }

    /// Build a signed request for one SQS action.
    async fn signed_request<T: Serialize + Sync>(
        &self,
        action: &str,
        payload: &T,
    ) -> Result<reqwest::Request> {
        let credentials = self.signing_credentials().await?;
        let body = serde_json::to_string(payload)?;
        let now = Utc::now();
        let payload_hash = sha256_hex(body.as_bytes());

        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/x-amz-json-1.0".to_string(),
        );
        headers.insert("x-amz-date".to_string(), self.signer.scope(now).timestamp);
        headers.insert("x-amz-target".to_string(), format!("AmazonSQS.{}", action));
        if let Some(token) = &credentials.session_token {
            headers.insert("x-amz-security-token".to_string(), token.clone());
        }

        let authorization = self.signer.authorization_header(
            &credentials,
            "POST",
            &self.endpoint,
            &headers,
            &payload_hash,
            now,
        )?;

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header("authorization", authorization);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
            .body(body)
            .build()
            .map_err(|e| Error::Queue(format!("SQS {} request invalid: {}", action, e)))
    }

    async fn call<T: Serialize + Sync>(&self, action: &str, payload: &T) -> Result<String> {
        let request = self.signed_request(action, payload).await?;
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| Error::Queue(format!("SQS {} failed: {}", action, e)))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Queue(format!("SQS {} response unreadable: {}", action, e)))?;

        if !status.is_success() {
            return Err(Error::Queue(format!(
                "SQS {} returned {}: {}",
                action, status, text
            )));
        }
        Ok(text)
    }
}

#[async_trait]
impl NotificationQueue for SqsQueue {
    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<QueueMessage>> {
        let request = ReceiveMessageRequest {
            queue_url: &self.queue_url,
            max_number_of_messages: max_messages.clamp(1, SQS_MAX_MESSAGES),
            wait_time_seconds: wait.as_secs().min(SQS_MAX_WAIT_SECS),
        };
        let text = self.call("ReceiveMessage", &request).await?;
        let response: ReceiveMessageResponse = serde_json::from_str(&text)?;
        debug!("SQS RECEIVE: {} messages", response.messages.len());

        Ok(response
            .messages
            .into_iter()
            .map(|m| QueueMessage {
                message_id: m.message_id,
                receipt_handle: m.receipt_handle,
                body: m.body,
            })
            .collect())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        let request = DeleteMessageRequest {
            queue_url: &self.queue_url,
            receipt_handle,
        };
        self.call("DeleteMessage", &request).await?;
        debug!("SQS DELETE: {}", receipt_handle);
        Ok(())
    }
}

struct StoredMessage {
    id: String,
    body: String,
    receive_count: u32,
    visible_at: Instant,
    receipt_handle: Option<String>,
}

/// In-memory queue with visibility-timeout redelivery (for testing)
pub struct MemoryQueue {
    messages: Mutex<VecDeque<StoredMessage>>,
    visibility_timeout: Duration,
    next_id: Mutex<u64>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            visibility_timeout,
            next_id: Mutex::new(0),
            notify: Notify::new(),
        }
    }

    /// Enqueue a body, returning its message id.
    pub fn send(&self, body: impl Into<String>) -> String {
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            format!("msg-{}", *next)
        };
        self.messages.lock().push_back(StoredMessage {
            id: id.clone(),
            body: body.into(),
            receive_count: 0,
            visible_at: Instant::now(),
            receipt_handle: None,
        });
        self.notify.notify_waiters();
        id
    }

    /// Messages not yet deleted, visible or not.
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// How many times the message has been delivered.
    pub fn receive_count(&self, message_id: &str) -> Option<u32> {
        self.messages
            .lock()
            .iter()
            .find(|m| m.id == message_id)
            .map(|m| m.receive_count)
    }

    /// End every in-flight visibility window now, as if the timeout elapsed.
    pub fn expire_visibility(&self) {
        let now = Instant::now();
        for message in self.messages.lock().iter_mut() {
            message.visible_at = now;
        }
        self.notify.notify_waiters();
    }

    fn take_visible(&self, max_messages: usize) -> Vec<QueueMessage> {
        let now = Instant::now();
        let mut messages = self.messages.lock();
        messages
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .take(max_messages.max(1))
            .map(|m| {
                m.receive_count += 1;
                m.visible_at = now + self.visibility_timeout;
                let receipt = format!("{}#{}", m.id, m.receive_count);
                m.receipt_handle = Some(receipt.clone());
                QueueMessage {
                    message_id: m.id.clone(),
                    receipt_handle: receipt,
                    body: m.body.clone(),
                }
            })
            .collect()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl NotificationQueue for MemoryQueue {
    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<QueueMessage>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            let batch = self.take_visible(max_messages);
            if !batch.is_empty() {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        let mut messages = self.messages.lock();
        let position = messages
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| {
                Error::Queue(format!("Receipt handle is not valid: {}", receipt_handle))
            })?;
        messages.remove(position);
        Ok(())
    }
}
