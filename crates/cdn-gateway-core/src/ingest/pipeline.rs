//! Change-notification ingestion loop.
//!
//! Each message is parsed into change events; every managed, freshly created
//! object is hashed and registered downstream. A message is deleted from the
//! channel only once all of its events succeeded, so failures are retried
//! through the channel's visibility timeout rather than in process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, warn};

use super::notification::{parse_notification, ChangeEvent, Notification};
use super::queue::{NotificationQueue, QueueMessage};
use super::registration::{Registrar, Registration};
use crate::clock::SharedClock;
use crate::config::IngestOptions;
use crate::error::StorageError;
use crate::health::{HealthCheck, COMPONENT_NOTIFICATIONS, COMPONENT_REGISTRATION, COMPONENT_STORAGE};
use crate::metrics::{ErrorType, GatewayMetrics, IgnoreReason};
use crate::pointer::hash_stream;
use crate::storage::{
    is_managed_key, object_identifier_from_key, StorageBackend, META_UPLOADER_IDENTITY_KEY,
};
use crate::{Error, Result};

/// What happened to one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Every event succeeded and the message was deleted
    Acknowledged { registered: usize, ignored: usize },
    /// At least one event failed; the message stays for redelivery
    Retained { failed: usize },
}

impl MessageOutcome {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, MessageOutcome::Acknowledged { .. })
    }
}

enum EventOutcome {
    Registered(Registration),
    Ignored(IgnoreReason),
}

/// Shared state handed to every message task
#[derive(Clone)]
struct IngestContext {
    queue: Arc<dyn NotificationQueue>,
    backend: Arc<dyn StorageBackend>,
    registrar: Arc<dyn Registrar>,
    clock: SharedClock,
    metrics: Arc<GatewayMetrics>,
    health: Arc<HealthCheck>,
    options: IngestOptions,
}

/// Long-running ingestion actor
pub struct IngestPipeline {
    ctx: Arc<IngestContext>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_requested: AtomicBool,
}

impl IngestPipeline {
    pub fn new(
        queue: Arc<dyn NotificationQueue>,
        backend: Arc<dyn StorageBackend>,
        registrar: Arc<dyn Registrar>,
        clock: SharedClock,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            ctx: Arc::new(IngestContext {
                queue,
                backend,
                registrar,
                clock,
                metrics: Arc::new(GatewayMetrics::new()),
                health: Arc::new(HealthCheck::for_ingest()),
                options: IngestOptions::default(),
            }),
            shutdown_tx,
            shutdown_requested: AtomicBool::new(false),
        }
    }

    fn ctx_mut(&mut self) -> &mut IngestContext {
        Arc::make_mut(&mut self.ctx)
    }

    pub fn with_options(mut self, options: IngestOptions) -> Self {
        self.ctx_mut().options = options;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.ctx_mut().metrics = metrics;
        self
    }

    pub fn with_health(mut self, health: Arc<HealthCheck>) -> Self {
        self.ctx_mut().health = health;
        self
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown; in-flight messages finish but the loop stops polling.
    pub fn shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.ctx.metrics)
    }

    pub fn health(&self) -> Arc<HealthCheck> {
        Arc::clone(&self.ctx.health)
    }

    /// Handle one message: process every event, then delete the message if
    /// all of them succeeded.
    pub async fn process_message(&self, message: &QueueMessage) -> Result<MessageOutcome> {
        self.ctx.process_message(message).await
    }

    /// Poll and process until shutdown, or until the channel has been
    /// unreachable for `max_consecutive_poll_failures` receives in a row.
    pub async fn run(&self) -> Result<()> {
        let options = &self.ctx.options;
        let mut shutdown_rx = self.shutdown_receiver();
        let semaphore = Arc::new(Semaphore::new(options.max_concurrent_messages));
        let mut consecutive_failures = 0u32;

        info!(
            "Ingestion pipeline starting with batch_size={}, wait_time_secs={}, max_concurrent_messages={}",
            options.batch_size, options.wait_time_secs, options.max_concurrent_messages
        );

        loop {
            if self.shutdown_requested.load(Ordering::SeqCst) || shutdown_rx.try_recv().is_ok() {
                info!("Shutdown signal received, stopping ingestion");
                break;
            }

            let poll_start = Instant::now();
            let received = tokio::select! {
                result = self.ctx.queue.receive(options.batch_size, options.wait_time()) => result,
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping ingestion");
                    break;
                }
            };
            self.ctx
                .metrics
                .record_poll_latency(poll_start.elapsed().as_secs_f64());

            let messages = match received {
                Ok(messages) => {
                    if consecutive_failures > 0 {
                        info!(
                            "Notification channel reachable again after {} failures",
                            consecutive_failures
                        );
                    }
                    consecutive_failures = 0;
                    self.ctx.health.mark_healthy(COMPONENT_NOTIFICATIONS);
                    messages
                }
                Err(e) => {
                    consecutive_failures += 1;
                    self.ctx
                        .health
                        .mark_unhealthy(COMPONENT_NOTIFICATIONS, &e.to_string());
                    if consecutive_failures >= options.max_consecutive_poll_failures {
                        error!(
                            "Notification channel unreachable after {} attempts: {}",
                            consecutive_failures, e
                        );
                        return Err(e);
                    }

                    let delay = options.poll_backoff(consecutive_failures);
                    warn!(
                        "Receive failed (attempt {}), retrying in {:?}: {}",
                        consecutive_failures, delay, e
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_rx.recv() => {
                            info!("Shutdown signal received, stopping ingestion");
                            break;
                        }
                    }
                    continue;
                }
            };

            if messages.is_empty() {
                continue;
            }

            debug!("Received {} messages", messages.len());
            self.ctx.metrics.inc_messages_received(messages.len() as u64);

            let mut handles = Vec::with_capacity(messages.len());
            for message in messages {
                let permit = Arc::clone(&semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Queue(format!("Message semaphore closed: {}", e)))?;
                let ctx = Arc::clone(&self.ctx);

                handles.push(tokio::spawn(async move {
                    let result = ctx.process_message(&message).await;
                    drop(permit);
                    (message.message_id, result)
                }));
            }

            for result in futures::future::join_all(handles).await {
                match result {
                    Ok((id, Ok(outcome))) => {
                        debug!("Message {} finished: {:?}", id, outcome);
                    }
                    Ok((id, Err(e))) => {
                        error!("Message {} failed: {}", id, e);
                        self.ctx.metrics.record_ingest_failure(&e);
                    }
                    Err(e) => {
                        error!("Message task join error: {}", e);
                        self.ctx.metrics.inc_ingest_failure(ErrorType::Unknown);
                    }
                }
            }
        }

        info!("Ingestion pipeline stopped");
        Ok(())
    }
}

impl IngestContext {
    async fn process_message(&self, message: &QueueMessage) -> Result<MessageOutcome> {
        self.health.message_started();
        self.metrics.in_flight_messages.inc();

        let result = self.handle_message(message).await;

        self.metrics.in_flight_messages.dec();
        let acknowledged = matches!(&result, Ok(outcome) if outcome.is_acknowledged());
        self.health.message_finished(acknowledged);
        if acknowledged {
            self.metrics.inc_messages_acknowledged();
        }
        result
    }

    async fn handle_message(&self, message: &QueueMessage) -> Result<MessageOutcome> {
        let events = match parse_notification(&message.body) {
            Ok(Notification::Test) => {
                debug!("Message {} is a test event", message.message_id);
                self.metrics.inc_event_ignored(IgnoreReason::TestEvent);
                self.queue.delete(&message.receipt_handle).await?;
                return Ok(MessageOutcome::Acknowledged {
                    registered: 0,
                    ignored: 1,
                });
            }
            Ok(Notification::Events(events)) => events,
            Err(e) => {
                warn!(
                    "Leaving unparseable message {} for redelivery: {}",
                    message.message_id, e
                );
                self.metrics.record_ingest_failure(&e);
                return Ok(MessageOutcome::Retained { failed: 1 });
            }
        };

        let mut registered = 0;
        let mut ignored = 0;
        let mut failed = 0;

        for event in &events {
            match self.process_event(event).await {
                Ok(EventOutcome::Registered(registration)) => {
                    info!(
                        "Registered {} as {} ({} bytes, expires {})",
                        event.key,
                        registration.pointer,
                        registration.file_size,
                        registration.expiry_time
                    );
                    registered += 1;
                }
                Ok(EventOutcome::Ignored(reason)) => {
                    debug!("Ignoring {} on {}: {}", event.event_name, event.key, reason.as_str());
                    self.metrics.inc_event_ignored(reason);
                    ignored += 1;
                }
                Err(e) => {
                    self.report_event_failure(event, &e);
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Ok(MessageOutcome::Retained { failed });
        }

        self.queue.delete(&message.receipt_handle).await?;
        Ok(MessageOutcome::Acknowledged {
            registered,
            ignored,
        })
    }

    async fn process_event(&self, event: &ChangeEvent) -> Result<EventOutcome> {
        if !event.is_create() {
            return Ok(EventOutcome::Ignored(IgnoreReason::NotCreate));
        }
        if !is_managed_key(&event.key) {
            return Ok(EventOutcome::Ignored(IgnoreReason::Unmanaged));
        }

        let metadata = self.backend.head(&event.key).await?;
        let uploader_identity_key = metadata
            .uploader_identity_key()
            .ok_or_else(|| Error::MissingBoundMetadata {
                key: event.key.clone(),
                field: META_UPLOADER_IDENTITY_KEY.to_string(),
            })?
            .to_string();

        let expiry = match metadata.custom_time() {
            Some(expiry) => expiry,
            None => {
                debug!(
                    "{} has no customtime, expiring in {} days",
                    event.key, self.options.fallback_expiry_days
                );
                chrono::Duration::try_days(self.options.fallback_expiry_days)
                    .and_then(|d| self.clock.now().checked_add_signed(d))
                    .ok_or_else(|| {
                        Error::Config(format!(
                            "fallback expiry of {} days is out of range",
                            self.options.fallback_expiry_days
                        ))
                    })?
            }
        };

        let (pointer, bytes) = hash_stream(self.backend.download(&event.key).await?).await?;
        self.metrics.inc_bytes_hashed(bytes);
        self.health.mark_healthy(COMPONENT_STORAGE);

        let object_identifier = object_identifier_from_key(&event.key).ok_or_else(|| {
            Error::InvalidRequest(format!("Key has no object identifier: {}", event.key))
        })?;

        let registration = Registration {
            pointer: pointer.to_string(),
            uploader_identity_key,
            object_identifier: object_identifier.to_string(),
            expiry_time: expiry.timestamp(),
            file_size: bytes,
        };

        self.registrar.register(&registration).await?;
        self.health.mark_healthy(COMPONENT_REGISTRATION);
        self.health.record_registration();
        self.metrics.inc_objects_registered();

        Ok(EventOutcome::Registered(registration))
    }

    fn report_event_failure(&self, event: &ChangeEvent, err: &Error) {
        self.metrics.record_ingest_failure(err);

        match err {
            Error::MissingBoundMetadata { .. } => {
                error!("Rejecting {}: {}", event.key, err);
            }
            Error::Storage(StorageError::NotFound(_)) => {
                warn!("{} vanished before ingestion: {}", event.key, err);
            }
            Error::Storage(_) => {
                warn!("Storage failure on {}: {}", event.key, err);
                if err.is_retryable() {
                    self.health.mark_degraded(COMPONENT_STORAGE, &err.to_string());
                }
            }
            Error::Registration(_) => {
                warn!("Registration failed for {}: {}", event.key, err);
                self.health
                    .mark_degraded(COMPONENT_REGISTRATION, &err.to_string());
            }
            _ => {
                warn!("Failed to ingest {}: {}", event.key, err);
            }
        }
    }
}
