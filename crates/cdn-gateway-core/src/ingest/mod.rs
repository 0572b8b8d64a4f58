//! Change-notification ingestion.
//!
//! - [`notification`] - S3 event notification parsing
//! - [`queue`] - The notification channel port (SQS, in-memory)
//! - [`registration`] - The downstream registration port (HTTP, recording)
//! - [`pipeline`] - The poll/process loop tying them together

pub mod notification;
pub mod pipeline;
pub mod queue;
pub mod registration;

pub use notification::{decode_object_key, parse_notification, ChangeEvent, Notification};
pub use pipeline::{IngestPipeline, MessageOutcome};
pub use queue::{MemoryQueue, NotificationQueue, QueueMessage, SqsConfig, SqsQueue};
pub use registration::{HttpRegistrar, RecordingRegistrar, Registrar, Registration};
