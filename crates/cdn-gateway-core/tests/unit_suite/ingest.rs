//! Ingestion pipeline tests.
//!
//! Tests for notification processing including:
//! - Registration of granted uploads
//! - Idempotence under duplicate delivery
//! - Acknowledgement rules for unmanaged keys, test events and failures
//! - The poll loop end to end

use std::time::Duration;

use cdn_gateway_core::ingest::MessageOutcome;
use cdn_gateway_core::storage::CustomMetadata;
use cdn_gateway_core::ContentPointer;

use super::helpers::{created, notification_body, IngestHarness, OWNER, T0};

#[tokio::test]
async fn test_granted_upload_is_registered() {
    let harness = IngestHarness::new();
    let body = b"an actual video, honestly";
    harness.upload("clip", body, 60).await;
    harness.queue.send(created("cdn/clip"));

    let messages = harness.receive_all().await;
    let outcome = harness.pipeline.process_message(&messages[0]).await.unwrap();

    assert_eq!(
        outcome,
        MessageOutcome::Acknowledged {
            registered: 1,
            ignored: 0
        }
    );
    assert!(harness.queue.is_empty());

    let pointer = ContentPointer::for_content(body).to_string();
    let registration = harness.registrar.get(&pointer, "clip").unwrap();
    assert_eq!(registration.uploader_identity_key, OWNER);
    assert_eq!(registration.expiry_time, T0 + 3900);
    assert_eq!(registration.file_size, body.len() as u64);

    let metrics = harness.pipeline.metrics();
    assert_eq!(metrics.objects_registered_total.get(), 1);
    assert_eq!(metrics.bytes_hashed_total.get(), body.len() as u64);
    assert_eq!(metrics.messages_acknowledged_total.get(), 1);
}

#[tokio::test]
async fn test_duplicate_notification_is_idempotent() {
    let harness = IngestHarness::new();
    harness.upload("clip", b"same bytes", 60).await;
    harness.queue.send(created("cdn/clip"));
    harness.queue.send(created("cdn/clip"));

    for message in harness.receive_all().await {
        let outcome = harness.pipeline.process_message(&message).await.unwrap();
        assert!(outcome.is_acknowledged());
    }

    assert_eq!(harness.registrar.calls(), 2);
    let registrations = harness.registrar.registrations();
    assert_eq!(registrations.len(), 1);
    assert_eq!(registrations[0].object_identifier, "clip");
}

#[tokio::test]
async fn test_unmanaged_key_is_acknowledged_without_registration() {
    let harness = IngestHarness::new();
    harness
        .backend
        .put_object("other/foo", &b"x"[..], &CustomMetadata::new(), None)
        .await
        .unwrap();
    harness.queue.send(created("other/foo"));

    let messages = harness.receive_all().await;
    let outcome = harness.pipeline.process_message(&messages[0]).await.unwrap();

    assert_eq!(
        outcome,
        MessageOutcome::Acknowledged {
            registered: 0,
            ignored: 1
        }
    );
    assert!(harness.queue.is_empty());
    assert_eq!(harness.registrar.calls(), 0);
}

#[tokio::test]
async fn test_missing_bound_metadata_leaves_message() {
    let harness = IngestHarness::new();
    harness
        .backend
        .put_object("cdn/raw", &b"bypassed the grant"[..], &CustomMetadata::new(), None)
        .await
        .unwrap();
    let id = harness.queue.send(created("cdn/raw"));

    let messages = harness.receive_all().await;
    let outcome = harness.pipeline.process_message(&messages[0]).await.unwrap();

    assert_eq!(outcome, MessageOutcome::Retained { failed: 1 });
    assert_eq!(harness.queue.len(), 1);
    assert_eq!(harness.queue.receive_count(&id), Some(1));
    assert_eq!(harness.registrar.calls(), 0);
    assert_eq!(
        harness.pipeline.metrics().missing_bound_metadata_total.get(),
        1
    );
}

#[tokio::test]
async fn test_missing_custom_time_falls_back_to_thirty_days() {
    let harness = IngestHarness::new();
    let mut metadata = CustomMetadata::new();
    metadata.insert("uploaderidentitykey", OWNER);
    harness
        .backend
        .put_object("cdn/legacy", &b"old upload"[..], &metadata, None)
        .await
        .unwrap();
    harness.queue.send(created("cdn/legacy"));

    let messages = harness.receive_all().await;
    harness.pipeline.process_message(&messages[0]).await.unwrap();

    let registrations = harness.registrar.registrations();
    assert_eq!(registrations.len(), 1);
    assert_eq!(registrations[0].expiry_time, T0 + 30 * 24 * 60 * 60);
}

#[tokio::test]
async fn test_registration_failure_is_redelivered() {
    let harness = IngestHarness::new();
    harness.upload("clip", b"retry me", 60).await;
    let id = harness.queue.send(created("cdn/clip"));
    harness.registrar.fail_next(1);

    let first = harness.receive_all().await;
    let outcome = harness.pipeline.process_message(&first[0]).await.unwrap();
    assert_eq!(outcome, MessageOutcome::Retained { failed: 1 });
    assert!(harness.registrar.registrations().is_empty());

    // Invisible until the visibility timeout lapses
    assert!(harness.receive_all().await.is_empty());
    harness.queue.expire_visibility();

    let second = harness.receive_all().await;
    assert_eq!(harness.queue.receive_count(&id), Some(2));
    let outcome = harness.pipeline.process_message(&second[0]).await.unwrap();
    assert!(outcome.is_acknowledged());
    assert!(harness.queue.is_empty());
    assert_eq!(harness.registrar.registrations().len(), 1);
}

#[tokio::test]
async fn test_partial_failure_keeps_whole_message() {
    let harness = IngestHarness::new();
    harness.upload("good", b"fine", 60).await;
    harness.queue.send(notification_body(&[
        ("ObjectCreated:Put", "cdn/good"),
        ("ObjectCreated:Put", "cdn/vanished"),
    ]));

    let messages = harness.receive_all().await;
    let outcome = harness.pipeline.process_message(&messages[0]).await.unwrap();

    assert_eq!(outcome, MessageOutcome::Retained { failed: 1 });
    assert_eq!(harness.queue.len(), 1);
    // The good event was still registered; redelivery repeats it harmlessly
    assert_eq!(harness.registrar.registrations().len(), 1);
}

#[tokio::test]
async fn test_test_event_and_removals_are_acknowledged() {
    let harness = IngestHarness::new();
    harness.queue.send(
        serde_json::json!({
            "Service": "Amazon S3",
            "Event": "s3:TestEvent",
            "Bucket": "cdn-bucket"
        })
        .to_string(),
    );
    harness
        .queue
        .send(notification_body(&[("ObjectRemoved:Delete", "cdn/clip")]));

    for message in harness.receive_all().await {
        let outcome = harness.pipeline.process_message(&message).await.unwrap();
        assert!(outcome.is_acknowledged());
    }
    assert!(harness.queue.is_empty());
    assert_eq!(harness.registrar.calls(), 0);
}

#[tokio::test]
async fn test_form_encoded_key_is_decoded() {
    let harness = IngestHarness::new();
    harness.upload("holiday clip", b"beach", 60).await;
    harness.queue.send(created("cdn/holiday+clip"));

    let messages = harness.receive_all().await;
    let outcome = harness.pipeline.process_message(&messages[0]).await.unwrap();

    assert!(outcome.is_acknowledged());
    assert_eq!(
        harness.registrar.registrations()[0].object_identifier,
        "holiday clip"
    );
}

#[tokio::test]
async fn test_run_loop_processes_until_shutdown() {
    let harness = IngestHarness::new();
    harness.upload("a", b"first", 60).await;
    harness.upload("b", b"second", 60).await;
    harness.queue.send(created("cdn/a"));
    harness.queue.send(created("cdn/b"));

    let pipeline = harness.pipeline.clone();
    let handle = tokio::spawn(async move { pipeline.run().await });

    tokio::time::timeout(Duration::from_secs(5), async {
        while !harness.queue.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    harness.pipeline.shutdown();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());

    assert_eq!(harness.registrar.registrations().len(), 2);
    let report = harness.pipeline.health().report();
    assert_eq!(report.messages_acknowledged, 2);
    assert_eq!(report.in_flight_messages, 0);
    assert!(harness.pipeline.health().is_healthy());
}
