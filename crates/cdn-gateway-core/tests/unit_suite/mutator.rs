//! Metadata mutator tests.
//!
//! Tests for `update_metadata` under both capability profiles including:
//! - Content type and unpatched keys surviving a copy-based update
//! - Key removal
//! - Failure on a missing object leaving nothing behind

use std::sync::Arc;

use cdn_gateway_core::metrics::{GatewayMetrics, InstrumentedStorageBackend};
use cdn_gateway_core::storage::{
    CustomMetadata, GrantStrategy, MemoryBackend, MetadataPatch, MetadataUpdateMode,
    StorageBackend,
};
use cdn_gateway_core::{Error, StorageError};

use super::helpers::{fixed_clock, memory_backend, OWNER, T0};

fn original_metadata() -> CustomMetadata {
    let mut metadata = CustomMetadata::new();
    metadata.insert("UploaderIdentityKey", OWNER);
    metadata.insert("customtime", "2023-11-15T00:00:00Z");
    metadata.insert("x-origin", "camera-7");
    metadata
}

async fn seeded(mode: MetadataUpdateMode) -> Arc<MemoryBackend> {
    let backend = memory_backend(&fixed_clock(), mode, GrantStrategy::SignedHeaders);
    backend
        .put_object(
            "cdn/clip",
            &b"frames"[..],
            &original_metadata(),
            Some("video/mp4"),
        )
        .await
        .unwrap();
    backend
}

#[tokio::test]
async fn test_copy_update_preserves_content_type_and_other_keys() {
    let backend = seeded(MetadataUpdateMode::CopyReplace).await;
    let new_time = chrono::DateTime::from_timestamp(T0 + 86_400, 0).unwrap();

    backend
        .update_metadata("cdn/clip", &MetadataPatch::custom_time(new_time))
        .await
        .unwrap();

    let metadata = backend.head("cdn/clip").await.unwrap();
    assert_eq!(metadata.content_type.as_deref(), Some("video/mp4"));
    assert_eq!(metadata.custom_time(), Some(new_time));
    assert_eq!(metadata.uploader_identity_key(), Some(OWNER));
    assert_eq!(metadata.custom.get("x-origin"), Some("camera-7"));
    assert_eq!(metadata.size, 6);
}

#[tokio::test]
async fn test_in_place_update_matches_copy_semantics() {
    let backend = seeded(MetadataUpdateMode::InPlace).await;

    backend
        .update_metadata("cdn/clip", &MetadataPatch::new().set("CustomTime", "2030-01-01T00:00:00Z"))
        .await
        .unwrap();

    let metadata = backend.head("cdn/clip").await.unwrap();
    assert_eq!(metadata.content_type.as_deref(), Some("video/mp4"));
    assert_eq!(metadata.custom.get("customtime"), Some("2030-01-01T00:00:00Z"));
    assert_eq!(metadata.custom.get("x-origin"), Some("camera-7"));
}

#[tokio::test]
async fn test_patch_can_remove_keys() {
    for mode in [MetadataUpdateMode::CopyReplace, MetadataUpdateMode::InPlace] {
        let backend = seeded(mode).await;

        backend
            .update_metadata("cdn/clip", &MetadataPatch::new().remove("X-Origin"))
            .await
            .unwrap();

        let metadata = backend.head("cdn/clip").await.unwrap();
        assert!(!metadata.custom.contains_key("x-origin"), "{:?}", mode);
        assert_eq!(metadata.uploader_identity_key(), Some(OWNER));
    }
}

#[tokio::test]
async fn test_missing_object_is_not_found() {
    let backend = seeded(MetadataUpdateMode::CopyReplace).await;

    let err = backend
        .update_metadata("cdn/absent", &MetadataPatch::new().set("customtime", "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::NotFound(_))));
    assert!(!backend.exists("cdn/absent").await.unwrap());
}

#[tokio::test]
async fn test_empty_patch_still_requires_object() {
    for mode in [MetadataUpdateMode::CopyReplace, MetadataUpdateMode::InPlace] {
        let backend = seeded(mode).await;

        let err = backend
            .update_metadata("cdn/absent", &MetadataPatch::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::NotFound(_))));

        backend
            .update_metadata("cdn/clip", &MetadataPatch::new())
            .await
            .unwrap();
        let metadata = backend.head("cdn/clip").await.unwrap();
        assert_eq!(metadata.custom.get("x-origin"), Some("camera-7"));
    }
}

#[tokio::test]
async fn test_wrong_strategy_is_unsupported() {
    let backend = seeded(MetadataUpdateMode::CopyReplace).await;

    let err = backend
        .patch_metadata_in_place("cdn/clip", &MetadataPatch::new().set("a", "b"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Storage(StorageError::Unsupported { .. })
    ));

    // The object is untouched
    let metadata = backend.head("cdn/clip").await.unwrap();
    assert_eq!(metadata.custom, original_metadata());
}

#[tokio::test]
async fn test_update_through_instrumented_backend() {
    let metrics = Arc::new(GatewayMetrics::new());
    let inner = seeded(MetadataUpdateMode::CopyReplace).await;
    let backend = InstrumentedStorageBackend::new(inner.clone(), metrics.clone());

    backend
        .update_metadata("cdn/clip", &MetadataPatch::new().set("x-origin", "camera-8"))
        .await
        .unwrap();

    assert_eq!(
        inner.head("cdn/clip").await.unwrap().custom.get("x-origin"),
        Some("camera-8")
    );
    let encoded = metrics.encode();
    assert!(encoded.contains("operation=\"update_metadata\""));
    assert!(encoded.contains("backend=\"memory\""));
}
