//! Upload grant tests.
//!
//! Tests for grant issuance and enforcement including:
//! - Bound `customtime` arithmetic
//! - Case-insensitive metadata after upload
//! - Size, expiry and tamper rejection for both grant shapes

use std::collections::BTreeMap;
use std::time::Duration;

use cdn_gateway_core::grant::UploadGrantIssuer;
use cdn_gateway_core::signing::decode_policy;
use cdn_gateway_core::storage::{
    format_custom_time, GrantStrategy, MetadataUpdateMode, StorageBackend, UploadAttempt,
};
use cdn_gateway_core::{Error, StorageError};

use super::helpers::{fixed_clock, memory_backend, OWNER, T0};

fn rejected(result: cdn_gateway_core::Result<()>) -> bool {
    matches!(
        result,
        Err(Error::Storage(StorageError::SignatureOrPolicyRejected(_)))
    )
}

#[tokio::test]
async fn test_custom_time_is_retention_plus_grace() {
    let clock = fixed_clock();
    let backend = memory_backend(
        &clock,
        MetadataUpdateMode::CopyReplace,
        GrantStrategy::SignedHeaders,
    );
    let issuer = UploadGrantIssuer::new(backend.clone(), clock.clone());

    let grant = issuer.issue(1024, 60, "clip", OWNER).await.unwrap();

    let expected = chrono::DateTime::from_timestamp(T0 + 3900, 0).unwrap();
    assert_eq!(
        grant.required_headers["x-amz-meta-customtime"],
        format_custom_time(expected)
    );
    assert_eq!(grant.required_headers["x-amz-meta-uploaderidentitykey"], OWNER);
    assert_eq!(grant.required_headers["content-length"], "1024");
    assert_eq!(grant.storage_key, "cdn/clip");
    assert!(!grant.is_form_upload());

    backend
        .accept_upload(&grant, UploadAttempt::from_grant(&grant, vec![7u8; 1024]))
        .await
        .unwrap();

    let metadata = backend.head("cdn/clip").await.unwrap();
    assert_eq!(metadata.size, 1024);
    assert_eq!(metadata.custom_time(), Some(expected));
}

#[tokio::test]
async fn test_bound_metadata_reads_case_insensitively() {
    let clock = fixed_clock();
    let backend = memory_backend(
        &clock,
        MetadataUpdateMode::CopyReplace,
        GrantStrategy::SignedHeaders,
    );
    let issuer = UploadGrantIssuer::new(backend.clone(), clock.clone());
    let grant = issuer.issue(5, 10, "clip", OWNER).await.unwrap();

    // Clients may send header names in any case
    let mut attempt = UploadAttempt::from_grant(&grant, &b"hello"[..]);
    attempt.headers = grant
        .required_headers
        .iter()
        .map(|(k, v)| (k.to_ascii_uppercase(), v.clone()))
        .collect();
    backend.accept_upload(&grant, attempt).await.unwrap();

    let metadata = backend.head("cdn/clip").await.unwrap();
    assert_eq!(metadata.custom.get("UploaderIdentityKey"), Some(OWNER));
    assert_eq!(metadata.custom.get("uploaderidentitykey"), Some(OWNER));
    assert!(metadata.custom.get("CUSTOMTIME").is_some());
    assert_eq!(metadata.uploader_identity_key(), Some(OWNER));
}

#[tokio::test]
async fn test_signed_header_grant_rejections() {
    let clock = fixed_clock();
    let backend = memory_backend(
        &clock,
        MetadataUpdateMode::CopyReplace,
        GrantStrategy::SignedHeaders,
    );
    let issuer =
        UploadGrantIssuer::new(backend.clone(), clock.clone()).with_ttl(Duration::from_secs(900));
    let grant = issuer.issue(4, 60, "clip", OWNER).await.unwrap();

    // Wrong size
    let attempt = UploadAttempt::from_grant(&grant, &b"toolong"[..]);
    assert!(rejected(backend.accept_upload(&grant, attempt).await));

    // Someone else's identity key
    let mut attempt = UploadAttempt::from_grant(&grant, &b"abcd"[..]);
    attempt.headers.insert(
        "x-amz-meta-uploaderidentitykey".to_string(),
        "02mallory".to_string(),
    );
    assert!(rejected(backend.accept_upload(&grant, attempt).await));

    // Missing bound header
    let mut attempt = UploadAttempt::from_grant(&grant, &b"abcd"[..]);
    attempt.headers.remove("x-amz-meta-customtime");
    assert!(rejected(backend.accept_upload(&grant, attempt).await));

    // Past the grant window
    clock.advance(chrono::Duration::seconds(901));
    let attempt = UploadAttempt::from_grant(&grant, &b"abcd"[..]);
    assert!(rejected(backend.accept_upload(&grant, attempt).await));

    assert!(!backend.exists("cdn/clip").await.unwrap());
}

#[tokio::test]
async fn test_form_policy_grant() {
    let clock = fixed_clock();
    let backend = memory_backend(
        &clock,
        MetadataUpdateMode::CopyReplace,
        GrantStrategy::FormPolicy,
    );
    let issuer = UploadGrantIssuer::new(backend.clone(), clock.clone());
    let grant = issuer.issue(3, 60, "form", OWNER).await.unwrap();

    assert!(grant.is_form_upload());
    assert!(grant.required_headers.is_empty());
    let fields: &BTreeMap<String, String> = grant.form_fields.as_ref().unwrap();
    assert_eq!(fields["key"], "cdn/form");
    assert_eq!(fields["x-amz-meta-uploaderidentitykey"], OWNER);

    let policy = decode_policy(fields).unwrap();
    let conditions = policy["conditions"].to_string();
    assert!(conditions.contains("content-length-range"));
    assert!(conditions.contains("[\"content-length-range\",3,3]"));

    let mut tampered = UploadAttempt::from_grant(&grant, &b"abc"[..]);
    tampered
        .form_fields
        .insert("x-amz-meta-customtime".to_string(), "2099-01-01T00:00:00Z".to_string());
    assert!(rejected(backend.accept_upload(&grant, tampered).await));

    backend
        .accept_upload(&grant, UploadAttempt::from_grant(&grant, &b"abc"[..]))
        .await
        .unwrap();
    let metadata = backend.head("cdn/form").await.unwrap();
    assert_eq!(
        metadata.custom_time().map(|t| t.timestamp()),
        Some(T0 + 3900)
    );
}

#[tokio::test]
async fn test_newer_grant_supersedes_older() {
    let clock = fixed_clock();
    let backend = memory_backend(
        &clock,
        MetadataUpdateMode::CopyReplace,
        GrantStrategy::SignedHeaders,
    );
    let issuer = UploadGrantIssuer::new(backend.clone(), clock.clone());

    let first = issuer.issue(3, 60, "clip", OWNER).await.unwrap();
    clock.advance(chrono::Duration::seconds(1));
    let second = issuer.issue(3, 120, "clip", OWNER).await.unwrap();
    assert_ne!(first.upload_url, second.upload_url);

    let attempt = UploadAttempt::from_grant(&first, &b"abc"[..]);
    assert!(rejected(backend.accept_upload(&first, attempt).await));

    backend
        .accept_upload(&second, UploadAttempt::from_grant(&second, &b"abc"[..]))
        .await
        .unwrap();
}
