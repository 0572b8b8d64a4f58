//! Advertisement resolver tests.
//!
//! Tests for pointer resolution including:
//! - Freshest-record selection and tie-breaking
//! - Tolerance of malformed or partial records
//! - Expired and missing advertisements

use std::sync::Arc;

use cdn_gateway_core::advertisement::{
    expiry_tag, object_identifier_tag, owner_tag, pointer_tag, select_freshest, Advertisement,
    AdvertisementResolver, MemoryAdvertisementStore, ResolveRequest,
};
use cdn_gateway_core::clock::FixedClock;
use cdn_gateway_core::storage::{CustomMetadata, MemoryBackend};
use cdn_gateway_core::{ContentPointer, Error, StorageError};

use super::helpers::OWNER;

fn pointer() -> String {
    ContentPointer::for_content(b"some video bytes").to_string()
}

struct ResolverFixture {
    store: Arc<MemoryAdvertisementStore>,
    backend: Arc<MemoryBackend>,
    clock: Arc<FixedClock>,
    resolver: AdvertisementResolver,
}

impl ResolverFixture {
    fn at(now_secs: i64) -> Self {
        let store = Arc::new(MemoryAdvertisementStore::new());
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(FixedClock::at_secs(now_secs));
        let resolver = AdvertisementResolver::new(store.clone(), backend.clone(), clock.clone());
        Self {
            store,
            backend,
            clock,
            resolver,
        }
    }

    async fn stored(&self, object_identifier: &str, body: &'static [u8], content_type: &str) {
        self.backend
            .put_object(
                &format!("cdn/{}", object_identifier),
                body,
                &CustomMetadata::new(),
                Some(content_type),
            )
            .await
            .unwrap();
    }

    fn advertise(&self, object_identifier: &str, expiry_secs: i64) {
        self.store
            .publish(Advertisement::new(&pointer(), OWNER, object_identifier, expiry_secs));
    }
}

#[tokio::test]
async fn test_max_expiry_record_is_selected() {
    let fixture = ResolverFixture::at(500);
    fixture.stored("old", b"0123456789", "video/mp4").await;
    fixture.stored("new", b"01234", "image/png").await;
    fixture.advertise("old", 1000);
    fixture.advertise("new", 2000);

    let resolved = fixture
        .resolver
        .resolve(&ResolveRequest::new(pointer(), OWNER))
        .await
        .unwrap();

    assert_eq!(resolved.object_identifier, "new");
    assert_eq!(resolved.storage_key, "cdn/new");
    assert_eq!(resolved.size, 5);
    assert_eq!(resolved.content_type.as_deref(), Some("image/png"));
    // Reported in minutes
    assert_eq!(resolved.expiry_time, 2000 / 60);
}

#[tokio::test]
async fn test_expired_advertisement() {
    let fixture = ResolverFixture::at(500);
    fixture.stored("new", b"01234", "image/png").await;
    fixture.advertise("old", 1000);
    fixture.advertise("new", 2000);
    fixture.clock.advance(chrono::Duration::seconds(2501));

    let err = fixture
        .resolver
        .resolve(&ResolveRequest::new(pointer(), OWNER))
        .await
        .unwrap_err();

    match err {
        Error::AdvertisementExpired { expiry_secs, .. } => assert_eq!(expiry_secs, 2000),
        other => panic!("expected AdvertisementExpired, got {:?}", other),
    }
}

#[tokio::test]
async fn test_expiry_equal_to_now_still_resolves() {
    let fixture = ResolverFixture::at(2000);
    fixture.stored("new", b"01234", "image/png").await;
    fixture.advertise("new", 2000);

    let resolved = fixture
        .resolver
        .resolve(&ResolveRequest::new(pointer(), OWNER))
        .await
        .unwrap();
    assert_eq!(resolved.object_identifier, "new");

    // One second later it is stale
    fixture.clock.advance(chrono::Duration::seconds(1));
    let err = fixture
        .resolver
        .resolve(&ResolveRequest::new(pointer(), OWNER))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AdvertisementExpired { expiry_secs: 2000, .. }));
}

#[tokio::test]
async fn test_no_advertisement_found() {
    let fixture = ResolverFixture::at(500);

    let err = fixture
        .resolver
        .resolve(&ResolveRequest::new(pointer(), OWNER))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoAdvertisementFound { .. }));

    // Records lacking an identifier or an expiry never qualify
    fixture.store.publish(Advertisement {
        tags: vec![pointer_tag(&pointer()), owner_tag(OWNER), expiry_tag(9000)],
    });
    fixture.store.publish(Advertisement {
        tags: vec![
            pointer_tag(&pointer()),
            owner_tag(OWNER),
            object_identifier_tag("orphan"),
        ],
    });

    let err = fixture
        .resolver
        .resolve(&ResolveRequest::new(pointer(), OWNER))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoAdvertisementFound { .. }));
}

#[tokio::test]
async fn test_other_owner_is_not_considered() {
    let fixture = ResolverFixture::at(500);
    fixture.stored("mine", b"abc", "text/plain").await;
    fixture.advertise("mine", 1000);
    fixture
        .store
        .publish(Advertisement::new(&pointer(), "02someoneelse", "theirs", 5000));

    let resolved = fixture
        .resolver
        .resolve(&ResolveRequest::new(pointer(), OWNER))
        .await
        .unwrap();
    assert_eq!(resolved.object_identifier, "mine");
}

#[tokio::test]
async fn test_malformed_expiry_does_not_abort() {
    let fixture = ResolverFixture::at(500);
    fixture.stored("good", b"abc", "text/plain").await;
    fixture.store.publish(Advertisement {
        tags: vec![
            pointer_tag(&pointer()),
            owner_tag(OWNER),
            object_identifier_tag("bad"),
            "expiry_time_tomorrow".to_string(),
        ],
    });
    fixture.advertise("good", 1000);

    let resolved = fixture
        .resolver
        .resolve(&ResolveRequest::new(pointer(), OWNER))
        .await
        .unwrap();
    assert_eq!(resolved.object_identifier, "good");
}

#[tokio::test]
async fn test_advertised_object_missing_from_bucket() {
    let fixture = ResolverFixture::at(500);
    fixture.advertise("gone", 1000);

    let err = fixture
        .resolver
        .resolve(&ResolveRequest::new(pointer(), OWNER))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::NotFound(_))));
}

#[tokio::test]
async fn test_pagination_is_forwarded() {
    let fixture = ResolverFixture::at(500);
    fixture.stored("second", b"abc", "text/plain").await;
    fixture.advertise("first", 2000);
    fixture.advertise("second", 1000);

    let mut request = ResolveRequest::new(pointer(), OWNER);
    request.offset = Some(1);
    request.limit = Some(1);

    let resolved = fixture.resolver.resolve(&request).await.unwrap();
    assert_eq!(resolved.object_identifier, "second");
}

#[test]
fn test_ties_break_on_smallest_identifier() {
    let candidates = vec![
        Advertisement::new("uhrp://p", OWNER, "zeta", 2000),
        Advertisement::new("uhrp://p", OWNER, "alpha", 2000),
        Advertisement::new("uhrp://p", OWNER, "mid", 1000),
    ];

    let selection = select_freshest(&candidates).unwrap();
    assert_eq!(selection.object_identifier, "alpha");
    assert_eq!(selection.expiry_secs, 2000);

    let mut reversed = candidates.clone();
    reversed.reverse();
    assert_eq!(select_freshest(&reversed).unwrap(), selection);
}

#[test]
fn test_malformed_expiry_counts_as_zero() {
    let candidates = vec![Advertisement {
        tags: vec![object_identifier_tag("x"), "expiry_time_".to_string()],
    }];
    assert_eq!(select_freshest(&candidates).unwrap().expiry_secs, 0);
}
