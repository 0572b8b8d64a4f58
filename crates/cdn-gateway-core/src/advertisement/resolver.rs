//! Freshest-wins advertisement resolution.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::store::{AdvertisementQuery, AdvertisementStore};
use super::tags::{owner_tag, pointer_tag, Advertisement};
use crate::clock::SharedClock;
use crate::storage::{object_key, StorageBackend};
use crate::{Error, Result};

/// Default number of candidate records examined per lookup
pub const DEFAULT_LIMIT: usize = 200;

/// A lookup of the object behind a pointer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub pointer: String,
    pub owner_identity_key: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl ResolveRequest {
    pub fn new(pointer: impl Into<String>, owner_identity_key: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
            owner_identity_key: owner_identity_key.into(),
            limit: None,
            offset: None,
        }
    }
}

/// The object an advertisement currently points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedObject {
    pub object_identifier: String,
    pub storage_key: String,
    pub size: u64,
    pub content_type: Option<String>,
    /// Advertisement expiry in minutes since the epoch
    pub expiry_time: i64,
}

/// Winning candidate of a lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub object_identifier: String,
    pub expiry_secs: i64,
}

/// Pick the record with the greatest expiry among those carrying both an
/// object identifier and an expiry. Ties go to the smallest identifier.
pub fn select_freshest(candidates: &[Advertisement]) -> Option<Selection> {
    candidates
        .iter()
        .filter_map(|ad| {
            let expiry_secs = ad.expiry_secs()?;
            let object_identifier = ad.object_identifier()?;
            Some(Selection {
                object_identifier,
                expiry_secs,
            })
        })
        .reduce(|best, next| {
            let better = next.expiry_secs > best.expiry_secs
                || (next.expiry_secs == best.expiry_secs
                    && next.object_identifier < best.object_identifier);
            if better {
                next
            } else {
                best
            }
        })
}

/// Resolves pointers to live objects using advertisement records plus the
/// storage backend's metadata.
pub struct AdvertisementResolver {
    store: Arc<dyn AdvertisementStore>,
    backend: Arc<dyn StorageBackend>,
    clock: SharedClock,
}

impl AdvertisementResolver {
    pub fn new(
        store: Arc<dyn AdvertisementStore>,
        backend: Arc<dyn StorageBackend>,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            backend,
            clock,
        }
    }

    pub async fn resolve(&self, request: &ResolveRequest) -> Result<ResolvedObject> {
        let query = AdvertisementQuery {
            tags: vec![
                pointer_tag(&request.pointer),
                owner_tag(&request.owner_identity_key),
            ],
            limit: request.limit.unwrap_or(DEFAULT_LIMIT),
            offset: request.offset.unwrap_or(0),
        };
        let candidates = self.store.find(&query).await?;
        debug!(
            "Resolving {}: {} candidate advertisements",
            request.pointer,
            candidates.len()
        );

        let winner = select_freshest(&candidates).ok_or_else(|| Error::NoAdvertisementFound {
            pointer: request.pointer.clone(),
        })?;

        if winner.expiry_secs < self.clock.now().timestamp() {
            return Err(Error::AdvertisementExpired {
                pointer: request.pointer.clone(),
                expiry_secs: winner.expiry_secs,
            });
        }

        let storage_key = object_key(&winner.object_identifier);
        let metadata = self.backend.head(&storage_key).await?;

        Ok(ResolvedObject {
            object_identifier: winner.object_identifier,
            storage_key,
            size: metadata.size,
            content_type: metadata.content_type,
            expiry_time: winner.expiry_secs.div_euclid(60),
        })
    }
}
