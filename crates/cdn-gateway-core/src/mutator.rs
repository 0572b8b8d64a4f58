//! Metadata mutation across backends.
//!
//! Backends that can patch metadata in place get the patch directly. The rest
//! re-read the current metadata, merge the patch over it and copy the object
//! onto itself with a replace directive. The copy never deletes its source, so
//! a failed copy leaves the original metadata untouched.

use tracing::debug;

use crate::storage::{MetadataPatch, MetadataUpdateMode, StorageBackend};
use crate::Result;

/// Apply `patch` to the object at `key`.
pub async fn update_metadata<B>(backend: &B, key: &str, patch: &MetadataPatch) -> Result<()>
where
    B: StorageBackend + ?Sized,
{
    if patch.is_empty() {
        // Nothing to write, but a missing object is still NotFound
        backend.head(key).await?;
        return Ok(());
    }

    match backend.capabilities().metadata_update {
        MetadataUpdateMode::InPlace => {
            debug!("{} metadata PATCH: {}", backend.name(), key);
            backend.patch_metadata_in_place(key, patch).await
        }
        MetadataUpdateMode::CopyReplace => {
            let current = backend.head(key).await?;
            let merged = patch.apply_to(&current.custom);
            debug!(
                "{} metadata COPY-REPLACE: {} ({} keys)",
                backend.name(),
                key,
                merged.len()
            );
            backend
                .copy_with_metadata(key, &merged, current.content_type.as_deref())
                .await
        }
    }
}
