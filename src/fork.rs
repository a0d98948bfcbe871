//! Copy-on-write forking.
//!
//! Cloned catalogs share storage objects with their source owner. The
//! first time the target edits (or otherwise needs its own copy of) an
//! image, the object is forked: bytes are duplicated into the target
//! owner's namespace and the target record re-pointed. The source object
//! is never modified or deleted — that is what makes this copy, not move.
//!
//! Concurrent forks of the same source→destination pair both succeed:
//! destination keys are deterministic and "already exists" is success.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::db::RecordStore;
use crate::error::SyncError;
use crate::metrics;
use crate::record::{extension_of, object_key, AssetKind};
use crate::storage::traits::{ObjectStore, StorageError};

/// What the forked object will belong to, and which record to re-point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForkTarget {
    /// A product's primary image
    Product { product_id: String },
    /// A gallery row; the fork also clears its shared mark
    GalleryImage { image_id: String },
    /// A brand asset — no relational row to update, the caller keeps the
    /// returned path
    BrandAsset { brand_id: String },
}

impl ForkTarget {
    fn kind(&self) -> AssetKind {
        match self {
            Self::Product { .. } => AssetKind::Product,
            Self::GalleryImage { .. } => AssetKind::Gallery,
            Self::BrandAsset { .. } => AssetKind::Brand,
        }
    }

    fn entity_id(&self) -> &str {
        match self {
            Self::Product { product_id } => product_id,
            Self::GalleryImage { image_id } => image_id,
            Self::BrandAsset { brand_id } => brand_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkResult {
    pub dest_path: String,
    pub public_url: String,
}

pub struct CowForker {
    records: Arc<RecordStore>,
    objects: Arc<dyn ObjectStore>,
}

impl CowForker {
    pub fn new(records: Arc<RecordStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { records, objects }
    }

    /// Duplicate `source_path` into `target_owner_id`'s namespace and
    /// re-point the target record at the copy.
    #[tracing::instrument(skip(self), fields(source = %source_path, owner = %target_owner_id))]
    pub async fn fork(
        &self,
        source_path: &str,
        target_owner_id: &str,
        target: &ForkTarget,
    ) -> Result<ForkResult, SyncError> {
        let bytes = self.objects.download(source_path).await?;

        let ext = extension_of(source_path);
        let dest = object_key(target_owner_id, target.kind(), target.entity_id(), ext);

        match self.objects.upload(&dest, &bytes, false).await {
            Ok(()) => debug!(dest = %dest, "forked object uploaded"),
            Err(StorageError::AlreadyExists(_)) => {
                // A concurrent fork already completed the same work
                debug!(dest = %dest, "fork destination already present, treating as success");
            }
            Err(err) => return Err(SyncError::Storage(err)),
        }

        let public_url = self.objects.public_url(&dest);

        match target {
            ForkTarget::Product { product_id } => {
                self.records
                    .mark_product_synced(product_id, &dest, &public_url)
                    .await?;
            }
            ForkTarget::GalleryImage { image_id } => {
                self.records
                    .set_image_forked(image_id, &dest, &public_url)
                    .await?;
            }
            ForkTarget::BrandAsset { brand_id } => {
                info!(brand = %brand_id, dest = %dest, "brand asset forked");
            }
        }

        metrics::record_forked(target.kind());
        Ok(ForkResult {
            dest_path: dest,
            public_url,
        })
    }
}
