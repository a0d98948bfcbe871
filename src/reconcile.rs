// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage reconciliation.
//!
//! Object storage is eventually-consistent with the relational datastore
//! and is never trusted as a liveness source. This module diffs the bucket
//! listing against the datastore's path-bearing fields and removes objects
//! nothing references anymore (failed internalizations that half-completed,
//! rows deleted after their upload, abandoned staging files).
//!
//! The valid-path set is recomputed fresh on every invocation — caching it
//! across runs could delete an object that became valid in between.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::db::RecordStore;
use crate::error::SyncError;
use crate::metrics::{self, LatencyTimer};
use crate::storage::traits::ObjectStore;

/// Result of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub orphans: Vec<String>,
    /// Zero in dry-run mode
    pub deleted_count: usize,
}

/// Reduce a stored field value to a bare storage key. Fields may hold
/// either keys ("owner/products/p.jpg") or public URLs
/// (".../storage/v1/object/public/{bucket}/owner/products/p.jpg").
#[must_use]
pub fn public_url_to_key(value: &str, bucket: &str) -> String {
    let marker = format!("/storage/v1/object/public/{}/", bucket);
    if let Some(idx) = value.find(&marker) {
        return value[idx + marker.len()..].to_string();
    }
    value.trim_start_matches('/').to_string()
}

pub struct Reconciler {
    records: Arc<RecordStore>,
    objects: Arc<dyn ObjectStore>,
}

impl Reconciler {
    pub fn new(records: Arc<RecordStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { records, objects }
    }

    fn normalize_to_key(&self, value: &str) -> String {
        public_url_to_key(value, self.objects.bucket())
    }

    /// Compute the current orphan list without touching storage.
    pub async fn find_orphans(&self) -> Result<Vec<String>, SyncError> {
        let valid: HashSet<String> = self
            .records
            .storage_path_fields()
            .await?
            .iter()
            .map(|field| self.normalize_to_key(field))
            .collect();

        let listing = self.objects.list("").await?;
        debug!(objects = listing.len(), valid = valid.len(), "reconciliation scan");

        Ok(listing
            .into_iter()
            .filter(|entry| !entry.is_directory_marker() && !valid.contains(&entry.name))
            .map(|entry| entry.name)
            .collect())
    }

    /// Reconcile the bucket. In dry-run mode only reports; in live mode
    /// deletes exactly the computed orphan list in one batch call.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup(&self, dry_run: bool) -> Result<CleanupReport, SyncError> {
        let timer = LatencyTimer::new("reconciler", "cleanup");
        let orphans = self.find_orphans().await?;

        if dry_run || orphans.is_empty() {
            timer.finish("success");
            info!(orphans = orphans.len(), dry_run, "reconciliation complete (no deletions)");
            return Ok(CleanupReport {
                orphans,
                deleted_count: 0,
            });
        }

        self.objects.delete(&orphans).await?;
        let deleted_count = orphans.len();
        metrics::record_orphans_deleted(deleted_count);
        timer.finish("success");
        info!(deleted = deleted_count, "reconciliation removed orphans");

        Ok(CleanupReport {
            orphans,
            deleted_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Product, ProductImage, StagingImage};
    use crate::storage::memory::MemoryObjectStore;

    async fn harness() -> (Reconciler, Arc<RecordStore>, Arc<MemoryObjectStore>) {
        let records = Arc::new(RecordStore::new("sqlite::memory:").await.unwrap());
        let objects = Arc::new(MemoryObjectStore::new("product-images", "storage.local"));
        let reconciler = Reconciler::new(records.clone(), objects.clone());
        (reconciler, records, objects)
    }

    #[tokio::test]
    async fn test_orphans_exclude_referenced_paths() {
        let (reconciler, records, objects) = harness().await;

        objects.upload("owner-a/products/live.jpg", b"x", false).await.unwrap();
        objects.upload("owner-a/gallery/live.jpg", b"x", false).await.unwrap();
        objects.upload("owner-a/staging/live.jpg", b"x", false).await.unwrap();
        objects.upload("owner-a/products/dead.jpg", b"x", false).await.unwrap();

        let mut p = Product::new("owner-a", "REF-1");
        p.image_path = Some("owner-a/products/live.jpg".to_string());
        records.insert_product(&p).await.unwrap();

        let mut image = ProductImage::new(&p.id, "https://cdn/x.jpg", 0);
        image.storage_path = Some("owner-a/gallery/live.jpg".to_string());
        records.insert_image(&image).await.unwrap();

        records
            .insert_staging(&StagingImage::new("owner-a", "owner-a/staging/live.jpg"))
            .await
            .unwrap();

        let orphans = reconciler.find_orphans().await.unwrap();
        assert_eq!(orphans, vec!["owner-a/products/dead.jpg".to_string()]);
    }

    #[tokio::test]
    async fn test_gallery_public_urls_are_normalized() {
        let (reconciler, records, objects) = harness().await;

        objects.upload("owner-a/gallery/g1.jpg", b"x", false).await.unwrap();

        let mut p = Product::new("owner-a", "REF-1");
        p.gallery_urls = vec![
            "https://storage.local/storage/v1/object/public/product-images/owner-a/gallery/g1.jpg"
                .to_string(),
        ];
        records.insert_product(&p).await.unwrap();

        assert!(reconciler.find_orphans().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_never_mutates_storage() {
        let (reconciler, _records, objects) = harness().await;
        objects.upload("a/dead1.jpg", b"x", false).await.unwrap();
        objects.upload("b/dead2.jpg", b"x", false).await.unwrap();

        let before = objects.list("").await.unwrap();
        let report = reconciler.cleanup(true).await.unwrap();
        let after = objects.list("").await.unwrap();

        assert_eq!(report.orphans.len(), 2);
        assert_eq!(report.deleted_count, 0);
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_live_cleanup_deletes_exactly_the_orphans() {
        let (reconciler, records, objects) = harness().await;
        objects.upload("owner-a/products/live.jpg", b"x", false).await.unwrap();
        objects.upload("owner-a/products/dead.jpg", b"x", false).await.unwrap();

        let mut p = Product::new("owner-a", "REF-1");
        p.image_path = Some("owner-a/products/live.jpg".to_string());
        records.insert_product(&p).await.unwrap();

        let report = reconciler.cleanup(false).await.unwrap();
        assert_eq!(report.deleted_count, 1);
        assert_eq!(report.orphans, vec!["owner-a/products/dead.jpg".to_string()]);

        assert!(objects.download("owner-a/products/live.jpg").await.is_ok());
        assert!(objects.download("owner-a/products/dead.jpg").await.is_err());
    }

    #[tokio::test]
    async fn test_directory_markers_are_never_orphans() {
        let (reconciler, _records, objects) = harness().await;
        objects
            .upload("owner-a/.emptyFolderPlaceholder", b"", false)
            .await
            .unwrap();

        assert!(reconciler.find_orphans().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_valid_set_is_recomputed_each_run() {
        let (reconciler, records, objects) = harness().await;
        objects.upload("owner-a/products/p.jpg", b"x", false).await.unwrap();

        assert_eq!(reconciler.find_orphans().await.unwrap().len(), 1);

        // The object becomes valid between runs
        let mut p = Product::new("owner-a", "REF-1");
        p.image_path = Some("owner-a/products/p.jpg".to_string());
        records.insert_product(&p).await.unwrap();

        assert!(reconciler.find_orphans().await.unwrap().is_empty());
    }
}
