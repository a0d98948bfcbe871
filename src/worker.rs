// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Internalization worker.
//!
//! Pulls externally-hosted image bytes into managed storage and flips the
//! owning record to a terminal state. The step order is fixed:
//! fetch → transcode → upload → single record update. The whole sequence
//! has at-least-once semantics — the destination key is deterministic and
//! an "already exists" upload is absorbed as success, so re-running a
//! `pending` or `failed` entity is always safe.
//!
//! An attempt never leaves the entity in `pending`: every exit path writes
//! either `synced` or `failed` before returning.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::RecordStore;
use crate::error::SyncError;
use crate::fetch::RemoteFetcher;
use crate::metrics::{self, LatencyTimer};
use crate::record::{object_key, AssetKind, Product, ProductImage};
use crate::storage::traits::{ObjectStore, StorageError};
use crate::transcode::ImageTranscoder;

/// Result of one successful internalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Internalized {
    pub storage_path: String,
    pub public_url: String,
}

pub struct Internalizer {
    records: Arc<RecordStore>,
    objects: Arc<dyn ObjectStore>,
    fetcher: Arc<dyn RemoteFetcher>,
    transcoder: Arc<dyn ImageTranscoder>,
}

impl Internalizer {
    pub fn new(
        records: Arc<RecordStore>,
        objects: Arc<dyn ObjectStore>,
        fetcher: Arc<dyn RemoteFetcher>,
        transcoder: Arc<dyn ImageTranscoder>,
    ) -> Self {
        Self {
            records,
            objects,
            fetcher,
            transcoder,
        }
    }

    /// Internalize a product's primary image.
    ///
    /// Returns `Ok(None)` when there is nothing to do (blank source URL) —
    /// that is a terminal success, recorded with a note.
    #[tracing::instrument(skip(self, product), fields(product_id = %product.id))]
    pub async fn internalize_product(
        &self,
        product: &Product,
    ) -> Result<Option<Internalized>, SyncError> {
        let source = product
            .external_image_url
            .as_deref()
            .unwrap_or("")
            .trim()
            .to_string();

        if source.is_empty() {
            self.records
                .mark_product_synced_empty(&product.id, "URL não fornecida")
                .await?;
            debug!("nothing to internalize, marked synced");
            return Ok(None);
        }

        let timer = LatencyTimer::new("worker", "internalize_product");
        match self
            .pull_into_storage(&product.owner_id, AssetKind::Product, &product.id, &source)
            .await
        {
            Ok(done) => {
                self.records
                    .mark_product_synced(&product.id, &done.storage_path, &done.public_url)
                    .await?;
                timer.finish("success");
                metrics::record_internalized(AssetKind::Product);
                info!(path = %done.storage_path, "product image internalized");
                Ok(Some(done))
            }
            Err(err) => {
                // The captured message is what administrators see on the row
                self.records
                    .mark_product_failed(&product.id, &err.to_string())
                    .await?;
                timer.finish("failed");
                metrics::record_internalize_failure(AssetKind::Product);
                warn!(error = %err, "product internalization failed");
                Err(err)
            }
        }
    }

    /// Internalize one gallery image. Same contract as
    /// [`internalize_product`], keyed into the owner's gallery namespace.
    #[tracing::instrument(skip(self, image), fields(image_id = %image.id))]
    pub async fn internalize_gallery_image(
        &self,
        image: &ProductImage,
        owner_id: &str,
    ) -> Result<Option<Internalized>, SyncError> {
        let source = image.url.trim().to_string();

        if source.is_empty() {
            self.records
                .mark_image_synced_empty(&image.id, "URL não fornecida")
                .await?;
            return Ok(None);
        }

        let timer = LatencyTimer::new("worker", "internalize_image");
        match self
            .pull_into_storage(owner_id, AssetKind::Gallery, &image.id, &source)
            .await
        {
            Ok(done) => {
                self.records
                    .mark_image_synced(&image.id, &done.storage_path, &done.public_url)
                    .await?;
                timer.finish("success");
                metrics::record_internalized(AssetKind::Gallery);
                Ok(Some(done))
            }
            Err(err) => {
                self.records
                    .mark_image_failed(&image.id, &err.to_string())
                    .await?;
                timer.finish("failed");
                metrics::record_internalize_failure(AssetKind::Gallery);
                warn!(error = %err, "gallery image internalization failed");
                Err(err)
            }
        }
    }

    /// fetch → transcode → upload → public URL. No record writes here; the
    /// callers own the terminal-state update.
    async fn pull_into_storage(
        &self,
        owner_id: &str,
        kind: AssetKind,
        entity_id: &str,
        source_url: &str,
    ) -> Result<Internalized, SyncError> {
        let raw = self
            .fetcher
            .fetch(source_url)
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;

        let transcoded = self
            .transcoder
            .transcode(&raw)
            .map_err(|e| SyncError::Validation(e.to_string()))?;

        let dest = object_key(owner_id, kind, entity_id, transcoded.extension);

        // Upload outcome is logged before the record update that depends on
        // it, so a crash in between leaves an unambiguous retry state.
        match self.objects.upload(&dest, &transcoded.bytes, false).await {
            Ok(()) => debug!(path = %dest, "uploaded"),
            Err(StorageError::AlreadyExists(_)) => {
                // A previous attempt already landed these bytes
                debug!(path = %dest, "destination already present, treating as success");
            }
            Err(err) => return Err(SyncError::Storage(err)),
        }

        Ok(Internalized {
            public_url: self.objects.public_url(&dest),
            storage_path: dest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchError;
    use crate::record::SyncStatus;
    use crate::storage::memory::MemoryObjectStore;
    use crate::transcode::PassthroughTranscoder;
    use async_trait::async_trait;

    struct StaticFetcher(Vec<u8>);

    #[async_trait]
    impl RemoteFetcher for StaticFetcher {
        async fn fetch(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
            Ok(self.0.clone())
        }
    }

    struct DeadFetcher;

    #[async_trait]
    impl RemoteFetcher for DeadFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            Err(FetchError::Network {
                url: url.to_string(),
                reason: "connection timed out".to_string(),
            })
        }
    }

    async fn harness(fetcher: Arc<dyn RemoteFetcher>) -> (Internalizer, Arc<RecordStore>, Arc<MemoryObjectStore>) {
        let records = Arc::new(RecordStore::new("sqlite::memory:").await.unwrap());
        let objects = Arc::new(MemoryObjectStore::new("product-images", "storage.local"));
        let worker = Internalizer::new(
            records.clone(),
            objects.clone(),
            fetcher,
            Arc::new(PassthroughTranscoder),
        );
        (worker, records, objects)
    }

    fn pending_product() -> Product {
        let mut p = Product::new("owner-a", "REF-1");
        p.external_image_url = Some("https://cdn.fornecedor.com/img.jpg".to_string());
        p
    }

    #[tokio::test]
    async fn test_happy_path_marks_synced_and_uploads() {
        let (worker, records, objects) =
            harness(Arc::new(StaticFetcher(b"jpeg-bytes".to_vec()))).await;
        let product = pending_product();
        records.insert_product(&product).await.unwrap();

        let done = worker.internalize_product(&product).await.unwrap().unwrap();
        assert_eq!(done.storage_path, format!("owner-a/products/{}.jpg", product.id));
        assert!(done.public_url.contains("storage.local"));

        let row = records.get_product(&product.id).await.unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Synced);
        assert_eq!(row.image_path.as_deref(), Some(done.storage_path.as_str()));
        assert_eq!(row.image_url.as_deref(), Some(done.public_url.as_str()));
        // Original external URL preserved for audit
        assert_eq!(
            row.external_image_url.as_deref(),
            Some("https://cdn.fornecedor.com/img.jpg")
        );

        assert_eq!(objects.download(&done.storage_path).await.unwrap(), b"jpeg-bytes");
    }

    #[tokio::test]
    async fn test_fetch_failure_marks_failed_without_partial_writes() {
        let (worker, records, objects) = harness(Arc::new(DeadFetcher)).await;
        let product = pending_product();
        records.insert_product(&product).await.unwrap();

        let err = worker.internalize_product(&product).await.unwrap_err();
        assert!(matches!(err, SyncError::Network(_)));

        let row = records.get_product(&product.id).await.unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Failed);
        assert!(row.sync_error.as_deref().unwrap().contains("connection timed out"));
        assert!(row.image_path.is_none());
        assert!(objects.is_empty());
    }

    #[tokio::test]
    async fn test_blank_source_is_terminal_success() {
        let (worker, records, _objects) =
            harness(Arc::new(StaticFetcher(Vec::new()))).await;
        let mut product = Product::new("owner-a", "REF-EMPTY");
        product.external_image_url = Some("".to_string());
        records.insert_product(&product).await.unwrap();

        let result = worker.internalize_product(&product).await.unwrap();
        assert!(result.is_none());

        let row = records.get_product(&product.id).await.unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Synced);
        assert_eq!(row.sync_error.as_deref(), Some("URL não fornecida"));
    }

    #[tokio::test]
    async fn test_retry_absorbs_already_existing_destination() {
        let (worker, records, objects) =
            harness(Arc::new(StaticFetcher(b"bytes".to_vec()))).await;
        let product = pending_product();
        records.insert_product(&product).await.unwrap();

        // A previous partially-completed attempt already uploaded
        let dest = object_key("owner-a", AssetKind::Product, &product.id, "jpg");
        objects.upload(&dest, b"bytes", false).await.unwrap();

        let done = worker.internalize_product(&product).await.unwrap().unwrap();
        assert_eq!(done.storage_path, dest);

        let row = records.get_product(&product.id).await.unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Synced);
        assert_eq!(objects.len(), 1);
    }

    #[tokio::test]
    async fn test_gallery_image_internalization() {
        let (worker, records, _objects) =
            harness(Arc::new(StaticFetcher(b"gallery-bytes".to_vec()))).await;
        let image = ProductImage::new("prod-1", "https://cdn.example.com/g.jpg", 0);
        records.insert_image(&image).await.unwrap();

        let done = worker
            .internalize_gallery_image(&image, "owner-a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.storage_path, format!("owner-a/gallery/{}.jpg", image.id));

        let row = records.get_image(&image.id).await.unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Synced);
        assert_eq!(row.optimized_url.as_deref(), Some(done.public_url.as_str()));
    }
}
