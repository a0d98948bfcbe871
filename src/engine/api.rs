//! Public engine API: ingestion, batch triggers, forks, clones, cleanup.
//!
//! Every method here is request-facing and returns quickly; multi-second
//! work goes through the dispatch queue to the worker pool.

use tracing::{info, warn};

use crate::clone::CloneOutcome;
use crate::deleter::DeleteOutcome;
use crate::error::SyncError;
use crate::fork::{ForkResult, ForkTarget};
use crate::ingest::classify;
use crate::reconcile::{public_url_to_key, CleanupReport};
use crate::record::{now_ms, Product, ProductImage, StagingImage, SyncJob, SyncStatus};
use crate::worker::Internalized;

use super::types::{SyncFilters, WorkRequest};
use super::{ImageSyncEngine, Pipeline};

use std::sync::Arc;

impl ImageSyncEngine {
    fn pipeline(&self) -> Result<&Arc<Pipeline>, SyncError> {
        self.pipeline
            .as_ref()
            .ok_or_else(|| SyncError::Dispatch("engine não iniciado".to_string()))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Ingestion
    // ═══════════════════════════════════════════════════════════════════

    /// Create a product, classifying its image source to decide the
    /// initial sync state. Only an external http(s) URL enqueues work; a
    /// blank or already-internal source is terminal success on arrival.
    pub async fn add_product(
        &self,
        owner_id: &str,
        reference_code: &str,
        name: &str,
        brand: &str,
        image_url: Option<&str>,
        gallery_urls: &[String],
    ) -> Result<Product, SyncError> {
        let pipeline = self.pipeline()?;

        let mut product = Product::new(owner_id, reference_code);
        product.name = name.to_string();
        product.brand = brand.to_string();
        product.gallery_urls = gallery_urls.to_vec();

        let classification = classify(image_url, &pipeline.managed_host);
        product.sync_status = classification.status;
        product.sync_error = classification.error;
        match classification.status {
            SyncStatus::Pending => {
                product.external_image_url = classification.url.clone();
                product.image_url = classification.url;
            }
            SyncStatus::Synced => {
                if let Some(url) = classification.url {
                    // Already internal: record both the URL and its bare key
                    product.image_path =
                        Some(public_url_to_key(&url, pipeline.objects.bucket()));
                    product.image_url = Some(url);
                }
            }
            SyncStatus::Failed => {}
        }

        pipeline.records.insert_product(&product).await?;

        for (position, url) in gallery_urls.iter().enumerate() {
            let image = self.build_gallery_row(&product.id, url, position as i32)?;
            pipeline.records.insert_image(&image).await?;
        }

        Ok(product)
    }

    /// Append one gallery image to an existing product.
    pub async fn add_gallery_image(
        &self,
        product_id: &str,
        url: &str,
        position: i32,
    ) -> Result<ProductImage, SyncError> {
        let pipeline = self.pipeline()?;
        if pipeline.records.get_product(product_id).await?.is_none() {
            return Err(SyncError::Validation(format!(
                "produto não encontrado: {}",
                product_id
            )));
        }

        let image = self.build_gallery_row(product_id, url, position)?;
        pipeline.records.insert_image(&image).await?;
        Ok(image)
    }

    fn build_gallery_row(
        &self,
        product_id: &str,
        url: &str,
        position: i32,
    ) -> Result<ProductImage, SyncError> {
        let pipeline = self.pipeline()?;
        let mut image = ProductImage::new(product_id, url, position);

        let classification = classify(Some(url), &pipeline.managed_host);
        image.sync_status = classification.status;
        image.sync_error = classification.error;
        if classification.status == SyncStatus::Synced {
            if let Some(url) = classification.url {
                image.storage_path = Some(public_url_to_key(&url, pipeline.objects.bucket()));
                image.optimized_url = Some(url);
            }
        }
        Ok(image)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Batch sync
    // ═══════════════════════════════════════════════════════════════════

    /// Create a job row for the owner's pending backlog and enqueue the
    /// work, returning the job handle immediately. Job-level failure is
    /// reported only when the dispatch itself cannot be scheduled.
    pub async fn request_sync(
        &self,
        owner_id: &str,
        filters: SyncFilters,
    ) -> Result<SyncJob, SyncError> {
        let pipeline = self.pipeline()?;
        let tx = self
            .work_tx
            .as_ref()
            .ok_or_else(|| SyncError::Dispatch("fila encerrada".to_string()))?;

        let total = pipeline
            .records
            .count_pending_products(owner_id, filters.brand.as_deref())
            .await?;
        let job = pipeline.records.create_job(owner_id, total).await?;
        pipeline.queue_depth_metric(self.config.queue_capacity, tx.capacity());

        let request = WorkRequest::SyncRequested {
            owner_id: owner_id.to_string(),
            job_id: job.id.clone(),
            filters,
        };
        if let Err(err) = tx.try_send(request) {
            pipeline
                .records
                .set_job_status(&job.id, crate::record::JobStatus::Failed)
                .await?;
            return Err(SyncError::Dispatch(err.to_string()));
        }

        info!(job_id = %job.id, owner_id, total, "sync requested");
        Ok(job)
    }

    /// Current job progress, for polling UIs.
    pub async fn job(&self, job_id: &str) -> Result<Option<SyncJob>, SyncError> {
        Ok(self.pipeline()?.records.get_job(job_id).await?)
    }

    /// Load one product row.
    pub async fn product(&self, product_id: &str) -> Result<Option<Product>, SyncError> {
        Ok(self.pipeline()?.records.get_product(product_id).await?)
    }

    /// Load a product's gallery rows, ordered by position.
    pub async fn product_gallery(&self, product_id: &str) -> Result<Vec<ProductImage>, SyncError> {
        Ok(self.pipeline()?.records.images_for_product(product_id).await?)
    }

    /// List an owner's products, optionally restricted to one brand.
    pub async fn products(
        &self,
        owner_id: &str,
        brand: Option<&str>,
    ) -> Result<Vec<Product>, SyncError> {
        Ok(self.pipeline()?.records.products_by_brand(owner_id, brand).await?)
    }

    /// Internalize one product (and its pending gallery rows) inline,
    /// bypassing the queue. Administrative single-entity reprocessing.
    pub async fn sync_product_now(
        &self,
        product_id: &str,
    ) -> Result<Option<Internalized>, SyncError> {
        let pipeline = self.pipeline()?;
        let product = pipeline
            .records
            .get_product(product_id)
            .await?
            .ok_or_else(|| {
                SyncError::Validation(format!("produto não encontrado: {}", product_id))
            })?;

        let result = pipeline.internalizer.internalize_product(&product).await?;

        for image in pipeline.records.pending_images_for_product(product_id).await? {
            if let Err(err) = pipeline
                .internalizer
                .internalize_gallery_image(&image, &product.owner_id)
                .await
            {
                warn!(image_id = %image.id, error = %err, "gallery reprocess failed");
            }
        }
        Ok(result)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Reprocessing resets
    // ═══════════════════════════════════════════════════════════════════

    /// Put one entity back into the backlog.
    pub async fn reset_product(&self, product_id: &str) -> Result<(), SyncError> {
        Ok(self.pipeline()?.records.mark_product_pending(product_id).await?)
    }

    /// Put every failed product of an owner back into the backlog.
    pub async fn reset_failed(&self, owner_id: &str) -> Result<u64, SyncError> {
        Ok(self.pipeline()?.records.reset_failed_products(owner_id).await?)
    }

    /// Put a whole brand back into the backlog.
    pub async fn reset_brand(&self, owner_id: &str, brand: &str) -> Result<u64, SyncError> {
        Ok(self
            .pipeline()?
            .records
            .reset_brand_products(owner_id, brand)
            .await?)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Copy-on-write forks
    // ═══════════════════════════════════════════════════════════════════

    /// Enqueue a copy-on-write fork.
    pub fn request_fork(
        &self,
        source_path: &str,
        target_owner_id: &str,
        target: ForkTarget,
    ) -> Result<(), SyncError> {
        self.enqueue(WorkRequest::CowForkRequested {
            source_path: source_path.to_string(),
            target_owner_id: target_owner_id.to_string(),
            target,
        })
    }

    /// Enqueue a brand-asset copy.
    pub fn request_brand_copy(
        &self,
        source_path: &str,
        target_owner_id: &str,
        brand_id: &str,
        asset_kind: &str,
    ) -> Result<(), SyncError> {
        self.enqueue(WorkRequest::CopyBrandRequested {
            source_path: source_path.to_string(),
            target_owner_id: target_owner_id.to_string(),
            brand_id: brand_id.to_string(),
            asset_kind: asset_kind.to_string(),
        })
    }

    /// Fork inline, returning the destination.
    pub async fn fork_now(
        &self,
        source_path: &str,
        target_owner_id: &str,
        target: &ForkTarget,
    ) -> Result<ForkResult, SyncError> {
        self.pipeline()?
            .forker
            .fork(source_path, target_owner_id, target)
            .await
    }

    fn enqueue(&self, request: WorkRequest) -> Result<(), SyncError> {
        let tx = self
            .work_tx
            .as_ref()
            .ok_or_else(|| SyncError::Dispatch("fila encerrada".to_string()))?;
        tx.try_send(request)
            .map_err(|err| SyncError::Dispatch(err.to_string()))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Catalog clone
    // ═══════════════════════════════════════════════════════════════════

    pub async fn clone_catalog(
        &self,
        source_owner_id: &str,
        target_owner_id: &str,
        brand: Option<&str>,
    ) -> Result<CloneOutcome, SyncError> {
        self.pipeline()?
            .cloner
            .clone_catalog(source_owner_id, target_owner_id, brand)
            .await
    }

    pub async fn undo_clone(
        &self,
        source_owner_id: &str,
        target_owner_id: &str,
        brand: Option<&str>,
    ) -> Result<u64, SyncError> {
        self.pipeline()?
            .cloner
            .undo_clone(source_owner_id, target_owner_id, brand)
            .await
    }

    // ═══════════════════════════════════════════════════════════════════
    // Storage hygiene
    // ═══════════════════════════════════════════════════════════════════

    /// Current orphan list, computed fresh; storage untouched.
    pub async fn find_orphans(&self) -> Result<Vec<String>, SyncError> {
        self.pipeline()?.reconciler.find_orphans().await
    }

    /// Reconcile the bucket (dry-run or live).
    pub async fn cleanup_storage(&self, dry_run: bool) -> Result<CleanupReport, SyncError> {
        self.pipeline()?.reconciler.cleanup(dry_run).await
    }

    /// Reference-counted delete of one path.
    pub async fn safe_delete(&self, path: &str) -> Result<DeleteOutcome, SyncError> {
        Ok(self.pipeline()?.deleter.safe_delete(path).await)
    }

    /// Reference-counted delete of a batch, one outcome per path.
    pub async fn safe_delete_paths(
        &self,
        paths: &[String],
    ) -> Result<Vec<DeleteOutcome>, SyncError> {
        Ok(self.pipeline()?.deleter.safe_delete_all(paths).await)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Staging uploads
    // ═══════════════════════════════════════════════════════════════════

    /// Register an upload not yet linked to any product.
    pub async fn create_staging_image(
        &self,
        owner_id: &str,
        storage_path: &str,
    ) -> Result<StagingImage, SyncError> {
        let pipeline = self.pipeline()?;
        let staging = StagingImage::new(owner_id, storage_path);
        pipeline.records.insert_staging(&staging).await?;
        Ok(staging)
    }

    /// Link a staged upload to a product: the storage path moves into a
    /// new gallery row and the staging row is consumed.
    pub async fn consume_staging_image(
        &self,
        staging_id: &str,
        product_id: &str,
        position: i32,
    ) -> Result<ProductImage, SyncError> {
        let pipeline = self.pipeline()?;
        let staging = pipeline
            .records
            .get_staging(staging_id)
            .await?
            .ok_or_else(|| {
                SyncError::Validation(format!("upload não encontrado: {}", staging_id))
            })?;

        let public_url = pipeline.objects.public_url(&staging.storage_path);
        let mut image = ProductImage::new(product_id, public_url.clone(), position);
        image.storage_path = Some(staging.storage_path.clone());
        image.optimized_url = Some(public_url);
        image.sync_status = SyncStatus::Synced;
        pipeline.records.insert_image(&image).await?;
        pipeline.records.delete_staging(staging_id).await?;
        Ok(image)
    }

    /// Expire staged uploads older than `max_age_ms`: rows removed first,
    /// then the now-unreferenced objects safe-deleted. Returns rows
    /// expired.
    pub async fn expire_staging_images(
        &self,
        owner_id: &str,
        max_age_ms: i64,
    ) -> Result<usize, SyncError> {
        let pipeline = self.pipeline()?;
        let cutoff = now_ms() - max_age_ms;
        let expired = pipeline.records.staging_older_than(owner_id, cutoff).await?;

        let mut removed = 0;
        for staging in expired {
            pipeline.records.delete_staging(&staging.id).await?;
            let outcome = pipeline.deleter.safe_delete(&staging.storage_path).await;
            if !outcome.success {
                // Referenced elsewhere (consumed concurrently) — the row is
                // gone, the object stays with its surviving owner
                warn!(path = %staging.storage_path, "expired staging object kept: {:?}", outcome.error);
            }
            removed += 1;
        }
        Ok(removed)
    }
}
