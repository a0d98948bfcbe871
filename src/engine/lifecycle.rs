//! Engine lifecycle: start, worker pool, shutdown.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::clone::CatalogCloner;
use crate::db::RecordStore;
use crate::deleter::SafeDeleter;
use crate::error::SyncError;
use crate::fetch::HttpFetcher;
use crate::fork::{CowForker, ForkTarget};
use crate::metrics;
use crate::reconcile::Reconciler;
use crate::record::{JobStatus, Product};
use crate::storage::http::HttpObjectStore;
use crate::storage::memory::MemoryObjectStore;
use crate::storage::traits::ObjectStore;
use crate::transcode::StandardTranscoder;
use crate::worker::Internalizer;

use super::types::{EngineState, WorkRequest};
use super::{ImageSyncEngine, Pipeline, SharedWorkRx};

impl ImageSyncEngine {
    /// Connect backends and spawn the worker pool.
    ///
    /// Startup order: datastore first (it is the source of truth and
    /// `start` must fail fast on a bad connection string), then object
    /// storage, then the pool.
    #[tracing::instrument(skip(self))]
    pub async fn start(&mut self) -> Result<(), SyncError> {
        info!("starting image sync engine...");
        let _ = self.state.send(EngineState::Connecting);

        let sql_url = self
            .config
            .sql_url
            .clone()
            .ok_or_else(|| SyncError::Validation("sql_url é obrigatório".to_string()))?;

        let records = Arc::new(RecordStore::new(&sql_url).await?);
        info!("datastore connected");

        let objects: Arc<dyn ObjectStore> = if let Some(objects) = self.object_store_override.take()
        {
            objects
        } else if let Some(ref storage_url) = self.config.storage_url {
            Arc::new(HttpObjectStore::new(
                storage_url.clone(),
                self.config.storage_bucket.clone(),
                self.config.storage_service_key.clone().unwrap_or_default(),
                Duration::from_secs(self.config.fetch_timeout_secs),
            )?)
        } else {
            info!("no storage_url configured - using in-memory object store");
            Arc::new(MemoryObjectStore::new(
                self.config.storage_bucket.clone(),
                self.config.managed_host.clone(),
            ))
        };

        let fetcher = match self.fetcher_override.take() {
            Some(fetcher) => fetcher,
            None => Arc::new(
                HttpFetcher::new(Duration::from_secs(self.config.fetch_timeout_secs))
                    .map_err(|e| SyncError::Network(e.to_string()))?,
            ),
        };

        let transcoder = self
            .transcoder_override
            .take()
            .unwrap_or_else(|| Arc::new(StandardTranscoder::new(self.config.max_image_dimension)));

        let internalizer = Arc::new(Internalizer::new(
            records.clone(),
            objects.clone(),
            fetcher,
            transcoder,
        ));

        let pipeline = Arc::new(Pipeline {
            internalizer,
            deleter: SafeDeleter::new(records.clone(), objects.clone()),
            reconciler: Reconciler::new(records.clone(), objects.clone()),
            forker: CowForker::new(records.clone(), objects.clone()),
            cloner: CatalogCloner::new(records.clone()),
            records,
            objects,
            managed_host: self.config.managed_host.clone(),
            chunk_size: self.config.chunk_size.max(1),
            item_concurrency: self.config.item_concurrency.max(1),
            image_concurrency: self.config.image_concurrency.max(1),
        });
        let _ = self.state.send(EngineState::Ready);

        let (work_tx, work_rx) = mpsc::channel(self.config.queue_capacity);
        let shared_rx: SharedWorkRx = Arc::new(Mutex::new(work_rx));

        for worker_id in 0..self.config.worker_count.max(1) {
            let pipeline = pipeline.clone();
            let rx = shared_rx.clone();
            self.worker_handles.push(tokio::spawn(async move {
                worker_loop(worker_id, pipeline, rx).await;
            }));
        }

        self.pipeline = Some(pipeline);
        self.work_tx = Some(work_tx);
        let _ = self.state.send(EngineState::Running);
        info!(workers = self.config.worker_count, "engine running");
        Ok(())
    }

    /// Graceful shutdown: close the queue and wait for the pool to drain.
    pub async fn shutdown(&mut self) {
        let _ = self.state.send(EngineState::ShuttingDown);

        // Closing the sender lets workers finish queued requests then exit
        self.work_tx = None;

        for handle in self.worker_handles.drain(..) {
            if let Err(err) = handle.await {
                warn!(error = %err, "worker task ended abnormally");
            }
        }
        info!("engine shut down");
    }
}

/// One pool worker: pull requests until the queue closes.
async fn worker_loop(worker_id: usize, pipeline: Arc<Pipeline>, rx: SharedWorkRx) {
    debug!(worker_id, "worker started");
    loop {
        let request = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        match request {
            Some(request) => pipeline.handle(request).await,
            None => break,
        }
    }
    debug!(worker_id, "worker stopped");
}

impl Pipeline {
    /// Dispatch one queued request. Errors are logged and recorded on the
    /// affected rows; a worker never dies because one request failed.
    pub(super) async fn handle(&self, request: WorkRequest) {
        match request {
            WorkRequest::SyncRequested {
                owner_id,
                job_id,
                filters,
            } => {
                if let Err(err) = self.run_sync_job(&owner_id, &job_id, filters.brand.as_deref()).await
                {
                    error!(job_id = %job_id, error = %err, "sync job failed");
                    if let Err(err) = self.records.set_job_status(&job_id, JobStatus::Failed).await {
                        error!(job_id = %job_id, error = %err, "could not record job failure");
                    }
                }
            }
            WorkRequest::CowForkRequested {
                source_path,
                target_owner_id,
                target,
            } => {
                if let Err(err) = self.forker.fork(&source_path, &target_owner_id, &target).await {
                    error!(source = %source_path, error = %err, "copy-on-write fork failed");
                }
            }
            WorkRequest::CopyBrandRequested {
                source_path,
                target_owner_id,
                brand_id,
                asset_kind,
            } => {
                let target = ForkTarget::BrandAsset {
                    brand_id: format!("{}-{}", brand_id, asset_kind),
                };
                if let Err(err) = self.forker.fork(&source_path, &target_owner_id, &target).await {
                    error!(source = %source_path, error = %err, "brand copy failed");
                }
            }
        }
    }

    /// Drive one owner's backlog in bounded chunks, updating job progress
    /// as chunks finish.
    async fn run_sync_job(
        &self,
        owner_id: &str,
        job_id: &str,
        brand: Option<&str>,
    ) -> Result<(), SyncError> {
        info!(job_id, owner_id, "sync job started");
        let mut last_chunk_ids: HashSet<String> = HashSet::new();

        loop {
            let chunk = self
                .records
                .select_pending_products(owner_id, brand, self.chunk_size)
                .await?;
            if chunk.is_empty() {
                break;
            }

            // A chunk whose every row was already seen means the rows are
            // stuck in pending (a record update keeps failing); bail out
            // instead of spinning.
            let ids: HashSet<String> = chunk.iter().map(|p| p.id.clone()).collect();
            if ids.is_subset(&last_chunk_ids) {
                warn!(job_id, stuck = ids.len(), "backlog is not making progress, stopping job");
                self.records.set_job_status(job_id, JobStatus::Failed).await?;
                return Ok(());
            }
            last_chunk_ids = ids;

            let chunk_len = chunk.len();
            let limiter = Arc::new(Semaphore::new(self.item_concurrency));
            let mut in_flight = JoinSet::new();

            for product in chunk {
                let internalizer = self.internalizer.clone();
                let records = self.records.clone();
                let image_concurrency = self.image_concurrency;
                let limiter = limiter.clone();
                in_flight.spawn(async move {
                    let Ok(_permit) = limiter.acquire_owned().await else {
                        return;
                    };
                    process_product(internalizer, records, image_concurrency, product).await;
                });
            }
            while in_flight.join_next().await.is_some() {}

            self.records
                .increment_job_completed(job_id, chunk_len as i64)
                .await?;
        }

        self.records.set_job_status(job_id, JobStatus::Done).await?;
        info!(job_id, "sync job done");
        Ok(())
    }

    pub(super) fn queue_depth_metric(&self, capacity: usize, available: usize) {
        metrics::set_queue_depth(capacity.saturating_sub(available));
    }
}

/// One batch item: the product's primary image, then its pending gallery
/// rows with their own concurrency bound. Failures are recorded on the
/// individual rows and never abort the batch.
async fn process_product(
    internalizer: Arc<Internalizer>,
    records: Arc<RecordStore>,
    image_concurrency: usize,
    product: Product,
) {
    if let Err(err) = internalizer.internalize_product(&product).await {
        // Already recorded on the row; the batch carries on
        debug!(product_id = %product.id, error = %err, "item failed, continuing batch");
    }

    let images = match records.pending_images_for_product(&product.id).await {
        Ok(images) => images,
        Err(err) => {
            warn!(product_id = %product.id, error = %err, "could not load gallery backlog");
            return;
        }
    };
    if images.is_empty() {
        return;
    }

    let limiter = Arc::new(Semaphore::new(image_concurrency));
    let mut in_flight = JoinSet::new();
    for image in images {
        let internalizer = internalizer.clone();
        let limiter = limiter.clone();
        let owner_id = product.owner_id.clone();
        in_flight.spawn(async move {
            let Ok(_permit) = limiter.acquire_owned().await else {
                return;
            };
            if let Err(err) = internalizer.internalize_gallery_image(&image, &owner_id).await {
                debug!(image_id = %image.id, error = %err, "gallery item failed, continuing");
            }
        });
    }
    while in_flight.join_next().await.is_some() {}
}
