// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine coordinator.
//!
//! [`ImageSyncEngine`] ties the pipeline together:
//! - relational records ([`RecordStore`]) — the source of truth,
//! - an object storage backend,
//! - the internalization worker, reference-counted deleter, storage
//!   reconciler, copy-on-write forker, and catalog cloner,
//! - a typed dispatch queue consumed by a fixed worker pool.
//!
//! # Lifecycle
//!
//! ```text
//! Created → Connecting → Ready → Running → ShuttingDown
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use image_sync_engine::{ImageSyncEngine, ImageSyncConfig, EngineState};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = ImageSyncConfig {
//!     sql_url: Some("sqlite:catalog.db".into()),
//!     ..Default::default()
//! };
//! let mut engine = ImageSyncEngine::new(config);
//! assert_eq!(engine.state(), EngineState::Created);
//!
//! engine.start().await.expect("start failed");
//! // ... request_sync / clone_catalog / cleanup_storage ...
//! engine.shutdown().await;
//! # }
//! ```

mod api;
mod lifecycle;
mod types;

pub use types::{EngineState, SyncFilters, WorkRequest};

use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::clone::CatalogCloner;
use crate::config::ImageSyncConfig;
use crate::db::RecordStore;
use crate::deleter::SafeDeleter;
use crate::fetch::RemoteFetcher;
use crate::fork::CowForker;
use crate::reconcile::Reconciler;
use crate::storage::traits::ObjectStore;
use crate::transcode::ImageTranscoder;
use crate::worker::Internalizer;

/// Everything the worker pool and the request API share once the engine
/// is started.
pub(super) struct Pipeline {
    pub(super) records: Arc<RecordStore>,
    pub(super) objects: Arc<dyn ObjectStore>,
    pub(super) internalizer: Arc<Internalizer>,
    pub(super) deleter: SafeDeleter,
    pub(super) reconciler: Reconciler,
    pub(super) forker: CowForker,
    pub(super) cloner: CatalogCloner,
    pub(super) managed_host: String,
    pub(super) chunk_size: usize,
    pub(super) item_concurrency: usize,
    pub(super) image_concurrency: usize,
}

/// Main engine coordinator.
///
/// # Thread Safety
///
/// After `start()`, the public API takes `&self` and is safe for
/// concurrent use; only `start()`/`shutdown()` need `&mut self`.
pub struct ImageSyncEngine {
    pub(super) config: ImageSyncConfig,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,
    pub(super) state_rx: watch::Receiver<EngineState>,

    /// Built by `start()`
    pub(super) pipeline: Option<Arc<Pipeline>>,

    /// Dispatch queue producer; dropped on shutdown to drain the pool
    pub(super) work_tx: Option<mpsc::Sender<WorkRequest>>,

    /// Worker pool handles, awaited on shutdown
    pub(super) worker_handles: Vec<JoinHandle<()>>,

    /// Pre-start overrides (tests, embedders with their own backends)
    pub(super) object_store_override: Option<Arc<dyn ObjectStore>>,
    pub(super) fetcher_override: Option<Arc<dyn RemoteFetcher>>,
    pub(super) transcoder_override: Option<Arc<dyn ImageTranscoder>>,
}

impl ImageSyncEngine {
    /// Create a new engine in `Created` state. Call
    /// [`start()`](Self::start) to connect backends and spawn the pool.
    #[must_use]
    pub fn new(config: ImageSyncConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        Self {
            config,
            state: state_tx,
            state_rx,
            pipeline: None,
            work_tx: None,
            worker_handles: Vec::new(),
            object_store_override: None,
            fetcher_override: None,
            transcoder_override: None,
        }
    }

    /// Use a specific object store instead of the config-selected one.
    /// Must be called before `start()`.
    #[must_use]
    pub fn with_object_store(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.object_store_override = Some(objects);
        self
    }

    /// Use a specific remote fetcher. Must be called before `start()`.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        self.fetcher_override = Some(fetcher);
        self
    }

    /// Use a specific transcoder. Must be called before `start()`.
    #[must_use]
    pub fn with_transcoder(mut self, transcoder: Arc<dyn ImageTranscoder>) -> Self {
        self.transcoder_override = Some(transcoder);
        self
    }

    /// Current engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Watch for state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }
}

/// Shared receiver handed to each pool worker.
pub(super) type SharedWorkRx = Arc<Mutex<mpsc::Receiver<WorkRequest>>>;
