//! # Image Sync Engine
//!
//! Image internalization and copy-on-write storage pipeline for
//! multi-tenant product catalogs.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Ingest Layer                          │
//! │  • classify() decides the initial sync state per URL        │
//! │  • Only external http(s) URLs enqueue work                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Dispatch Queue                          │
//! │  • Typed WorkRequest messages, fixed worker pool            │
//! │  • Durability = pending status in the datastore             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Internalization Worker                      │
//! │  • fetch → transcode → upload → single record update        │
//! │  • Deterministic keys; "already exists" = success           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │            Storage Hygiene & Tenant Operations              │
//! │  • Reference-counted deletes (never remove a shared object) │
//! │  • Reconciler diffs bucket vs. datastore, removes orphans   │
//! │  • Copy-on-write forks, idempotent catalog clones           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use image_sync_engine::{ImageSyncEngine, ImageSyncConfig, SyncFilters};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ImageSyncConfig {
//!         sql_url: Some("sqlite:catalog.db".into()),
//!         ..Default::default()
//!     };
//!
//!     let mut engine = ImageSyncEngine::new(config);
//!     engine.start().await.expect("Failed to start");
//!
//!     // Register a product; an external image URL enters the backlog
//!     let product = engine
//!         .add_product(
//!             "owner-a",
//!             "REF-001",
//!             "Camiseta básica",
//!             "Acme",
//!             Some("https://cdn.fornecedor.com.br/camiseta.jpg"),
//!             &[],
//!         )
//!         .await
//!         .expect("Failed to add product");
//!
//!     // Kick off the batch and poll the job handle
//!     let job = engine
//!         .request_sync("owner-a", SyncFilters::default())
//!         .await
//!         .expect("Failed to request sync");
//!     println!("job {} covers {} items", job.id, job.total_count);
//!     let _ = product;
//!
//!     engine.shutdown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`engine`]: the [`ImageSyncEngine`] coordinator and dispatch queue
//! - [`ingest`]: pure URL classification
//! - [`worker`]: the internalization worker
//! - [`deleter`]: reference-counted deletion
//! - [`reconcile`]: bucket/datastore reconciliation
//! - [`fork`]: copy-on-write forking
//! - [`clone`]: idempotent catalog cloning
//! - [`storage`]: object storage backends (in-memory, HTTP)
//! - [`db`]: relational datastore access
//! - [`resilience`]: retry with exponential backoff
//! - [`metrics`]: backend-agnostic instrumentation

pub mod clone;
pub mod config;
pub mod db;
pub mod deleter;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod fork;
pub mod ingest;
pub mod metrics;
pub mod reconcile;
pub mod record;
pub mod resilience;
pub mod storage;
pub mod transcode;
pub mod worker;

pub use clone::{CatalogCloner, CloneOutcome};
pub use config::ImageSyncConfig;
pub use db::{DbError, RecordStore};
pub use deleter::{DeleteOutcome, SafeDeleter};
pub use engine::{EngineState, ImageSyncEngine, SyncFilters, WorkRequest};
pub use error::SyncError;
pub use fetch::{FetchError, HttpFetcher, RemoteFetcher};
pub use fork::{CowForker, ForkResult, ForkTarget};
pub use ingest::{classify, Classification};
pub use reconcile::{CleanupReport, Reconciler};
pub use record::{
    AssetKind, CatalogCloneRecord, JobStatus, Product, ProductImage, StagingImage, SyncJob,
    SyncStatus,
};
pub use resilience::retry::RetryConfig;
pub use storage::http::HttpObjectStore;
pub use storage::memory::MemoryObjectStore;
pub use storage::traits::{ObjectInfo, ObjectStore, StorageError};
pub use transcode::{ImageTranscoder, PassthroughTranscoder, StandardTranscoder, TranscodedImage};
pub use worker::{Internalized, Internalizer};
