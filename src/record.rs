//! Relational records tracked by the pipeline.
//!
//! These structs mirror the datastore rows one-to-one. The object storage
//! side has no persisted counterpart: an object is live iff at least one
//! `image_path` / `storage_path` field here points at it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current epoch milliseconds, the timestamp unit used across all records.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Fresh UUIDv4 row id.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Per-entity synchronization state.
///
/// `Pending` is the only entry point; every path to `Synced` or `Failed`
/// passes through an internalization attempt. A terminal state returns to
/// `Pending` only via an explicit reprocess (by id, by brand, or all failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Awaiting internalization
    Pending,
    /// Terminal success: the image resolves through managed storage
    /// (or required no internalization at all)
    Synced,
    /// Terminal until retried; carries a human-readable `sync_error`
    Failed,
}

impl SyncStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }

    /// Parse the database representation. Unknown values map to `Pending`
    /// so a row with a corrupted status re-enters the backlog instead of
    /// being silently skipped.
    #[must_use]
    pub fn from_db(s: &str) -> Self {
        match s {
            "synced" => Self::Synced,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregate state of one batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn from_db(s: &str) -> Self {
        match s {
            "done" => Self::Done,
            "failed" => Self::Failed,
            _ => Self::Processing,
        }
    }
}

/// Namespace segment for stored objects, by what the object is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    /// A product's primary image
    Product,
    /// A product gallery image
    Gallery,
    /// A brand asset (logo etc.) — no relational row of its own
    Brand,
}

impl AssetKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "products",
            Self::Gallery => "gallery",
            Self::Brand => "brands",
        }
    }
}

/// Deterministic destination key for a stored object:
/// `{owner}/{kind}/{entity_id}.{ext}`.
///
/// Determinism is what makes retries and concurrent forks idempotent —
/// a second attempt lands on the same key and "already exists" is success.
#[must_use]
pub fn object_key(owner_id: &str, kind: AssetKind, entity_id: &str, ext: &str) -> String {
    format!("{}/{}/{}.{}", owner_id, kind.as_str(), entity_id, ext)
}

/// File extension of a storage key, defaulting to `jpg` when absent.
#[must_use]
pub fn extension_of(path: &str) -> &str {
    match path.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && !ext.contains('/') => ext,
        _ => "jpg",
    }
}

/// A sellable item owned by exactly one tenant.
///
/// Invariant: once `image_path` is non-null, `image_url` resolves through
/// managed storage, never an external host. `external_image_url` keeps the
/// original source for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub owner_id: String,
    pub brand: String,
    /// Natural key, unique per owner; the clone upsert is keyed on it
    pub reference_code: String,
    pub name: String,
    pub image_url: Option<String>,
    /// Managed storage key, set by the internalization worker
    pub image_path: Option<String>,
    pub external_image_url: Option<String>,
    /// Ordered gallery source URLs (JSON array in the datastore)
    pub gallery_urls: Vec<String>,
    pub sync_status: SyncStatus,
    pub sync_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Product {
    /// New product in `Pending` state with generated id and timestamps.
    /// Callers normally go through the ingestor, which decides the real
    /// initial state from the source URL.
    #[must_use]
    pub fn new(owner_id: impl Into<String>, reference_code: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: new_id(),
            owner_id: owner_id.into(),
            brand: String::new(),
            reference_code: reference_code.into(),
            name: String::new(),
            image_url: None,
            image_path: None,
            external_image_url: None,
            gallery_urls: Vec::new(),
            sync_status: SyncStatus::Pending,
            sync_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One image belonging to a product's gallery.
///
/// At most one row per product carries `is_primary` — enforced by
/// convention, not a constraint. `is_shared` marks rows whose
/// `storage_path` still points into another owner's namespace after a
/// catalog clone; a copy-on-write fork clears it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductImage {
    pub id: String,
    pub product_id: String,
    pub url: String,
    pub optimized_url: Option<String>,
    pub storage_path: Option<String>,
    pub position: i32,
    pub is_primary: bool,
    pub is_shared: bool,
    pub sync_status: SyncStatus,
    pub sync_error: Option<String>,
}

impl ProductImage {
    #[must_use]
    pub fn new(product_id: impl Into<String>, url: impl Into<String>, position: i32) -> Self {
        Self {
            id: new_id(),
            product_id: product_id.into(),
            url: url.into(),
            optimized_url: None,
            storage_path: None,
            position,
            is_primary: position == 0,
            is_shared: false,
            sync_status: SyncStatus::Pending,
            sync_error: None,
        }
    }
}

/// A transient upload not yet linked to a product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingImage {
    pub id: String,
    pub owner_id: String,
    pub storage_path: String,
    pub created_at: i64,
}

impl StagingImage {
    #[must_use]
    pub fn new(owner_id: impl Into<String>, storage_path: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            owner_id: owner_id.into(),
            storage_path: storage_path.into(),
            created_at: now_ms(),
        }
    }
}

/// Progress row for one tenant's batch backlog, polled by monitoring UIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: String,
    pub owner_id: String,
    pub total_count: i64,
    pub completed_count: i64,
    pub status: JobStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Audit/mapping row linking a source product to its cloned counterpart.
/// Written once per cloned product, deleted only by undo-clone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogCloneRecord {
    pub id: String,
    pub source_owner_id: String,
    pub target_owner_id: String,
    pub source_product_id: String,
    pub target_product_id: String,
    pub brand: String,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_status_round_trip() {
        for status in [SyncStatus::Pending, SyncStatus::Synced, SyncStatus::Failed] {
            assert_eq!(SyncStatus::from_db(status.as_str()), status);
        }
    }

    #[test]
    fn test_sync_status_unknown_reenters_backlog() {
        assert_eq!(SyncStatus::from_db("garbage"), SyncStatus::Pending);
        assert_eq!(SyncStatus::from_db(""), SyncStatus::Pending);
    }

    #[test]
    fn test_job_status_round_trip() {
        for status in [JobStatus::Processing, JobStatus::Done, JobStatus::Failed] {
            assert_eq!(JobStatus::from_db(status.as_str()), status);
        }
    }

    #[test]
    fn test_object_key_is_deterministic() {
        let a = object_key("tenant-1", AssetKind::Product, "prod-9", "jpg");
        let b = object_key("tenant-1", AssetKind::Product, "prod-9", "jpg");
        assert_eq!(a, b);
        assert_eq!(a, "tenant-1/products/prod-9.jpg");
    }

    #[test]
    fn test_object_key_kind_segments() {
        assert_eq!(
            object_key("t", AssetKind::Gallery, "i", "png"),
            "t/gallery/i.png"
        );
        assert_eq!(
            object_key("t", AssetKind::Brand, "b", "webp"),
            "t/brands/b.webp"
        );
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("t/products/p.png"), "png");
        assert_eq!(extension_of("t/products/p"), "jpg");
        assert_eq!(extension_of("t/pro.ducts/p"), "jpg");
        assert_eq!(extension_of("trailing."), "jpg");
    }

    #[test]
    fn test_new_product_defaults() {
        let p = Product::new("owner-1", "REF-001");
        assert_eq!(p.sync_status, SyncStatus::Pending);
        assert!(p.image_path.is_none());
        assert!(p.sync_error.is_none());
        assert!(p.created_at > 0);
        assert_eq!(p.created_at, p.updated_at);
    }

    #[test]
    fn test_new_product_ids_are_unique() {
        let a = Product::new("o", "r1");
        let b = Product::new("o", "r2");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_first_gallery_image_is_primary() {
        let first = ProductImage::new("prod-1", "https://cdn/img0.jpg", 0);
        let second = ProductImage::new("prod-1", "https://cdn/img1.jpg", 1);
        assert!(first.is_primary);
        assert!(!second.is_primary);
        assert!(!first.is_shared);
    }
}
