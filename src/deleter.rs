//! Reference-counted deletion.
//!
//! A storage object may be shared across tenants (cloned catalogs point at
//! the source owner's objects until a fork). The only safe delete is one
//! that first proves nobody references the path — the count query always
//! runs before the storage call, and there is no other delete path in the
//! pipeline apart from reconciliation (which derives its own liveness set).
//!
//! The check and the delete are two round trips, not one transaction; a
//! reference added in between is an accepted rare race, recovered by the
//! reconciler.

use std::sync::Arc;
use tracing::{info, warn};

use crate::db::RecordStore;
use crate::metrics;
use crate::storage::traits::ObjectStore;

/// Per-path result of a safe-delete request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub path: String,
    pub success: bool,
    pub error: Option<String>,
}

pub struct SafeDeleter {
    records: Arc<RecordStore>,
    objects: Arc<dyn ObjectStore>,
}

impl SafeDeleter {
    pub fn new(records: Arc<RecordStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { records, objects }
    }

    /// Delete `path` from storage iff its reference count is zero.
    ///
    /// A non-zero count is a declined deletion, not a failure — the caller
    /// decides whether to wait or investigate. Infrastructure errors are
    /// folded into the outcome as well so batch callers get one row per
    /// path.
    pub async fn safe_delete(&self, path: &str) -> DeleteOutcome {
        let count = match self.records.reference_count(path).await {
            Ok(count) => count,
            Err(err) => {
                return DeleteOutcome {
                    path: path.to_string(),
                    success: false,
                    error: Some(format!("reference count failed: {}", err)),
                };
            }
        };

        if count > 0 {
            metrics::record_delete_declined();
            warn!(path, references = count, "delete declined, image in use");
            return DeleteOutcome {
                path: path.to_string(),
                success: false,
                error: Some(format!("image in use ({} references)", count)),
            };
        }

        match self.objects.delete(&[path.to_string()]).await {
            Ok(()) => {
                metrics::record_operation("deleter", "safe_delete", "success");
                info!(path, "object deleted");
                DeleteOutcome {
                    path: path.to_string(),
                    success: true,
                    error: None,
                }
            }
            Err(err) => DeleteOutcome {
                path: path.to_string(),
                success: false,
                error: Some(err.to_string()),
            },
        }
    }

    /// Safe-delete a batch of paths, one outcome per path.
    pub async fn safe_delete_all(&self, paths: &[String]) -> Vec<DeleteOutcome> {
        let mut outcomes = Vec::with_capacity(paths.len());
        for path in paths {
            outcomes.push(self.safe_delete(path).await);
        }
        outcomes
    }
}
