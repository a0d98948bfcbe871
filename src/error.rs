//! Pipeline-level error type.

use thiserror::Error;

use crate::db::DbError;
use crate::storage::traits::StorageError;

/// Errors surfaced by pipeline operations.
///
/// Per-item internalization failures are *recorded* on the item (status
/// `failed` + message) and additionally returned as the matching variant;
/// batch runs log them and carry on. `Rollback` and `Dispatch` are
/// request-level rejections and never touch item state.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Malformed input; no automatic retry is scheduled
    #[error("{0}")]
    Validation(String),

    /// Upstream fetch failed (timeout or non-2xx); eligible for reprocess
    #[error("{0}")]
    Network(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Db(#[from] DbError),

    /// Undo requested twice, or the clone mapping is missing
    #[error("{0}")]
    Rollback(String),

    /// The work queue rejected the request (engine stopped or queue full)
    #[error("fila de trabalho indisponível: {0}")]
    Dispatch(String),
}
