//! Public types for the engine coordinator.

use serde::{Deserialize, Serialize};

use crate::fork::ForkTarget;

/// Engine lifecycle state.
///
/// Use [`super::ImageSyncEngine::state()`] to check the current state or
/// [`super::ImageSyncEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Just created, not yet started
    Created,
    /// Connecting to the datastore and object storage
    Connecting,
    /// Backends connected, worker pool not yet running
    Ready,
    /// Worker pool consuming the dispatch queue
    Running,
    /// Graceful shutdown: queue closed, workers draining
    ShuttingDown,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

/// Backlog restriction for a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFilters {
    /// Restrict the run to one brand
    #[serde(default)]
    pub brand: Option<String>,
}

impl SyncFilters {
    #[must_use]
    pub fn brand(brand: impl Into<String>) -> Self {
        Self {
            brand: Some(brand.into()),
        }
    }
}

/// Typed message on the dispatch queue.
///
/// Request handlers only create the job record and enqueue one of these;
/// the worker pool does the actual multi-second work. The queue is
/// in-process — durability of *work* comes from `sync_status = pending`
/// in the datastore, which a restart re-derives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkRequest {
    /// Drive one owner's pending backlog, reporting progress on the job row
    SyncRequested {
        owner_id: String,
        job_id: String,
        filters: SyncFilters,
    },
    /// Copy-on-write fork of one stored object into a new owner namespace
    CowForkRequested {
        source_path: String,
        target_owner_id: String,
        target: ForkTarget,
    },
    /// Fork a brand asset (logo etc.) into a new owner namespace
    CopyBrandRequested {
        source_path: String,
        target_owner_id: String,
        brand_id: String,
        asset_kind: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_state_display() {
        assert_eq!(format!("{}", EngineState::Created), "Created");
        assert_eq!(format!("{}", EngineState::Running), "Running");
        assert_eq!(format!("{}", EngineState::ShuttingDown), "ShuttingDown");
    }

    #[test]
    fn test_work_request_round_trips_as_json() {
        let request = WorkRequest::SyncRequested {
            owner_id: "owner-a".to_string(),
            job_id: "job-1".to_string(),
            filters: SyncFilters::brand("Acme"),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("sync_requested"));
        let back: WorkRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_default_filters_are_unrestricted() {
        assert_eq!(SyncFilters::default().brand, None);
    }
}
