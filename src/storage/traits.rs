use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    /// Upload hit an existing object with upsert disabled. Callers in this
    /// pipeline treat this as success: a previous or concurrent attempt
    /// already completed the same work.
    #[error("object already exists: {0}")]
    AlreadyExists(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// One entry from a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Bucket-relative key
    pub name: String,
    pub size: u64,
}

impl ObjectInfo {
    /// Directory placeholders show up in listings but are not objects the
    /// reconciler may delete.
    #[must_use]
    pub fn is_directory_marker(&self) -> bool {
        self.name.ends_with('/') || self.name.ends_with(".emptyFolderPlaceholder")
    }
}

/// Content-addressable-by-path blob store, scoped to a single bucket at
/// construction.
///
/// Implementations: [`super::memory::MemoryObjectStore`] (tests, single
/// node) and [`super::http::HttpObjectStore`] (storage service REST API).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` at `path`. With `upsert = false` an existing object
    /// yields [`StorageError::AlreadyExists`] and is left untouched.
    async fn upload(&self, path: &str, bytes: &[u8], upsert: bool) -> Result<(), StorageError>;

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// List every object under `prefix` (pass `""` for the whole bucket).
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError>;

    /// Remove the given paths in one batch call. Missing paths are not an
    /// error.
    async fn delete(&self, paths: &[String]) -> Result<(), StorageError>;

    /// Public URL for an object path. Pure string construction, no I/O.
    fn public_url(&self, path: &str) -> String;

    fn bucket(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_marker_detection() {
        let dir = ObjectInfo { name: "tenant-1/products/".to_string(), size: 0 };
        let placeholder = ObjectInfo {
            name: "tenant-1/.emptyFolderPlaceholder".to_string(),
            size: 0,
        };
        let object = ObjectInfo { name: "tenant-1/products/p.jpg".to_string(), size: 42 };

        assert!(dir.is_directory_marker());
        assert!(placeholder.is_directory_marker());
        assert!(!object.is_directory_marker());
    }
}
