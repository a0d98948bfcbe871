use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{ObjectInfo, ObjectStore, StorageError};

/// In-memory object store over a concurrent map.
///
/// Used by tests and single-node installs. Public URLs are constructed
/// against the configured managed host so the classifier recognizes them
/// as internal.
pub struct MemoryObjectStore {
    bucket: String,
    managed_host: String,
    data: DashMap<String, Vec<u8>>,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new(bucket: impl Into<String>, managed_host: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            managed_host: managed_host.into(),
            data: DashMap::new(),
        }
    }

    /// Current object count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&self) {
        self.data.clear();
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, path: &str, bytes: &[u8], upsert: bool) -> Result<(), StorageError> {
        if !upsert && self.data.contains_key(path) {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }
        self.data.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.data
            .get(path)
            .map(|r| r.value().clone())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        let mut entries: Vec<ObjectInfo> = self
            .data
            .iter()
            .filter(|r| r.key().starts_with(prefix))
            .map(|r| ObjectInfo {
                name: r.key().clone(),
                size: r.value().len() as u64,
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn delete(&self, paths: &[String]) -> Result<(), StorageError> {
        for path in paths {
            self.data.remove(path);
        }
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "https://{}/storage/v1/object/public/{}/{}",
            self.managed_host, self.bucket, path
        )
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryObjectStore {
        MemoryObjectStore::new("product-images", "storage.local")
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let store = store();
        store.upload("t/products/p.jpg", b"bytes", false).await.unwrap();

        let bytes = store.download("t/products/p.jpg").await.unwrap();
        assert_eq!(bytes, b"bytes");
    }

    #[tokio::test]
    async fn test_upload_no_upsert_conflicts() {
        let store = store();
        store.upload("k", b"first", false).await.unwrap();

        let err = store.upload("k", b"second", false).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));

        // Original bytes untouched
        assert_eq!(store.download("k").await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_upload_upsert_overwrites() {
        let store = store();
        store.upload("k", b"first", false).await.unwrap();
        store.upload("k", b"second", true).await.unwrap();
        assert_eq!(store.download("k").await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_download_missing_is_not_found() {
        let err = store().download("nope").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let store = store();
        store.upload("a/1.jpg", b"x", false).await.unwrap();
        store.upload("a/2.jpg", b"x", false).await.unwrap();
        store.upload("b/3.jpg", b"x", false).await.unwrap();

        let all = store.list("").await.unwrap();
        assert_eq!(all.len(), 3);

        let a_only = store.list("a/").await.unwrap();
        assert_eq!(a_only.len(), 2);
        assert_eq!(a_only[0].name, "a/1.jpg");
    }

    #[tokio::test]
    async fn test_delete_batch_ignores_missing() {
        let store = store();
        store.upload("keep", b"x", false).await.unwrap();
        store.upload("drop", b"x", false).await.unwrap();

        store
            .delete(&["drop".to_string(), "never-existed".to_string()])
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.download("keep").await.is_ok());
    }

    #[test]
    fn test_public_url_resolves_through_managed_host() {
        let url = store().public_url("t/products/p.jpg");
        assert_eq!(
            url,
            "https://storage.local/storage/v1/object/public/product-images/t/products/p.jpg"
        );
    }
}
