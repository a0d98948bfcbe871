// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP object-storage backend.
//!
//! Speaks the storage service's REST dialect: object upload/download under
//! `/storage/v1/object/{bucket}/{path}`, JSON list endpoint with offset
//! pagination, batch delete, and unauthenticated public URLs.
//!
//! Upload conflicts (the service answers 409, or 400 with a duplicate
//! marker) map to [`StorageError::AlreadyExists`] so callers can absorb
//! them as idempotent success.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::traits::{ObjectInfo, ObjectStore, StorageError};
use crate::resilience::retry::{retry, RetryConfig};

/// Page size for the list endpoint; the reconciler walks offsets until a
/// short page comes back.
const LIST_PAGE: usize = 1000;

pub struct HttpObjectStore {
    base_url: String,
    bucket: String,
    service_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    name: String,
    #[serde(default)]
    metadata: Option<ListMetadata>,
}

#[derive(Debug, Deserialize)]
struct ListMetadata {
    #[serde(default)]
    size: u64,
}

impl HttpObjectStore {
    pub fn new(
        base_url: impl Into<String>,
        bucket: impl Into<String>,
        service_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Backend(format!("http client init: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            service_key: service_key.into(),
            client,
        })
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path)
    }

    async fn list_page(&self, prefix: &str, offset: usize) -> Result<Vec<ObjectInfo>, StorageError> {
        let url = format!("{}/storage/v1/object/list/{}", self.base_url, self.bucket);
        let body = json!({
            "prefix": prefix,
            "limit": LIST_PAGE,
            "offset": offset,
            "sortBy": { "column": "name", "order": "asc" },
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.service_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("list: {}", e)))?;

        if !response.status().is_success() {
            return Err(StorageError::Backend(format!(
                "list returned {}",
                response.status()
            )));
        }

        let entries: Vec<ListEntry> = response
            .json()
            .await
            .map_err(|e| StorageError::Backend(format!("list decode: {}", e)))?;

        Ok(entries
            .into_iter()
            .map(|e| ObjectInfo {
                size: e.metadata.as_ref().map_or(0, |m| m.size),
                name: e.name,
            })
            .collect())
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upload(&self, path: &str, bytes: &[u8], upsert: bool) -> Result<(), StorageError> {
        let response = self
            .client
            .post(self.object_url(path))
            .bearer_auth(&self.service_key)
            .header("x-upsert", if upsert { "true" } else { "false" })
            .header("content-type", "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("upload: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            debug!(path, bytes = bytes.len(), "object uploaded");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 409 || body.contains("Duplicate") {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }
        Err(StorageError::Backend(format!(
            "upload returned {}: {}",
            status, body
        )))
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let path_owned = path.to_string();
        retry("storage_download", &RetryConfig::query(), || async {
            let response = self
                .client
                .get(self.object_url(&path_owned))
                .bearer_auth(&self.service_key)
                .send()
                .await
                .map_err(|e| StorageError::Backend(format!("download: {}", e)))?;

            match response.status().as_u16() {
                200 => response
                    .bytes()
                    .await
                    .map(|b| b.to_vec())
                    .map_err(|e| StorageError::Backend(format!("download body: {}", e))),
                404 | 400 => Err(StorageError::NotFound(path_owned.clone())),
                status => Err(StorageError::Backend(format!("download returned {}", status))),
            }
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        let mut all = Vec::new();
        let mut offset = 0;
        loop {
            let prefix_owned = prefix.to_string();
            let page = retry("storage_list", &RetryConfig::query(), || {
                let prefix = prefix_owned.clone();
                async move { self.list_page(&prefix, offset).await }
            })
            .await?;

            let page_len = page.len();
            all.extend(page);
            if page_len < LIST_PAGE {
                return Ok(all);
            }
            offset += page_len;
        }
    }

    async fn delete(&self, paths: &[String]) -> Result<(), StorageError> {
        if paths.is_empty() {
            return Ok(());
        }

        let url = format!("{}/storage/v1/object/{}", self.base_url, self.bucket);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.service_key)
            .json(&json!({ "prefixes": paths }))
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("delete: {}", e)))?;

        if !response.status().is_success() {
            return Err(StorageError::Backend(format!(
                "delete returned {}",
                response.status()
            )));
        }
        debug!(count = paths.len(), "objects deleted");
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> HttpObjectStore {
        HttpObjectStore::new(
            "https://abc123.storage.local/",
            "product-images",
            "service-key",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_base_url_trailing_slash_is_stripped() {
        let store = store();
        assert_eq!(
            store.object_url("t/p.jpg"),
            "https://abc123.storage.local/storage/v1/object/product-images/t/p.jpg"
        );
    }

    #[test]
    fn test_public_url_shape() {
        assert_eq!(
            store().public_url("t/products/p.jpg"),
            "https://abc123.storage.local/storage/v1/object/public/product-images/t/products/p.jpg"
        );
    }

    #[test]
    fn test_list_entry_decodes_with_and_without_metadata() {
        let entries: Vec<ListEntry> = serde_json::from_str(
            r#"[
                {"name": "t/p.jpg", "metadata": {"size": 1234}},
                {"name": "t/"}
            ]"#,
        )
        .unwrap();
        assert_eq!(entries[0].name, "t/p.jpg");
        assert_eq!(entries[0].metadata.as_ref().unwrap().size, 1234);
        assert!(entries[1].metadata.is_none());
    }
}
