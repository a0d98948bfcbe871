//! Remote image fetching.
//!
//! [`RemoteFetcher`] is the seam between the worker and external image
//! hosts. The default [`HttpFetcher`] enforces the configured timeout at
//! the client level, so a hung upstream surfaces as a fetch failure rather
//! than a stuck worker.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("falha de rede ao baixar {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("resposta {status} ao baixar {url}")]
    Status { url: String, status: u16 },
}

/// Downloads raw bytes from an external URL.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// reqwest-backed fetcher with a bounded per-request timeout.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network {
                url: String::new(),
                reason: format!("client init: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| FetchError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_url() {
        let network = FetchError::Network {
            url: "https://cdn/x.jpg".to_string(),
            reason: "timeout".to_string(),
        };
        assert!(network.to_string().contains("https://cdn/x.jpg"));
        assert!(network.to_string().contains("timeout"));

        let status = FetchError::Status {
            url: "https://cdn/x.jpg".to_string(),
            status: 404,
        };
        assert!(status.to_string().contains("404"));
    }

    #[test]
    fn test_http_fetcher_builds() {
        assert!(HttpFetcher::new(Duration::from_secs(30)).is_ok());
    }
}
