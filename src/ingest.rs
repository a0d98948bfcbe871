//! External image ingestion: URL validation and initial state decision.
//!
//! [`classify`] is the single entry point every incoming image URL passes
//! through. It is pure and deterministic — same input, same classification —
//! with the configured managed-storage hostname as its only environment.
//!
//! # Example
//!
//! ```
//! use image_sync_engine::{classify, SyncStatus};
//!
//! let c = classify(Some("https://cdn.example.com/shirt.jpg"), "storage.local");
//! assert_eq!(c.status, SyncStatus::Pending);
//!
//! let c = classify(Some("not a url"), "storage.local");
//! assert_eq!(c.status, SyncStatus::Failed);
//!
//! let c = classify(None, "storage.local");
//! assert_eq!(c.status, SyncStatus::Synced);
//! ```

use url::Url;

use crate::record::SyncStatus;

/// Outcome of classifying one incoming image URL.
///
/// `url` is the normalized URL to persist (`None` when the input was blank
/// or malformed — a discarded URL is never stored). `error` carries the text
/// written to the entity's `sync_error` column, for both the failure case
/// and the nothing-to-do note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub url: Option<String>,
    pub status: SyncStatus,
    pub error: Option<String>,
}

/// Decide the initial sync state for an image source URL.
///
/// - blank input → `Synced` with an explanatory note: nothing to internalize
///   is a valid success, not a failure;
/// - unparseable input, or a scheme other than http/https → `Failed`, URL
///   discarded;
/// - a URL already pointing at `managed_host` → `Synced` immediately;
/// - any other well-formed http(s) URL → `Pending`. This is the only path
///   that enqueues work for the internalization worker.
#[must_use]
pub fn classify(url: Option<&str>, managed_host: &str) -> Classification {
    let raw = url.unwrap_or("").trim();

    if raw.is_empty() {
        return Classification {
            url: None,
            status: SyncStatus::Synced,
            error: Some("URL não fornecida".to_string()),
        };
    }

    let parsed = match Url::parse(raw) {
        Ok(parsed) => parsed,
        Err(_) => {
            return Classification {
                url: None,
                status: SyncStatus::Failed,
                error: Some(format!("URL malformada: {}", raw)),
            };
        }
    };

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Classification {
            url: None,
            status: SyncStatus::Failed,
            error: Some(format!("URL malformada: {}", raw)),
        };
    }

    let already_internal = parsed
        .host_str()
        .is_some_and(|host| host.eq_ignore_ascii_case(managed_host));

    if already_internal {
        return Classification {
            url: Some(parsed.to_string()),
            status: SyncStatus::Synced,
            error: None,
        };
    }

    Classification {
        url: Some(parsed.to_string()),
        status: SyncStatus::Pending,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "abc123.storage.local";

    #[test]
    fn test_blank_is_synced_with_note() {
        for input in [None, Some(""), Some("   "), Some("\t\n")] {
            let c = classify(input, HOST);
            assert_eq!(c.status, SyncStatus::Synced);
            assert!(c.url.is_none());
            assert_eq!(c.error.as_deref(), Some("URL não fornecida"));
        }
    }

    #[test]
    fn test_malformed_is_failed_and_discarded() {
        for input in ["not a url", "http//missing.colon", "://nope", "exemplo.com/img.jpg"] {
            let c = classify(Some(input), HOST);
            assert_eq!(c.status, SyncStatus::Failed, "input: {}", input);
            assert!(c.url.is_none());
            assert!(c.error.as_deref().unwrap().contains("URL malformada"));
        }
    }

    #[test]
    fn test_non_http_scheme_is_failed() {
        for input in ["ftp://host/img.jpg", "file:///tmp/img.jpg", "data:image/png;base64,AAAA"] {
            let c = classify(Some(input), HOST);
            assert_eq!(c.status, SyncStatus::Failed, "input: {}", input);
        }
    }

    #[test]
    fn test_external_url_is_pending() {
        let c = classify(Some("https://cdn.fornecedor.com.br/produtos/123.jpg"), HOST);
        assert_eq!(c.status, SyncStatus::Pending);
        assert_eq!(
            c.url.as_deref(),
            Some("https://cdn.fornecedor.com.br/produtos/123.jpg")
        );
        assert!(c.error.is_none());
    }

    #[test]
    fn test_managed_host_is_already_internal() {
        let url = format!("https://{}/storage/v1/object/public/product-images/t/p.jpg", HOST);
        let c = classify(Some(&url), HOST);
        assert_eq!(c.status, SyncStatus::Synced);
        assert_eq!(c.url.as_deref(), Some(url.as_str()));
        assert!(c.error.is_none());
    }

    #[test]
    fn test_managed_host_comparison_is_case_insensitive() {
        let url = format!("https://{}/x.jpg", HOST.to_uppercase());
        let c = classify(Some(&url), HOST);
        assert_eq!(c.status, SyncStatus::Synced);
    }

    #[test]
    fn test_http_plain_is_accepted() {
        let c = classify(Some("http://legacy-cdn.com/img.png"), HOST);
        assert_eq!(c.status, SyncStatus::Pending);
    }

    #[test]
    fn test_deterministic() {
        let a = classify(Some("https://cdn.example.com/a.jpg"), HOST);
        let b = classify(Some("https://cdn.example.com/a.jpg"), HOST);
        assert_eq!(a, b);
    }

    #[test]
    fn test_whitespace_is_trimmed_before_parsing() {
        let c = classify(Some("  https://cdn.example.com/a.jpg  "), HOST);
        assert_eq!(c.status, SyncStatus::Pending);
        assert_eq!(c.url.as_deref(), Some("https://cdn.example.com/a.jpg"));
    }
}
