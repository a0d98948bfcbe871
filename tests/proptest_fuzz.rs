//! Property-based tests (fuzzing) for the URL classifier.
//!
//! The classifier is the single gate every incoming image source passes
//! through; it must never panic and must stay total and deterministic for
//! arbitrary inputs.
//!
//! Run with: `cargo test --test proptest_fuzz`

use proptest::prelude::*;

use image_sync_engine::{classify, SyncStatus};

const HOST: &str = "abc123.storage.local";

proptest! {
    /// Arbitrary input never panics and always yields a classification.
    #[test]
    fn classify_is_total(input in ".*") {
        let c = classify(Some(&input), HOST);
        prop_assert!(matches!(
            c.status,
            SyncStatus::Pending | SyncStatus::Synced | SyncStatus::Failed
        ));
    }

    /// Same input, same classification — no hidden environment.
    #[test]
    fn classify_is_deterministic(input in ".*") {
        let a = classify(Some(&input), HOST);
        let b = classify(Some(&input), HOST);
        prop_assert_eq!(a, b);
    }

    /// Whitespace-only input is terminal success with the no-URL note.
    #[test]
    fn blank_input_is_synced(input in "[ \t\r\n]*") {
        let c = classify(Some(&input), HOST);
        prop_assert_eq!(c.status, SyncStatus::Synced);
        prop_assert!(c.url.is_none());
        prop_assert_eq!(c.error.as_deref(), Some("URL não fornecida"));
    }

    /// A well-formed external http(s) URL always enters the backlog.
    #[test]
    fn external_urls_are_pending(
        scheme in prop_oneof![Just("http"), Just("https")],
        host in "[a-z][a-z0-9]{1,20}\\.(com|net|com\\.br)",
        path in "[a-z0-9/]{0,30}",
    ) {
        let url = format!("{}://{}/{}", scheme, host, path);
        let c = classify(Some(&url), HOST);
        prop_assert_eq!(c.status, SyncStatus::Pending);
        prop_assert!(c.url.is_some());
        prop_assert!(c.error.is_none());
    }

    /// Any URL on the managed host is already internal.
    #[test]
    fn managed_host_urls_are_synced(path in "[a-z0-9/._-]{0,40}") {
        let url = format!("https://{}/{}", HOST, path);
        let c = classify(Some(&url), HOST);
        prop_assert_eq!(c.status, SyncStatus::Synced);
        prop_assert!(c.url.is_some());
    }

    /// Non-http(s) schemes are rejected and the URL is discarded.
    #[test]
    fn other_schemes_are_failed(
        scheme in "[a-z]{2,8}",
        rest in "[a-z0-9/.]{1,30}",
    ) {
        prop_assume!(scheme != "http" && scheme != "https");
        let url = format!("{}://{}", scheme, rest);
        let c = classify(Some(&url), HOST);
        // Either unparseable or parseable-with-wrong-scheme; both are failures
        if let Some(err) = c.error.as_deref() {
            if c.status == SyncStatus::Failed {
                prop_assert!(c.url.is_none());
                prop_assert!(err.contains("URL malformada"));
            }
        }
        prop_assert_ne!(c.status, SyncStatus::Pending);
    }

    /// A failed classification never keeps the URL around.
    #[test]
    fn failed_classifications_discard_the_url(input in ".*") {
        let c = classify(Some(&input), HOST);
        if c.status == SyncStatus::Failed {
            prop_assert!(c.url.is_none());
            prop_assert!(c.error.is_some());
        }
    }
}
