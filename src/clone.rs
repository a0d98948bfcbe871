// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Catalog cloning across tenants.
//!
//! Cloning duplicates product and gallery rows, not storage objects: the
//! new rows point at the source owner's paths (`is_shared`) until
//! something triggers a copy-on-write fork. Idempotence comes from the
//! datastore's `UNIQUE (owner_id, reference_code)` upsert — re-running a
//! clone inserts only genuinely new rows, with no application-level
//! "already cloned" pre-check.
//!
//! Every cloned product leaves a [`CatalogCloneRecord`] behind; undo-clone
//! deletes exactly the mapped rows and nothing the target created on its
//! own.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::RecordStore;
use crate::error::SyncError;
use crate::metrics::{self, LatencyTimer};
use crate::record::{new_id, now_ms, CatalogCloneRecord, Product};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneOutcome {
    /// Products newly inserted by this run (zero on a re-run)
    pub cloned_count: usize,
}

pub struct CatalogCloner {
    records: Arc<RecordStore>,
}

impl CatalogCloner {
    pub fn new(records: Arc<RecordStore>) -> Self {
        Self { records }
    }

    /// Clone `source_owner_id`'s products (optionally one brand) under
    /// `target_owner_id`.
    #[tracing::instrument(skip(self))]
    pub async fn clone_catalog(
        &self,
        source_owner_id: &str,
        target_owner_id: &str,
        brand: Option<&str>,
    ) -> Result<CloneOutcome, SyncError> {
        if source_owner_id == target_owner_id {
            return Err(SyncError::Validation(
                "clonagem exige origem e destino distintos".to_string(),
            ));
        }

        let timer = LatencyTimer::new("cloner", "clone_catalog");
        let sources = self.records.products_by_brand(source_owner_id, brand).await?;

        // Upsert keyed on (owner, reference_code): already-present rows —
        // cloned earlier or created independently by the target — are
        // untouched and excluded from the mapping below.
        let mut inserted_refs: HashSet<String> = HashSet::new();
        for source in &sources {
            let candidate = strip_for_target(source, target_owner_id);
            if self.records.upsert_product_ignore(&candidate).await? {
                inserted_refs.insert(source.reference_code.clone());
            }
        }

        // Recover the target-side ids the upsert settled on
        let targets = self.records.products_by_brand(target_owner_id, brand).await?;
        let by_reference: HashMap<&str, &Product> = targets
            .iter()
            .map(|p| (p.reference_code.as_str(), p))
            .collect();

        let mut cloned_count = 0;
        for source in &sources {
            if !inserted_refs.contains(&source.reference_code) {
                continue;
            }
            let Some(target) = by_reference.get(source.reference_code.as_str()) else {
                warn!(reference = %source.reference_code, "inserted row missing on re-read");
                continue;
            };

            // Gallery rows share the source's storage paths — no fork here
            for image in self.records.images_for_product(&source.id).await? {
                let mut copy = image.clone();
                copy.id = new_id();
                copy.product_id = target.id.clone();
                copy.is_shared = true;
                self.records.insert_image(&copy).await?;
            }

            self.records
                .insert_clone_record(&CatalogCloneRecord {
                    id: new_id(),
                    source_owner_id: source_owner_id.to_string(),
                    target_owner_id: target_owner_id.to_string(),
                    source_product_id: source.id.clone(),
                    target_product_id: target.id.clone(),
                    brand: source.brand.clone(),
                    created_at: now_ms(),
                })
                .await?;
            cloned_count += 1;
        }

        metrics::record_cloned(cloned_count);
        timer.finish("success");
        info!(
            source = source_owner_id,
            target = target_owner_id,
            cloned = cloned_count,
            "catalog clone complete"
        );
        Ok(CloneOutcome { cloned_count })
    }

    /// Remove the rows a previous clone created for this source/target
    /// pair (optionally one brand). Only rows present in the clone-record
    /// mapping are eligible; independently created products survive.
    #[tracing::instrument(skip(self))]
    pub async fn undo_clone(
        &self,
        source_owner_id: &str,
        target_owner_id: &str,
        brand: Option<&str>,
    ) -> Result<u64, SyncError> {
        let mapping = self
            .records
            .clone_records(source_owner_id, target_owner_id, brand)
            .await?;

        if mapping.is_empty() {
            return Err(SyncError::Rollback(
                "nenhum registro de clonagem encontrado para desfazer".to_string(),
            ));
        }

        let mut removed = 0u64;
        for record in mapping {
            self.records
                .delete_images_for_product(&record.target_product_id)
                .await?;
            self.records.delete_product(&record.target_product_id).await?;
            self.records.delete_clone_record(&record.id).await?;
            removed += 1;
        }

        info!(
            source = source_owner_id,
            target = target_owner_id,
            removed,
            "clone undone"
        );
        Ok(removed)
    }
}

/// Re-key a source product for the target owner: fresh identity and
/// timestamps, everything else — including the shared image references —
/// carried over.
fn strip_for_target(source: &Product, target_owner_id: &str) -> Product {
    let now = now_ms();
    Product {
        id: new_id(),
        owner_id: target_owner_id.to_string(),
        created_at: now,
        updated_at: now,
        ..source.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ProductImage, SyncStatus};

    async fn store() -> Arc<RecordStore> {
        Arc::new(RecordStore::new("sqlite::memory:").await.unwrap())
    }

    async fn seed_source(records: &RecordStore, owner: &str, brand: &str, n: usize) -> Vec<Product> {
        let mut out = Vec::new();
        for i in 0..n {
            let mut p = Product::new(owner, format!("{}-REF-{}", brand, i));
            p.brand = brand.to_string();
            p.image_path = Some(format!("{}/products/{}.jpg", owner, i));
            p.sync_status = SyncStatus::Synced;
            records.insert_product(&p).await.unwrap();

            let mut image = ProductImage::new(&p.id, format!("https://cdn/{}.jpg", i), 0);
            image.storage_path = Some(format!("{}/gallery/{}.jpg", owner, i));
            records.insert_image(&image).await.unwrap();
            out.push(p);
        }
        out
    }

    #[tokio::test]
    async fn test_clone_copies_products_and_shares_images() {
        let records = store().await;
        let cloner = CatalogCloner::new(records.clone());
        let sources = seed_source(&records, "owner-a", "Acme", 3).await;

        let outcome = cloner.clone_catalog("owner-a", "owner-b", Some("Acme")).await.unwrap();
        assert_eq!(outcome.cloned_count, 3);

        let targets = records.products_by_brand("owner-b", Some("Acme")).await.unwrap();
        assert_eq!(targets.len(), 3);

        for target in &targets {
            // Same storage path as the source — shared, not forked
            assert!(target.image_path.as_deref().unwrap().starts_with("owner-a/"));
            let gallery = records.images_for_product(&target.id).await.unwrap();
            assert_eq!(gallery.len(), 1);
            assert!(gallery[0].is_shared);
            assert!(gallery[0].storage_path.as_deref().unwrap().starts_with("owner-a/"));
        }

        let mapping = records.clone_records("owner-a", "owner-b", Some("Acme")).await.unwrap();
        assert_eq!(mapping.len(), 3);
        assert!(mapping
            .iter()
            .any(|r| r.source_product_id == sources[0].id));
    }

    #[tokio::test]
    async fn test_clone_twice_is_a_noop() {
        let records = store().await;
        let cloner = CatalogCloner::new(records.clone());
        seed_source(&records, "owner-a", "Acme", 3).await;

        cloner.clone_catalog("owner-a", "owner-b", Some("Acme")).await.unwrap();
        let second = cloner.clone_catalog("owner-a", "owner-b", Some("Acme")).await.unwrap();
        assert_eq!(second.cloned_count, 0);

        assert_eq!(
            records.products_by_brand("owner-b", Some("Acme")).await.unwrap().len(),
            3
        );
        // Gallery rows were not duplicated either
        let targets = records.products_by_brand("owner-b", Some("Acme")).await.unwrap();
        for target in targets {
            assert_eq!(records.images_for_product(&target.id).await.unwrap().len(), 1);
        }
        assert_eq!(
            records.clone_records("owner-a", "owner-b", None).await.unwrap().len(),
            3
        );
    }

    #[tokio::test]
    async fn test_brand_filter_limits_the_clone() {
        let records = store().await;
        let cloner = CatalogCloner::new(records.clone());
        seed_source(&records, "owner-a", "Acme", 2).await;
        seed_source(&records, "owner-a", "Globex", 2).await;

        let outcome = cloner.clone_catalog("owner-a", "owner-b", Some("Acme")).await.unwrap();
        assert_eq!(outcome.cloned_count, 2);
        assert!(records
            .products_by_brand("owner-b", Some("Globex"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_undo_clone_spares_independent_products() {
        let records = store().await;
        let cloner = CatalogCloner::new(records.clone());
        seed_source(&records, "owner-a", "Acme", 3).await;

        // owner-b created one of their own before the clone
        let mut own = Product::new("owner-b", "OWN-REF-1");
        own.brand = "Acme".to_string();
        records.insert_product(&own).await.unwrap();

        cloner.clone_catalog("owner-a", "owner-b", Some("Acme")).await.unwrap();
        assert_eq!(
            records.products_by_brand("owner-b", Some("Acme")).await.unwrap().len(),
            4
        );

        let removed = cloner.undo_clone("owner-a", "owner-b", Some("Acme")).await.unwrap();
        assert_eq!(removed, 3);

        let remaining = records.products_by_brand("owner-b", Some("Acme")).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].reference_code, "OWN-REF-1");
        assert!(records.clone_records("owner-a", "owner-b", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_undo_twice_is_rejected() {
        let records = store().await;
        let cloner = CatalogCloner::new(records.clone());
        seed_source(&records, "owner-a", "Acme", 1).await;

        cloner.clone_catalog("owner-a", "owner-b", Some("Acme")).await.unwrap();
        cloner.undo_clone("owner-a", "owner-b", Some("Acme")).await.unwrap();

        let err = cloner.undo_clone("owner-a", "owner-b", Some("Acme")).await.unwrap_err();
        assert!(matches!(err, SyncError::Rollback(_)));
    }

    #[tokio::test]
    async fn test_clone_onto_itself_is_rejected() {
        let records = store().await;
        let cloner = CatalogCloner::new(records.clone());
        let err = cloner.clone_catalog("owner-a", "owner-a", None).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[tokio::test]
    async fn test_pre_existing_target_reference_is_not_mapped() {
        let records = store().await;
        let cloner = CatalogCloner::new(records.clone());
        seed_source(&records, "owner-a", "Acme", 2).await;

        // Target independently owns the same reference code as source #0
        let mut own = Product::new("owner-b", "Acme-REF-0");
        own.brand = "Acme".to_string();
        records.insert_product(&own).await.unwrap();

        let outcome = cloner.clone_catalog("owner-a", "owner-b", Some("Acme")).await.unwrap();
        // Only the non-colliding product was cloned
        assert_eq!(outcome.cloned_count, 1);

        let undo = cloner.undo_clone("owner-a", "owner-b", Some("Acme")).await.unwrap();
        assert_eq!(undo, 1);
        // The independent row survived with its own (empty) gallery
        let remaining = records.products_by_brand("owner-b", Some("Acme")).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, own.id);
    }
}
