// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Relational datastore access.
//!
//! One [`RecordStore`] owns the connection pool and every query the
//! pipeline issues. The `Any` driver covers SQLite (tests, single-node
//! installs) and MySQL (production); statements that differ between the
//! two dialects are branched on `is_sqlite`, the same way upserts are.
//!
//! ## sqlx Any Driver Quirks
//!
//! TEXT columns come back as `String` on SQLite but as bytes on MySQL, so
//! every text read goes through [`text_col`]. Boolean flags are stored as
//! 0/1 integers because the Any driver has no portable bool.

use sqlx::{any::AnyPoolOptions, AnyPool, Row};
use std::sync::Once;
use std::time::Duration;
use thiserror::Error;

use crate::record::{
    new_id, now_ms, CatalogCloneRecord, JobStatus, Product, ProductImage, StagingImage, SyncJob,
    SyncStatus,
};
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("database error: {0}")]
    Backend(String),
}

impl DbError {
    fn from_sqlx(e: sqlx::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Read a TEXT column as String on SQLite, falling back to bytes on MySQL.
fn text_col(row: &sqlx::any::AnyRow, name: &str) -> Option<String> {
    row.try_get::<String, _>(name).ok().or_else(|| {
        row.try_get::<Vec<u8>, _>(name)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    })
}

fn int_col(row: &sqlx::any::AnyRow, name: &str) -> i64 {
    row.try_get::<i64, _>(name)
        .or_else(|_| row.try_get::<i32, _>(name).map(i64::from))
        .unwrap_or(0)
}

const PRODUCT_COLS: &str = "id, owner_id, brand, reference_code, name, image_url, image_path, \
     external_image_url, gallery_urls, sync_status, sync_error, created_at, updated_at";

const IMAGE_COLS: &str = "id, product_id, url, optimized_url, storage_path, position, \
     is_primary, is_shared, sync_status, sync_error";

fn product_from_row(row: &sqlx::any::AnyRow) -> Product {
    let gallery_json = text_col(row, "gallery_urls").unwrap_or_else(|| "[]".to_string());
    Product {
        id: text_col(row, "id").unwrap_or_default(),
        owner_id: text_col(row, "owner_id").unwrap_or_default(),
        brand: text_col(row, "brand").unwrap_or_default(),
        reference_code: text_col(row, "reference_code").unwrap_or_default(),
        name: text_col(row, "name").unwrap_or_default(),
        image_url: text_col(row, "image_url"),
        image_path: text_col(row, "image_path"),
        external_image_url: text_col(row, "external_image_url"),
        gallery_urls: serde_json::from_str(&gallery_json).unwrap_or_default(),
        sync_status: SyncStatus::from_db(&text_col(row, "sync_status").unwrap_or_default()),
        sync_error: text_col(row, "sync_error"),
        created_at: int_col(row, "created_at"),
        updated_at: int_col(row, "updated_at"),
    }
}

fn image_from_row(row: &sqlx::any::AnyRow) -> ProductImage {
    ProductImage {
        id: text_col(row, "id").unwrap_or_default(),
        product_id: text_col(row, "product_id").unwrap_or_default(),
        url: text_col(row, "url").unwrap_or_default(),
        optimized_url: text_col(row, "optimized_url"),
        storage_path: text_col(row, "storage_path"),
        position: int_col(row, "position") as i32,
        is_primary: int_col(row, "is_primary") != 0,
        is_shared: int_col(row, "is_shared") != 0,
        sync_status: SyncStatus::from_db(&text_col(row, "sync_status").unwrap_or_default()),
        sync_error: text_col(row, "sync_error"),
    }
}

fn job_from_row(row: &sqlx::any::AnyRow) -> SyncJob {
    SyncJob {
        id: text_col(row, "id").unwrap_or_default(),
        owner_id: text_col(row, "owner_id").unwrap_or_default(),
        total_count: int_col(row, "total_count"),
        completed_count: int_col(row, "completed_count"),
        status: JobStatus::from_db(&text_col(row, "status").unwrap_or_default()),
        created_at: int_col(row, "created_at"),
        updated_at: int_col(row, "updated_at"),
    }
}

fn clone_record_from_row(row: &sqlx::any::AnyRow) -> CatalogCloneRecord {
    CatalogCloneRecord {
        id: text_col(row, "id").unwrap_or_default(),
        source_owner_id: text_col(row, "source_owner_id").unwrap_or_default(),
        target_owner_id: text_col(row, "target_owner_id").unwrap_or_default(),
        source_product_id: text_col(row, "source_product_id").unwrap_or_default(),
        target_product_id: text_col(row, "target_product_id").unwrap_or_default(),
        brand: text_col(row, "brand").unwrap_or_default(),
        created_at: int_col(row, "created_at"),
    }
}

fn staging_from_row(row: &sqlx::any::AnyRow) -> StagingImage {
    StagingImage {
        id: text_col(row, "id").unwrap_or_default(),
        owner_id: text_col(row, "owner_id").unwrap_or_default(),
        storage_path: text_col(row, "storage_path").unwrap_or_default(),
        created_at: int_col(row, "created_at"),
    }
}

pub struct RecordStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl RecordStore {
    /// Connect with startup-mode retry (fails fast if config is wrong).
    pub async fn new(connection_string: &str) -> Result<Self, DbError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");
        // A pooled :memory: database exists per connection; one connection
        // keeps it a single database.
        let max_connections = if connection_string.contains(":memory:") { 1 } else { 20 };

        let conn = connection_string.to_string();
        let pool = retry("db_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(10))
                .connect(&conn)
                .await
                .map_err(DbError::from_sqlx)
        })
        .await?;

        let store = Self { pool, is_sqlite };

        if is_sqlite {
            store.enable_wal_mode().await?;
        }
        store.init_schema().await?;
        Ok(store)
    }

    /// Clone of the connection pool for sharing.
    #[must_use]
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    async fn enable_wal_mode(&self) -> Result<(), DbError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
        Ok(())
    }

    async fn init_schema(&self) -> Result<(), DbError> {
        let statements: Vec<&str> = if self.is_sqlite {
            vec![
                r#"
                CREATE TABLE IF NOT EXISTS products (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    brand TEXT NOT NULL DEFAULT '',
                    reference_code TEXT NOT NULL,
                    name TEXT NOT NULL DEFAULT '',
                    image_url TEXT,
                    image_path TEXT,
                    external_image_url TEXT,
                    gallery_urls TEXT NOT NULL DEFAULT '[]',
                    sync_status TEXT NOT NULL DEFAULT 'pending',
                    sync_error TEXT,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    UNIQUE (owner_id, reference_code)
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_products_owner_status ON products (owner_id, sync_status)",
                "CREATE INDEX IF NOT EXISTS idx_products_owner_brand ON products (owner_id, brand)",
                r#"
                CREATE TABLE IF NOT EXISTS product_images (
                    id TEXT PRIMARY KEY,
                    product_id TEXT NOT NULL,
                    url TEXT NOT NULL DEFAULT '',
                    optimized_url TEXT,
                    storage_path TEXT,
                    position INTEGER NOT NULL DEFAULT 0,
                    is_primary INTEGER NOT NULL DEFAULT 0,
                    is_shared INTEGER NOT NULL DEFAULT 0,
                    sync_status TEXT NOT NULL DEFAULT 'pending',
                    sync_error TEXT
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_product_images_product ON product_images (product_id)",
                r#"
                CREATE TABLE IF NOT EXISTS staging_images (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    storage_path TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS sync_jobs (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    total_count INTEGER NOT NULL DEFAULT 0,
                    completed_count INTEGER NOT NULL DEFAULT 0,
                    status TEXT NOT NULL DEFAULT 'processing',
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS catalog_clone_records (
                    id TEXT PRIMARY KEY,
                    source_owner_id TEXT NOT NULL,
                    target_owner_id TEXT NOT NULL,
                    source_product_id TEXT NOT NULL,
                    target_product_id TEXT NOT NULL,
                    brand TEXT NOT NULL DEFAULT '',
                    created_at INTEGER NOT NULL,
                    UNIQUE (source_product_id, target_owner_id)
                )
                "#,
            ]
        } else {
            vec![
                r#"
                CREATE TABLE IF NOT EXISTS products (
                    id VARCHAR(64) PRIMARY KEY,
                    owner_id VARCHAR(64) NOT NULL,
                    brand VARCHAR(191) NOT NULL DEFAULT '',
                    reference_code VARCHAR(191) NOT NULL,
                    name TEXT,
                    image_url TEXT,
                    image_path TEXT,
                    external_image_url TEXT,
                    gallery_urls TEXT,
                    sync_status VARCHAR(16) NOT NULL DEFAULT 'pending',
                    sync_error TEXT,
                    created_at BIGINT NOT NULL,
                    updated_at BIGINT NOT NULL,
                    UNIQUE KEY uq_products_owner_ref (owner_id, reference_code),
                    INDEX idx_products_owner_status (owner_id, sync_status),
                    INDEX idx_products_owner_brand (owner_id, brand)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS product_images (
                    id VARCHAR(64) PRIMARY KEY,
                    product_id VARCHAR(64) NOT NULL,
                    url TEXT,
                    optimized_url TEXT,
                    storage_path TEXT,
                    position INT NOT NULL DEFAULT 0,
                    is_primary TINYINT NOT NULL DEFAULT 0,
                    is_shared TINYINT NOT NULL DEFAULT 0,
                    sync_status VARCHAR(16) NOT NULL DEFAULT 'pending',
                    sync_error TEXT,
                    INDEX idx_product_images_product (product_id)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS staging_images (
                    id VARCHAR(64) PRIMARY KEY,
                    owner_id VARCHAR(64) NOT NULL,
                    storage_path TEXT NOT NULL,
                    created_at BIGINT NOT NULL,
                    INDEX idx_staging_owner (owner_id)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS sync_jobs (
                    id VARCHAR(64) PRIMARY KEY,
                    owner_id VARCHAR(64) NOT NULL,
                    total_count BIGINT NOT NULL DEFAULT 0,
                    completed_count BIGINT NOT NULL DEFAULT 0,
                    status VARCHAR(16) NOT NULL DEFAULT 'processing',
                    created_at BIGINT NOT NULL,
                    updated_at BIGINT NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS catalog_clone_records (
                    id VARCHAR(64) PRIMARY KEY,
                    source_owner_id VARCHAR(64) NOT NULL,
                    target_owner_id VARCHAR(64) NOT NULL,
                    source_product_id VARCHAR(64) NOT NULL,
                    target_product_id VARCHAR(64) NOT NULL,
                    brand VARCHAR(191) NOT NULL DEFAULT '',
                    created_at BIGINT NOT NULL,
                    UNIQUE KEY uq_clone_source_target (source_product_id, target_owner_id)
                )
                "#,
            ]
        };

        for sql in statements {
            retry("db_init_schema", &RetryConfig::startup(), || async {
                sqlx::query(sql)
                    .execute(&self.pool)
                    .await
                    .map_err(DbError::from_sqlx)
            })
            .await?;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Products
    // ═══════════════════════════════════════════════════════════════════

    pub async fn insert_product(&self, product: &Product) -> Result<(), DbError> {
        let gallery = serde_json::to_string(&product.gallery_urls)
            .map_err(|e| DbError::Backend(e.to_string()))?;

        retry("db_insert_product", &RetryConfig::query(), || async {
            sqlx::query(
                "INSERT INTO products (id, owner_id, brand, reference_code, name, image_url, \
                 image_path, external_image_url, gallery_urls, sync_status, sync_error, \
                 created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&product.id)
            .bind(&product.owner_id)
            .bind(&product.brand)
            .bind(&product.reference_code)
            .bind(&product.name)
            .bind(&product.image_url)
            .bind(&product.image_path)
            .bind(&product.external_image_url)
            .bind(&gallery)
            .bind(product.sync_status.as_str())
            .bind(&product.sync_error)
            .bind(product.created_at)
            .bind(product.updated_at)
            .execute(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
            Ok(())
        })
        .await
    }

    /// Insert keyed on `(owner_id, reference_code)`; an existing row is
    /// left untouched. Returns whether a row was actually inserted — the
    /// clone engine's idempotence hangs on this.
    pub async fn upsert_product_ignore(&self, product: &Product) -> Result<bool, DbError> {
        let gallery = serde_json::to_string(&product.gallery_urls)
            .map_err(|e| DbError::Backend(e.to_string()))?;

        let sql = if self.is_sqlite {
            "INSERT INTO products (id, owner_id, brand, reference_code, name, image_url, \
             image_path, external_image_url, gallery_urls, sync_status, sync_error, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(owner_id, reference_code) DO NOTHING"
        } else {
            "INSERT IGNORE INTO products (id, owner_id, brand, reference_code, name, image_url, \
             image_path, external_image_url, gallery_urls, sync_status, sync_error, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        };

        retry("db_upsert_product", &RetryConfig::query(), || async {
            let result = sqlx::query(sql)
                .bind(&product.id)
                .bind(&product.owner_id)
                .bind(&product.brand)
                .bind(&product.reference_code)
                .bind(&product.name)
                .bind(&product.image_url)
                .bind(&product.image_path)
                .bind(&product.external_image_url)
                .bind(&gallery)
                .bind(product.sync_status.as_str())
                .bind(&product.sync_error)
                .bind(product.created_at)
                .bind(product.updated_at)
                .execute(&self.pool)
                .await
                .map_err(DbError::from_sqlx)?;
            Ok(result.rows_affected() == 1)
        })
        .await
    }

    pub async fn get_product(&self, id: &str) -> Result<Option<Product>, DbError> {
        let id = id.to_string();
        let sql = format!("SELECT {} FROM products WHERE id = ?", PRODUCT_COLS);
        retry("db_get_product", &RetryConfig::query(), || async {
            let row = sqlx::query(&sql)
                .bind(&id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DbError::from_sqlx)?;
            Ok(row.map(|r| product_from_row(&r)))
        })
        .await
    }

    pub async fn product_by_reference(
        &self,
        owner_id: &str,
        reference_code: &str,
    ) -> Result<Option<Product>, DbError> {
        let sql = format!(
            "SELECT {} FROM products WHERE owner_id = ? AND reference_code = ?",
            PRODUCT_COLS
        );
        let row = sqlx::query(&sql)
            .bind(owner_id)
            .bind(reference_code)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
        Ok(row.map(|r| product_from_row(&r)))
    }

    /// Products for one owner, optionally restricted to a brand.
    pub async fn products_by_brand(
        &self,
        owner_id: &str,
        brand: Option<&str>,
    ) -> Result<Vec<Product>, DbError> {
        let rows = match brand {
            Some(brand) => {
                let sql = format!(
                    "SELECT {} FROM products WHERE owner_id = ? AND brand = ? ORDER BY reference_code",
                    PRODUCT_COLS
                );
                sqlx::query(&sql)
                    .bind(owner_id)
                    .bind(brand)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM products WHERE owner_id = ? ORDER BY reference_code",
                    PRODUCT_COLS
                );
                sqlx::query(&sql).bind(owner_id).fetch_all(&self.pool).await
            }
        }
        .map_err(DbError::from_sqlx)?;
        Ok(rows.iter().map(product_from_row).collect())
    }

    /// One chunk of the pending backlog, oldest first.
    pub async fn select_pending_products(
        &self,
        owner_id: &str,
        brand: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Product>, DbError> {
        let rows = match brand {
            Some(brand) => {
                let sql = format!(
                    "SELECT {} FROM products WHERE owner_id = ? AND sync_status = 'pending' \
                     AND brand = ? ORDER BY created_at LIMIT ?",
                    PRODUCT_COLS
                );
                sqlx::query(&sql)
                    .bind(owner_id)
                    .bind(brand)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM products WHERE owner_id = ? AND sync_status = 'pending' \
                     ORDER BY created_at LIMIT ?",
                    PRODUCT_COLS
                );
                sqlx::query(&sql)
                    .bind(owner_id)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(DbError::from_sqlx)?;
        Ok(rows.iter().map(product_from_row).collect())
    }

    pub async fn count_pending_products(
        &self,
        owner_id: &str,
        brand: Option<&str>,
    ) -> Result<i64, DbError> {
        let row = match brand {
            Some(brand) => {
                sqlx::query(
                    "SELECT COUNT(*) AS cnt FROM products WHERE owner_id = ? \
                     AND sync_status = 'pending' AND brand = ?",
                )
                .bind(owner_id)
                .bind(brand)
                .fetch_one(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT COUNT(*) AS cnt FROM products WHERE owner_id = ? \
                     AND sync_status = 'pending'",
                )
                .bind(owner_id)
                .fetch_one(&self.pool)
                .await
            }
        }
        .map_err(DbError::from_sqlx)?;
        Ok(int_col(&row, "cnt"))
    }

    /// The single record update that completes an internalization attempt:
    /// path, public URL and terminal status land together.
    pub async fn mark_product_synced(
        &self,
        id: &str,
        image_path: &str,
        image_url: &str,
    ) -> Result<(), DbError> {
        let (id, image_path, image_url) =
            (id.to_string(), image_path.to_string(), image_url.to_string());
        retry("db_mark_product_synced", &RetryConfig::query(), || async {
            sqlx::query(
                "UPDATE products SET image_path = ?, image_url = ?, sync_status = 'synced', \
                 sync_error = NULL, updated_at = ? WHERE id = ?",
            )
            .bind(&image_path)
            .bind(&image_url)
            .bind(now_ms())
            .bind(&id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
            Ok(())
        })
        .await
    }

    /// Terminal success with nothing to store (blank source URL); the note
    /// lands in `sync_error` as an explanation, not a failure.
    pub async fn mark_product_synced_empty(&self, id: &str, note: &str) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE products SET sync_status = 'synced', sync_error = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(note)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::from_sqlx)?;
        Ok(())
    }

    pub async fn mark_product_failed(&self, id: &str, error: &str) -> Result<(), DbError> {
        let (id, error) = (id.to_string(), error.to_string());
        retry("db_mark_product_failed", &RetryConfig::query(), || async {
            sqlx::query(
                "UPDATE products SET sync_status = 'failed', sync_error = ?, updated_at = ? \
                 WHERE id = ?",
            )
            .bind(&error)
            .bind(now_ms())
            .bind(&id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
            Ok(())
        })
        .await
    }

    /// Explicit reprocess by id — the only way back into the backlog.
    pub async fn mark_product_pending(&self, id: &str) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE products SET sync_status = 'pending', sync_error = NULL, updated_at = ? \
             WHERE id = ?",
        )
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::from_sqlx)?;
        Ok(())
    }

    /// Reset every failed product for an owner. Returns rows reset.
    pub async fn reset_failed_products(&self, owner_id: &str) -> Result<u64, DbError> {
        let result = sqlx::query(
            "UPDATE products SET sync_status = 'pending', sync_error = NULL, updated_at = ? \
             WHERE owner_id = ? AND sync_status = 'failed'",
        )
        .bind(now_ms())
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::from_sqlx)?;
        Ok(result.rows_affected())
    }

    /// Reset a whole brand for reprocessing. Returns rows reset.
    pub async fn reset_brand_products(&self, owner_id: &str, brand: &str) -> Result<u64, DbError> {
        let result = sqlx::query(
            "UPDATE products SET sync_status = 'pending', sync_error = NULL, updated_at = ? \
             WHERE owner_id = ? AND brand = ?",
        )
        .bind(now_ms())
        .bind(owner_id)
        .bind(brand)
        .execute(&self.pool)
        .await
        .map_err(DbError::from_sqlx)?;
        Ok(result.rows_affected())
    }

    pub async fn delete_product(&self, id: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Product images
    // ═══════════════════════════════════════════════════════════════════

    pub async fn insert_image(&self, image: &ProductImage) -> Result<(), DbError> {
        retry("db_insert_image", &RetryConfig::query(), || async {
            sqlx::query(
                "INSERT INTO product_images (id, product_id, url, optimized_url, storage_path, \
                 position, is_primary, is_shared, sync_status, sync_error) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&image.id)
            .bind(&image.product_id)
            .bind(&image.url)
            .bind(&image.optimized_url)
            .bind(&image.storage_path)
            .bind(i64::from(image.position))
            .bind(i64::from(image.is_primary))
            .bind(i64::from(image.is_shared))
            .bind(image.sync_status.as_str())
            .bind(&image.sync_error)
            .execute(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
            Ok(())
        })
        .await
    }

    pub async fn get_image(&self, id: &str) -> Result<Option<ProductImage>, DbError> {
        let sql = format!("SELECT {} FROM product_images WHERE id = ?", IMAGE_COLS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
        Ok(row.map(|r| image_from_row(&r)))
    }

    pub async fn images_for_product(&self, product_id: &str) -> Result<Vec<ProductImage>, DbError> {
        let sql = format!(
            "SELECT {} FROM product_images WHERE product_id = ? ORDER BY position",
            IMAGE_COLS
        );
        let rows = sqlx::query(&sql)
            .bind(product_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
        Ok(rows.iter().map(image_from_row).collect())
    }

    pub async fn pending_images_for_product(
        &self,
        product_id: &str,
    ) -> Result<Vec<ProductImage>, DbError> {
        let sql = format!(
            "SELECT {} FROM product_images WHERE product_id = ? AND sync_status = 'pending' \
             ORDER BY position",
            IMAGE_COLS
        );
        let rows = sqlx::query(&sql)
            .bind(product_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
        Ok(rows.iter().map(image_from_row).collect())
    }

    pub async fn mark_image_synced(
        &self,
        id: &str,
        storage_path: &str,
        optimized_url: &str,
    ) -> Result<(), DbError> {
        let (id, storage_path, optimized_url) =
            (id.to_string(), storage_path.to_string(), optimized_url.to_string());
        retry("db_mark_image_synced", &RetryConfig::query(), || async {
            sqlx::query(
                "UPDATE product_images SET storage_path = ?, optimized_url = ?, \
                 sync_status = 'synced', sync_error = NULL WHERE id = ?",
            )
            .bind(&storage_path)
            .bind(&optimized_url)
            .bind(&id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
            Ok(())
        })
        .await
    }

    /// Terminal success for a gallery row with a blank source URL.
    pub async fn mark_image_synced_empty(&self, id: &str, note: &str) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE product_images SET sync_status = 'synced', sync_error = ? WHERE id = ?",
        )
        .bind(note)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::from_sqlx)?;
        Ok(())
    }

    pub async fn mark_image_failed(&self, id: &str, error: &str) -> Result<(), DbError> {
        let (id, error) = (id.to_string(), error.to_string());
        retry("db_mark_image_failed", &RetryConfig::query(), || async {
            sqlx::query(
                "UPDATE product_images SET sync_status = 'failed', sync_error = ? WHERE id = ?",
            )
            .bind(&error)
            .bind(&id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
            Ok(())
        })
        .await
    }

    pub async fn mark_image_pending(&self, id: &str) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE product_images SET sync_status = 'pending', sync_error = NULL WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::from_sqlx)?;
        Ok(())
    }

    /// Point a cloned gallery row at its own forked object: new path/URL,
    /// shared mark cleared, so a later safe-delete on this copy can never
    /// touch the source owner's object.
    pub async fn set_image_forked(
        &self,
        id: &str,
        storage_path: &str,
        optimized_url: &str,
    ) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE product_images SET storage_path = ?, optimized_url = ?, is_shared = 0, \
             sync_status = 'synced', sync_error = NULL WHERE id = ?",
        )
        .bind(storage_path)
        .bind(optimized_url)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::from_sqlx)?;
        Ok(())
    }

    pub async fn delete_images_for_product(&self, product_id: &str) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM product_images WHERE product_id = ?")
            .bind(product_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
        Ok(result.rows_affected())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Staging images
    // ═══════════════════════════════════════════════════════════════════

    pub async fn insert_staging(&self, staging: &StagingImage) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO staging_images (id, owner_id, storage_path, created_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&staging.id)
        .bind(&staging.owner_id)
        .bind(&staging.storage_path)
        .bind(staging.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::from_sqlx)?;
        Ok(())
    }

    pub async fn get_staging(&self, id: &str) -> Result<Option<StagingImage>, DbError> {
        let row = sqlx::query(
            "SELECT id, owner_id, storage_path, created_at FROM staging_images WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from_sqlx)?;
        Ok(row.map(|r| staging_from_row(&r)))
    }

    pub async fn delete_staging(&self, id: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM staging_images WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
        Ok(())
    }

    pub async fn staging_older_than(
        &self,
        owner_id: &str,
        cutoff_ms: i64,
    ) -> Result<Vec<StagingImage>, DbError> {
        let rows = sqlx::query(
            "SELECT id, owner_id, storage_path, created_at FROM staging_images \
             WHERE owner_id = ? AND created_at < ?",
        )
        .bind(owner_id)
        .bind(cutoff_ms)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from_sqlx)?;
        Ok(rows.iter().map(staging_from_row).collect())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Sync jobs
    // ═══════════════════════════════════════════════════════════════════

    /// Create a job row in `processing` with zero progress, immediately
    /// visible to polling UIs.
    pub async fn create_job(&self, owner_id: &str, total_count: i64) -> Result<SyncJob, DbError> {
        let now = now_ms();
        let job = SyncJob {
            id: new_id(),
            owner_id: owner_id.to_string(),
            total_count,
            completed_count: 0,
            status: JobStatus::Processing,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO sync_jobs (id, owner_id, total_count, completed_count, status, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(&job.owner_id)
        .bind(job.total_count)
        .bind(job.completed_count)
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::from_sqlx)?;
        Ok(job)
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<SyncJob>, DbError> {
        let row = sqlx::query(
            "SELECT id, owner_id, total_count, completed_count, status, created_at, updated_at \
             FROM sync_jobs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from_sqlx)?;
        Ok(row.map(|r| job_from_row(&r)))
    }

    pub async fn increment_job_completed(&self, id: &str, delta: i64) -> Result<(), DbError> {
        let id = id.to_string();
        retry("db_increment_job", &RetryConfig::query(), || async {
            sqlx::query(
                "UPDATE sync_jobs SET completed_count = completed_count + ?, updated_at = ? \
                 WHERE id = ?",
            )
            .bind(delta)
            .bind(now_ms())
            .bind(&id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
            Ok(())
        })
        .await
    }

    pub async fn set_job_status(&self, id: &str, status: JobStatus) -> Result<(), DbError> {
        sqlx::query("UPDATE sync_jobs SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Catalog clone records
    // ═══════════════════════════════════════════════════════════════════

    pub async fn insert_clone_record(&self, record: &CatalogCloneRecord) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO catalog_clone_records (id, source_owner_id, target_owner_id, \
             source_product_id, target_product_id, brand, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.source_owner_id)
        .bind(&record.target_owner_id)
        .bind(&record.source_product_id)
        .bind(&record.target_product_id)
        .bind(&record.brand)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::from_sqlx)?;
        Ok(())
    }

    pub async fn has_clone_record(
        &self,
        source_product_id: &str,
        target_owner_id: &str,
    ) -> Result<bool, DbError> {
        let row = sqlx::query(
            "SELECT 1 AS present FROM catalog_clone_records \
             WHERE source_product_id = ? AND target_owner_id = ? LIMIT 1",
        )
        .bind(source_product_id)
        .bind(target_owner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from_sqlx)?;
        Ok(row.is_some())
    }

    pub async fn clone_records(
        &self,
        source_owner_id: &str,
        target_owner_id: &str,
        brand: Option<&str>,
    ) -> Result<Vec<CatalogCloneRecord>, DbError> {
        const COLS: &str = "id, source_owner_id, target_owner_id, source_product_id, \
             target_product_id, brand, created_at";
        let rows = match brand {
            Some(brand) => {
                let sql = format!(
                    "SELECT {} FROM catalog_clone_records WHERE source_owner_id = ? \
                     AND target_owner_id = ? AND brand = ?",
                    COLS
                );
                sqlx::query(&sql)
                    .bind(source_owner_id)
                    .bind(target_owner_id)
                    .bind(brand)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM catalog_clone_records WHERE source_owner_id = ? \
                     AND target_owner_id = ?",
                    COLS
                );
                sqlx::query(&sql)
                    .bind(source_owner_id)
                    .bind(target_owner_id)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(DbError::from_sqlx)?;
        Ok(rows.iter().map(clone_record_from_row).collect())
    }

    pub async fn delete_clone_record(&self, id: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM catalog_clone_records WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Reference counting & reconciliation support
    // ═══════════════════════════════════════════════════════════════════

    /// Server-side aggregate: how many entities currently point at `path`.
    /// Always consulted before any storage delete.
    pub async fn reference_count(&self, path: &str) -> Result<i64, DbError> {
        let path = path.to_string();
        retry("db_reference_count", &RetryConfig::query(), || async {
            let row = sqlx::query(
                "SELECT \
                 (SELECT COUNT(*) FROM products WHERE image_path = ?) + \
                 (SELECT COUNT(*) FROM product_images WHERE storage_path = ?) + \
                 (SELECT COUNT(*) FROM staging_images WHERE storage_path = ?) AS refs",
            )
            .bind(&path)
            .bind(&path)
            .bind(&path)
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
            Ok(int_col(&row, "refs"))
        })
        .await
    }

    /// Every raw path-bearing field value known to the datastore: product
    /// primary paths, every gallery entry, gallery-row storage paths, and
    /// staging paths. Values may still carry a public-URL prefix; the
    /// reconciler normalizes them. Recomputed fresh on every call.
    pub async fn storage_path_fields(&self) -> Result<Vec<String>, DbError> {
        let mut fields = Vec::new();

        let rows = sqlx::query("SELECT image_path, gallery_urls FROM products")
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
        for row in &rows {
            if let Some(path) = text_col(row, "image_path") {
                if !path.is_empty() {
                    fields.push(path);
                }
            }
            if let Some(gallery_json) = text_col(row, "gallery_urls") {
                let entries: Vec<String> =
                    serde_json::from_str(&gallery_json).unwrap_or_default();
                fields.extend(entries.into_iter().filter(|e| !e.is_empty()));
            }
        }

        let rows = sqlx::query(
            "SELECT storage_path FROM product_images WHERE storage_path IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from_sqlx)?;
        for row in &rows {
            if let Some(path) = text_col(row, "storage_path") {
                if !path.is_empty() {
                    fields.push(path);
                }
            }
        }

        let rows = sqlx::query("SELECT storage_path FROM staging_images")
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
        for row in &rows {
            if let Some(path) = text_col(row, "storage_path") {
                if !path.is_empty() {
                    fields.push(path);
                }
            }
        }

        Ok(fields)
    }
}
