//! # Product Repository
//!
//! Database operations for products, including the stock mutator.
//!
//! ## The Stock Mutator
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    apply_stock_delta(conn, id, delta)                   │
//! │                                                                         │
//! │  UPDATE products                                                        │
//! │     SET quantity = quantity + delta                                     │
//! │   WHERE id = ? AND is_active = 1                                        │
//! │     AND quantity + delta >= 0        ◄── checked on the row as written  │
//! │       │                                                                 │
//! │       ├── 1 row  → done                                                 │
//! │       └── 0 rows → re-read: missing/inactive → ProductNotFound          │
//! │                            otherwise        → InsufficientStock         │
//! │                                                                         │
//! │  Callers: sale transaction (-qty), purchase receipt (+qty),             │
//! │           stock adjustment (±n). Always inside the caller's txn.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use duka_core::validation::validate_stock_adjustment;
use duka_core::{CoreError, NewProduct, Product, StockAdjustment};
use serde_json::json;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::audit::{AuditEvent, AuditRepository};

const PRODUCT_COLUMNS: &str = "id, sku, name, quantity, reorder_level, cost_price, unit_price, \
                               is_active, created_at, updated_at";

/// Repository for product database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Gets a product by ID (active or not).
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(product)
    }

    /// Inserts a new product.
    pub async fn insert(&self, new: &NewProduct) -> DbResult<Product> {
        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4().to_string(),
            sku: new.sku.trim().to_string(),
            name: new.name.trim().to_string(),
            quantity: new.quantity,
            reorder_level: new.reorder_level,
            cost_price: new.cost_price,
            unit_price: new.unit_price,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        debug!(id = %product.id, sku = %product.sku, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, name, quantity, reorder_level, cost_price, unit_price,
                is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.quantity)
        .bind(product.reorder_level)
        .bind(product.cost_price)
        .bind(product.unit_price)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(product)
    }

    /// Applies a manual stock correction and audits it.
    ///
    /// Rejected (nothing written) if the result would go below zero.
    pub async fn adjust_stock(
        &self,
        id: &str,
        adjustment: &StockAdjustment,
        user_id: &str,
    ) -> DbResult<Product> {
        validate_stock_adjustment(adjustment)?;

        let mut tx = self.pool.begin().await?;
        apply_stock_delta(&mut *tx, id, adjustment.delta).await?;
        tx.commit().await?;

        info!(product_id = %id, delta = adjustment.delta, "Stock adjusted");

        AuditRepository::new(self.pool.clone())
            .record_quietly(AuditEvent {
                user_id,
                action: "STOCK_ADJUSTED",
                entity_type: "product",
                entity_id: id,
                details: Some(json!({
                    "delta": adjustment.delta,
                    "reason": adjustment.reason,
                })),
            })
            .await;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", id))
    }

    /// Active products at or below their reorder level, lowest stock first.
    pub async fn low_stock(&self, limit: Option<i64>) -> DbResult<Vec<Product>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT ");
        qb.push(PRODUCT_COLUMNS)
            .push(" FROM products WHERE is_active = 1 AND quantity <= reorder_level")
            .push(" ORDER BY quantity ASC, name ASC");
        if let Some(limit) = limit {
            qb.push(" LIMIT ").push_bind(limit.clamp(1, 500));
        }

        let products = qb.build_query_as::<Product>().fetch_all(&self.pool).await?;
        Ok(products)
    }

    /// Soft-deactivates a product. Historical sales keep referencing it.
    pub async fn deactivate(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE products SET is_active = 0, updated_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }
        Ok(())
    }
}

// =============================================================================
// Stock Mutator
// =============================================================================

/// Applies a signed quantity delta to a product inside the caller's
/// transaction. Never lets stock go negative.
pub async fn apply_stock_delta(
    conn: &mut SqliteConnection,
    product_id: &str,
    delta: i64,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE products
        SET quantity = quantity + ?2,
            updated_at = ?3
        WHERE id = ?1
          AND is_active = 1
          AND quantity + ?2 >= 0
        "#,
    )
    .bind(product_id)
    .bind(delta)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    let current: Option<(String, i64, bool)> =
        sqlx::query_as("SELECT name, quantity, is_active FROM products WHERE id = ?1")
            .bind(product_id)
            .fetch_optional(&mut *conn)
            .await?;

    match current {
        Some((name, available, true)) => Err(CoreError::InsufficientStock {
            product: name,
            available,
            requested: -delta,
        }
        .into()),
        _ => Err(CoreError::ProductNotFound(product_id.to_string()).into()),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
