//! # Purchase Repository
//!
//! Purchase orders and goods receipt.
//!
//! ```text
//! create  ──► purchase_orders (pending) + purchase_items
//! receive ──► pending → received (once) + apply_stock_delta(+qty) per line
//! ```

use chrono::Utc;
use duka_core::validation::validate_purchase_order;
use duka_core::{
    CoreError, NewPurchaseOrder, PurchaseItem, PurchaseOrder, PurchaseOrderWithItems,
    PurchaseStatus,
};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::audit::{AuditEvent, AuditRepository};
use crate::repository::product::apply_stock_delta;

const ORDER_COLUMNS: &str =
    "id, supplier_id, status, total_cost, notes, created_by, received_at, created_at";

/// Repository for purchase orders.
#[derive(Debug, Clone)]
pub struct PurchaseRepository {
    pool: SqlitePool,
}

impl PurchaseRepository {
    /// Creates a new PurchaseRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PurchaseRepository { pool }
    }

    /// Creates a pending purchase order with its lines.
    pub async fn create(
        &self,
        new: &NewPurchaseOrder,
        user_id: &str,
    ) -> DbResult<PurchaseOrderWithItems> {
        validate_purchase_order(new)?;

        let now = Utc::now();
        let order_id = Uuid::new_v4().to_string();
        let items: Vec<PurchaseItem> = new
            .items
            .iter()
            .map(|item| PurchaseItem {
                id: Uuid::new_v4().to_string(),
                purchase_order_id: order_id.clone(),
                product_id: item.product_id.clone(),
                quantity: item.quantity,
                unit_cost: item.unit_cost,
                subtotal: item.quantity * item.unit_cost,
            })
            .collect();

        let order = PurchaseOrder {
            id: order_id,
            supplier_id: new.supplier_id.trim().to_string(),
            status: PurchaseStatus::Pending,
            total_cost: items.iter().map(|i| i.subtotal).sum(),
            notes: new.notes.clone(),
            created_by: user_id.to_string(),
            received_at: None,
            created_at: now,
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO purchase_orders (
                id, supplier_id, status, total_cost, notes, created_by, received_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&order.id)
        .bind(&order.supplier_id)
        .bind(order.status)
        .bind(order.total_cost)
        .bind(&order.notes)
        .bind(&order.created_by)
        .bind(order.received_at)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await?;

        for item in &items {
            sqlx::query(
                r#"
                INSERT INTO purchase_items (
                    id, purchase_order_id, product_id, quantity, unit_cost, subtotal
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(&item.id)
            .bind(&item.purchase_order_id)
            .bind(&item.product_id)
            .bind(item.quantity)
            .bind(item.unit_cost)
            .bind(item.subtotal)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(purchase_id = %order.id, total_cost = order.total_cost, "Purchase order created");
        Ok(PurchaseOrderWithItems { order, items })
    }

    /// Gets a purchase order with its lines.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<PurchaseOrderWithItems>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM purchase_orders WHERE id = ?1");
        let Some(order) = sqlx::query_as::<_, PurchaseOrder>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let items = sqlx::query_as::<_, PurchaseItem>(
            r#"
            SELECT id, purchase_order_id, product_id, quantity, unit_cost, subtotal
            FROM purchase_items
            WHERE purchase_order_id = ?1
            ORDER BY rowid
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(PurchaseOrderWithItems { order, items }))
    }

    /// Receives a pending order: flips it to `received` and adds every line
    /// to stock, atomically. A second receive is rejected.
    pub async fn receive(&self, id: &str, user_id: &str) -> DbResult<PurchaseOrderWithItems> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE purchase_orders
            SET status = 'received', received_at = ?2
            WHERE id = ?1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            let status: Option<PurchaseStatus> =
                sqlx::query_scalar("SELECT status FROM purchase_orders WHERE id = ?1")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;

            return Err(match status {
                Some(status) => CoreError::InvalidPurchaseState {
                    id: id.to_string(),
                    status: status.as_str().to_string(),
                }
                .into(),
                None => DbError::not_found("PurchaseOrder", id),
            });
        }

        let lines: Vec<(String, i64)> = sqlx::query_as(
            "SELECT product_id, quantity FROM purchase_items WHERE purchase_order_id = ?1",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        // A deactivated product aborts the whole receipt.
        for (product_id, quantity) in &lines {
            apply_stock_delta(&mut *tx, product_id, *quantity).await?;
        }

        tx.commit().await?;

        info!(purchase_id = %id, lines = lines.len(), "Purchase order received");

        AuditRepository::new(self.pool.clone())
            .record_quietly(AuditEvent {
                user_id,
                action: "PURCHASE_RECEIVED",
                entity_type: "purchase_order",
                entity_id: id,
                details: Some(json!({ "lines": lines.len() })),
            })
            .await;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("PurchaseOrder", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures;
    use duka_core::NewPurchaseItem;

    #[tokio::test]
    async fn test_create_and_receive() {
        let db = fixtures::memory_db().await;
        let flour = fixtures::product(&db, "FLOUR-2KG", 4, 200).await;
        let soap = fixtures::product(&db, "SOAP-BAR", 0, 60).await;

        let created = db
            .purchases()
            .create(
                &NewPurchaseOrder {
                    supplier_id: "supplier-1".to_string(),
                    items: vec![
                        NewPurchaseItem {
                            product_id: flour.id.clone(),
                            quantity: 10,
                            unit_cost: 150,
                        },
                        NewPurchaseItem {
                            product_id: soap.id.clone(),
                            quantity: 24,
                            unit_cost: 40,
                        },
                    ],
                    notes: None,
                },
                "manager-1",
            )
            .await
            .unwrap();
        assert_eq!(created.order.status, PurchaseStatus::Pending);
        assert_eq!(created.order.total_cost, 10 * 150 + 24 * 40);

        let received = db
            .purchases()
            .receive(&created.order.id, "manager-1")
            .await
            .unwrap();
        assert_eq!(received.order.status, PurchaseStatus::Received);
        assert!(received.order.received_at.is_some());
        assert_eq!(received.items.len(), 2);

        let flour = db.products().get_by_id(&flour.id).await.unwrap().unwrap();
        let soap = db.products().get_by_id(&soap.id).await.unwrap().unwrap();
        assert_eq!(flour.quantity, 14);
        assert_eq!(soap.quantity, 24);

        let entries = db
            .audit()
            .list_for_entity("purchase_order", &created.order.id)
            .await
            .unwrap();
        assert_eq!(entries[0].action, "PURCHASE_RECEIVED");
    }

    #[tokio::test]
    async fn test_receive_twice_is_rejected() {
        let db = fixtures::memory_db().await;
        let flour = fixtures::product(&db, "FLOUR-2KG", 4, 200).await;

        let created = db
            .purchases()
            .create(
                &NewPurchaseOrder {
                    supplier_id: "supplier-1".to_string(),
                    items: vec![NewPurchaseItem {
                        product_id: flour.id.clone(),
                        quantity: 10,
                        unit_cost: 150,
                    }],
                    notes: Some("weekly".to_string()),
                },
                "manager-1",
            )
            .await
            .unwrap();

        db.purchases().receive(&created.order.id, "manager-1").await.unwrap();
        let err = db
            .purchases()
            .receive(&created.order.id, "manager-1")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::InvalidPurchaseState { .. })));

        let flour = db.products().get_by_id(&flour.id).await.unwrap().unwrap();
        assert_eq!(flour.quantity, 14);
    }

    #[tokio::test]
    async fn test_receive_unknown_order() {
        let db = fixtures::memory_db().await;
        let err = db.purchases().receive("missing", "manager-1").await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_create_rejects_empty_order() {
        let db = fixtures::memory_db().await;
        let err = db
            .purchases()
            .create(
                &NewPurchaseOrder {
                    supplier_id: "supplier-1".to_string(),
                    items: vec![],
                    notes: None,
                },
                "manager-1",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::Validation(_))));
    }
}
