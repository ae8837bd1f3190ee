//! # Sale Repository
//!
//! The sale transaction, sale queries, and the settlement writes used by
//! M-Pesa reconciliation.
//!
//! ## The Sale Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  create_sale(draft, cashier)                                            │
//! │                                                                         │
//! │  0. validate + verify totals + stock pre-check     (no transaction yet) │
//! │                                                                         │
//! │  BEGIN ─────────────────────────────────────────────────────────────┐   │
//! │  1. apply_stock_delta(-qty) per line   ◄── first statement writes,  │   │
//! │                                            so queued writers wait   │   │
//! │  2. highest INV-YYYYMMDD-NNNN today + 1                             │   │
//! │  3. INSERT sale (status defaulted from the payment method)          │   │
//! │  4. INSERT sale_items (product name snapshot)                       │   │
//! │  5. apply_sale_loyalty (accrue, redeem, total_purchases, credit)    │   │
//! │  COMMIT ────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ├── UNIQUE(invoice_number) → whole transaction retried (3x)       │
//! │       ├── any other error        → rolled back, nothing persisted       │
//! │       ▼                                                                 │
//! │  6. audit SALE_CREATED (failure only logged)                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Mobile Money Settlement
//! ```text
//! attach_mobile_request     → merchant/checkout ids, state PENDING_STK
//! apply_mobile_payment      → amount_paid += amount, paid|partial, COMPLETED
//! mark_mobile_failed        → FAILED, no financial change
//!
//! Both settlement writes only match rows still in PENDING_STK, so a
//! duplicate callback changes nothing.
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use duka_core::invoice::{invoice_prefix, next_invoice_number};
use duka_core::money::{balance_due, change_due};
use duka_core::validation::{validate_sale_draft, verify_totals};
use duka_core::{
    CoreError, MobilePaymentState, Money, PaymentMethod, PaymentStatus, Product, Sale, SaleDraft,
    SaleFilter, SaleItem, SaleWithItems, TaxRate, INVOICE_RETRY_ATTEMPTS,
};
use serde_json::json;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::audit::{AuditEvent, AuditRepository};
use crate::repository::customer::apply_sale_loyalty;
use crate::repository::product::apply_stock_delta;

const SALE_COLUMNS: &str = "id, invoice_number, customer_id, cashier_id, subtotal, discount, \
                            tax_rate_bps, tax, total, amount_paid, change_due, payment_method, \
                            payment_status, loyalty_points_redeemed, loyalty_discount, notes, \
                            merchant_request_id, checkout_request_id, mobile_payment_state, \
                            mpesa_receipt_number, mpesa_transaction_date, created_at, updated_at";

const SALE_ITEM_COLUMNS: &str =
    "id, sale_id, product_id, product_name, quantity, unit_price, discount, subtotal, created_at";

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 500;

/// What the provider reported for a successful push payment.
#[derive(Debug, Clone)]
pub struct MobileSettlement {
    pub amount: i64,
    pub receipt_number: Option<String>,
    pub transaction_date: Option<String>,
}

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    // =========================================================================
    // Sale Transaction
    // =========================================================================

    /// Creates a sale with its items, stock decrements and loyalty update
    /// as one atomic unit.
    ///
    /// ## Errors
    /// - `Core(Validation | TotalsMismatch)` - bad input, nothing opened
    /// - `Core(ProductNotFound | InsufficientStock)` - rolled back
    /// - `Core(CustomerNotFound | InsufficientLoyaltyPoints)` - rolled back
    /// - `Conflict` - invoice number collided on every attempt
    pub async fn create_sale(&self, draft: &SaleDraft, cashier_id: &str) -> DbResult<Sale> {
        validate_sale_draft(draft, cashier_id)?;
        let total = verify_totals(draft)?;
        let products = self.precheck_stock(draft).await?;

        if let Some(customer_id) = customer_ref(draft) {
            let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM customers WHERE id = ?1")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await?;
            if exists.is_none() {
                return Err(CoreError::CustomerNotFound(customer_id.to_string()).into());
            }
        }

        let mut attempt = 1;
        let sale = loop {
            match self.try_create_sale(draft, cashier_id, total, &products).await {
                Ok(sale) => break sale,
                Err(e) if e.is_unique_violation_on("invoice_number") => {
                    if attempt >= INVOICE_RETRY_ATTEMPTS {
                        warn!(attempt, "Invoice number conflict persisted, giving up");
                        return Err(DbError::Conflict(
                            "could not allocate a unique invoice number".to_string(),
                        ));
                    }
                    debug!(attempt, "Invoice number taken by a concurrent sale, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        info!(
            sale_id = %sale.id,
            invoice_number = %sale.invoice_number,
            total = sale.total,
            payment_method = sale.payment_method.as_str(),
            "Sale created"
        );

        AuditRepository::new(self.pool.clone())
            .record_quietly(AuditEvent {
                user_id: cashier_id,
                action: "SALE_CREATED",
                entity_type: "sale",
                entity_id: &sale.id,
                details: Some(json!({
                    "invoice_number": sale.invoice_number,
                    "total": sale.total,
                    "payment_method": sale.payment_method.as_str(),
                    "payment_status": sale.payment_status.as_str(),
                    "items": draft.items.len(),
                })),
            })
            .await;

        Ok(sale)
    }

    /// Friendly early check: every product exists, is active and has enough
    /// on hand for the summed quantity of its lines. The transaction checks
    /// again against the rows it writes.
    async fn precheck_stock(&self, draft: &SaleDraft) -> DbResult<HashMap<String, Product>> {
        let mut requested: HashMap<&str, i64> = HashMap::new();
        for item in &draft.items {
            *requested.entry(item.product_id.as_str()).or_default() += item.quantity;
        }

        let sql = "SELECT id, sku, name, quantity, reorder_level, cost_price, unit_price, \
                   is_active, created_at, updated_at FROM products WHERE id = ?1";

        let mut products = HashMap::with_capacity(requested.len());
        for (product_id, quantity) in requested {
            let product = sqlx::query_as::<_, Product>(sql)
                .bind(product_id)
                .fetch_optional(&self.pool)
                .await?
                .filter(|p| p.is_active)
                .ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()))?;

            if !product.can_sell(quantity) {
                return Err(CoreError::InsufficientStock {
                    product: product.name.clone(),
                    available: product.quantity,
                    requested: quantity,
                }
                .into());
            }
            products.insert(product.id.clone(), product);
        }

        Ok(products)
    }

    async fn try_create_sale(
        &self,
        draft: &SaleDraft,
        cashier_id: &str,
        total: Money,
        products: &HashMap<String, Product>,
    ) -> DbResult<Sale> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // 1. Stock first: the opening write takes SQLite's writer lock.
        for item in &draft.items {
            apply_stock_delta(&mut *tx, &item.product_id, -item.quantity).await?;
        }

        // 2. Invoice number
        let invoice_number = allocate_invoice_number(&mut *tx, now).await?;

        // 3. Sale row
        let sale = build_sale(draft, cashier_id, total, invoice_number, now);
        insert_sale(&mut *tx, &sale).await?;

        // 4. Lines
        for item in &draft.items {
            let product_name = products
                .get(&item.product_id)
                .map(|p| p.name.as_str())
                .unwrap_or(item.product_id.as_str());

            sqlx::query(
                r#"
                INSERT INTO sale_items (
                    id, sale_id, product_id, product_name, quantity,
                    unit_price, discount, subtotal, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&sale.id)
            .bind(&item.product_id)
            .bind(product_name)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.discount)
            .bind(item.subtotal().minor())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        // 5. Customer
        if let Some(customer_id) = sale.customer_id.as_deref() {
            let owed = if sale.payment_method == PaymentMethod::Credit {
                balance_due(total, sale.amount_paid())
            } else {
                Money::zero()
            };
            apply_sale_loyalty(&mut *tx, customer_id, total, sale.loyalty_points_redeemed, owed)
                .await?;
        }

        tx.commit().await?;
        Ok(sale)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Gets a sale by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Sale>> {
        let sql = format!("SELECT {SALE_COLUMNS} FROM sales WHERE id = ?1");
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(sale)
    }

    /// Gets the lines of a sale.
    pub async fn get_items(&self, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        let sql = format!(
            "SELECT {SALE_ITEM_COLUMNS} FROM sale_items WHERE sale_id = ?1 ORDER BY created_at, rowid"
        );
        let items = sqlx::query_as::<_, SaleItem>(&sql)
            .bind(sale_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(items)
    }

    /// Gets a sale with its lines.
    pub async fn get_with_items(&self, id: &str) -> DbResult<Option<SaleWithItems>> {
        let Some(sale) = self.get_by_id(id).await? else {
            return Ok(None);
        };
        let items = self.get_items(id).await?;
        Ok(Some(SaleWithItems { sale, items }))
    }

    /// Lists sales matching the filter, newest first.
    pub async fn list(&self, filter: &SaleFilter) -> DbResult<Vec<Sale>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT ");
        qb.push(SALE_COLUMNS).push(" FROM sales WHERE 1 = 1");

        if let Some(from) = filter.from {
            qb.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            qb.push(" AND created_at <= ").push_bind(to);
        }
        if let Some(status) = filter.payment_status {
            qb.push(" AND payment_status = ").push_bind(status);
        }
        if let Some(method) = filter.payment_method {
            qb.push(" AND payment_method = ").push_bind(method);
        }
        if let Some(customer_id) = filter.customer_id.as_deref() {
            qb.push(" AND customer_id = ").push_bind(customer_id);
        }
        if let Some(cashier_id) = filter.cashier_id.as_deref() {
            qb.push(" AND cashier_id = ").push_bind(cashier_id);
        }

        let limit = filter
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let offset = filter.offset.unwrap_or(0).max(0);
        qb.push(" ORDER BY created_at DESC, invoice_number DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let sales = qb.build_query_as::<Sale>().fetch_all(&self.pool).await?;
        Ok(sales)
    }

    // =========================================================================
    // Mobile Money
    // =========================================================================

    /// Records the provider ids of a push payment on the sale and moves it
    /// to `PENDING_STK`.
    ///
    /// Only matches a mobile-money sale that is still `pending` with no push
    /// outstanding (never pushed, or the last push `FAILED`); returns `false`
    /// otherwise, leaving the ids of an outstanding push in place.
    pub async fn attach_mobile_request(
        &self,
        sale_id: &str,
        merchant_request_id: &str,
        checkout_request_id: &str,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sales
            SET merchant_request_id = ?2,
                checkout_request_id = ?3,
                mobile_payment_state = 'PENDING_STK',
                updated_at = ?4
            WHERE id = ?1
              AND payment_method = 'mobile_money'
              AND payment_status = 'pending'
              AND (mobile_payment_state IS NULL OR mobile_payment_state = 'FAILED')
            "#,
        )
        .bind(sale_id)
        .bind(merchant_request_id)
        .bind(checkout_request_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// The sale still waiting on the given push, if any.
    pub async fn find_pending_by_merchant_request(
        &self,
        merchant_request_id: &str,
    ) -> DbResult<Option<Sale>> {
        let sql = format!(
            "SELECT {SALE_COLUMNS} FROM sales \
             WHERE merchant_request_id = ?1 AND mobile_payment_state = 'PENDING_STK'"
        );
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(merchant_request_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(sale)
    }

    /// The sale a checkout session belongs to, in any state.
    pub async fn find_by_checkout_request(&self, checkout_request_id: &str) -> DbResult<Option<Sale>> {
        let sql = format!("SELECT {SALE_COLUMNS} FROM sales WHERE checkout_request_id = ?1");
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(checkout_request_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(sale)
    }

    /// Applies a successful push payment exactly once.
    ///
    /// ```text
    /// BEGIN
    ///   UPDATE ... SET mobile_payment_state = 'COMPLETED'
    ///    WHERE id = ? AND mobile_payment_state = 'PENDING_STK'   ── 0 rows → false
    ///   amount_paid += amount, status = paid | partial, change, receipt
    /// COMMIT
    /// ```
    ///
    /// Returns `false` when the sale was not waiting (already settled,
    /// failed, or unknown); nothing is written in that case.
    pub async fn apply_mobile_payment(
        &self,
        sale_id: &str,
        settlement: &MobileSettlement,
    ) -> DbResult<bool> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE sales
            SET mobile_payment_state = 'COMPLETED',
                updated_at = ?2
            WHERE id = ?1 AND mobile_payment_state = 'PENDING_STK'
            "#,
        )
        .bind(sale_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let (amount_paid, total): (i64, i64) =
            sqlx::query_as("SELECT amount_paid, total FROM sales WHERE id = ?1")
                .bind(sale_id)
                .fetch_one(&mut *tx)
                .await?;

        let paid = Money::from_minor(amount_paid) + Money::from_minor(settlement.amount);
        let total = Money::from_minor(total);
        let status = PaymentStatus::after_settlement(paid, total);

        sqlx::query(
            r#"
            UPDATE sales
            SET amount_paid = ?2,
                payment_status = ?3,
                change_due = ?4,
                mpesa_receipt_number = ?5,
                mpesa_transaction_date = ?6
            WHERE id = ?1
            "#,
        )
        .bind(sale_id)
        .bind(paid.minor())
        .bind(status)
        .bind(change_due(paid, total).minor())
        .bind(&settlement.receipt_number)
        .bind(&settlement.transaction_date)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            sale_id,
            amount = settlement.amount,
            payment_status = status.as_str(),
            "Mobile payment applied"
        );
        Ok(true)
    }

    /// Marks a waiting push payment as failed. No financial change; the sale
    /// stays `pending` so another push can be started.
    pub async fn mark_mobile_failed(&self, sale_id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sales
            SET mobile_payment_state = 'FAILED',
                updated_at = ?2
            WHERE id = ?1 AND mobile_payment_state = 'PENDING_STK'
            "#,
        )
        .bind(sale_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn customer_ref(draft: &SaleDraft) -> Option<&str> {
    draft
        .customer_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

/// Reads the highest invoice number issued today and returns the next one.
async fn allocate_invoice_number(conn: &mut SqliteConnection, now: DateTime<Utc>) -> DbResult<String> {
    let day = now.date_naive();
    let prefix = invoice_prefix(day);

    let last: Option<String> = sqlx::query_scalar(
        r#"
        SELECT invoice_number FROM sales
        WHERE invoice_number LIKE ?1 || '%'
        ORDER BY length(invoice_number) DESC, invoice_number DESC
        LIMIT 1
        "#,
    )
    .bind(&prefix)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(next_invoice_number(day, last.as_deref()))
}

fn build_sale(
    draft: &SaleDraft,
    cashier_id: &str,
    total: Money,
    invoice_number: String,
    now: DateTime<Utc>,
) -> Sale {
    // Nothing has been received yet for a push payment; the callback adds it.
    let amount_paid = if draft.payment_method == PaymentMethod::MobileMoney {
        Money::zero()
    } else {
        Money::from_minor(draft.amount_paid)
    };
    let payment_status =
        PaymentStatus::default_for(draft.payment_method, draft.payment_status, amount_paid, total);

    Sale {
        id: Uuid::new_v4().to_string(),
        invoice_number,
        customer_id: customer_ref(draft).map(str::to_string),
        cashier_id: cashier_id.trim().to_string(),
        subtotal: draft.subtotal,
        discount: draft.discount,
        tax_rate_bps: TaxRate::from_percentage(draft.tax_rate).bps() as i64,
        tax: draft.tax,
        total: total.minor(),
        amount_paid: amount_paid.minor(),
        change_due: change_due(amount_paid, total).minor(),
        payment_method: draft.payment_method,
        payment_status,
        loyalty_points_redeemed: draft.loyalty_points_redeemed,
        loyalty_discount: draft.loyalty_discount,
        notes: draft.notes.clone(),
        merchant_request_id: None,
        checkout_request_id: None,
        mobile_payment_state: None::<MobilePaymentState>,
        mpesa_receipt_number: None,
        mpesa_transaction_date: None,
        created_at: now,
        updated_at: now,
    }
}

async fn insert_sale(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO sales (
            id, invoice_number, customer_id, cashier_id,
            subtotal, discount, tax_rate_bps, tax, total,
            amount_paid, change_due, payment_method, payment_status,
            loyalty_points_redeemed, loyalty_discount, notes,
            merchant_request_id, checkout_request_id, mobile_payment_state,
            mpesa_receipt_number, mpesa_transaction_date,
            created_at, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4,
            ?5, ?6, ?7, ?8, ?9,
            ?10, ?11, ?12, ?13,
            ?14, ?15, ?16,
            ?17, ?18, ?19,
            ?20, ?21,
            ?22, ?23
        )
        "#,
    )
    .bind(&sale.id)
    .bind(&sale.invoice_number)
    .bind(&sale.customer_id)
    .bind(&sale.cashier_id)
    .bind(sale.subtotal)
    .bind(sale.discount)
    .bind(sale.tax_rate_bps)
    .bind(sale.tax)
    .bind(sale.total)
    .bind(sale.amount_paid)
    .bind(sale.change_due)
    .bind(sale.payment_method)
    .bind(sale.payment_status)
    .bind(sale.loyalty_points_redeemed)
    .bind(sale.loyalty_discount)
    .bind(&sale.notes)
    .bind(&sale.merchant_request_id)
    .bind(&sale.checkout_request_id)
    .bind(sale.mobile_payment_state)
    .bind(&sale.mpesa_receipt_number)
    .bind(&sale.mpesa_transaction_date)
    .bind(sale.created_at)
    .bind(sale.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::fixtures;
    use duka_core::NewSaleItem;

    fn draft(lines: &[(&str, i64, i64)], method: PaymentMethod, amount_paid: i64) -> SaleDraft {
        let items: Vec<NewSaleItem> = lines
            .iter()
            .map(|(product_id, quantity, unit_price)| NewSaleItem {
                product_id: product_id.to_string(),
                quantity: *quantity,
                unit_price: *unit_price,
                discount: 0,
            })
            .collect();
        let subtotal = items.iter().map(|i| i.quantity * i.unit_price).sum();
        SaleDraft {
            items,
            customer_id: None,
            subtotal,
            discount: 0,
            tax_rate: 0.0,
            tax: 0,
            total: subtotal,
            amount_paid,
            payment_method: method,
            payment_status: None,
            loyalty_points_redeemed: 0,
            loyalty_discount: 0,
            notes: None,
        }
    }

    async fn stock_of(db: &Database, product_id: &str) -> i64 {
        db.products()
            .get_by_id(product_id)
            .await
            .unwrap()
            .unwrap()
            .quantity
    }

    #[tokio::test]
    async fn test_cash_sale_decrements_stock() {
        let db = fixtures::memory_db().await;
        let product = fixtures::product(&db, "A", 5, 100).await;

        let sale = db
            .sales()
            .create_sale(&draft(&[(&product.id, 2, 100)], PaymentMethod::Cash, 200), "cashier-1")
            .await
            .unwrap();

        assert_eq!(sale.total, 200);
        assert_eq!(sale.change_due, 0);
        assert_eq!(sale.payment_status, PaymentStatus::Paid);
        assert!(sale.invoice_number.starts_with("INV-"));
        assert_eq!(stock_of(&db, &product.id).await, 3);

        let stored = db.sales().get_with_items(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.sale.invoice_number, sale.invoice_number);
        assert_eq!(stored.items.len(), 1);
        assert_eq!(stored.items[0].product_name, "Product A");
        assert_eq!(stored.items[0].subtotal, 200);

        let audit = db.audit().list_for_entity("sale", &sale.id).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, "SALE_CREATED");
    }

    #[tokio::test]
    async fn test_change_due_on_overpayment() {
        let db = fixtures::memory_db().await;
        let product = fixtures::product(&db, "A", 5, 120).await;

        let sale = db
            .sales()
            .create_sale(&draft(&[(&product.id, 1, 120)], PaymentMethod::Cash, 200), "cashier-1")
            .await
            .unwrap();
        assert_eq!(sale.amount_paid, 200);
        assert_eq!(sale.change_due, 80);
    }

    #[tokio::test]
    async fn test_insufficient_stock_rolls_back_everything() {
        let db = fixtures::memory_db().await;
        let a = fixtures::product(&db, "A", 5, 100).await;
        let b = fixtures::product(&db, "B", 1, 50).await;

        let err = db
            .sales()
            .create_sale(
                &draft(&[(&a.id, 2, 100), (&b.id, 3, 50)], PaymentMethod::Cash, 350),
                "cashier-1",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::InsufficientStock { .. })));

        assert_eq!(stock_of(&db, &a.id).await, 5);
        assert_eq!(stock_of(&db, &b.id).await, 1);
        assert!(db.sales().list(&SaleFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_lines_are_summed_for_stock() {
        let db = fixtures::memory_db().await;
        let a = fixtures::product(&db, "A", 3, 100).await;

        let err = db
            .sales()
            .create_sale(
                &draft(&[(&a.id, 2, 100), (&a.id, 2, 100)], PaymentMethod::Cash, 400),
                "cashier-1",
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Core(CoreError::InsufficientStock { available: 3, requested: 4, .. })
        ));
        assert_eq!(stock_of(&db, &a.id).await, 3);
    }

    #[tokio::test]
    async fn test_unknown_product_is_rejected() {
        let db = fixtures::memory_db().await;
        let err = db
            .sales()
            .create_sale(&draft(&[("missing", 1, 100)], PaymentMethod::Cash, 100), "cashier-1")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::ProductNotFound(_))));
    }

    #[tokio::test]
    async fn test_totals_mismatch_is_rejected_before_writing() {
        let db = fixtures::memory_db().await;
        let a = fixtures::product(&db, "A", 5, 100).await;

        let mut bad = draft(&[(&a.id, 2, 100)], PaymentMethod::Cash, 200);
        bad.total = 150;
        let err = db.sales().create_sale(&bad, "cashier-1").await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::TotalsMismatch { .. })));
        assert_eq!(stock_of(&db, &a.id).await, 5);
    }

    #[tokio::test]
    async fn test_loyalty_accrual_and_redemption() {
        let db = fixtures::memory_db().await;
        let a = fixtures::product(&db, "A", 10, 500).await;
        let customer = fixtures::customer(&db, 20).await;

        let mut d = draft(&[(&a.id, 3, 500)], PaymentMethod::Cash, 1_490);
        d.customer_id = Some(customer.id.clone());
        d.loyalty_points_redeemed = 10;
        d.loyalty_discount = 10;
        d.total = 1_490;

        let sale = db.sales().create_sale(&d, "cashier-1").await.unwrap();
        assert_eq!(sale.total, 1_490);

        let fetched = db.customers().get_by_id(&customer.id).await.unwrap().unwrap();
        // 20 - 10 + floor(1490 / 100)
        assert_eq!(fetched.loyalty_points, 24);
        assert_eq!(fetched.total_purchases, 1_490);
        assert_eq!(fetched.outstanding_balance, 0);
    }

    #[tokio::test]
    async fn test_over_redemption_aborts_sale() {
        let db = fixtures::memory_db().await;
        let a = fixtures::product(&db, "A", 10, 500).await;
        let customer = fixtures::customer(&db, 5).await;

        let mut d = draft(&[(&a.id, 1, 500)], PaymentMethod::Cash, 500);
        d.customer_id = Some(customer.id.clone());
        d.loyalty_points_redeemed = 6;

        let err = db.sales().create_sale(&d, "cashier-1").await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Core(CoreError::InsufficientLoyaltyPoints { balance: 5, requested: 6 })
        ));

        let fetched = db.customers().get_by_id(&customer.id).await.unwrap().unwrap();
        assert_eq!(fetched.loyalty_points, 5);
        assert_eq!(fetched.total_purchases, 0);
        assert_eq!(stock_of(&db, &a.id).await, 10);
        assert!(db.sales().list(&SaleFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_credit_sale_adds_outstanding_balance() {
        let db = fixtures::memory_db().await;
        let a = fixtures::product(&db, "A", 10, 400).await;
        let customer = fixtures::customer(&db, 0).await;

        let mut d = draft(&[(&a.id, 2, 400)], PaymentMethod::Credit, 300);
        d.customer_id = Some(customer.id.clone());

        let sale = db.sales().create_sale(&d, "cashier-1").await.unwrap();
        assert_eq!(sale.payment_status, PaymentStatus::Partial);

        let fetched = db.customers().get_by_id(&customer.id).await.unwrap().unwrap();
        assert_eq!(fetched.outstanding_balance, 500);
        assert_eq!(fetched.loyalty_points, 8);
    }

    #[tokio::test]
    async fn test_mobile_money_sale_starts_pending_with_nothing_paid() {
        let db = fixtures::memory_db().await;
        let a = fixtures::product(&db, "A", 10, 250).await;

        let sale = db
            .sales()
            .create_sale(&draft(&[(&a.id, 2, 250)], PaymentMethod::MobileMoney, 500), "cashier-1")
            .await
            .unwrap();
        assert_eq!(sale.payment_status, PaymentStatus::Pending);
        assert_eq!(sale.amount_paid, 0);
        assert!(sale.mobile_payment_state.is_none());
        assert!(sale.awaits_mobile_payment());
    }

    #[tokio::test]
    async fn test_invoice_numbers_increase_within_a_day() {
        let db = fixtures::memory_db().await;
        let a = fixtures::product(&db, "A", 10, 100).await;

        let mut numbers = Vec::new();
        for _ in 0..3 {
            let sale = db
                .sales()
                .create_sale(&draft(&[(&a.id, 1, 100)], PaymentMethod::Cash, 100), "cashier-1")
                .await
                .unwrap();
            numbers.push(sale.invoice_number);
        }

        let prefix = invoice_prefix(Utc::now().date_naive());
        assert_eq!(numbers[0], format!("{prefix}0001"));
        assert_eq!(numbers[1], format!("{prefix}0002"));
        assert_eq!(numbers[2], format!("{prefix}0003"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sales_get_unique_invoices_and_exact_stock() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("duka.db")).max_connections(8))
            .await
            .unwrap();
        let a = fixtures::product(&db, "A", 100, 10).await;

        let mut handles = Vec::new();
        for _ in 0..12 {
            let sales = db.sales();
            let d = draft(&[(&a.id, 2, 10)], PaymentMethod::Cash, 20);
            handles.push(tokio::spawn(async move {
                sales.create_sale(&d, "cashier-1").await
            }));
        }

        let mut numbers = Vec::new();
        for handle in handles {
            numbers.push(handle.await.unwrap().unwrap().invoice_number);
        }
        numbers.sort();
        numbers.dedup();
        assert_eq!(numbers.len(), 12);
        assert_eq!(stock_of(&db, &a.id).await, 100 - 24);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sales_never_oversell() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("duka.db")).max_connections(8))
            .await
            .unwrap();
        let a = fixtures::product(&db, "A", 5, 10).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let sales = db.sales();
            let d = draft(&[(&a.id, 1, 10)], PaymentMethod::Cash, 10);
            handles.push(tokio::spawn(async move {
                sales.create_sale(&d, "cashier-1").await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(DbError::Core(CoreError::InsufficientStock { .. })) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(succeeded, 5);
        assert_eq!(stock_of(&db, &a.id).await, 0);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let db = fixtures::memory_db().await;
        let a = fixtures::product(&db, "A", 50, 100).await;
        let customer = fixtures::customer(&db, 0).await;

        db.sales()
            .create_sale(&draft(&[(&a.id, 1, 100)], PaymentMethod::Cash, 100), "cashier-1")
            .await
            .unwrap();
        db.sales()
            .create_sale(&draft(&[(&a.id, 1, 100)], PaymentMethod::MobileMoney, 0), "cashier-2")
            .await
            .unwrap();
        let mut credit = draft(&[(&a.id, 1, 100)], PaymentMethod::Credit, 0);
        credit.customer_id = Some(customer.id.clone());
        db.sales().create_sale(&credit, "cashier-1").await.unwrap();

        let all = db.sales().list(&SaleFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let pending = db
            .sales()
            .list(&SaleFilter {
                payment_status: Some(PaymentStatus::Pending),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payment_method, PaymentMethod::MobileMoney);

        let by_customer = db
            .sales()
            .list(&SaleFilter {
                customer_id: Some(customer.id.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_customer.len(), 1);
        assert_eq!(by_customer[0].payment_status, PaymentStatus::Credit);

        let by_cashier = db
            .sales()
            .list(&SaleFilter {
                cashier_id: Some("cashier-1".to_string()),
                payment_method: Some(PaymentMethod::Cash),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_cashier.len(), 1);

        let future = db
            .sales()
            .list(&SaleFilter {
                from: Some(Utc::now() + chrono::Duration::hours(1)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(future.is_empty());

        let paged = db
            .sales()
            .list(&SaleFilter {
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(paged.len(), 2);
    }

    async fn pending_mobile_sale(db: &Database, total: i64) -> Sale {
        let a = fixtures::product(db, &format!("M{total}"), 10, total).await;
        let sale = db
            .sales()
            .create_sale(&draft(&[(&a.id, 1, total)], PaymentMethod::MobileMoney, 0), "cashier-1")
            .await
            .unwrap();
        assert!(db
            .sales()
            .attach_mobile_request(&sale.id, "mr-1", "ws_CO_1")
            .await
            .unwrap());
        sale
    }

    #[tokio::test]
    async fn test_mobile_payment_applies_once() {
        let db = fixtures::memory_db().await;
        let sale = pending_mobile_sale(&db, 500).await;

        let found = db
            .sales()
            .find_pending_by_merchant_request("mr-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, sale.id);

        let settlement = MobileSettlement {
            amount: 500,
            receipt_number: Some("QJK3XYZ1AB".to_string()),
            transaction_date: Some("20261019093005".to_string()),
        };
        assert!(db.sales().apply_mobile_payment(&sale.id, &settlement).await.unwrap());
        assert!(!db.sales().apply_mobile_payment(&sale.id, &settlement).await.unwrap());

        let stored = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.amount_paid, 500);
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
        assert_eq!(stored.mobile_payment_state, Some(MobilePaymentState::Completed));
        assert_eq!(stored.mpesa_receipt_number.as_deref(), Some("QJK3XYZ1AB"));

        assert!(db
            .sales()
            .find_pending_by_merchant_request("mr-1")
            .await
            .unwrap()
            .is_none());
        assert!(!db
            .sales()
            .attach_mobile_request(&sale.id, "mr-2", "ws_CO_2")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_mobile_underpayment_is_partial() {
        let db = fixtures::memory_db().await;
        let sale = pending_mobile_sale(&db, 500).await;

        let settlement = MobileSettlement {
            amount: 300,
            receipt_number: None,
            transaction_date: None,
        };
        assert!(db.sales().apply_mobile_payment(&sale.id, &settlement).await.unwrap());

        let stored = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Partial);
        assert_eq!(stored.amount_paid, 300);
    }

    #[tokio::test]
    async fn test_mobile_failure_keeps_sale_pending() {
        let db = fixtures::memory_db().await;
        let sale = pending_mobile_sale(&db, 500).await;

        assert!(db.sales().mark_mobile_failed(&sale.id).await.unwrap());
        assert!(!db.sales().mark_mobile_failed(&sale.id).await.unwrap());

        let stored = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Pending);
        assert_eq!(stored.amount_paid, 0);
        assert_eq!(stored.mobile_payment_state, Some(MobilePaymentState::Failed));

        // A failed push can be retried
        assert!(db
            .sales()
            .attach_mobile_request(&sale.id, "mr-2", "ws_CO_2")
            .await
            .unwrap());
        let found = db
            .sales()
            .find_by_checkout_request("ws_CO_2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.merchant_request_id.as_deref(), Some("mr-2"));
    }

    #[tokio::test]
    async fn test_attach_keeps_outstanding_push_ids() {
        let db = fixtures::memory_db().await;
        let sale = pending_mobile_sale(&db, 500).await;

        assert!(!db
            .sales()
            .attach_mobile_request(&sale.id, "mr-2", "ws_CO_2")
            .await
            .unwrap());

        let stored = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.merchant_request_id.as_deref(), Some("mr-1"));
        assert_eq!(stored.checkout_request_id.as_deref(), Some("ws_CO_1"));
        assert!(!stored.awaits_mobile_payment());
        assert!(db
            .sales()
            .find_pending_by_merchant_request("mr-1")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_attach_rejects_non_mobile_sale() {
        let db = fixtures::memory_db().await;
        let a = fixtures::product(&db, "A", 5, 100).await;
        let sale = db
            .sales()
            .create_sale(&draft(&[(&a.id, 1, 100)], PaymentMethod::Cash, 100), "cashier-1")
            .await
            .unwrap();

        assert!(!db
            .sales()
            .attach_mobile_request(&sale.id, "mr-1", "ws_CO_1")
            .await
            .unwrap());
    }
}
