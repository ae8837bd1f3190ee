//! # Customer Repository
//!
//! Customers and the loyalty ledger.
//!
//! ## Loyalty Ledger
//! ```text
//! apply_sale_loyalty(conn, customer, total, redeemed, owed)
//!     │
//!     ├── balance < redeemed  → InsufficientLoyaltyPoints (sale aborts)
//!     │
//!     └── UPDATE customers
//!            SET loyalty_points      = loyalty_points - redeemed + floor(total/100),
//!                total_purchases     = total_purchases + total,
//!                outstanding_balance = outstanding_balance + owed
//!          WHERE id = ? AND loyalty_points >= redeemed
//! ```

use chrono::Utc;
use duka_core::loyalty::{check_redemption, points_earned};
use duka_core::{CoreError, Customer, Money, NewCustomer};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;

const CUSTOMER_COLUMNS: &str = "id, name, phone, email, total_purchases, loyalty_points, \
                                outstanding_balance, created_at, updated_at";

/// Repository for customer database operations.
#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
}

impl CustomerRepository {
    /// Creates a new CustomerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CustomerRepository { pool }
    }

    /// Gets a customer by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Customer>> {
        let sql = format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ?1");
        let customer = sqlx::query_as::<_, Customer>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(customer)
    }

    /// Inserts a new customer.
    pub async fn insert(&self, new: &NewCustomer) -> DbResult<Customer> {
        let now = Utc::now();
        let customer = Customer {
            id: Uuid::new_v4().to_string(),
            name: new.name.trim().to_string(),
            phone: new.phone.clone(),
            email: new.email.clone(),
            total_purchases: 0,
            loyalty_points: new.loyalty_points.max(0),
            outstanding_balance: 0,
            created_at: now,
            updated_at: now,
        };

        debug!(id = %customer.id, "Inserting customer");

        sqlx::query(
            r#"
            INSERT INTO customers (
                id, name, phone, email, total_purchases, loyalty_points,
                outstanding_balance, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&customer.id)
        .bind(&customer.name)
        .bind(&customer.phone)
        .bind(&customer.email)
        .bind(customer.total_purchases)
        .bind(customer.loyalty_points)
        .bind(customer.outstanding_balance)
        .bind(customer.created_at)
        .bind(customer.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(customer)
    }
}

// =============================================================================
// Loyalty Ledger
// =============================================================================

/// Applies a sale's effect on a customer inside the sale transaction:
/// accrual, redemption, lifetime purchases and (for credit) the unpaid part.
///
/// Returns the number of points earned.
pub async fn apply_sale_loyalty(
    conn: &mut SqliteConnection,
    customer_id: &str,
    total: Money,
    redeemed: i64,
    owed: Money,
) -> DbResult<i64> {
    let balance: Option<i64> =
        sqlx::query_scalar("SELECT loyalty_points FROM customers WHERE id = ?1")
            .bind(customer_id)
            .fetch_optional(&mut *conn)
            .await?;

    let Some(balance) = balance else {
        return Err(CoreError::CustomerNotFound(customer_id.to_string()).into());
    };
    check_redemption(balance, redeemed)?;

    let earned = points_earned(total);
    let result = sqlx::query(
        r#"
        UPDATE customers
        SET loyalty_points = loyalty_points - ?2 + ?3,
            total_purchases = total_purchases + ?4,
            outstanding_balance = outstanding_balance + ?5,
            updated_at = ?6
        WHERE id = ?1 AND loyalty_points >= ?2
        "#,
    )
    .bind(customer_id)
    .bind(redeemed)
    .bind(earned)
    .bind(total.minor())
    .bind(owed.minor())
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::InsufficientLoyaltyPoints {
            balance,
            requested: redeemed,
        }
        .into());
    }

    debug!(customer_id, earned, redeemed, "Loyalty applied");
    Ok(earned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::repository::fixtures;

    #[tokio::test]
    async fn test_accrual_and_redemption() {
        let db = fixtures::memory_db().await;
        let customer = fixtures::customer(&db, 30).await;

        let mut conn = db.pool().acquire().await.unwrap();
        let earned = apply_sale_loyalty(
            &mut *conn,
            &customer.id,
            Money::from_minor(1_250),
            10,
            Money::from_minor(250),
        )
        .await
        .unwrap();
        drop(conn);
        assert_eq!(earned, 12);

        let fetched = db.customers().get_by_id(&customer.id).await.unwrap().unwrap();
        assert_eq!(fetched.loyalty_points, 32);
        assert_eq!(fetched.total_purchases, 1_250);
        assert_eq!(fetched.outstanding_balance, 250);
    }

    #[tokio::test]
    async fn test_over_redemption_leaves_balance() {
        let db = fixtures::memory_db().await;
        let customer = fixtures::customer(&db, 5).await;

        let mut conn = db.pool().acquire().await.unwrap();
        let err = apply_sale_loyalty(&mut *conn, &customer.id, Money::from_minor(500), 6, Money::zero())
            .await
            .unwrap_err();
        drop(conn);
        assert!(matches!(
            err,
            DbError::Core(CoreError::InsufficientLoyaltyPoints { balance: 5, requested: 6 })
        ));

        let fetched = db.customers().get_by_id(&customer.id).await.unwrap().unwrap();
        assert_eq!(fetched.loyalty_points, 5);
        assert_eq!(fetched.total_purchases, 0);
    }

    #[tokio::test]
    async fn test_unknown_customer() {
        let db = fixtures::memory_db().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let err = apply_sale_loyalty(&mut *conn, "nobody", Money::from_minor(100), 0, Money::zero())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::CustomerNotFound(_))));
    }
}
