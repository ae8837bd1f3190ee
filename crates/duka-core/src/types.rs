//! # Domain Types
//!
//! Core domain types used throughout the Duka sale engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │      Sale       │   │    Customer     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  id (UUID)      │       │
//! │  │  sku (business) │   │  invoice_number │   │  loyalty_points │       │
//! │  │  quantity >= 0  │   │  payment_status │   │  outstanding    │       │
//! │  │  unit_price     │   │  total          │   │  total_purchases│       │
//! │  └─────────────────┘   └────────┬────────┘   └─────────────────┘       │
//! │                                 │ 1..n                                  │
//! │                        ┌────────▼────────┐   ┌─────────────────┐       │
//! │                        │    SaleItem     │   │ PurchaseOrder   │       │
//! │                        │  product_name   │   │  status         │       │
//! │                        │  (snapshot)     │   │  PurchaseItem*  │       │
//! │                        └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Request vs Row Types
//! `SaleDraft`, `NewSaleItem`, `NewPurchaseOrder` and friends are what a
//! client sends. `Sale`, `SaleItem`, `PurchaseOrder` are what the ledger
//! stores and returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;
use crate::mpesa::MobilePaymentState;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// 1 basis point = 0.01%, so Kenyan VAT of 16% is 1600 bps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Creates a tax rate from a percentage as sent by the till (`16.0`).
    pub fn from_percentage(pct: f64) -> Self {
        TaxRate((pct * 100.0).round() as u32)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for display only).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Zero tax rate.
    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

// =============================================================================
// Product
// =============================================================================

/// A product held in stock.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Stock Keeping Unit - business identifier.
    pub sku: String,

    /// Display name, copied onto sale lines at the time of sale.
    pub name: String,

    /// On-hand count. Never negative.
    pub quantity: i64,

    /// Stock level at or below which the product shows up as low stock.
    pub reorder_level: i64,

    /// Cost per unit paid to the supplier.
    pub cost_price: i64,

    /// Selling price per unit.
    pub unit_price: i64,

    /// Whether product is active (soft deactivation, products are never deleted).
    pub is_active: bool,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Returns the selling price as Money.
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_minor(self.unit_price)
    }

    /// Checks if the requested quantity is on hand.
    #[inline]
    pub fn can_sell(&self, quantity: i64) -> bool {
        self.is_active && self.quantity >= quantity
    }

    /// Checks if the product is at or below its reorder level.
    #[inline]
    pub fn is_low_stock(&self) -> bool {
        self.quantity <= self.reorder_level
    }
}

/// Fields needed to register a product in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub reorder_level: i64,
    #[serde(default)]
    pub cost_price: i64,
    pub unit_price: i64,
}

/// A signed manual stock correction (breakage, count variance, returns).
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockAdjustment {
    /// Positive adds stock, negative removes it.
    pub delta: i64,
    pub reason: String,
}

// =============================================================================
// Payment Method / Status
// =============================================================================

/// How the customer pays for a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    /// On account; the unpaid part goes to the customer's outstanding balance.
    Credit,
    /// M-Pesa STK push, settled asynchronously by the provider callback.
    MobileMoney,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Credit => "credit",
            PaymentMethod::MobileMoney => "mobile_money",
        }
    }
}

/// Settlement state of a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Paid,
    Partial,
    Pending,
    Credit,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Paid => "paid",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Credit => "credit",
        }
    }

    /// Default status for a new sale.
    ///
    /// ```text
    /// mobile_money            → pending (the callback settles it)
    /// credit, paid == 0       → credit
    /// credit, paid <  total   → partial
    /// credit, paid >= total   → paid
    /// cash | card             → explicit status if given, else paid
    /// ```
    pub fn default_for(
        method: PaymentMethod,
        explicit: Option<PaymentStatus>,
        amount_paid: Money,
        total: Money,
    ) -> PaymentStatus {
        match method {
            PaymentMethod::MobileMoney => PaymentStatus::Pending,
            PaymentMethod::Credit => {
                if amount_paid.is_zero() {
                    PaymentStatus::Credit
                } else if amount_paid < total {
                    PaymentStatus::Partial
                } else {
                    PaymentStatus::Paid
                }
            }
            PaymentMethod::Cash | PaymentMethod::Card => explicit.unwrap_or(PaymentStatus::Paid),
        }
    }

    /// Status after a settlement amount is applied.
    pub fn after_settlement(amount_paid: Money, total: Money) -> PaymentStatus {
        if amount_paid >= total {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Partial
        }
    }
}

// =============================================================================
// Sale
// =============================================================================

/// A recorded sale.
///
/// Inserted once, together with its items, by the sale transaction. For
/// mobile-money sales the settlement columns (`amount_paid`,
/// `payment_status`, `mobile_payment_state`, receipt) change exactly once
/// more, when the provider callback is reconciled.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Sale {
    pub id: String,
    /// `INV-YYYYMMDD-NNNN`, unique.
    pub invoice_number: String,
    pub customer_id: Option<String>,
    pub cashier_id: String,
    pub subtotal: i64,
    pub discount: i64,
    pub tax_rate_bps: i64,
    pub tax: i64,
    pub total: i64,
    pub amount_paid: i64,
    pub change_due: i64,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub loyalty_points_redeemed: i64,
    pub loyalty_discount: i64,
    pub notes: Option<String>,
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: Option<String>,
    pub mobile_payment_state: Option<MobilePaymentState>,
    pub mpesa_receipt_number: Option<String>,
    pub mpesa_transaction_date: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Sale {
    /// Returns the total as Money.
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_minor(self.total)
    }

    /// Returns the amount paid as Money.
    #[inline]
    pub fn amount_paid(&self) -> Money {
        Money::from_minor(self.amount_paid)
    }

    /// Whether a push payment may be started for this sale.
    ///
    /// Only one push is outstanding per sale: a new one is allowed before
    /// the first push and after a failed one, never while `PENDING_STK`.
    pub fn awaits_mobile_payment(&self) -> bool {
        self.payment_method == PaymentMethod::MobileMoney
            && self.payment_status == PaymentStatus::Pending
            && matches!(
                self.mobile_payment_state,
                None | Some(MobilePaymentState::Failed)
            )
    }
}

// =============================================================================
// Sale Item
// =============================================================================

/// A line item in a sale. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    /// Product name at time of sale (frozen).
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: i64,
    pub discount: i64,
    /// `quantity × unit_price - discount`.
    pub subtotal: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// A sale together with its lines.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleWithItems {
    pub sale: Sale,
    pub items: Vec<SaleItem>,
}

// =============================================================================
// Sale Draft (request)
// =============================================================================

/// One requested line of a new sale.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewSaleItem {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price: i64,
    #[serde(default)]
    pub discount: i64,
}

impl NewSaleItem {
    /// `quantity × unit_price - discount`.
    pub fn subtotal(&self) -> Money {
        crate::money::line_subtotal(
            self.quantity,
            Money::from_minor(self.unit_price),
            Money::from_minor(self.discount),
        )
    }
}

/// Everything the till sends to create a sale.
///
/// The cashier is not part of the body; the server takes it from the
/// authenticated request.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleDraft {
    pub items: Vec<NewSaleItem>,
    #[serde(default)]
    pub customer_id: Option<String>,
    pub subtotal: i64,
    #[serde(default)]
    pub discount: i64,
    /// Percentage, e.g. `16.0`.
    #[serde(default)]
    pub tax_rate: f64,
    #[serde(default)]
    pub tax: i64,
    pub total: i64,
    #[serde(default)]
    pub amount_paid: i64,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub payment_status: Option<PaymentStatus>,
    #[serde(default)]
    pub loyalty_points_redeemed: i64,
    #[serde(default)]
    pub loyalty_discount: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

// =============================================================================
// Sale Filter
// =============================================================================

/// Named filters for sale listings. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleFilter {
    #[ts(as = "Option<String>")]
    pub from: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub to: Option<DateTime<Utc>>,
    pub payment_status: Option<PaymentStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub customer_id: Option<String>,
    pub cashier_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// =============================================================================
// Customer
// =============================================================================

/// A registered customer with loyalty and credit balances.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub total_purchases: i64,
    /// Never negative.
    pub loyalty_points: i64,
    pub outstanding_balance: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to register a customer.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewCustomer {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub loyalty_points: i64,
}

// =============================================================================
// Purchase Orders
// =============================================================================

/// Lifecycle of a purchase order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseStatus {
    Pending,
    Received,
    Cancelled,
}

impl PurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::Pending => "pending",
            PurchaseStatus::Received => "received",
            PurchaseStatus::Cancelled => "cancelled",
        }
    }
}

/// An order placed with a supplier. Receiving it adds stock.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PurchaseOrder {
    pub id: String,
    pub supplier_id: String,
    pub status: PurchaseStatus,
    pub total_cost: i64,
    pub notes: Option<String>,
    pub created_by: String,
    #[ts(as = "Option<String>")]
    pub received_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// A line of a purchase order.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PurchaseItem {
    pub id: String,
    pub purchase_order_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub unit_cost: i64,
    pub subtotal: i64,
}

/// A purchase order together with its lines.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PurchaseOrderWithItems {
    pub order: PurchaseOrder,
    pub items: Vec<PurchaseItem>,
}

/// One requested line of a purchase order.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewPurchaseItem {
    pub product_id: String,
    pub quantity: i64,
    pub unit_cost: i64,
}

/// Request to create a purchase order.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewPurchaseOrder {
    pub supplier_id: String,
    pub items: Vec<NewPurchaseItem>,
    #[serde(default)]
    pub notes: Option<String>,
}

// =============================================================================
// Audit Log
// =============================================================================

/// An append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct AuditEntry {
    pub id: String,
    pub user_id: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub details: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tax_rate_from_percentage() {
        assert_eq!(TaxRate::from_percentage(16.0).bps(), 1600);
        assert_eq!(TaxRate::from_percentage(8.25).bps(), 825);
        assert!((TaxRate::from_bps(1600).percentage() - 16.0).abs() < 0.001);
    }

    #[test]
    fn test_default_status_for_mobile_money_is_pending() {
        let status = PaymentStatus::default_for(
            PaymentMethod::MobileMoney,
            Some(PaymentStatus::Paid),
            Money::from_minor(500),
            Money::from_minor(500),
        );
        assert_eq!(status, PaymentStatus::Pending);
    }

    #[test]
    fn test_default_status_for_credit() {
        let total = Money::from_minor(1_000);
        assert_eq!(
            PaymentStatus::default_for(PaymentMethod::Credit, None, Money::zero(), total),
            PaymentStatus::Credit
        );
        assert_eq!(
            PaymentStatus::default_for(PaymentMethod::Credit, None, Money::from_minor(400), total),
            PaymentStatus::Partial
        );
        assert_eq!(
            PaymentStatus::default_for(PaymentMethod::Credit, None, total, total),
            PaymentStatus::Paid
        );
    }

    #[test]
    fn test_default_status_for_cash_respects_explicit() {
        let total = Money::from_minor(200);
        assert_eq!(
            PaymentStatus::default_for(PaymentMethod::Cash, None, total, total),
            PaymentStatus::Paid
        );
        assert_eq!(
            PaymentStatus::default_for(
                PaymentMethod::Card,
                Some(PaymentStatus::Pending),
                total,
                total
            ),
            PaymentStatus::Pending
        );
    }

    #[test]
    fn test_after_settlement() {
        assert_eq!(
            PaymentStatus::after_settlement(Money::from_minor(500), Money::from_minor(500)),
            PaymentStatus::Paid
        );
        assert_eq!(
            PaymentStatus::after_settlement(Money::from_minor(300), Money::from_minor(500)),
            PaymentStatus::Partial
        );
    }

    #[test]
    fn test_sale_draft_deserializes_with_defaults() {
        let json = r#"{
            "items": [{"product_id": "p1", "quantity": 2, "unit_price": 100}],
            "subtotal": 200,
            "total": 200,
            "amount_paid": 200,
            "payment_method": "cash"
        }"#;
        let draft: SaleDraft = serde_json::from_str(json).expect("valid draft");
        assert_eq!(draft.items.len(), 1);
        assert_eq!(draft.items[0].discount, 0);
        assert_eq!(draft.loyalty_points_redeemed, 0);
        assert!(draft.payment_status.is_none());
        assert_eq!(draft.payment_method, PaymentMethod::Cash);
    }

    #[test]
    fn test_payment_method_serialization() {
        let json = serde_json::to_string(&PaymentMethod::MobileMoney).expect("serialize");
        assert_eq!(json, "\"mobile_money\"");
        assert_eq!(PaymentMethod::MobileMoney.as_str(), "mobile_money");
    }
}
