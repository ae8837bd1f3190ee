//! # Validation Module
//!
//! Input validation for sale drafts, purchase orders and payment requests.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: HTTP handler                                                 │
//! │  ├── Type validation (JSON deserialization)                            │
//! │  └── THIS MODULE: field rules + server-side totals check               │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Sale transaction                                             │
//! │  ├── Stock re-verified against the row being written                   │
//! │  └── Loyalty balance re-verified inside the transaction                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (quantity >= 0), CHECK (loyalty_points >= 0)                │
//! │  └── UNIQUE (invoice_number)                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything here runs before a transaction opens, so a rejection has no
//! side effects.

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::{sale_total, Money};
use crate::types::{NewPurchaseOrder, PaymentMethod, SaleDraft, StockAdjustment, TaxRate};
use crate::{MAX_ITEM_QUANTITY, MAX_MONEY_AMOUNT, MAX_PURCHASE_ITEMS, MAX_SALE_ITEMS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Scalar Validators
// =============================================================================

/// Validates an identifier reference (product, customer, sale).
pub fn validate_id(field: &str, id: &str) -> ValidationResult<()> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    if id.len() > 64 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 64,
        });
    }
    Ok(())
}

/// Validates a line quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }
    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }
    Ok(())
}

/// Validates that a money field is not negative.
pub fn validate_non_negative(field: &str, amount: i64) -> ValidationResult<()> {
    if amount < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates a client-supplied amount: `0..=MAX_MONEY_AMOUNT`.
pub fn validate_amount(field: &str, amount: i64) -> ValidationResult<()> {
    validate_non_negative(field, amount)?;
    if amount > MAX_MONEY_AMOUNT {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: MAX_MONEY_AMOUNT,
        });
    }
    Ok(())
}

/// `quantity × unit_price`, rejected when it leaves the money range.
fn bounded_line_amount(field: &str, quantity: i64, unit_price: i64) -> ValidationResult<i64> {
    Money::from_minor(unit_price)
        .checked_multiply_quantity(quantity)
        .map(|amount| amount.minor())
        .filter(|amount| *amount <= MAX_MONEY_AMOUNT)
        .ok_or_else(|| ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: MAX_MONEY_AMOUNT,
        })
}

/// Validates a push-payment amount: positive whole shillings.
pub fn validate_payment_amount(amount: i64) -> ValidationResult<()> {
    if amount <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        });
    }
    validate_amount("amount", amount)
}

/// Validates a tax rate (0% to 100%).
pub fn validate_tax_rate(rate: TaxRate) -> ValidationResult<()> {
    if rate.bps() > 10_000 {
        return Err(ValidationError::OutOfRange {
            field: "tax_rate".to_string(),
            min: 0,
            max: 100,
        });
    }
    Ok(())
}

// =============================================================================
// Phone Numbers
// =============================================================================

/// Normalizes a Kenyan mobile number to the provider's `2547XXXXXXXX` form.
///
/// Accepts `07XXXXXXXX`, `01XXXXXXXX`, `+2547XXXXXXXX` and `2547XXXXXXXX`,
/// with spaces or dashes anywhere. Anything else is returned as digits only
/// and left for [`validate_phone`] to reject.
///
/// ## Example
/// ```rust
/// use duka_core::validation::normalize_phone;
///
/// assert_eq!(normalize_phone("0712 345 678"), "254712345678");
/// assert_eq!(normalize_phone("+254712345678"), "254712345678");
/// ```
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.strip_prefix('0') {
        Some(rest) if rest.len() == 9 => format!("254{rest}"),
        _ => digits,
    }
}

/// Validates a normalized phone number: 12 digits starting with `254`.
pub fn validate_phone(phone: &str) -> ValidationResult<()> {
    if phone.is_empty() {
        return Err(ValidationError::Required {
            field: "phone_number".to_string(),
        });
    }
    if phone.len() != 12 || !phone.starts_with("254") || !phone.chars().all(|c| c.is_ascii_digit())
    {
        return Err(ValidationError::InvalidFormat {
            field: "phone_number".to_string(),
            reason: "must be 12 digits starting with 254".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Sale Draft
// =============================================================================

/// Validates the shape of a sale draft.
///
/// ## Rules
/// - cashier is known
/// - 1..=MAX_SALE_ITEMS items, each with a product, positive quantity,
///   non-negative price and a discount no larger than the line
/// - money fields and line amounts are within `0..=MAX_MONEY_AMOUNT`,
///   tax rate is within 0..=100%
/// - credit sales and loyalty redemption need a customer
pub fn validate_sale_draft(draft: &SaleDraft, cashier_id: &str) -> ValidationResult<()> {
    validate_id("cashier_id", cashier_id)?;

    if draft.items.is_empty() {
        return Err(ValidationError::Required {
            field: "items".to_string(),
        });
    }
    if draft.items.len() > MAX_SALE_ITEMS {
        return Err(ValidationError::OutOfRange {
            field: "items".to_string(),
            min: 1,
            max: MAX_SALE_ITEMS as i64,
        });
    }

    for item in &draft.items {
        validate_id("product_id", &item.product_id)?;
        validate_quantity(item.quantity)?;
        validate_amount("unit_price", item.unit_price)?;
        validate_amount("item discount", item.discount)?;
        let line_amount = bounded_line_amount("line amount", item.quantity, item.unit_price)?;
        if item.discount > line_amount {
            return Err(ValidationError::NotAllowed {
                field: "item discount".to_string(),
                reason: "cannot exceed the line amount".to_string(),
            });
        }
    }

    validate_amount("subtotal", draft.subtotal)?;
    validate_amount("discount", draft.discount)?;
    validate_amount("tax", draft.tax)?;
    validate_amount("total", draft.total)?;
    validate_amount("amount_paid", draft.amount_paid)?;
    validate_amount("loyalty_points_redeemed", draft.loyalty_points_redeemed)?;
    validate_amount("loyalty_discount", draft.loyalty_discount)?;

    if !draft.tax_rate.is_finite() || draft.tax_rate < 0.0 {
        return Err(ValidationError::InvalidFormat {
            field: "tax_rate".to_string(),
            reason: "must be a non-negative percentage".to_string(),
        });
    }
    validate_tax_rate(TaxRate::from_percentage(draft.tax_rate))?;

    let has_customer = draft
        .customer_id
        .as_deref()
        .is_some_and(|id| !id.trim().is_empty());

    if draft.payment_method == PaymentMethod::Credit && !has_customer {
        return Err(ValidationError::NotAllowed {
            field: "customer_id".to_string(),
            reason: "credit sales require a customer".to_string(),
        });
    }
    if draft.loyalty_points_redeemed > 0 && !has_customer {
        return Err(ValidationError::NotAllowed {
            field: "loyalty_points_redeemed".to_string(),
            reason: "redeeming points requires a customer".to_string(),
        });
    }

    Ok(())
}

/// Recomputes subtotal and total and rejects a draft whose client-side
/// arithmetic disagrees.
///
/// Returns the verified total.
pub fn verify_totals(draft: &SaleDraft) -> CoreResult<Money> {
    let subtotal: Money = draft.items.iter().map(|item| item.subtotal()).sum();
    if subtotal.minor() != draft.subtotal {
        return Err(CoreError::TotalsMismatch {
            field: "subtotal".to_string(),
            expected: subtotal.minor(),
            actual: draft.subtotal,
        });
    }

    let total = sale_total(
        subtotal,
        Money::from_minor(draft.tax),
        Money::from_minor(draft.discount),
        Money::from_minor(draft.loyalty_discount),
    );
    if total.minor() != draft.total {
        return Err(CoreError::TotalsMismatch {
            field: "total".to_string(),
            expected: total.minor(),
            actual: draft.total,
        });
    }

    Ok(total)
}

// =============================================================================
// Inventory
// =============================================================================

/// Validates a purchase order request.
pub fn validate_purchase_order(order: &NewPurchaseOrder) -> ValidationResult<()> {
    validate_id("supplier_id", &order.supplier_id)?;
    if order.items.is_empty() {
        return Err(ValidationError::Required {
            field: "items".to_string(),
        });
    }
    if order.items.len() > MAX_PURCHASE_ITEMS {
        return Err(ValidationError::OutOfRange {
            field: "items".to_string(),
            min: 1,
            max: MAX_PURCHASE_ITEMS as i64,
        });
    }
    for item in &order.items {
        validate_id("product_id", &item.product_id)?;
        validate_quantity(item.quantity)?;
        validate_amount("unit_cost", item.unit_cost)?;
        bounded_line_amount("line cost", item.quantity, item.unit_cost)?;
    }
    Ok(())
}

/// Validates a manual stock adjustment.
pub fn validate_stock_adjustment(adjustment: &StockAdjustment) -> ValidationResult<()> {
    if adjustment.delta == 0 {
        return Err(ValidationError::NotAllowed {
            field: "delta".to_string(),
            reason: "must not be zero".to_string(),
        });
    }
    if adjustment.delta.unsigned_abs() > MAX_ITEM_QUANTITY as u64 {
        return Err(ValidationError::OutOfRange {
            field: "delta".to_string(),
            min: -MAX_ITEM_QUANTITY,
            max: MAX_ITEM_QUANTITY,
        });
    }
    if adjustment.reason.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "reason".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
