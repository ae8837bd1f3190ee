//! # Domain Errors
//!
//! Rule failures raised while a sale, a stock adjustment or a purchase
//! receipt is being checked.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │  request body ──► ValidationError ──┐                                    │
//! │                                     ├──► CoreError                       │
//! │  stock / loyalty / state checks ────┘        │                           │
//! │                                              ▼                           │
//! │                      duka-db DbError::Core (transaction rolled back)     │
//! │                                              │                           │
//! │                      duka-mpesa MpesaError   │                           │
//! │                                  │           ▼                           │
//! │                                  └──► server ApiError { code, message }  │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing here knows about HTTP. The server decides which status each
//! variant earns.

use thiserror::Error;

/// A business rule refused the operation.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Unknown or deactivated product.
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// The shelf cannot cover the line.
    ///
    /// ## When This Occurs
    /// - The pre-check before the sale transaction opens
    /// - The guarded decrement inside the transaction matched no row because
    ///   another till took the units first
    ///
    /// ```text
    /// POST /api/sales (qty: 5)
    ///      │
    ///      ▼
    /// UPDATE products ... WHERE quantity >= 5  → 0 rows
    ///      │
    ///      ▼
    /// InsufficientStock { product: "Maize Flour 2kg", available: 3, requested: 5 }
    ///      │
    ///      ▼
    /// Transaction rolled back, client sees code INSUFFICIENT_STOCK
    /// ```
    #[error("Insufficient stock for {product}: available {available}, requested {requested}")]
    InsufficientStock {
        product: String,
        available: i64,
        requested: i64,
    },

    /// Redemption exceeds the customer's balance.
    #[error("Insufficient loyalty points: balance {balance}, requested {requested}")]
    InsufficientLoyaltyPoints { balance: i64, requested: i64 },

    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Sale not found: {0}")]
    SaleNotFound(String),

    /// ## When This Occurs
    /// - An STK push is requested for a cash or card sale
    /// - An STK push is requested for a sale that is already paid
    #[error("Sale {sale_id} is {current_state}, cannot perform operation")]
    InvalidSaleState {
        sale_id: String,
        current_state: String,
    },

    /// Receiving an order that was already received or cancelled.
    #[error("Purchase order {id} is {status}, cannot perform operation")]
    InvalidPurchaseState { id: String, status: String },

    /// The till's arithmetic disagrees with the server's.
    #[error("{field} mismatch: expected {expected}, got {actual}")]
    TotalsMismatch {
        field: String,
        expected: i64,
        actual: i64,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Malformed input, caught before any transaction opens.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: String },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    #[error("{field} must be positive")]
    MustBePositive { field: String },

    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Phone numbers and ids that do not parse.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Fields that are each valid but not together, such as a discount
    /// larger than the subtotal.
    #[error("{field}: {reason}")]
    NotAllowed { field: String, reason: String },
}

pub type CoreResult<T> = Result<T, CoreError>;
