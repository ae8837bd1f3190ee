//! # duka-core: Pure Business Logic for the Duka Sale Engine
//!
//! This crate holds every rule of the sale transaction engine that can be
//! expressed without touching a database or the network.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Duka POS Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Till / Provider                              │   │
//! │  │    POST /api/sales ──► POST /api/mpesa/stkpush ──► poll status  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ HTTP (axum)                            │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               apps/server  +  duka-mpesa                        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ duka-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐  │   │
//! │  │   │  types  │ │  money  │ │ loyalty │ │ invoice │ │  mpesa  │  │   │
//! │  │   │  Sale   │ │  Money  │ │ points  │ │ INV-..  │ │ result  │  │   │
//! │  │   │ Product │ │ totals  │ │ redeem  │ │ numbers │ │  codes  │  │   │
//! │  │   └─────────┘ └─────────┘ └─────────┘ └─────────┘ └─────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • CLOCK IS INJECTED         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    duka-db (Ledger Store)                       │   │
//! │  │          SQLite transactions, migrations, repositories          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, Sale, Customer, PurchaseOrder, ...)
//! - [`money`] - Money type with integer arithmetic and the sale total rule
//! - [`loyalty`] - Point accrual and redemption rules
//! - [`invoice`] - `INV-YYYYMMDD-NNNN` numbering
//! - [`mpesa`] - Provider result-code table and mobile payment states
//! - [`validation`] - Business rule validation and phone normalization
//! - [`clock`] - Injectable time source
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use duka_core::money::{sale_total, Money};
//!
//! let total = sale_total(
//!     Money::from_minor(1_000), // subtotal
//!     Money::from_minor(160),   // tax
//!     Money::from_minor(60),    // discount
//!     Money::from_minor(100),   // loyalty discount
//! );
//! assert_eq!(total.minor(), 1_000);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod error;
pub mod invoice;
pub mod loyalty;
pub mod money;
pub mod mpesa;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use mpesa::{MobilePaymentState, StkStatus};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum line items accepted in a single sale.
///
/// ## Business Reason
/// Wholesale invoices run long, but a runaway request should still be
/// rejected before a transaction is opened.
pub const MAX_SALE_ITEMS: usize = 200;

/// Maximum quantity of a single line.
pub const MAX_ITEM_QUANTITY: i64 = 100_000;

/// Maximum lines on a purchase order.
pub const MAX_PURCHASE_ITEMS: usize = 500;

/// Largest amount (in shillings) accepted for any money field or line.
///
/// ## Business Reason
/// Far above any real invoice, and small enough that every sum the engine
/// forms from bounded lines stays inside `i64`.
pub const MAX_MONEY_AMOUNT: i64 = 1_000_000_000_000;

const _: () = assert!(
    (MAX_PURCHASE_ITEMS as i64 + 8) * MAX_MONEY_AMOUNT < i64::MAX / 2,
    "money bounds must keep invoice sums inside i64"
);

/// Sale total (in shillings) that earns one loyalty point.
pub const LOYALTY_POINT_THRESHOLD: i64 = 100;

/// Number of attempts the sale transaction makes when the invoice number
/// collides with a concurrently committed sale.
pub const INVOICE_RETRY_ATTEMPTS: u32 = 3;
