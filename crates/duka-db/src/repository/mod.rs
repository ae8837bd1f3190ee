//! # Repository Module
//!
//! Repository implementations for the Duka ledger.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Who Mutates What                                     │
//! │                                                                         │
//! │  SaleRepository::create_sale ──┬──► product::apply_stock_delta (-qty)   │
//! │       (one transaction)        └──► customer::apply_sale_loyalty        │
//! │                                                                         │
//! │  PurchaseRepository::receive ─────► product::apply_stock_delta (+qty)   │
//! │                                                                         │
//! │  ProductRepository::adjust_stock ─► product::apply_stock_delta (±n)     │
//! │                                                                         │
//! │  SaleRepository::apply_mobile_payment / mark_mobile_failed              │
//! │       (reconciliation, guarded on mobile_payment_state)                 │
//! │                                                                         │
//! │  AuditRepository::record_quietly ─► after commit, failures only logged  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Stock and customer balances are only ever changed through the two
//! connection-level mutators, always inside the caller's transaction.
//!
//! ## Available Repositories
//!
//! - [`sale::SaleRepository`] - The sale transaction, listing, settlement
//! - [`product::ProductRepository`] - Products and the stock mutator
//! - [`customer::CustomerRepository`] - Customers and the loyalty ledger
//! - [`purchase::PurchaseRepository`] - Purchase orders and receipt
//! - [`audit::AuditRepository`] - Append-only audit log

pub mod audit;
pub mod customer;
pub mod product;
pub mod purchase;
pub mod sale;
