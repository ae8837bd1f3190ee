//! # duka-db: Ledger Store for the Duka Sale Engine
//!
//! This crate owns every read and write against the SQLite ledger, and with
//! it the one place where correctness needs more than a single statement:
//! the sale transaction.
//!
//! ```text
//!   POST /api/sales                     M-Pesa callback
//!         │                                    │
//!         ▼                                    ▼
//!   SaleRepository::create_sale   SaleRepository::apply_mobile_payment
//!         │                                    │
//!         ▼                                    ▼
//!   ┌──────────────────────────┐    ┌──────────────────────────────┐
//!   │ invoice number           │    │ claim PENDING_STK            │
//!   │ sale + items             │    │ amount paid, status, change  │
//!   │ guarded stock decrement  │    │ receipt number and date      │
//!   │ loyalty, audit row       │    └──────────────────────────────┘
//!   └──────────────────────────┘
//!         one transaction each; nothing visible before commit
//!                          │
//!                          ▼
//!                    duka.db (WAL)
//! ```
//!
//! [`pool`] opens the file and applies [`migrations`]. Each table family has
//! its repository under [`repository`]; failures come back as [`DbError`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use duka_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("./duka.db")).await?;
//! let sale = db.sales().create_sale(&draft, "cashier-1").await?;
//! ```

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::audit::{AuditEvent, AuditRepository};
pub use repository::customer::CustomerRepository;
pub use repository::product::ProductRepository;
pub use repository::purchase::PurchaseRepository;
pub use repository::sale::{MobileSettlement, SaleRepository};
