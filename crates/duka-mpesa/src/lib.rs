//! # duka-mpesa: M-Pesa Reconciliation for the Duka Sale Engine
//!
//! A mobile-money sale is committed before the customer pays. This crate
//! sends the STK push to the customer's phone, tracks it while the customer
//! confirms, and settles the sale when the provider calls back.
//!
//! ## Payment Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Mobile-Money Sale Lifecycle                         │
//! │                                                                         │
//! │  POST /api/sales (mobile_money)                                         │
//! │       │  sale: pending, amount_paid 0                                   │
//! │       ▼                                                                 │
//! │  POST /api/mpesa/stk-push ──► MpesaGateway ──► provider                 │
//! │       │  tracker.put, sale: PENDING_STK                │                │
//! │       ▼                                                │ phone prompt   │
//! │  GET /api/mpesa/status (read-only poll)                ▼                │
//! │       │                                          customer PIN           │
//! │       ▼                                                │                │
//! │  POST /api/mpesa/callback ◄────────────────────────────┘                │
//! │       │                                                                 │
//! │       ├── ResultCode 0 ──► sale: paid / partial, COMPLETED              │
//! │       └── otherwise    ──► sale: pending, FAILED (push may be retried)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Provider credentials, endpoints and timeouts
//! - [`gateway`] - OAuth token cache, STK push and status query
//! - [`transport`] - HTTP seam behind the gateway
//! - [`tracker`] - In-memory correlation of pending pushes
//! - [`service`] - Push initiation and the expiry sweeper
//! - [`reconcile`] - Callback handling and status reports
//! - [`poll`] - Bounded status polling
//! - [`error`] - Error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use duka_mpesa::{MpesaConfig, MpesaService, StkPushCommand};
//!
//! let service = Arc::new(MpesaService::from_config(config, db)?);
//! let sweeper = service.spawn_sweeper();
//!
//! let started = service.initiate_push(&StkPushCommand { sale_id, amount, phone_number }).await?;
//! let ack = service.handle_callback(&body).await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod gateway;
pub mod poll;
pub mod reconcile;
pub mod service;
pub mod tracker;
pub mod transport;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{Environment, MpesaConfig};
pub use error::{MpesaError, MpesaResult};
pub use gateway::{MpesaGateway, PushAccepted, PushRequest, StatusQueryResult};
pub use poll::{poll_until_terminal, PollOutcome};
pub use reconcile::{CallbackAck, StatusReport};
pub use service::{MpesaService, StkPushCommand, StkPushStarted, SweeperHandle};
pub use tracker::{PendingTracker, PendingTransaction};
pub use transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
