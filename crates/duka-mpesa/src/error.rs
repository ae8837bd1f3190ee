//! # M-Pesa Error Types
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      M-Pesa Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Provider            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Transport      │  │  Auth                   │ │
//! │  │                 │  │  Timeout        │  │  Rejected               │ │
//! │  │                 │  │                 │  │  InvalidResponse        │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │  Business       │  │   Ledger        │                              │
//! │  │                 │  │                 │                              │
//! │  │  Core(...)      │  │  Database(...)  │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use duka_core::{CoreError, ValidationError};
use duka_db::DbError;
use thiserror::Error;

/// Result type alias for gateway and reconciliation operations.
pub type MpesaResult<T> = Result<T, MpesaError>;

/// Errors from the M-Pesa layer.
#[derive(Debug, Error)]
pub enum MpesaError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Missing or malformed gateway settings.
    #[error("Invalid M-Pesa configuration: {0}")]
    InvalidConfig(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The request never got a response (DNS, TLS, connection reset).
    #[error("M-Pesa transport error: {0}")]
    Transport(String),

    /// The provider did not answer within the bounded timeout.
    ///
    /// ## When This Occurs
    /// - OAuth took longer than 10s
    /// - Push or status query took longer than 30s
    #[error("M-Pesa {operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },

    // =========================================================================
    // Provider Errors
    // =========================================================================
    /// Credentials were refused or the token could not be obtained.
    #[error("M-Pesa authentication failed: {0}")]
    Auth(String),

    /// The provider answered but declined the request.
    #[error("M-Pesa rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },

    /// The provider answered with something we could not read.
    #[error("Unexpected M-Pesa response: {0}")]
    InvalidResponse(String),

    // =========================================================================
    // Business / Ledger Errors
    // =========================================================================
    /// A business rule or validation failure (unknown sale, bad phone).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Ledger access failed.
    #[error(transparent)]
    Database(#[from] DbError),
}

impl MpesaError {
    /// True for failures of the provider or the path to it, as opposed to
    /// problems with the request itself.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            MpesaError::Transport(_)
                | MpesaError::Timeout { .. }
                | MpesaError::Auth(_)
                | MpesaError::Rejected { .. }
                | MpesaError::InvalidResponse(_)
        )
    }
}

impl From<ValidationError> for MpesaError {
    fn from(err: ValidationError) -> Self {
        MpesaError::Core(CoreError::Validation(err))
    }
}

impl From<serde_json::Error> for MpesaError {
    fn from(err: serde_json::Error) -> Self {
        MpesaError::InvalidResponse(err.to_string())
    }
}
