//! # Handler Errors
//!
//! Every route returns `Result<_, ApiError>`.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Handler: Result<Json<_>, ApiError>                                     │
//! │         │                                                               │
//! │         ├── CoreError / ValidationError ──► 400 / 404 / 409             │
//! │         ├── DbError ────────────────────── ► 404 / 409 / 500            │
//! │         └── MpesaError ─────────────────── ► 400 / 409 / 502-504        │
//! │                                                                         │
//! │  Response body:                                                         │
//! │  { "success": false,                                                    │
//! │    "error": { "code": "INSUFFICIENT_STOCK", "message": "..." } }        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `code` lets the till tell "no stock" apart from "system error"
//! without parsing messages. Internal failures are logged here and reach
//! the client as a generic message.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use duka_core::{CoreError, ValidationError};
use duka_db::DbError;
use duka_mpesa::MpesaError;
use serde::Serialize;
use serde_json::json;

// =============================================================================
// API Error
// =============================================================================

/// Error returned from route handlers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub code: ErrorCode,

    /// Safe to show at the till.
    pub message: String,
}

/// Stable codes the till switches on. `status()` maps each to HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,

    TotalsMismatch,

    /// No `x-user-id` header.
    Unauthorized,

    NotFound,

    InsufficientStock,

    InsufficientLoyaltyPoints,

    /// Sale or purchase order cannot take the requested step.
    InvalidState,

    Conflict,

    /// Daraja answered with a refusal or garbage.
    PaymentProviderError,

    PaymentProviderTimeout,

    /// M-Pesa credentials missing or incomplete.
    PaymentUnavailable,

    DatabaseError,

    Internal,
}

impl ErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationError | ErrorCode::TotalsMismatch => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::InsufficientStock
            | ErrorCode::InsufficientLoyaltyPoints
            | ErrorCode::InvalidState
            | ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::PaymentProviderError => StatusCode::BAD_GATEWAY,
            ErrorCode::PaymentProviderTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::PaymentUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::DatabaseError | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(resource: &str, id: &str) -> Self {
        ApiError::new(ErrorCode::NotFound, format!("{} not found: {}", resource, id))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCode::ValidationError, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCode::Unauthorized, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCode::Internal, message)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.code.status();
        let body = Json(json!({
            "success": false,
            "error": self,
        }));
        (status, body).into_response()
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::validation(rejection.body_text())
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::validation(err.to_string())
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let code = match &err {
            CoreError::ProductNotFound(_)
            | CoreError::CustomerNotFound(_)
            | CoreError::SaleNotFound(_) => ErrorCode::NotFound,
            CoreError::InsufficientStock { .. } => ErrorCode::InsufficientStock,
            CoreError::InsufficientLoyaltyPoints { .. } => ErrorCode::InsufficientLoyaltyPoints,
            CoreError::InvalidSaleState { .. } | CoreError::InvalidPurchaseState { .. } => {
                ErrorCode::InvalidState
            }
            CoreError::TotalsMismatch { .. } => ErrorCode::TotalsMismatch,
            CoreError::Validation(_) => ErrorCode::ValidationError,
        };
        let message = match err {
            CoreError::Validation(e) => e.to_string(),
            other => other.to_string(),
        };
        ApiError::new(code, message)
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => ApiError::not_found(&entity, &id),
            DbError::Core(e) => e.into(),
            DbError::UniqueViolation { field, value } => ApiError::new(
                ErrorCode::Conflict,
                format!("{} '{}' already exists", field, value),
            ),
            DbError::ForeignKeyViolation { message } => {
                tracing::warn!(%message, "Dangling reference in write");
                ApiError::validation("Invalid reference")
            }
            DbError::Conflict(msg) => ApiError::new(ErrorCode::Conflict, msg),
            DbError::PoolExhausted => {
                ApiError::new(ErrorCode::DatabaseError, "Ledger busy, try again")
            }
            other => {
                tracing::error!(error = %other, "Ledger write or read failed");
                ApiError::new(ErrorCode::DatabaseError, "Could not reach the ledger")
            }
        }
    }
}

impl From<MpesaError> for ApiError {
    fn from(err: MpesaError) -> Self {
        match err {
            MpesaError::Core(e) => e.into(),
            MpesaError::Database(e) => e.into(),
            MpesaError::InvalidConfig(msg) => {
                tracing::error!(reason = %msg, "M-Pesa is not configured");
                ApiError::new(ErrorCode::PaymentUnavailable, "Mobile payments are unavailable")
            }
            timeout @ MpesaError::Timeout { .. } => {
                tracing::warn!(error = %timeout, "M-Pesa request timed out");
                ApiError::new(ErrorCode::PaymentProviderTimeout, timeout.to_string())
            }
            other => {
                tracing::warn!(error = %other, "M-Pesa request failed");
                ApiError::new(ErrorCode::PaymentProviderError, other.to_string())
            }
        }
    }
}

// =============================================================================
// Startup Errors
// =============================================================================

/// Errors loading [`crate::config::ServerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
