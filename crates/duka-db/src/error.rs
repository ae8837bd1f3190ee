//! # Ledger Errors
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │  sqlx::Error ─────────┐                                                  │
//! │  MigrateError ────────┼──► DbError ──► ApiError (code, HTTP status)      │
//! │  CoreError (rule) ────┘       │                                          │
//! │                               └──► MpesaError::Database (callbacks)      │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A business rule failing inside a sale transaction comes back as
//! `DbError::Core`. The rollback has already happened by the time the caller
//! sees it.

use duka_core::CoreError;
use thiserror::Error;

const UNIQUE_PREFIX: &str = "UNIQUE constraint failed: ";
const FOREIGN_KEY_MARKER: &str = "FOREIGN KEY constraint failed";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// `field` is the `table.column` SQLite names in the failure message.
    ///
    /// ## When This Occurs
    /// - Two tills drew the same invoice number (the sale transaction retries)
    /// - A product is registered with a SKU already on the shelf
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    #[error("Referenced row missing: {message}")]
    ForeignKeyViolation { message: String },

    /// Retries ran out on a collision that usually clears by itself.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Could not open ledger: {0}")]
    ConnectionFailed(String),

    #[error("Schema migration failed: {0}")]
    MigrationFailed(String),

    #[error("Statement failed: {0}")]
    QueryFailed(String),

    /// No connection came free within the acquire timeout.
    #[error("No ledger connection available")]
    PoolExhausted,

    #[error("Ledger error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Whether this is a UNIQUE failure on `column`.
    pub fn is_unique_violation_on(&self, column: &str) -> bool {
        matches!(self, DbError::UniqueViolation { field, .. } if field.contains(column))
    }

    fn from_sqlite_message(msg: &str) -> Self {
        if let Some(field) = msg.strip_prefix(UNIQUE_PREFIX) {
            return DbError::UniqueViolation {
                field: field.to_string(),
                value: "unknown".to_string(),
            };
        }
        if msg.contains(FOREIGN_KEY_MARKER) {
            return DbError::ForeignKeyViolation {
                message: msg.to_string(),
            };
        }
        DbError::QueryFailed(msg.to_string())
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Record", "unknown"),
            sqlx::Error::Database(db_err) => DbError::from_sqlite_message(db_err.message()),
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool closed".to_string()),
            other => DbError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<duka_core::ValidationError> for DbError {
    fn from(err: duka_core::ValidationError) -> Self {
        DbError::Core(CoreError::Validation(err))
    }
}

pub type DbResult<T> = Result<T, DbError>;
