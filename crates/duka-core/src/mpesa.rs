//! # Mobile Money Rules
//!
//! The pure half of M-Pesa reconciliation: payment states stored on a sale,
//! the statuses reported to a polling client, and the fixed table that maps
//! provider result codes onto them.
//!
//! ## State Machine
//! ```text
//!                      callback ResultCode 0
//!   PENDING_STK ─────────────────────────────────► COMPLETED
//!        │
//!        │             callback ResultCode != 0
//!        └───────────────────────────────────────► FAILED
//!
//!   Status polls never move the ledger; they only report StkStatus.
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Error code the status-query endpoint returns while the push is still
/// being processed on the handset.
pub const STILL_PROCESSING_ERROR_CODE: &str = "500.001.1001";

/// Offset of East Africa Time, the zone the provider expects timestamps in.
const EAT_OFFSET_HOURS: i64 = 3;

// =============================================================================
// Mobile Payment State (ledger)
// =============================================================================

/// Mobile-money progress stored on the sale and on a tracker entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MobilePaymentState {
    PendingStk,
    Completed,
    Failed,
}

impl MobilePaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MobilePaymentState::PendingStk => "PENDING_STK",
            MobilePaymentState::Completed => "COMPLETED",
            MobilePaymentState::Failed => "FAILED",
        }
    }
}

// =============================================================================
// STK Status (reported to the client)
// =============================================================================

/// Status reported to a polling client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum StkStatus {
    Pending,
    Completed,
    Cancelled,
    Timeout,
    Failed,
    Unknown,
}

impl StkStatus {
    /// Terminal statuses end the client's poll loop.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StkStatus::Completed | StkStatus::Cancelled | StkStatus::Timeout | StkStatus::Failed
        )
    }
}

/// A provider result code mapped onto a status and a human message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultOutcome {
    pub code: i64,
    pub status: StkStatus,
    pub message: &'static str,
}

impl ResultOutcome {
    /// The fixed result-code table.
    ///
    /// | Code        | Status    | Meaning                       |
    /// |-------------|-----------|-------------------------------|
    /// | 0           | COMPLETED | payment received              |
    /// | 1           | FAILED    | insufficient funds            |
    /// | 1001        | FAILED    | invalid phone number          |
    /// | 1019        | FAILED    | transaction expired           |
    /// | 1025, 1026  | PENDING   | still being processed         |
    /// | 1032        | CANCELLED | cancelled by the customer     |
    /// | 1037        | TIMEOUT   | customer could not be reached |
    /// | other       | UNKNOWN   |                               |
    pub fn from_code(code: i64) -> Self {
        let (status, message) = match code {
            0 => (StkStatus::Completed, "Payment completed successfully"),
            1 => (StkStatus::Failed, "Insufficient funds in customer account"),
            1001 => (StkStatus::Failed, "Invalid phone number"),
            1019 => (StkStatus::Failed, "Transaction expired"),
            1025 | 1026 => (StkStatus::Pending, "Transaction is still being processed"),
            1032 => (StkStatus::Cancelled, "Transaction cancelled by customer"),
            1037 => (StkStatus::Timeout, "Customer could not be reached"),
            _ => (StkStatus::Unknown, "Unknown transaction status"),
        };
        ResultOutcome {
            code,
            status,
            message,
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Timestamp in the provider's `YYYYMMDDHHMMSS` format, in East Africa Time.
///
/// ## Example
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use duka_core::mpesa::provider_timestamp;
///
/// let now = Utc.with_ymd_and_hms(2026, 10, 19, 6, 30, 5).unwrap();
/// assert_eq!(provider_timestamp(now), "20261019093005");
/// ```
pub fn provider_timestamp(now: DateTime<Utc>) -> String {
    (now + Duration::hours(EAT_OFFSET_HOURS))
        .format("%Y%m%d%H%M%S")
        .to_string()
}
