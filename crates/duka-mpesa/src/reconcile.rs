//! # Reconciliation Engine
//!
//! Turns provider callbacks into ledger updates and answers status polls.
//!
//! ## Callback Handling
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  POST /api/mpesa/callback                                               │
//! │       │                                                                 │
//! │       ├── unparseable ──────────────────────────► {1, "Rejected"}       │
//! │       ▼                                                                 │
//! │  tracker.take(MerchantRequestID)                                        │
//! │       │ miss                                                            │
//! │       ├──► ledger: sale with this id still PENDING_STK?                 │
//! │       │        └── no ── warn ──────────────────► {0, "Accepted"}       │
//! │       ▼                                                                 │
//! │  ResultCode 0 ──► apply_mobile_payment (amount, receipt, date)          │
//! │  otherwise   ──► mark_mobile_failed + audit MPESA_PAYMENT_FAILED        │
//! │       │                                                                 │
//! │       ├── ledger error: tracker entry restored                          │
//! │       ▼                                                                 │
//! │  {0, "Accepted"}                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A repeated delivery finds neither a tracker entry nor a `PENDING_STK`
//! sale and is acknowledged without effect.
//!
//! ## Status Polls
//! `check_status` asks the provider and maps the result code. It never
//! writes to the ledger: a `COMPLETED` poll tells the till the customer
//! has paid, but the sale only becomes `paid` when the callback lands.

use duka_core::mpesa::ResultOutcome;
use duka_core::{MobilePaymentState, StkStatus, MAX_MONEY_AMOUNT};
use duka_db::{AuditEvent, MobileSettlement};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::error::MpesaResult;
use crate::gateway::{code_value, text_value};
use crate::service::MpesaService;
use crate::tracker::PendingTransaction;

/// User id recorded on audit entries written by reconciliation.
const SYSTEM_USER: &str = "system";

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct CallbackEnvelope {
    #[serde(rename = "Body")]
    body: CallbackBody,
}

#[derive(Debug, Deserialize)]
struct CallbackBody {
    #[serde(rename = "stkCallback")]
    stk_callback: StkCallback,
}

/// The `stkCallback` object posted by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: Value,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata", default)]
    pub metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<CallbackItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<Value>,
}

impl StkCallback {
    fn item(&self, name: &str) -> Option<&Value> {
        self.metadata
            .as_ref()?
            .items
            .iter()
            .find(|item| item.name == name)?
            .value
            .as_ref()
    }

    fn amount(&self) -> Option<i64> {
        code_value(self.item("Amount"))
    }

    fn receipt_number(&self) -> Option<String> {
        text_value(self.item("MpesaReceiptNumber"))
    }

    fn transaction_date(&self) -> Option<String> {
        text_value(self.item("TransactionDate"))
    }
}

/// Acknowledgement returned to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl CallbackAck {
    pub fn accepted() -> Self {
        Self {
            result_code: 0,
            result_desc: "Accepted".to_string(),
        }
    }

    pub fn rejected() -> Self {
        Self {
            result_code: 1,
            result_desc: "Rejected".to_string(),
        }
    }
}

/// Answer to a status poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: StkStatus,
    pub message: String,
    pub result_code: Option<i64>,
    pub result_desc: Option<String>,
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: String,
}

// =============================================================================
// Reconciliation
// =============================================================================

impl MpesaService {
    /// Processes a provider callback body and returns the acknowledgement.
    ///
    /// Only an unparseable body is rejected. Every parsed callback is
    /// acknowledged as accepted, whatever happened to the sale.
    pub async fn handle_callback(&self, body: &[u8]) -> CallbackAck {
        let callback = match serde_json::from_slice::<CallbackEnvelope>(body) {
            Ok(envelope) => envelope.body.stk_callback,
            Err(e) => {
                warn!(error = %e, "Malformed M-Pesa callback");
                return CallbackAck::rejected();
            }
        };
        let Some(code) = code_value(Some(&callback.result_code)) else {
            warn!(
                merchant_request_id = %callback.merchant_request_id,
                "M-Pesa callback without a numeric ResultCode"
            );
            return CallbackAck::rejected();
        };
        let outcome = ResultOutcome::from_code(code);

        let entry = self.tracker.take(&callback.merchant_request_id);
        let sale_id = match &entry {
            Some(entry) => entry.sale_id.clone(),
            None => match self.pending_sale_from_ledger(&callback.merchant_request_id).await {
                Some(sale_id) => sale_id,
                None => return CallbackAck::accepted(),
            },
        };

        let result = if outcome.is_success() {
            self.settle(&sale_id, &callback, entry.as_ref()).await
        } else {
            self.record_failure(&sale_id, &callback, &outcome).await
        };

        if let Err(e) = result {
            error!(
                sale_id = %sale_id,
                merchant_request_id = %callback.merchant_request_id,
                error = %e,
                "Failed to reconcile M-Pesa callback"
            );
            // Keep the push correlatable for a redelivery
            if let Some(entry) = entry {
                self.tracker.put(entry);
            }
        }

        CallbackAck::accepted()
    }

    /// Ledger fallback for callbacks whose tracker entry is gone.
    async fn pending_sale_from_ledger(&self, merchant_request_id: &str) -> Option<String> {
        match self
            .db
            .sales()
            .find_pending_by_merchant_request(merchant_request_id)
            .await
        {
            Ok(Some(sale)) => {
                info!(
                    merchant_request_id,
                    sale_id = %sale.id,
                    "Tracker miss; correlated callback through the ledger"
                );
                Some(sale.id)
            }
            Ok(None) => {
                warn!(
                    merchant_request_id,
                    "M-Pesa callback for an unknown or already settled request"
                );
                None
            }
            Err(e) => {
                error!(merchant_request_id, error = %e, "Ledger lookup for M-Pesa callback failed");
                None
            }
        }
    }

    async fn settle(
        &self,
        sale_id: &str,
        callback: &StkCallback,
        entry: Option<&PendingTransaction>,
    ) -> MpesaResult<()> {
        let reported = callback.amount().or_else(|| entry.map(|e| e.amount));
        let Some(amount) = reported.filter(|amount| (1..=MAX_MONEY_AMOUNT).contains(amount)) else {
            warn!(
                sale_id,
                amount = ?reported,
                "Successful M-Pesa callback has no usable amount; sale left pending"
            );
            self.db
                .audit()
                .record_quietly(AuditEvent {
                    user_id: SYSTEM_USER,
                    action: "MPESA_SETTLEMENT_UNRESOLVED",
                    entity_type: "sale",
                    entity_id: sale_id,
                    details: Some(json!({
                        "merchant_request_id": callback.merchant_request_id,
                        "checkout_request_id": callback.checkout_request_id,
                        "reported_amount": reported,
                        "receipt_number": callback.receipt_number(),
                        "result_desc": callback.result_desc,
                    })),
                })
                .await;
            return Ok(());
        };

        let settlement = MobileSettlement {
            amount,
            receipt_number: callback.receipt_number(),
            transaction_date: callback.transaction_date(),
        };

        let applied = self
            .db
            .sales()
            .apply_mobile_payment(sale_id, &settlement)
            .await?;
        if applied {
            info!(
                sale_id,
                amount,
                receipt = settlement.receipt_number.as_deref().unwrap_or(""),
                "M-Pesa payment settled"
            );
        } else {
            debug!(sale_id, "M-Pesa payment already settled");
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        sale_id: &str,
        callback: &StkCallback,
        outcome: &ResultOutcome,
    ) -> MpesaResult<()> {
        let marked = self.db.sales().mark_mobile_failed(sale_id).await?;
        if !marked {
            debug!(sale_id, "M-Pesa failure already recorded");
            return Ok(());
        }

        info!(
            sale_id,
            result_code = outcome.code,
            reason = outcome.message,
            "M-Pesa payment failed"
        );

        self.db
            .audit()
            .record_quietly(AuditEvent {
                user_id: SYSTEM_USER,
                action: "MPESA_PAYMENT_FAILED",
                entity_type: "sale",
                entity_id: sale_id,
                details: Some(json!({
                    "merchant_request_id": callback.merchant_request_id,
                    "checkout_request_id": callback.checkout_request_id,
                    "result_code": outcome.code,
                    "status": outcome.status,
                    "reason": outcome.message,
                    "result_desc": callback.result_desc,
                })),
            })
            .await;
        Ok(())
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Asks the provider where a checkout session stands. Read-only.
    pub async fn check_status(&self, checkout_request_id: &str) -> MpesaResult<StatusReport> {
        let result = self.gateway.query_status(checkout_request_id).await?;

        let mut message = result.message;
        if result.status == StkStatus::Completed {
            let settled = self
                .db
                .sales()
                .find_by_checkout_request(checkout_request_id)
                .await?
                .is_some_and(|sale| sale.mobile_payment_state == Some(MobilePaymentState::Completed));
            if !settled {
                message = "Payment confirmed by M-Pesa; awaiting settlement".to_string();
            }
        }

        let merchant_request_id = result.merchant_request_id.or_else(|| {
            self.tracker
                .find_by_checkout(checkout_request_id)
                .map(|entry| entry.merchant_request_id)
        });

        Ok(StatusReport {
            status: result.status,
            message,
            result_code: result.result_code,
            result_desc: result.result_desc,
            merchant_request_id,
            checkout_request_id: result.checkout_request_id,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
