//! # M-Pesa Service
//!
//! Long-lived owner of the gateway (and its token cache), the pending
//! tracker and the ledger handle. One instance lives in the server state.
//!
//! ## Push Initiation
//! ```text
//! initiate_push(sale_id, amount, phone)
//!     │
//!     ├── validate amount, normalize + validate phone
//!     ├── sale must be mobile_money, pending, not COMPLETED
//!     ├── gateway.initiate_push ──► ResponseCode "0"
//!     ├── tracker.put(PendingTransaction)
//!     └── sale: merchant/checkout ids, PENDING_STK
//! ```
//!
//! ## Expiry Sweeper
//! A background task evicts tracker entries older than `pending_ttl_secs`.
//! Evicted pushes remain `PENDING_STK` on the sale and still settle through
//! the ledger if their callback arrives late.

use std::sync::Arc;

use duka_core::validation::{normalize_phone, validate_payment_amount, validate_phone};
use duka_core::{Clock, CoreError, MobilePaymentState, Sale, SystemClock};
use duka_db::Database;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::MpesaConfig;
use crate::error::{MpesaError, MpesaResult};
use crate::gateway::{MpesaGateway, PushRequest};
use crate::tracker::{PendingTracker, PendingTransaction};
use crate::transport::{HttpTransport, ReqwestTransport};

/// What the till sends to start a push.
#[derive(Debug, Clone)]
pub struct StkPushCommand {
    pub sale_id: String,
    pub amount: i64,
    pub phone_number: String,
}

/// Returned to the till once the customer is being prompted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StkPushStarted {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub customer_message: Option<String>,
    pub shortcode: String,
    pub environment: String,
}

/// Gateway, tracker and ledger behind the mobile-money endpoints.
pub struct MpesaService {
    pub(crate) gateway: MpesaGateway,
    pub(crate) tracker: PendingTracker,
    pub(crate) db: Database,
    pub(crate) clock: Arc<dyn Clock>,
}

impl MpesaService {
    pub fn new(
        config: MpesaConfig,
        db: Database,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gateway: MpesaGateway::new(config, transport, clock.clone()),
            tracker: PendingTracker::new(),
            db,
            clock,
        }
    }

    /// Service backed by `reqwest` and the system clock.
    pub fn from_config(config: MpesaConfig, db: Database) -> MpesaResult<Self> {
        config.validate()?;
        if !config.is_configured() {
            warn!("M-Pesa credentials incomplete; push payments will be refused");
        }
        Ok(Self::new(
            config,
            db,
            Arc::new(ReqwestTransport::new()),
            Arc::new(SystemClock),
        ))
    }

    pub fn config(&self) -> &MpesaConfig {
        self.gateway.config()
    }

    pub fn tracker(&self) -> &PendingTracker {
        &self.tracker
    }

    pub fn gateway(&self) -> &MpesaGateway {
        &self.gateway
    }

    // =========================================================================
    // Push Initiation
    // =========================================================================

    /// Starts an STK push for a sale awaiting mobile payment.
    ///
    /// On success the push is registered in the tracker and its ids are
    /// stored on the sale before this returns. On any provider failure
    /// nothing is registered and the sale is untouched.
    pub async fn initiate_push(&self, command: &StkPushCommand) -> MpesaResult<StkPushStarted> {
        validate_payment_amount(command.amount)?;
        let phone_number = normalize_phone(&command.phone_number);
        validate_phone(&phone_number)?;

        let sale = self
            .db
            .sales()
            .get_by_id(&command.sale_id)
            .await?
            .ok_or_else(|| CoreError::SaleNotFound(command.sale_id.clone()))?;

        if !sale.awaits_mobile_payment() {
            return Err(push_refused(&sale).into());
        }

        let accepted = self
            .gateway
            .initiate_push(&PushRequest {
                amount: command.amount,
                phone_number: phone_number.clone(),
                account_reference: sale.invoice_number.clone(),
                description: format!("Payment for {}", sale.invoice_number),
            })
            .await?;

        self.tracker.put(PendingTransaction {
            merchant_request_id: accepted.merchant_request_id.clone(),
            checkout_request_id: accepted.checkout_request_id.clone(),
            sale_id: sale.id.clone(),
            cashier_id: sale.cashier_id.clone(),
            amount: command.amount,
            phone_number,
            state: MobilePaymentState::PendingStk,
            created_at: self.clock.now(),
        });

        let attached = self
            .db
            .sales()
            .attach_mobile_request(
                &sale.id,
                &accepted.merchant_request_id,
                &accepted.checkout_request_id,
            )
            .await?;
        if !attached {
            // Another push or a settlement claimed the sale first
            self.tracker.delete(&accepted.merchant_request_id);
            warn!(
                sale_id = %sale.id,
                merchant_request_id = %accepted.merchant_request_id,
                "Sale changed state while the push was in flight"
            );
            return Err(push_refused(&sale).into());
        }

        info!(
            sale_id = %sale.id,
            merchant_request_id = %accepted.merchant_request_id,
            amount = command.amount,
            "STK push initiated"
        );

        let config = self.gateway.config();
        Ok(StkPushStarted {
            merchant_request_id: accepted.merchant_request_id,
            checkout_request_id: accepted.checkout_request_id,
            customer_message: accepted.customer_message,
            shortcode: config.shortcode.clone(),
            environment: config.environment.to_string(),
        })
    }

    // =========================================================================
    // Expiry Sweep
    // =========================================================================

    /// Evicts tracker entries older than the configured TTL.
    pub fn sweep_expired(&self) -> usize {
        let evicted = self
            .tracker
            .sweep_expired(self.clock.now(), self.config().pending_ttl());
        for entry in &evicted {
            info!(
                merchant_request_id = %entry.merchant_request_id,
                sale_id = %entry.sale_id,
                "Pending push expired from tracker"
            );
        }
        evicted.len()
    }

    /// Runs [`Self::sweep_expired`] on the configured interval until the
    /// returned handle is shut down.
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let service = Arc::clone(self);
        let period = service.config().sweep_interval();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        service.sweep_expired();
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Tracker sweeper stopped");
                        break;
                    }
                }
            }
        });

        SweeperHandle { shutdown_tx, join }
    }
}

/// Handle to the background sweeper.
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.join.await {
            warn!(error = %e, "Tracker sweeper ended abnormally");
        }
    }
}

fn push_refused(sale: &Sale) -> CoreError {
    let push_state = sale
        .mobile_payment_state
        .map(|state| state.as_str())
        .unwrap_or("NO_PUSH");
    CoreError::InvalidSaleState {
        sale_id: sale.id.clone(),
        current_state: format!(
            "{} / {} / {}",
            sale.payment_method.as_str(),
            sale.payment_status.as_str(),
            push_state
        ),
    }
}
