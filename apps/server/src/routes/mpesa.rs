//! M-Pesa routes.
//!
//! ```text
//! POST /api/mpesa/stkpush   { amount, phone_number, sale_id }   (x-user-id)
//! POST /api/mpesa/status    { checkoutRequestId }        (read-only)
//! POST /api/mpesa/callback  provider result              (public)
//! ```
//!
//! The callback always answers 200 with the provider's acknowledgement
//! shape; the provider retries anything else.

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use duka_mpesa::{CallbackAck, StkPushCommand, StkPushStarted};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{ApiResponse, UserId};
use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/mpesa/stkpush", post(stk_push))
        .route("/api/mpesa/status", post(status))
        .route("/api/mpesa/callback", post(callback))
}

#[derive(Debug, Deserialize)]
struct StkPushBody {
    amount: i64,
    phone_number: String,
    sale_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    checkout_request_id: String,
}

async fn stk_push(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    payload: Result<Json<StkPushBody>, JsonRejection>,
) -> Result<Json<ApiResponse<StkPushStarted>>, ApiError> {
    let Json(body) = payload?;
    debug!(%user_id, sale_id = %body.sale_id, "STK push requested");
    let started = state
        .mpesa
        .initiate_push(&StkPushCommand {
            sale_id: body.sale_id,
            amount: body.amount,
            phone_number: body.phone_number,
        })
        .await?;
    Ok(Json(ApiResponse::ok(started)))
}

async fn status(
    State(state): State<AppState>,
    payload: Result<Json<StatusBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let checkout_request_id = body.checkout_request_id.trim();
    if checkout_request_id.is_empty() {
        return Err(ApiError::validation("checkoutRequestId is required"));
    }

    let report = state.mpesa.check_status(checkout_request_id).await?;
    Ok(Json(json!({
        "success": true,
        "status": report.status,
        "message": report.message,
        "data": {
            "resultCode": report.result_code,
            "resultDesc": report.result_desc,
            "merchantRequestId": report.merchant_request_id,
            "checkoutRequestId": report.checkout_request_id,
        }
    })))
}

async fn callback(State(state): State<AppState>, body: Bytes) -> Json<CallbackAck> {
    Json(state.mpesa.handle_callback(&body).await)
}
