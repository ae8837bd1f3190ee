//! Sale routes.
//!
//! `POST /api/sales` is the entry point of the sale transaction; everything
//! it needs (stock, invoice, loyalty) happens inside
//! [`duka_db::SaleRepository::create_sale`].

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use duka_core::{Sale, SaleDraft, SaleFilter, SaleWithItems};
use tracing::info;

use super::{ApiResponse, UserId};
use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/sales", get(list_sales).post(create_sale))
        .route("/api/sales/{id}", get(get_sale))
}

async fn create_sale(
    State(state): State<AppState>,
    UserId(cashier_id): UserId,
    payload: Result<Json<SaleDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<Sale>>), ApiError> {
    let Json(draft) = payload?;
    let sale = state.db.sales().create_sale(&draft, &cashier_id).await?;

    info!(
        sale_id = %sale.id,
        invoice = %sale.invoice_number,
        cashier_id = %cashier_id,
        "Sale recorded"
    );
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(sale))))
}

async fn get_sale(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<SaleWithItems>>, ApiError> {
    let sale = state
        .db
        .sales()
        .get_with_items(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Sale", &id))?;
    Ok(Json(ApiResponse::ok(sale)))
}

async fn list_sales(
    State(state): State<AppState>,
    filter: Result<Query<SaleFilter>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<Sale>>>, ApiError> {
    let Query(filter) = filter?;
    let sales = state.db.sales().list(&filter).await?;
    Ok(Json(ApiResponse::ok(sales)))
}
