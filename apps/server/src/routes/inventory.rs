//! Stock maintenance routes.
//!
//! ```text
//! POST /api/products/{id}/adjust-stock   { delta, reason }
//! GET  /api/products/low-stock?limit=N
//! POST /api/purchases                    { supplier_id, items, notes? }
//! GET  /api/purchases/{id}
//! POST /api/purchases/{id}/receive
//! ```

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use duka_core::{NewPurchaseOrder, Product, PurchaseOrderWithItems, StockAdjustment};
use serde::Deserialize;

use super::{ApiResponse, UserId};
use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/products/low-stock", get(low_stock))
        .route("/api/products/{id}/adjust-stock", post(adjust_stock))
        .route("/api/purchases", post(create_purchase))
        .route("/api/purchases/{id}", get(get_purchase))
        .route("/api/purchases/{id}/receive", post(receive_purchase))
}

#[derive(Debug, Deserialize)]
struct LowStockQuery {
    limit: Option<i64>,
}

async fn adjust_stock(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
    payload: Result<Json<StockAdjustment>, JsonRejection>,
) -> Result<Json<ApiResponse<Product>>, ApiError> {
    let Json(adjustment) = payload?;
    let product = state
        .db
        .products()
        .adjust_stock(&id, &adjustment, &user_id)
        .await?;
    Ok(Json(ApiResponse::ok(product)))
}

async fn low_stock(
    State(state): State<AppState>,
    query: Result<Query<LowStockQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<Product>>>, ApiError> {
    let Query(query) = query?;
    let products = state.db.products().low_stock(query.limit).await?;
    Ok(Json(ApiResponse::ok(products)))
}

async fn create_purchase(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    payload: Result<Json<NewPurchaseOrder>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<PurchaseOrderWithItems>>), ApiError> {
    let Json(order) = payload?;
    let created = state.db.purchases().create(&order, &user_id).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(created))))
}

async fn get_purchase(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<PurchaseOrderWithItems>>, ApiError> {
    let order = state
        .db
        .purchases()
        .get_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("PurchaseOrder", &id))?;
    Ok(Json(ApiResponse::ok(order)))
}

async fn receive_purchase(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<PurchaseOrderWithItems>>, ApiError> {
    let received = state.db.purchases().receive(&id, &user_id).await?;
    Ok(Json(ApiResponse::ok(received)))
}
