//! # Duka Server
//!
//! HTTP surface of the sale engine: the till creates sales and starts push
//! payments here, and the provider posts payment results back.
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Duka Server                                    │
//! │                                                                         │
//! │  Till ──► /api/sales ──────────► SaleRepository::create_sale            │
//! │       ──► /api/mpesa/stkpush ──► MpesaService::initiate_push            │
//! │       ──► /api/mpesa/status ───► MpesaService::check_status             │
//! │  M-Pesa ► /api/mpesa/callback ─► MpesaService::handle_callback          │
//! │       ──► /api/products, /api/purchases (stock maintenance)             │
//! │       ──► /health                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every successful response is `{ "success": true, "data": ... }`; errors
//! are rendered by [`error::ApiError`].

pub mod config;
pub mod error;
pub mod routes;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::Router;
use duka_db::Database;
use duka_mpesa::MpesaService;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub mpesa: Arc<MpesaService>,
}

impl AppState {
    pub fn new(db: Database, mpesa: Arc<MpesaService>) -> Self {
        Self { db, mpesa }
    }
}

/// Builds the application router with request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::sales::router())
        .merge(routes::mpesa::router())
        .merge(routes::inventory::router())
        .merge(routes::health::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS for the till frontend. An empty list allows any origin.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}
