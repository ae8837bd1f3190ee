//! # Route Handlers
//!
//! Handlers are thin: extract, call a repository or the M-Pesa service,
//! wrap the result.
//!
//! ## Module Organization
//! - [`sales`] - Sale creation, lookup and listing
//! - [`mpesa`] - STK push, status poll and provider callback
//! - [`inventory`] - Stock adjustment, low stock, purchase orders
//! - [`health`] - Liveness and readiness

pub mod health;
pub mod inventory;
pub mod mpesa;
pub mod sales;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::Serialize;

use crate::error::ApiError;

/// Header carrying the authenticated user, set by the auth proxy.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Success envelope: `{ "success": true, "data": ... }`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// The caller's user id, required on every write.
#[derive(Debug, Clone)]
pub struct UserId(pub String);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| UserId(id.to_string()))
            .ok_or_else(|| ApiError::unauthorized("Missing x-user-id header"))
    }
}
