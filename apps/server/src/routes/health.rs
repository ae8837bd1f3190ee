//! `GET /health`: database reachability and pending push count.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthReport {
    status: &'static str,
    database: bool,
    pending_pushes: usize,
    mpesa_configured: bool,
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let database = state.db.health_check().await;
    let report = HealthReport {
        status: if database { "ok" } else { "degraded" },
        database,
        pending_pushes: state.mpesa.tracker().len(),
        mpesa_configured: state.mpesa.config().is_configured(),
    };
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

#[cfg(test)]
mod tests {
    use crate::testing::test_app;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_health_reports_database_and_tracker() {
        let app = test_app().await;
        let (status, body) = app.get("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], true);
        assert_eq!(body["pendingPushes"], 0);
        assert_eq!(body["mpesaConfigured"], true);
    }
}
