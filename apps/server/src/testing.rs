//! Router fixtures: in-memory ledger and a queued provider.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use duka_core::{NewProduct, Product, SystemClock};
use duka_db::{Database, DbConfig};
use duka_mpesa::{
    HttpRequest, HttpResponse, HttpTransport, MpesaConfig, MpesaError, MpesaResult, MpesaService,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::{router, AppState};

/// Replies with queued responses in order.
#[derive(Default)]
pub struct QueuedTransport {
    responses: Mutex<VecDeque<HttpResponse>>,
    sent: AtomicUsize,
}

impl QueuedTransport {
    pub fn push_json(&self, status: u16, body: Value) {
        self.responses.lock().unwrap().push_back(HttpResponse {
            status,
            body: body.to_string(),
        });
    }

    pub fn request_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for QueuedTransport {
    async fn send(&self, _request: HttpRequest) -> MpesaResult<HttpResponse> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| MpesaError::Transport("no response queued".into()))
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub transport: Arc<QueuedTransport>,
}

pub async fn test_app() -> TestApp {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let transport = Arc::new(QueuedTransport::default());
    let config = MpesaConfig {
        consumer_key: "key".to_string(),
        consumer_secret: "secret".to_string(),
        shortcode: "174379".to_string(),
        passkey: "passkey".to_string(),
        callback_url: "https://duka.example.co.ke/api/mpesa/callback".to_string(),
        ..Default::default()
    };
    let mpesa = Arc::new(MpesaService::new(
        config,
        db.clone(),
        transport.clone(),
        Arc::new(SystemClock),
    ));
    let state = AppState::new(db, mpesa);
    TestApp {
        router: router(state.clone()),
        state,
        transport,
    }
}

impl TestApp {
    pub async fn product(&self, sku: &str, quantity: i64, unit_price: i64) -> Product {
        self.state
            .db
            .products()
            .insert(&NewProduct {
                sku: sku.to_string(),
                name: format!("Product {sku}"),
                quantity,
                reorder_level: 5,
                cost_price: unit_price / 2,
                unit_price,
            })
            .await
            .unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::post(uri)
                .header("content-type", "application/json")
                .header("x-user-id", "cashier-1")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}

pub fn token_response() -> Value {
    json!({ "access_token": "tok-1", "expires_in": "3599" })
}

pub fn push_ok(merchant: &str, checkout: &str) -> Value {
    json!({
        "MerchantRequestID": merchant,
        "CheckoutRequestID": checkout,
        "ResponseCode": "0",
        "ResponseDescription": "Success. Request accepted for processing",
        "CustomerMessage": "Success. Request accepted for processing"
    })
}

/// Body for `POST /api/sales` with one line at list price.
pub fn cash_sale(product_id: &str, quantity: i64, unit_price: i64) -> Value {
    let total = quantity * unit_price;
    json!({
        "items": [{ "product_id": product_id, "quantity": quantity, "unit_price": unit_price, "discount": 0 }],
        "subtotal": total,
        "discount": 0,
        "tax_rate": 0.0,
        "tax": 0,
        "total": total,
        "amount_paid": total,
        "payment_method": "cash"
    })
}
