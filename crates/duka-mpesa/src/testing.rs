//! Shared fixtures for this crate's tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use duka_core::{ManualClock, NewProduct, NewSaleItem, PaymentMethod, Sale, SaleDraft};
use duka_db::{Database, DbConfig};
use serde_json::{json, Value};

use crate::config::MpesaConfig;
use crate::service::MpesaService;
use crate::transport::scripted::ScriptedTransport;

static NEXT_SKU: AtomicU64 = AtomicU64::new(1);

pub fn test_config() -> MpesaConfig {
    MpesaConfig {
        consumer_key: "key".to_string(),
        consumer_secret: "secret".to_string(),
        shortcode: "174379".to_string(),
        passkey: "passkey".to_string(),
        callback_url: "https://duka.example.co.ke/api/mpesa/callback".to_string(),
        ..Default::default()
    }
}

pub struct Harness {
    pub service: MpesaService,
    pub transport: Arc<ScriptedTransport>,
    pub clock: Arc<ManualClock>,
    pub db: Database,
}

pub async fn harness() -> Harness {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap(),
    ));
    let service = MpesaService::new(test_config(), db.clone(), transport.clone(), clock.clone());
    Harness {
        service,
        transport,
        clock,
        db,
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

pub async fn sale_with_method(db: &Database, total: i64, method: PaymentMethod) -> Sale {
    let product = db
        .products()
        .insert(&NewProduct {
            sku: format!("SKU-{}", NEXT_SKU.fetch_add(1, Ordering::Relaxed)),
            name: "Unga 2kg".to_string(),
            quantity: 100,
            reorder_level: 5,
            cost_price: total / 2,
            unit_price: total,
        })
        .await
        .unwrap();

    db.sales()
        .create_sale(
            &SaleDraft {
                items: vec![NewSaleItem {
                    product_id: product.id.clone(),
                    quantity: 1,
                    unit_price: total,
                    discount: 0,
                }],
                customer_id: None,
                subtotal: total,
                discount: 0,
                tax_rate: 0.0,
                tax: 0,
                total,
                amount_paid: if method == PaymentMethod::MobileMoney { 0 } else { total },
                payment_method: method,
                payment_status: None,
                loyalty_points_redeemed: 0,
                loyalty_discount: 0,
                notes: None,
            },
            "cashier-1",
        )
        .await
        .unwrap()
}

pub async fn mobile_sale(db: &Database, total: i64) -> Sale {
    sale_with_method(db, total, PaymentMethod::MobileMoney).await
}
