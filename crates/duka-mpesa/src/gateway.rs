//! # M-Pesa Gateway Client
//!
//! OAuth token management, STK push initiation and status queries.
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Gateway Request Flow                            │
//! │                                                                         │
//! │  ┌──────────────┐        ┌──────────────────┐       ┌───────────────┐  │
//! │  │ MpesaService │        │  MpesaGateway    │       │  M-Pesa API   │  │
//! │  └──────┬───────┘        └────────┬─────────┘       └───────┬───────┘  │
//! │         │ initiate_push           │                         │          │
//! │         │────────────────────────►│                         │          │
//! │         │                         │ [token missing/stale]   │          │
//! │         │                         │ GET /oauth/v1/generate  │          │
//! │         │                         │ (Basic key:secret, 10s) │          │
//! │         │                         │────────────────────────►│          │
//! │         │                         │◄────────────────────────│          │
//! │         │                         │ access_token, expires_in│          │
//! │         │                         │                         │          │
//! │         │                         │ POST stkpush (Bearer,   │          │
//! │         │                         │  Password, 30s)         │          │
//! │         │                         │────────────────────────►│          │
//! │         │                         │◄────────────────────────│          │
//! │         │◄────────────────────────│ ResponseCode "0" + ids  │          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Token Cache
//! The token is kept in memory and reused until 60 seconds before the
//! provider-reported expiry. Concurrent callers share one refresh.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use duka_core::mpesa::{provider_timestamp, ResultOutcome, STILL_PROCESSING_ERROR_CODE};
use duka_core::{Clock, StkStatus};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::MpesaConfig;
use crate::error::{MpesaError, MpesaResult};
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};

/// Refresh this many seconds before the provider's expiry.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Used when the OAuth response omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3599;

const OAUTH_PATH: &str = "/oauth/v1/generate?grant_type=client_credentials";
const STK_PUSH_PATH: &str = "/mpesa/stkpush/v1/processrequest";
const STK_QUERY_PATH: &str = "/mpesa/stkpushquery/v1/query";

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone)]
struct TokenInfo {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl TokenInfo {
    fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) >= self.expires_at
    }
}

/// A validated push request.
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub amount: i64,
    /// Normalized `2547XXXXXXXX` number.
    pub phone_number: String,
    pub account_reference: String,
    pub description: String,
}

/// The provider accepted the push and is prompting the customer.
#[derive(Debug, Clone, PartialEq)]
pub struct PushAccepted {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub customer_message: Option<String>,
}

/// Result of a status query, already mapped through the result-code table.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusQueryResult {
    pub status: StkStatus,
    pub message: String,
    pub result_code: Option<i64>,
    pub result_desc: Option<String>,
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: String,
}

// =============================================================================
// Gateway
// =============================================================================

/// Client for the M-Pesa API.
pub struct MpesaGateway {
    config: MpesaConfig,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    token: RwLock<Option<TokenInfo>>,
}

impl MpesaGateway {
    pub fn new(config: MpesaConfig, transport: Arc<dyn HttpTransport>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            transport,
            clock,
            token: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &MpesaConfig {
        &self.config
    }

    // =========================================================================
    // OAuth
    // =========================================================================

    /// Returns a valid access token, fetching a new one when the cached one
    /// is missing or about to expire.
    pub async fn access_token(&self) -> MpesaResult<String> {
        {
            let guard = self.token.read().await;
            if let Some(token) = guard.as_ref() {
                if !token.needs_refresh(self.clock.now()) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let mut guard = self.token.write().await;

        // Another caller may have refreshed while we waited for the lock
        if let Some(token) = guard.as_ref() {
            if !token.needs_refresh(self.clock.now()) {
                return Ok(token.access_token.clone());
            }
        }

        let fresh = self.fetch_token().await?;
        let access_token = fresh.access_token.clone();
        *guard = Some(fresh);
        Ok(access_token)
    }

    /// Drops the cached token so the next call re-authenticates.
    pub async fn invalidate_token(&self) {
        *self.token.write().await = None;
    }

    async fn fetch_token(&self) -> MpesaResult<TokenInfo> {
        if self.config.consumer_key.is_empty() || self.config.consumer_secret.is_empty() {
            return Err(MpesaError::InvalidConfig(
                "consumer key and secret are not configured".into(),
            ));
        }

        let credentials = STANDARD.encode(format!(
            "{}:{}",
            self.config.consumer_key, self.config.consumer_secret
        ));

        let response = self
            .transport
            .send(HttpRequest {
                method: HttpMethod::Get,
                url: format!("{}{}", self.config.base_url(), OAUTH_PATH),
                headers: vec![("Authorization".to_string(), format!("Basic {credentials}"))],
                body: None,
                timeout: self.config.token_timeout(),
                operation: "token request",
            })
            .await?;

        if !response.is_success() {
            warn!(status = response.status, "M-Pesa token request refused");
            return Err(MpesaError::Auth(format!(
                "token endpoint returned HTTP {}",
                response.status
            )));
        }

        let body = response.json()?;
        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| MpesaError::Auth("token response has no access_token".into()))?
            .to_string();
        let expires_in = code_value(body.get("expires_in")).unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);

        info!(expires_in, "M-Pesa access token obtained");
        Ok(TokenInfo {
            access_token,
            expires_at: self.clock.now() + Duration::seconds(expires_in),
        })
    }

    // =========================================================================
    // STK Push
    // =========================================================================

    /// Asks the provider to prompt the customer's phone.
    ///
    /// ## Errors
    /// - `Rejected` - the provider answered with a non-zero ResponseCode
    /// - `Timeout` / `Transport` - no answer; nothing was registered
    pub async fn initiate_push(&self, request: &PushRequest) -> MpesaResult<PushAccepted> {
        let timestamp = provider_timestamp(self.clock.now());
        let body = json!({
            "BusinessShortCode": self.config.shortcode,
            "Password": self.password(&timestamp),
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": request.amount,
            "PartyA": request.phone_number,
            "PartyB": self.config.shortcode,
            "PhoneNumber": request.phone_number,
            "CallBackURL": self.config.callback_url,
            "AccountReference": request.account_reference,
            "TransactionDesc": request.description,
        });

        let response = self.post(STK_PUSH_PATH, body, "STK push").await?;
        if !response.is_success() {
            return Err(self.provider_error(&response).await);
        }

        let body = response.json()?;
        let response_code = text_value(body.get("ResponseCode")).unwrap_or_default();
        if response_code != "0" {
            let message = text_value(body.get("ResponseDescription"))
                .unwrap_or_else(|| "push request declined".to_string());
            warn!(response_code = %response_code, message = %message, "STK push declined");
            return Err(MpesaError::Rejected {
                code: response_code,
                message,
            });
        }

        let merchant_request_id = text_value(body.get("MerchantRequestID"))
            .ok_or_else(|| MpesaError::InvalidResponse("missing MerchantRequestID".into()))?;
        let checkout_request_id = text_value(body.get("CheckoutRequestID"))
            .ok_or_else(|| MpesaError::InvalidResponse("missing CheckoutRequestID".into()))?;

        debug!(
            merchant_request_id = %merchant_request_id,
            checkout_request_id = %checkout_request_id,
            "STK push accepted"
        );
        Ok(PushAccepted {
            merchant_request_id,
            checkout_request_id,
            customer_message: text_value(body.get("CustomerMessage")),
        })
    }

    // =========================================================================
    // Status Query
    // =========================================================================

    /// Asks the provider where a checkout session stands.
    pub async fn query_status(&self, checkout_request_id: &str) -> MpesaResult<StatusQueryResult> {
        let timestamp = provider_timestamp(self.clock.now());
        let body = json!({
            "BusinessShortCode": self.config.shortcode,
            "Password": self.password(&timestamp),
            "Timestamp": timestamp,
            "CheckoutRequestID": checkout_request_id,
        });

        let response = self.post(STK_QUERY_PATH, body, "status query").await?;

        if !response.is_success() {
            let still_processing = response
                .json()
                .ok()
                .and_then(|b| text_value(b.get("errorCode")))
                .is_some_and(|code| code == STILL_PROCESSING_ERROR_CODE);
            if still_processing {
                return Ok(StatusQueryResult {
                    status: StkStatus::Pending,
                    message: "Transaction is still being processed".to_string(),
                    result_code: None,
                    result_desc: None,
                    merchant_request_id: None,
                    checkout_request_id: checkout_request_id.to_string(),
                });
            }
            return Err(self.provider_error(&response).await);
        }

        let body = response.json()?;
        let result_desc = text_value(body.get("ResultDesc"));
        let merchant_request_id = text_value(body.get("MerchantRequestID"));

        let (status, message, result_code) = match code_value(body.get("ResultCode")) {
            Some(code) => {
                let outcome = ResultOutcome::from_code(code);
                (outcome.status, outcome.message.to_string(), Some(code))
            }
            None => {
                let response_code = text_value(body.get("ResponseCode")).unwrap_or_default();
                if response_code != "0" {
                    return Err(MpesaError::Rejected {
                        code: response_code,
                        message: text_value(body.get("ResponseDescription"))
                            .unwrap_or_else(|| "status query declined".to_string()),
                    });
                }
                (
                    StkStatus::Pending,
                    "Transaction is still being processed".to_string(),
                    None,
                )
            }
        };

        Ok(StatusQueryResult {
            status,
            message,
            result_code,
            result_desc,
            merchant_request_id,
            checkout_request_id: checkout_request_id.to_string(),
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// `base64(shortcode + passkey + timestamp)`
    fn password(&self, timestamp: &str) -> String {
        STANDARD.encode(format!(
            "{}{}{}",
            self.config.shortcode, self.config.passkey, timestamp
        ))
    }

    async fn post(&self, path: &str, body: Value, operation: &'static str) -> MpesaResult<HttpResponse> {
        let token = self.access_token().await?;
        self.transport
            .send(HttpRequest {
                method: HttpMethod::Post,
                url: format!("{}{}", self.config.base_url(), path),
                headers: vec![("Authorization".to_string(), format!("Bearer {token}"))],
                body: Some(body),
                timeout: self.config.request_timeout(),
                operation,
            })
            .await
    }

    async fn provider_error(&self, response: &HttpResponse) -> MpesaError {
        if response.status == 401 {
            self.invalidate_token().await;
            return MpesaError::Auth("access token rejected".into());
        }

        let parsed = response.json().ok();
        let code = parsed
            .as_ref()
            .and_then(|b| text_value(b.get("errorCode")))
            .unwrap_or_else(|| response.status.to_string());
        let message = parsed
            .as_ref()
            .and_then(|b| text_value(b.get("errorMessage")))
            .unwrap_or_else(|| format!("HTTP {}", response.status));

        warn!(status = response.status, code = %code, message = %message, "M-Pesa request failed");
        MpesaError::Rejected { code, message }
    }
}

/// Reads a code the provider sends either as a JSON number or a string.
pub(crate) fn code_value(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Reads a string field, accepting numbers too.
pub(crate) fn text_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_config;
    use crate::transport::scripted::ScriptedTransport;
    use chrono::TimeZone;
    use duka_core::ManualClock;

    fn setup() -> (MpesaGateway, Arc<ScriptedTransport>, Arc<ManualClock>) {
        let transport = Arc::new(ScriptedTransport::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap(),
        ));
        let gateway = MpesaGateway::new(test_config(), transport.clone(), clock.clone());
        (gateway, transport, clock)
    }

    fn token_response(token: &str) -> Value {
        json!({ "access_token": token, "expires_in": "3599" })
    }

    fn push_ok(merchant: &str, checkout: &str) -> Value {
        json!({
            "MerchantRequestID": merchant,
            "CheckoutRequestID": checkout,
            "ResponseCode": "0",
            "ResponseDescription": "Success. Request accepted for processing",
            "CustomerMessage": "Success. Request accepted for processing"
        })
    }

    fn push_request() -> PushRequest {
        PushRequest {
            amount: 500,
            phone_number: "254712345678".to_string(),
            account_reference: "INV-20261019-0001".to_string(),
            description: "Duka sale".to_string(),
        }
    }

    #[tokio::test]
    async fn test_push_signs_request() {
        let (gateway, transport, _) = setup();
        transport.push_json(200, token_response("tok-1"));
        transport.push_json(200, push_ok("mr-1", "ws_CO_1"));

        let accepted = gateway.initiate_push(&push_request()).await.unwrap();
        assert_eq!(accepted.merchant_request_id, "mr-1");
        assert_eq!(accepted.checkout_request_id, "ws_CO_1");

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);

        let oauth = &requests[0];
        assert_eq!(oauth.method, HttpMethod::Get);
        assert!(oauth.url.ends_with("/oauth/v1/generate?grant_type=client_credentials"));
        assert_eq!(
            oauth.headers[0].1,
            format!("Basic {}", STANDARD.encode("key:secret"))
        );
        assert_eq!(oauth.timeout.as_secs(), 10);

        let push = &requests[1];
        assert_eq!(push.url, "https://sandbox.safaricom.co.ke/mpesa/stkpush/v1/processrequest");
        assert_eq!(push.headers[0].1, "Bearer tok-1");
        assert_eq!(push.timeout.as_secs(), 30);

        let body = push.body.as_ref().unwrap();
        // 08:00 UTC is 11:00 in Nairobi
        assert_eq!(body["Timestamp"], "20261019110000");
        assert_eq!(
            body["Password"],
            STANDARD.encode("174379passkey20261019110000")
        );
        assert_eq!(body["TransactionType"], "CustomerPayBillOnline");
        assert_eq!(body["Amount"], 500);
        assert_eq!(body["PartyA"], "254712345678");
        assert_eq!(body["PartyB"], "174379");
        assert_eq!(body["CallBackURL"], "https://duka.example.co.ke/api/mpesa/callback");
    }

    #[tokio::test]
    async fn test_token_is_cached_until_margin() {
        let (gateway, transport, clock) = setup();
        transport.push_json(200, token_response("tok-1"));

        assert_eq!(gateway.access_token().await.unwrap(), "tok-1");
        clock.advance(Duration::seconds(3000));
        assert_eq!(gateway.access_token().await.unwrap(), "tok-1");
        assert_eq!(transport.request_count(), 1);

        // 3599 - 60 = 3539s of validity
        clock.advance(Duration::seconds(540));
        transport.push_json(200, token_response("tok-2"));
        assert_eq!(gateway.access_token().await.unwrap(), "tok-2");
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_token_refused() {
        let (gateway, transport, _) = setup();
        transport.push_json(400, json!({ "errorMessage": "Invalid credentials" }));

        let err = gateway.access_token().await.unwrap_err();
        assert!(matches!(err, MpesaError::Auth(_)));
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let transport = Arc::new(ScriptedTransport::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let gateway = MpesaGateway::new(MpesaConfig::default(), transport.clone(), clock);

        let err = gateway.access_token().await.unwrap_err();
        assert!(matches!(err, MpesaError::InvalidConfig(_)));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_push_declined() {
        let (gateway, transport, _) = setup();
        transport.push_json(200, token_response("tok-1"));
        transport.push_json(
            200,
            json!({ "ResponseCode": "1", "ResponseDescription": "Rejected" }),
        );

        let err = gateway.initiate_push(&push_request()).await.unwrap_err();
        assert!(matches!(err, MpesaError::Rejected { ref code, .. } if code == "1"));
    }

    #[tokio::test]
    async fn test_push_http_error() {
        let (gateway, transport, _) = setup();
        transport.push_json(200, token_response("tok-1"));
        transport.push_json(
            400,
            json!({
                "requestId": "r-1",
                "errorCode": "400.002.02",
                "errorMessage": "Bad Request - Invalid PhoneNumber"
            }),
        );

        let err = gateway.initiate_push(&push_request()).await.unwrap_err();
        match err {
            MpesaError::Rejected { code, message } => {
                assert_eq!(code, "400.002.02");
                assert!(message.contains("Invalid PhoneNumber"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unauthorized_drops_cached_token() {
        let (gateway, transport, _) = setup();
        transport.push_json(200, token_response("tok-1"));
        transport.push_json(401, json!({ "errorMessage": "Invalid Access Token" }));

        let err = gateway.initiate_push(&push_request()).await.unwrap_err();
        assert!(matches!(err, MpesaError::Auth(_)));

        transport.push_json(200, token_response("tok-2"));
        assert_eq!(gateway.access_token().await.unwrap(), "tok-2");
    }

    #[tokio::test]
    async fn test_push_timeout() {
        let (gateway, transport, _) = setup();
        transport.push_json(200, token_response("tok-1"));
        transport.push_error(MpesaError::Timeout {
            operation: "STK push",
            secs: 30,
        });

        let err = gateway.initiate_push(&push_request()).await.unwrap_err();
        assert!(matches!(err, MpesaError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_query_status_mapping() {
        let (gateway, transport, _) = setup();
        transport.push_json(200, token_response("tok-1"));
        transport.push_json(
            200,
            json!({
                "ResponseCode": "0",
                "MerchantRequestID": "mr-1",
                "CheckoutRequestID": "ws_CO_1",
                "ResultCode": "1032",
                "ResultDesc": "Request cancelled by user"
            }),
        );
        transport.push_json(
            200,
            json!({
                "ResponseCode": "0",
                "MerchantRequestID": "mr-1",
                "CheckoutRequestID": "ws_CO_1",
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully."
            }),
        );

        let cancelled = gateway.query_status("ws_CO_1").await.unwrap();
        assert_eq!(cancelled.status, StkStatus::Cancelled);
        assert_eq!(cancelled.result_code, Some(1032));
        assert_eq!(cancelled.merchant_request_id.as_deref(), Some("mr-1"));

        let completed = gateway.query_status("ws_CO_1").await.unwrap();
        assert_eq!(completed.status, StkStatus::Completed);
    }

    #[tokio::test]
    async fn test_query_still_processing_is_pending() {
        let (gateway, transport, _) = setup();
        transport.push_json(200, token_response("tok-1"));
        transport.push_json(
            500,
            json!({
                "requestId": "r-1",
                "errorCode": "500.001.1001",
                "errorMessage": "The transaction is being processed"
            }),
        );

        let result = gateway.query_status("ws_CO_1").await.unwrap();
        assert_eq!(result.status, StkStatus::Pending);
        assert!(result.result_code.is_none());
    }

    #[test]
    fn test_code_value() {
        assert_eq!(code_value(Some(&json!("1032"))), Some(1032));
        assert_eq!(code_value(Some(&json!(0))), Some(0));
        assert_eq!(code_value(Some(&json!("abc"))), None);
        assert_eq!(code_value(None), None);
    }
}
