//! # HTTP Transport
//!
//! The one seam between the gateway and the network. Production uses
//! [`ReqwestTransport`]; tests script responses behind the same trait.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{MpesaError, MpesaResult};

/// HTTP method used by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// An outbound request. `operation` names the call for timeout errors.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub timeout: Duration,
    pub operation: &'static str,
}

/// Status and raw body of a response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> MpesaResult<serde_json::Value> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Sends requests to the provider.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> MpesaResult<HttpResponse>;
}

/// [`HttpTransport`] over a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> MpesaResult<HttpResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        }
        .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let operation = request.operation;
        let secs = request.timeout.as_secs();
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                MpesaError::Timeout { operation, secs }
            } else {
                MpesaError::Transport(e.to_string())
            }
        };

        let response = builder.send().await.map_err(map_err)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_err)?;

        debug!(operation, status, "M-Pesa response received");
        Ok(HttpResponse { status, body })
    }
}

// =============================================================================
// Scripted transport (tests)
// =============================================================================
