//! # Gateway Configuration
//!
//! Credentials and endpoints for the M-Pesa API. Loaded by the server from
//! the `[mpesa]` table of its TOML file, then overridden from `MPESA_*`
//! environment variables.
//!
//! ```toml
//! [mpesa]
//! environment = "sandbox"          # sandbox | production
//! consumer_key = "..."
//! consumer_secret = "..."
//! shortcode = "174379"
//! passkey = "..."
//! callback_url = "https://duka.example.co.ke/api/mpesa/callback"
//! pending_ttl_secs = 600
//! ```
//!
//! Secrets are redacted from `Debug` output.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::{MpesaError, MpesaResult};

// =============================================================================
// Environment
// =============================================================================

/// Which M-Pesa deployment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Sandbox,
    Production,
}

impl Environment {
    /// API base URL for this environment.
    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Sandbox => "https://sandbox.safaricom.co.ke",
            Environment::Production => "https://api.safaricom.co.ke",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Sandbox => write!(f, "sandbox"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = MpesaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sandbox" | "test" => Ok(Environment::Sandbox),
            "production" | "live" => Ok(Environment::Production),
            other => Err(MpesaError::InvalidConfig(format!(
                "Unknown M-Pesa environment: '{}'. Valid options: sandbox, production",
                other
            ))),
        }
    }
}

// =============================================================================
// Config
// =============================================================================

fn default_token_timeout() -> u64 {
    10
}
fn default_request_timeout() -> u64 {
    30
}
fn default_pending_ttl() -> u64 {
    600
}
fn default_sweep_interval() -> u64 {
    60
}

/// M-Pesa gateway settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct MpesaConfig {
    #[serde(default)]
    pub environment: Environment,

    /// Overrides the environment's base URL (local mocks).
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub consumer_key: String,

    #[serde(default)]
    pub consumer_secret: String,

    /// Paybill / till number payments are credited to.
    #[serde(default)]
    pub shortcode: String,

    #[serde(default)]
    pub passkey: String,

    /// Public URL the provider posts results to.
    #[serde(default)]
    pub callback_url: String,

    #[serde(default = "default_token_timeout")]
    pub token_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// How long an unanswered push stays in the in-memory tracker.
    #[serde(default = "default_pending_ttl")]
    pub pending_ttl_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for MpesaConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            base_url: None,
            consumer_key: String::new(),
            consumer_secret: String::new(),
            shortcode: String::new(),
            passkey: String::new(),
            callback_url: String::new(),
            token_timeout_secs: default_token_timeout(),
            request_timeout_secs: default_request_timeout(),
            pending_ttl_secs: default_pending_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl fmt::Debug for MpesaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpesaConfig")
            .field("environment", &self.environment)
            .field("base_url", &self.base_url())
            .field("consumer_key", &"<redacted>")
            .field("consumer_secret", &"<redacted>")
            .field("shortcode", &self.shortcode)
            .field("passkey", &"<redacted>")
            .field("callback_url", &self.callback_url)
            .field("pending_ttl_secs", &self.pending_ttl_secs)
            .finish()
    }
}

impl MpesaConfig {
    /// API base URL, without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.environment.base_url())
            .trim_end_matches('/')
    }

    pub fn token_timeout(&self) -> Duration {
        Duration::from_secs(self.token_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pending_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pending_ttl_secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// True once credentials and the callback URL are present.
    pub fn is_configured(&self) -> bool {
        !self.consumer_key.is_empty()
            && !self.consumer_secret.is_empty()
            && !self.shortcode.is_empty()
            && !self.passkey.is_empty()
            && !self.callback_url.is_empty()
    }

    /// Checks URLs and timeouts. Missing credentials are allowed here (the
    /// server can run without mobile money); see [`Self::is_configured`].
    pub fn validate(&self) -> MpesaResult<()> {
        let base = Url::parse(self.base_url())
            .map_err(|e| MpesaError::InvalidConfig(format!("base_url: {e}")))?;
        if base.scheme() != "https" && base.scheme() != "http" {
            return Err(MpesaError::InvalidConfig(format!(
                "base_url must be http(s), got: {}",
                base.scheme()
            )));
        }

        if !self.callback_url.is_empty() {
            let callback = Url::parse(&self.callback_url)
                .map_err(|e| MpesaError::InvalidConfig(format!("callback_url: {e}")))?;
            if self.environment == Environment::Production && callback.scheme() != "https" {
                return Err(MpesaError::InvalidConfig(
                    "callback_url must use https in production".into(),
                ));
            }
        }

        if !self.shortcode.is_empty() && !self.shortcode.chars().all(|c| c.is_ascii_digit()) {
            return Err(MpesaError::InvalidConfig(
                "shortcode must be numeric".into(),
            ));
        }

        if self.token_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(MpesaError::InvalidConfig(
                "timeouts must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies `MPESA_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(env) = std::env::var("MPESA_ENVIRONMENT") {
            match env.parse() {
                Ok(parsed) => {
                    debug!(environment = %env, "Overriding M-Pesa environment from environment");
                    self.environment = parsed;
                }
                Err(e) => warn!(error = %e, "Ignoring MPESA_ENVIRONMENT"),
            }
        }

        if let Ok(url) = std::env::var("MPESA_BASE_URL") {
            self.base_url = Some(url);
        }
        if let Ok(key) = std::env::var("MPESA_CONSUMER_KEY") {
            self.consumer_key = key;
        }
        if let Ok(secret) = std::env::var("MPESA_CONSUMER_SECRET") {
            self.consumer_secret = secret;
        }
        if let Ok(shortcode) = std::env::var("MPESA_SHORTCODE") {
            self.shortcode = shortcode;
        }
        if let Ok(passkey) = std::env::var("MPESA_PASSKEY") {
            self.passkey = passkey;
        }
        if let Ok(url) = std::env::var("MPESA_CALLBACK_URL") {
            debug!(callback_url = %url, "Overriding callback URL from environment");
            self.callback_url = url;
        }
        if let Ok(ttl) = std::env::var("MPESA_PENDING_TTL_SECS") {
            if let Ok(secs) = ttl.parse::<u64>() {
                self.pending_ttl_secs = secs;
            }
        }
    }
}
