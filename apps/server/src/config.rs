//! # Server Configuration
//!
//! ## Load Order (later overrides earlier)
//! 1. Defaults (this file)
//! 2. Config file (`server.toml`, explicit path or the platform config dir)
//! 3. Environment variables (`DUKA_*`, and `MPESA_*` for the gateway)
//!
//! ## Example
//! ```toml
//! [http]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [database]
//! path = "/var/lib/duka/duka.db"
//!
//! [mpesa]
//! environment = "production"
//! shortcode = "600123"
//! callback_url = "https://duka.example.co.ke/api/mpesa/callback"
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use duka_mpesa::MpesaConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ConfigError;

/// Default tracing filter, overridden by `RUST_LOG`.
pub const DEFAULT_LOG_FILTER: &str = "info,duka=debug,sqlx=warn";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub http: HttpSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub mpesa: MpesaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Origins allowed by CORS. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to `duka.db` in the platform data dir.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: default_max_connections(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from file, environment, and defaults.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading server config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.port == 0 {
            return Err(ConfigError::Invalid("http.port must be greater than 0".into()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }
        self.mpesa
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("DUKA_HOST") {
            self.http.host = host;
        }

        if let Ok(port) = std::env::var("DUKA_PORT") {
            match port.parse::<u16>() {
                Ok(p) => {
                    debug!(port = p, "Overriding HTTP port from environment");
                    self.http.port = p;
                }
                Err(_) => warn!(port = %port, "Ignoring invalid DUKA_PORT"),
            }
        }

        if let Ok(path) = std::env::var("DUKA_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Ok(origins) = std::env::var("DUKA_CORS_ORIGINS") {
            self.http.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }

        self.mpesa.apply_env_overrides();
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("ke", "duka", "pos")
            .map(|dirs| dirs.config_dir().join("server.toml"))
    }

    /// Resolves the database file, creating its directory when defaulted.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.database.path {
            return Ok(path.clone());
        }

        let dirs = directories::ProjectDirs::from("ke", "duka", "pos")
            .ok_or_else(|| ConfigError::Invalid("could not determine app data directory".into()))?;
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;
        Ok(data_dir.join("duka.db"))
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.http.host, self.http.port)
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("http address: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.database.max_connections, 5);
        assert!(config.validate().is_ok());
        assert_eq!(config.socket_addr().unwrap().port(), 8080);
    }

    #[test]
    fn test_toml_sections() {
        let config: ServerConfig = toml::from_str(
            r#"
            [http]
            port = 9000

            [database]
            path = "/tmp/duka-test.db"

            [mpesa]
            environment = "production"
            shortcode = "600123"
            callback_url = "https://duka.example.co.ke/api/mpesa/callback"
            "#,
        )
        .unwrap();

        assert_eq!(config.http.port, 9000);
        assert_eq!(config.http.host, "0.0.0.0");
        assert_eq!(config.database.path, Some(PathBuf::from("/tmp/duka-test.db")));
        assert_eq!(config.mpesa.shortcode, "600123");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_mpesa_section_fails_validation() {
        let config: ServerConfig = toml::from_str(
            r#"
            [mpesa]
            environment = "production"
            callback_url = "http://duka.example.co.ke/api/mpesa/callback"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
