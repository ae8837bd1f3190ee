//! # Duka Server Binary
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Startup                                                                │
//! │    tracing (RUST_LOG or default filter)                                 │
//! │    ServerConfig::load (file → DUKA_* / MPESA_* env → validate)          │
//! │    Database::new (pool + migrations)                                    │
//! │    MpesaService::from_config + tracker sweeper                          │
//! │    axum::serve until Ctrl+C / SIGTERM                                   │
//! │  Shutdown                                                               │
//! │    stop sweeper, close pool                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The config file path may be given as the first argument or through
//! `DUKA_CONFIG`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use duka_db::{Database, DbConfig};
use duka_mpesa::MpesaService;
use duka_server::config::{ServerConfig, DEFAULT_LOG_FILTER};
use duka_server::{cors_layer, router, AppState};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting Duka server...");

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("DUKA_CONFIG").ok())
        .map(PathBuf::from);
    let config = ServerConfig::load(config_path).context("loading configuration")?;

    let db_path = config.database_path()?;
    let db = Database::new(
        DbConfig::new(&db_path).max_connections(config.database.max_connections),
    )
    .await
    .with_context(|| format!("opening database at {}", db_path.display()))?;
    info!(path = %db_path.display(), "Database ready");

    let mpesa = Arc::new(
        MpesaService::from_config(config.mpesa.clone(), db.clone())
            .context("configuring M-Pesa")?,
    );
    info!(
        environment = %config.mpesa.environment,
        configured = config.mpesa.is_configured(),
        "M-Pesa service ready"
    );
    let sweeper = mpesa.spawn_sweeper();

    let app = router(AppState::new(db.clone(), mpesa))
        .layer(cors_layer(&config.http.cors_origins));

    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.shutdown().await;
    db.close().await;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
