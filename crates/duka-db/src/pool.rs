//! # Ledger Handle
//!
//! Opens the shop's SQLite ledger and hands out repositories over one shared
//! pool.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │  DbConfig ──► Database::new ──► migrations ──► Database (Clone)          │
//! │                                                   │                      │
//! │        ┌──────────────┬──────────────┬────────────┼────────────┐         │
//! │        ▼              ▼              ▼            ▼            ▼         │
//! │     sales()      products()     customers()  purchases()    audit()      │
//! │        │                                                                 │
//! │        │  till checkout, M-Pesa settlement and stock receipt each open   │
//! │        ▼  their transaction with a write, so SQLite serializes them      │
//! │   one writer at a time; the rest wait up to busy_timeout                 │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A till checkout and a late callback for the same customer can land at the
//! same moment. The second one parks on the busy handler rather than
//! surfacing `SQLITE_BUSY` to the cashier.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::audit::AuditRepository;
use crate::repository::customer::CustomerRepository;
use crate::repository::product::ProductRepository;
use crate::repository::purchase::PurchaseRepository;
use crate::repository::sale::SaleRepository;

const IN_MEMORY: &str = ":memory:";

// =============================================================================
// Settings
// =============================================================================

/// How the ledger file is opened.
///
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/duka/duka.db")
///     .max_connections(8)
///     .busy_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Ledger file; `:memory:` for a throwaway database.
    pub database_path: PathBuf,

    /// Upper bound on pooled connections (8).
    pub max_connections: u32,

    /// Connections held open while idle (1).
    pub min_connections: u32,

    /// How long a request waits for a free connection (30s).
    pub connect_timeout: Duration,

    /// Idle connections older than this are dropped (10 min).
    pub idle_timeout: Option<Duration>,

    /// Wait on a held write lock before giving up (5s).
    pub busy_timeout: Duration,

    /// Apply pending migrations while opening (on).
    pub run_migrations: bool,
}

impl DbConfig {
    /// Settings for a ledger file at `path`. Missing files are created.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 8,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Throwaway ledger for tests.
    ///
    /// Pinned to one connection with no idle expiry: the data lives only as
    /// long as that connection does.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(IN_MEMORY),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: None,
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == IN_MEMORY
    }

    fn connect_url(&self) -> String {
        if self.is_in_memory() {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", self.database_path.display())
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Shared ledger handle. Clones share the same pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the ledger.
    ///
    /// Connections run in WAL mode with `synchronous=NORMAL`, foreign keys
    /// on and the configured busy timeout. Migrations follow unless
    /// `run_migrations` is off.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(path = %config.database_path.display(), "Opening ledger");

        let options = SqliteConnectOptions::from_str(&config.connect_url())
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(config.idle_timeout);
        if config.is_in_memory() {
            pool_options = pool_options.max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
        debug!(
            max = config.max_connections,
            min = config.min_connections,
            "Ledger pool open"
        );

        let db = Database { pool };
        if config.run_migrations {
            db.run_migrations().await?;
        }
        Ok(db)
    }

    /// Applies any migration not yet recorded. Safe to repeat.
    pub async fn run_migrations(&self) -> DbResult<()> {
        migrations::run_migrations(&self.pool).await?;
        info!("Ledger schema up to date");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn sales(&self) -> SaleRepository {
        SaleRepository::new(self.pool.clone())
    }

    pub fn products(&self) -> ProductRepository {
        ProductRepository::new(self.pool.clone())
    }

    pub fn customers(&self) -> CustomerRepository {
        CustomerRepository::new(self.pool.clone())
    }

    pub fn purchases(&self) -> PurchaseRepository {
        PurchaseRepository::new(self.pool.clone())
    }

    pub fn audit(&self) -> AuditRepository {
        AuditRepository::new(self.pool.clone())
    }

    /// Waits for checked-out connections, then closes the pool.
    pub async fn close(&self) {
        info!("Closing ledger");
        self.pool.close().await;
    }

    /// `true` when a trivial query round-trips.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_throwaway_ledger_answers_queries() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.health_check().await);
        assert!(db.products().get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ledger_file_is_created_and_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("duka.db");
        let db = Database::new(DbConfig::new(&path)).await.unwrap();

        let (total, applied) = migrations::migration_status(db.pool()).await.unwrap();
        assert_eq!(total, applied);
        assert!(path.exists());
        db.close().await;
    }

    #[tokio::test]
    async fn test_reopening_skips_applied_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("duka.db");
        Database::new(DbConfig::new(&path)).await.unwrap().close().await;

        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        db.run_migrations().await.unwrap();
        assert!(db.health_check().await);
    }

    #[test]
    fn test_settings_builder() {
        let config = DbConfig::new("/srv/duka/ledger.db")
            .max_connections(4)
            .min_connections(0)
            .busy_timeout(Duration::from_millis(2500))
            .run_migrations(false);

        assert_eq!(config.max_connections, 4);
        assert_eq!(config.min_connections, 0);
        assert_eq!(config.busy_timeout, Duration::from_millis(2500));
        assert!(!config.run_migrations);
        assert_eq!(config.connect_url(), "sqlite:///srv/duka/ledger.db?mode=rwc");
        assert_eq!(DbConfig::in_memory().connect_url(), "sqlite::memory:");
    }
}
