//! # Schema Migrations
//!
//! The SQL files under `migrations/sqlite/` are compiled into the binary and
//! applied in filename order the first time a ledger is opened.
//!
//! ```text
//! migrations/sqlite/
//!   001_initial_schema.sql   products, customers, sales, sale_items,
//!                            purchase_orders, purchase_items, audit_log
//! ```
//!
//! sqlx records each applied file with its checksum in `_sqlx_migrations`.
//! Editing a file that a shop has already applied makes the next startup
//! fail, so schema changes always go in a new `NNN_description.sql`.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    debug!(embedded = MIGRATOR.migrations.len(), "Applying pending migrations");
    MIGRATOR.run(pool).await?;
    Ok(())
}

/// `(embedded, applied)` migration counts.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let applied: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await?;

    Ok((MIGRATOR.migrations.len(), applied as usize))
}
