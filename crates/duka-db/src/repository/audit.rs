//! # Audit Repository
//!
//! Append-only audit trail. Entries are written after the primary operation
//! has committed; a failed audit write is logged and never undoes or fails
//! the operation it describes.

use chrono::Utc;
use duka_core::AuditEntry;
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

use crate::error::DbResult;

/// One audit record to write.
#[derive(Debug, Clone)]
pub struct AuditEvent<'a> {
    pub user_id: &'a str,
    pub action: &'a str,
    pub entity_type: &'a str,
    pub entity_id: &'a str,
    pub details: Option<serde_json::Value>,
}

/// Repository for the audit log.
#[derive(Debug, Clone)]
pub struct AuditRepository {
    pool: SqlitePool,
}

impl AuditRepository {
    /// Creates a new AuditRepository.
    pub fn new(pool: SqlitePool) -> Self {
        AuditRepository { pool }
    }

    /// Appends an entry.
    pub async fn record(&self, event: AuditEvent<'_>) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, user_id, action, entity_type, entity_id, details, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(event.user_id)
        .bind(event.action)
        .bind(event.entity_type)
        .bind(event.entity_id)
        .bind(event.details.map(|d| d.to_string()))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Appends an entry, logging instead of returning a failure.
    pub async fn record_quietly(&self, event: AuditEvent<'_>) {
        let action = event.action;
        let entity_id = event.entity_id.to_string();
        if let Err(e) = self.record(event).await {
            warn!(error = %e, action, entity_id = %entity_id, "Audit log write failed");
        }
    }

    /// Entries for one entity, oldest first.
    pub async fn list_for_entity(&self, entity_type: &str, entity_id: &str) -> DbResult<Vec<AuditEntry>> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT id, user_id, action, entity_type, entity_id, details, created_at
            FROM audit_log
            WHERE entity_type = ?1 AND entity_id = ?2
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}
