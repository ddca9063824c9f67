//! # Audit Event Store
//!
//! Immutable trail of everything the engine decides: built receipts,
//! queue transitions, duplicate and ordering rejections, device locks.
//! Events are appended and read; there is no update or delete path.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;

/// Audit action names. Kept as constants so dashboards and tests match on
/// stable strings.
pub mod actions {
    pub const RECEIPT_BUILT: &str = "receipt_built";
    pub const RECEIPT_SUBMITTED: &str = "receipt_submitted";
    pub const RECEIPT_QUEUED: &str = "receipt_queued";
    pub const RECEIPT_FAILED: &str = "receipt_failed";
    pub const DUPLICATE_REJECTED: &str = "duplicate_rejected";
    pub const VALIDATION_REJECTED: &str = "validation_rejected";
    pub const ORDERING_HALTED: &str = "ordering_halted";
    pub const DEVICE_LOCKED: &str = "device_locked";
    pub const QUEUE_REVIEWED: &str = "queue_reviewed";
    pub const FISCAL_DAY_OPENED: &str = "fiscal_day_opened";
    pub const FISCAL_DAY_CLOSED: &str = "fiscal_day_closed";
}

/// A recorded audit event.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditEvent {
    pub id: String,
    pub device_id: Option<i64>,
    pub action: String,
    /// JSON detail payload.
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit log.
#[derive(Debug, Clone)]
pub struct AuditLog {
    pool: SqlitePool,
}

impl AuditLog {
    /// Creates a new AuditLog.
    pub fn new(pool: SqlitePool) -> Self {
        AuditLog { pool }
    }

    /// Appends an event.
    pub async fn record(
        &self,
        device_id: Option<i64>,
        action: &str,
        detail: serde_json::Value,
    ) -> DbResult<()> {
        debug!(?device_id, action, "Audit event");

        sqlx::query(
            r#"
            INSERT INTO audit_events (id, device_id, action, detail, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(device_id)
        .bind(action)
        .bind(detail.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent events for a device, newest first.
    pub async fn recent(&self, device_id: i64, limit: i64) -> DbResult<Vec<AuditEvent>> {
        let events: Vec<AuditEvent> = sqlx::query_as(
            r#"
            SELECT * FROM audit_events
            WHERE device_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
