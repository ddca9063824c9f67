//! # Offline Queue Repository
//!
//! Durable store for receipts awaiting submission.
//!
//! ## Queue Discipline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Offline Queue                                     │
//! │                                                                         │
//! │  APPEND-ONLY: entries are enqueued once, ordered by the receipt's      │
//! │  allocated global number, and only ever TRANSITION:                    │
//! │                                                                         │
//! │      queued ──► submitting ──► submitted                               │
//! │                     │                                                   │
//! │                     └──► failed (needs_review = 1)                     │
//! │                              │                                          │
//! │                              └── mark_reviewed() ──► queued            │
//! │                                                                         │
//! │  Entries are NEVER reordered, skipped, or deleted. A failed entry      │
//! │  blocks the device's replay until an operator reviews it.              │
//! │                                                                         │
//! │  Queue transitions mirror onto receipts.status in the same             │
//! │  transaction so the two tables cannot drift.                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use sable_core::{OfflineQueueEntry, QueueState, Receipt, ReceiptStatus};

/// Row mirror of the `offline_queue` table.
#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    id: String,
    receipt_id: String,
    device_id: i64,
    receipt_global_no: i64,
    state: QueueState,
    attempts: i64,
    last_error: Option<String>,
    needs_review: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<QueueRow> for OfflineQueueEntry {
    fn from(row: QueueRow) -> Self {
        OfflineQueueEntry {
            id: row.id,
            receipt_id: row.receipt_id,
            device_id: row.device_id,
            receipt_global_no: row.receipt_global_no,
            state: row.state,
            attempts: row.attempts,
            last_error: row.last_error,
            needs_review: row.needs_review,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Repository for offline queue operations.
#[derive(Debug, Clone)]
pub struct OfflineQueueRepository {
    pool: SqlitePool,
}

impl OfflineQueueRepository {
    /// Creates a new OfflineQueueRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OfflineQueueRepository { pool }
    }

    /// Appends a receipt to the queue.
    ///
    /// Confirmed receipts cannot be enqueued. Enqueueing also moves the
    /// receipt to `queued` status, in the same transaction.
    pub async fn enqueue(&self, receipt: &Receipt) -> DbResult<OfflineQueueEntry> {
        if receipt.status == ReceiptStatus::Submitted {
            return Err(DbError::state_conflict(
                "OfflineQueueEntry",
                format!(
                    "receipt {} is already submitted and cannot be enqueued",
                    receipt.receipt_global_no
                ),
            ));
        }

        let now = Utc::now();
        let entry = OfflineQueueEntry {
            id: Uuid::new_v4().to_string(),
            receipt_id: receipt.id.clone(),
            device_id: receipt.device_id,
            receipt_global_no: receipt.receipt_global_no,
            state: QueueState::Queued,
            attempts: 0,
            last_error: None,
            needs_review: false,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO offline_queue (
                id, receipt_id, device_id, receipt_global_no,
                state, attempts, last_error, needs_review, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.receipt_id)
        .bind(entry.device_id)
        .bind(entry.receipt_global_no)
        .bind(entry.state)
        .bind(entry.attempts)
        .bind(&entry.last_error)
        .bind(entry.needs_review)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE receipts SET status = 'queued', updated_at = ?2 WHERE id = ?1 AND status != 'submitted'",
        )
        .bind(&entry.receipt_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            device_id = receipt.device_id,
            global_no = receipt.receipt_global_no,
            "Receipt enqueued for offline replay"
        );
        Ok(entry)
    }

    /// All not-yet-submitted entries for a device, ascending by the
    /// allocated receipt number. Failed entries are included so replay
    /// can see the blockage at the head of the line.
    pub async fn pending(&self, device_id: i64) -> DbResult<Vec<OfflineQueueEntry>> {
        let rows: Vec<QueueRow> = sqlx::query_as(
            r#"
            SELECT * FROM offline_queue
            WHERE device_id = ?1 AND state != 'submitted'
            ORDER BY receipt_global_no ASC
            "#,
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(OfflineQueueEntry::from).collect())
    }

    /// Counts queued entries for a device.
    pub async fn count_queued(&self, device_id: i64) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM offline_queue WHERE device_id = ?1 AND state = 'queued'",
        )
        .bind(device_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// queued -> submitting.
    ///
    /// The submitted transition has no method here: it happens inside
    /// `ChainManager::confirm`, atomically with the counter advance.
    pub async fn mark_submitting(&self, entry_id: &str) -> DbResult<()> {
        self.transition(entry_id, QueueState::Queued, QueueState::Submitting, None)
            .await
    }

    /// submitting -> failed. Sets `needs_review`; replay stops at this
    /// entry until an operator clears it.
    pub async fn mark_failed(&self, entry_id: &str, error: &str) -> DbResult<()> {
        self.transition(
            entry_id,
            QueueState::Submitting,
            QueueState::Failed,
            Some(error),
        )
        .await
    }

    /// Records a transient attempt without leaving `queued`/`submitting`.
    pub async fn record_attempt(&self, entry_id: &str, error: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE offline_queue SET
                attempts = attempts + 1,
                last_error = ?2,
                updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(entry_id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("OfflineQueueEntry", entry_id));
        }
        Ok(())
    }

    /// Returns a submitting entry to queued without failing it. Used when
    /// replay halts for reasons unrelated to the entry itself.
    pub async fn requeue(&self, entry_id: &str) -> DbResult<()> {
        self.transition(entry_id, QueueState::Submitting, QueueState::Queued, None)
            .await
    }

    /// Manual-review action: failed -> queued, review flag cleared.
    pub async fn mark_reviewed(&self, entry_id: &str) -> DbResult<()> {
        info!(entry_id, "Queue entry manually reviewed, retry re-enabled");
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE offline_queue SET
                state = 'queued',
                needs_review = 0,
                updated_at = ?2
            WHERE id = ?1 AND state = 'failed'
            "#,
        )
        .bind(entry_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::state_conflict(
                "OfflineQueueEntry",
                format!("{entry_id} is not in failed state"),
            ));
        }

        sqlx::query(
            r#"
            UPDATE receipts SET status = 'queued', updated_at = ?2
            WHERE id = (SELECT receipt_id FROM offline_queue WHERE id = ?1)
              AND status != 'submitted'
            "#,
        )
        .bind(entry_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Guarded queue transition, mirrored onto the receipt row.
    async fn transition(
        &self,
        entry_id: &str,
        from: QueueState,
        to: QueueState,
        error: Option<&str>,
    ) -> DbResult<()> {
        let now = Utc::now();
        let needs_review = to == QueueState::Failed;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE offline_queue SET
                state = ?3,
                attempts = attempts + (CASE WHEN ?4 IS NULL THEN 0 ELSE 1 END),
                last_error = COALESCE(?4, last_error),
                needs_review = ?5,
                updated_at = ?6
            WHERE id = ?1 AND state = ?2
            "#,
        )
        .bind(entry_id)
        .bind(from)
        .bind(to)
        .bind(error)
        .bind(needs_review)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::state_conflict(
                "OfflineQueueEntry",
                format!("{entry_id} is not in state {from:?}"),
            ));
        }

        let receipt_status = match to {
            QueueState::Queued => ReceiptStatus::Queued,
            QueueState::Submitting => ReceiptStatus::Submitting,
            QueueState::Submitted => ReceiptStatus::Submitted,
            QueueState::Failed => ReceiptStatus::Failed,
        };
        // The submitted receipt status is written by the chain manager's
        // confirm(); the mirror here only covers the non-terminal states.
        if receipt_status != ReceiptStatus::Submitted {
            sqlx::query(
                r#"
                UPDATE receipts SET status = ?2, updated_at = ?3
                WHERE id = (SELECT receipt_id FROM offline_queue WHERE id = ?1)
                  AND status != 'submitted'
                "#,
            )
            .bind(entry_id)
            .bind(receipt_status)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(entry_id, from = ?from, to = ?to, "Queue transition");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
