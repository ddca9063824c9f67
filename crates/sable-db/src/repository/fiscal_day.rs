//! # Fiscal Day Repository
//!
//! Database operations for per-device accounting periods.
//!
//! ## Day Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Fiscal Day Lifecycle                                │
//! │                                                                         │
//! │  open() ──► Open ──► initiate_close() ──► CloseInitiated               │
//! │                                               │                         │
//! │                              ┌────────────────┴───────────────┐         │
//! │                              ▼                                ▼         │
//! │                     complete_close()                   fail_close()     │
//! │                              │                                │         │
//! │                              ▼                                ▼         │
//! │                           Closed                        CloseFailed     │
//! │                                                               │         │
//! │                                           resolve_failed_close()        │
//! │                                           (MANUAL operator action;     │
//! │                                            the engine never retries    │
//! │                                            a close by itself)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transitions are enforced with guarded UPDATEs (`WHERE status = ...`);
//! a skipped step surfaces as a `StateConflict`, never a silent write.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use sable_core::{FiscalDay, FiscalDayStatus};

/// Row mirror of the `fiscal_days` table.
#[derive(Debug, sqlx::FromRow)]
struct FiscalDayRow {
    id: String,
    device_id: i64,
    fiscal_day_no: i64,
    status: FiscalDayStatus,
    opened_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    closing_error: Option<String>,
}

impl From<FiscalDayRow> for FiscalDay {
    fn from(row: FiscalDayRow) -> Self {
        FiscalDay {
            id: row.id,
            device_id: row.device_id,
            fiscal_day_no: row.fiscal_day_no,
            status: row.status,
            opened_at: row.opened_at,
            closed_at: row.closed_at,
            closing_error: row.closing_error,
        }
    }
}

/// Repository for fiscal day operations.
#[derive(Debug, Clone)]
pub struct FiscalDayRepository {
    pool: SqlitePool,
}

impl FiscalDayRepository {
    /// Creates a new FiscalDayRepository.
    pub fn new(pool: SqlitePool) -> Self {
        FiscalDayRepository { pool }
    }

    /// Opens a new fiscal day for a device.
    ///
    /// Rejected while another day is still open; day numbers are unique
    /// per device. Also records the day number on the device row.
    pub async fn open(&self, device_id: i64, fiscal_day_no: i64) -> DbResult<FiscalDay> {
        if let Some(open_day) = self.current_open(device_id).await? {
            return Err(DbError::state_conflict(
                "FiscalDay",
                format!(
                    "day {} is still open; close it before opening day {}",
                    open_day.fiscal_day_no, fiscal_day_no
                ),
            ));
        }

        let day = FiscalDay {
            id: Uuid::new_v4().to_string(),
            device_id,
            fiscal_day_no,
            status: FiscalDayStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
            closing_error: None,
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO fiscal_days (id, device_id, fiscal_day_no, status, opened_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&day.id)
        .bind(day.device_id)
        .bind(day.fiscal_day_no)
        .bind(day.status)
        .bind(day.opened_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE fiscal_devices SET last_fiscal_day_no = ?2, updated_at = ?3 WHERE device_id = ?1",
        )
        .bind(device_id)
        .bind(fiscal_day_no)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(device_id, fiscal_day_no, "Fiscal day opened");
        Ok(day)
    }

    /// Gets a specific fiscal day.
    pub async fn get(&self, device_id: i64, fiscal_day_no: i64) -> DbResult<Option<FiscalDay>> {
        let row: Option<FiscalDayRow> = sqlx::query_as(
            "SELECT * FROM fiscal_days WHERE device_id = ?1 AND fiscal_day_no = ?2",
        )
        .bind(device_id)
        .bind(fiscal_day_no)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FiscalDay::from))
    }

    /// Returns the currently open day for a device, if any.
    pub async fn current_open(&self, device_id: i64) -> DbResult<Option<FiscalDay>> {
        let row: Option<FiscalDayRow> = sqlx::query_as(
            r#"
            SELECT * FROM fiscal_days
            WHERE device_id = ?1 AND status = 'open'
            ORDER BY fiscal_day_no DESC
            LIMIT 1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FiscalDay::from))
    }

    /// Open -> CloseInitiated.
    pub async fn initiate_close(&self, device_id: i64, fiscal_day_no: i64) -> DbResult<()> {
        self.transition(
            device_id,
            fiscal_day_no,
            FiscalDayStatus::Open,
            FiscalDayStatus::CloseInitiated,
            None,
        )
        .await
    }

    /// CloseInitiated -> Closed.
    pub async fn complete_close(&self, device_id: i64, fiscal_day_no: i64) -> DbResult<()> {
        self.transition(
            device_id,
            fiscal_day_no,
            FiscalDayStatus::CloseInitiated,
            FiscalDayStatus::Closed,
            None,
        )
        .await
    }

    /// CloseInitiated -> CloseFailed, recording the gateway error.
    ///
    /// The engine never re-initiates the close; CloseFailed waits for an
    /// operator.
    pub async fn fail_close(
        &self,
        device_id: i64,
        fiscal_day_no: i64,
        error: &str,
    ) -> DbResult<()> {
        self.transition(
            device_id,
            fiscal_day_no,
            FiscalDayStatus::CloseInitiated,
            FiscalDayStatus::CloseFailed,
            Some(error),
        )
        .await
    }

    /// CloseFailed -> Closed. Explicitly manual: called by operator
    /// tooling after the underlying problem was fixed out of band.
    pub async fn resolve_failed_close(&self, device_id: i64, fiscal_day_no: i64) -> DbResult<()> {
        info!(device_id, fiscal_day_no, "Manually resolving failed close");
        self.transition(
            device_id,
            fiscal_day_no,
            FiscalDayStatus::CloseFailed,
            FiscalDayStatus::Closed,
            None,
        )
        .await
    }

    /// Guarded status transition. `rows_affected == 0` means the day was
    /// not in the expected state (or does not exist).
    async fn transition(
        &self,
        device_id: i64,
        fiscal_day_no: i64,
        from: FiscalDayStatus,
        to: FiscalDayStatus,
        closing_error: Option<&str>,
    ) -> DbResult<()> {
        let closed_at = matches!(to, FiscalDayStatus::Closed | FiscalDayStatus::CloseFailed)
            .then(Utc::now);

        let result = sqlx::query(
            r#"
            UPDATE fiscal_days SET
                status = ?4,
                closed_at = COALESCE(?5, closed_at),
                closing_error = COALESCE(?6, closing_error)
            WHERE device_id = ?1 AND fiscal_day_no = ?2 AND status = ?3
            "#,
        )
        .bind(device_id)
        .bind(fiscal_day_no)
        .bind(from)
        .bind(to)
        .bind(closed_at)
        .bind(closing_error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::state_conflict(
                "FiscalDay",
                format!(
                    "day {fiscal_day_no} of device {device_id} is not in status {from:?}"
                ),
            ));
        }

        info!(device_id, fiscal_day_no, from = ?from, to = ?to, "Fiscal day transition");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
