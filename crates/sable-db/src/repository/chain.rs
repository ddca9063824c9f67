//! # Counter & Chain Manager
//!
//! Allocates monotonic per-device receipt numbers and links each receipt
//! to the hash of its immediate predecessor.
//!
//! ## Allocation Protocol
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 Exclusive Allocation Section                            │
//! │                                                                         │
//! │  BEGIN TRANSACTION                                                     │
//! │    UPDATE fiscal_devices ... WHERE device_id = ?                       │
//! │        └── takes SQLite's write lock: concurrent allocations           │
//! │            for the same store serialize here                           │
//! │                                                                         │
//! │    next_global = MAX(device.last_receipt_global_no,                    │
//! │                      MAX(receipts.receipt_global_no)) + 1              │
//! │        └── counts allocated-but-unconfirmed rows too, so offline       │
//! │            receipts never collide with each other                      │
//! │                                                                         │
//! │    previous_hash = hash of latest receipt in this fiscal day           │
//! │        └── None when the day has no receipts yet                       │
//! │                                                                         │
//! │    INSERT receipt row  ← UNIQUE indexes are the final arbiter          │
//! │  COMMIT                                                                │
//! │                                                                         │
//! │  The DURABLE counter (fiscal_devices.last_receipt_global_no) moves     │
//! │  only in confirm(), after the gateway acknowledged the receipt.        │
//! │  A failed or queued submission keeps its allocated row and number;     │
//! │  a retry reuses that row, it NEVER re-allocates.                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No in-memory "next number" cache exists anywhere: allocation always
//! reads the durable store inside the transaction.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::receipt::ReceiptRepository;
use sable_core::Receipt;

/// The chain position handed to the canonical builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// Monotonic per-device number.
    pub receipt_global_no: i64,

    /// 1-based position within the fiscal day.
    pub receipt_counter: i64,

    /// Device hash of the preceding receipt in this fiscal day.
    /// None when `receipt_counter == 1`.
    pub previous_hash: Option<String>,
}

/// Allocates chain positions and advances the confirmed counter.
#[derive(Debug, Clone)]
pub struct ChainManager {
    pool: SqlitePool,
}

impl ChainManager {
    /// Creates a new ChainManager.
    pub fn new(pool: SqlitePool) -> Self {
        ChainManager { pool }
    }

    /// Allocates the next chain position and inserts the receipt the
    /// caller builds from it, all inside one exclusive transaction.
    ///
    /// `build` receives the allocation and must return the fully built
    /// receipt (canonicalized and signed) carrying exactly that global
    /// number, counter, and previous hash. Building is pure computation,
    /// so holding the transaction open across it is cheap.
    ///
    /// ## Errors
    /// - `NotFound` when the device does not exist
    /// - `UniqueViolation` when the duplicate guard triple already exists
    pub async fn create_chained<F>(
        &self,
        device_id: i64,
        fiscal_day_no: i64,
        build: F,
    ) -> DbResult<Receipt>
    where
        F: FnOnce(Allocation) -> Receipt,
    {
        let mut tx = self.pool.begin().await?;

        // Write to the device row first: this promotes the transaction to
        // SQLite's write lock and serializes concurrent allocations.
        let locked = sqlx::query(
            "UPDATE fiscal_devices SET updated_at = ?2 WHERE device_id = ?1",
        )
        .bind(device_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        if locked.rows_affected() == 0 {
            return Err(DbError::not_found("FiscalDevice", device_id.to_string()));
        }

        let last_confirmed: i64 = sqlx::query_scalar(
            "SELECT last_receipt_global_no FROM fiscal_devices WHERE device_id = ?1",
        )
        .bind(device_id)
        .fetch_one(&mut *tx)
        .await?;

        let max_allocated: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(receipt_global_no), 0) FROM receipts WHERE device_id = ?1",
        )
        .bind(device_id)
        .fetch_one(&mut *tx)
        .await?;

        let receipt_global_no = last_confirmed.max(max_allocated) + 1;

        let previous: Option<(String, i64)> = sqlx::query_as(
            r#"
            SELECT receipt_hash, receipt_counter FROM receipts
            WHERE device_id = ?1 AND fiscal_day_no = ?2
            ORDER BY receipt_counter DESC
            LIMIT 1
            "#,
        )
        .bind(device_id)
        .bind(fiscal_day_no)
        .fetch_optional(&mut *tx)
        .await?;

        let allocation = match previous {
            Some((hash, counter)) => Allocation {
                receipt_global_no,
                receipt_counter: counter + 1,
                previous_hash: Some(hash),
            },
            None => Allocation {
                receipt_global_no,
                receipt_counter: 1,
                previous_hash: None,
            },
        };

        debug!(
            device_id,
            fiscal_day_no,
            global_no = allocation.receipt_global_no,
            counter = allocation.receipt_counter,
            chained = allocation.previous_hash.is_some(),
            "Allocated chain position"
        );

        let receipt = build(allocation);
        ReceiptRepository::insert_with(&mut *tx, &receipt).await?;

        tx.commit().await?;
        Ok(receipt)
    }

    /// Confirms a receipt after a verified gateway acknowledgement.
    ///
    /// Atomically marks the receipt submitted, stores the gateway
    /// material, and advances the device's durable counter. This is the
    /// ONLY place the counter moves.
    pub async fn confirm(
        &self,
        device_id: i64,
        receipt_global_no: i64,
        gateway_signature: Option<&str>,
        gateway_receipt_id: Option<i64>,
        operation_id: Option<&str>,
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE receipts SET
                status = 'submitted',
                gateway_signature = ?3,
                gateway_receipt_id = ?4,
                operation_id = COALESCE(?5, operation_id),
                updated_at = ?6
            WHERE device_id = ?1 AND receipt_global_no = ?2 AND status != 'submitted'
            "#,
        )
        .bind(device_id)
        .bind(receipt_global_no)
        .bind(gateway_signature)
        .bind(gateway_receipt_id)
        .bind(operation_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::state_conflict(
                "Receipt",
                format!(
                    "receipt {receipt_global_no} of device {device_id} is missing or already confirmed"
                ),
            ));
        }

        // MAX() keeps the counter monotonic even if confirmations land
        // out of order during replay recovery.
        sqlx::query(
            r#"
            UPDATE fiscal_devices SET
                last_receipt_global_no = MAX(last_receipt_global_no, ?2),
                updated_at = ?3
            WHERE device_id = ?1
            "#,
        )
        .bind(device_id)
        .bind(receipt_global_no)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        // A queued receipt may be confirmed outside the replay loop
        // (manual retry, ambiguity resolution); its queue entry follows.
        sqlx::query(
            r#"
            UPDATE offline_queue SET state = 'submitted', updated_at = ?3
            WHERE device_id = ?1 AND receipt_global_no = ?2 AND state != 'submitted'
            "#,
        )
        .bind(device_id)
        .bind(receipt_global_no)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(device_id, global_no = receipt_global_no, "Receipt confirmed, counter advanced");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
