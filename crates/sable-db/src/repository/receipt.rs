//! # Receipt Repository
//!
//! Database operations for receipts.
//!
//! ## Snapshot Pattern
//! Lines, tax buckets, and buyer data are stored as JSON snapshot columns
//! next to the canonical string and signatures. The canonical string was
//! computed from those snapshots exactly once; nothing here re-derives or
//! patches it. A receipt row with status `submitted` is immutable.

use chrono::{DateTime, Utc};
use sqlx::sqlite::Sqlite;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use sable_core::{
    BuyerSnapshot, DocumentType, Money, Receipt, ReceiptLine, ReceiptStatus, TaxBucket,
};

/// Row mirror of the `receipts` table.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ReceiptRow {
    id: String,
    device_id: i64,
    fiscal_day_no: i64,
    receipt_global_no: i64,
    receipt_counter: i64,
    document_type: DocumentType,
    invoice_no: String,
    supplier_tin: String,
    currency: String,
    receipt_date: DateTime<Utc>,
    lines_json: String,
    taxes_json: String,
    buyer_json: Option<String>,
    total_cents: i64,
    previous_receipt_hash: Option<String>,
    canonical_string: String,
    receipt_hash: String,
    device_signature: String,
    gateway_signature: Option<String>,
    gateway_receipt_id: Option<i64>,
    operation_id: Option<String>,
    original_invoice_no: Option<String>,
    original_receipt_global_no: Option<i64>,
    reason: Option<String>,
    status: ReceiptStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ReceiptRow {
    pub(crate) fn into_receipt(self) -> DbResult<Receipt> {
        let lines: Vec<ReceiptLine> = serde_json::from_str(&self.lines_json)?;
        let taxes: Vec<TaxBucket> = serde_json::from_str(&self.taxes_json)?;
        let buyer: Option<BuyerSnapshot> = match &self.buyer_json {
            Some(json) => Some(serde_json::from_str(json)?),
            None => None,
        };

        Ok(Receipt {
            id: self.id,
            device_id: self.device_id,
            fiscal_day_no: self.fiscal_day_no,
            receipt_global_no: self.receipt_global_no,
            receipt_counter: self.receipt_counter,
            document_type: self.document_type,
            invoice_no: self.invoice_no,
            supplier_tin: self.supplier_tin,
            currency: self.currency,
            receipt_date: self.receipt_date,
            lines,
            taxes,
            buyer,
            total: Money::from_cents(self.total_cents),
            previous_receipt_hash: self.previous_receipt_hash,
            canonical_string: self.canonical_string,
            receipt_hash: self.receipt_hash,
            device_signature: self.device_signature,
            gateway_signature: self.gateway_signature,
            gateway_receipt_id: self.gateway_receipt_id,
            operation_id: self.operation_id,
            original_invoice_no: self.original_invoice_no,
            original_receipt_global_no: self.original_receipt_global_no,
            reason: self.reason,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Repository for receipt database operations.
#[derive(Debug, Clone)]
pub struct ReceiptRepository {
    pool: SqlitePool,
}

impl ReceiptRepository {
    /// Creates a new ReceiptRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ReceiptRepository { pool }
    }

    /// Inserts a receipt row using the given executor.
    ///
    /// Exposed to the chain manager so allocation and insertion share one
    /// transaction; the UNIQUE indexes on (device, global number) and on
    /// (supplier, invoice number, document type) fire here.
    pub(crate) async fn insert_with<'e, E>(executor: E, receipt: &Receipt) -> DbResult<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        debug!(
            device_id = receipt.device_id,
            global_no = receipt.receipt_global_no,
            invoice_no = %receipt.invoice_no,
            "Inserting receipt"
        );

        let lines_json = serde_json::to_string(&receipt.lines)?;
        let taxes_json = serde_json::to_string(&receipt.taxes)?;
        let buyer_json = receipt
            .buyer
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO receipts (
                id, device_id, fiscal_day_no, receipt_global_no, receipt_counter,
                document_type, invoice_no, supplier_tin, currency, receipt_date,
                lines_json, taxes_json, buyer_json, total_cents,
                previous_receipt_hash, canonical_string, receipt_hash, device_signature,
                gateway_signature, gateway_receipt_id, operation_id,
                original_invoice_no, original_receipt_global_no, reason,
                status, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18,
                ?19, ?20, ?21,
                ?22, ?23, ?24,
                ?25, ?26, ?27
            )
            "#,
        )
        .bind(&receipt.id)
        .bind(receipt.device_id)
        .bind(receipt.fiscal_day_no)
        .bind(receipt.receipt_global_no)
        .bind(receipt.receipt_counter)
        .bind(receipt.document_type)
        .bind(&receipt.invoice_no)
        .bind(&receipt.supplier_tin)
        .bind(&receipt.currency)
        .bind(receipt.receipt_date)
        .bind(lines_json)
        .bind(taxes_json)
        .bind(buyer_json)
        .bind(receipt.total.cents())
        .bind(&receipt.previous_receipt_hash)
        .bind(&receipt.canonical_string)
        .bind(&receipt.receipt_hash)
        .bind(&receipt.device_signature)
        .bind(&receipt.gateway_signature)
        .bind(receipt.gateway_receipt_id)
        .bind(&receipt.operation_id)
        .bind(&receipt.original_invoice_no)
        .bind(receipt.original_receipt_global_no)
        .bind(&receipt.reason)
        .bind(receipt.status)
        .bind(receipt.created_at)
        .bind(receipt.updated_at)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Gets a receipt by row id.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Receipt>> {
        let row: Option<ReceiptRow> = sqlx::query_as("SELECT * FROM receipts WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ReceiptRow::into_receipt).transpose()
    }

    /// Gets a receipt by its chain position.
    pub async fn get_by_global_no(
        &self,
        device_id: i64,
        receipt_global_no: i64,
    ) -> DbResult<Option<Receipt>> {
        let row: Option<ReceiptRow> = sqlx::query_as(
            "SELECT * FROM receipts WHERE device_id = ?1 AND receipt_global_no = ?2",
        )
        .bind(device_id)
        .bind(receipt_global_no)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ReceiptRow::into_receipt).transpose()
    }

    /// Latest receipt of a fiscal day (the chain predecessor for the next
    /// receipt in that day).
    pub async fn last_in_day(
        &self,
        device_id: i64,
        fiscal_day_no: i64,
    ) -> DbResult<Option<Receipt>> {
        let row: Option<ReceiptRow> = sqlx::query_as(
            r#"
            SELECT * FROM receipts
            WHERE device_id = ?1 AND fiscal_day_no = ?2
            ORDER BY receipt_counter DESC
            LIMIT 1
            "#,
        )
        .bind(device_id)
        .bind(fiscal_day_no)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ReceiptRow::into_receipt).transpose()
    }

    /// Moves a receipt to a new lifecycle status.
    ///
    /// Submitted receipts are immutable: the guarded UPDATE refuses to
    /// touch them and the caller gets a StateConflict.
    pub async fn set_status(&self, id: &str, status: ReceiptStatus) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE receipts SET status = ?2, updated_at = ?3
            WHERE id = ?1 AND status != 'submitted'
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::state_conflict(
                "Receipt",
                format!("{id} is missing or already submitted (immutable)"),
            ));
        }
        Ok(())
    }

    /// Records the gateway operation id on a failed submission, for error
    /// reports and audit.
    pub async fn record_failure(&self, id: &str, operation_id: Option<&str>) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE receipts SET
                status = 'failed',
                operation_id = COALESCE(?2, operation_id),
                updated_at = ?3
            WHERE id = ?1 AND status != 'submitted'
            "#,
        )
        .bind(id)
        .bind(operation_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::state_conflict(
                "Receipt",
                format!("{id} is missing or already submitted (immutable)"),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
