//! # Duplicate Guard
//!
//! Enforces one fiscal document per (supplier, external invoice number,
//! document type).
//!
//! ## Two Checkpoints
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Duplicate Guard                                    │
//! │                                                                         │
//! │  1. FAST-FAIL (data entry)                                             │
//! │     check_unique() ──► SELECT EXISTS ... ──► DuplicateError            │
//! │     Cheap, catches the common case early, but racy on its own.         │
//! │                                                                         │
//! │  2. AUTHORITATIVE (submission)                                         │
//! │     The UNIQUE index on (supplier_tin, invoice_no, document_type)      │
//! │     fires inside the chain manager's insert transaction and closes     │
//! │     the race for good.                                                 │
//! │                                                                         │
//! │  A rejected caller issues a correction document (credit/debit note     │
//! │  with its OWN number); the engine never overwrites the original.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::SqlitePool;
use tracing::warn;

use crate::error::{DbError, DbResult};
use sable_core::DocumentType;

/// Storage-backed uniqueness check for the fiscal document triple.
#[derive(Debug, Clone)]
pub struct DuplicateGuard {
    pool: SqlitePool,
}

impl DuplicateGuard {
    /// Creates a new DuplicateGuard.
    pub fn new(pool: SqlitePool) -> Self {
        DuplicateGuard { pool }
    }

    /// Fast-fail uniqueness check at data-entry time.
    ///
    /// Returns `UniqueViolation` when a document with the same
    /// (supplier TIN, external invoice number, document type) already
    /// exists. The transactional re-check at insert time remains the
    /// authority.
    pub async fn check_unique(
        &self,
        supplier_tin: &str,
        invoice_no: &str,
        document_type: DocumentType,
    ) -> DbResult<()> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM receipts
                WHERE supplier_tin = ?1 AND invoice_no = ?2 AND document_type = ?3
            )
            "#,
        )
        .bind(supplier_tin)
        .bind(invoice_no)
        .bind(document_type)
        .fetch_one(&self.pool)
        .await?;

        if exists {
            warn!(
                supplier_tin,
                invoice_no,
                document_type = %document_type,
                "Duplicate fiscal document rejected"
            );
            return Err(DbError::duplicate(
                "(supplier_tin, invoice_no, document_type)",
                format!("{supplier_tin}/{invoice_no}/{document_type}"),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::receipt::ReceiptRepository;
    use crate::testutil;

    #[tokio::test]
    async fn test_fast_fail_check() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        testutil::seed_device(&db, 321).await;
        let guard = db.guard();

        guard
            .check_unique("1234567890", "INV-2026-1", DocumentType::SaleInvoice)
            .await
            .unwrap();

        let receipt = testutil::sample_receipt(321, 1, 1, 1, "INV-2026-1");
        ReceiptRepository::insert_with(db.pool(), &receipt)
            .await
            .unwrap();

        let err = guard
            .check_unique("1234567890", "INV-2026-1", DocumentType::SaleInvoice)
            .await
            .unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn test_same_number_different_type_allowed() {
        // The triple includes the document type: a credit note may carry
        // a number that collides with an invoice number space only when
        // the full triple matches.
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        testutil::seed_device(&db, 321).await;

        let receipt = testutil::sample_receipt(321, 1, 1, 1, "DOC-77");
        ReceiptRepository::insert_with(db.pool(), &receipt)
            .await
            .unwrap();

        db.guard()
            .check_unique("1234567890", "DOC-77", DocumentType::CreditNote)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_supplier_allowed() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        testutil::seed_device(&db, 321).await;

        let receipt = testutil::sample_receipt(321, 1, 1, 1, "INV-2026-1");
        ReceiptRepository::insert_with(db.pool(), &receipt)
            .await
            .unwrap();

        db.guard()
            .check_unique("0987654321", "INV-2026-1", DocumentType::SaleInvoice)
            .await
            .unwrap();
    }
}
