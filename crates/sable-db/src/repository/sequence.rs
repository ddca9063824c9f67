//! # Document Number Sequences
//!
//! Per-year external document numbers: `INV-2026-7`, `CN-2026-3`,
//! `DN-2026-1`. Used when the data-entry layer does not supply its own
//! external invoice number.
//!
//! The increment is a single UPSERT with RETURNING, so concurrent callers
//! serialize on the row and never observe the same number.

use chrono::{Datelike, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use sable_core::DocumentType;

/// Repository for document number sequences.
#[derive(Debug, Clone)]
pub struct SequenceRepository {
    pool: SqlitePool,
}

impl SequenceRepository {
    /// Creates a new SequenceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SequenceRepository { pool }
    }

    /// Returns the next formatted document number for the current year.
    pub async fn next_number(&self, document_type: DocumentType) -> DbResult<String> {
        self.next_number_for_year(document_type, Utc::now().year())
            .await
    }

    /// Returns the next formatted document number for a specific year.
    pub async fn next_number_for_year(
        &self,
        document_type: DocumentType,
        year: i32,
    ) -> DbResult<String> {
        let next: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO document_sequences (year, document_type, last_number)
            VALUES (?1, ?2, 1)
            ON CONFLICT(year, document_type)
                DO UPDATE SET last_number = last_number + 1
            RETURNING last_number
            "#,
        )
        .bind(year)
        .bind(document_type)
        .fetch_one(&self.pool)
        .await?;

        let number = format!("{}-{}-{}", document_type.sequence_prefix(), year, next);
        debug!(document_type = %document_type, %number, "Allocated document number");
        Ok(number)
    }

    /// Formats a document number without advancing the sequence.
    pub fn format_number(document_type: DocumentType, year: i32, sequence: i64) -> String {
        format!("{}-{}-{}", document_type.sequence_prefix(), year, sequence)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_sequences_increment_per_type() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let sequences = db.sequences();

        assert_eq!(
            sequences
                .next_number_for_year(DocumentType::SaleInvoice, 2026)
                .await
                .unwrap(),
            "INV-2026-1"
        );
        assert_eq!(
            sequences
                .next_number_for_year(DocumentType::SaleInvoice, 2026)
                .await
                .unwrap(),
            "INV-2026-2"
        );
        // other document types have their own counters
        assert_eq!(
            sequences
                .next_number_for_year(DocumentType::CreditNote, 2026)
                .await
                .unwrap(),
            "CN-2026-1"
        );
        assert_eq!(
            sequences
                .next_number_for_year(DocumentType::DebitNote, 2026)
                .await
                .unwrap(),
            "DN-2026-1"
        );
    }

    #[tokio::test]
    async fn test_sequences_reset_per_year() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let sequences = db.sequences();

        sequences
            .next_number_for_year(DocumentType::SaleInvoice, 2026)
            .await
            .unwrap();
        assert_eq!(
            sequences
                .next_number_for_year(DocumentType::SaleInvoice, 2027)
                .await
                .unwrap(),
            "INV-2027-1"
        );
    }

    #[tokio::test]
    async fn test_concurrent_allocation_distinct_numbers() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let sequences = db.sequences();
            handles.push(tokio::spawn(async move {
                sequences
                    .next_number_for_year(DocumentType::SaleInvoice, 2026)
                    .await
                    .unwrap()
            }));
        }

        let mut numbers = Vec::new();
        for handle in handles {
            numbers.push(handle.await.unwrap());
        }
        numbers.sort();
        numbers.dedup();
        assert_eq!(numbers.len(), 10);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(
            SequenceRepository::format_number(DocumentType::SaleReceipt, 2026, 5),
            "RCT-2026-5"
        );
    }
}
