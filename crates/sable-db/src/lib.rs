//! # sable-db: Durable Store for the Sable Fiscal Engine
//!
//! SQLite persistence for devices, fiscal days, receipts, the offline
//! queue, document sequences, and the audit trail.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         sable-db                                        │
//! │                                                                         │
//! │  sable-sync (pipeline/replay)                                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database ──► DeviceRepository      device registry + locks            │
//! │           ──► FiscalDayRepository   linear day transitions             │
//! │           ──► ReceiptRepository     receipt rows (JSON snapshots)      │
//! │           ──► ChainManager          exclusive allocation + confirm     │
//! │           ──► DuplicateGuard        (supplier, number, type) triple    │
//! │           ──► OfflineQueueRepository  append-only replay queue         │
//! │           ──► SequenceRepository    INV-yyyy-N numbers                 │
//! │           ──► AuditLog              immutable event trail              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL, foreign keys, embedded migrations)                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The chain manager and the queue are the only writers of shared mutable
//! state; both go through transactions scoped to a single device row, so
//! no in-memory counter ever has to be trusted across restarts.

pub mod audit;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

pub use audit::{actions, AuditEvent, AuditLog};
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use repository::chain::{Allocation, ChainManager};
pub use repository::device::DeviceRepository;
pub use repository::fiscal_day::FiscalDayRepository;
pub use repository::guard::DuplicateGuard;
pub use repository::queue::OfflineQueueRepository;
pub use repository::receipt::ReceiptRepository;
pub use repository::sequence::SequenceRepository;

#[cfg(test)]
pub(crate) mod testutil {
    //! Shared fixtures for repository tests.

    use chrono::Utc;
    use sable_core::{
        DocumentType, FiscalDevice, Money, Receipt, ReceiptLine, ReceiptStatus, TaxBucket, TaxRate,
    };
    use uuid::Uuid;

    use crate::pool::Database;

    /// Registers a minimal active device.
    pub async fn seed_device(db: &Database, device_id: i64) {
        let now = Utc::now();
        db.devices()
            .register(&FiscalDevice {
                device_id,
                serial_no: format!("SN-{device_id}"),
                taxpayer_name: "Acme Trading".into(),
                taxpayer_tin: "1234567890".into(),
                vat_number: Some("220001122".into()),
                is_vat_registered: true,
                cert_valid_from: Some(now - chrono::Duration::days(1)),
                cert_valid_until: Some(now + chrono::Duration::days(364)),
                signing_seed: Some(vec![7u8; 32]),
                last_fiscal_day_no: None,
                last_receipt_global_no: 0,
                is_active: true,
                submissions_locked: false,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    /// A built receipt with one 15%-taxed line totalling 11.50.
    pub fn sample_receipt(
        device_id: i64,
        fiscal_day_no: i64,
        receipt_global_no: i64,
        receipt_counter: i64,
        invoice_no: &str,
    ) -> Receipt {
        let now = Utc::now();
        Receipt {
            id: Uuid::new_v4().to_string(),
            device_id,
            fiscal_day_no,
            receipt_global_no,
            receipt_counter,
            document_type: DocumentType::SaleInvoice,
            invoice_no: invoice_no.to_string(),
            supplier_tin: "1234567890".into(),
            currency: "USD".into(),
            receipt_date: now,
            lines: vec![ReceiptLine {
                line_no: 1,
                description: "Widget".into(),
                quantity_milli: 1000,
                unit_price: Money::from_cents(1000),
                line_total: Money::from_cents(1000),
                tax_code: "A".into(),
                tax_percent: TaxRate::from_bps(1500),
                hs_code: "1122".into(),
            }],
            taxes: vec![TaxBucket {
                tax_code: "A".into(),
                tax_percent: TaxRate::from_bps(1500),
                net: Money::from_cents(1000),
                tax: Money::from_cents(150),
                gross: Money::from_cents(1150),
            }],
            buyer: None,
            total: Money::from_cents(1150),
            previous_receipt_hash: None,
            canonical_string: format!("canonical-{receipt_global_no}"),
            receipt_hash: format!("HASH-{receipt_global_no}"),
            device_signature: "DEVSIG".into(),
            gateway_signature: None,
            gateway_receipt_id: None,
            operation_id: None,
            original_invoice_no: None,
            original_receipt_global_no: None,
            reason: None,
            status: ReceiptStatus::Built,
            created_at: now,
            updated_at: now,
        }
    }
}
