//! # Domain Types
//!
//! Core domain types used throughout the Sable fiscal engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  FiscalDevice   │   │   FiscalDay     │   │    Receipt      │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  device_id      │   │  fiscal_day_no  │   │  global_no      │       │
//! │  │  taxpayer_tin   │   │  status         │   │  document_type  │       │
//! │  │  last_global_no │   │  opened_at      │   │  lines/buckets  │       │
//! │  └─────────────────┘   └─────────────────┘   │  hash/signature │       │
//! │                                              └─────────────────┘       │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  DocumentType   │   │   TaxBucket     │   │ OfflineQueue-   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │ Entry           │       │
//! │  │  SaleInvoice    │   │  (code, pct)    │   │  ─────────────  │       │
//! │  │  SaleReceipt    │   │  net/tax/gross  │   │  state          │       │
//! │  │  CreditNote     │   └─────────────────┘   │  attempts       │       │
//! │  │  DebitNote      │                         └─────────────────┘       │
//! │  └─────────────────┘                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual Numbering
//! Every receipt carries two numbers:
//! - `receipt_global_no`: monotonic per device, the chain position
//! - `receipt_counter`: 1-based within the fiscal day (1 = no previous hash)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::money::Money;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// 1 basis point = 0.01%, so 1550 bps = 15.50%. Integer bps keep the rate
/// exact through tax math and let the canonical builder render the
/// two-decimal form without ever touching floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Zero tax rate (exempt).
    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    /// Checks if the rate is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Renders the rate with exactly two decimal places, the form the
    /// canonical string requires: 1500 -> "15.00", 1550 -> "15.50".
    pub fn percent_2dp(&self) -> String {
        format!("{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

// =============================================================================
// Document Type
// =============================================================================

/// The fiscal document type of a receipt.
///
/// ## Sign Policy
/// ```text
/// SaleInvoice  ──► positive amounts   (formal tax invoice, buyer known)
/// SaleReceipt  ──► positive amounts   (retail receipt, anonymous buyer)
/// DebitNote    ──► positive amounts   (upward correction of an invoice)
/// CreditNote   ──► NEGATIVE amounts   (downward correction of an invoice)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    /// Formal tax invoice issued to an identified buyer.
    SaleInvoice,
    /// Retail receipt without buyer identification.
    SaleReceipt,
    /// Downward correction referencing an original sale invoice.
    CreditNote,
    /// Upward correction referencing an original sale invoice.
    DebitNote,
}

impl DocumentType {
    /// The token used for this type inside the canonical string and the
    /// gateway payload.
    pub const fn canonical_code(&self) -> &'static str {
        match self {
            DocumentType::SaleInvoice => "FISCALINVOICE",
            DocumentType::SaleReceipt => "FISCALRECEIPT",
            DocumentType::CreditNote => "CREDITNOTE",
            DocumentType::DebitNote => "DEBITNOTE",
        }
    }

    /// Prefix for generated external document numbers (INV-2026-7).
    pub const fn sequence_prefix(&self) -> &'static str {
        match self {
            DocumentType::SaleInvoice => "INV",
            DocumentType::SaleReceipt => "RCT",
            DocumentType::CreditNote => "CN",
            DocumentType::DebitNote => "DN",
        }
    }

    /// True for the one type whose amounts are negated.
    pub const fn is_credit(&self) -> bool {
        matches!(self, DocumentType::CreditNote)
    }

    /// True for correction documents, which must reference an original
    /// sale and carry their own external number.
    pub const fn is_correction(&self) -> bool {
        matches!(self, DocumentType::CreditNote | DocumentType::DebitNote)
    }

    /// Derives the sale document type server-side.
    ///
    /// The data-entry layer never chooses the type directly: it states an
    /// "issue formal invoice" intent, and the type follows from that
    /// intent plus buyer-data presence. An invoice without a buyer is
    /// rejected rather than silently downgraded.
    pub fn for_sale(
        issue_formal_invoice: bool,
        has_buyer: bool,
    ) -> Result<Self, ValidationError> {
        if issue_formal_invoice {
            if has_buyer {
                Ok(DocumentType::SaleInvoice)
            } else {
                Err(ValidationError::InvoiceRequiresBuyer)
            }
        } else {
            Ok(DocumentType::SaleReceipt)
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.canonical_code())
    }
}

// =============================================================================
// Lifecycle Statuses
// =============================================================================

/// The lifecycle status of a receipt.
///
/// A receipt is immutable once `Submitted`: corrections require a new,
/// linked CreditNote or DebitNote, never an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    /// Canonicalized and signed, not yet handed to the gateway.
    Built,
    /// Waiting in the offline queue.
    Queued,
    /// Submission in flight. Never canceled mid-flight; ambiguous
    /// outcomes are resolved against the gateway's authoritative status.
    Submitting,
    /// Confirmed by the gateway. Terminal and immutable.
    Submitted,
    /// Submission failed; pending retry or manual review.
    Failed,
}

/// The status of a fiscal day.
///
/// Transitions are strictly linear and device-scoped:
/// `Open -> CloseInitiated -> Closed | CloseFailed`. CloseFailed requires
/// manual intervention; the engine never retries the close itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum FiscalDayStatus {
    Open,
    CloseInitiated,
    Closed,
    CloseFailed,
}

impl FiscalDayStatus {
    /// Whether a transition from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: FiscalDayStatus) -> bool {
        use FiscalDayStatus::*;
        matches!(
            (self, next),
            (Open, CloseInitiated) | (CloseInitiated, Closed) | (CloseInitiated, CloseFailed)
        )
    }
}

impl std::fmt::Display for FiscalDayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FiscalDayStatus::Open => "open",
            FiscalDayStatus::CloseInitiated => "close_initiated",
            FiscalDayStatus::Closed => "closed",
            FiscalDayStatus::CloseFailed => "close_failed",
        };
        f.write_str(s)
    }
}

/// The state of an offline queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Queued,
    Submitting,
    Submitted,
    Failed,
}

// =============================================================================
// Receipt Components
// =============================================================================

/// A single receipt line.
///
/// Quantity is in thousandths (1500 = 1.5); amounts are integer cents.
/// Invariant: `line_total = round(quantity × unit_price / 1000)` within
/// ±1 cent ([`crate::validation::LINE_TOTAL_TOLERANCE_CENTS`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    /// 1-based position within the receipt.
    pub line_no: u32,

    /// Description shown on the printed document.
    pub description: String,

    /// Quantity in thousandths of a unit.
    pub quantity_milli: i64,

    /// Unit price in cents. Negative on credit notes.
    pub unit_price: Money,

    /// Line total in cents. Negative on credit notes.
    pub line_total: Money,

    /// Tax code as configured with the authority (e.g. "A", "VAT15").
    pub tax_code: String,

    /// Tax rate in basis points.
    pub tax_percent: TaxRate,

    /// Harmonized System code, 4 or 8 characters.
    pub hs_code: String,
}

/// An aggregation of line amounts sharing a (tax code, tax percent) key.
///
/// Buckets keep the order in which their key was first encountered while
/// scanning lines; that order is part of the signed canonical string.
/// Invariant: `sum(bucket.gross) == receipt.total`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxBucket {
    pub tax_code: String,
    pub tax_percent: TaxRate,

    /// Accumulated net amount in cents.
    pub net: Money,

    /// Tax amount in cents, computed once from the bucket net.
    pub tax: Money,

    /// Sales amount with tax: `net + tax`.
    pub gross: Money,
}

/// Buyer data attached to formal invoices.
///
/// Stored with the receipt for the printed document and reports, but
/// NEVER part of the canonical string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerSnapshot {
    pub name: String,
    pub tin: String,
    pub vat_number: Option<String>,
    pub address: Option<String>,
}

/// Device hash + signature pair over a canonical string, Base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSignature {
    /// Base64 of SHA-256 over the canonical string.
    pub hash: String,
    /// Base64 of the Ed25519 signature over the canonical bytes.
    pub signature: String,
}

// =============================================================================
// Receipt Draft (pipeline input)
// =============================================================================

/// A line as supplied by the data-entry layer, before totals are
/// computed server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftLine {
    pub description: String,
    pub quantity_milli: i64,
    pub unit_price: Money,
    pub tax_code: String,
    pub tax_percent: TaxRate,
    pub hs_code: String,
}

/// What kind of document the draft produces.
///
/// Sale types are derived server-side from intent + buyer presence;
/// corrections name their type and original document explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DraftKind {
    /// A sale. The document type follows from `issue_formal_invoice`
    /// plus buyer presence - see [`DocumentType::for_sale`].
    Sale { issue_formal_invoice: bool },

    /// A correction of a previously submitted sale invoice.
    Correction {
        document_type: DocumentType,
        original_invoice_no: String,
        original_receipt_global_no: i64,
        reason: String,
    },
}

/// Input to the fiscalisation pipeline.
///
/// The draft carries raw, unsigned amounts; the pipeline computes totals,
/// applies the sign rule, validates, allocates the chain position, builds
/// the canonical string, and signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptDraft {
    pub device_id: i64,
    pub currency: String,

    /// External document number. Generated from the per-year sequence
    /// when absent.
    pub invoice_no: Option<String>,

    pub lines: Vec<DraftLine>,
    pub buyer: Option<BuyerSnapshot>,

    /// Total as declared by the caller, cross-checked against the
    /// computed total. Mismatch is a rejection, never a correction.
    pub expected_total: Option<Money>,

    /// Receipt timestamp; the pipeline stamps `Utc::now()` when absent.
    pub receipt_date: Option<DateTime<Utc>>,

    pub kind: DraftKind,
}

impl ReceiptDraft {
    /// Resolves the concrete document type for this draft.
    pub fn document_type(&self) -> Result<DocumentType, ValidationError> {
        match &self.kind {
            DraftKind::Sale {
                issue_formal_invoice,
            } => DocumentType::for_sale(*issue_formal_invoice, self.buyer.is_some()),
            DraftKind::Correction { document_type, .. } => Ok(*document_type),
        }
    }
}

// =============================================================================
// Receipt Entity
// =============================================================================

/// The atomic fiscal unit: a canonicalized, signed, chained receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// Row id (UUID v4).
    pub id: String,

    pub device_id: i64,
    pub fiscal_day_no: i64,

    /// Monotonic per-device chain position.
    pub receipt_global_no: i64,

    /// 1-based position within the fiscal day.
    pub receipt_counter: i64,

    pub document_type: DocumentType,

    /// External document number (duplicate-guard key component).
    pub invoice_no: String,

    /// Supplier TIN (duplicate-guard key component).
    pub supplier_tin: String,

    pub currency: String,
    pub receipt_date: DateTime<Utc>,

    pub lines: Vec<ReceiptLine>,
    pub taxes: Vec<TaxBucket>,
    pub buyer: Option<BuyerSnapshot>,

    /// Receipt total in cents. Negative for credit notes.
    pub total: Money,

    /// Device hash of the immediately preceding receipt in this fiscal
    /// day. None only when `receipt_counter == 1`.
    pub previous_receipt_hash: Option<String>,

    pub canonical_string: String,

    /// Base64 SHA-256 of the canonical string. The next receipt in the
    /// chain embeds this value verbatim.
    pub receipt_hash: String,

    /// Base64 Ed25519 device signature over the canonical bytes.
    pub device_signature: String,

    /// Gateway counter-signature, present once confirmed.
    pub gateway_signature: Option<String>,
    pub gateway_receipt_id: Option<i64>,

    /// Gateway operation identifier, carried in error reports and audit.
    pub operation_id: Option<String>,

    /// Correction linkage (credit/debit notes only).
    pub original_invoice_no: Option<String>,
    pub original_receipt_global_no: Option<i64>,
    pub reason: Option<String>,

    pub status: ReceiptStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Receipt {
    /// Distinct tax codes used by this receipt, in line order.
    pub fn tax_codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = Vec::new();
        for line in &self.lines {
            if !codes.contains(&line.tax_code.as_str()) {
                codes.push(line.tax_code.as_str());
            }
        }
        codes
    }

    /// True once the gateway has confirmed this receipt.
    pub fn is_confirmed(&self) -> bool {
        self.status == ReceiptStatus::Submitted
    }
}

// =============================================================================
// Fiscal Device
// =============================================================================

/// A signing endpoint registered with the tax authority.
///
/// Never deleted; `is_active = false` deactivates it. The durable
/// `last_receipt_global_no` counter is mutated only by the chain manager
/// after a confirmed submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiscalDevice {
    pub device_id: i64,
    pub serial_no: String,
    pub taxpayer_name: String,
    pub taxpayer_tin: String,
    pub vat_number: Option<String>,
    pub is_vat_registered: bool,

    /// Certificate validity window, maintained by the registration
    /// collaborator.
    pub cert_valid_from: Option<DateTime<Utc>>,
    pub cert_valid_until: Option<DateTime<Utc>>,

    /// Ed25519 signing seed (32 bytes). Never logged or serialized.
    #[serde(skip_serializing, default)]
    pub signing_seed: Option<Vec<u8>>,

    pub last_fiscal_day_no: Option<i64>,

    /// Last CONFIRMED receipt number.
    pub last_receipt_global_no: i64,

    pub is_active: bool,

    /// Set on fatal auth/certificate gateway errors; cleared only by
    /// re-registration.
    pub submissions_locked: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FiscalDevice {
    /// Whether the certificate window covers the given instant. Devices
    /// without a recorded window are treated as not yet registered.
    pub fn certificate_valid_at(&self, at: DateTime<Utc>) -> bool {
        match (self.cert_valid_from, self.cert_valid_until) {
            (Some(from), Some(until)) => from <= at && at <= until,
            _ => false,
        }
    }
}

// =============================================================================
// Fiscal Day
// =============================================================================

/// A per-device accounting period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiscalDay {
    pub id: String,
    pub device_id: i64,
    pub fiscal_day_no: i64,
    pub status: FiscalDayStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closing_error: Option<String>,
}

// =============================================================================
// Offline Queue Entry
// =============================================================================

/// A receipt awaiting submission, ordered by its allocated global number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineQueueEntry {
    pub id: String,
    pub receipt_id: String,
    pub device_id: i64,
    pub receipt_global_no: i64,
    pub state: QueueState,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub needs_review: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_formatting() {
        assert_eq!(TaxRate::from_bps(1500).percent_2dp(), "15.00");
        assert_eq!(TaxRate::from_bps(1550).percent_2dp(), "15.50");
        assert_eq!(TaxRate::from_bps(5).percent_2dp(), "0.05");
        assert_eq!(TaxRate::zero().percent_2dp(), "0.00");
    }

    #[test]
    fn test_document_type_codes() {
        assert_eq!(DocumentType::SaleInvoice.canonical_code(), "FISCALINVOICE");
        assert_eq!(DocumentType::SaleReceipt.canonical_code(), "FISCALRECEIPT");
        assert_eq!(DocumentType::CreditNote.canonical_code(), "CREDITNOTE");
        assert_eq!(DocumentType::DebitNote.canonical_code(), "DEBITNOTE");
    }

    #[test]
    fn test_sale_type_resolution() {
        assert_eq!(
            DocumentType::for_sale(true, true).unwrap(),
            DocumentType::SaleInvoice
        );
        assert_eq!(
            DocumentType::for_sale(false, true).unwrap(),
            DocumentType::SaleReceipt
        );
        assert_eq!(
            DocumentType::for_sale(false, false).unwrap(),
            DocumentType::SaleReceipt
        );
        assert!(matches!(
            DocumentType::for_sale(true, false),
            Err(ValidationError::InvoiceRequiresBuyer)
        ));
    }

    #[test]
    fn test_sign_policy_flags() {
        assert!(DocumentType::CreditNote.is_credit());
        assert!(!DocumentType::DebitNote.is_credit());
        assert!(DocumentType::CreditNote.is_correction());
        assert!(DocumentType::DebitNote.is_correction());
        assert!(!DocumentType::SaleInvoice.is_correction());
    }

    #[test]
    fn test_day_status_transitions() {
        use FiscalDayStatus::*;
        assert!(Open.can_transition_to(CloseInitiated));
        assert!(CloseInitiated.can_transition_to(Closed));
        assert!(CloseInitiated.can_transition_to(CloseFailed));
        // no automatic path out of CloseFailed
        assert!(!CloseFailed.can_transition_to(CloseInitiated));
        assert!(!CloseFailed.can_transition_to(Closed));
        assert!(!Open.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Open));
    }

    #[test]
    fn test_certificate_window() {
        use chrono::TimeZone;
        let mut device = FiscalDevice {
            device_id: 321,
            serial_no: "SN-1".into(),
            taxpayer_name: "Acme".into(),
            taxpayer_tin: "1234567890".into(),
            vat_number: None,
            is_vat_registered: false,
            cert_valid_from: None,
            cert_valid_until: None,
            signing_seed: None,
            last_fiscal_day_no: None,
            last_receipt_global_no: 0,
            is_active: true,
            submissions_locked: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let at = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        assert!(!device.certificate_valid_at(at));

        device.cert_valid_from = Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        device.cert_valid_until = Some(Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
        assert!(device.certificate_valid_at(at));
        assert!(!device.certificate_valid_at(Utc.with_ymd_and_hms(2027, 2, 1, 0, 0, 0).unwrap()));
    }
}
