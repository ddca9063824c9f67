//! # Error Types
//!
//! Domain-specific error types for sable-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  sable-core errors (this file)                                         │
//! │  ├── CoreError        - General domain errors                          │
//! │  ├── ValidationError  - Pre-signing receipt validation failures        │
//! │  └── CryptoError      - Key/signature failures (crypto module)         │
//! │                                                                         │
//! │  sable-db errors (separate crate)                                      │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  sable-sync errors (separate crate)                                    │
//! │  └── SyncError        - Gateway, queue, and ordering failures          │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → caller                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Validation failures are always rejections: nothing in this crate
//! auto-corrects a receipt. Every message is suitable for an end user.

use thiserror::Error;

use crate::crypto::CryptoError;

// =============================================================================
// Core Error
// =============================================================================

/// Core fiscal logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Receipt validation failed before signing.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Key material or signature handling failed.
    #[error("Signature error: {0}")]
    Crypto(#[from] CryptoError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Pre-signing validation failures.
///
/// Raised before any canonical string is built or any signature is
/// generated. A validation failure always rejects the receipt; the caller
/// must fix the input and rebuild.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Receipt has no lines.
    #[error("Receipt must contain at least one line")]
    EmptyLines,

    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Line quantity must be strictly positive (sign policy is applied to
    /// amounts, never encoded in the quantity).
    #[error("Line {line_no}: quantity must be positive")]
    NonPositiveQuantity { line_no: u32 },

    /// Line total drifted from quantity × unit price beyond the rounding
    /// tolerance.
    #[error(
        "Line {line_no}: total {actual} does not match quantity × unit price = {expected}"
    )]
    LineTotalMismatch {
        line_no: u32,
        expected: i64,
        actual: i64,
    },

    /// HS code must be 4 or 8 characters.
    #[error("Line {line_no}: HS code must be 4 or 8 characters (got {len})")]
    InvalidHsCode { line_no: u32, len: usize },

    /// Taxed line on a device that is not VAT registered.
    #[error("VAT not allowed for non-VAT taxpayer (line {line_no}, {percent}%)")]
    VatNotAllowed { line_no: u32, percent: String },

    /// Sum of bucket gross amounts does not reconcile with the receipt
    /// total. Never silently corrected.
    #[error("Tax buckets do not reconcile: sum(gross) = {bucket_sum} but receipt total = {total}")]
    BucketTotalMismatch { bucket_sum: i64, total: i64 },

    /// Caller-declared total does not match the computed total.
    #[error("Declared total {declared} does not match computed total {computed}")]
    DeclaredTotalMismatch { declared: i64, computed: i64 },

    /// A formal invoice was requested without buyer data.
    #[error("A fiscal invoice requires buyer data")]
    InvoiceRequiresBuyer,

    /// Correction document is missing its reference to the original sale.
    #[error("{document_type} requires a reference to the original sale document")]
    MissingOriginalReference { document_type: String },

    /// Correction document reused the original's external number.
    #[error(
        "Correction must carry its own external number; '{invoice_no}' is the original document's number"
    )]
    ReusedExternalNumber { invoice_no: String },

    /// Referenced original document is not a sale that can be corrected.
    #[error("{document_type} can only reference a fiscal sale invoice")]
    InvalidOriginalDocument { document_type: String },

    /// Correction currency differs from the original document.
    #[error("Currency {currency} does not match original document currency {original_currency}")]
    CurrencyMismatch {
        currency: String,
        original_currency: String,
    },

    /// Original document is outside the correction window.
    #[error("Cannot correct a document older than {months} months")]
    OriginalTooOld { months: u32 },

    /// Correction introduced tax codes absent from the original document.
    #[error("Correction cannot introduce new tax codes: {codes}")]
    NewTaxCodes { codes: String },

    /// Device is deactivated.
    #[error("Device {device_id} is deactivated")]
    DeviceInactive { device_id: i64 },

    /// Device submissions are locked pending re-registration.
    #[error("Device {device_id} submissions are locked pending re-registration")]
    DeviceLocked { device_id: i64 },

    /// Device certificate is outside its validity window.
    #[error("Device {device_id} certificate is not valid at {at}")]
    CertificateNotValid { device_id: i64, at: String },

    /// Receipts may only be created while the fiscal day is open.
    #[error("Fiscal day {fiscal_day_no} is {status}; receipts require an open day")]
    DayNotOpen {
        fiscal_day_no: i64,
        status: String,
    },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ValidationError::LineTotalMismatch {
            line_no: 3,
            expected: 897,
            actual: 900,
        };
        assert_eq!(
            err.to_string(),
            "Line 3: total 900 does not match quantity × unit price = 897"
        );
    }

    #[test]
    fn test_vat_gate_message() {
        let err = ValidationError::VatNotAllowed {
            line_no: 1,
            percent: "15.50".to_string(),
        };
        assert!(err.to_string().starts_with("VAT not allowed for non-VAT taxpayer"));
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::EmptyLines;
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
