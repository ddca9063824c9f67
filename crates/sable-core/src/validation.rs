//! # Receipt Validation
//!
//! Business rule validation that runs BEFORE any canonical string is
//! built or any signature is generated. Failures reject the receipt;
//! nothing here auto-corrects.
//!
//! ## Validation Order in the Pipeline
//! ```text
//! draft lines ──► build_lines()            line math, HS codes
//!      │
//!      ▼
//! validate_vat_registration()              VAT gate for non-VAT devices
//!      │
//!      ▼
//! validate_device() / validate_day()       device + day eligibility
//!      │
//!      ▼
//! validate_correction()                    credit/debit reference rules
//!      │
//!      ▼
//! tax::reconcile()                         Σ gross == total
//! ```

use chrono::{DateTime, Months, Utc};

use crate::error::ValidationError;
use crate::types::{
    DocumentType, DraftLine, FiscalDay, FiscalDayStatus, FiscalDevice, Receipt, ReceiptLine,
};

/// Allowed drift between a line's total and quantity × unit price, in
/// cents. Absorbs the single rounding step of the multiplication.
pub const LINE_TOTAL_TOLERANCE_CENTS: i64 = 1;

/// Corrections may only reference documents up to this age.
pub const CORRECTION_WINDOW_MONTHS: u32 = 12;

// =============================================================================
// Line Validation
// =============================================================================

/// Validates draft lines and computes their totals.
///
/// Quantity must be strictly positive (the sign policy lives in amounts,
/// never in quantities), descriptions and tax codes must be present, and
/// HS codes must be 4 or 8 characters. Line totals are computed here with
/// one rounding step, so they hold the line invariant by construction.
pub fn build_lines(draft_lines: &[DraftLine]) -> Result<Vec<ReceiptLine>, ValidationError> {
    if draft_lines.is_empty() {
        return Err(ValidationError::EmptyLines);
    }

    let mut lines = Vec::with_capacity(draft_lines.len());
    for (index, draft) in draft_lines.iter().enumerate() {
        let line_no = (index + 1) as u32;

        if draft.description.trim().is_empty() {
            return Err(ValidationError::Required {
                field: format!("line {line_no} description"),
            });
        }
        if draft.tax_code.trim().is_empty() {
            return Err(ValidationError::Required {
                field: format!("line {line_no} tax code"),
            });
        }
        if draft.quantity_milli <= 0 {
            return Err(ValidationError::NonPositiveQuantity { line_no });
        }
        let hs_len = draft.hs_code.trim().len();
        if hs_len != 4 && hs_len != 8 {
            return Err(ValidationError::InvalidHsCode {
                line_no,
                len: hs_len,
            });
        }

        lines.push(ReceiptLine {
            line_no,
            description: draft.description.clone(),
            quantity_milli: draft.quantity_milli,
            unit_price: draft.unit_price,
            line_total: draft.unit_price.mul_quantity_milli(draft.quantity_milli),
            tax_code: draft.tax_code.clone(),
            tax_percent: draft.tax_percent,
            hs_code: draft.hs_code.trim().to_string(),
        });
    }
    Ok(lines)
}

/// Re-checks the line invariant on already-built lines.
///
/// Used when lines arrive from storage or an upstream adapter instead of
/// [`build_lines`]: `line_total` must equal quantity × unit price within
/// [`LINE_TOTAL_TOLERANCE_CENTS`].
pub fn validate_line_totals(lines: &[ReceiptLine]) -> Result<(), ValidationError> {
    for line in lines {
        let expected = line.unit_price.mul_quantity_milli(line.quantity_milli);
        let drift = (line.line_total - expected).cents().abs();
        if drift > LINE_TOTAL_TOLERANCE_CENTS {
            return Err(ValidationError::LineTotalMismatch {
                line_no: line.line_no,
                expected: expected.cents(),
                actual: line.line_total.cents(),
            });
        }
    }
    Ok(())
}

// =============================================================================
// VAT Gate
// =============================================================================

/// Rejects any taxed line when the device is not VAT registered.
///
/// Runs before signing; the canonical string of a rejected receipt is
/// never built.
pub fn validate_vat_registration(
    is_vat_registered: bool,
    lines: &[ReceiptLine],
) -> Result<(), ValidationError> {
    if is_vat_registered {
        return Ok(());
    }
    for line in lines {
        if !line.tax_percent.is_zero() {
            return Err(ValidationError::VatNotAllowed {
                line_no: line.line_no,
                percent: line.tax_percent.percent_2dp(),
            });
        }
    }
    Ok(())
}

// =============================================================================
// Device / Day Eligibility
// =============================================================================

/// Checks that a device may sign receipts at the given instant.
pub fn validate_device(device: &FiscalDevice, at: DateTime<Utc>) -> Result<(), ValidationError> {
    if !device.is_active {
        return Err(ValidationError::DeviceInactive {
            device_id: device.device_id,
        });
    }
    if device.submissions_locked {
        return Err(ValidationError::DeviceLocked {
            device_id: device.device_id,
        });
    }
    if !device.certificate_valid_at(at) {
        return Err(ValidationError::CertificateNotValid {
            device_id: device.device_id,
            at: at.to_rfc3339(),
        });
    }
    Ok(())
}

/// Receipts may be created only while the fiscal day is open.
pub fn validate_day(day: &FiscalDay) -> Result<(), ValidationError> {
    if day.status != FiscalDayStatus::Open {
        return Err(ValidationError::DayNotOpen {
            fiscal_day_no: day.fiscal_day_no,
            status: day.status.to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Correction Documents
// =============================================================================

/// Validates a credit/debit note against its original document.
///
/// - the original must be a confirmed sale (debit notes: sale invoices
///   only)
/// - the correction carries its own distinct external number
/// - currency must match the original
/// - the original must be within the 12-month correction window
/// - no tax codes may be introduced that the original did not use
pub fn validate_correction(
    document_type: DocumentType,
    correction_invoice_no: &str,
    correction_currency: &str,
    correction_lines: &[ReceiptLine],
    original: &Receipt,
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    let type_name = document_type.canonical_code().to_string();

    let original_is_sale = matches!(
        original.document_type,
        DocumentType::SaleInvoice | DocumentType::SaleReceipt
    );
    let reference_ok = match document_type {
        DocumentType::CreditNote => original_is_sale,
        DocumentType::DebitNote => original.document_type == DocumentType::SaleInvoice,
        _ => false,
    };
    if !reference_ok || !original.is_confirmed() {
        return Err(ValidationError::InvalidOriginalDocument {
            document_type: type_name,
        });
    }

    if correction_invoice_no.trim().is_empty() {
        return Err(ValidationError::MissingOriginalReference {
            document_type: type_name,
        });
    }
    if correction_invoice_no == original.invoice_no {
        return Err(ValidationError::ReusedExternalNumber {
            invoice_no: correction_invoice_no.to_string(),
        });
    }

    if !correction_currency.eq_ignore_ascii_case(&original.currency) {
        return Err(ValidationError::CurrencyMismatch {
            currency: correction_currency.to_string(),
            original_currency: original.currency.clone(),
        });
    }

    let window_end = original
        .receipt_date
        .checked_add_months(Months::new(CORRECTION_WINDOW_MONTHS))
        .unwrap_or(original.receipt_date);
    if now > window_end {
        return Err(ValidationError::OriginalTooOld {
            months: CORRECTION_WINDOW_MONTHS,
        });
    }

    let original_codes = original.tax_codes();
    let new_codes: Vec<&str> = correction_lines
        .iter()
        .map(|l| l.tax_code.as_str())
        .filter(|code| !original_codes.contains(code))
        .collect();
    if !new_codes.is_empty() {
        let mut codes: Vec<&str> = Vec::new();
        for code in new_codes {
            if !codes.contains(&code) {
                codes.push(code);
            }
        }
        return Err(ValidationError::NewTaxCodes {
            codes: codes.join(", "),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
