//! # Sign-Rule Engine
//!
//! Normalizes the numeric sign of every monetary field per document type
//! BEFORE any canonical string is built or hashed.
//!
//! ## The Rule
//! ```text
//! SaleInvoice / SaleReceipt / DebitNote  ──►  abs(value)
//! CreditNote                             ──► -abs(value)
//! ```
//!
//! Applied uniformly to every line amount, every tax-bucket amount, and
//! the receipt total. Idempotent: a value already carrying the right sign
//! passes through unchanged, so double application is harmless (though a
//! caller bug).

use crate::money::Money;
use crate::types::{DocumentType, ReceiptLine, TaxBucket};

/// Applies the sign rule to a single monetary value.
///
/// ## Example
/// ```rust
/// use sable_core::money::Money;
/// use sable_core::sign::apply_sign;
/// use sable_core::types::DocumentType;
///
/// let v = Money::from_cents(1500);
/// assert_eq!(apply_sign(v, DocumentType::SaleInvoice).cents(), 1500);
/// assert_eq!(apply_sign(v, DocumentType::CreditNote).cents(), -1500);
/// // idempotent
/// assert_eq!(
///     apply_sign(apply_sign(v, DocumentType::CreditNote), DocumentType::CreditNote).cents(),
///     -1500
/// );
/// ```
#[inline]
pub fn apply_sign(value: Money, document_type: DocumentType) -> Money {
    if document_type.is_credit() {
        -value.abs()
    } else {
        value.abs()
    }
}

/// Applies the sign rule to every monetary field of a line.
pub fn apply_sign_line(line: &mut ReceiptLine, document_type: DocumentType) {
    line.unit_price = apply_sign(line.unit_price, document_type);
    line.line_total = apply_sign(line.line_total, document_type);
}

/// Applies the sign rule to every monetary field of a tax bucket.
pub fn apply_sign_bucket(bucket: &mut TaxBucket, document_type: DocumentType) {
    bucket.net = apply_sign(bucket.net, document_type);
    bucket.tax = apply_sign(bucket.tax, document_type);
    bucket.gross = apply_sign(bucket.gross, document_type);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaxRate;

    fn line(total_cents: i64) -> ReceiptLine {
        ReceiptLine {
            line_no: 1,
            description: "Widget".into(),
            quantity_milli: 1000,
            unit_price: Money::from_cents(total_cents),
            line_total: Money::from_cents(total_cents),
            tax_code: "A".into(),
            tax_percent: TaxRate::from_bps(1500),
            hs_code: "1122".into(),
        }
    }

    #[test]
    fn test_sale_and_debit_are_positive() {
        for dt in [
            DocumentType::SaleInvoice,
            DocumentType::SaleReceipt,
            DocumentType::DebitNote,
        ] {
            assert_eq!(apply_sign(Money::from_cents(500), dt).cents(), 500);
            assert_eq!(apply_sign(Money::from_cents(-500), dt).cents(), 500);
        }
    }

    #[test]
    fn test_credit_is_negative() {
        assert_eq!(
            apply_sign(Money::from_cents(500), DocumentType::CreditNote).cents(),
            -500
        );
        assert_eq!(
            apply_sign(Money::from_cents(-500), DocumentType::CreditNote).cents(),
            -500
        );
    }

    #[test]
    fn test_idempotent() {
        let once = apply_sign(Money::from_cents(750), DocumentType::CreditNote);
        let twice = apply_sign(once, DocumentType::CreditNote);
        assert_eq!(once, twice);

        let once = apply_sign(Money::from_cents(-750), DocumentType::DebitNote);
        let twice = apply_sign(once, DocumentType::DebitNote);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_zero_unchanged() {
        assert_eq!(
            apply_sign(Money::zero(), DocumentType::CreditNote).cents(),
            0
        );
    }

    #[test]
    fn test_line_fields_signed() {
        let mut l = line(897);
        apply_sign_line(&mut l, DocumentType::CreditNote);
        assert_eq!(l.unit_price.cents(), -897);
        assert_eq!(l.line_total.cents(), -897);
        // quantity never carries the sign
        assert_eq!(l.quantity_milli, 1000);
    }

    #[test]
    fn test_bucket_fields_signed() {
        let mut bucket = TaxBucket {
            tax_code: "A".into(),
            tax_percent: TaxRate::from_bps(1500),
            net: Money::from_cents(1000),
            tax: Money::from_cents(150),
            gross: Money::from_cents(1150),
        };
        apply_sign_bucket(&mut bucket, DocumentType::CreditNote);
        assert_eq!(bucket.net.cents(), -1000);
        assert_eq!(bucket.tax.cents(), -150);
        assert_eq!(bucket.gross.cents(), -1150);
    }
}
