//! # Canonical Builder
//!
//! Deterministically serializes a receipt's fiscal fields into the one
//! exact string that gets hashed and signed.
//!
//! ## Canonical Layout (no delimiters anywhere)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Canonical String Layout                            │
//! │                                                                         │
//! │  device_id                      "321"                                  │
//! │  document type code             "FISCALINVOICE"                        │
//! │  currency (uppercase)           "USD"                                  │
//! │  receipt_global_no              "42"                                   │
//! │  receipt timestamp              "2026-02-03T10:15:30"                  │
//! │  total in cents                 "1725"                                 │
//! │  per bucket, INSERTION order:                                          │
//! │    tax code (uppercase)         "A"                                    │
//! │    percent, two decimals        "15.00"                                │
//! │    tax in cents                 "225"                                  │
//! │    gross in cents               "1725"                                 │
//! │  previous receipt hash          "1u8Nc..."  ← OMITTED ENTIRELY for    │
//! │                                              the first receipt of a   │
//! │                                              fiscal day               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Buyer/customer data never participates: two receipts differing only in
//! buyer fields canonicalize identically.
//!
//! The string is built exactly once per receipt. Any change to lines,
//! buckets, or totals afterwards requires a full rebuild and re-signing;
//! there is deliberately no API to patch a fragment.

use chrono::{DateTime, Utc};

use crate::money::Money;
use crate::types::{DocumentType, TaxBucket};

/// The timestamp layout embedded in the canonical string.
pub const CANONICAL_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Borrowed view of the fields that participate in canonicalization.
///
/// Deliberately narrow: anything not listed here (buyer data, line
/// descriptions, external numbers) cannot leak into the signed material.
#[derive(Debug, Clone, Copy)]
pub struct CanonicalFields<'a> {
    pub device_id: i64,
    pub document_type: DocumentType,
    pub currency: &'a str,
    pub receipt_global_no: i64,
    pub receipt_date: DateTime<Utc>,
    pub total: Money,
    pub taxes: &'a [TaxBucket],
    /// None only for the first receipt of a fiscal day.
    pub previous_receipt_hash: Option<&'a str>,
}

/// Builds the canonical string for a receipt.
///
/// Amounts must already carry their document-type sign; the builder
/// renders values verbatim and applies no normalization beyond uppercase
/// currency/tax codes.
pub fn build_canonical(fields: &CanonicalFields<'_>) -> String {
    let mut canonical = String::with_capacity(128);

    canonical.push_str(&fields.device_id.to_string());
    canonical.push_str(fields.document_type.canonical_code());
    canonical.push_str(&fields.currency.to_uppercase());
    canonical.push_str(&fields.receipt_global_no.to_string());
    canonical.push_str(
        &fields
            .receipt_date
            .format(CANONICAL_DATE_FORMAT)
            .to_string(),
    );
    canonical.push_str(&fields.total.cents().to_string());

    // Buckets serialize in the order they were first encountered while
    // scanning lines; see DESIGN.md for the ordering compatibility note.
    for bucket in fields.taxes {
        canonical.push_str(&bucket.tax_code.to_uppercase());
        canonical.push_str(&bucket.tax_percent.percent_2dp());
        canonical.push_str(&bucket.tax.cents().to_string());
        canonical.push_str(&bucket.gross.cents().to_string());
    }

    // Omitted entirely, not zero-padded, for the first receipt of a day.
    if let Some(previous_hash) = fields.previous_receipt_hash {
        canonical.push_str(previous_hash);
    }

    canonical
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaxRate;
    use chrono::TimeZone;

    fn bucket(code: &str, bps: u32, tax: i64, gross: i64) -> TaxBucket {
        TaxBucket {
            tax_code: code.into(),
            tax_percent: TaxRate::from_bps(bps),
            net: Money::from_cents(gross - tax),
            tax: Money::from_cents(tax),
            gross: Money::from_cents(gross),
        }
    }

    fn fields<'a>(taxes: &'a [TaxBucket], prev: Option<&'a str>) -> CanonicalFields<'a> {
        CanonicalFields {
            device_id: 321,
            document_type: DocumentType::SaleInvoice,
            currency: "usd",
            receipt_global_no: 42,
            receipt_date: Utc.with_ymd_and_hms(2026, 2, 3, 10, 15, 30).unwrap(),
            total: Money::from_cents(1725),
            taxes,
            previous_receipt_hash: prev,
        }
    }

    #[test]
    fn test_exact_layout() {
        let taxes = vec![bucket("a", 1500, 225, 1725)];
        let canonical = build_canonical(&fields(&taxes, None));
        assert_eq!(canonical, "321FISCALINVOICEUSD422026-02-03T10:15:301725A15.002251725");
    }

    #[test]
    fn test_first_receipt_omits_previous_hash_entirely() {
        let taxes = vec![bucket("A", 1500, 225, 1725)];
        let first = build_canonical(&fields(&taxes, None));
        let chained = build_canonical(&fields(&taxes, Some("HASHB64==")));

        assert!(!first.contains("HASHB64=="));
        assert_eq!(format!("{first}HASHB64=="), chained);
    }

    #[test]
    fn test_percent_two_decimals() {
        let taxes = vec![bucket("A", 1550, 155, 1155)];
        let canonical = build_canonical(&fields(&taxes, None));
        assert!(canonical.contains("A15.50"));

        let taxes = vec![bucket("A", 1500, 150, 1150)];
        let canonical = build_canonical(&fields(&taxes, None));
        assert!(canonical.contains("A15.00"));
    }

    #[test]
    fn test_bucket_insertion_order_serialized() {
        // "Z" first-encountered before "A": canonical must keep Z first.
        let taxes = vec![bucket("Z", 1500, 150, 1150), bucket("A", 0, 0, 500)];
        let canonical = build_canonical(&fields(&taxes, None));

        let z_pos = canonical.find("Z15.00").unwrap();
        let a_pos = canonical.find("A0.00").unwrap();
        assert!(z_pos < a_pos);
    }

    #[test]
    fn test_credit_note_negative_amounts_rendered() {
        let taxes = vec![bucket("A", 1500, -150, -1150)];
        let mut f = fields(&taxes, None);
        f.document_type = DocumentType::CreditNote;
        f.total = Money::from_cents(-1150);

        let canonical = build_canonical(&f);
        assert!(canonical.contains("CREDITNOTE"));
        assert!(canonical.contains("-1150A15.00-150-1150"));
    }

    #[test]
    fn test_no_buyer_involvement() {
        // CanonicalFields has no buyer member at all; this test pins the
        // property that identical fiscal fields canonicalize identically
        // whatever the surrounding receipt carries.
        let taxes = vec![bucket("A", 1500, 225, 1725)];
        let one = build_canonical(&fields(&taxes, None));
        let two = build_canonical(&fields(&taxes, None));
        assert_eq!(one, two);
    }
}
