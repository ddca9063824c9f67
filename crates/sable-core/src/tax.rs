//! # Tax Aggregator
//!
//! Groups receipt lines into tax buckets and computes rounded tax/gross
//! totals per bucket.
//!
//! ## Aggregation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Tax Aggregation                                   │
//! │                                                                         │
//! │  lines (net cents, already rounded per line)                           │
//! │       │                                                                 │
//! │       ▼  group by (tax_code, tax_percent), INSERTION ORDER             │
//! │  ┌──────────────┐  ┌──────────────┐                                    │
//! │  │ bucket A 15% │  │ bucket B 0%  │   net = Σ line totals              │
//! │  └──────┬───────┘  └──────┬───────┘                                    │
//! │         ▼                 ▼                                             │
//! │  tax   = round(net × pct / 100)     ← ONE rounding step per bucket     │
//! │  gross = net + tax                                                      │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  receipt.total = Σ bucket.gross     ← must reconcile EXACTLY           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Bucket order is the order keys were first encountered while scanning
//! lines. The canonical builder serializes buckets in this same order, so
//! it is part of the signed material.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::{ReceiptLine, TaxBucket, TaxRate};

// =============================================================================
// Rounding Policy
// =============================================================================

/// Monetary rounding modes the upstream gateway could validate against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    /// Round half away from zero (0.005 -> 0.01, -0.005 -> -0.01).
    HalfUp,
    /// Round half to even (bankers' rounding).
    HalfEven,
}

/// The rounding mode used for every monetary rounding in this engine.
///
/// The gateway validates totals bit-for-bit, so integrators can assert
/// against this constant instead of reverse-engineering the math. See
/// DESIGN.md for the selection rationale; confirm against the production
/// gateway before go-live.
pub const TAX_ROUNDING: RoundingMode = RoundingMode::HalfUp;

// =============================================================================
// Aggregation
// =============================================================================

/// Groups lines into tax buckets keyed by (tax code, tax percent).
///
/// Line totals are already rounded to cents; each bucket's tax is
/// computed once from the accumulated net (`round(net × pct / 100)`,
/// [`TAX_ROUNDING`]), and gross is `net + tax`.
///
/// ## Example
/// ```rust
/// use sable_core::money::Money;
/// use sable_core::tax::aggregate;
/// use sable_core::types::{ReceiptLine, TaxRate};
///
/// let lines = vec![ReceiptLine {
///     line_no: 1,
///     description: "Widget".into(),
///     quantity_milli: 1000,
///     unit_price: Money::from_cents(1000),
///     line_total: Money::from_cents(1000),
///     tax_code: "A".into(),
///     tax_percent: TaxRate::from_bps(1500),
///     hs_code: "1122".into(),
/// }];
/// let buckets = aggregate(&lines);
/// assert_eq!(buckets.len(), 1);
/// assert_eq!(buckets[0].tax.cents(), 150);
/// assert_eq!(buckets[0].gross.cents(), 1150);
/// ```
pub fn aggregate(lines: &[ReceiptLine]) -> Vec<TaxBucket> {
    let mut buckets: Vec<TaxBucket> = Vec::new();

    for line in lines {
        let key = (line.tax_code.as_str(), line.tax_percent);
        match buckets
            .iter_mut()
            .find(|b| (b.tax_code.as_str(), b.tax_percent) == key)
        {
            Some(bucket) => bucket.net += line.line_total,
            None => buckets.push(TaxBucket {
                tax_code: line.tax_code.clone(),
                tax_percent: line.tax_percent,
                net: line.line_total,
                tax: Money::zero(),
                gross: Money::zero(),
            }),
        }
    }

    for bucket in &mut buckets {
        bucket.tax = bucket.net.apply_rate_bps(bucket.tax_percent.bps());
        bucket.gross = bucket.net + bucket.tax;
    }

    buckets
}

/// Sums bucket gross amounts into the receipt total.
pub fn total_from_buckets(buckets: &[TaxBucket]) -> Money {
    buckets
        .iter()
        .fold(Money::zero(), |acc, bucket| acc + bucket.gross)
}

/// Verifies `sum(bucket.gross) == total` exactly, in cents.
///
/// The total is derived from the buckets, so any drift means a caller
/// mutated one side after aggregation. Rejected before signing, never
/// silently corrected.
pub fn reconcile(buckets: &[TaxBucket], total: Money) -> Result<(), ValidationError> {
    let bucket_sum = total_from_buckets(buckets);
    if bucket_sum != total {
        return Err(ValidationError::BucketTotalMismatch {
            bucket_sum: bucket_sum.cents(),
            total: total.cents(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(no: u32, total_cents: i64, code: &str, bps: u32) -> ReceiptLine {
        ReceiptLine {
            line_no: no,
            description: format!("Line {no}"),
            quantity_milli: 1000,
            unit_price: Money::from_cents(total_cents),
            line_total: Money::from_cents(total_cents),
            tax_code: code.into(),
            tax_percent: TaxRate::from_bps(bps),
            hs_code: "1122".into(),
        }
    }

    #[test]
    fn test_single_bucket() {
        let lines = vec![line(1, 1000, "A", 1500), line(2, 500, "A", 1500)];
        let buckets = aggregate(&lines);

        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].net.cents(), 1500);
        assert_eq!(buckets[0].tax.cents(), 225); // 15.00 × 15%
        assert_eq!(buckets[0].gross.cents(), 1725);
    }

    #[test]
    fn test_insertion_order_preserved() {
        // "Z" appears first in the lines, so it must come first in the
        // buckets regardless of code ordering.
        let lines = vec![
            line(1, 1000, "Z", 1500),
            line(2, 500, "A", 0),
            line(3, 200, "Z", 1500),
        ];
        let buckets = aggregate(&lines);

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].tax_code, "Z");
        assert_eq!(buckets[0].net.cents(), 1200);
        assert_eq!(buckets[1].tax_code, "A");
        assert_eq!(buckets[1].net.cents(), 500);
    }

    #[test]
    fn test_same_code_different_percent_splits() {
        let lines = vec![line(1, 1000, "A", 1500), line(2, 1000, "A", 0)];
        let buckets = aggregate(&lines);
        assert_eq!(buckets.len(), 2);
    }

    #[test]
    fn test_tax_rounded_once_per_bucket() {
        // Three 0.03 lines at 15%: per-line tax would round 0.0045 -> 0.00
        // three times; bucket math taxes the 0.09 sum once -> 0.01.
        let lines = vec![
            line(1, 3, "A", 1500),
            line(2, 3, "A", 1500),
            line(3, 3, "A", 1500),
        ];
        let buckets = aggregate(&lines);
        assert_eq!(buckets[0].net.cents(), 9);
        assert_eq!(buckets[0].tax.cents(), 1);
    }

    #[test]
    fn test_zero_rate_bucket() {
        let lines = vec![line(1, 700, "EXEMPT", 0)];
        let buckets = aggregate(&lines);
        assert_eq!(buckets[0].tax.cents(), 0);
        assert_eq!(buckets[0].gross.cents(), 700);
    }

    #[test]
    fn test_credit_note_negative_buckets() {
        // Signed lines produce signed buckets with symmetric rounding.
        let lines = vec![line(1, -1000, "A", 1550)];
        let buckets = aggregate(&lines);
        assert_eq!(buckets[0].net.cents(), -1000);
        assert_eq!(buckets[0].tax.cents(), -155);
        assert_eq!(buckets[0].gross.cents(), -1155);
    }

    #[test]
    fn test_gross_sum_equals_total() {
        let lines = vec![
            line(1, 1234, "A", 1500),
            line(2, 567, "B", 1550),
            line(3, 89, "EXEMPT", 0),
        ];
        let buckets = aggregate(&lines);
        let total = total_from_buckets(&buckets);

        assert!(reconcile(&buckets, total).is_ok());

        let drifted = total + Money::from_cents(1);
        assert!(matches!(
            reconcile(&buckets, drifted),
            Err(ValidationError::BucketTotalMismatch { .. })
        ));
    }

    #[test]
    fn test_rounding_mode_is_exported() {
        assert_eq!(TAX_ROUNDING, RoundingMode::HalfUp);
    }
}
