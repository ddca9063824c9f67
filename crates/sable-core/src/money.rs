//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Integer Minor Units
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every monetary value in the engine is an i64 count of minor units     │
//! │  (cents). The canonical string, the database, the gateway payload and  │
//! │  all tax math use cents; nothing is ever represented as a float.       │
//! │                                                                         │
//! │  Signed on purpose: credit notes carry negative amounts end to end.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use sable_core::money::Money;
//!
//! let price = Money::from_cents(1099); // 10.99
//! let line = price * 3;                // 32.97
//! assert_eq!(line.cents(), 3297);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents).
///
/// ## Design
/// - **i64 (signed)**: credit notes are negative throughout
/// - **Single-field tuple struct**: zero-cost abstraction over i64
/// - **Full serde support**: serialized as a bare integer
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents (the smallest currency unit).
    ///
    /// ## Example
    /// ```rust
    /// use sable_core::money::Money;
    ///
    /// let price = Money::from_cents(1099);
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is strictly positive.
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is strictly negative.
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the absolute value.
    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Multiplies by a quantity expressed in thousandths and rounds the
    /// result half away from zero.
    ///
    /// Quantities are integer thousandths (1500 = 1.5 units), so a line
    /// total is `unit_price × quantity_milli / 1000` with one rounding
    /// step at the end.
    ///
    /// ## Example
    /// ```rust
    /// use sable_core::money::Money;
    ///
    /// let unit = Money::from_cents(299);          // 2.99
    /// let total = unit.mul_quantity_milli(1500);  // × 1.5
    /// assert_eq!(total.cents(), 449);             // 4.485 -> 4.49
    /// ```
    pub fn mul_quantity_milli(&self, quantity_milli: i64) -> Money {
        Money(mul_div_round(self.0, quantity_milli, 1000))
    }

    /// Applies a tax rate given in basis points and rounds half away from
    /// zero. 1500 bps = 15.00%.
    ///
    /// ## Example
    /// ```rust
    /// use sable_core::money::Money;
    ///
    /// let net = Money::from_cents(1000);   // 10.00
    /// let tax = net.apply_rate_bps(1550);  // 15.5% -> 1.55
    /// assert_eq!(tax.cents(), 155);
    /// ```
    pub fn apply_rate_bps(&self, rate_bps: u32) -> Money {
        Money(mul_div_round(self.0, rate_bps as i64, 10_000))
    }
}

/// Computes `a × num / den` in i128 and rounds half away from zero.
///
/// Half away from zero matches the engine-wide rounding policy
/// ([`crate::tax::TAX_ROUNDING`]): 0.005 -> 0.01 and -0.005 -> -0.01.
pub(crate) fn mul_div_round(a: i64, num: i64, den: i64) -> i64 {
    debug_assert!(den > 0);
    let prod = a as i128 * num as i128;
    let den = den as i128;
    let half = den / 2;
    let rounded = if prod >= 0 {
        (prod + half) / den
    } else {
        (prod - half) / den
    };
    rounded as i64
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display implementation shows money in a human-readable format.
///
/// For diagnostics and error messages only; currency formatting for
/// receipts is a presentation concern outside this crate.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, (self.0 / 100).abs(), (self.0 % 100).abs())
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
