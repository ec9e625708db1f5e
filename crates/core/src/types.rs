//! Fixed-point value types for the tapesim engine.
//!
//! Prices, quantities, and monetary amounts are stored as an integer mantissa
//! (`raw`) plus a declared decimal precision. All arithmetic stays in integer
//! space; rounding happens exactly once, at construction or when a computed
//! value (such as a notional) is rescaled to its target precision.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Timestamp in milliseconds since Unix epoch (UTC).
pub type TimestampMs = i64;

/// Maximum supported decimal precision for any value type.
pub const MAX_PRECISION: u8 = 9;

const POW10: [i64; 19] = [
    1,
    10,
    100,
    1_000,
    10_000,
    100_000,
    1_000_000,
    10_000_000,
    100_000_000,
    1_000_000_000,
    10_000_000_000,
    100_000_000_000,
    1_000_000_000_000,
    10_000_000_000_000,
    100_000_000_000_000,
    1_000_000_000_000_000,
    10_000_000_000_000_000,
    100_000_000_000_000_000,
    1_000_000_000_000_000_000,
];

#[inline]
pub(crate) fn pow10(precision: u8) -> i64 {
    POW10[precision as usize]
}

/// Round `numerator / denominator` half away from zero. `denominator` > 0.
#[inline]
fn div_round(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    if remainder.abs() * 2 >= denominator {
        quotient + numerator.signum()
    } else {
        quotient
    }
}

/// Rescale a mantissa from one precision to another, rounding half away from
/// zero when precision is reduced.
#[inline]
fn rescale(raw: i128, from: u8, to: u8) -> i128 {
    match from.cmp(&to) {
        Ordering::Equal => raw,
        Ordering::Less => raw * pow10(to - from) as i128,
        Ordering::Greater => div_round(raw, pow10(from - to) as i128),
    }
}

#[inline]
fn f64_to_raw(value: f64, precision: u8) -> i64 {
    assert!(
        precision <= MAX_PRECISION,
        "precision {precision} exceeds maximum {MAX_PRECISION}"
    );
    let scaled = value * pow10(precision) as f64;
    assert!(scaled.is_finite(), "value {value} is not representable");
    scaled.round() as i64
}

/// A price with instrument-declared decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Price {
    /// Integer mantissa scaled by `10^precision`.
    pub raw: i64,
    /// Declared decimal precision.
    pub precision: u8,
}

impl Price {
    /// Create a price from an `f64`, rounding half away from zero to the
    /// declared precision.
    pub fn new(value: f64, precision: u8) -> Self {
        Self {
            raw: f64_to_raw(value, precision),
            precision,
        }
    }

    /// Create a price directly from a raw mantissa.
    pub fn from_raw(raw: i64, precision: u8) -> Self {
        assert!(precision <= MAX_PRECISION);
        Self { raw, precision }
    }

    /// Convert to `f64` (for display and derived statistics only).
    #[inline]
    pub fn as_f64(&self) -> f64 {
        self.raw as f64 / pow10(self.precision) as f64
    }

    /// Return this price shifted by a signed number of ticks.
    pub fn offset_ticks(&self, ticks: i64, tick: Price) -> Price {
        assert_eq!(self.precision, tick.precision, "tick precision mismatch");
        Price {
            raw: self.raw + ticks * tick.raw,
            precision: self.precision,
        }
    }
}

impl PartialOrd for Price {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Price {
    fn cmp(&self, other: &Self) -> Ordering {
        let precision = self.precision.max(other.precision);
        let lhs = rescale(self.raw as i128, self.precision, precision);
        let rhs = rescale(other.raw as i128, other.precision, precision);
        // Precision tie-break keeps the order consistent with the derived
        // structural equality.
        lhs.cmp(&rhs).then(self.precision.cmp(&other.precision))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.*}", self.precision as usize, self.as_f64())
    }
}

/// A non-negative quantity with instrument-declared decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quantity {
    /// Integer mantissa scaled by `10^precision`.
    pub raw: i64,
    /// Declared decimal precision.
    pub precision: u8,
}

impl Quantity {
    /// Create a quantity from an `f64`, rounding half away from zero.
    pub fn new(value: f64, precision: u8) -> Self {
        let raw = f64_to_raw(value, precision);
        assert!(raw >= 0, "quantity cannot be negative: {value}");
        Self { raw, precision }
    }

    /// Create a quantity directly from a raw mantissa.
    pub fn from_raw(raw: i64, precision: u8) -> Self {
        assert!(precision <= MAX_PRECISION);
        assert!(raw >= 0, "quantity cannot be negative");
        Self { raw, precision }
    }

    /// Zero quantity at the given precision.
    pub fn zero(precision: u8) -> Self {
        Self { raw: 0, precision }
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.raw == 0
    }

    /// Convert to `f64` (for display and derived statistics only).
    #[inline]
    pub fn as_f64(&self) -> f64 {
        self.raw as f64 / pow10(self.precision) as f64
    }

    /// Saturating subtraction; floors at zero.
    pub fn saturating_sub(&self, other: Quantity) -> Quantity {
        assert_eq!(self.precision, other.precision, "precision mismatch");
        Quantity {
            raw: (self.raw - other.raw).max(0),
            precision: self.precision,
        }
    }

    /// The smaller of two quantities.
    pub fn min(&self, other: Quantity) -> Quantity {
        assert_eq!(self.precision, other.precision, "precision mismatch");
        if self.raw <= other.raw {
            *self
        } else {
            other
        }
    }
}

impl std::ops::Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        assert_eq!(self.precision, rhs.precision, "precision mismatch");
        Quantity {
            raw: self.raw + rhs.raw,
            precision: self.precision,
        }
    }
}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        let precision = self.precision.max(other.precision);
        let lhs = rescale(self.raw as i128, self.precision, precision);
        let rhs = rescale(other.raw as i128, other.precision, precision);
        lhs.cmp(&rhs).then(self.precision.cmp(&other.precision))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.*}", self.precision as usize, self.as_f64())
    }
}

/// A currency with a fixed decimal precision for monetary amounts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency {
    /// ISO-style currency code (e.g. "USD", "JPY", "BTC").
    pub code: String,
    /// Decimal precision for amounts in this currency.
    pub precision: u8,
}

impl Currency {
    pub fn new(code: impl Into<String>, precision: u8) -> Self {
        assert!(precision <= MAX_PRECISION);
        Self {
            code: code.into(),
            precision,
        }
    }

    pub fn usd() -> Self {
        Self::new("USD", 2)
    }

    pub fn eur() -> Self {
        Self::new("EUR", 2)
    }

    pub fn jpy() -> Self {
        Self::new("JPY", 0)
    }

    pub fn aud() -> Self {
        Self::new("AUD", 2)
    }

    pub fn btc() -> Self {
        Self::new("BTC", 8)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)
    }
}

/// A monetary amount in a single currency, at that currency's precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Integer mantissa scaled by `10^currency.precision`.
    pub raw: i64,
    pub currency: Currency,
}

impl Money {
    /// Create an amount from an `f64`, rounding half away from zero to the
    /// currency precision.
    pub fn new(amount: f64, currency: Currency) -> Self {
        Self {
            raw: f64_to_raw(amount, currency.precision),
            currency,
        }
    }

    /// Create an amount directly from a raw mantissa.
    pub fn from_raw(raw: i64, currency: Currency) -> Self {
        Self { raw, currency }
    }

    /// Zero in the given currency.
    pub fn zero(currency: Currency) -> Self {
        Self { raw: 0, currency }
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.raw == 0
    }

    #[inline]
    pub fn is_negative(&self) -> bool {
        self.raw < 0
    }

    /// Convert to `f64` (for display and derived statistics only).
    #[inline]
    pub fn as_f64(&self) -> f64 {
        self.raw as f64 / pow10(self.currency.precision) as f64
    }

    /// Negated amount.
    pub fn negated(&self) -> Money {
        Money {
            raw: -self.raw,
            currency: self.currency.clone(),
        }
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        assert_eq!(self.currency, rhs.currency, "currency mismatch");
        Money {
            raw: self.raw + rhs.raw,
            currency: self.currency,
        }
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        assert_eq!(self.currency, rhs.currency, "currency mismatch");
        Money {
            raw: self.raw - rhs.raw,
            currency: self.currency,
        }
    }
}

impl PartialOrd for Money {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.currency == other.currency {
            Some(self.raw.cmp(&other.raw))
        } else {
            None
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.*} {}",
            self.currency.precision as usize,
            self.as_f64(),
            self.currency.code
        )
    }
}

/// Exact notional value: `price × quantity × multiplier`, computed in `i128`
/// and rescaled once to the currency precision.
pub fn notional(price: Price, quantity: Quantity, multiplier: u32, currency: Currency) -> Money {
    let product = price.raw as i128 * quantity.raw as i128 * multiplier as i128;
    let scale = price.precision + quantity.precision;
    let raw = rescale(product, scale, currency.precision);
    Money {
        raw: raw as i64,
        currency,
    }
}

/// Commission on a notional amount expressed in basis points, rounded to the
/// currency precision.
pub fn bps_of(amount: &Money, bps: f64) -> Money {
    // Carry bps at 4 implied decimals so fractional rates stay exact.
    let bps_scaled = (bps * 10_000.0).round() as i128;
    let product = amount.raw as i128 * bps_scaled;
    // Divide by 10_000 (bps) and 10_000 (bps scaling).
    let raw = div_round(product, 100_000_000);
    Money {
        raw: raw as i64,
        currency: amount.currency.clone(),
    }
}
