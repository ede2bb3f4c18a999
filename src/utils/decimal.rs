//! Decimal arithmetic helpers for ledger and summary math.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// `numerator / denominator`, or `None` when the denominator is zero or the
/// quotient overflows.
pub fn ratio(numerator: Decimal, denominator: Decimal) -> Option<Decimal> {
    numerator.checked_div(denominator)
}

/// Express a fraction as a percentage.
pub fn to_percent(fraction: Decimal) -> Decimal {
    fraction * dec!(100)
}

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[Decimal]) -> Option<Decimal> {
    ratio(values.iter().sum(), Decimal::from(values.len()))
}

/// Median, averaging the two middle values of an even-length slice.
pub fn median(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / dec!(2))
    } else {
        Some(sorted[mid])
    }
}

/// Lossy conversion for statistics that need floating point.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Convert back from floating point; non-finite values become `None`.
pub fn from_f64(value: f64) -> Option<Decimal> {
    if value.is_finite() {
        Decimal::from_f64(value)
    } else {
        None
    }
}
