//! Rounding helpers shared by the calculation modules.
//!
//! Percentages and credit amounts are stored to the cent, QRE category totals
//! to the whole dollar. Both round half away from zero.

use rust_decimal::{Decimal, RoundingStrategy};

/// Rounds a decimal value to exactly two decimal places using half-up rounding.
///
/// Values at exactly 0.005 are rounded away from zero.
///
/// # Examples
///
/// ```
/// use rust_decimal_macros::dec;
/// use rd_core::calculations::common::round_half_up;
///
/// assert_eq!(round_half_up(dec!(33.334)), dec!(33.33));
/// assert_eq!(round_half_up(dec!(41.665)), dec!(41.67));
/// assert_eq!(round_half_up(dec!(-6359.505)), dec!(-6359.51));
/// ```
pub fn round_half_up(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Rounds a dollar amount to the whole dollar, half away from zero.
///
/// ```
/// use rust_decimal_macros::dec;
/// use rd_core::calculations::common::round_to_dollar;
///
/// assert_eq!(round_to_dollar(dec!(32499.50)), dec!(32500));
/// assert_eq!(round_to_dollar(dec!(32499.49)), dec!(32499));
/// ```
pub fn round_to_dollar(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

/// Arithmetic mean, zero for an empty slice.
pub fn mean(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    values.iter().copied().sum::<Decimal>() / Decimal::from(values.len())
}
