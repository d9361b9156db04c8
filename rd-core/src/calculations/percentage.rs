//! Percentage primitives.
//!
//! Every percentage in the engine is a [`Decimal`] in the range 0 to 100.
//! Values are clamped at the boundary so the rest of the engine can treat its
//! inputs as valid.
//!
//! # Applied Percentage
//!
//! The applied percentage of a subcomponent chains four percentage terms:
//!
//! | Term      | Meaning |
//! |-----------|---------|
//! | practice  | Share of practice time spent on the activity |
//! | year      | Share of the year after the implementation start month |
//! | frequency | How often the subcomponent is performed |
//! | time      | Share of the activity's time spent on the subcomponent |
//!
//! `applied = practice × year × frequency × time / 1,000,000`, which yields a
//! value out of 100 when all four terms are out of 100.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use rd_core::calculations::percentage::{applied_percentage, effective_percentage};
//!
//! assert_eq!(applied_percentage(dec!(100), dec!(100), dec!(100), dec!(100)), dec!(100));
//! assert_eq!(applied_percentage(dec!(50), dec!(100), dec!(40), dec!(50)), dec!(10));
//! assert_eq!(effective_percentage(dec!(82.5)), dec!(100));
//! ```

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

/// Applied percentages at or above this value count as full involvement.
pub const FULL_INVOLVEMENT_THRESHOLD: Decimal = dec!(80);

const APPLIED_DIVISOR: Decimal = dec!(1000000);

/// Year percentage by implementation start month, January first.
const START_MONTH_YEAR_PERCENTAGES: [Decimal; 12] = [
    dec!(100),
    dec!(91.67),
    dec!(83.33),
    dec!(75),
    dec!(66.67),
    dec!(58.33),
    dec!(50),
    dec!(41.67),
    dec!(33.33),
    dec!(25),
    dec!(16.67),
    dec!(8.33),
];

/// Errors raised when a percentage cannot be interpreted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PercentageError {
    /// The value is NaN or infinite.
    #[error("percentage must be a finite number, got {0}")]
    InvalidInput(String),

    #[error("start month must be between 1 and 12, got {0}")]
    InvalidStartMonth(u32),
}

/// Clamps a percentage to `[0, 100]`.
pub fn clamp_percentage(value: Decimal) -> Decimal {
    value.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
}

/// Converts a raw floating point percentage into a clamped [`Decimal`].
///
/// # Errors
///
/// Returns [`PercentageError::InvalidInput`] for NaN and infinite values.
pub fn percentage_from_f64(value: f64) -> Result<Decimal, PercentageError> {
    if !value.is_finite() {
        return Err(PercentageError::InvalidInput(value.to_string()));
    }
    let decimal = Decimal::from_f64_retain(value)
        .ok_or_else(|| PercentageError::InvalidInput(value.to_string()))?;
    Ok(clamp_percentage(decimal))
}

/// Chains the four percentage terms into an applied percentage.
///
/// Each term is clamped first. The result is not rounded.
pub fn applied_percentage(
    practice: Decimal,
    year: Decimal,
    frequency: Decimal,
    time: Decimal,
) -> Decimal {
    clamp_percentage(practice)
        * clamp_percentage(year)
        * clamp_percentage(frequency)
        * clamp_percentage(time)
        / APPLIED_DIVISOR
}

/// Applies the 80% threshold rule: anything at or above 80 becomes 100.
pub fn effective_percentage(applied: Decimal) -> Decimal {
    if applied >= FULL_INVOLVEMENT_THRESHOLD {
        Decimal::ONE_HUNDRED
    } else {
        applied
    }
}

/// Looks up the year percentage for an implementation start month.
///
/// # Errors
///
/// Returns [`PercentageError::InvalidStartMonth`] unless `month` is 1..=12.
pub fn year_percentage_for_start_month(month: u32) -> Result<Decimal, PercentageError> {
    month
        .checked_sub(1)
        .and_then(|index| START_MONTH_YEAR_PERCENTAGES.get(index as usize))
        .copied()
        .ok_or(PercentageError::InvalidStartMonth(month))
}
