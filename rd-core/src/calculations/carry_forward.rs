//! Copies a business year's activity selections into earlier years.
//!
//! The base year's activities are read-only input. Each target year receives
//! a fresh copy, replacing whatever it had before:
//!
//! - practice percentage decays 5% per year back, the reduction rounded to a
//!   whole percent at each step and never dropping below 4 (or the original
//!   value when that is already lower);
//! - every subcomponent's year percentage is reset from the start-month
//!   table, since research in earlier years likely started later in the
//!   calendar;
//! - ids get the target year appended and applied percentages are
//!   recomputed.
//!
//! Targets must fall within the four years before the base year and not
//! before the business started.

use std::collections::BTreeMap;

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::calculations::percentage::{PercentageError, year_percentage_for_start_month};
use crate::models::SelectedActivity;

/// How many years back activities may be carried.
pub const MAX_LOOKBACK_YEARS: i32 = 4;

const PRACTICE_DECAY_RATE: Decimal = dec!(0.05);
const MIN_CARRIED_PRACTICE: Decimal = dec!(4);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CarryForwardError {
    #[error("target year {year} is before the business start year {business_start_year}")]
    BeforeBusinessStart { year: i32, business_start_year: i32 },

    #[error("target year {year} is not before base year {base_year}")]
    NotBeforeBaseYear { year: i32, base_year: i32 },

    #[error("target year {year} is more than 4 years before base year {base_year}")]
    OutsideLookback { year: i32, base_year: i32 },

    #[error(transparent)]
    Percentage(#[from] PercentageError),
}

/// One year to copy into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarryForwardTarget {
    pub year: i32,
    pub business_year_id: String,
    /// Assumed implementation start month for the year. `None` keeps each
    /// subcomponent's own start month.
    pub start_month: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarryForwardRequest {
    pub base_year: i32,
    pub business_start_year: i32,
    pub targets: Vec<CarryForwardTarget>,
}

/// Default target years for a base year, most recent first.
///
/// ```
/// use rd_core::calculations::carry_forward::lookback_years;
///
/// assert_eq!(lookback_years(2024, 2015), vec![2023, 2022, 2021, 2020]);
/// assert_eq!(lookback_years(2024, 2022), vec![2023, 2022]);
/// assert!(lookback_years(2024, 2024).is_empty());
/// ```
pub fn lookback_years(
    base_year: i32,
    business_start_year: i32,
) -> Vec<i32> {
    (1..=MAX_LOOKBACK_YEARS)
        .map(|back| base_year - back)
        .filter(|year| *year >= business_start_year)
        .collect()
}

/// Produces the copies for every target year, keyed by year.
///
/// Only activities whose `year` equals the base year are copied. A target
/// listed twice is copied once, using its last entry.
///
/// # Errors
///
/// Returns [`CarryForwardError`] when a target year is out of range or a
/// start month is invalid. Nothing is produced in that case.
pub fn copy_activities_to_previous_years(
    request: &CarryForwardRequest,
    activities: &[SelectedActivity],
) -> Result<BTreeMap<i32, Vec<SelectedActivity>>, CarryForwardError> {
    for target in &request.targets {
        validate_target(request, target.year)?;
    }

    let base: Vec<&SelectedActivity> = activities
        .iter()
        .filter(|a| a.year == request.base_year)
        .collect();

    let mut copies = BTreeMap::new();
    for target in &request.targets {
        let years_back = request.base_year - target.year;
        let year_copies = base
            .iter()
            .map(|activity| copy_activity(activity, target, years_back))
            .collect::<Result<Vec<_>, _>>()?;
        copies.insert(target.year, year_copies);
    }

    info!(
        base_year = request.base_year,
        activities = base.len(),
        targets = copies.len(),
        "carried activities to previous years"
    );

    Ok(copies)
}

/// Practice percentage after `years_back` rounds of decay.
pub fn decayed_practice_percentage(
    practice: Decimal,
    years_back: i32,
) -> Decimal {
    let floor = practice.min(MIN_CARRIED_PRACTICE);
    let mut value = practice;
    for _ in 0..years_back {
        let reduction = (value * PRACTICE_DECAY_RATE)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        value = (value - reduction).max(floor);
    }
    value
}

fn validate_target(
    request: &CarryForwardRequest,
    year: i32,
) -> Result<(), CarryForwardError> {
    if year >= request.base_year {
        return Err(CarryForwardError::NotBeforeBaseYear {
            year,
            base_year: request.base_year,
        });
    }
    if request.base_year - year > MAX_LOOKBACK_YEARS {
        return Err(CarryForwardError::OutsideLookback {
            year,
            base_year: request.base_year,
        });
    }
    if year < request.business_start_year {
        return Err(CarryForwardError::BeforeBusinessStart {
            year,
            business_start_year: request.business_start_year,
        });
    }
    Ok(())
}

fn copy_activity(
    activity: &SelectedActivity,
    target: &CarryForwardTarget,
    years_back: i32,
) -> Result<SelectedActivity, CarryForwardError> {
    let mut copy = activity.clone();
    copy.id = format!("{}-{}", activity.id, target.year);
    copy.year = target.year;
    copy.business_year_id = target.business_year_id.clone();
    copy.practice_percentage = decayed_practice_percentage(activity.practice_percentage, years_back);

    for sub in &mut copy.subcomponents {
        let month = target.start_month.unwrap_or(sub.start_month);
        sub.year_percentage = year_percentage_for_start_month(month)?;
        sub.start_month = month;
        sub.id = format!("{}-{}", sub.id, target.year);
    }
    copy.recompute_applied();

    Ok(copy)
}
