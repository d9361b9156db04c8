//! Practice time budget.
//!
//! Enabled research activities and the non-R&D slice share a budget of 100%.
//! Non-R&D time is the anchor: editing it never moves the activities. Editing
//! an activity that pushes the total over 100% rescales every enabled
//! activity proportionally so the total returns to 100%.
//!
//! # Example
//!
//! ```
//! use rust_decimal::Decimal;
//! use rust_decimal_macros::dec;
//! use rd_core::calculations::allocation::{AllocationBudget, PracticeShare, Redistribution};
//!
//! struct Slot(&'static str, Decimal);
//!
//! impl PracticeShare for Slot {
//!     fn share_id(&self) -> &str { self.0 }
//!     fn share_name(&self) -> &str { self.0 }
//!     fn practice_percentage(&self) -> Decimal { self.1 }
//!     fn set_practice_percentage(&mut self, value: Decimal) { self.1 = value; }
//!     fn is_enabled(&self) -> bool { true }
//! }
//!
//! let budget = AllocationBudget::new(dec!(20));
//! let mut slots = vec![Slot("a", dec!(40)), Slot("b", dec!(40))];
//!
//! let outcome = budget.set_activity_practice_percentage(&mut slots, "b", dec!(60)).unwrap();
//!
//! assert_eq!(outcome, Redistribution::Rescaled { scale_factor: dec!(0.8) });
//! assert_eq!(slots[0].1, dec!(32.00));
//! assert_eq!(slots[1].1, dec!(48.00));
//! ```

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::calculations::percentage::clamp_percentage;
use crate::models::SelectedActivity;

pub const AVAILABLE_SEGMENT_ID: &str = "available";
pub const NON_RD_SEGMENT_ID: &str = "non-rd";

const CENT: Decimal = dec!(0.01);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("unknown activity: {0}")]
    UnknownActivity(String),

    #[error("unknown subcomponent {subcomponent_id} in activity {activity_id}")]
    UnknownSubcomponent {
        activity_id: String,
        subcomponent_id: String,
    },
}

/// Anything that holds a slice of the practice time budget.
pub trait PracticeShare {
    fn share_id(&self) -> &str;
    fn share_name(&self) -> &str;
    fn practice_percentage(&self) -> Decimal;
    fn set_practice_percentage(
        &mut self,
        value: Decimal,
    );
    fn is_enabled(&self) -> bool;
}

impl PracticeShare for SelectedActivity {
    fn share_id(&self) -> &str {
        &self.activity_id
    }

    fn share_name(&self) -> &str {
        &self.name
    }

    fn practice_percentage(&self) -> Decimal {
        self.practice_percentage
    }

    fn set_practice_percentage(
        &mut self,
        value: Decimal,
    ) {
        self.practice_percentage = value;
    }

    fn is_enabled(&self) -> bool {
        self.is_enabled
    }
}

/// What an activity edit did to the rest of the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Redistribution {
    /// The budget had room; only the edited activity changed.
    Unchanged,
    /// Every enabled activity was multiplied by `scale_factor`.
    Rescaled { scale_factor: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentKind {
    Activity,
    NonRd,
    Available,
}

/// One bar of the time budget visualisation.
///
/// `percentage` is the owner's value, `width` is what fits in the bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSegment {
    pub id: String,
    pub name: String,
    pub kind: SegmentKind,
    pub percentage: Decimal,
    pub start_position: Decimal,
    pub width: Decimal,
}

/// The practice time budget of a business year or entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AllocationBudget {
    non_rd_percentage: Decimal,
}

impl AllocationBudget {
    pub fn new(non_rd_percentage: Decimal) -> Self {
        Self {
            non_rd_percentage: clamp_percentage(non_rd_percentage),
        }
    }

    pub fn non_rd_percentage(&self) -> Decimal {
        self.non_rd_percentage
    }

    /// Sets the non-R&D slice without touching the activities.
    ///
    /// An over-budget state is logged and left for the next activity edit to
    /// reconcile.
    pub fn set_non_rd_percentage<T: PracticeShare>(
        &mut self,
        activities: &[T],
        value: Decimal,
    ) {
        self.non_rd_percentage = clamp_percentage(value);

        let total = self.total(activities);
        if total > Decimal::ONE_HUNDRED {
            warn!(
                non_rd = %self.non_rd_percentage,
                total = %total,
                "time budget exceeds 100% until the next activity edit"
            );
        }
    }

    /// Enabled practice percentages plus the non-R&D slice.
    pub fn total<T: PracticeShare>(
        &self,
        activities: &[T],
    ) -> Decimal {
        enabled_total(activities) + self.non_rd_percentage
    }

    /// Sets one activity's practice percentage and rescales the enabled
    /// activities when the budget overflows.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::UnknownActivity`] when no activity has the
    /// given id. Nothing is modified in that case.
    pub fn set_activity_practice_percentage<T: PracticeShare>(
        &self,
        activities: &mut [T],
        activity_id: &str,
        value: Decimal,
    ) -> Result<Redistribution, AllocationError> {
        let target = activities
            .iter_mut()
            .find(|a| a.share_id() == activity_id)
            .ok_or_else(|| AllocationError::UnknownActivity(activity_id.to_string()))?;
        target.set_practice_percentage(clamp_percentage(value));

        let outcome = self.reconcile(activities);
        if let Redistribution::Rescaled { scale_factor } = outcome {
            debug!(activity_id, scale_factor = %scale_factor, "rescaled practice percentages");
        }
        Ok(outcome)
    }

    /// Brings an over-budget set of activities back to 100%.
    ///
    /// Enabled activities are scaled by `(100 - non_rd) / total_enabled` and
    /// rounded to the cent. Cents lost to rounding go back one at a time to
    /// the activities with the largest remainders, so the enabled total lands
    /// exactly on `100 - non_rd`.
    pub fn reconcile<T: PracticeShare>(
        &self,
        activities: &mut [T],
    ) -> Redistribution {
        let total_enabled = enabled_total(activities);
        if total_enabled + self.non_rd_percentage <= Decimal::ONE_HUNDRED {
            return Redistribution::Unchanged;
        }
        if total_enabled.is_zero() {
            return Redistribution::Unchanged;
        }

        let room = Decimal::ONE_HUNDRED - self.non_rd_percentage;
        let scale_factor = room / total_enabled;

        let mut remainders = Vec::new();
        let mut rounded_total = Decimal::ZERO;
        for (index, activity) in activities.iter_mut().enumerate() {
            if !activity.is_enabled() {
                continue;
            }
            let exact = activity.practice_percentage() * scale_factor;
            let floored = exact.round_dp_with_strategy(2, RoundingStrategy::ToZero);
            activity.set_practice_percentage(floored);
            rounded_total += floored;
            remainders.push((index, exact - floored));
        }

        // Stable sort keeps earlier activities first on equal remainders
        remainders.sort_by(|a, b| b.1.cmp(&a.1));
        let mut leftover = room - rounded_total;
        for (index, _) in remainders {
            if leftover < CENT {
                break;
            }
            let activity = &mut activities[index];
            activity.set_practice_percentage(activity.practice_percentage() + CENT);
            leftover -= CENT;
        }

        debug!(
            total_enabled = %total_enabled,
            room = %room,
            "reconciled time budget"
        );
        Redistribution::Rescaled { scale_factor }
    }

    /// Lays the budget out as contiguous segments.
    ///
    /// Enabled activities come first in their given order, then the non-R&D
    /// slice, then the unallocated remainder. Zero-width segments are
    /// omitted. Widths are clipped so the bar never runs past 100.
    pub fn segments<T: PracticeShare>(
        &self,
        activities: &[T],
    ) -> Vec<AllocationSegment> {
        let mut segments = Vec::new();
        let mut position = Decimal::ZERO;

        for activity in activities.iter().filter(|a| a.is_enabled()) {
            push_segment(
                &mut segments,
                &mut position,
                activity.share_id(),
                activity.share_name(),
                SegmentKind::Activity,
                activity.practice_percentage(),
            );
        }
        push_segment(
            &mut segments,
            &mut position,
            NON_RD_SEGMENT_ID,
            "Non-R&D Time",
            SegmentKind::NonRd,
            self.non_rd_percentage,
        );

        let remaining = Decimal::ONE_HUNDRED - position;
        push_segment(
            &mut segments,
            &mut position,
            AVAILABLE_SEGMENT_ID,
            "Available Time",
            SegmentKind::Available,
            remaining,
        );

        segments
    }
}

fn push_segment(
    segments: &mut Vec<AllocationSegment>,
    position: &mut Decimal,
    id: &str,
    name: &str,
    kind: SegmentKind,
    percentage: Decimal,
) {
    let width = percentage.min(Decimal::ONE_HUNDRED - *position);
    if width <= Decimal::ZERO {
        return;
    }
    segments.push(AllocationSegment {
        id: id.to_string(),
        name: name.to_string(),
        kind,
        percentage,
        start_position: *position,
        width,
    });
    *position += width;
}

fn enabled_total<T: PracticeShare>(activities: &[T]) -> Decimal {
    activities
        .iter()
        .filter(|a| a.is_enabled())
        .map(|a| a.practice_percentage())
        .sum()
}
