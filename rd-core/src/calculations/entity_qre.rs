//! Qualified research expense per entity.
//!
//! # Calculation
//!
//! | Step | Description |
//! |------|-------------|
//! | 1    | Sum the stored applied percentage of every included allocation |
//! | 2    | Fall back to the role baseline when the entity has no included allocation |
//! | 3    | Apply the 80% threshold rule |
//! | 4    | QRE = cost basis × effective percentage / 100 |
//! | 5    | Contractors keep 65% of that amount |
//!
//! The applied percentages are trusted as stored. Whoever edits an allocation
//! recomputes its applied value before handing it here.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use rd_core::EntityKind;
//! use rd_core::calculations::entity_qre::calculate_entity_qre;
//!
//! // No allocations yet, so the role baseline of 40% applies.
//! let result = calculate_entity_qre(dec!(85000), &[], EntityKind::Contractor, Some(dec!(40)));
//!
//! assert_eq!(result.effective_percentage, dec!(40));
//! assert_eq!(result.qre, dec!(22100));
//! ```

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calculations::common::{round_half_up, round_to_dollar};
use crate::calculations::percentage::{clamp_percentage, effective_percentage};
use crate::models::{
    BusinessYear, EntityKind, EntitySubcomponentAllocation, EntityYearRecord, LockedQre,
    SelectedActivity,
};

/// Share of a contract amount that counts toward QRE.
pub const CONTRACTOR_QRE_FACTOR: Decimal = dec!(0.65);

/// Result of one entity's QRE calculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityQreResult {
    /// Sum of included applied percentages, or the role baseline.
    pub total_applied: Decimal,
    /// `total_applied` after the 80% threshold rule.
    pub effective_percentage: Decimal,
    /// Unrounded QRE in dollars.
    pub qre: Decimal,
    /// True when the role baseline stood in for missing allocations.
    pub used_baseline: bool,
}

impl EntityQreResult {
    /// The record written back to storage after a recalculation.
    ///
    /// Both values are rounded to the cent.
    pub fn to_year_record(
        &self,
        entity_id: &str,
        business_year_id: &str,
    ) -> EntityYearRecord {
        EntityYearRecord {
            entity_id: entity_id.to_string(),
            business_year_id: business_year_id.to_string(),
            calculated_qre: round_half_up(self.qre),
            applied_percent: round_half_up(self.total_applied),
        }
    }
}

/// Computes one entity's QRE for a business year.
///
/// The role baseline is only used when the entity has no included allocation
/// at all. Included allocations that sum to zero are a deliberate zero and
/// stay zero. Negative cost bases are treated as zero.
pub fn calculate_entity_qre(
    cost_basis: Decimal,
    allocations: &[EntitySubcomponentAllocation],
    kind: EntityKind,
    baseline_applied_percent: Option<Decimal>,
) -> EntityQreResult {
    let included: Vec<&EntitySubcomponentAllocation> =
        allocations.iter().filter(|a| a.is_included).collect();

    let (total_applied, used_baseline) = match baseline_applied_percent {
        Some(baseline) if included.is_empty() => (clamp_percentage(baseline), true),
        _ => (
            included.iter().map(|a| a.applied_percentage).sum::<Decimal>(),
            false,
        ),
    };

    let effective = effective_percentage(total_applied);
    let mut qre = cost_basis.max(Decimal::ZERO) * effective / Decimal::ONE_HUNDRED;
    if kind == EntityKind::Contractor {
        qre *= CONTRACTOR_QRE_FACTOR;
    }

    debug!(
        kind = kind.as_str(),
        total_applied = %total_applied,
        effective = %effective,
        qre = %qre,
        used_baseline,
        "calculated entity QRE"
    );

    EntityQreResult {
        total_applied,
        effective_percentage: effective,
        qre,
        used_baseline,
    }
}

/// Builds an entity's allocations from the business year's selections.
///
/// Used when an entity is added or its role changes. Every included
/// subcomponent of every enabled activity that applies to the role gets one
/// allocation, seeded from the activity and subcomponent values. The
/// `baseline_*` fields record those seed values.
pub fn baseline_allocations(
    entity_id: &str,
    business_year_id: &str,
    role_id: Option<&str>,
    activities: &[SelectedActivity],
) -> Vec<EntitySubcomponentAllocation> {
    let mut allocations = Vec::new();
    for activity in activities.iter().filter(|a| a.is_enabled) {
        for sub in activity.subcomponents.iter().filter(|s| s.is_included) {
            let applies = match role_id {
                Some(role) => sub.applies_to_role(role),
                None => sub.selected_roles.is_empty(),
            };
            if !applies {
                continue;
            }

            let mut allocation = EntitySubcomponentAllocation {
                entity_id: entity_id.to_string(),
                business_year_id: business_year_id.to_string(),
                activity_id: activity.activity_id.clone(),
                subcomponent_id: sub.subcomponent_id.clone(),
                is_included: true,
                time_percentage: sub.time_percentage,
                year_percentage: sub.year_percentage,
                frequency_percentage: sub.frequency_percentage,
                practice_percentage: activity.practice_percentage,
                applied_percentage: Decimal::ZERO,
                baseline_applied_percent: Decimal::ZERO,
                baseline_time_percentage: sub.time_percentage,
                baseline_practice_percentage: activity.practice_percentage,
            };
            allocation.recompute_applied();
            allocation.baseline_applied_percent = allocation.applied_percentage;
            allocations.push(allocation);
        }
    }
    allocations
}

/// QRE of a business year split by expense category.
///
/// Each category is rounded to the whole dollar and `total` is the sum of the
/// rounded categories.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QreBreakdown {
    pub employee_wages: Decimal,
    pub contractor_costs: Decimal,
    pub supply_costs: Decimal,
    pub total: Decimal,
    pub locked: bool,
}

impl QreBreakdown {
    /// Sums entity results per category.
    pub fn from_results<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = (EntityKind, &'a EntityQreResult)>,
    {
        let mut employee = Decimal::ZERO;
        let mut contractor = Decimal::ZERO;
        let mut supply = Decimal::ZERO;
        for (kind, result) in results {
            match kind {
                EntityKind::Employee => employee += result.qre,
                EntityKind::Contractor => contractor += result.qre,
                EntityKind::Supply => supply += result.qre,
            }
        }
        Self::from_parts(employee, contractor, supply, false)
    }

    pub fn from_locked(locked: &LockedQre) -> Self {
        Self::from_parts(
            locked.employee_qre,
            locked.contractor_qre,
            locked.supply_qre,
            true,
        )
    }

    /// Locked values win over the calculated results.
    pub fn for_business_year<'a, I>(
        business_year: &BusinessYear,
        results: I,
    ) -> Self
    where
        I: IntoIterator<Item = (EntityKind, &'a EntityQreResult)>,
    {
        match &business_year.locked_qre {
            Some(locked) => Self::from_locked(locked),
            None => Self::from_results(results),
        }
    }

    fn from_parts(
        employee: Decimal,
        contractor: Decimal,
        supply: Decimal,
        locked: bool,
    ) -> Self {
        let employee_wages = round_to_dollar(employee);
        let contractor_costs = round_to_dollar(contractor);
        let supply_costs = round_to_dollar(supply);
        Self {
            employee_wages,
            contractor_costs,
            supply_costs,
            total: employee_wages + contractor_costs + supply_costs,
            locked,
        }
    }
}
