use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::calculations::common::round_half_up;
use crate::calculations::percentage::applied_percentage;

/// Which kind of expense an entity contributes to the QRE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Employee,
    Contractor,
    Supply,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::Contractor => "contractor",
            Self::Supply => "supply",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "employee" => Some(Self::Employee),
            "contractor" => Some(Self::Contractor),
            "supply" => Some(Self::Supply),
            _ => None,
        }
    }
}

/// An employee, contractor or supply.
///
/// `cost_basis` is the annual wage for an employee, the contract amount for
/// a contractor and the annual cost for a supply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub business_id: String,
    pub name: String,
    pub kind: EntityKind,
    pub cost_basis: Decimal,
    pub role_id: Option<String>,
    /// Time spent outside research. Anchors the entity's practice budget the
    /// same way the business year's non-R&D share anchors its own.
    #[serde(default)]
    pub non_rd_percentage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub business_year_id: String,
    pub name: String,
    /// Used when an entity has no custom allocation yet.
    pub baseline_applied_percent: Option<Decimal>,
}

/// An entity's allocation to one subcomponent for one business year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySubcomponentAllocation {
    pub entity_id: String,
    pub business_year_id: String,
    pub activity_id: String,
    pub subcomponent_id: String,
    pub is_included: bool,
    pub time_percentage: Decimal,
    pub year_percentage: Decimal,
    pub frequency_percentage: Decimal,
    pub practice_percentage: Decimal,
    pub applied_percentage: Decimal,
    pub baseline_applied_percent: Decimal,
    pub baseline_time_percentage: Decimal,
    pub baseline_practice_percentage: Decimal,
}

impl EntitySubcomponentAllocation {
    /// Recomputes the stored applied percentage from the four terms.
    pub fn recompute_applied(&mut self) {
        self.applied_percentage = if self.is_included {
            round_half_up(applied_percentage(
                self.practice_percentage,
                self.year_percentage,
                self.frequency_percentage,
                self.time_percentage,
            ))
        } else {
            Decimal::ZERO
        };
    }
}

/// The per-entity values written back after every recalculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityYearRecord {
    pub entity_id: String,
    pub business_year_id: String,
    pub calculated_qre: Decimal,
    pub applied_percent: Decimal,
}
