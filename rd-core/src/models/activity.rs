use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::calculations::percentage::{
    applied_percentage, clamp_percentage, year_percentage_for_start_month,
};
use crate::calculations::common::round_half_up;

/// A qualified research activity from the research catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchActivity {
    pub id: String,
    pub name: String,
    pub focus_id: String,
    pub subcomponents: Vec<Subcomponent>,
}

/// A catalog subcomponent with its baseline percentages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subcomponent {
    pub id: String,
    pub activity_id: String,
    pub name: String,
    pub time_percentage: Decimal,
    pub frequency_percentage: Decimal,

    // Descriptive only
    pub hypothesis: Option<String>,
    pub methodology: Option<String>,
}

/// A research activity selected for one business year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedActivity {
    pub id: String,
    pub business_year_id: String,
    pub year: i32,
    pub activity_id: String,
    pub name: String,
    /// Share of total practice time devoted to this activity (0-100).
    pub practice_percentage: Decimal,
    pub is_enabled: bool,
    pub subcomponents: Vec<SelectedSubcomponent>,
}

/// Per-year allocation of a catalog subcomponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedSubcomponent {
    pub id: String,
    pub subcomponent_id: String,
    pub name: String,
    pub is_included: bool,
    pub time_percentage: Decimal,
    pub year_percentage: Decimal,
    pub frequency_percentage: Decimal,
    /// Implementation start month (1 = January), drives `year_percentage`.
    pub start_month: u32,
    /// Derived from the activity practice percentage and the three
    /// subcomponent terms. Never set directly.
    pub applied_percentage: Decimal,
    /// Role ids this subcomponent applies to. Empty means every role.
    pub selected_roles: Vec<String>,
}

impl SelectedActivity {
    /// Seeds a selection from a catalog activity using its baseline values.
    ///
    /// Every subcomponent starts included with a January start month.
    pub fn from_catalog(
        activity: &ResearchActivity,
        business_year_id: &str,
        year: i32,
        practice_percentage: Decimal,
    ) -> Self {
        let id = format!("{}-{}", activity.id, year);
        let subcomponents = activity
            .subcomponents
            .iter()
            .map(|sub| SelectedSubcomponent {
                id: format!("{}-{}", sub.id, year),
                subcomponent_id: sub.id.clone(),
                name: sub.name.clone(),
                is_included: true,
                time_percentage: clamp_percentage(sub.time_percentage),
                year_percentage: Decimal::ONE_HUNDRED,
                frequency_percentage: clamp_percentage(sub.frequency_percentage),
                start_month: 1,
                applied_percentage: Decimal::ZERO,
                selected_roles: Vec::new(),
            })
            .collect();

        let mut selected = Self {
            id,
            business_year_id: business_year_id.to_string(),
            year,
            activity_id: activity.id.clone(),
            name: activity.name.clone(),
            practice_percentage: clamp_percentage(practice_percentage),
            is_enabled: true,
            subcomponents,
        };
        selected.recompute_applied();
        selected
    }

    /// Recomputes the stored applied percentage of every subcomponent.
    pub fn recompute_applied(&mut self) {
        let practice = self.practice_percentage;
        for sub in &mut self.subcomponents {
            sub.recompute_applied(practice);
        }
    }

    /// Sum of applied percentages over included subcomponents.
    pub fn applied_total(&self) -> Decimal {
        self.subcomponents
            .iter()
            .filter(|s| s.is_included)
            .map(|s| s.applied_percentage)
            .sum()
    }

    pub fn subcomponent_mut(
        &mut self,
        subcomponent_id: &str,
    ) -> Option<&mut SelectedSubcomponent> {
        self.subcomponents
            .iter_mut()
            .find(|s| s.subcomponent_id == subcomponent_id)
    }
}

impl SelectedSubcomponent {
    /// Recomputes `applied_percentage` against the owning activity's practice
    /// percentage. Excluded subcomponents contribute zero.
    pub fn recompute_applied(
        &mut self,
        practice_percentage: Decimal,
    ) {
        self.applied_percentage = if self.is_included {
            round_half_up(applied_percentage(
                practice_percentage,
                self.year_percentage,
                self.frequency_percentage,
                self.time_percentage,
            ))
        } else {
            Decimal::ZERO
        };
    }

    /// Resets the start month and the year percentage derived from it.
    ///
    /// Months outside 1..=12 leave the subcomponent untouched and return
    /// `false`.
    pub fn set_start_month(
        &mut self,
        month: u32,
    ) -> bool {
        match year_percentage_for_start_month(month) {
            Ok(percentage) => {
                self.start_month = month;
                self.year_percentage = percentage;
                true
            }
            Err(_) => false,
        }
    }

    /// True when this subcomponent applies to the given role.
    pub fn applies_to_role(
        &self,
        role_id: &str,
    ) -> bool {
        self.selected_roles.is_empty() || self.selected_roles.iter().any(|r| r == role_id)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;

    fn catalog_activity() -> ResearchActivity {
        ResearchActivity {
            id: "act-1".to_string(),
            name: "Implant protocol design".to_string(),
            focus_id: "focus-1".to_string(),
            subcomponents: vec![
                Subcomponent {
                    id: "sub-1".to_string(),
                    activity_id: "act-1".to_string(),
                    name: "Guide fabrication".to_string(),
                    time_percentage: dec!(50),
                    frequency_percentage: dec!(40),
                    hypothesis: None,
                    methodology: None,
                },
                Subcomponent {
                    id: "sub-2".to_string(),
                    activity_id: "act-1".to_string(),
                    name: "Outcome tracking".to_string(),
                    time_percentage: dec!(25),
                    frequency_percentage: dec!(80),
                    hypothesis: Some("Fewer revisions".to_string()),
                    methodology: None,
                },
            ],
        }
    }

    #[test]
    fn from_catalog_seeds_baseline_values() {
        let selected = SelectedActivity::from_catalog(&catalog_activity(), "by-2024", 2024, dec!(50));

        assert_eq!(selected.id, "act-1-2024");
        assert_eq!(selected.subcomponents.len(), 2);
        assert_eq!(selected.subcomponents[0].id, "sub-1-2024");
        assert_eq!(selected.subcomponents[0].year_percentage, dec!(100));
        assert!(selected.subcomponents.iter().all(|s| s.is_included));
    }

    #[test]
    fn from_catalog_computes_applied() {
        let selected = SelectedActivity::from_catalog(&catalog_activity(), "by-2024", 2024, dec!(50));

        // 50 * 100 * 40 * 50 / 1_000_000 = 10
        assert_eq!(selected.subcomponents[0].applied_percentage, dec!(10));
        // 50 * 100 * 80 * 25 / 1_000_000 = 10
        assert_eq!(selected.subcomponents[1].applied_percentage, dec!(10));
        assert_eq!(selected.applied_total(), dec!(20));
    }

    #[test]
    fn excluded_subcomponent_contributes_zero() {
        let mut selected =
            SelectedActivity::from_catalog(&catalog_activity(), "by-2024", 2024, dec!(50));
        selected.subcomponents[1].is_included = false;

        selected.recompute_applied();

        assert_eq!(selected.subcomponents[1].applied_percentage, dec!(0));
        assert_eq!(selected.applied_total(), dec!(10));
    }

    #[test]
    fn set_start_month_updates_year_percentage() {
        let mut selected =
            SelectedActivity::from_catalog(&catalog_activity(), "by-2024", 2024, dec!(50));
        let sub = &mut selected.subcomponents[0];

        assert!(sub.set_start_month(7));

        assert_eq!(sub.start_month, 7);
        assert_eq!(sub.year_percentage, dec!(50));
    }

    #[test]
    fn set_start_month_rejects_invalid_month() {
        let mut selected =
            SelectedActivity::from_catalog(&catalog_activity(), "by-2024", 2024, dec!(50));
        let sub = &mut selected.subcomponents[0];

        assert!(!sub.set_start_month(13));

        assert_eq!(sub.start_month, 1);
        assert_eq!(sub.year_percentage, dec!(100));
    }

    #[test]
    fn applies_to_role_when_roles_empty_or_listed() {
        let mut selected =
            SelectedActivity::from_catalog(&catalog_activity(), "by-2024", 2024, dec!(50));
        let sub = &mut selected.subcomponents[0];

        assert!(sub.applies_to_role("hygienist"));

        sub.selected_roles = vec!["dentist".to_string()];

        assert!(sub.applies_to_role("dentist"));
        assert!(!sub.applies_to_role("hygienist"));
    }
}
