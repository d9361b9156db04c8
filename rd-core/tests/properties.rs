use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use rd_core::calculations::allocation::{AllocationBudget, Redistribution};
use rd_core::calculations::entity_qre::{CONTRACTOR_QRE_FACTOR, calculate_entity_qre};
use rd_core::calculations::percentage::{applied_percentage, effective_percentage};
use rd_core::{
    EntityKind, EntitySubcomponentAllocation, ResearchActivity, SelectedActivity,
};

/// Percentages with two decimal places in 0..=100.
fn arb_percentage() -> impl Strategy<Value = Decimal> {
    (0i64..=10_000).prop_map(|v| Decimal::new(v, 2))
}

fn arb_cost() -> impl Strategy<Value = Decimal> {
    (0i64..=50_000_000).prop_map(|v| Decimal::new(v, 2))
}

fn activity(
    index: usize,
    practice: Decimal,
) -> SelectedActivity {
    let catalog = ResearchActivity {
        id: format!("act-{index}"),
        name: format!("Activity {index}"),
        focus_id: "focus-1".to_string(),
        subcomponents: Vec::new(),
    };
    SelectedActivity::from_catalog(&catalog, "by-2024", 2024, practice)
}

fn allocation(applied: Decimal) -> EntitySubcomponentAllocation {
    EntitySubcomponentAllocation {
        entity_id: "ent-1".to_string(),
        business_year_id: "by-2024".to_string(),
        activity_id: "act-0".to_string(),
        subcomponent_id: "sub-0".to_string(),
        is_included: true,
        time_percentage: dec!(0),
        year_percentage: dec!(0),
        frequency_percentage: dec!(0),
        practice_percentage: dec!(0),
        applied_percentage: applied,
        baseline_applied_percent: dec!(0),
        baseline_time_percentage: dec!(0),
        baseline_practice_percentage: dec!(0),
    }
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(512))]

    // Applied percentage
    #[test]
    fn applied_stays_within_bounds(
        p in arb_percentage(),
        y in arb_percentage(),
        f in arb_percentage(),
        t in arb_percentage(),
    ) {
        let applied = applied_percentage(p, y, f, t);
        prop_assert!(applied >= Decimal::ZERO);
        prop_assert!(applied <= Decimal::ONE_HUNDRED);
    }

    #[test]
    fn applied_is_monotonic_in_each_term(
        p in arb_percentage(),
        y in arb_percentage(),
        f in arb_percentage(),
        t in arb_percentage(),
        bump in arb_percentage(),
    ) {
        let base = applied_percentage(p, y, f, t);
        let raised = (p + bump).min(Decimal::ONE_HUNDRED);
        prop_assert!(applied_percentage(raised, y, f, t) >= base);
        prop_assert!(applied_percentage(p, raised, f, t) >= base);
        let raised_t = (t + bump).min(Decimal::ONE_HUNDRED);
        prop_assert!(applied_percentage(p, y, f, raised_t) >= base);
    }

    #[test]
    fn applied_is_zero_when_any_term_is_zero(
        p in arb_percentage(),
        y in arb_percentage(),
        f in arb_percentage(),
    ) {
        prop_assert_eq!(applied_percentage(p, y, f, Decimal::ZERO), Decimal::ZERO);
        prop_assert_eq!(applied_percentage(Decimal::ZERO, y, f, p), Decimal::ZERO);
    }

    // Threshold
    #[test]
    fn effective_percentage_is_idempotent(applied in arb_percentage()) {
        let once = effective_percentage(applied);
        prop_assert_eq!(effective_percentage(once), once);
        prop_assert!(once >= applied);
    }

    // Redistribution
    #[test]
    fn redistribution_keeps_budget_within_100(
        practices in prop::collection::vec(arb_percentage(), 1..6),
        non_rd in arb_percentage(),
        edited in any::<prop::sample::Index>(),
        value in arb_percentage(),
    ) {
        let mut activities: Vec<SelectedActivity> = practices
            .iter()
            .enumerate()
            .map(|(i, p)| activity(i, *p))
            .collect();
        let mut budget = AllocationBudget::new(Decimal::ZERO);
        budget.set_non_rd_percentage(&activities, non_rd);
        let edited = edited.index(activities.len());
        let id = activities[edited].activity_id.clone();
        let requested_total: Decimal = practices
            .iter()
            .enumerate()
            .map(|(i, p)| if i == edited { value } else { *p })
            .sum::<Decimal>()
            + non_rd;

        let outcome = budget.set_activity_practice_percentage(&mut activities, &id, value).unwrap();

        let total = budget.total(&activities);
        prop_assert!(total <= Decimal::ONE_HUNDRED + dec!(0.01));
        if requested_total > Decimal::ONE_HUNDRED {
            prop_assert_eq!(total, Decimal::ONE_HUNDRED);
            prop_assert!(matches!(outcome, Redistribution::Rescaled { .. }), "expected Redistribution::Rescaled");
        } else {
            prop_assert_eq!(outcome, Redistribution::Unchanged);
        }
    }

    // Contractor reduction
    #[test]
    fn contractor_qre_is_65_percent_of_employee_qre(
        cost in arb_cost(),
        applied in arb_percentage(),
    ) {
        let allocations = vec![allocation(applied)];

        let employee = calculate_entity_qre(cost, &allocations, EntityKind::Employee, None);
        let contractor = calculate_entity_qre(cost, &allocations, EntityKind::Contractor, None);

        prop_assert_eq!(contractor.qre, employee.qre * CONTRACTOR_QRE_FACTOR);
    }
}
