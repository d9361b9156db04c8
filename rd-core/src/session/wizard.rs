//! Editing state for one business year.
//!
//! A [`WizardSession`] owns everything an editor touches while working on a
//! business year and keeps derived values consistent after every edit:
//! applied percentages are recomputed, disabled or removed activities take
//! their entity allocations with them, and entity recalculations produce the
//! records to write back.
//!
//! Each entity also has its own practice budget, anchored by its non-R&D
//! share and kept within 100% the same way the business year's is.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info};

use crate::calculations::allocation::{
    AllocationBudget, AllocationError, AllocationSegment, PracticeShare, Redistribution,
};
use crate::calculations::carry_forward::{
    CarryForwardError, CarryForwardRequest, CarryForwardTarget, copy_activities_to_previous_years,
};
use crate::calculations::entity_qre::{
    EntityQreResult, QreBreakdown, baseline_allocations, calculate_entity_qre,
};
use crate::calculations::percentage::{PercentageError, clamp_percentage};
use crate::models::{
    BusinessYear, Entity, EntitySubcomponentAllocation, EntityYearRecord, Role, SelectedActivity,
};
use crate::session::debounce::DebouncedEdits;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Percentage(#[from] PercentageError),

    #[error(transparent)]
    CarryForward(#[from] CarryForwardError),
}

/// Partial edit of a selected subcomponent. `None` leaves a field as is.
///
/// Start month, frequency and inclusion carry into every entity allocation
/// under the subcomponent. A time edit does too, replacing entity values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubcomponentUpdate {
    pub is_included: Option<bool>,
    pub time_percentage: Option<Decimal>,
    pub frequency_percentage: Option<Decimal>,
    pub start_month: Option<u32>,
}

/// Partial edit of one entity allocation.
///
/// Practice is an activity-level share of the entity's time, so a practice
/// edit applies to every allocation of the entity under that activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationUpdate {
    pub is_included: Option<bool>,
    pub time_percentage: Option<Decimal>,
    pub practice_percentage: Option<Decimal>,
}

/// Result of an edit: what happened to the time budget, how many entity
/// allocations went away and the records of every entity it touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEdit {
    pub redistribution: Redistribution,
    pub removed_allocations: usize,
    pub records: Vec<EntityYearRecord>,
}

/// One activity's slice of an entity's practice time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityPracticeShare {
    pub activity_id: String,
    pub name: String,
    pub practice_percentage: Decimal,
    pub is_enabled: bool,
}

impl PracticeShare for EntityPracticeShare {
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

#[derive(Debug, Clone)]
pub struct WizardSession {
    business_year: BusinessYear,
    budget: AllocationBudget,
    activities: Vec<SelectedActivity>,
    roles: Vec<Role>,
    entities: Vec<Entity>,
    allocations: Vec<EntitySubcomponentAllocation>,
    pending_costs: DebouncedEdits<String, Decimal>,
}

impl WizardSession {
    pub fn new(
        business_year: BusinessYear,
        activities: Vec<SelectedActivity>,
        roles: Vec<Role>,
        entities: Vec<Entity>,
        allocations: Vec<EntitySubcomponentAllocation>,
        debounce: Duration,
    ) -> Self {
        let budget = AllocationBudget::new(business_year.non_rd_percentage);
        Self {
            business_year,
            budget,
            activities,
            roles,
            entities,
            allocations,
            pending_costs: DebouncedEdits::new(debounce),
        }
    }

    pub fn business_year(&self) -> &BusinessYear {
        &self.business_year
    }

    pub fn activities(&self) -> &[SelectedActivity] {
        &self.activities
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn allocations(&self) -> &[EntitySubcomponentAllocation] {
        &self.allocations
    }

    pub fn entity_allocations(
        &self,
        entity_id: &str,
    ) -> Vec<&EntitySubcomponentAllocation> {
        self.allocations
            .iter()
            .filter(|a| a.entity_id == entity_id)
            .collect()
    }

    pub fn budget(&self) -> &AllocationBudget {
        &self.budget
    }

    pub fn segments(&self) -> Vec<AllocationSegment> {
        self.budget.segments(&self.activities)
    }

    // ---------------------------------------------------------------------
    // Activity edits
    // ---------------------------------------------------------------------

    /// Sets an activity's practice percentage, rescaling the others when the
    /// budget overflows.
    ///
    /// Every changed activity carries its practice into the entity
    /// allocations under it. Entities whose own budget overflows as a result
    /// are rescaled, and every touched entity is recalculated.
    pub fn set_activity_practice_percentage(
        &mut self,
        activity_id: &str,
        value: Decimal,
    ) -> Result<SessionEdit, SessionError> {
        let redistribution =
            self.budget
                .set_activity_practice_percentage(&mut self.activities, activity_id, value)?;
        let affected = self.sync_activity_practice(redistribution, activity_id)?;

        Ok(SessionEdit {
            redistribution,
            removed_allocations: 0,
            records: self.recalculate_entities(&affected)?,
        })
    }

    /// Moves the non-R&D anchor. Activities are left alone.
    pub fn set_non_rd_percentage(
        &mut self,
        value: Decimal,
    ) {
        self.budget.set_non_rd_percentage(&self.activities, value);
        self.business_year.non_rd_percentage = self.budget.non_rd_percentage();
    }

    pub fn update_subcomponent(
        &mut self,
        activity_id: &str,
        subcomponent_id: &str,
        update: SubcomponentUpdate,
    ) -> Result<SessionEdit, SessionError> {
        let activity = self.activity_mut(activity_id)?;
        let practice = activity.practice_percentage;
        let sub = activity.subcomponent_mut(subcomponent_id).ok_or_else(|| {
            AllocationError::UnknownSubcomponent {
                activity_id: activity_id.to_string(),
                subcomponent_id: subcomponent_id.to_string(),
            }
        })?;

        if let Some(month) = update.start_month {
            if !sub.set_start_month(month) {
                return Err(PercentageError::InvalidStartMonth(month).into());
            }
        }
        if let Some(included) = update.is_included {
            sub.is_included = included;
        }
        if let Some(time) = update.time_percentage {
            sub.time_percentage = clamp_percentage(time);
        }
        if let Some(frequency) = update.frequency_percentage {
            sub.frequency_percentage = clamp_percentage(frequency);
        }
        sub.recompute_applied(practice);
        debug!(activity_id, subcomponent_id, applied = %sub.applied_percentage, "updated subcomponent");

        let year = sub.year_percentage;
        let frequency = sub.frequency_percentage;
        let time = update.time_percentage.map(|_| sub.time_percentage);

        let mut affected = BTreeSet::new();
        for allocation in &mut self.allocations {
            if allocation.activity_id != activity_id || allocation.subcomponent_id != subcomponent_id {
                continue;
            }
            allocation.year_percentage = year;
            allocation.frequency_percentage = frequency;
            if let Some(time) = time {
                allocation.time_percentage = time;
            }
            if let Some(included) = update.is_included {
                allocation.is_included = included;
            }
            allocation.recompute_applied();
            affected.insert(allocation.entity_id.clone());
        }

        Ok(SessionEdit {
            redistribution: Redistribution::Unchanged,
            removed_allocations: 0,
            records: self.recalculate_entities(&affected)?,
        })
    }

    /// Enables or disables an activity.
    ///
    /// Disabling deletes the entity allocations under it. Enabling can
    /// overflow the budget, in which case the enabled activities are
    /// rescaled as for a practice edit.
    pub fn set_activity_enabled(
        &mut self,
        activity_id: &str,
        enabled: bool,
    ) -> Result<SessionEdit, SessionError> {
        self.activity_mut(activity_id)?.is_enabled = enabled;

        if enabled {
            let redistribution = self.budget.reconcile(&mut self.activities);
            let affected = self.sync_activity_practice(redistribution, activity_id)?;
            return Ok(SessionEdit {
                redistribution,
                removed_allocations: 0,
                records: self.recalculate_entities(&affected)?,
            });
        }

        let affected = self.entities_under_activity(activity_id);
        let removed_allocations = self.remove_allocations_for_activity(activity_id);
        Ok(SessionEdit {
            redistribution: Redistribution::Unchanged,
            removed_allocations,
            records: self.recalculate_entities(&affected)?,
        })
    }

    /// Removes an activity and the entity allocations under it.
    pub fn remove_activity(
        &mut self,
        activity_id: &str,
    ) -> Result<SessionEdit, SessionError> {
        let index = self
            .activities
            .iter()
            .position(|a| a.activity_id == activity_id)
            .ok_or_else(|| AllocationError::UnknownActivity(activity_id.to_string()))?;
        self.activities.remove(index);

        let affected = self.entities_under_activity(activity_id);
        let removed_allocations = self.remove_allocations_for_activity(activity_id);
        Ok(SessionEdit {
            redistribution: Redistribution::Unchanged,
            removed_allocations,
            records: self.recalculate_entities(&affected)?,
        })
    }

    // ---------------------------------------------------------------------
    // Entity edits
    // ---------------------------------------------------------------------

    /// The entity's practice share under each activity it is allocated to,
    /// in activity order.
    pub fn entity_practice_shares(
        &self,
        entity_id: &str,
    ) -> Result<Vec<EntityPracticeShare>, SessionError> {
        self.entity(entity_id)?;

        let shares = self
            .activities
            .iter()
            .filter_map(|activity| {
                self.allocations
                    .iter()
                    .find(|a| a.entity_id == entity_id && a.activity_id == activity.activity_id)
                    .map(|allocation| EntityPracticeShare {
                        activity_id: activity.activity_id.clone(),
                        name: activity.name.clone(),
                        practice_percentage: allocation.practice_percentage,
                        is_enabled: activity.is_enabled,
                    })
            })
            .collect();
        Ok(shares)
    }

    pub fn entity_budget(
        &self,
        entity_id: &str,
    ) -> Result<AllocationBudget, SessionError> {
        Ok(AllocationBudget::new(self.entity(entity_id)?.non_rd_percentage))
    }

    pub fn entity_segments(
        &self,
        entity_id: &str,
    ) -> Result<Vec<AllocationSegment>, SessionError> {
        let shares = self.entity_practice_shares(entity_id)?;
        Ok(self.entity_budget(entity_id)?.segments(&shares))
    }

    /// Sets the entity's practice share under one activity. The entity's
    /// other shares are rescaled when its own budget overflows.
    pub fn set_entity_practice_percentage(
        &mut self,
        entity_id: &str,
        activity_id: &str,
        value: Decimal,
    ) -> Result<SessionEdit, SessionError> {
        let budget = self.entity_budget(entity_id)?;
        let mut shares = self.entity_practice_shares(entity_id)?;

        let redistribution = budget.set_activity_practice_percentage(&mut shares, activity_id, value)?;
        self.apply_entity_shares(entity_id, &shares);

        Ok(SessionEdit {
            redistribution,
            removed_allocations: 0,
            records: vec![self.recalculate_entity(entity_id)?],
        })
    }

    /// Moves the entity's non-R&D anchor. Its practice shares are left
    /// alone until the next practice edit.
    pub fn set_entity_non_rd_percentage(
        &mut self,
        entity_id: &str,
        value: Decimal,
    ) -> Result<(), SessionError> {
        let mut budget = self.entity_budget(entity_id)?;
        let shares = self.entity_practice_shares(entity_id)?;
        budget.set_non_rd_percentage(&shares, value);

        self.entity_mut(entity_id)?.non_rd_percentage = budget.non_rd_percentage();
        Ok(())
    }

    /// Assigns a role and rebuilds the entity's allocations from it.
    pub fn reassign_role(
        &mut self,
        entity_id: &str,
        role_id: Option<&str>,
    ) -> Result<EntityYearRecord, SessionError> {
        if let Some(role_id) = role_id {
            if !self.roles.iter().any(|r| r.id == role_id) {
                return Err(SessionError::UnknownRole(role_id.to_string()));
            }
        }
        self.entity_mut(entity_id)?.role_id = role_id.map(str::to_string);

        let business_year_id = self.business_year.id.clone();
        self.allocations
            .retain(|a| !(a.entity_id == entity_id && a.business_year_id == business_year_id));
        let fresh = baseline_allocations(entity_id, &business_year_id, role_id, &self.activities);
        self.allocations.extend(fresh);
        self.reconcile_entity(entity_id)?;

        self.recalculate_entity(entity_id)
    }

    /// Edits one of the entity's allocations and recalculates the entity.
    pub fn update_entity_allocation(
        &mut self,
        entity_id: &str,
        activity_id: &str,
        subcomponent_id: &str,
        update: AllocationUpdate,
    ) -> Result<EntityYearRecord, SessionError> {
        self.entity(entity_id)?;
        let position = self
            .allocations
            .iter()
            .position(|a| {
                a.entity_id == entity_id
                    && a.activity_id == activity_id
                    && a.subcomponent_id == subcomponent_id
            })
            .ok_or_else(|| AllocationError::UnknownSubcomponent {
                activity_id: activity_id.to_string(),
                subcomponent_id: subcomponent_id.to_string(),
            })?;

        if let Some(practice) = update.practice_percentage {
            self.set_entity_practice_percentage(entity_id, activity_id, practice)?;
        }

        let allocation = &mut self.allocations[position];
        if let Some(included) = update.is_included {
            allocation.is_included = included;
        }
        if let Some(time) = update.time_percentage {
            allocation.time_percentage = clamp_percentage(time);
        }
        allocation.recompute_applied();

        self.recalculate_entity(entity_id)
    }

    /// Updates the cost basis in memory at once and schedules the
    /// recalculation for when the edit has settled.
    pub fn edit_cost_basis(
        &mut self,
        entity_id: &str,
        cost_basis: Decimal,
        now: Instant,
    ) -> Result<(), SessionError> {
        self.entity_mut(entity_id)?.cost_basis = cost_basis;
        self.pending_costs
            .schedule(entity_id.to_string(), cost_basis, now);
        Ok(())
    }

    /// Recalculates every entity whose cost edit has settled at `now`.
    pub fn poll_pending(
        &mut self,
        now: Instant,
    ) -> Result<Vec<EntityYearRecord>, SessionError> {
        self.pending_costs
            .poll(now)
            .into_iter()
            .map(|(entity_id, _)| self.recalculate_entity(&entity_id))
            .collect()
    }

    /// Focus left the cost field: recalculate right away if an edit is
    /// pending.
    pub fn blur(
        &mut self,
        entity_id: &str,
    ) -> Result<Option<EntityYearRecord>, SessionError> {
        match self.pending_costs.flush(&entity_id.to_string()) {
            Some(_) => self.recalculate_entity(entity_id).map(Some),
            None => Ok(None),
        }
    }

    pub fn has_pending_edits(&self) -> bool {
        !self.pending_costs.is_empty()
    }

    // ---------------------------------------------------------------------
    // Recalculation
    // ---------------------------------------------------------------------

    pub fn calculate_entity(
        &self,
        entity_id: &str,
    ) -> Result<EntityQreResult, SessionError> {
        let entity = self.entity(entity_id)?;
        let allocations: Vec<EntitySubcomponentAllocation> = self
            .allocations
            .iter()
            .filter(|a| a.entity_id == entity_id && a.business_year_id == self.business_year.id)
            .cloned()
            .collect();
        let baseline = entity
            .role_id
            .as_deref()
            .and_then(|role_id| self.roles.iter().find(|r| r.id == role_id))
            .and_then(|role| role.baseline_applied_percent);

        Ok(calculate_entity_qre(
            entity.cost_basis,
            &allocations,
            entity.kind,
            baseline,
        ))
    }

    /// Recalculates one entity and returns the record to write back.
    pub fn recalculate_entity(
        &self,
        entity_id: &str,
    ) -> Result<EntityYearRecord, SessionError> {
        let result = self.calculate_entity(entity_id)?;
        Ok(result.to_year_record(entity_id, &self.business_year.id))
    }

    /// Recalculates every entity in order. Pending cost edits are settled
    /// by this pass.
    pub fn recalculate_all(&mut self) -> Result<Vec<EntityYearRecord>, SessionError> {
        self.pending_costs.flush_all();
        let ids: Vec<String> = self.entities.iter().map(|e| e.id.clone()).collect();
        let records = ids
            .iter()
            .map(|id| self.recalculate_entity(id))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            business_year_id = %self.business_year.id,
            entities = records.len(),
            "recalculated entity QRE"
        );
        Ok(records)
    }

    /// QRE of the business year by category, honouring locked values.
    pub fn qre_breakdown(&self) -> Result<QreBreakdown, SessionError> {
        let results = self
            .entities
            .iter()
            .map(|e| self.calculate_entity(&e.id).map(|r| (e.kind, r)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(QreBreakdown::for_business_year(
            &self.business_year,
            results.iter().map(|(kind, result)| (*kind, result)),
        ))
    }

    /// Copies this year's activities into earlier years.
    pub fn carry_forward(
        &self,
        targets: Vec<CarryForwardTarget>,
    ) -> Result<BTreeMap<i32, Vec<SelectedActivity>>, SessionError> {
        let request = CarryForwardRequest {
            base_year: self.business_year.year,
            business_start_year: self.business_year.business_start_year,
            targets,
        };
        Ok(copy_activities_to_previous_years(&request, &self.activities)?)
    }

    fn activity_mut(
        &mut self,
        activity_id: &str,
    ) -> Result<&mut SelectedActivity, AllocationError> {
        self.activities
            .iter_mut()
            .find(|a| a.activity_id == activity_id)
            .ok_or_else(|| AllocationError::UnknownActivity(activity_id.to_string()))
    }

    fn entity(
        &self,
        entity_id: &str,
    ) -> Result<&Entity, SessionError> {
        self.entities
            .iter()
            .find(|e| e.id == entity_id)
            .ok_or_else(|| SessionError::UnknownEntity(entity_id.to_string()))
    }

    fn entity_mut(
        &mut self,
        entity_id: &str,
    ) -> Result<&mut Entity, SessionError> {
        self.entities
            .iter_mut()
            .find(|e| e.id == entity_id)
            .ok_or_else(|| SessionError::UnknownEntity(entity_id.to_string()))
    }

    fn remove_allocations_for_activity(
        &mut self,
        activity_id: &str,
    ) -> usize {
        let before = self.allocations.len();
        self.allocations.retain(|a| a.activity_id != activity_id);
        let removed = before - self.allocations.len();

        debug!(activity_id, removed, "removed activity allocations");
        removed
    }

    fn entities_under_activity(
        &self,
        activity_id: &str,
    ) -> BTreeSet<String> {
        self.allocations
            .iter()
            .filter(|a| a.activity_id == activity_id)
            .map(|a| a.entity_id.clone())
            .collect()
    }

    /// Carries the practice of every activity the redistribution touched
    /// into the entity allocations under it, then brings each touched
    /// entity back within its own budget. Returns the touched entities.
    fn sync_activity_practice(
        &mut self,
        redistribution: Redistribution,
        activity_id: &str,
    ) -> Result<BTreeSet<String>, SessionError> {
        let changed: BTreeMap<String, Decimal> = self
            .activities
            .iter_mut()
            .filter(|a| match redistribution {
                Redistribution::Unchanged => a.activity_id == activity_id,
                Redistribution::Rescaled { .. } => a.is_enabled,
            })
            .map(|activity| {
                activity.recompute_applied();
                (activity.activity_id.clone(), activity.practice_percentage)
            })
            .collect();

        let mut affected = BTreeSet::new();
        for allocation in &mut self.allocations {
            if let Some(practice) = changed.get(&allocation.activity_id) {
                allocation.practice_percentage = *practice;
                allocation.recompute_applied();
                affected.insert(allocation.entity_id.clone());
            }
        }
        for entity_id in &affected {
            self.reconcile_entity(entity_id)?;
        }
        Ok(affected)
    }

    fn reconcile_entity(
        &mut self,
        entity_id: &str,
    ) -> Result<Redistribution, SessionError> {
        let budget = self.entity_budget(entity_id)?;
        let mut shares = self.entity_practice_shares(entity_id)?;

        let redistribution = budget.reconcile(&mut shares);
        if let Redistribution::Rescaled { .. } = redistribution {
            debug!(entity_id, "rescaled entity practice shares");
            self.apply_entity_shares(entity_id, &shares);
        }
        Ok(redistribution)
    }

    fn apply_entity_shares(
        &mut self,
        entity_id: &str,
        shares: &[EntityPracticeShare],
    ) {
        for allocation in &mut self.allocations {
            if allocation.entity_id != entity_id {
                continue;
            }
            if let Some(share) = shares.iter().find(|s| s.activity_id == allocation.activity_id) {
                allocation.practice_percentage = share.practice_percentage;
                allocation.recompute_applied();
            }
        }
    }

    /// Recalculates the given entities in session order.
    fn recalculate_entities(
        &self,
        entity_ids: &BTreeSet<String>,
    ) -> Result<Vec<EntityYearRecord>, SessionError> {
        self.entities
            .iter()
            .filter(|e| entity_ids.contains(&e.id))
            .map(|e| self.recalculate_entity(&e.id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::calculations::allocation::SegmentKind;
    use crate::models::{EntityKind, ResearchActivity, Subcomponent};

    fn catalog(
        id: &str,
        name: &str,
    ) -> ResearchActivity {
        ResearchActivity {
            id: id.to_string(),
            name: name.to_string(),
            focus_id: "focus-1".to_string(),
            subcomponents: vec![Subcomponent {
                id: format!("{id}-sub"),
                activity_id: id.to_string(),
                name: format!("{name} step"),
                time_percentage: dec!(50),
                frequency_percentage: dec!(40),
                hypothesis: None,
                methodology: None,
            }],
        }
    }

    fn business_year() -> BusinessYear {
        BusinessYear {
            id: "by-2024".to_string(),
            business_id: "biz-1".to_string(),
            year: 2024,
            business_start_year: 2019,
            gross_receipts: dec!(1200000),
            non_rd_percentage: dec!(0),
            manual_qre: None,
            locked_qre: None,
        }
    }

    fn entity(
        id: &str,
        kind: EntityKind,
        cost_basis: Decimal,
        role_id: Option<&str>,
    ) -> Entity {
        Entity {
            id: id.to_string(),
            business_id: "biz-1".to_string(),
            name: id.to_string(),
            kind,
            cost_basis,
            role_id: role_id.map(str::to_string),
            non_rd_percentage: dec!(0),
        }
    }

    /// Two activities at 40% each, one employee and one contractor both
    /// allocated to every subcomponent.
    fn session() -> WizardSession {
        let activities = vec![
            SelectedActivity::from_catalog(&catalog("act-1", "Implants"), "by-2024", 2024, dec!(40)),
            SelectedActivity::from_catalog(&catalog("act-2", "Aligners"), "by-2024", 2024, dec!(40)),
        ];
        let roles = vec![Role {
            id: "role-hyg".to_string(),
            business_year_id: "by-2024".to_string(),
            name: "Hygienist".to_string(),
            baseline_applied_percent: Some(dec!(30)),
        }];
        let entities = vec![
            entity("emp-1", EntityKind::Employee, dec!(100000), None),
            entity("ctr-1", EntityKind::Contractor, dec!(50000), None),
        ];
        let mut allocations = baseline_allocations("emp-1", "by-2024", None, &activities);
        allocations.extend(baseline_allocations("ctr-1", "by-2024", None, &activities));

        WizardSession::new(
            business_year(),
            activities,
            roles,
            entities,
            allocations,
            Duration::from_millis(500),
        )
    }

    // =========================================================================
    // activity edit tests
    // =========================================================================

    #[test]
    fn practice_edit_recomputes_subcomponents_and_allocations() {
        let mut session = session();

        let edit = session
            .set_activity_practice_percentage("act-1", dec!(50))
            .unwrap();

        assert_eq!(edit.redistribution, Redistribution::Unchanged);
        // 50 * 100 * 40 * 50 / 1_000_000 = 10
        assert_eq!(session.activities()[0].subcomponents[0].applied_percentage, dec!(10));
        let emp = session.entity_allocations("emp-1");
        assert_eq!(emp[0].practice_percentage, dec!(50));
        assert_eq!(emp[0].applied_percentage, dec!(10));
        assert_eq!(emp[1].applied_percentage, dec!(8));
    }

    #[test]
    fn practice_edit_returns_records_of_touched_entities() {
        let mut session = session();

        let edit = session
            .set_activity_practice_percentage("act-1", dec!(50))
            .unwrap();

        // applied 10 + 8 = 18
        let records: Vec<(&str, Decimal)> = edit
            .records
            .iter()
            .map(|r| (r.entity_id.as_str(), r.calculated_qre))
            .collect();
        assert_eq!(records, vec![("emp-1", dec!(18000)), ("ctr-1", dec!(5850))]);
        assert_eq!(edit.records[0], session.recalculate_entity("emp-1").unwrap());
    }

    #[test]
    fn practice_edit_rescales_entity_over_its_own_budget() {
        let mut session = session();
        session.set_entity_non_rd_percentage("emp-1", dec!(30)).unwrap();

        let edit = session
            .set_activity_practice_percentage("act-1", dec!(45))
            .unwrap();

        // business 45 + 40 fits; emp-1 has 45 + 40 + 30 = 115, so its shares
        // scale into 70
        assert_eq!(edit.redistribution, Redistribution::Unchanged);
        let emp: Vec<Decimal> = session
            .entity_allocations("emp-1")
            .iter()
            .map(|a| a.practice_percentage)
            .collect();
        assert_eq!(emp, vec![dec!(37.06), dec!(32.94)]);
        assert_eq!(edit.records[0].calculated_qre, dec!(14000));
        // 45 * 0.2 + 8 = 17; 50000 * 17% * 0.65
        assert_eq!(edit.records[1].calculated_qre, dec!(5525));
    }

    #[test]
    fn practice_edit_over_budget_rescales_all_enabled() {
        let mut session = session();
        session.set_non_rd_percentage(dec!(20));

        let edit = session
            .set_activity_practice_percentage("act-2", dec!(60))
            .unwrap();

        // 40 + 60 + 20 = 120; enabled scaled by 80 / 100
        assert_eq!(edit.redistribution, Redistribution::Rescaled { scale_factor: dec!(0.8) });
        assert_eq!(session.activities()[0].practice_percentage, dec!(32.00));
        assert_eq!(session.activities()[1].practice_percentage, dec!(48.00));
        assert_eq!(session.budget().total(session.activities()), dec!(100.00));
        let ctr = session.entity_allocations("ctr-1");
        assert_eq!(ctr[0].practice_percentage, dec!(32.00));
        assert_eq!(ctr[1].practice_percentage, dec!(48.00));
    }

    #[test]
    fn practice_edit_of_unknown_activity_fails() {
        let mut session = session();

        let result = session.set_activity_practice_percentage("act-9", dec!(10));

        assert_eq!(
            result,
            Err(SessionError::Allocation(AllocationError::UnknownActivity(
                "act-9".to_string()
            )))
        );
    }

    #[test]
    fn non_rd_edit_updates_business_year_only() {
        let mut session = session();

        session.set_non_rd_percentage(dec!(35));

        assert_eq!(session.business_year().non_rd_percentage, dec!(35));
        assert_eq!(session.activities()[0].practice_percentage, dec!(40));
    }

    #[test]
    fn update_subcomponent_recomputes_applied() {
        let mut session = session();

        session
            .update_subcomponent(
                "act-1",
                "act-1-sub",
                SubcomponentUpdate {
                    start_month: Some(7),
                    frequency_percentage: Some(dec!(80)),
                    ..SubcomponentUpdate::default()
                },
            )
            .unwrap();

        let sub = &session.activities()[0].subcomponents[0];
        assert_eq!(sub.year_percentage, dec!(50));
        // 40 * 50 * 80 * 50 / 1_000_000 = 8
        assert_eq!(sub.applied_percentage, dec!(8));
    }

    #[test]
    fn update_subcomponent_carries_terms_into_entity_allocations() {
        let mut session = session();

        let edit = session
            .update_subcomponent(
                "act-1",
                "act-1-sub",
                SubcomponentUpdate {
                    start_month: Some(7),
                    ..SubcomponentUpdate::default()
                },
            )
            .unwrap();

        for allocation in session.allocations().iter().filter(|a| a.activity_id == "act-1") {
            assert_eq!(allocation.year_percentage, dec!(50));
            // 40 * 50 * 40 * 50 / 1_000_000 = 4
            assert_eq!(allocation.applied_percentage, dec!(4));
        }
        // applied 4 + 8 = 12
        assert_eq!(edit.records.len(), 2);
        assert_eq!(edit.records[0].calculated_qre, dec!(12000));
        assert_eq!(edit.records[1].calculated_qre, dec!(3900));
    }

    #[test]
    fn excluding_subcomponent_excludes_entity_allocations() {
        let mut session = session();

        let edit = session
            .update_subcomponent(
                "act-2",
                "act-2-sub",
                SubcomponentUpdate {
                    is_included: Some(false),
                    time_percentage: Some(dec!(100)),
                    ..SubcomponentUpdate::default()
                },
            )
            .unwrap();

        let emp = session.entity_allocations("emp-1");
        assert!(!emp[1].is_included);
        assert_eq!(emp[1].time_percentage, dec!(100));
        assert_eq!(emp[1].applied_percentage, dec!(0));
        assert_eq!(edit.records[0].applied_percent, dec!(8));
    }

    #[test]
    fn update_subcomponent_rejects_bad_start_month() {
        let mut session = session();

        let result = session.update_subcomponent(
            "act-1",
            "act-1-sub",
            SubcomponentUpdate {
                start_month: Some(14),
                ..SubcomponentUpdate::default()
            },
        );

        assert_eq!(
            result,
            Err(SessionError::Percentage(PercentageError::InvalidStartMonth(14)))
        );
    }

    #[test]
    fn update_subcomponent_rejects_unknown_subcomponent() {
        let mut session = session();

        let result =
            session.update_subcomponent("act-1", "nope", SubcomponentUpdate::default());

        assert!(matches!(
            result,
            Err(SessionError::Allocation(AllocationError::UnknownSubcomponent { .. }))
        ));
    }

    #[test]
    fn disabling_activity_cascades_to_allocations() {
        let mut session = session();

        let edit = session.set_activity_enabled("act-1", false).unwrap();

        assert_eq!(edit.removed_allocations, 2);
        assert!(session.allocations().iter().all(|a| a.activity_id != "act-1"));
        assert_eq!(session.allocations().len(), 2);
        // only act-2 left: applied 8
        assert_eq!(edit.records[0].calculated_qre, dec!(8000));
        assert_eq!(edit.records[1].calculated_qre, dec!(2600));
    }

    #[test]
    fn enabling_activity_over_budget_rescales() {
        let mut session = session();
        session.set_activity_enabled("act-2", false).unwrap();
        session
            .set_activity_practice_percentage("act-1", dec!(80))
            .unwrap();

        let edit = session.set_activity_enabled("act-2", true).unwrap();

        // 80 + 40 = 120 scaled into 100
        assert!(matches!(edit.redistribution, Redistribution::Rescaled { .. }));
        assert_eq!(session.activities()[0].practice_percentage, dec!(66.67));
        assert_eq!(session.activities()[1].practice_percentage, dec!(33.33));
        assert_eq!(session.budget().total(session.activities()), dec!(100));
        assert_eq!(session.entity_allocations("emp-1")[0].practice_percentage, dec!(66.67));
        assert_eq!(edit.records.len(), 2);
    }

    #[test]
    fn removing_activity_cascades_to_allocations() {
        let mut session = session();

        let edit = session.remove_activity("act-2").unwrap();

        assert_eq!(edit.removed_allocations, 2);
        assert_eq!(session.activities().len(), 1);
        assert!(session.allocations().iter().all(|a| a.activity_id != "act-2"));
        assert_eq!(edit.records[0].applied_percent, dec!(8));
    }

    // =========================================================================
    // entity edit tests
    // =========================================================================

    #[test]
    fn recalculate_entity_produces_year_record() {
        let mut session = session();

        let record = session.recalculate_entity("ctr-1").unwrap();

        // applied 8 + 8 = 16; 50000 * 16% * 0.65 = 5200
        assert_eq!(record.entity_id, "ctr-1");
        assert_eq!(record.business_year_id, "by-2024");
        assert_eq!(record.applied_percent, dec!(16));
        assert_eq!(record.calculated_qre, dec!(5200));
    }

    #[test]
    fn recalculation_is_repeatable() {
        let mut session = session();

        let first = session.recalculate_all().unwrap();
        let second = session.recalculate_all().unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn unknown_entity_is_reported() {
        let mut session = session();

        assert_eq!(
            session.recalculate_entity("ghost"),
            Err(SessionError::UnknownEntity("ghost".to_string()))
        );
    }

    #[test]
    fn reassign_role_rebuilds_allocations() {
        let mut session = session();
        session.activities[1].subcomponents[0].selected_roles = vec!["role-dds".to_string()];

        let record = session.reassign_role("emp-1", Some("role-hyg")).unwrap();

        let allocations = session.entity_allocations("emp-1");
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].activity_id, "act-1");
        assert_eq!(record.applied_percent, dec!(8));
        assert_eq!(session.entities()[0].role_id.as_deref(), Some("role-hyg"));
    }

    #[test]
    fn reassign_role_with_no_matching_subcomponents_uses_role_baseline() {
        let mut session = session();
        for activity in &mut session.activities {
            activity.subcomponents[0].selected_roles = vec!["role-dds".to_string()];
        }

        let record = session.reassign_role("emp-1", Some("role-hyg")).unwrap();

        assert!(session.entity_allocations("emp-1").is_empty());
        assert_eq!(record.applied_percent, dec!(30));
        assert_eq!(record.calculated_qre, dec!(30000));
    }

    #[test]
    fn reassign_to_unknown_role_fails() {
        let mut session = session();

        let result = session.reassign_role("emp-1", Some("role-x"));

        assert_eq!(result, Err(SessionError::UnknownRole("role-x".to_string())));
    }

    #[test]
    fn update_entity_allocation_recalculates() {
        let mut session = session();

        let record = session
            .update_entity_allocation(
                "emp-1",
                "act-1",
                "act-1-sub",
                AllocationUpdate {
                    time_percentage: Some(dec!(100)),
                    ..AllocationUpdate::default()
                },
            )
            .unwrap();

        // 40 * 100 * 40 * 100 / 1_000_000 = 16, plus 8
        assert_eq!(record.applied_percent, dec!(24));
        assert_eq!(record.calculated_qre, dec!(24000));
    }

    #[test]
    fn entity_practice_edits_stay_within_entity_budget() {
        let mut session = session();
        let practice_90 = AllocationUpdate {
            practice_percentage: Some(dec!(90)),
            ..AllocationUpdate::default()
        };

        session
            .update_entity_allocation("emp-1", "act-1", "act-1-sub", practice_90.clone())
            .unwrap();
        let record = session
            .update_entity_allocation("emp-1", "act-2", "act-2-sub", practice_90)
            .unwrap();

        // 90 + 40 -> 69.23 / 30.77, then 69.23 + 90 -> 43.48 / 56.52
        let shares: Vec<Decimal> = session
            .entity_practice_shares("emp-1")
            .unwrap()
            .iter()
            .map(|s| s.practice_percentage)
            .collect();
        assert_eq!(shares, vec![dec!(43.48), dec!(56.52)]);
        let budget = session.entity_budget("emp-1").unwrap();
        assert_eq!(budget.total(&session.entity_practice_shares("emp-1").unwrap()), dec!(100));
        // 8.70 + 11.30
        assert_eq!(record.applied_percent, dec!(20));
        assert_eq!(record.calculated_qre, dec!(20000));
        // other entities and the business year are untouched
        assert_eq!(session.entity_allocations("ctr-1")[0].practice_percentage, dec!(40));
        assert_eq!(session.activities()[0].practice_percentage, dec!(40));
    }

    #[test]
    fn entity_practice_edit_respects_entity_non_rd_share() {
        let mut session = session();
        session.set_entity_non_rd_percentage("emp-1", dec!(20)).unwrap();

        let edit = session
            .set_entity_practice_percentage("emp-1", "act-1", dec!(60))
            .unwrap();

        // 60 + 40 + 20 = 120; shares scaled by 80 / 100
        assert_eq!(edit.redistribution, Redistribution::Rescaled { scale_factor: dec!(0.8) });
        let emp = session.entity_allocations("emp-1");
        assert_eq!(emp[0].practice_percentage, dec!(48));
        assert_eq!(emp[1].practice_percentage, dec!(32));
        // 9.6 + 6.4
        assert_eq!(edit.records[0].applied_percent, dec!(16));
        assert_eq!(session.entities()[0].non_rd_percentage, dec!(20));
    }

    #[test]
    fn entity_segments_end_with_non_rd_share() {
        let mut session = session();
        session.set_entity_non_rd_percentage("emp-1", dec!(20)).unwrap();

        let segments = session.entity_segments("emp-1").unwrap();

        let kinds: Vec<SegmentKind> = segments.iter().map(|s| s.kind).collect();
        // 40 + 40 + 20 fills the bar, so no available segment
        assert_eq!(
            kinds,
            vec![SegmentKind::Activity, SegmentKind::Activity, SegmentKind::NonRd]
        );
        assert_eq!(segments[2].start_position, dec!(80));
        assert_eq!(segments[2].width, dec!(20));
    }

    #[test]
    fn entity_practice_edit_needs_an_allocation_under_activity() {
        let mut session = session();
        session.remove_activity("act-2").unwrap();

        let result = session.set_entity_practice_percentage("emp-1", "act-2", dec!(10));

        assert_eq!(
            result,
            Err(SessionError::Allocation(AllocationError::UnknownActivity(
                "act-2".to_string()
            )))
        );
    }

    #[test]
    fn cost_edit_waits_for_debounce_window() {
        let mut session = session();
        let start = Instant::now();

        session.edit_cost_basis("emp-1", dec!(120000), start).unwrap();

        assert_eq!(session.entities()[0].cost_basis, dec!(120000));
        assert!(
            session
                .poll_pending(start + Duration::from_millis(100))
                .unwrap()
                .is_empty()
        );
        let records = session
            .poll_pending(start + Duration::from_millis(500))
            .unwrap();
        assert_eq!(records.len(), 1);
        // 120000 * 16%
        assert_eq!(records[0].calculated_qre, dec!(19200));
        assert!(!session.has_pending_edits());
    }

    #[test]
    fn blur_flushes_pending_edit() {
        let mut session = session();
        let start = Instant::now();
        session.edit_cost_basis("emp-1", dec!(90000), start).unwrap();
        session.edit_cost_basis("emp-1", dec!(110000), start).unwrap();

        let record = session.blur("emp-1").unwrap();

        assert_eq!(record.map(|r| r.calculated_qre), Some(dec!(17600)));
        assert_eq!(session.blur("emp-1"), Ok(None));
        assert_eq!(session.poll_pending(start + Duration::from_secs(2)), Ok(vec![]));
    }

    // =========================================================================
    // breakdown and carry-forward tests
    // =========================================================================

    #[test]
    fn qre_breakdown_sums_by_category() {
        let session = session();

        let breakdown = session.qre_breakdown().unwrap();

        assert_eq!(breakdown.employee_wages, dec!(16000));
        assert_eq!(breakdown.contractor_costs, dec!(5200));
        assert_eq!(breakdown.supply_costs, dec!(0));
        assert_eq!(breakdown.total, dec!(21200));
    }

    #[test]
    fn carry_forward_uses_business_year_bounds() {
        let session = session();

        let copies = session
            .carry_forward(vec![CarryForwardTarget {
                year: 2023,
                business_year_id: "by-2023".to_string(),
                start_month: Some(10),
            }])
            .unwrap();

        assert_eq!(copies[&2023].len(), 2);
        assert_eq!(copies[&2023][0].practice_percentage, dec!(38));

        let too_early = session.carry_forward(vec![CarryForwardTarget {
            year: 2018,
            business_year_id: "by-2018".to_string(),
            start_month: None,
        }]);
        assert!(too_early.is_err());
    }
}
