//! Use cases behind the command line: load a business year into a session,
//! recalculate and write back, compute credits, lay out the time budget.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use rd_core::calculations::{
    AllocationSegment, CreditCalculationInput, CreditCalculator, CreditConfig, CreditMethod,
    CreditResult, QreBreakdown,
};
use rd_core::db::RepositoryRegistry;
use rd_core::session::WizardSession;
use rd_core::{EntityYearRecord, RdRepository, YearData};
use rd_db_sqlite::SqliteRepositoryFactory;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

/// Registry with every backend this binary ships.
pub fn build_registry() -> RepositoryRegistry {
    let mut registry = RepositoryRegistry::new();
    registry.register(Box::new(SqliteRepositoryFactory));
    registry
}

/// Loads everything a session needs for one business year.
pub async fn load_session(
    repo: &dyn RdRepository,
    business_year_id: &str,
    debounce: Duration,
) -> Result<WizardSession> {
    let business_year = repo
        .get_business_year(business_year_id)
        .await
        .with_context(|| format!("Failed to load business year '{}'", business_year_id))?;
    let activities = repo
        .list_selected_activities(business_year_id)
        .await
        .context("Failed to load selected activities")?;
    let roles = repo
        .list_roles(business_year_id)
        .await
        .context("Failed to load roles")?;
    let entities = repo
        .list_entities(&business_year.business_id)
        .await
        .context("Failed to load entities")?;
    let allocations = repo
        .list_entity_allocations(business_year_id)
        .await
        .context("Failed to load entity allocations")?;

    debug!(
        business_year_id,
        activities = activities.len(),
        entities = entities.len(),
        allocations = allocations.len(),
        "loaded session"
    );

    Ok(WizardSession::new(
        business_year,
        activities,
        roles,
        entities,
        allocations,
        debounce,
    ))
}

/// Writes the editable state of a session back to storage.
///
/// Entity year records are not touched; use [`recalculate_business_year`]
/// for those.
pub async fn save_session(
    repo: &dyn RdRepository,
    session: &WizardSession,
) -> Result<()> {
    let business_year_id = session.business_year().id.as_str();

    repo.save_selected_activities(business_year_id, session.activities())
        .await
        .context("Failed to save selected activities")?;

    for entity in session.entities() {
        repo.update_entity_cost_basis(&entity.id, entity.cost_basis)
            .await
            .with_context(|| format!("Failed to save cost basis of '{}'", entity.id))?;
        repo.update_entity_role(&entity.id, entity.role_id.as_deref())
            .await
            .with_context(|| format!("Failed to save role of '{}'", entity.id))?;
        repo.update_entity_non_rd_percentage(&entity.id, entity.non_rd_percentage)
            .await
            .with_context(|| format!("Failed to save non-R&D share of '{}'", entity.id))?;

        let allocations: Vec<_> = session
            .entity_allocations(&entity.id)
            .into_iter()
            .cloned()
            .collect();
        repo.replace_entity_allocations(&entity.id, business_year_id, &allocations)
            .await
            .with_context(|| format!("Failed to save allocations of '{}'", entity.id))?;
    }

    Ok(())
}

// ─── recalculation ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecalculationReport {
    pub business_year_id: String,
    pub year: i32,
    pub records: Vec<EntityYearRecord>,
    pub breakdown: QreBreakdown,
}

/// Recomputes every entity's QRE for the business year and writes the
/// records back. Running it twice on unchanged data writes the same values.
pub async fn recalculate_business_year(
    repo: &dyn RdRepository,
    business_year_id: &str,
    debounce: Duration,
) -> Result<RecalculationReport> {
    let mut session = load_session(repo, business_year_id, debounce).await?;

    let records = session
        .recalculate_all()
        .context("Failed to recalculate entities")?;
    for record in &records {
        repo.save_entity_year_record(record)
            .await
            .with_context(|| format!("Failed to save QRE of '{}'", record.entity_id))?;
    }
    let breakdown = session
        .qre_breakdown()
        .context("Failed to build QRE breakdown")?;

    info!(
        business_year_id,
        records = records.len(),
        total_qre = %breakdown.total,
        "wrote back entity QRE"
    );

    Ok(RecalculationReport {
        business_year_id: business_year_id.to_string(),
        year: session.business_year().year,
        records,
        breakdown,
    })
}

impl fmt::Display for RecalculationReport {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        writeln!(f, "Business year:     {} ({})", self.business_year_id, self.year)?;
        writeln!(f, "Entities:          {}", self.records.len())?;
        for record in &self.records {
            writeln!(
                f,
                "  {:<16} {:>8.2}%  {:>14.2}",
                record.entity_id, record.applied_percent, record.calculated_qre
            )?;
        }
        writeln!(f, "Employee wages:    {}", self.breakdown.employee_wages)?;
        writeln!(f, "Contractor costs:  {}", self.breakdown.contractor_costs)?;
        writeln!(f, "Supply costs:      {}", self.breakdown.supply_costs)?;
        write!(f, "Total QRE:         {}", self.breakdown.total)?;
        if self.breakdown.locked {
            write!(f, " (locked)")?;
        }
        writeln!(f)
    }
}

// ─── credits ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreditOptions {
    pub config: CreditConfig,
    pub method: CreditMethod,
    pub use_280c: bool,
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreditReport {
    pub business_year_id: String,
    pub year: i32,
    pub current_qre: Decimal,
    pub prior_years: Vec<YearData>,
    pub use_280c: bool,
    pub result: CreditResult,
}

/// Computes the federal and state credit of a business year.
///
/// Current QRE is the year's breakdown total (locked values win), replaced
/// by a positive manual QRE. Prior years come from storage.
pub async fn calculate_credits(
    repo: &dyn RdRepository,
    business_year_id: &str,
    options: &CreditOptions,
) -> Result<CreditReport> {
    let session = load_session(repo, business_year_id, Duration::ZERO).await?;
    let business_year = session.business_year();

    let breakdown = session
        .qre_breakdown()
        .context("Failed to build QRE breakdown")?;
    let current = YearData {
        manual_qre: business_year.manual_qre,
        ..YearData::new(business_year.year, breakdown.total, business_year.gross_receipts)
    };
    let prior_years = repo
        .prior_year_data(&business_year.business_id, business_year.year)
        .await
        .context("Failed to load prior year data")?;

    let input = CreditCalculationInput {
        year: business_year.year,
        current_qre: current.effective_qre(),
        prior_years,
        use_280c: options.use_280c,
        method: options.method,
        state: options.state.clone(),
    };
    let result = CreditCalculator::new(options.config.clone())
        .calculate(&input)
        .context("Invalid credit configuration")?;

    Ok(CreditReport {
        business_year_id: business_year_id.to_string(),
        year: business_year.year,
        current_qre: input.current_qre,
        prior_years: input.prior_years,
        use_280c: options.use_280c,
        result,
    })
}

impl fmt::Display for CreditReport {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let federal = &self.result.federal;
        let asc = &federal.asc;
        let standard = &federal.standard;

        writeln!(f, "Business year:       {} ({})", self.business_year_id, self.year)?;
        writeln!(f, "Current QRE:         {:.2}", self.current_qre)?;
        writeln!(f, "Prior years:         {}", self.prior_years.len())?;
        writeln!(f, "280C reduction:      {}", if self.use_280c { "yes" } else { "no" })?;
        writeln!(f)?;
        writeln!(f, "ASC")?;
        writeln!(f, "  Average prior QRE: {:.2}", asc.average_prior_qre)?;
        writeln!(
            f,
            "  Qualifying years:  {}{}",
            asc.qualifying_years,
            if asc.is_startup { " (start-up rate)" } else { "" }
        )?;
        writeln!(f, "  Credit:            {:.2}", asc.final_credit)?;
        writeln!(f, "Standard")?;
        writeln!(f, "  Avg receipts:      {:.2}", standard.average_gross_receipts)?;
        writeln!(f, "  Base amount:       {:.2}", standard.base_amount)?;
        writeln!(f, "  Incremental QRE:   {:.2}", standard.incremental_qre)?;
        writeln!(f, "  Credit:            {:.2}", standard.final_credit)?;
        writeln!(f)?;
        writeln!(
            f,
            "Federal credit:      {:.2} ({})",
            federal.final_amount, federal.selected_method
        )?;
        match &self.result.state {
            Some(state) => writeln!(
                f,
                "State credit ({}):   {:.2} at {}",
                state.state, state.credit, state.rate
            ),
            None => writeln!(f, "State credit:        none"),
        }
    }
}

// ─── time budget ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentsReport {
    pub business_year_id: String,
    pub non_rd_percentage: Decimal,
    pub total: Decimal,
    pub segments: Vec<AllocationSegment>,
}

/// Lays out the business year's time budget, optionally with a different
/// non-R&D share. Nothing is written back.
pub async fn segments(
    repo: &dyn RdRepository,
    business_year_id: &str,
    non_rd_percentage: Option<Decimal>,
) -> Result<SegmentsReport> {
    let mut session = load_session(repo, business_year_id, Duration::ZERO).await?;
    if let Some(value) = non_rd_percentage {
        session.set_non_rd_percentage(value);
    }

    Ok(SegmentsReport {
        business_year_id: business_year_id.to_string(),
        non_rd_percentage: session.budget().non_rd_percentage(),
        total: session.budget().total(session.activities()),
        segments: session.segments(),
    })
}

impl fmt::Display for SegmentsReport {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        writeln!(f, "Business year:  {}", self.business_year_id)?;
        writeln!(f, "Budget used:    {:.2}%", self.total)?;
        for segment in &self.segments {
            writeln!(
                f,
                "  {:>6.2} .. {:>6.2}  {:<24} {:.2}%",
                segment.start_position,
                segment.start_position + segment.width,
                segment.name,
                segment.percentage
            )?;
        }
        Ok(())
    }
}
