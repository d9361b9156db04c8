use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rd_core::{
    BusinessYear, Entity, EntityKind, EntitySubcomponentAllocation, EntityYearRecord, LockedQre,
    RdRepository, RepositoryError, Role, SelectedActivity, SelectedSubcomponent, YearData,
};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use crate::decimal::{decimal_to_text, get_decimal, get_optional_decimal};

pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Connects to a sqlx SQLite URL, creating the database file if needed.
    ///
    /// In-memory databases get a single connection so every query sees the
    /// same database.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {}", database_url))?
            .create_if_missing(true)
            .foreign_keys(true);
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to database: {}", database_url))?;
        Ok(Self { pool })
    }

    pub async fn new_with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn list_subcomponent_roles(
        &self,
        business_year_id: &str,
    ) -> Result<HashMap<(String, String), Vec<String>>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT activity_id, subcomponent_id, role_id
             FROM selected_subcomponent_role
             WHERE business_year_id = ?
             ORDER BY role_id",
        )
        .bind(business_year_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let mut roles: HashMap<(String, String), Vec<String>> = HashMap::new();
        for row in &rows {
            let key = (get_string(row, "activity_id")?, get_string(row, "subcomponent_id")?);
            roles.entry(key).or_default().push(get_string(row, "role_id")?);
        }
        Ok(roles)
    }

    async fn calculated_qre(
        &self,
        business_year_id: &str,
    ) -> Result<Decimal, RepositoryError> {
        let records = self.list_entity_year_records(business_year_id).await?;
        Ok(records.iter().map(|r| r.calculated_qre).sum())
    }
}

fn get_string(
    row: &SqliteRow,
    column: &str,
) -> Result<String, RepositoryError> {
    row.try_get(column)
        .map_err(|e| RepositoryError::Database(format!("Failed to get {}: {}", column, e)))
}

fn get_i32(
    row: &SqliteRow,
    column: &str,
) -> Result<i32, RepositoryError> {
    row.try_get(column)
        .map_err(|e| RepositoryError::Database(format!("Failed to get {}: {}", column, e)))
}

fn get_bool(
    row: &SqliteRow,
    column: &str,
) -> Result<bool, RepositoryError> {
    row.try_get(column)
        .map_err(|e| RepositoryError::Database(format!("Failed to get {}: {}", column, e)))
}

fn row_to_business_year(row: &SqliteRow) -> Result<BusinessYear, RepositoryError> {
    let employee = get_optional_decimal(row, "locked_employee_qre")?;
    let contractor = get_optional_decimal(row, "locked_contractor_qre")?;
    let supply = get_optional_decimal(row, "locked_supply_qre")?;
    let locked_qre = match (employee, contractor, supply) {
        (None, None, None) => None,
        (employee, contractor, supply) => Some(LockedQre {
            employee_qre: employee.unwrap_or_default(),
            contractor_qre: contractor.unwrap_or_default(),
            supply_qre: supply.unwrap_or_default(),
        }),
    };

    Ok(BusinessYear {
        id: get_string(row, "id")?,
        business_id: get_string(row, "business_id")?,
        year: get_i32(row, "year")?,
        business_start_year: get_i32(row, "business_start_year")?,
        gross_receipts: get_decimal(row, "gross_receipts")?,
        non_rd_percentage: get_decimal(row, "non_rd_percentage")?,
        manual_qre: get_optional_decimal(row, "manual_qre")?,
        locked_qre,
    })
}

fn row_to_role(row: &SqliteRow) -> Result<Role, RepositoryError> {
    Ok(Role {
        id: get_string(row, "id")?,
        business_year_id: get_string(row, "business_year_id")?,
        name: get_string(row, "name")?,
        baseline_applied_percent: get_optional_decimal(row, "baseline_applied_percent")?,
    })
}

fn row_to_entity(row: &SqliteRow) -> Result<Entity, RepositoryError> {
    let kind = get_string(row, "kind")?;
    Ok(Entity {
        id: get_string(row, "id")?,
        business_id: get_string(row, "business_id")?,
        name: get_string(row, "name")?,
        kind: EntityKind::parse(&kind)
            .ok_or_else(|| RepositoryError::Database(format!("Invalid entity kind: {}", kind)))?,
        cost_basis: get_decimal(row, "cost_basis")?,
        role_id: row
            .try_get("role_id")
            .map_err(|e| RepositoryError::Database(format!("Failed to get role_id: {}", e)))?,
        non_rd_percentage: get_decimal(row, "non_rd_percentage")?,
    })
}

fn row_to_subcomponent(row: &SqliteRow) -> Result<SelectedSubcomponent, RepositoryError> {
    let start_month: i64 = row
        .try_get("start_month")
        .map_err(|e| RepositoryError::Database(format!("Failed to get start_month: {}", e)))?;
    Ok(SelectedSubcomponent {
        id: get_string(row, "id")?,
        subcomponent_id: get_string(row, "subcomponent_id")?,
        name: get_string(row, "name")?,
        is_included: get_bool(row, "is_included")?,
        time_percentage: get_decimal(row, "time_percentage")?,
        year_percentage: get_decimal(row, "year_percentage")?,
        frequency_percentage: get_decimal(row, "frequency_percentage")?,
        start_month: u32::try_from(start_month).map_err(|_| {
            RepositoryError::Database(format!("Invalid start month: {}", start_month))
        })?,
        applied_percentage: get_decimal(row, "applied_percentage")?,
        selected_roles: Vec::new(),
    })
}

fn row_to_allocation(row: &SqliteRow) -> Result<EntitySubcomponentAllocation, RepositoryError> {
    Ok(EntitySubcomponentAllocation {
        entity_id: get_string(row, "entity_id")?,
        business_year_id: get_string(row, "business_year_id")?,
        activity_id: get_string(row, "activity_id")?,
        subcomponent_id: get_string(row, "subcomponent_id")?,
        is_included: get_bool(row, "is_included")?,
        time_percentage: get_decimal(row, "time_percentage")?,
        year_percentage: get_decimal(row, "year_percentage")?,
        frequency_percentage: get_decimal(row, "frequency_percentage")?,
        practice_percentage: get_decimal(row, "practice_percentage")?,
        applied_percentage: get_decimal(row, "applied_percentage")?,
        baseline_applied_percent: get_decimal(row, "baseline_applied_percent")?,
        baseline_time_percentage: get_decimal(row, "baseline_time_percentage")?,
        baseline_practice_percentage: get_decimal(row, "baseline_practice_percentage")?,
    })
}

fn row_to_year_record(row: &SqliteRow) -> Result<EntityYearRecord, RepositoryError> {
    Ok(EntityYearRecord {
        entity_id: get_string(row, "entity_id")?,
        business_year_id: get_string(row, "business_year_id")?,
        calculated_qre: get_decimal(row, "calculated_qre")?,
        applied_percent: get_decimal(row, "applied_percent")?,
    })
}

const BUSINESS_YEAR_COLUMNS: &str = "id, business_id, year, business_start_year, gross_receipts,
    non_rd_percentage, manual_qre, locked_employee_qre, locked_contractor_qre, locked_supply_qre";

const ALLOCATION_COLUMNS: &str = "entity_id, business_year_id, activity_id, subcomponent_id,
    is_included, time_percentage, year_percentage, frequency_percentage, practice_percentage,
    applied_percentage, baseline_applied_percent, baseline_time_percentage,
    baseline_practice_percentage";

#[async_trait]
impl RdRepository for SqliteRepository {
    async fn create_business_year(
        &self,
        business_year: &BusinessYear,
    ) -> Result<(), RepositoryError> {
        let now = Utc::now();
        let locked = business_year.locked_qre.as_ref();

        sqlx::query(
            "INSERT INTO business_year (
                id, business_id, year, business_start_year, gross_receipts,
                non_rd_percentage, manual_qre, locked_employee_qre,
                locked_contractor_qre, locked_supply_qre, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&business_year.id)
        .bind(&business_year.business_id)
        .bind(business_year.year)
        .bind(business_year.business_start_year)
        .bind(decimal_to_text(business_year.gross_receipts))
        .bind(decimal_to_text(business_year.non_rd_percentage))
        .bind(business_year.manual_qre.map(decimal_to_text))
        .bind(locked.map(|l| decimal_to_text(l.employee_qre)))
        .bind(locked.map(|l| decimal_to_text(l.contractor_qre)))
        .bind(locked.map(|l| decimal_to_text(l.supply_qre)))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(())
    }

    async fn get_business_year(
        &self,
        id: &str,
    ) -> Result<BusinessYear, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM business_year WHERE id = ?",
            BUSINESS_YEAR_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?
        .ok_or(RepositoryError::NotFound)?;

        row_to_business_year(&row)
    }

    async fn list_business_years(
        &self,
        business_id: &str,
    ) -> Result<Vec<BusinessYear>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM business_year WHERE business_id = ? ORDER BY year DESC",
            BUSINESS_YEAR_COLUMNS
        ))
        .bind(business_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(row_to_business_year).collect()
    }

    async fn prior_year_data(
        &self,
        business_id: &str,
        year: i32,
    ) -> Result<Vec<YearData>, RepositoryError> {
        let prior: Vec<BusinessYear> = self
            .list_business_years(business_id)
            .await?
            .into_iter()
            .filter(|by| by.year < year)
            .collect();

        let mut data = Vec::with_capacity(prior.len());
        for business_year in prior {
            let qre_amount = match &business_year.locked_qre {
                Some(locked) => locked.employee_qre + locked.contractor_qre + locked.supply_qre,
                None => self.calculated_qre(&business_year.id).await?,
            };
            data.push(YearData {
                year: business_year.year,
                qre_amount,
                gross_receipts: business_year.gross_receipts,
                manual_qre: business_year.manual_qre,
            });
        }

        debug!(business_id, year, prior_years = data.len(), "loaded prior year data");
        Ok(data)
    }

    async fn create_role(
        &self,
        role: &Role,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO role (id, business_year_id, name, baseline_applied_percent)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&role.id)
        .bind(&role.business_year_id)
        .bind(&role.name)
        .bind(role.baseline_applied_percent.map(decimal_to_text))
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(())
    }

    async fn list_roles(
        &self,
        business_year_id: &str,
    ) -> Result<Vec<Role>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, business_year_id, name, baseline_applied_percent
             FROM role WHERE business_year_id = ? ORDER BY name",
        )
        .bind(business_year_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(row_to_role).collect()
    }

    async fn create_entity(
        &self,
        entity: &Entity,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO entity
                (id, business_id, name, kind, cost_basis, role_id, non_rd_percentage, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entity.id)
        .bind(&entity.business_id)
        .bind(&entity.name)
        .bind(entity.kind.as_str())
        .bind(decimal_to_text(entity.cost_basis))
        .bind(entity.role_id.as_deref())
        .bind(decimal_to_text(entity.non_rd_percentage))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(())
    }

    async fn get_entity(
        &self,
        id: &str,
    ) -> Result<Entity, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, business_id, name, kind, cost_basis, role_id, non_rd_percentage
             FROM entity WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?
        .ok_or(RepositoryError::NotFound)?;

        row_to_entity(&row)
    }

    async fn list_entities(
        &self,
        business_id: &str,
    ) -> Result<Vec<Entity>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, business_id, name, kind, cost_basis, role_id, non_rd_percentage
             FROM entity WHERE business_id = ? ORDER BY kind, name, id",
        )
        .bind(business_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(row_to_entity).collect()
    }

    async fn update_entity_cost_basis(
        &self,
        id: &str,
        cost_basis: Decimal,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE entity SET cost_basis = ?, updated_at = ? WHERE id = ?")
            .bind(decimal_to_text(cost_basis))
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn update_entity_non_rd_percentage(
        &self,
        id: &str,
        non_rd_percentage: Decimal,
    ) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE entity SET non_rd_percentage = ?, updated_at = ? WHERE id = ?")
                .bind(decimal_to_text(non_rd_percentage))
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn update_entity_role(
        &self,
        id: &str,
        role_id: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE entity SET role_id = ?, updated_at = ? WHERE id = ?")
            .bind(role_id)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn save_selected_activities(
        &self,
        business_year_id: &str,
        activities: &[SelectedActivity],
    ) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        for table in [
            "selected_subcomponent_role",
            "selected_subcomponent",
            "selected_activity",
        ] {
            sqlx::query(&format!("DELETE FROM {} WHERE business_year_id = ?", table))
                .bind(business_year_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| RepositoryError::Database(e.to_string()))?;
        }

        for (position, activity) in activities.iter().enumerate() {
            sqlx::query(
                "INSERT INTO selected_activity (
                    business_year_id, activity_id, id, year, name,
                    practice_percentage, is_enabled, position
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(business_year_id)
            .bind(&activity.activity_id)
            .bind(&activity.id)
            .bind(activity.year)
            .bind(&activity.name)
            .bind(decimal_to_text(activity.practice_percentage))
            .bind(activity.is_enabled)
            .bind(position as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

            for (sub_position, sub) in activity.subcomponents.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO selected_subcomponent (
                        business_year_id, activity_id, subcomponent_id, id, name,
                        is_included, time_percentage, year_percentage,
                        frequency_percentage, start_month, applied_percentage, position
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(business_year_id)
                .bind(&activity.activity_id)
                .bind(&sub.subcomponent_id)
                .bind(&sub.id)
                .bind(&sub.name)
                .bind(sub.is_included)
                .bind(decimal_to_text(sub.time_percentage))
                .bind(decimal_to_text(sub.year_percentage))
                .bind(decimal_to_text(sub.frequency_percentage))
                .bind(i64::from(sub.start_month))
                .bind(decimal_to_text(sub.applied_percentage))
                .bind(sub_position as i64)
                .execute(&mut *tx)
                .await
                .map_err(|e| RepositoryError::Database(e.to_string()))?;

                for role_id in &sub.selected_roles {
                    sqlx::query(
                        "INSERT OR IGNORE INTO selected_subcomponent_role (
                            business_year_id, activity_id, subcomponent_id, role_id
                        ) VALUES (?, ?, ?, ?)",
                    )
                    .bind(business_year_id)
                    .bind(&activity.activity_id)
                    .bind(&sub.subcomponent_id)
                    .bind(role_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| RepositoryError::Database(e.to_string()))?;
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        info!(business_year_id, activities = activities.len(), "saved selected activities");
        Ok(())
    }

    async fn list_selected_activities(
        &self,
        business_year_id: &str,
    ) -> Result<Vec<SelectedActivity>, RepositoryError> {
        let activity_rows = sqlx::query(
            "SELECT business_year_id, activity_id, id, year, name, practice_percentage, is_enabled
             FROM selected_activity WHERE business_year_id = ? ORDER BY position",
        )
        .bind(business_year_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let sub_rows = sqlx::query(
            "SELECT activity_id, subcomponent_id, id, name, is_included, time_percentage,
                    year_percentage, frequency_percentage, start_month, applied_percentage
             FROM selected_subcomponent WHERE business_year_id = ? ORDER BY position",
        )
        .bind(business_year_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let mut roles = self.list_subcomponent_roles(business_year_id).await?;

        let mut subcomponents: HashMap<String, Vec<SelectedSubcomponent>> = HashMap::new();
        for row in &sub_rows {
            let activity_id = get_string(row, "activity_id")?;
            let mut sub = row_to_subcomponent(row)?;
            sub.selected_roles = roles
                .remove(&(activity_id.clone(), sub.subcomponent_id.clone()))
                .unwrap_or_default();
            subcomponents.entry(activity_id).or_default().push(sub);
        }

        activity_rows
            .iter()
            .map(|row| {
                let activity_id = get_string(row, "activity_id")?;
                Ok(SelectedActivity {
                    id: get_string(row, "id")?,
                    business_year_id: get_string(row, "business_year_id")?,
                    year: get_i32(row, "year")?,
                    name: get_string(row, "name")?,
                    practice_percentage: get_decimal(row, "practice_percentage")?,
                    is_enabled: get_bool(row, "is_enabled")?,
                    subcomponents: subcomponents.remove(&activity_id).unwrap_or_default(),
                    activity_id,
                })
            })
            .collect()
    }

    async fn delete_selected_activity(
        &self,
        business_year_id: &str,
        activity_id: &str,
    ) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        for table in [
            "entity_allocation",
            "selected_subcomponent_role",
            "selected_subcomponent",
        ] {
            sqlx::query(&format!(
                "DELETE FROM {} WHERE business_year_id = ? AND activity_id = ?",
                table
            ))
            .bind(business_year_id)
            .bind(activity_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        }

        let result = sqlx::query(
            "DELETE FROM selected_activity WHERE business_year_id = ? AND activity_id = ?",
        )
        .bind(business_year_id)
        .bind(activity_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(())
    }

    async fn replace_entity_allocations(
        &self,
        entity_id: &str,
        business_year_id: &str,
        allocations: &[EntitySubcomponentAllocation],
    ) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        sqlx::query("DELETE FROM entity_allocation WHERE entity_id = ? AND business_year_id = ?")
            .bind(entity_id)
            .bind(business_year_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        for allocation in allocations {
            sqlx::query(&format!(
                "INSERT OR REPLACE INTO entity_allocation ({})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                ALLOCATION_COLUMNS
            ))
            .bind(entity_id)
            .bind(business_year_id)
            .bind(&allocation.activity_id)
            .bind(&allocation.subcomponent_id)
            .bind(allocation.is_included)
            .bind(decimal_to_text(allocation.time_percentage))
            .bind(decimal_to_text(allocation.year_percentage))
            .bind(decimal_to_text(allocation.frequency_percentage))
            .bind(decimal_to_text(allocation.practice_percentage))
            .bind(decimal_to_text(allocation.applied_percentage))
            .bind(decimal_to_text(allocation.baseline_applied_percent))
            .bind(decimal_to_text(allocation.baseline_time_percentage))
            .bind(decimal_to_text(allocation.baseline_practice_percentage))
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(())
    }

    async fn list_entity_allocations(
        &self,
        business_year_id: &str,
    ) -> Result<Vec<EntitySubcomponentAllocation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM entity_allocation WHERE business_year_id = ?
             ORDER BY entity_id, activity_id, subcomponent_id",
            ALLOCATION_COLUMNS
        ))
        .bind(business_year_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(row_to_allocation).collect()
    }

    async fn save_entity_year_record(
        &self,
        record: &EntityYearRecord,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO entity_year_record (
                entity_id, business_year_id, calculated_qre, applied_percent, updated_at
            ) VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (entity_id, business_year_id) DO UPDATE SET
                calculated_qre = excluded.calculated_qre,
                applied_percent = excluded.applied_percent,
                updated_at = excluded.updated_at",
        )
        .bind(&record.entity_id)
        .bind(&record.business_year_id)
        .bind(decimal_to_text(record.calculated_qre))
        .bind(decimal_to_text(record.applied_percent))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(())
    }

    async fn get_entity_year_record(
        &self,
        entity_id: &str,
        business_year_id: &str,
    ) -> Result<EntityYearRecord, RepositoryError> {
        let row = sqlx::query(
            "SELECT entity_id, business_year_id, calculated_qre, applied_percent
             FROM entity_year_record WHERE entity_id = ? AND business_year_id = ?",
        )
        .bind(entity_id)
        .bind(business_year_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?
        .ok_or(RepositoryError::NotFound)?;

        row_to_year_record(&row)
    }

    async fn list_entity_year_records(
        &self,
        business_year_id: &str,
    ) -> Result<Vec<EntityYearRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT entity_id, business_year_id, calculated_qre, applied_percent
             FROM entity_year_record WHERE business_year_id = ? ORDER BY entity_id",
        )
        .bind(business_year_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(row_to_year_record).collect()
    }
}
