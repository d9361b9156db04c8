use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{
    BusinessYear, Entity, EntitySubcomponentAllocation, EntityYearRecord, Role, SelectedActivity,
    YearData,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Record not found")]
    NotFound,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Storage for the records the calculation engine reads and writes.
#[async_trait]
pub trait RdRepository: Send + Sync {
    // Business years
    async fn create_business_year(&self, business_year: &BusinessYear) -> Result<(), RepositoryError>;
    async fn get_business_year(&self, id: &str) -> Result<BusinessYear, RepositoryError>;
    async fn list_business_years(
        &self,
        business_id: &str,
    ) -> Result<Vec<BusinessYear>, RepositoryError>;

    /// QRE and gross receipts of every year of the business before `year`,
    /// most recent first. Locked QRE wins over the entity records.
    async fn prior_year_data(
        &self,
        business_id: &str,
        year: i32,
    ) -> Result<Vec<YearData>, RepositoryError>;

    // Roles
    async fn create_role(&self, role: &Role) -> Result<(), RepositoryError>;
    async fn list_roles(&self, business_year_id: &str) -> Result<Vec<Role>, RepositoryError>;

    // Entities
    async fn create_entity(&self, entity: &Entity) -> Result<(), RepositoryError>;
    async fn get_entity(&self, id: &str) -> Result<Entity, RepositoryError>;
    async fn list_entities(&self, business_id: &str) -> Result<Vec<Entity>, RepositoryError>;
    async fn update_entity_cost_basis(
        &self,
        id: &str,
        cost_basis: Decimal,
    ) -> Result<(), RepositoryError>;
    async fn update_entity_non_rd_percentage(
        &self,
        id: &str,
        non_rd_percentage: Decimal,
    ) -> Result<(), RepositoryError>;
    async fn update_entity_role(
        &self,
        id: &str,
        role_id: Option<&str>,
    ) -> Result<(), RepositoryError>;

    // Selected activities
    /// Replaces every selected activity of the business year.
    async fn save_selected_activities(
        &self,
        business_year_id: &str,
        activities: &[SelectedActivity],
    ) -> Result<(), RepositoryError>;
    async fn list_selected_activities(
        &self,
        business_year_id: &str,
    ) -> Result<Vec<SelectedActivity>, RepositoryError>;
    /// Also deletes the entity allocations that reference the activity.
    async fn delete_selected_activity(
        &self,
        business_year_id: &str,
        activity_id: &str,
    ) -> Result<(), RepositoryError>;

    // Entity allocations
    async fn replace_entity_allocations(
        &self,
        entity_id: &str,
        business_year_id: &str,
        allocations: &[EntitySubcomponentAllocation],
    ) -> Result<(), RepositoryError>;
    async fn list_entity_allocations(
        &self,
        business_year_id: &str,
    ) -> Result<Vec<EntitySubcomponentAllocation>, RepositoryError>;

    // Entity year records
    /// Inserts or replaces the record for the entity and business year.
    async fn save_entity_year_record(
        &self,
        record: &EntityYearRecord,
    ) -> Result<(), RepositoryError>;
    async fn get_entity_year_record(
        &self,
        entity_id: &str,
        business_year_id: &str,
    ) -> Result<EntityYearRecord, RepositoryError>;
    async fn list_entity_year_records(
        &self,
        business_year_id: &str,
    ) -> Result<Vec<EntityYearRecord>, RepositoryError>;
}
