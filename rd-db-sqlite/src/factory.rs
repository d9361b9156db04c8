use async_trait::async_trait;
use tracing::info;

use rd_core::db::repository::{RdRepository, RepositoryError};
use rd_core::db::{DbConfig, RepositoryFactory};

use crate::repository::SqliteRepository;

/// Turn a configured connection string into a sqlx SQLite URL.
///
/// * `":memory:"` becomes `sqlite::memory:`.
/// * Values already starting with `sqlite:` are passed through.
/// * Anything else is a file path.
pub fn database_url(connection_string: &str) -> String {
    let trimmed = connection_string.trim();
    if trimmed == ":memory:" {
        "sqlite::memory:".to_string()
    } else if trimmed.starts_with("sqlite:") {
        trimmed.to_string()
    } else {
        format!("sqlite:{}", trimmed)
    }
}

/// [`RepositoryFactory`] for SQLite.
///
/// Register this with a [`rd_core::db::RepositoryRegistry`] to make the
/// `"sqlite"` backend available:
///
/// ```rust,no_run
/// use rd_core::db::RepositoryRegistry;
/// use rd_db_sqlite::SqliteRepositoryFactory;
///
/// let mut registry = RepositoryRegistry::new();
/// registry.register(Box::new(SqliteRepositoryFactory));
/// ```
pub struct SqliteRepositoryFactory;

#[async_trait]
impl RepositoryFactory for SqliteRepositoryFactory {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    /// Open the database described by `config.connection_string` and bring
    /// its schema up to date.
    ///
    /// Accepted connection-string values:
    /// * A bare file path, e.g. `"rd_credit.db"`. The file is created if it
    ///   does not exist.
    /// * `":memory:"`, an ephemeral in-memory database.
    /// * A sqlx URL such as `"sqlite:rd.db?mode=rwc"`.
    async fn create(
        &self,
        config: &DbConfig,
    ) -> Result<Box<dyn RdRepository>, RepositoryError> {
        let url = database_url(&config.connection_string);
        let repo = SqliteRepository::new(&url)
            .await
            .map_err(|e| RepositoryError::Connection(format!("{:#}", e)))?;
        repo.run_migrations()
            .await
            .map_err(|e| RepositoryError::Database(format!("{:#}", e)))?;

        info!(url = %url, "opened sqlite repository");
        Ok(Box::new(repo))
    }
}
