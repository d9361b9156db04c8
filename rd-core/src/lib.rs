pub mod calculations;
pub mod db;
pub mod models;
pub mod session;

pub use db::{RdRepository, RepositoryError};
pub use models::*;
