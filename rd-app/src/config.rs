//! Application configuration loaded from an optional TOML file.
//!
//! ```toml
//! [database]
//! backend = "sqlite"
//! connection_string = "rd_credit.db"
//!
//! [credit]
//! corporate_tax_rate = 0.21
//! method = "asc"
//! use_280c = true
//! state = "CA"
//!
//! [session]
//! debounce_ms = 650
//!
//! [logging]
//! level = "info"
//! file = "rd_credit.log"
//! ```
//!
//! Every section and key is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rd_core::calculations::{CreditConfig, CreditMethod};
use rd_core::db::DbConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Shortest and longest accepted debounce windows, in milliseconds.
pub const DEBOUNCE_RANGE_MS: (u64, u64) = (500, 800);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DbConfig,
    pub credit: CreditSettings,
    pub session: SessionSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreditSettings {
    pub corporate_tax_rate: Decimal,
    pub method: CreditMethod,
    pub use_280c: bool,
    pub state: Option<String>,
}

impl Default for CreditSettings {
    fn default() -> Self {
        Self {
            corporate_tax_rate: CreditConfig::default().corporate_tax_rate,
            method: CreditMethod::default(),
            use_280c: false,
            state: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub debounce_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self { debounce_ms: 650 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl AppConfig {
    /// Reads the file at `path`, or returns the defaults when no path is
    /// given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        let config = Self::from_toml(&text)
            .with_context(|| format!("Invalid config file '{}'", path.display()))?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let (min, max) = DEBOUNCE_RANGE_MS;
        if !(min..=max).contains(&self.session.debounce_ms) {
            bail!(
                "session.debounce_ms must be between {} and {}, got {}",
                min,
                max,
                self.session.debounce_ms
            );
        }
        if let Some(state) = &self.credit.state {
            if state.len() != 2 || !state.chars().all(|c| c.is_ascii_alphabetic()) {
                bail!("credit.state must be a two-letter code, got '{}'", state);
            }
        }
        self.credit_config()
            .validate()
            .context("Invalid [credit] section")?;
        Ok(())
    }

    /// Credit rates with the configured corporate tax rate.
    pub fn credit_config(&self) -> CreditConfig {
        CreditConfig {
            corporate_tax_rate: self.credit.corporate_tax_rate,
            ..CreditConfig::default()
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.session.debounce_ms)
    }
}
