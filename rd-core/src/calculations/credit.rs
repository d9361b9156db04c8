//! Federal and state research credit.
//!
//! Both federal methods are computed for every request so the caller can
//! compare them; the selected method decides the final amount.
//!
//! # Alternative Simplified Credit (ASC)
//!
//! | Prior years with QRE | Rate | Base |
//! |----------------------|------|------|
//! | 3                    | 14%  | current QRE − 50% of the 3-year average |
//! | fewer than 3         | 6%   | current QRE − 50% of the average of the non-zero years |
//!
//! # Standard Credit
//!
//! The base amount is the larger of 10% of average gross receipts and 50% of
//! current QRE. The credit is 20% of current QRE above the base amount.
//!
//! # Section 280C
//!
//! Electing 280C multiplies the credit by `1 − corporate tax rate` (0.79 at
//! the default 21% rate).
//!
//! Credits are not floored at zero. Presenting a negative credit as zero is
//! the caller's decision.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use rd_core::calculations::credit::{CreditCalculator, CreditConfig};
//!
//! let calculator = CreditCalculator::new(CreditConfig::default());
//! let asc = calculator.asc_credit(dec!(100000), &[dec!(80000), dec!(85000), dec!(90000)], true);
//!
//! assert_eq!(asc.base_credit, dec!(8050.00));
//! assert_eq!(asc.final_credit, dec!(6359.50));
//! ```

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::calculations::common::{mean, round_half_up};
use crate::models::YearData;

/// Prior years considered by the ASC.
const ASC_LOOKBACK_YEARS: usize = 3;

/// Prior years whose gross receipts feed the standard credit base.
const STANDARD_LOOKBACK_YEARS: usize = 4;

/// Errors that can occur when validating a [`CreditConfig`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CreditConfigError {
    #[error("{field} must be between 0 and 1, got {value}")]
    InvalidRate { field: &'static str, value: Decimal },
}

/// Federal credit method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditMethod {
    #[default]
    Asc,
    Standard,
}

impl CreditMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Standard => "standard",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Some(Self::Asc),
            "standard" => Some(Self::Standard),
            _ => None,
        }
    }
}

impl fmt::Display for CreditMethod {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Asc => write!(f, "ASC"),
            Self::Standard => write!(f, "Standard"),
        }
    }
}

/// Rates used by the credit calculations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditConfig {
    /// Drives the 280C factor.
    pub corporate_tax_rate: Decimal,
    pub asc_rate: Decimal,
    /// ASC rate with fewer than three prior years of QRE.
    pub asc_startup_rate: Decimal,
    pub standard_rate: Decimal,
    /// Share of average gross receipts in the standard base amount.
    pub receipts_base_rate: Decimal,
    /// Share of current QRE in the standard base amount.
    pub qre_base_rate: Decimal,
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self {
            corporate_tax_rate: dec!(0.21),
            asc_rate: dec!(0.14),
            asc_startup_rate: dec!(0.06),
            standard_rate: dec!(0.20),
            receipts_base_rate: dec!(0.10),
            qre_base_rate: dec!(0.50),
        }
    }
}

impl CreditConfig {
    /// # Errors
    ///
    /// Returns [`CreditConfigError::InvalidRate`] for the first rate outside
    /// `[0, 1]`.
    pub fn validate(&self) -> Result<(), CreditConfigError> {
        let rates = [
            ("corporate_tax_rate", self.corporate_tax_rate),
            ("asc_rate", self.asc_rate),
            ("asc_startup_rate", self.asc_startup_rate),
            ("standard_rate", self.standard_rate),
            ("receipts_base_rate", self.receipts_base_rate),
            ("qre_base_rate", self.qre_base_rate),
        ];
        for (field, value) in rates {
            if value < Decimal::ZERO || value > Decimal::ONE {
                return Err(CreditConfigError::InvalidRate { field, value });
            }
        }
        Ok(())
    }

    pub fn section_280c_factor(&self) -> Decimal {
        Decimal::ONE - self.corporate_tax_rate
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditCalculationInput {
    pub year: i32,
    pub current_qre: Decimal,
    /// Any number of years; only those before `year` are used.
    pub prior_years: Vec<YearData>,
    pub use_280c: bool,
    pub method: CreditMethod,
    /// Two-letter state code.
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AscCredit {
    pub average_prior_qre: Decimal,
    /// Prior years with non-zero QRE.
    pub qualifying_years: usize,
    pub is_startup: bool,
    pub base_credit: Decimal,
    pub final_credit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardCredit {
    pub average_gross_receipts: Decimal,
    pub base_amount: Decimal,
    pub incremental_qre: Decimal,
    pub base_credit: Decimal,
    pub final_credit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederalCredit {
    pub final_amount: Decimal,
    pub selected_method: CreditMethod,
    pub asc: AscCredit,
    pub standard: StandardCredit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCredit {
    pub state: String,
    pub rate: Decimal,
    pub qre: Decimal,
    pub credit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditResult {
    pub federal: FederalCredit,
    pub state: Option<StateCredit>,
}

/// Simplified flat state research credit rate. Unknown states have none.
pub fn state_credit_rate(state: &str) -> Decimal {
    match state.trim().to_ascii_uppercase().as_str() {
        "CA" | "VA" => dec!(0.15),
        "NY" => dec!(0.09),
        "TX" | "WI" | "MO" => dec!(0.05),
        "IL" => dec!(0.065),
        "PA" | "IN" | "MN" => dec!(0.10),
        "OH" => dec!(0.07),
        "MI" => dec!(0.04),
        "GA" | "CO" => dec!(0.03),
        "NC" => dec!(0.025),
        _ => Decimal::ZERO,
    }
}

/// Calculator for the federal and state credit.
#[derive(Debug, Clone)]
pub struct CreditCalculator {
    config: CreditConfig,
}

impl CreditCalculator {
    pub fn new(config: CreditConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CreditConfig {
        &self.config
    }

    /// Computes both federal methods and the state credit.
    ///
    /// # Errors
    ///
    /// Returns [`CreditConfigError`] if the configuration is invalid.
    pub fn calculate(
        &self,
        input: &CreditCalculationInput,
    ) -> Result<CreditResult, CreditConfigError> {
        self.config.validate()?;

        let mut priors: Vec<&YearData> = input
            .prior_years
            .iter()
            .filter(|p| p.year < input.year)
            .collect();
        priors.sort_by(|a, b| b.year.cmp(&a.year));

        let prior_qres: Vec<Decimal> = priors
            .iter()
            .take(ASC_LOOKBACK_YEARS)
            .map(|p| p.effective_qre())
            .collect();
        let gross_receipts: Vec<Decimal> = priors
            .iter()
            .take(STANDARD_LOOKBACK_YEARS)
            .map(|p| p.gross_receipts)
            .collect();

        let asc = self.asc_credit(input.current_qre, &prior_qres, input.use_280c);
        let standard = self.standard_credit(input.current_qre, &gross_receipts, input.use_280c);
        let final_amount = match input.method {
            CreditMethod::Asc => asc.final_credit,
            CreditMethod::Standard => standard.final_credit,
        };

        let state = input
            .state
            .as_deref()
            .and_then(|code| self.state_credit(code, input.current_qre));

        debug!(
            year = input.year,
            method = input.method.as_str(),
            final_amount = %final_amount,
            "calculated federal credit"
        );

        Ok(CreditResult {
            federal: FederalCredit {
                final_amount,
                selected_method: input.method,
                asc,
                standard,
            },
            state,
        })
    }

    /// Alternative Simplified Credit over the given prior-year QREs.
    pub fn asc_credit(
        &self,
        current_qre: Decimal,
        prior_qres: &[Decimal],
        use_280c: bool,
    ) -> AscCredit {
        let non_zero: Vec<Decimal> = prior_qres
            .iter()
            .copied()
            .filter(|q| !q.is_zero())
            .collect();
        let is_startup = non_zero.len() != ASC_LOOKBACK_YEARS;
        let rate = if is_startup {
            self.config.asc_startup_rate
        } else {
            self.config.asc_rate
        };
        let average_prior_qre = mean(&non_zero);

        let base = rate * (current_qre - average_prior_qre * dec!(0.5));

        AscCredit {
            average_prior_qre: round_half_up(average_prior_qre),
            qualifying_years: non_zero.len(),
            is_startup,
            base_credit: round_half_up(base),
            final_credit: round_half_up(self.apply_280c(base, use_280c)),
        }
    }

    /// Standard credit over the given gross receipts.
    pub fn standard_credit(
        &self,
        current_qre: Decimal,
        gross_receipts: &[Decimal],
        use_280c: bool,
    ) -> StandardCredit {
        let average_gross_receipts = mean(gross_receipts);
        let base_amount = (average_gross_receipts * self.config.receipts_base_rate)
            .max(current_qre * self.config.qre_base_rate);
        let incremental_qre = current_qre - base_amount;
        let base = incremental_qre * self.config.standard_rate;

        StandardCredit {
            average_gross_receipts: round_half_up(average_gross_receipts),
            base_amount: round_half_up(base_amount),
            incremental_qre: round_half_up(incremental_qre),
            base_credit: round_half_up(base),
            final_credit: round_half_up(self.apply_280c(base, use_280c)),
        }
    }

    /// State credit, `None` when the state has no credit.
    pub fn state_credit(
        &self,
        state: &str,
        qre: Decimal,
    ) -> Option<StateCredit> {
        let rate = state_credit_rate(state);
        if rate <= Decimal::ZERO {
            return None;
        }
        Some(StateCredit {
            state: state.trim().to_ascii_uppercase(),
            rate,
            qre,
            credit: round_half_up(qre * rate),
        })
    }

    fn apply_280c(
        &self,
        amount: Decimal,
        use_280c: bool,
    ) -> Decimal {
        if use_280c {
            amount * self.config.section_280c_factor()
        } else {
            amount
        }
    }
}
