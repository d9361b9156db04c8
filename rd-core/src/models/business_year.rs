use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One tax year of a business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessYear {
    pub id: String,
    pub business_id: String,
    pub year: i32,
    /// First year the business operated; bounds carry-forward.
    pub business_start_year: i32,
    pub gross_receipts: Decimal,
    /// Time outside research, anchoring the practice budget.
    pub non_rd_percentage: Decimal,
    /// QRE entered by hand (historical years).
    pub manual_qre: Option<Decimal>,
    /// When set, these values replace the calculated breakdown.
    pub locked_qre: Option<LockedQre>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedQre {
    pub employee_qre: Decimal,
    pub contractor_qre: Decimal,
    pub supply_qre: Decimal,
}

/// QRE and gross receipts of a prior year, as consumed by the credit
/// calculations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearData {
    pub year: i32,
    /// Calculated QRE for the year.
    pub qre_amount: Decimal,
    pub gross_receipts: Decimal,
    /// QRE entered by hand. Takes priority over `qre_amount` when positive.
    pub manual_qre: Option<Decimal>,
}

impl YearData {
    pub fn new(
        year: i32,
        qre_amount: Decimal,
        gross_receipts: Decimal,
    ) -> Self {
        Self {
            year,
            qre_amount,
            gross_receipts,
            manual_qre: None,
        }
    }

    /// The QRE the credit calculations should use for this year.
    pub fn effective_qre(&self) -> Decimal {
        match self.manual_qre {
            Some(manual) if manual > Decimal::ZERO => manual,
            _ => self.qre_amount,
        }
    }
}
