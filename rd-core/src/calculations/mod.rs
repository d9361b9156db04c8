//! The R&D credit calculation engine.
//!
//! Everything here is pure: no I/O, no shared state. Callers pass records in
//! and persist whatever comes back.

pub mod allocation;
pub mod carry_forward;
pub mod common;
pub mod credit;
pub mod entity_qre;
pub mod percentage;

pub use allocation::{
    AllocationBudget, AllocationError, AllocationSegment, PracticeShare, Redistribution,
    SegmentKind,
};
pub use carry_forward::{
    CarryForwardError, CarryForwardRequest, CarryForwardTarget, copy_activities_to_previous_years,
    lookback_years,
};
pub use credit::{
    AscCredit, CreditCalculationInput, CreditCalculator, CreditConfig, CreditConfigError,
    CreditMethod, CreditResult, FederalCredit, StandardCredit, StateCredit,
};
pub use entity_qre::{EntityQreResult, QreBreakdown, baseline_allocations, calculate_entity_qre};
pub use percentage::PercentageError;
