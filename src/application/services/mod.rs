//! Application services
//!
//! The reconciliation engine owns the tree and the summing matrix; every
//! strategy is a method on it returning a fresh forecast plus whatever
//! proportions or diagnostics it produced.

mod combination;
mod reconciliation;

pub use combination::{CombinationOptions, CombinationResult, StepDiagnostics};
pub use reconciliation::{
    ProportionKind, ProportionalResult, ReconciliationEngine, StaticProportions, TopDownResult,
};
