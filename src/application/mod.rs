//! Application layer: reconciliation use cases
//!
//! This layer orchestrates the hierarchy, the summing matrix and the solvers.

pub mod error;
pub mod services;

pub use error::{ApplicationError, ApplicationResult};
pub use services::{
    CombinationOptions, CombinationResult, ProportionKind, ProportionalResult,
    ReconciliationEngine, StaticProportions, StepDiagnostics, TopDownResult,
};
