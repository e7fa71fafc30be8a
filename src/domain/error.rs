//! Domain-level errors (no external dependencies)

use thiserror::Error;

/// Malformed hierarchy definitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructureError {
    #[error("missing 'root' key in hierarchy")]
    MissingRoot,

    #[error("node '{name}' is listed under both '{first_parent}' and '{second_parent}'")]
    DuplicateNode {
        name: String,
        first_parent: String,
        second_parent: String,
    },

    #[error("cycle detected in hierarchy: '{0}' is its own ancestor")]
    CycleDetected(String),

    #[error("hierarchy expansion did not terminate after {0} rounds")]
    ExpansionLimit(usize),
}

/// Domain errors represent invalid inputs to tree construction and reconciliation.
/// They are raised before any numeric work starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("invalid hierarchy: {0}")]
    Structure(#[from] StructureError),

    #[error(
        "'{argument}' must have exactly the columns {expected:?} (missing: {missing:?}, unexpected: {unexpected:?})"
    )]
    ColumnMismatch {
        argument: String,
        expected: Vec<String>,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("invalid solver backend '{0}', expected one of: lsqr, lsmr")]
    InvalidBackend(String),

    #[error("invalid bounds: {0}")]
    InvalidBounds(String),

    #[error("invalid proportion kind '{0}', expected one of: ahp, pha")]
    InvalidProportionKind(String),

    #[error("invalid weight for node '{node}': {value}")]
    InvalidWeight { node: String, value: f64 },

    #[error("invalid level {level}: hierarchy has {depth} levels")]
    InvalidLevel { level: usize, depth: usize },

    #[error("'{0}' has no rows")]
    EmptyFrame(String),

    #[error("invalid table shape: {0}")]
    Shape(String),
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
