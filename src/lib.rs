//! Hierarchical time series reconciliation.
//!
//! Layers, innermost first:
//! - [`domain`]: hierarchy tree, summing matrix, time-indexed frames
//! - [`solver`]: LSQR/LSMR and bounded least squares over matrix-free operators
//! - [`application`]: the [`ReconciliationEngine`] and its strategies
//! - [`infrastructure`]: file loading
//! - [`cli`]: the `htsr` front end
//!
//! ```no_run
//! use hts_reconcile::{Frame, Hierarchy, ReconciliationEngine};
//!
//! let hierarchy = Hierarchy::new()
//!     .with_children("root", ["A", "B"])
//!     .with_children("A", ["A1", "A2"]);
//! let engine = ReconciliationEngine::new(&hierarchy)?;
//! let bottom = Frame::from_rows(&["A1", "A2", "B"], &[vec![1.0, 2.0, 3.0]])?;
//! let all = engine.bottom_up(&bottom)?;
//! assert_eq!(all.get(0, "root"), Some(6.0));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod exitcode;
pub mod infrastructure;
pub mod solver;
pub mod util;

pub use application::{
    ApplicationError, ApplicationResult, CombinationOptions, CombinationResult, ProportionKind,
    ProportionalResult, ReconciliationEngine, StaticProportions, StepDiagnostics, TopDownResult,
};
pub use domain::{
    build_tree, DomainError, DomainResult, Frame, Hierarchy, StructureError, SummingMatrix,
    TreeArena, ROOT,
};
pub use solver::{Backend, Bound, BoundedOptions, SolverOptions};
