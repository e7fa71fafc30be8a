//! Optimal combination: per time step weighted least squares `min ‖W^½(y − Sβ)‖₂`.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::ReconciliationEngine;
use crate::application::ApplicationResult;
use crate::domain::frame::ensure_names;
use crate::domain::{DomainError, Frame};
use crate::solver::{
    self, bounded, Backend, Bound, BoundedOptions, BoundedReport, Bounds, SolverOptions,
    SolverReport, SparseOperator,
};

/// Inputs of [`ReconciliationEngine::optimal_combination`] besides the forecast.
#[derive(Debug, Clone, Default)]
pub struct CombinationOptions {
    /// Diagonal weight per tree node; `None` means identity
    pub weights: Option<BTreeMap<String, f64>>,
    pub backend: Backend,
    /// Box constraints per bottom node; requires [`Backend::Lsmr`]
    pub bounds: Option<BTreeMap<String, Bound>>,
    pub solver: SolverOptions,
    pub bounded: BoundedOptions,
    /// Solve time steps on the rayon pool
    pub parallel: bool,
}

impl CombinationOptions {
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_weights(mut self, weights: BTreeMap<String, f64>) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_bounds(mut self, bounds: BTreeMap<String, Bound>) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_solver(mut self, solver: SolverOptions) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_bounded(mut self, bounded: BoundedOptions) -> Self {
        self.bounded = bounded;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Solver metadata of one time step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDiagnostics {
    /// Row label of the time step
    pub index: String,
    pub report: SolverReport,
    /// Present when bounds were given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refinement: Option<BoundedReport>,
}

#[derive(Debug, Clone)]
pub struct CombinationResult {
    pub forecast: Frame,
    /// One entry per row, in row order
    pub diagnostics: Vec<StepDiagnostics>,
}

impl ReconciliationEngine {
    /// Reconcile a forecast of every node by least squares against the summing matrix.
    ///
    /// Non-convergence is not an error; inspect `diagnostics` for stop reasons.
    #[instrument(level = "debug", skip_all, fields(rows = forecast_all.nrows(), backend = %options.backend))]
    pub fn optimal_combination(
        &self,
        forecast_all: &Frame,
        options: &CombinationOptions,
    ) -> ApplicationResult<CombinationResult> {
        let tree_nodes = self.tree_nodes();
        forecast_all.ensure_columns("forecast_all", tree_nodes)?;
        let sqrt_weights = self.sqrt_weights(options.weights.as_ref())?;
        let bounds = self.resolve_bounds(options)?;

        let ordered = forecast_all.select(tree_nodes)?;
        let operator = match &sqrt_weights {
            Some(scales) => SparseOperator::row_scaled(self.summing().sparse(), scales.as_slice()),
            None => SparseOperator::new(self.summing().sparse().clone()),
        };

        let solve_step = |t: usize| -> (DVector<f64>, StepDiagnostics) {
            let mut b = ordered.row(t);
            if let Some(scales) = &sqrt_weights {
                b.component_mul_assign(scales);
            }
            let solution = solver::solve(options.backend, &operator, &b, &options.solver);
            let (x, refinement) = match &bounds {
                Some(bounds) => {
                    let refined =
                        bounded::solve(&operator, &b, &solution.x, bounds, &options.bounded);
                    (refined.x, Some(refined.report))
                }
                None => (solution.x, None),
            };
            let index = ordered.index()[t].clone();
            debug!(
                step = %index,
                stop = %solution.report.stop,
                iterations = solution.report.iterations,
                residual = solution.report.residual_norm,
                refinement = ?refinement.as_ref().map(|r| r.status),
                "optimal combination step"
            );
            (
                x,
                StepDiagnostics {
                    index,
                    report: solution.report,
                    refinement,
                },
            )
        };

        let steps: Vec<(DVector<f64>, StepDiagnostics)> = if options.parallel {
            (0..ordered.nrows()).into_par_iter().map(solve_step).collect()
        } else {
            (0..ordered.nrows()).map(solve_step).collect()
        };

        let bottom_nodes = self.bottom_nodes();
        let values = DMatrix::from_fn(steps.len(), bottom_nodes.len(), |i, j| steps[i].0[j]);
        let bottom_forecast = Frame::new(ordered.index().to_vec(), bottom_nodes.to_vec(), values)?;
        let forecast = self.bottom_up(&bottom_forecast)?;

        Ok(CombinationResult {
            forecast,
            diagnostics: steps.into_iter().map(|(_, diagnostics)| diagnostics).collect(),
        })
    }

    /// `√w` per tree node in `tree_nodes` order.
    fn sqrt_weights(
        &self,
        weights: Option<&BTreeMap<String, f64>>,
    ) -> ApplicationResult<Option<DVector<f64>>> {
        let Some(weights) = weights else {
            return Ok(None);
        };
        let tree_nodes = self.tree_nodes();
        ensure_names("weights", tree_nodes, weights.keys().map(String::as_str))?;
        if let Some((node, &value)) = weights
            .iter()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(DomainError::InvalidWeight {
                node: node.clone(),
                value,
            }
            .into());
        }
        Ok(Some(DVector::from_iterator(
            tree_nodes.len(),
            tree_nodes
                .iter()
                .map(|name| weights.get(name).copied().unwrap_or(1.0).sqrt()),
        )))
    }

    /// Positional bounds over `bottom_nodes`; missing nodes are unbounded.
    fn resolve_bounds(&self, options: &CombinationOptions) -> ApplicationResult<Option<Bounds>> {
        let Some(named) = &options.bounds else {
            return Ok(None);
        };
        if options.backend != Backend::Lsmr {
            return Err(DomainError::InvalidBounds(format!(
                "bounds require the lsmr backend, got {}",
                options.backend
            ))
            .into());
        }

        let bottom_nodes = self.bottom_nodes();
        let unexpected: Vec<String> = named
            .keys()
            .filter(|name| !bottom_nodes.contains(*name))
            .cloned()
            .collect();
        if !unexpected.is_empty() {
            return Err(DomainError::ColumnMismatch {
                argument: "bounds".to_string(),
                expected: bottom_nodes.to_vec(),
                missing: Vec::new(),
                unexpected,
            }
            .into());
        }

        let intervals: Vec<Bound> = bottom_nodes
            .iter()
            .map(|name| named.get(name).copied().unwrap_or_default())
            .collect();
        Ok(Some(Bounds::from_intervals(&intervals)?))
    }
}
