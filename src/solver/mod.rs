//! Iterative sparse least-squares solvers
//!
//! `lsqr` and `lsmr` solve `min ‖A x − b‖₂` using only products with `A` and `Aᵗ`.
//! `bounded` refines a solution so it respects per-variable box constraints.

pub mod bounded;
pub mod lsmr;
pub mod lsqr;
pub mod operator;

use std::fmt;
use std::str::FromStr;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

pub use bounded::{Bound, BoundedOptions, BoundedReport, BoundedSolution, BoundedStatus, Bounds};
pub use operator::{LinearOperator, SparseOperator};

/// Iterative solver used for the unconstrained problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Lsqr,
    Lsmr,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Lsqr => "lsqr",
            Backend::Lsmr => "lsmr",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lsqr" => Ok(Backend::Lsqr),
            "lsmr" => Ok(Backend::Lsmr),
            _ => Err(DomainError::InvalidBackend(s.to_string())),
        }
    }
}

/// Tolerances and limits shared by both backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverOptions {
    /// Damping factor of the regularized problem `min ‖Ax − b‖² + damp²‖x‖²`
    pub damp: f64,
    /// Relative error tolerance on `A`
    pub atol: f64,
    /// Relative error tolerance on `b`
    pub btol: f64,
    /// Stop once the condition estimate exceeds this value (0 disables)
    pub conlim: f64,
    /// Iteration cap; `None` uses the backend default (2n for lsqr, min(m, n) for lsmr)
    pub max_iter: Option<usize>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            damp: 0.0,
            atol: 1e-6,
            btol: 1e-6,
            conlim: 1e8,
            max_iter: None,
        }
    }
}

/// Why an iterative solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `x = 0` is the exact solution
    ZeroSolution,
    /// `x` approximately solves `A x = b` within atol/btol
    Compatible,
    /// `x` approximately solves the least-squares problem within atol
    LeastSquares,
    /// condition estimate exceeded conlim
    IllConditioned,
    /// as `Compatible` with atol = btol = machine precision
    CompatibleAtEps,
    /// as `LeastSquares` with atol = machine precision
    LeastSquaresAtEps,
    /// condition estimate exceeded 1/eps
    IllConditionedAtEps,
    /// iteration cap reached before any other criterion
    IterationLimit,
}

impl StopReason {
    /// Conventional numeric stop code (0..=7).
    pub fn code(&self) -> u8 {
        match self {
            StopReason::ZeroSolution => 0,
            StopReason::Compatible => 1,
            StopReason::LeastSquares => 2,
            StopReason::IllConditioned => 3,
            StopReason::CompatibleAtEps => 4,
            StopReason::LeastSquaresAtEps => 5,
            StopReason::IllConditionedAtEps => 6,
            StopReason::IterationLimit => 7,
        }
    }

    pub fn converged(&self) -> bool {
        !matches!(
            self,
            StopReason::IllConditioned
                | StopReason::IllConditionedAtEps
                | StopReason::IterationLimit
        )
    }

    /// Pick the stop reason from the standard test quantities.
    ///
    /// The checks are ordered so that the most favourable criterion wins.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn select(
        itn: usize,
        max_iter: usize,
        test1: f64,
        rtol: f64,
        test2: f64,
        atol: f64,
        test3: f64,
        ctol: f64,
        t1: f64,
    ) -> Option<Self> {
        if test1 <= rtol {
            Some(StopReason::Compatible)
        } else if test2 <= atol {
            Some(StopReason::LeastSquares)
        } else if test3 <= ctol {
            Some(StopReason::IllConditioned)
        } else if 1.0 + t1 <= 1.0 {
            Some(StopReason::CompatibleAtEps)
        } else if 1.0 + test2 <= 1.0 {
            Some(StopReason::LeastSquaresAtEps)
        } else if 1.0 + test3 <= 1.0 {
            Some(StopReason::IllConditionedAtEps)
        } else if itn >= max_iter {
            Some(StopReason::IterationLimit)
        } else {
            None
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::ZeroSolution => "x = 0 is a solution",
            StopReason::Compatible => "x is an approximate solution to A x = b",
            StopReason::LeastSquares => "x approximately solves the least-squares problem",
            StopReason::IllConditioned => "cond(A) seems to be greater than conlim",
            StopReason::CompatibleAtEps => {
                "x is an approximate solution to A x = b at machine precision"
            }
            StopReason::LeastSquaresAtEps => {
                "x approximately solves the least-squares problem at machine precision"
            }
            StopReason::IllConditionedAtEps => "cond(A) seems to be greater than 1/eps",
            StopReason::IterationLimit => "iteration limit reached",
        };
        write!(f, "{}. {}", self.code(), text)
    }
}

/// Diagnostics of one solve. Informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverReport {
    pub backend: Backend,
    pub stop: StopReason,
    pub iterations: usize,
    /// `‖b − A x‖`
    pub residual_norm: f64,
    /// `‖Aᵗ(b − A x)‖` (damped problem)
    pub normal_residual_norm: f64,
    /// Frobenius norm estimate of `A`
    pub operator_norm: f64,
    /// Condition number estimate of `A`
    pub condition: f64,
    /// `‖x‖`
    pub solution_norm: f64,
}

#[derive(Debug, Clone)]
pub struct Solution {
    pub x: DVector<f64>,
    pub report: SolverReport,
}

/// Solve `min ‖A x − b‖₂` with the selected backend.
pub fn solve<O: LinearOperator + ?Sized>(
    backend: Backend,
    op: &O,
    b: &DVector<f64>,
    options: &SolverOptions,
) -> Solution {
    match backend {
        Backend::Lsqr => lsqr::lsqr(op, b, options),
        Backend::Lsmr => lsmr::lsmr(op, b, options),
    }
}

/// Stable Givens rotation: returns `(c, s, r)` with `[c s; -s c] [a; b] = [r; 0]`.
pub(crate) fn sym_ortho(a: f64, b: f64) -> (f64, f64, f64) {
    if b == 0.0 {
        (sign(a), 0.0, a.abs())
    } else if a == 0.0 {
        (0.0, sign(b), b.abs())
    } else if b.abs() > a.abs() {
        let tau = a / b;
        let s = sign(b) / (1.0 + tau * tau).sqrt();
        let c = s * tau;
        (c, s, b / s)
    } else {
        let tau = b / a;
        let c = sign(a) / (1.0 + tau * tau).sqrt();
        let s = c * tau;
        (c, s, a / c)
    }
}

/// Sign with `sign(0) = 0`.
pub(crate) fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}
