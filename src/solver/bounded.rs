//! Bound-constrained linear least squares, trust-region reflective (Coleman & Li).
//!
//! Minimizes `½‖A x − b‖²` subject to `lower ≤ x ≤ upper`. Iterates stay strictly
//! inside the box; each step solves a scaled, regularized subproblem with LSMR and
//! then picks the best of the (truncated) Newton step, its reflection off the hit
//! bound, and the scaled steepest-descent step.

use std::fmt;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::lsmr::lsmr;
use super::operator::{ColumnScaled, LinearOperator, Regularized};
use super::SolverOptions;
use crate::domain::{DomainError, DomainResult};

/// Interval for one variable; missing ends are unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    #[serde(default = "neg_infinity")]
    pub lower: f64,
    #[serde(default = "infinity")]
    pub upper: f64,
}

fn neg_infinity() -> f64 {
    f64::NEG_INFINITY
}

fn infinity() -> f64 {
    f64::INFINITY
}

impl Default for Bound {
    fn default() -> Self {
        Self {
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        }
    }
}

impl Bound {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }
}

/// Positional box constraints, one interval per unknown.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    lower: DVector<f64>,
    upper: DVector<f64>,
}

impl Bounds {
    /// Every lower bound must be strictly below its upper bound.
    pub fn new(lower: DVector<f64>, upper: DVector<f64>) -> DomainResult<Self> {
        if lower.len() != upper.len() {
            return Err(DomainError::InvalidBounds(format!(
                "{} lower bounds for {} upper bounds",
                lower.len(),
                upper.len()
            )));
        }
        if let Some(i) = (0..lower.len()).find(|&i| !(lower[i] < upper[i])) {
            return Err(DomainError::InvalidBounds(format!(
                "lower bound {} must be strictly less than upper bound {} (position {})",
                lower[i], upper[i], i
            )));
        }
        Ok(Self { lower, upper })
    }

    pub fn from_intervals(intervals: &[Bound]) -> DomainResult<Self> {
        Self::new(
            DVector::from_iterator(intervals.len(), intervals.iter().map(|b| b.lower)),
            DVector::from_iterator(intervals.len(), intervals.iter().map(|b| b.upper)),
        )
    }

    pub fn lower(&self) -> &DVector<f64> {
        &self.lower
    }

    pub fn upper(&self) -> &DVector<f64> {
        &self.upper
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn contains(&self, x: &DVector<f64>) -> bool {
        in_bounds(x, &self.lower, &self.upper)
    }
}

/// Settings of the bounded refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundedOptions {
    /// Stop when the scaled gradient or the relative cost change drops below this
    pub tol: f64,
    pub max_iter: usize,
    /// Fixed subproblem tolerance; `None` adapts it to the current optimality
    pub lsmr_tol: Option<f64>,
    pub lsmr_max_iter: Option<usize>,
}

impl Default for BoundedOptions {
    fn default() -> Self {
        Self {
            tol: 1e-10,
            max_iter: 100,
            lsmr_tol: None,
            lsmr_max_iter: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundedStatus {
    /// The unconstrained seed already satisfied the bounds
    Unconstrained,
    /// First-order optimality measure below tolerance
    GradientTolerance,
    /// Relative cost reduction below tolerance
    CostTolerance,
    /// The subproblem returned an ascent direction
    AscentDirection,
    IterationLimit,
}

impl fmt::Display for BoundedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BoundedStatus::Unconstrained => "unconstrained solution is optimal",
            BoundedStatus::GradientTolerance => "first-order optimality below tolerance",
            BoundedStatus::CostTolerance => "relative cost change below tolerance",
            BoundedStatus::AscentDirection => "subproblem produced an ascent direction",
            BoundedStatus::IterationLimit => "iteration limit reached",
        };
        f.write_str(text)
    }
}

/// Diagnostics of one bounded refinement. Informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundedReport {
    pub status: BoundedStatus,
    pub iterations: usize,
    /// `½‖A x − b‖²` at the returned point
    pub cost: f64,
    /// Infinity norm of the scaled gradient at the returned point
    pub optimality: f64,
    /// Number of variables sitting on (or numerically at) a bound
    pub active: usize,
}

#[derive(Debug, Clone)]
pub struct BoundedSolution {
    pub x: DVector<f64>,
    pub report: BoundedReport,
}

const BACKTRACK_MIN_ALPHA: f64 = 1e-12;

/// Refine `x_seed` (usually the unconstrained solution) to respect `bounds`.
#[instrument(level = "debug", skip_all, fields(n = x_seed.len()))]
pub fn solve<O: LinearOperator + ?Sized>(
    op: &O,
    b: &DVector<f64>,
    x_seed: &DVector<f64>,
    bounds: &Bounds,
    options: &BoundedOptions,
) -> BoundedSolution {
    let (lb, ub) = (&bounds.lower, &bounds.upper);

    if bounds.contains(x_seed) {
        let r = op.matvec(x_seed) - b;
        let g = op.rmatvec(&r);
        let (v, _) = cl_scaling_vector(x_seed, &g, lb, ub);
        return BoundedSolution {
            x: x_seed.clone(),
            report: BoundedReport {
                status: BoundedStatus::Unconstrained,
                iterations: 0,
                cost: 0.5 * r.norm_squared(),
                optimality: g.component_mul(&v).amax(),
                active: count_active(x_seed, lb, ub),
            },
        };
    }

    let mut x = make_strictly_feasible(&reflective_transformation(x_seed, lb, ub), lb, ub, 0.1);
    let mut r = op.matvec(&x) - b;
    let mut cost = 0.5 * r.norm_squared();
    let mut g = op.rmatvec(&r);
    let mut g_norm = f64::INFINITY;
    let mut termination: Option<BoundedStatus> = None;
    let mut iterations = 0;

    for iteration in 0..options.max_iter {
        let (v, dv) = cl_scaling_vector(&x, &g, lb, ub);
        g_norm = g.component_mul(&v).amax();
        if g_norm < options.tol {
            termination = Some(BoundedStatus::GradientTolerance);
        }
        debug!(iteration, cost, optimality = g_norm, "bounded refinement");
        if termination.is_some() {
            break;
        }
        iterations = iteration + 1;

        let diag_h = g.component_mul(&dv);
        let diag_root_h = diag_h.map(f64::sqrt);
        let d = v.map(f64::sqrt);
        let g_h = d.component_mul(&g);

        let a_h = ColumnScaled::new(op, &d);
        let augmented = Regularized::new(&a_h, &diag_root_h);
        let n = x.len();
        let r_aug = DVector::from_iterator(
            r.len() + n,
            r.iter().copied().chain(std::iter::repeat(0.0).take(n)),
        );
        let eta = options.lsmr_tol.unwrap_or(1e-2 * g_norm.min(0.5));
        let sub_options = SolverOptions {
            atol: eta,
            btol: eta,
            max_iter: options.lsmr_max_iter,
            ..SolverOptions::default()
        };
        let p_h = -lsmr(&augmented, &r_aug, &sub_options).x;
        let p = d.component_mul(&p_h);

        let p_dot_g = p.dot(&g);
        if p_dot_g > 0.0 {
            termination = Some(BoundedStatus::AscentDirection);
        }

        let theta = 1.0 - g_norm.min(0.005);
        let quad = ScaledQuadratic {
            op: &a_h,
            g: &g_h,
            diag: &diag_h,
        };
        let step = select_step(&x, &quad, &p, &p_h, &d, lb, ub, theta);
        let mut cost_change = -evaluate_quadratic(op, &g, &step, None);

        if cost_change < 0.0 {
            let (x_new, _, change) = backtracking(op, &g, &x, &p, theta, p_dot_g, lb, ub);
            x = x_new;
            cost_change = change;
        } else {
            x = make_strictly_feasible(&(&x + &step), lb, ub, 0.0);
        }

        r = op.matvec(&x) - b;
        g = op.rmatvec(&r);
        if cost_change < options.tol * cost {
            termination = Some(BoundedStatus::CostTolerance);
        }
        cost = 0.5 * r.norm_squared();
    }

    let status = termination.unwrap_or(BoundedStatus::IterationLimit);
    BoundedSolution {
        report: BoundedReport {
            status,
            iterations,
            cost,
            optimality: g_norm,
            active: count_active(&x, lb, ub),
        },
        x,
    }
}

/// Quadratic model in scaled variables: `½‖A_h s‖² + g_hᵗ s + ½ sᵗ diag s`.
struct ScaledQuadratic<'a, O: ?Sized> {
    op: &'a O,
    g: &'a DVector<f64>,
    diag: &'a DVector<f64>,
}

#[allow(clippy::too_many_arguments)]
fn select_step<O: LinearOperator + ?Sized>(
    x: &DVector<f64>,
    quad: &ScaledQuadratic<'_, O>,
    p: &DVector<f64>,
    p_h: &DVector<f64>,
    d: &DVector<f64>,
    lb: &DVector<f64>,
    ub: &DVector<f64>,
    theta: f64,
) -> DVector<f64> {
    if in_bounds(&(x + p), lb, ub) {
        return p.clone();
    }

    let (p_stride, hits) = step_size_to_bound(x, p, lb, ub);

    // Reflected direction: flip the components that hit a bound.
    let mut r_h = p_h.clone();
    for (i, hit) in hits.iter().enumerate() {
        if *hit != 0 {
            r_h[i] = -r_h[i];
        }
    }
    let r = d.component_mul(&r_h);

    // Restrict the step so it lands on the bound.
    let p = p * p_stride;
    let p_h = p_h * p_stride;
    let x_on_bound = x + &p;

    let (r_stride, _) = step_size_to_bound(&x_on_bound, &r, lb, ub);
    let r_stride_l = (1.0 - theta) * r_stride;
    let r_stride_u = theta * r_stride;

    let (r_step, r_value) = if r_stride_u > 0.0 && r_stride_u.is_finite() {
        let (a, b, c) = build_quadratic_1d(quad.op, quad.g, &r_h, Some(quad.diag), Some(&p_h));
        let (stride, value) = minimize_quadratic_1d(a, b, r_stride_l, r_stride_u, c);
        (d.component_mul(&(&p_h + &r_h * stride)), value)
    } else {
        (r, f64::INFINITY)
    };

    // Pull the truncated Newton step strictly inside.
    let p_h = p_h * theta;
    let p = p * theta;
    let p_value = evaluate_quadratic(quad.op, quad.g, &p_h, Some(quad.diag));

    let ag_h = -quad.g;
    let ag = d.component_mul(&ag_h);
    let (ag_stride_u, _) = step_size_to_bound(x, &ag, lb, ub);
    let (a, b, _) = build_quadratic_1d(quad.op, quad.g, &ag_h, Some(quad.diag), None);
    let (ag_stride, ag_value) = minimize_quadratic_1d(a, b, 0.0, theta * ag_stride_u, 0.0);
    let ag = ag * ag_stride;

    if p_value < r_value && p_value < ag_value {
        p
    } else if r_value < p_value && r_value < ag_value {
        r_step
    } else {
        ag
    }
}

/// Halve the step until it gives a sufficient decrease, then keep the point interior.
#[allow(clippy::too_many_arguments)]
fn backtracking<O: LinearOperator + ?Sized>(
    op: &O,
    g: &DVector<f64>,
    x: &DVector<f64>,
    p: &DVector<f64>,
    theta: f64,
    p_dot_g: f64,
    lb: &DVector<f64>,
    ub: &DVector<f64>,
) -> (DVector<f64>, DVector<f64>, f64) {
    let mut alpha = 1.0;
    let (mut x_new, mut step, mut cost_change) = loop {
        let x_new = reflective_transformation(&(x + p * alpha), lb, ub);
        let step = &x_new - x;
        let cost_change = -evaluate_quadratic(op, g, &step, None);
        if cost_change > -0.1 * alpha * p_dot_g || alpha < BACKTRACK_MIN_ALPHA {
            break (x_new, step, cost_change);
        }
        alpha *= 0.5;
    };

    if find_active_constraints(&x_new, lb, ub, 1e-10)
        .iter()
        .any(|&a| a != 0)
    {
        x_new = make_strictly_feasible(
            &reflective_transformation(&(x + p * (theta * alpha)), lb, ub),
            lb,
            ub,
            0.0,
        );
        step = &x_new - x;
        cost_change = -evaluate_quadratic(op, g, &step, None);
    }
    (x_new, step, cost_change)
}

fn in_bounds(x: &DVector<f64>, lb: &DVector<f64>, ub: &DVector<f64>) -> bool {
    x.iter()
        .zip(lb.iter().zip(ub.iter()))
        .all(|(&xi, (&l, &u))| l <= xi && xi <= u)
}

/// Largest `t ≥ 0` with `x + t s` inside the box, and which components limit it
/// (`±1` for the direction of the hit, `0` otherwise).
fn step_size_to_bound(
    x: &DVector<f64>,
    s: &DVector<f64>,
    lb: &DVector<f64>,
    ub: &DVector<f64>,
) -> (f64, Vec<i8>) {
    let steps: Vec<f64> = (0..x.len())
        .map(|i| {
            if s[i] == 0.0 {
                f64::INFINITY
            } else {
                ((lb[i] - x[i]) / s[i]).max((ub[i] - x[i]) / s[i])
            }
        })
        .collect();
    let min_step = steps.iter().copied().fold(f64::INFINITY, f64::min);
    let hits = steps
        .iter()
        .zip(s.iter())
        .map(|(&step, &si)| {
            if step == min_step && si != 0.0 {
                si.signum() as i8
            } else {
                0
            }
        })
        .collect();
    (min_step, hits)
}

/// Fold `y` back into the box by reflecting off the bounds.
fn reflective_transformation(y: &DVector<f64>, lb: &DVector<f64>, ub: &DVector<f64>) -> DVector<f64> {
    if in_bounds(y, lb, ub) {
        return y.clone();
    }
    DVector::from_iterator(
        y.len(),
        (0..y.len()).map(|i| {
            let (yi, l, u) = (y[i], lb[i], ub[i]);
            match (l.is_finite(), u.is_finite()) {
                (true, false) => yi.max(2.0 * l - yi),
                (false, true) => yi.min(2.0 * u - yi),
                (true, true) => {
                    let width = u - l;
                    let t = (yi - l).rem_euclid(2.0 * width);
                    l + t.min(2.0 * width - t)
                }
                (false, false) => yi,
            }
        }),
    )
}

/// `-1` for variables at their lower bound, `1` at the upper bound, `0` otherwise.
fn find_active_constraints(x: &DVector<f64>, lb: &DVector<f64>, ub: &DVector<f64>, rtol: f64) -> Vec<i8> {
    (0..x.len())
        .map(|i| {
            let (xi, l, u) = (x[i], lb[i], ub[i]);
            if rtol == 0.0 {
                return if xi <= l {
                    -1
                } else if xi >= u {
                    1
                } else {
                    0
                };
            }
            let lower_dist = xi - l;
            let upper_dist = u - xi;
            let lower_threshold = rtol * l.abs().max(1.0);
            let upper_threshold = rtol * u.abs().max(1.0);
            if u.is_finite() && upper_dist <= upper_threshold.min(lower_dist) {
                1
            } else if l.is_finite() && lower_dist <= lower_threshold.min(upper_dist) {
                -1
            } else {
                0
            }
        })
        .collect()
}

fn count_active(x: &DVector<f64>, lb: &DVector<f64>, ub: &DVector<f64>) -> usize {
    find_active_constraints(x, lb, ub, 1e-10)
        .iter()
        .filter(|&&a| a != 0)
        .count()
}

/// Move variables that sit on a bound slightly inside the box.
fn make_strictly_feasible(x: &DVector<f64>, lb: &DVector<f64>, ub: &DVector<f64>, rstep: f64) -> DVector<f64> {
    let active = find_active_constraints(x, lb, ub, rstep);
    DVector::from_iterator(
        x.len(),
        (0..x.len()).map(|i| {
            let (l, u) = (lb[i], ub[i]);
            let moved = match active[i] {
                -1 if rstep == 0.0 => next_toward(l, u),
                -1 => l + rstep * l.abs().max(1.0),
                1 if rstep == 0.0 => next_toward(u, l),
                1 => u - rstep * u.abs().max(1.0),
                _ => x[i],
            };
            if moved < l || moved > u {
                0.5 * (l + u)
            } else {
                moved
            }
        }),
    )
}

/// Adjacent representable float from `x` in the direction of `toward`.
fn next_toward(x: f64, toward: f64) -> f64 {
    if x.is_nan() || toward.is_nan() {
        return f64::NAN;
    }
    if x == toward {
        return toward;
    }
    if x == 0.0 {
        return f64::from_bits(1).copysign(toward - x);
    }
    let bits = x.to_bits();
    let away_from_zero = (toward > x) == (x > 0.0);
    f64::from_bits(if away_from_zero { bits + 1 } else { bits - 1 })
}

/// Coleman-Li scaling vector `v` and its derivative `dv`.
fn cl_scaling_vector(
    x: &DVector<f64>,
    g: &DVector<f64>,
    lb: &DVector<f64>,
    ub: &DVector<f64>,
) -> (DVector<f64>, DVector<f64>) {
    let mut v = DVector::from_element(x.len(), 1.0);
    let mut dv = DVector::zeros(x.len());
    for i in 0..x.len() {
        if g[i] < 0.0 && ub[i].is_finite() {
            v[i] = ub[i] - x[i];
            dv[i] = -1.0;
        } else if g[i] > 0.0 && lb[i].is_finite() {
            v[i] = x[i] - lb[i];
            dv[i] = 1.0;
        }
    }
    (v, dv)
}

/// `½‖A s‖² + gᵗ s (+ ½ sᵗ diag s)`
fn evaluate_quadratic<O: LinearOperator + ?Sized>(
    op: &O,
    g: &DVector<f64>,
    s: &DVector<f64>,
    diag: Option<&DVector<f64>>,
) -> f64 {
    let js = op.matvec(s);
    let mut q = js.norm_squared();
    if let Some(diag) = diag {
        q += s.dot(&diag.component_mul(s));
    }
    0.5 * q + g.dot(s)
}

/// Coefficients of `f(t) = a t² + b t + c` for the model along `s0 + t s`.
fn build_quadratic_1d<O: LinearOperator + ?Sized>(
    op: &O,
    g: &DVector<f64>,
    s: &DVector<f64>,
    diag: Option<&DVector<f64>>,
    s0: Option<&DVector<f64>>,
) -> (f64, f64, f64) {
    let v = op.matvec(s);
    let mut a = v.norm_squared();
    if let Some(diag) = diag {
        a += s.dot(&diag.component_mul(s));
    }
    a *= 0.5;
    let mut b = g.dot(s);
    let mut c = 0.0;
    if let Some(s0) = s0 {
        let u = op.matvec(s0);
        b += u.dot(&v);
        c = 0.5 * u.norm_squared() + g.dot(s0);
        if let Some(diag) = diag {
            b += s0.dot(&diag.component_mul(s));
            c += 0.5 * s0.dot(&diag.component_mul(s0));
        }
    }
    (a, b, c)
}

/// Minimize `a t² + b t + c` over `[lb, ub]`.
fn minimize_quadratic_1d(a: f64, b: f64, lb: f64, ub: f64, c: f64) -> (f64, f64) {
    let mut candidates = vec![lb, ub];
    if a != 0.0 {
        let extremum = -0.5 * b / a;
        if lb < extremum && extremum < ub {
            candidates.push(extremum);
        }
    }
    candidates
        .into_iter()
        .filter(|t| t.is_finite())
        .map(|t| (t, t * (a * t + b) + c))
        .fold((lb, f64::INFINITY), |best, candidate| {
            if candidate.1 < best.1 {
                candidate
            } else {
                best
            }
        })
}
