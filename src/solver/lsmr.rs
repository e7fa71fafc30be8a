//! LSMR (Fong & Saunders, 2011): MINRES applied to the normal equations.
//!
//! Same bidiagonalization as LSQR, but `‖Aᵗ r‖` decreases monotonically, which
//! makes it the safer choice when iterations may be cut short.

use nalgebra::DVector;
use tracing::trace;

use super::{sym_ortho, Backend, LinearOperator, Solution, SolverOptions, SolverReport, StopReason};

/// Solve `min ‖A x − b‖² + damp²‖x‖²` starting from `x = 0`.
pub fn lsmr<O: LinearOperator + ?Sized>(op: &O, b: &DVector<f64>, options: &SolverOptions) -> Solution {
    let (m, n) = op.shape();
    let max_iter = options.max_iter.unwrap_or(m.min(n));
    let damp = options.damp;
    let ctol = if options.conlim > 0.0 {
        1.0 / options.conlim
    } else {
        0.0
    };

    let mut x = DVector::zeros(n);
    let normb = b.norm();
    let mut beta = normb;
    let mut u = b.clone();
    let mut v;
    let mut alpha;
    if beta > 0.0 {
        u /= beta;
        v = op.rmatvec(&u);
        alpha = v.norm();
    } else {
        v = DVector::zeros(n);
        alpha = 0.0;
    }
    if alpha > 0.0 {
        v /= alpha;
    }

    let mut zetabar = alpha * beta;
    let mut alphabar = alpha;
    let mut rho = 1.0_f64;
    let mut rhobar = 1.0_f64;
    let mut cbar = 1.0_f64;
    let mut sbar = 0.0_f64;
    let mut h = v.clone();
    let mut hbar: DVector<f64> = DVector::zeros(n);

    // ‖r‖ estimation
    let mut betadd = beta;
    let mut betad = 0.0_f64;
    let mut rhodold = 1.0_f64;
    let mut tautildeold = 0.0_f64;
    let mut thetatilde = 0.0_f64;
    let mut zeta = 0.0_f64;
    let mut d = 0.0_f64;

    // ‖A‖ and cond(A) estimation
    let mut norm_a2 = alpha * alpha;
    let mut maxrbar = 0.0_f64;
    let mut minrbar = 1e100_f64;
    let mut norm_a = norm_a2.sqrt();
    let mut cond_a = 1.0_f64;
    let mut normx = 0.0_f64;

    let mut normr = beta;
    let mut normar = alpha * beta;

    let report = |stop, itn, normr, normar, norm_a, cond_a, normx| SolverReport {
        backend: Backend::Lsmr,
        stop,
        iterations: itn,
        residual_norm: normr,
        normal_residual_norm: normar,
        operator_norm: norm_a,
        condition: cond_a,
        solution_norm: normx,
    };

    if normar == 0.0 {
        return Solution {
            x,
            report: report(StopReason::ZeroSolution, 0, normr, normar, norm_a, cond_a, normx),
        };
    }

    let mut itn = 0;
    let mut stop = StopReason::IterationLimit;
    while itn < max_iter {
        itn += 1;

        // Next step of the bidiagonalization
        u = op.matvec(&v) - &u * alpha;
        beta = u.norm();
        if beta > 0.0 {
            u /= beta;
            v = op.rmatvec(&u) - &v * beta;
            alpha = v.norm();
            if alpha > 0.0 {
                v /= alpha;
            }
        }

        // Rotation turning the damped problem into an undamped one
        let (chat, shat, alphahat) = sym_ortho(alphabar, damp);

        // Plane rotation Q_i: B_i -> R_i
        let rhoold = rho;
        let (c, s, rho_next) = sym_ortho(alphahat, beta);
        rho = rho_next;
        let thetanew = s * alpha;
        alphabar = c * alpha;

        // Plane rotation Qbar_i: R_i^T -> Rbar_i
        let rhobarold = rhobar;
        let zetaold = zeta;
        let thetabar = sbar * rho;
        let rhotemp = cbar * rho;
        let (cbar_next, sbar_next, rhobar_next) = sym_ortho(cbar * rho, thetanew);
        cbar = cbar_next;
        sbar = sbar_next;
        rhobar = rhobar_next;
        zeta = cbar * zetabar;
        zetabar *= -sbar;

        // Update h, hbar, x
        hbar *= -(thetabar * rho / (rhoold * rhobarold));
        hbar += &h;
        x += &hbar * (zeta / (rho * rhobar));
        h *= -(thetanew / rho);
        h += &v;

        // Estimate ‖r‖
        let betaacute = chat * betadd;
        let betacheck = -shat * betadd;
        let betahat = c * betaacute;
        betadd = -s * betaacute;

        let thetatildeold = thetatilde;
        let (ctildeold, stildeold, rhotildeold) = sym_ortho(rhodold, thetabar);
        thetatilde = stildeold * rhobar;
        rhodold = ctildeold * rhobar;
        betad = -stildeold * betad + ctildeold * betahat;

        tautildeold = (zetaold - thetatildeold * tautildeold) / rhotildeold;
        let taud = (zeta - thetatilde * tautildeold) / rhodold;
        d += betacheck * betacheck;
        normr = (d + (betad - taud).powi(2) + betadd * betadd).sqrt();

        // Estimate ‖A‖ and cond(A)
        norm_a2 += beta * beta;
        norm_a = norm_a2.sqrt();
        norm_a2 += alpha * alpha;

        maxrbar = maxrbar.max(rhobarold);
        if itn > 1 {
            minrbar = minrbar.min(rhobarold);
        }
        cond_a = maxrbar.max(rhotemp) / minrbar.min(rhotemp);

        normar = zetabar.abs();
        normx = x.norm();

        let test1 = normr / normb;
        let test2 = if norm_a * normr != 0.0 {
            normar / (norm_a * normr)
        } else {
            f64::INFINITY
        };
        let test3 = 1.0 / cond_a;
        let t1 = test1 / (1.0 + norm_a * normx / normb);
        let rtol = options.btol + options.atol * norm_a * normx / normb;
        trace!(itn, normr, normar, "lsmr iteration");

        if let Some(reason) = StopReason::select(
            itn,
            max_iter,
            test1,
            rtol,
            test2,
            options.atol,
            test3,
            ctol,
            t1,
        ) {
            stop = reason;
            break;
        }
    }

    Solution {
        x,
        report: report(stop, itn, normr, normar, norm_a, cond_a, normx),
    }
}
