//! LSQR (Paige & Saunders, 1982): Golub-Kahan bidiagonalization with QR updates.

use nalgebra::DVector;
use tracing::trace;

use super::{sym_ortho, Backend, LinearOperator, Solution, SolverOptions, SolverReport, StopReason};

/// Solve `min ‖A x − b‖² + damp²‖x‖²` starting from `x = 0`.
pub fn lsqr<O: LinearOperator + ?Sized>(op: &O, b: &DVector<f64>, options: &SolverOptions) -> Solution {
    let (_, n) = op.shape();
    let max_iter = options.max_iter.unwrap_or(2 * n);
    let eps = f64::EPSILON;
    let damp = options.damp;
    let dampsq = damp * damp;
    let ctol = if options.conlim > 0.0 {
        1.0 / options.conlim
    } else {
        0.0
    };

    let mut x = DVector::zeros(n);
    let mut anorm = 0.0_f64;
    let mut acond = 0.0_f64;
    let mut ddnorm = 0.0_f64;
    let mut res2 = 0.0_f64;
    let mut xnorm = 0.0_f64;
    let mut xxnorm = 0.0_f64;
    let mut z = 0.0_f64;
    let mut cs2 = -1.0_f64;
    let mut sn2 = 0.0_f64;

    let bnorm = b.norm();
    let mut beta = bnorm;
    let mut u = b.clone();
    let mut v;
    let mut alfa;
    if beta > 0.0 {
        u /= beta;
        v = op.rmatvec(&u);
        alfa = v.norm();
    } else {
        v = DVector::zeros(n);
        alfa = 0.0;
    }
    if alfa > 0.0 {
        v /= alfa;
    }
    let mut w = v.clone();

    let mut rhobar = alfa;
    let mut phibar = beta;
    let mut rnorm = beta;
    let mut arnorm = alfa * beta;

    let report = |stop, itn, rnorm, arnorm, anorm, acond, xnorm| SolverReport {
        backend: Backend::Lsqr,
        stop,
        iterations: itn,
        residual_norm: rnorm,
        normal_residual_norm: arnorm,
        operator_norm: anorm,
        condition: acond,
        solution_norm: xnorm,
    };

    if arnorm == 0.0 {
        return Solution {
            x,
            report: report(StopReason::ZeroSolution, 0, rnorm, arnorm, anorm, acond, xnorm),
        };
    }

    let mut itn = 0;
    let mut stop = StopReason::IterationLimit;
    while itn < max_iter {
        itn += 1;

        // Next step of the bidiagonalization
        u = op.matvec(&v) - &u * alfa;
        beta = u.norm();
        if beta > 0.0 {
            u /= beta;
            anorm = (anorm * anorm + alfa * alfa + beta * beta + dampsq).sqrt();
            v = op.rmatvec(&u) - &v * beta;
            alfa = v.norm();
            if alfa > 0.0 {
                v /= alfa;
            }
        }

        // Eliminate the damping parameter
        let (rhobar1, psi) = if damp > 0.0 {
            let rhobar1 = (rhobar * rhobar + dampsq).sqrt();
            let cs1 = rhobar / rhobar1;
            let sn1 = damp / rhobar1;
            let psi = sn1 * phibar;
            phibar *= cs1;
            (rhobar1, psi)
        } else {
            (rhobar, 0.0)
        };

        // Eliminate the subdiagonal element of the lower bidiagonal matrix
        let (cs, sn, rho) = sym_ortho(rhobar1, beta);
        let theta = sn * alfa;
        rhobar = -cs * alfa;
        let phi = cs * phibar;
        phibar *= sn;
        let tau = sn * phi;

        // Update x and w
        let t1 = phi / rho;
        let t2 = -theta / rho;
        let dk = &w / rho;
        x += &w * t1;
        w = &v + &w * t2;
        ddnorm += dk.norm_squared();

        // Estimate ‖x‖ via a second plane rotation
        let delta = sn2 * rho;
        let gambar = -cs2 * rho;
        let rhs = phi - delta * z;
        let zbar = rhs / gambar;
        xnorm = (xxnorm + zbar * zbar).sqrt();
        let gamma = (gambar * gambar + theta * theta).sqrt();
        cs2 = gambar / gamma;
        sn2 = theta / gamma;
        z = rhs / gamma;
        xxnorm += z * z;

        acond = anorm * ddnorm.sqrt();
        res2 += psi * psi;
        rnorm = (phibar * phibar + res2).sqrt();
        arnorm = alfa * tau.abs();

        let test1 = rnorm / bnorm;
        let test2 = arnorm / (anorm * rnorm + eps);
        let test3 = 1.0 / (acond + eps);
        let t1 = test1 / (1.0 + anorm * xnorm / bnorm);
        let rtol = options.btol + options.atol * anorm * xnorm / bnorm;
        trace!(itn, rnorm, arnorm, "lsqr iteration");

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

    let r1sq = rnorm * rnorm - dampsq * xxnorm;
    let r1norm = r1sq.abs().sqrt().copysign(r1sq);
    Solution {
        x,
        report: report(stop, itn, r1norm, arnorm, anorm, acond, xnorm),
    }
}
