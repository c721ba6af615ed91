//! Mehrotra predictor-corrector iteration.

use super::equil::{equilibrate, RuizScaling};
use super::kkt::{kkt, kkt_rhs, Direction, KktSolver};
use super::{QpProblem, QpSolution};
use crate::error::{LaError, LaResult};
use crate::linalg::dense::{self, Orientation};
use crate::scalar::Real;
use crate::settings::{MehrotraCtrl, RegQsdCtrl};
use crate::util::logging::diagnostics;
use crate::util::timer::Stopwatch;
use nalgebra::DMatrix;
use num_traits::{Float, One, Zero};

/// Ruiz sweeps of the outer equilibration.
const EQUIL_ITERS: usize = 10;
/// Solves needing more refinement steps than this raise the regularization.
const LARGE_REFINE_COUNT: usize = 3;

/// Largest `alpha` in `[0, upper]` with `s + alpha ds >= 0`.
pub fn max_step_in_positive_cone<R: Real>(s: &DMatrix<R>, ds: &DMatrix<R>, upper: R) -> R {
    s.iter().zip(ds.iter()).fold(upper, |alpha, (&si, &dsi)| {
        if dsi < R::zero() {
            alpha.min(-si / dsi)
        } else {
            alpha
        }
    })
}

/// Residuals of an iterate and the relative measures the loop stops on.
struct Residuals<R: Real> {
    rc: DMatrix<R>,
    rb: DMatrix<R>,
    rh: DMatrix<R>,
    obj_conv: R,
    rb_conv: R,
    rc_conv: R,
    rh_conv: R,
}

impl<R: Real> Residuals<R> {
    fn converged(&self, tol: R) -> bool {
        self.obj_conv <= tol && self.rb_conv <= tol && self.rc_conv <= tol && self.rh_conv <= tol
    }
}

struct Norms<R> {
    b: R,
    c: R,
    h: R,
}

fn residuals<R: Real>(p: &QpProblem<R>, it: &QpSolution<R>, norms: &Norms<R>) -> LaResult<Residuals<R>> {
    let n = p.c.nrows();
    let mut qx = DMatrix::zeros(n, 1);
    p.q.multiply(Orientation::Normal, R::one(), &it.x, R::zero(), &mut qx)?;
    let xqx = dense::dot(&it.x, &qx)?;
    let half = R::lit(0.5);
    let prim_obj = half * xqx + dense::dot(&p.c, &it.x)?;
    let dual_obj = -half * xqx - dense::dot(&p.b, &it.y)? - dense::dot(&p.h, &it.z)?;
    let obj_conv = (prim_obj - dual_obj).abs() / (R::one() + prim_obj.abs());

    // r_b = A x - b
    let mut rb = p.b.clone();
    p.a.multiply(Orientation::Normal, R::one(), &it.x, -R::one(), &mut rb)?;

    // r_c = Q x + A^T y + G^T z + c
    let mut rc = p.c.clone();
    dense::axpy(R::one(), &qx, &mut rc)?;
    p.a.multiply(Orientation::Transpose, R::one(), &it.y, R::one(), &mut rc)?;
    p.g.multiply(Orientation::Transpose, R::one(), &it.z, R::one(), &mut rc)?;

    // r_h = G x + s - h
    let mut rh = p.h.clone();
    p.g.multiply(Orientation::Normal, R::one(), &it.x, -R::one(), &mut rh)?;
    dense::axpy(R::one(), &it.s, &mut rh)?;

    Ok(Residuals {
        rb_conv: dense::nrm2(&rb) / (R::one() + norms.b),
        rc_conv: dense::nrm2(&rc) / (R::one() + norms.c),
        rh_conv: dense::nrm2(&rh) / (R::one() + norms.h),
        rc,
        rb,
        rh,
        obj_conv,
    })
}

/// Move every entry of `v` strictly inside the cone when any is nonpositive.
fn standard_shift<R: Real>(v: &mut DMatrix<R>) {
    let alpha = v.iter().fold(R::neg_infinity(), |m, &vi| m.max(-vi));
    if alpha >= R::zero() {
        for vi in v.iter_mut() {
            *vi += alpha + R::one();
        }
    }
}

/// Starting point from one factorization of the KKT matrix with `s = z = 1`.
///
/// The primal guess solves `[0; b; h]` and reads `s` off the negated dual
/// block; the dual guess solves `[-c; 0; 0]`. Both are then shifted into the
/// interior of the cone.
fn initialize<R: Real>(
    p: &QpProblem<R>,
    solver: &mut KktSolver<R>,
    warm: QpSolution<R>,
    ctrl: &MehrotraCtrl,
) -> LaResult<QpSolution<R>> {
    let (n, m, k) = p.dims();
    let mut it = warm;
    if ctrl.primal_initialized && ctrl.dual_initialized {
        return Ok(it);
    }
    let ones = DMatrix::from_element(k, 1, R::one());
    solver.factor(kkt(p, &ones, &ones)?, ctrl.print.then_some(ctrl.indent))?;

    let mut rhs = DMatrix::zeros(n + m + k, 2);
    for i in 0..m {
        rhs[(n + i, 0)] = p.b[(i, 0)];
    }
    for i in 0..k {
        rhs[(n + m + i, 0)] = p.h[(i, 0)];
    }
    for i in 0..n {
        rhs[(i, 1)] = -p.c[(i, 0)];
    }
    solver.solve(&mut rhs, &ctrl.solve_ctrl)?;

    if !ctrl.primal_initialized {
        it.x = rhs.view((0, 0), (n, 1)).clone_owned();
        it.s = DMatrix::from_fn(k, 1, |i, _| -rhs[(n + m + i, 0)]);
        standard_shift(&mut it.s);
    }
    if !ctrl.dual_initialized {
        it.y = rhs.view((n, 1), (m, 1)).clone_owned();
        it.z = rhs.view((n + m, 1), (k, 1)).clone_owned();
        standard_shift(&mut it.z);
    }
    Ok(it)
}

/// Solve the affine QP
///
/// ```text
/// min 1/2 x^T Q x + c^T x   s.t.  A x = b,  G x + s = h,  s >= 0
/// ```
///
/// starting from `warm` where `ctrl` marks the primal or dual part as
/// initialized. Fails with a runtime error once `ctrl.max_its` iterations
/// pass without convergence.
pub fn mehrotra<R: Real>(
    problem: &QpProblem<R>,
    warm: Option<QpSolution<R>>,
    ctrl: &MehrotraCtrl,
) -> LaResult<QpSolution<R>> {
    ctrl.validate().map_err(LaError::Logic)?;
    problem.validate()?;
    let indent = ctrl.indent.nested();
    let ctrl = &MehrotraCtrl {
        indent,
        solve_ctrl: RegQsdCtrl {
            indent,
            ..ctrl.solve_ctrl
        },
        ..*ctrl
    };
    let (n, m, k) = problem.dims();
    let warm = match warm {
        Some(w) => {
            w.check_dims(n, m, k)?;
            w
        }
        None => {
            if ctrl.primal_initialized || ctrl.dual_initialized {
                return Err(LaError::logic("initialized iterates were flagged but none were given"));
            }
            QpSolution::zeros(n, m, k)
        }
    };

    let (p, scaling) = if ctrl.equilibrate {
        equilibrate(problem, EQUIL_ITERS, ctrl.print.then_some(ctrl.indent))?
    } else {
        (problem.clone(), RuizScaling::identity(n, m, k))
    };
    let mut warm = warm;
    if ctrl.equilibrate {
        let QpSolution { x, y, z, s, .. } = &mut warm;
        scaling.scale_iterate(x, y, z, s);
    }

    let norms = Norms {
        b: dense::nrm2(&p.b),
        c: dense::nrm2(&p.c),
        h: dense::nrm2(&p.h),
    };
    let tol = R::lit(ctrl.tol);
    let ratio = R::lit(ctrl.max_step_ratio);

    let ones = DMatrix::from_element(k, 1, R::one());
    let mut solver = KktSolver::analyze(&kkt(&p, &ones, &ones)?, n)?;
    let mut it = initialize(&p, &mut solver, warm, ctrl)?;

    let mut increased_reg = false;
    let mut factor_timer = Stopwatch::new();
    let diag = diagnostics();

    let mut num_its = 0;
    loop {
        let s_bad = it.s.iter().filter(|&&v| v <= R::zero()).count();
        let z_bad = it.z.iter().filter(|&&v| v <= R::zero()).count();
        if s_bad > 0 || z_bad > 0 {
            return Err(LaError::Logic(format!(
                "{} entries of s were nonpositive and {} entries of z were nonpositive",
                s_bad, z_bad
            )));
        }

        let res = residuals(&p, &it, &norms)?;
        if ctrl.print {
            crate::progress!(
                ctrl.indent,
                "iter {}: |primal - dual| / (1 + |primal|) = {:e}, ||r_b|| / (1 + ||b||) = {:e}, \
                 ||r_c|| / (1 + ||c||) = {:e}, ||r_h|| / (1 + ||h||) = {:e}",
                num_its,
                res.obj_conv,
                res.rb_conv,
                res.rc_conv,
                res.rh_conv
            );
        }
        if res.converged(tol) {
            break;
        }
        if num_its == ctrl.max_its {
            return Err(LaError::Runtime(format!(
                "Maximum number of iterations ({}) exceeded",
                ctrl.max_its
            )));
        }

        // affine predictor
        let rmu = it.s.component_mul(&it.z);
        factor_timer.start();
        solver.factor(kkt(&p, &it.s, &it.z)?, ctrl.print.then_some(ctrl.indent))?;
        let dt = factor_timer.stop();
        if ctrl.print {
            crate::progress!(ctrl.indent, "factorization took {:.3} secs", dt);
        }
        let mut d = kkt_rhs(&res.rc, &res.rb, &res.rh, &rmu, &it.z);
        let affine_refines = solver.solve(&mut d, &ctrl.solve_ctrl)?;
        let aff = Direction::expand(n, m, &d, &rmu, &it.s, &it.z);

        if diag.should_log(num_its) {
            let mut dx_err = res.rb.clone();
            p.a.multiply(Orientation::Normal, R::one(), &aff.dx, R::one(), &mut dx_err)?;
            let mut dz_err = res.rh.clone();
            p.g.multiply(Orientation::Normal, R::one(), &aff.dx, R::one(), &mut dz_err)?;
            dense::axpy(R::one(), &aff.ds, &mut dz_err)?;
            log::debug!(
                "iter {}: affine ||r_b + A dx|| = {:e}, ||r_h + G dx + ds|| = {:e}, refines {}",
                num_its,
                dense::nrm2(&dx_err),
                dense::nrm2(&dz_err),
                affine_refines
            );
        }

        let alpha_aff_pri = max_step_in_positive_cone(&it.s, &aff.ds, R::one());
        let alpha_aff_dual = max_step_in_positive_cone(&it.z, &aff.dz, R::one());
        let (mu, mu_aff) = if k > 0 {
            let kr = R::from_usize(k).unwrap_or_else(R::one);
            let mut s_aff = it.s.clone();
            let mut z_aff = it.z.clone();
            dense::axpy(alpha_aff_pri, &aff.ds, &mut s_aff)?;
            dense::axpy(alpha_aff_dual, &aff.dz, &mut z_aff)?;
            (
                dense::dot(&it.s, &it.z)? / kr,
                dense::dot(&s_aff, &z_aff)? / kr,
            )
        } else {
            (R::zero(), R::zero())
        };
        let sigma = if mu > R::zero() {
            Float::powi(mu_aff / mu, 3)
        } else {
            R::zero()
        };
        if ctrl.print {
            crate::progress!(
                ctrl.indent,
                "alpha_aff_pri = {:e}, alpha_aff_dual = {:e}, mu_aff = {:e}, mu = {:e}, sigma = {:e}",
                alpha_aff_pri,
                alpha_aff_dual,
                mu_aff,
                mu,
                sigma
            );
        }

        // centering corrector
        let mut rmu = aff.ds.component_mul(&aff.dz);
        for v in rmu.iter_mut() {
            *v -= sigma * mu;
        }
        let mut d = kkt_rhs(
            &DMatrix::zeros(n, 1),
            &DMatrix::zeros(m, 1),
            &DMatrix::zeros(k, 1),
            &rmu,
            &it.z,
        );
        let corrector_refines = solver.solve(&mut d, &ctrl.solve_ctrl)?;
        let mut dir = Direction::expand(n, m, &d, &rmu, &it.s, &it.z);
        if affine_refines.max(corrector_refines) > LARGE_REFINE_COUNT && !increased_reg {
            solver.scale_reg_cand(R::lit(10.0));
            increased_reg = true;
            if ctrl.print {
                crate::progress!(ctrl.indent, "increased regularization candidates tenfold");
            }
        }
        dir.add(&aff)?;

        let upper = R::one() / ratio;
        let alpha_pri = (ratio * max_step_in_positive_cone(&it.s, &dir.ds, upper)).min(R::one());
        let alpha_dual = (ratio * max_step_in_positive_cone(&it.z, &dir.dz, upper)).min(R::one());
        if ctrl.print {
            crate::progress!(ctrl.indent, "alpha_pri = {:e}, alpha_dual = {:e}", alpha_pri, alpha_dual);
        }

        dense::axpy(alpha_pri, &dir.dx, &mut it.x)?;
        dense::axpy(alpha_pri, &dir.ds, &mut it.s)?;
        dense::axpy(alpha_dual, &dir.dy, &mut it.y)?;
        dense::axpy(alpha_dual, &dir.dz, &mut it.z)?;
        num_its += 1;
    }

    if ctrl.print {
        crate::progress!(
            ctrl.indent,
            "converged in {} iterations, {:.3} secs factoring",
            num_its,
            factor_timer.total()
        );
    }
    if ctrl.equilibrate {
        let QpSolution { x, y, z, s, .. } = &mut it;
        scaling.unscale_iterate(x, y, z, s);
    }
    it.num_its = num_its;
    Ok(it)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse::SparseMatrix;

    fn simplex_projection() -> QpProblem<f64> {
        QpProblem {
            q: SparseMatrix::identity(2),
            a: SparseMatrix::from_triplets(1, 2, vec![(0, 0, 1.0), (0, 1, 1.0)]).unwrap(),
            g: SparseMatrix::from_triplets(2, 2, vec![(0, 0, -1.0), (1, 1, -1.0)]).unwrap(),
            b: DMatrix::from_column_slice(1, 1, &[1.0]),
            c: DMatrix::zeros(2, 1),
            h: DMatrix::zeros(2, 1),
        }
    }

    fn quiet() -> MehrotraCtrl {
        MehrotraCtrl {
            print: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_max_step_in_positive_cone() {
        let s = DMatrix::from_column_slice(3, 1, &[1.0, 2.0, 1.0]);
        let ds = DMatrix::from_column_slice(3, 1, &[-2.0, -1.0, 5.0]);
        assert_eq!(max_step_in_positive_cone(&s, &ds, 1.0), 0.5);
        let up = DMatrix::from_element(3, 1, 1.0);
        assert_eq!(max_step_in_positive_cone(&s, &up, 7.0), 7.0);
    }

    #[test]
    fn test_standard_shift() {
        let mut v = DMatrix::from_column_slice(2, 1, &[-1.0, 3.0]);
        standard_shift(&mut v);
        assert_eq!(v.as_slice(), &[1.0, 5.0]);
        let mut w = DMatrix::from_column_slice(2, 1, &[0.5, 3.0]);
        standard_shift(&mut w);
        assert_eq!(w.as_slice(), &[0.5, 3.0]);
    }

    #[test]
    fn test_projection_onto_simplex() {
        let sol = mehrotra(&simplex_projection(), None, &quiet()).unwrap();
        assert!((sol.x[(0, 0)] - 0.5).abs() < 1e-6);
        assert!((sol.x[(1, 0)] - 0.5).abs() < 1e-6);
        assert!(sol.num_its < 50);
        assert!(sol.s.iter().all(|&v| v > 0.0));
        assert!(sol.z.iter().all(|&v| v > 0.0));
    }

    #[test]
    fn test_equilibrated_solve_matches() {
        let mut p = simplex_projection();
        p.c = DMatrix::from_column_slice(2, 1, &[2.0, 0.0]);
        let ctrl = MehrotraCtrl {
            equilibrate: true,
            ..quiet()
        };
        let sol = mehrotra(&p, None, &ctrl).unwrap();
        // min 1/2 |x|^2 + 2 x0 on the simplex: x = (0, 1)
        assert!(sol.x[(0, 0)].abs() < 1e-5);
        assert!((sol.x[(1, 0)] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_iteration_limit_is_an_error() {
        let ctrl = MehrotraCtrl {
            max_its: 0,
            ..quiet()
        };
        let err = mehrotra(&simplex_projection(), None, &ctrl).unwrap_err();
        assert!(matches!(err, LaError::Runtime(_)));
    }

    #[test]
    fn test_nonpositive_warm_start_rejected() {
        let (n, m, k) = (2, 1, 2);
        let mut warm = QpSolution::zeros(n, m, k);
        warm.s.fill(1.0);
        let ctrl = MehrotraCtrl {
            primal_initialized: true,
            dual_initialized: true,
            ..quiet()
        };
        let err = mehrotra(&simplex_projection(), Some(warm), &ctrl).unwrap_err();
        assert!(matches!(err, LaError::Logic(_)));
    }
}
