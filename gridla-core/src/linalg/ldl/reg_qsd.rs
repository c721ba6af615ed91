//! Regularized quasi-semidefinite LDL.
//!
//! Quasi-semidefinite matrices (`[H A^T; A -G]` with `H`, `G` positive
//! semidefinite) admit an unpivoted LDL once small or wrong-signed pivots are
//! shifted by a signed regularization. The factor of the shifted matrix is
//! then used as a preconditioner for solves against the unshifted one.

use super::front::Front;
use super::numeric::{self, Pivoting};
use super::symbolic::{Reordering, SymmInfo};
use crate::error::{LaError, LaResult};
use crate::linalg::dense::{self, Diag, Orientation, Uplo};
use crate::linalg::sparse::SparseMatrix;
use crate::scalar::{Field, Real};
use crate::settings::{RegQsdCtrl, RegSolveAlg};
use crate::util::logging::Indent;
use nalgebra::DMatrix;
use num_traits::{Float, One, Zero};

/// Factor `front` with quasi-semidefinite regularization.
///
/// `reg_cand` holds the signed candidate shift of every row in the original
/// ordering. Returns the shift actually applied, also in the original ordering.
pub fn reg_qsd_ldl<F: Field>(
    info: &SymmInfo,
    reordering: &Reordering,
    front: &mut Front<F>,
    piv_tol: F::Real,
    reg_cand: &[F::Real],
    a_priori: bool,
) -> LaResult<Vec<F::Real>> {
    let n = info.order();
    if reg_cand.len() != n || reordering.len() != n {
        return Err(LaError::DimensionMismatch {
            expected: n,
            actual: reg_cand.len(),
        });
    }
    let mut cand = vec![F::Real::zero(); n];
    for (i, &c) in reg_cand.iter().enumerate() {
        cand[reordering.map[i]] = c;
    }
    let mut reg_nodal = vec![F::Real::zero(); n];
    numeric::factor_tree(
        info,
        front,
        &mut Pivoting::Regularized {
            cand: &cand,
            a_priori,
            piv_tol,
            reg: &mut reg_nodal,
        },
    )?;
    Ok((0..n).map(|i| reg_nodal[reordering.map[i]]).collect())
}

/// Symmetric Ruiz equilibration: `a <- D a D` with `D` chosen so every row
/// has unit max norm. Returns the diagonal of `D`.
pub fn symmetric_equil<F: Field>(a: &mut SparseMatrix<F>, iters: usize, log: Option<Indent>) -> LaResult<Vec<F::Real>> {
    let n = a.height();
    if a.width() != n {
        return Err(LaError::logic("symmetric equilibration needs a square matrix"));
    }
    let mut d = vec![F::Real::one(); n];
    for it in 0..iters {
        let norms = a.row_max_norms()?;
        let step: Vec<F::Real> = norms
            .iter()
            .map(|&r| if r > F::Real::zero() { F::Real::one() / r.sqrt() } else { F::Real::one() })
            .collect();
        a.scale_rows_cols(&step, &step)?;
        for (di, si) in d.iter_mut().zip(&step) {
            *di *= *si;
        }
        if let Some(indent) = log {
            let spread = norms
                .iter()
                .filter(|r| **r > F::Real::zero())
                .fold(F::Real::zero(), |m, &r| m.max((F::Real::one() - r).abs()));
            crate::progress!(indent, "symmetric equilibration {}: max |1 - row norm| = {:e}", it, spread);
        }
    }
    Ok(d)
}

/// The equilibrated operator `D A D`, its regularization and the factor of
/// `D A D + diag(reg)`.
struct System<'a, F: Field> {
    a: &'a SparseMatrix<F>,
    reg: &'a [F::Real],
    d_inner: &'a [F::Real],
    info: &'a SymmInfo,
    reordering: &'a Reordering,
    front: &'a Front<F>,
    ctrl: &'a RegQsdCtrl,
}

impl<F: Field> System<'_, F> {
    fn scale(&self, x: &DMatrix<F>) -> DMatrix<F> {
        DMatrix::from_fn(x.nrows(), 1, |i, _| x[(i, 0)] * F::from_real(self.d_inner[i]))
    }

    /// `D A D x`, plus `diag(reg) x` when `regularized`.
    fn apply(&self, x: &DMatrix<F>, regularized: bool) -> LaResult<DMatrix<F>> {
        let dx = self.scale(x);
        let mut y = DMatrix::zeros(x.nrows(), 1);
        self.a.multiply(Orientation::Normal, F::one(), &dx, F::zero(), &mut y)?;
        let mut y = self.scale(&y);
        if regularized {
            for i in 0..y.nrows() {
                y[(i, 0)] += F::from_real(self.reg[i]) * x[(i, 0)];
            }
        }
        Ok(y)
    }

    fn residual(&self, b: &DMatrix<F>, x: &DMatrix<F>, regularized: bool) -> LaResult<DMatrix<F>> {
        let mut r = b.clone();
        dense::axpy(-F::one(), &self.apply(x, regularized)?, &mut r)?;
        Ok(r)
    }

    fn factor_solve(&self, b: &DMatrix<F>) -> LaResult<DMatrix<F>> {
        let mut x = b.clone();
        numeric::solve_after(self.info, self.reordering, self.front, &mut x)?;
        Ok(x)
    }

    /// Defect correction of `inverse(b)` against the regularized or the true
    /// operator. A step is kept only if it lowers the residual. The loop stops
    /// once the residual is within `rel_tol_refine` of `||b||` or a step fails
    /// to reduce it by `min_reduction_factor`.
    fn refine(
        &self,
        b: &DMatrix<F>,
        regularized: bool,
        mut inverse: impl FnMut(&DMatrix<F>) -> LaResult<DMatrix<F>>,
    ) -> LaResult<(DMatrix<F>, usize)> {
        let mut x = inverse(b)?;
        let max_its = self.ctrl.max_refine_its;
        if max_its == 0 {
            return Ok((x, 0));
        }
        let factor = F::Real::lit(self.ctrl.min_reduction_factor);
        let target = F::Real::lit(self.ctrl.rel_tol_refine) * dense::nrm2(b);
        let mut r = self.residual(b, &x, regularized)?;
        let mut error = dense::nrm2(&r);
        if self.ctrl.progress {
            crate::progress!(self.ctrl.indent, "original error norm: {:e}", error);
        }
        let mut its = 0;
        while its < max_its && error > target {
            let dx = inverse(&r)?;
            let mut cand = x.clone();
            dense::axpy(F::one(), &dx, &mut cand)?;
            let r_cand = self.residual(b, &cand, regularized)?;
            let new_error = dense::nrm2(&r_cand);
            if self.ctrl.progress {
                crate::progress!(self.ctrl.indent, "reduced by factor {:e}", error / new_error);
            }
            if new_error >= error {
                break;
            }
            x = cand;
            r = r_cand;
            its += 1;
            if factor * new_error >= error {
                break;
            }
            error = new_error;
        }
        Ok((x, its))
    }

    fn regularized(&self, b: &DMatrix<F>) -> LaResult<(DMatrix<F>, usize)> {
        self.refine(b, true, |r| self.factor_solve(r))
    }

    fn iterative_refinement(&self, b: &DMatrix<F>) -> LaResult<(DMatrix<F>, usize)> {
        self.refine(b, false, |r| Ok(self.regularized(r)?.0))
    }

    /// Flexible GMRES(k) preconditioned by the regularized solve. Returns the
    /// largest number of inner refinement steps taken.
    fn fgmres(&self, b: &DMatrix<F>) -> LaResult<(DMatrix<F>, usize)> {
        let n = b.nrows();
        let k = self.ctrl.restart;
        let rel_tol = F::Real::lit(self.ctrl.rel_tol);
        let mut x = DMatrix::zeros(n, 1);
        let mut w = b.clone();
        let orig = dense::nrm2(&w);
        if orig.is_zero() {
            return Ok((x, 0));
        }
        let mut max_inner = 0;
        let mut iter = 0usize;
        loop {
            if self.ctrl.progress {
                crate::progress!(self.ctrl.indent, "starting FGMRES iteration {}", iter);
            }
            let mut cs = vec![F::Real::zero(); k];
            let mut sn = vec![F::zero(); k];
            let mut h = DMatrix::<F>::zeros(k, k);
            let mut t = DMatrix::<F>::zeros(k + 1, 1);
            let mut v: Vec<DMatrix<F>> = Vec::with_capacity(k);
            let mut z: Vec<DMatrix<F>> = Vec::with_capacity(k);
            let x0 = x.clone();

            // w = b - A x already
            let beta = dense::nrm2(&w);
            let mut v0 = w.clone();
            dense::scale(F::from_real(F::Real::one() / beta), &mut v0);
            v.push(v0);
            t[(0, 0)] = F::from_real(beta);

            for j in 0..k {
                let (zj, inner) = self.regularized(&v[j])?;
                max_inner = max_inner.max(inner);
                w = self.apply(&zj, false)?;
                z.push(zj);

                for i in 0..=j {
                    let hij = dense::dot(&v[i], &w)?;
                    h[(i, j)] = hij;
                    dense::axpy(-hij, &v[i], &mut w)?;
                }
                let delta = dense::nrm2(&w);
                if delta.is_nan() {
                    return Err(LaError::runtime("Arnoldi step produced a NaN"));
                }
                let lucky = delta.is_zero();
                if j + 1 != k && !lucky {
                    let mut next = w.clone();
                    dense::scale(F::from_real(F::Real::one() / delta), &mut next);
                    v.push(next);
                }

                for i in 0..j {
                    let (c, s) = (F::from_real(cs[i]), sn[i]);
                    let (a0, a1) = (h[(i, j)], h[(i + 1, j)]);
                    h[(i, j)] = c * a0 + s * a1;
                    h[(i + 1, j)] = -s.conj() * a0 + c * a1;
                }
                let eta = h[(j, j)];
                if !eta.finite() {
                    return Err(LaError::runtime("Either H(j,j) or H(j+1,j) was NaN"));
                }
                let (c, s, rho) = givens(eta, F::from_real(delta));
                if c.is_nan() || !s.finite() || !rho.finite() {
                    return Err(LaError::runtime("Givens rotation produced a NaN"));
                }
                h[(j, j)] = rho;
                cs[j] = c;
                sn[j] = s;
                let (t0, t1) = (t[(j, 0)], t[(j + 1, 0)]);
                t[(j, 0)] = F::from_real(c) * t0 + s * t1;
                t[(j + 1, 0)] = -s.conj() * t0 + F::from_real(c) * t1;

                let mut y = t.rows(0, j + 1).clone_owned();
                let htl = h.view((0, 0), (j + 1, j + 1)).clone_owned();
                dense::trsv(Uplo::Upper, Orientation::Normal, Diag::NonUnit, &htl, &mut y)?;
                x = x0.clone();
                for (i, zi) in z.iter().enumerate() {
                    dense::axpy(y[(i, 0)], zi, &mut x)?;
                }

                w = self.residual(b, &x, false)?;
                let resid = dense::nrm2(&w);
                if resid.is_nan() {
                    return Err(LaError::runtime("Residual norm was NaN"));
                }
                let rel = resid / orig;
                iter += 1;
                if rel < rel_tol {
                    if self.ctrl.progress {
                        crate::progress!(self.ctrl.indent, "converged with relative tolerance {:e}", rel);
                    }
                    return Ok((x, max_inner));
                }
                if self.ctrl.progress {
                    crate::progress!(self.ctrl.indent, "finished iteration {} with relative residual {:e}", iter - 1, rel);
                }
                if lucky {
                    return Err(LaError::runtime("Krylov breakdown before convergence"));
                }
            }
        }
    }
}

/// Complex Givens rotation `[c s; -conj(s) c] [a; b] = [rho; 0]`.
fn givens<F: Field>(a: F, b: F) -> (F::Real, F, F) {
    let abs_a = a.modulus();
    if abs_a.is_zero() {
        return (F::Real::zero(), F::one(), b);
    }
    let norm = (a.modulus_sq() + b.modulus_sq()).sqrt();
    let phase = a / F::from_real(abs_a);
    let c = abs_a / norm;
    let s = phase * b.conj() / F::from_real(norm);
    (c, s, phase * F::from_real(norm))
}

/// Solve `A X = B` in place using a factor of `D A D + diag(reg)`.
///
/// `a` is the unregularized, unequilibrated matrix and `d_inner` the symmetric
/// equilibration the factor was computed with. Returns the largest number of
/// refinement steps any column needed.
#[allow(clippy::too_many_arguments)]
pub fn solve_after<F: Field>(
    a: &SparseMatrix<F>,
    reg: &[F::Real],
    d_inner: &[F::Real],
    reordering: &Reordering,
    info: &SymmInfo,
    front: &Front<F>,
    b: &mut DMatrix<F>,
    ctrl: &RegQsdCtrl,
) -> LaResult<usize> {
    let n = info.order();
    if a.height() != n || reg.len() != n || d_inner.len() != n || b.nrows() != n {
        return Err(LaError::DimensionMismatch {
            expected: n,
            actual: b.nrows(),
        });
    }
    let ctrl = &RegQsdCtrl {
        indent: ctrl.indent.nested(),
        ..*ctrl
    };
    let sys = System {
        a,
        reg,
        d_inner,
        info,
        reordering,
        front,
        ctrl,
    };
    let mut worst = 0;
    for c in 0..b.ncols() {
        // A x = b  <=>  (D A D)(D^-1 x) = D b
        let col = sys.scale(&b.columns(c, 1).clone_owned());
        let (y, its) = match ctrl.alg {
            RegSolveAlg::Regularized => sys.regularized(&col)?,
            RegSolveAlg::IterativeRefinement => sys.iterative_refinement(&col)?,
            RegSolveAlg::Fgmres => sys.fgmres(&col)?,
        };
        b.columns_mut(c, 1).copy_from(&sys.scale(&y));
        worst = worst.max(its);
    }
    Ok(worst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::ldl::symbolic::nested_dissection;
    use crate::settings::BisectCtrl;

    /// `[2I  A^T; A  -eps I]` with a saddle-point block.
    fn kkt() -> SparseMatrix<f64> {
        let mut t = vec![(0, 0, 2.0), (1, 1, 3.0), (2, 2, 1.0), (3, 3, 0.0)];
        for (j, v) in [(0, 1.0), (1, 1.0), (2, -1.0)] {
            t.push((3, j, v));
            t.push((j, 3, v));
        }
        SparseMatrix::from_triplets(4, 4, t).unwrap()
    }

    fn factor(a: &SparseMatrix<f64>, d: &[f64]) -> (Reordering, SymmInfo, Front<f64>, Vec<f64>) {
        let mut scaled = a.clone();
        scaled.scale_rows_cols(d, d).unwrap();
        let (r, info) = nested_dissection(&scaled, &BisectCtrl::default()).unwrap();
        let mut front = Front::pull(&scaled, &r, &info, false).unwrap();
        let eps = f64::EPSILON.sqrt();
        let cand = [eps, eps, eps, -eps];
        let reg = reg_qsd_ldl(&info, &r, &mut front, 1e-14, &cand, true).unwrap();
        (r, info, front, reg)
    }

    #[test]
    fn test_a_priori_regularization_is_reported() {
        let a = kkt();
        let (_, _, _, reg) = factor(&a, &[1.0; 4]);
        let eps = f64::EPSILON.sqrt();
        assert_eq!(reg, vec![eps, eps, eps, -eps]);
    }

    #[test]
    fn test_every_mode_solves_the_unregularized_system() {
        let a = kkt();
        let mut a_eq = a.clone();
        let d = symmetric_equil(&mut a_eq, 3, None).unwrap();
        let (r, info, front, reg) = factor(&a, &d);
        let b = DMatrix::from_column_slice(4, 1, &[1.0, -2.0, 0.5, 3.0]);
        for alg in [RegSolveAlg::Regularized, RegSolveAlg::IterativeRefinement, RegSolveAlg::Fgmres] {
            let ctrl = RegQsdCtrl {
                alg,
                progress: false,
                ..RegQsdCtrl::default()
            };
            let mut x = b.clone();
            solve_after(&a, &reg, &d, &r, &info, &front, &mut x, &ctrl).unwrap();
            let res = dense::relative_residual(&a.to_dense().unwrap(), &x, &b).unwrap();
            assert!(res < 1e-7, "{:?} residual {}", alg, res);
        }
    }

    #[test]
    fn test_refinement_stops_at_relative_tolerance() {
        let a = kkt();
        let mut a_eq = a.clone();
        let d = symmetric_equil(&mut a_eq, 3, None).unwrap();
        let (r, info, front, reg) = factor(&a, &d);
        let b = DMatrix::from_column_slice(4, 1, &[1.0, -2.0, 0.5, 3.0]);
        let solve = |rel_tol_refine: f64| {
            let ctrl = RegQsdCtrl {
                alg: RegSolveAlg::IterativeRefinement,
                rel_tol_refine,
                progress: false,
                ..RegQsdCtrl::default()
            };
            let mut x = b.clone();
            let its = solve_after(&a, &reg, &d, &r, &info, &front, &mut x, &ctrl).unwrap();
            (its, dense::relative_residual(&a.to_dense().unwrap(), &x, &b).unwrap())
        };
        // the regularized solve alone already meets a loose target
        let (loose_its, loose_res) = solve(1e-2);
        assert_eq!(loose_its, 0);
        assert!(loose_res < 1e-2);
        let (tight_its, tight_res) = solve(0.0);
        assert!(tight_its > 0);
        assert!(tight_res < loose_res);
    }

    #[test]
    fn test_zero_rhs_short_circuits() {
        let a = kkt();
        let (r, info, front, reg) = factor(&a, &[1.0; 4]);
        let mut x = DMatrix::zeros(4, 1);
        let its = solve_after(&a, &reg, &[1.0; 4], &r, &info, &front, &mut x, &RegQsdCtrl::default()).unwrap();
        assert_eq!(its, 0);
        assert_eq!(x, DMatrix::zeros(4, 1));
    }

    #[test]
    fn test_givens_annihilates() {
        let (c, s, rho) = givens(3.0_f64, 4.0);
        assert!((c * 3.0 + s * 4.0 - rho).abs() < 1e-14);
        assert!((-s * 3.0 + c * 4.0).abs() < 1e-14);
        assert!((rho - 5.0).abs() < 1e-14);
    }
}
