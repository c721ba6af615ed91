//! Iterative refinement around an approximate inverse.
//!
//! One or two right-hand sides get proper defect correction: a correction is
//! kept only while it strictly shrinks the max-norm residual, and each column
//! stops independently. Three or more columns get batch refinement, which
//! applies exactly `max_refine_its` corrections with no monotonicity check.
//!
//! The promoted variants form residuals and accumulate the solution in
//! [`Field::Promoted`] while the inverse runs in the working precision.

use super::dense;
use crate::error::{LaError, LaResult};
use crate::scalar::{Field, Real};
use crate::settings::RefineCtrl;
use nalgebra::DMatrix;
use num_traits::{Float, Zero};

/// Outcome of a traced refinement.
#[derive(Debug, Clone, PartialEq)]
pub struct Refinement<R> {
    /// Accepted corrections (batch: corrections applied).
    pub its: usize,
    /// Relative max-norm residual after the initial solve and after every
    /// accepted correction; for two columns, the larger of the two.
    pub history: Vec<R>,
}

impl<R> Refinement<R> {
    fn untraced() -> Self {
        Self {
            its: 0,
            history: Vec::new(),
        }
    }
}

/// Solve `A X = B` in place, returning the number of refinement iterations.
///
/// `apply_a(x, y)` sets `y = A x`; `apply_a_inv(x)` overwrites `x` with an
/// approximation of `A^-1 x`. Both act on whole multi-vectors.
pub fn refined_solve<F, A, I>(apply_a: A, apply_a_inv: I, b: &mut DMatrix<F>, ctrl: &RefineCtrl) -> LaResult<usize>
where
    F: Field,
    A: FnMut(&DMatrix<F>, &mut DMatrix<F>) -> LaResult<()>,
    I: FnMut(&mut DMatrix<F>) -> LaResult<()>,
{
    Ok(refined_solve_traced(apply_a, apply_a_inv, b, ctrl)?.its)
}

/// [`refined_solve`] that also reports the residual history.
pub fn refined_solve_traced<F, A, I>(
    apply_a: A,
    apply_a_inv: I,
    b: &mut DMatrix<F>,
    ctrl: &RefineCtrl,
) -> LaResult<Refinement<F::Real>>
where
    F: Field,
    A: FnMut(&DMatrix<F>, &mut DMatrix<F>) -> LaResult<()>,
    I: FnMut(&mut DMatrix<F>) -> LaResult<()>,
{
    dispatch(apply_a, apply_a_inv, b, ctrl, |v: F| v, |v: F| v)
}

/// Refinement with residuals and updates in `F::Promoted`.
///
/// `apply_a` works in the promoted type, `apply_a_inv` in `F`.
pub fn promoted_refined_solve<F, A, I>(
    apply_a: A,
    apply_a_inv: I,
    b: &mut DMatrix<F>,
    ctrl: &RefineCtrl,
) -> LaResult<usize>
where
    F: Field,
    A: FnMut(&DMatrix<F::Promoted>, &mut DMatrix<F::Promoted>) -> LaResult<()>,
    I: FnMut(&mut DMatrix<F>) -> LaResult<()>,
{
    Ok(promoted_refined_solve_traced(apply_a, apply_a_inv, b, ctrl)?.its)
}

/// [`promoted_refined_solve`] that also reports the residual history.
pub fn promoted_refined_solve_traced<F, A, I>(
    apply_a: A,
    apply_a_inv: I,
    b: &mut DMatrix<F>,
    ctrl: &RefineCtrl,
) -> LaResult<Refinement<<F::Promoted as Field>::Real>>
where
    F: Field,
    A: FnMut(&DMatrix<F::Promoted>, &mut DMatrix<F::Promoted>) -> LaResult<()>,
    I: FnMut(&mut DMatrix<F>) -> LaResult<()>,
{
    dispatch(apply_a, apply_a_inv, b, ctrl, F::promote, F::demote)
}

fn dispatch<F, P, A, I>(
    mut apply_a: A,
    mut apply_a_inv: I,
    b: &mut DMatrix<F>,
    ctrl: &RefineCtrl,
    up: impl Fn(F) -> P,
    down: impl Fn(P) -> F,
) -> LaResult<Refinement<P::Real>>
where
    F: Field,
    P: Field,
    A: FnMut(&DMatrix<P>, &mut DMatrix<P>) -> LaResult<()>,
    I: FnMut(&mut DMatrix<F>) -> LaResult<()>,
{
    ctrl.validate().map_err(LaError::Logic)?;
    if ctrl.max_refine_its == 0 {
        apply_a_inv(b)?;
        return Ok(Refinement::untraced());
    }
    let ctrl = &RefineCtrl {
        indent: ctrl.indent.nested(),
        ..*ctrl
    };
    let mut solver = Solver {
        apply_a: &mut apply_a,
        apply_a_inv: &mut apply_a_inv,
        up: &up,
        down: &down,
        ctrl,
    };
    match b.ncols() {
        0 => Ok(Refinement::untraced()),
        1 | 2 => solver.monotone(b),
        _ => solver.batch(b),
    }
}

struct Solver<'a, F: Field, P: Field> {
    apply_a: &'a mut dyn FnMut(&DMatrix<P>, &mut DMatrix<P>) -> LaResult<()>,
    apply_a_inv: &'a mut dyn FnMut(&mut DMatrix<F>) -> LaResult<()>,
    up: &'a dyn Fn(F) -> P,
    down: &'a dyn Fn(P) -> F,
    ctrl: &'a RefineCtrl,
}

impl<F: Field, P: Field> Solver<'_, F, P> {
    /// `A^-1 r` for a residual held in the working type.
    fn inverse(&mut self, r: &DMatrix<P>) -> LaResult<DMatrix<P>> {
        let mut w = r.map(|v| (self.down)(v));
        (self.apply_a_inv)(&mut w)?;
        Ok(w.map(|v| (self.up)(v)))
    }

    /// `b - A x`.
    fn residual(&mut self, b: &DMatrix<P>, x: &DMatrix<P>) -> LaResult<DMatrix<P>> {
        let mut y = DMatrix::zeros(x.nrows(), x.ncols());
        (self.apply_a)(x, &mut y)?;
        Ok(b - y)
    }

    fn col_norms(m: &DMatrix<P>) -> Vec<P::Real> {
        (0..m.ncols())
            .map(|c| {
                m.column(c)
                    .iter()
                    .fold(P::Real::zero(), |acc, v| Float::max(acc, v.modulus()))
            })
            .collect()
    }

    fn monotone(&mut self, b: &mut DMatrix<F>) -> LaResult<Refinement<P::Real>> {
        let (n, width) = b.shape();
        let tol = <P::Real as Real>::lit(self.ctrl.rel_tol);
        let b_orig = b.map(|v| (self.up)(v));
        let b_norms = Self::col_norms(&b_orig);
        let mut x = self.inverse(&b_orig)?;
        for c in 0..width {
            if b_norms[c].is_zero() {
                x.column_mut(c).fill(P::zero());
            }
        }
        let mut r = self.residual(&b_orig, &x)?;
        let mut errors = Self::col_norms(&r);
        let relative = |errors: &[P::Real], c: usize| {
            if b_norms[c].is_zero() {
                P::Real::zero()
            } else {
                errors[c] / b_norms[c]
            }
        };
        let worst = |errors: &[P::Real]| (0..width).fold(P::Real::zero(), |m, c| Float::max(m, relative(errors, c)));
        if self.ctrl.progress {
            crate::progress!(self.ctrl.indent, "original rel error: {:e}", worst(&errors));
        }
        let mut history = vec![worst(&errors)];
        let mut done = vec![false; width];
        let mut its = 0;
        loop {
            for c in 0..width {
                if !done[c] && relative(&errors, c) <= tol {
                    if self.ctrl.progress {
                        crate::progress!(self.ctrl.indent, "column {} converged with {:e} <= {:e}", c, relative(&errors, c), tol);
                    }
                    done[c] = true;
                }
            }
            let active: Vec<usize> = (0..width).filter(|&c| !done[c]).collect();
            if active.is_empty() || its >= self.ctrl.max_refine_its {
                break;
            }
            let r_active = DMatrix::from_fn(n, active.len(), |i, k| r[(i, active[k])]);
            let dx = self.inverse(&r_active)?;
            let cand = DMatrix::from_fn(n, active.len(), |i, k| x[(i, active[k])] + dx[(i, k)]);
            let b_active = DMatrix::from_fn(n, active.len(), |i, k| b_orig[(i, active[k])]);
            let r_cand = self.residual(&b_active, &cand)?;
            let new_errors = Self::col_norms(&r_cand);
            let mut accepted = false;
            for (k, &c) in active.iter().enumerate() {
                if self.ctrl.progress {
                    crate::progress!(self.ctrl.indent, "column {} refined rel error: {:e}", c, new_errors[k] / b_norms[c]);
                }
                if new_errors[k] < errors[c] {
                    x.column_mut(c).copy_from(&cand.column(k));
                    r.column_mut(c).copy_from(&r_cand.column(k));
                    errors[c] = new_errors[k];
                    accepted = true;
                } else {
                    done[c] = true;
                }
            }
            if !accepted {
                break;
            }
            its += 1;
            history.push(worst(&errors));
        }
        b.copy_from(&x.map(|v| (self.down)(v)));
        Ok(Refinement { its, history })
    }

    fn batch(&mut self, b: &mut DMatrix<F>) -> LaResult<Refinement<P::Real>> {
        let b_orig = b.map(|v| (self.up)(v));
        let b_norm = dense::max_norm(&b_orig);
        let mut x = self.inverse(&b_orig)?;
        let mut history = Vec::with_capacity(self.ctrl.max_refine_its);
        for it in 0..self.ctrl.max_refine_its {
            let r = self.residual(&b_orig, &x)?;
            let rel = if b_norm.is_zero() {
                P::Real::zero()
            } else {
                dense::max_norm(&r) / b_norm
            };
            if self.ctrl.progress {
                crate::progress!(self.ctrl.indent, "batch refinement {}: rel error {:e}", it, rel);
            }
            history.push(rel);
            let dx = self.inverse(&r)?;
            x += dx;
        }
        b.copy_from(&x.map(|v| (self.down)(v)));
        Ok(Refinement {
            its: self.ctrl.max_refine_its,
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::dense::{gemm, Orientation};
    use nalgebra::dmatrix;
    use std::cell::Cell;

    fn ctrl(its: usize) -> RefineCtrl {
        RefineCtrl {
            rel_tol: 1e-14,
            max_refine_its: its,
            progress: false,
            ..RefineCtrl::default()
        }
    }

    fn system() -> DMatrix<f64> {
        dmatrix![4.0, 1.0, 0.0; 1.0, 3.0, 1.0; 0.0, 1.0, 2.0]
    }

    /// `A` plus a perturbation, so its inverse is only approximate.
    fn rough_inverse() -> DMatrix<f64> {
        let mut p = system();
        p[(0, 0)] += 0.3;
        p[(2, 1)] -= 0.2;
        p.try_inverse().unwrap()
    }

    fn apply(a: &DMatrix<f64>) -> impl FnMut(&DMatrix<f64>, &mut DMatrix<f64>) -> LaResult<()> + '_ {
        move |x, y| gemm(Orientation::Normal, Orientation::Normal, 1.0, a, x, 0.0, y)
    }

    #[test]
    fn test_single_history_is_nonincreasing() {
        let a = system();
        let inv = rough_inverse();
        let mut b = DMatrix::from_column_slice(3, 1, &[1.0, 2.0, 3.0]);
        let orig = b.clone();
        let out = refined_solve_traced(apply(&a), |x: &mut DMatrix<f64>| {
            *x = &inv * &*x;
            Ok(())
        }, &mut b, &ctrl(30))
        .unwrap();
        assert!(out.its <= 30);
        assert_eq!(out.history.len(), out.its + 1);
        assert!(out.history.windows(2).all(|w| w[1] <= w[0]));
        assert!(dense::relative_residual(&a, &b, &orig).unwrap() < 1e-12);
    }

    #[test]
    fn test_zero_iterations_applies_inverse_once() {
        let a = system();
        let calls = Cell::new(0);
        let mut b = DMatrix::from_column_slice(3, 1, &[1.0, 0.0, 0.0]);
        let its = refined_solve(apply(&a), |x: &mut DMatrix<f64>| {
            calls.set(calls.get() + 1);
            dense::scale(0.5, x);
            Ok(())
        }, &mut b, &ctrl(0))
        .unwrap();
        assert_eq!(its, 0);
        assert_eq!(calls.get(), 1);
        assert_eq!(b[(0, 0)], 0.5);
    }

    #[test]
    fn test_pair_columns_converge_independently() {
        let a = system();
        let inv = rough_inverse();
        let mut b = dmatrix![1.0, 0.0; 2.0, 0.0; 3.0, 0.0];
        let orig = b.clone();
        let its = refined_solve(apply(&a), |x: &mut DMatrix<f64>| {
            *x = &inv * &*x;
            Ok(())
        }, &mut b, &ctrl(40))
        .unwrap();
        assert!(its <= 40);
        assert!(dense::relative_residual(&a, &b.columns(0, 1).clone_owned(), &orig.columns(0, 1).clone_owned()).unwrap() < 1e-12);
        // a zero right-hand side keeps a zero solution
        assert!(b.column(1).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_batch_runs_fixed_iterations() {
        let a = system();
        let inv = rough_inverse();
        let calls = Cell::new(0);
        let mut b = DMatrix::from_fn(3, 3, |i, j| (i + j) as f64 + 1.0);
        let out = refined_solve_traced(apply(&a), |x: &mut DMatrix<f64>| {
            calls.set(calls.get() + 1);
            *x = &inv * &*x;
            Ok(())
        }, &mut b, &ctrl(5))
        .unwrap();
        assert_eq!(out.its, 5);
        assert_eq!(calls.get(), 6);
        assert_eq!(out.history.len(), 5);
    }

    #[test]
    fn test_promoted_single_precision() {
        let a64 = system();
        let inv32 = rough_inverse().map(|v| v as f32);
        let mut b = DMatrix::from_column_slice(3, 1, &[1.0f32, -1.0, 0.5]);
        let orig = b.map(|v| v as f64);
        let out = promoted_refined_solve_traced(apply(&a64), |x: &mut DMatrix<f32>| {
            *x = &inv32 * &*x;
            Ok(())
        }, &mut b, &ctrl(50))
        .unwrap();
        assert!(out.history.windows(2).all(|w| w[1] <= w[0]));
        let x = b.map(|v| v as f64);
        assert!(dense::relative_residual(&a64, &x, &orig).unwrap() < 1e-5);
    }
}
