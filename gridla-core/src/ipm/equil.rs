//! Ruiz equilibration of a QP.
//!
//! Rows of `A` and `G` and the columns of `[A; G]` (together with `Q`) are
//! scaled iteratively by the inverse square roots of their max norms:
//!
//! ```text
//! A <- R_A A C,  G <- R_G G C,  Q <- C Q C
//! b <- R_A b,    h <- R_G h,    c <- C c
//! ```
//!
//! and the iterates of the scaled problem map back through
//! `x = C x~`, `y = R_A y~`, `z = R_G z~`, `s = s~ / R_G`.

use super::QpProblem;
use crate::error::LaResult;
use crate::scalar::Real;
use crate::util::logging::Indent;
use nalgebra::DMatrix;
use num_traits::{Float, One, Zero};

/// Accumulated scaling factors.
#[derive(Debug, Clone, PartialEq)]
pub struct RuizScaling<R> {
    /// Row scaling of `A` (length m).
    pub row_a: Vec<R>,
    /// Row scaling of `G` (length k).
    pub row_g: Vec<R>,
    /// Column scaling (length n).
    pub col: Vec<R>,
}

fn scale_vec<R: Real>(v: &mut DMatrix<R>, d: &[R], invert: bool) {
    for (vi, &di) in v.iter_mut().zip(d) {
        if invert {
            *vi /= di;
        } else {
            *vi *= di;
        }
    }
}

fn inv_sqrt<R: Real>(norm: R) -> R {
    if norm > R::lit(1e-12) {
        R::one() / norm.sqrt()
    } else {
        R::one()
    }
}

impl<R: Real> RuizScaling<R> {
    pub fn identity(n: usize, m: usize, k: usize) -> Self {
        Self {
            row_a: vec![R::one(); m],
            row_g: vec![R::one(); k],
            col: vec![R::one(); n],
        }
    }

    /// Map an iterate of the original problem into the scaled one.
    pub fn scale_iterate(&self, x: &mut DMatrix<R>, y: &mut DMatrix<R>, z: &mut DMatrix<R>, s: &mut DMatrix<R>) {
        scale_vec(x, &self.col, true);
        scale_vec(y, &self.row_a, true);
        scale_vec(z, &self.row_g, true);
        scale_vec(s, &self.row_g, false);
    }

    /// Map an iterate of the scaled problem back to the original one.
    pub fn unscale_iterate(&self, x: &mut DMatrix<R>, y: &mut DMatrix<R>, z: &mut DMatrix<R>, s: &mut DMatrix<R>) {
        scale_vec(x, &self.col, false);
        scale_vec(y, &self.row_a, false);
        scale_vec(z, &self.row_g, false);
        scale_vec(s, &self.row_g, true);
    }
}

/// Equilibrate `problem` with `iters` Ruiz sweeps. Returns the scaled problem
/// and the accumulated factors.
pub fn equilibrate<R: Real>(
    problem: &QpProblem<R>,
    iters: usize,
    log: Option<Indent>,
) -> LaResult<(QpProblem<R>, RuizScaling<R>)> {
    let (n, m, k) = problem.dims();
    let mut scaled = problem.clone();
    let mut scaling = RuizScaling::identity(n, m, k);

    for it in 0..iters {
        let row_a: Vec<R> = scaled.a.row_max_norms()?.into_iter().map(inv_sqrt).collect();
        let row_g: Vec<R> = scaled.g.row_max_norms()?.into_iter().map(inv_sqrt).collect();
        let col_a = scaled.a.col_max_norms()?;
        let col_g = scaled.g.col_max_norms()?;
        let col_q = scaled.q.col_max_norms()?;
        let col: Vec<R> = (0..n)
            .map(|j| inv_sqrt(col_a[j].max(col_g[j]).max(col_q[j])))
            .collect();

        scaled.a.scale_rows_cols(&row_a, &col)?;
        scaled.g.scale_rows_cols(&row_g, &col)?;
        scaled.q.scale_rows_cols(&col, &col)?;

        for (acc, d) in [
            (&mut scaling.row_a, &row_a),
            (&mut scaling.row_g, &row_g),
            (&mut scaling.col, &col),
        ] {
            for (a, &di) in acc.iter_mut().zip(d.iter()) {
                *a *= di;
            }
        }
        if let Some(indent) = log {
            let spread = |v: &[R]| v.iter().fold(R::zero(), |m, &d| m.max((R::one() - d).abs()));
            crate::progress!(
                indent,
                "ruiz sweep {}: max |1 - d| rows {:e}, cols {:e}",
                it,
                spread(&row_a).max(spread(&row_g)),
                spread(&col)
            );
        }
    }

    scale_vec(&mut scaled.b, &scaling.row_a, false);
    scale_vec(&mut scaled.h, &scaling.row_g, false);
    scale_vec(&mut scaled.c, &scaling.col, false);
    Ok((scaled, scaling))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse::SparseMatrix;

    fn problem() -> QpProblem<f64> {
        QpProblem {
            q: SparseMatrix::from_triplets(2, 2, vec![(0, 0, 100.0), (1, 1, 1.0)]).unwrap(),
            a: SparseMatrix::from_triplets(1, 2, vec![(0, 0, 10.0), (0, 1, 1.0)]).unwrap(),
            g: SparseMatrix::from_triplets(2, 2, vec![(0, 0, -1.0), (1, 1, -0.01)]).unwrap(),
            b: DMatrix::from_column_slice(1, 1, &[4.0]),
            c: DMatrix::from_column_slice(2, 1, &[1.0, -1.0]),
            h: DMatrix::from_column_slice(2, 1, &[0.0, 0.5]),
        }
    }

    #[test]
    fn test_scaled_entries_shrink_towards_one() {
        let ratio = |p: &QpProblem<f64>| {
            let all = [p.q.row_max_norms().unwrap(), p.a.row_max_norms().unwrap(), p.g.row_max_norms().unwrap()].concat();
            let hi = all.iter().cloned().fold(0.0, f64::max);
            let lo = all.iter().cloned().fold(f64::INFINITY, f64::min);
            hi / lo
        };
        let p = problem();
        let (scaled, _) = equilibrate(&p, 10, None).unwrap();
        assert!(ratio(&scaled) < ratio(&p));
    }

    #[test]
    fn test_iterates_round_trip_through_scaling() {
        let p = problem();
        let (scaled, scaling) = equilibrate(&p, 3, None).unwrap();
        // feasibility is preserved: A x = b  <=>  A~ x~ = b~
        let x = DMatrix::from_column_slice(2, 1, &[0.3, 1.0]);
        let mut xs = x.clone();
        let (mut y, mut z, mut s) = (DMatrix::zeros(1, 1), DMatrix::zeros(2, 1), DMatrix::from_element(2, 1, 1.0));
        scaling.scale_iterate(&mut xs, &mut y, &mut z, &mut s);
        let mut ax = DMatrix::zeros(1, 1);
        p.a.multiply(Default::default(), 1.0, &x, 0.0, &mut ax).unwrap();
        let mut axs = DMatrix::zeros(1, 1);
        scaled.a.multiply(Default::default(), 1.0, &xs, 0.0, &mut axs).unwrap();
        assert!((axs[(0, 0)] - ax[(0, 0)] * scaling.row_a[0]).abs() < 1e-12);
        scaling.unscale_iterate(&mut xs, &mut y, &mut z, &mut s);
        assert!((xs - x).amax() < 1e-14);
        assert!((s[(0, 0)] - 1.0).abs() < 1e-14);
    }
}
