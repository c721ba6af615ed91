//! KKT system of the affine QP and its regularized factorization.
//!
//! ```text
//! J = [ Q  A^T  G^T  ]
//!     [ A   0    0   ]
//!     [ G   0  -S/Z  ]
//! ```
//!
//! The sparsity pattern of `J` never changes between iterations, so nested
//! dissection runs once and every later factorization reuses it.

use super::QpProblem;
use crate::error::{LaError, LaResult};
use crate::linalg::dense;
use crate::linalg::ldl::{self, nested_dissection, reg_qsd_ldl, symmetric_equil, Front, Reordering, SymmInfo};
use crate::linalg::sparse::SparseMatrix;
use crate::scalar::Real;
use crate::settings::{BisectCtrl, RegQsdCtrl};
use crate::util::logging::Indent;
use nalgebra::DMatrix;
use num_traits::{Float, One, Zero};

/// Symmetric Ruiz sweeps applied to every KKT matrix before factoring.
const INNER_EQUIL_ITERS: usize = 3;

/// Assemble `J` (both triangles) for the current `s` and `z`.
pub fn kkt<R: Real>(problem: &QpProblem<R>, s: &DMatrix<R>, z: &DMatrix<R>) -> LaResult<SparseMatrix<R>> {
    let (n, m, k) = problem.dims();
    let dim = n + m + k;
    let mut j = SparseMatrix::new(dim, dim);
    j.reserve(problem.q.num_entries() + 2 * (problem.a.num_entries() + problem.g.num_entries()) + k);
    for (r, c, v) in problem.q.triplets()? {
        j.queue_update(r, c, v)?;
    }
    for (r, c, v) in problem.a.triplets()? {
        j.queue_update(n + r, c, v)?;
        j.queue_update(c, n + r, v)?;
    }
    for (r, c, v) in problem.g.triplets()? {
        j.queue_update(n + m + r, c, v)?;
        j.queue_update(c, n + m + r, v)?;
    }
    for i in 0..k {
        j.queue_update(n + m + i, n + m + i, -s[(i, 0)] / z[(i, 0)])?;
    }
    j.process_queues();
    Ok(j)
}

/// `[-r_c; -r_b; -r_h + r_mu / z]`.
pub fn kkt_rhs<R: Real>(rc: &DMatrix<R>, rb: &DMatrix<R>, rh: &DMatrix<R>, rmu: &DMatrix<R>, z: &DMatrix<R>) -> DMatrix<R> {
    let (n, m, k) = (rc.nrows(), rb.nrows(), rh.nrows());
    let mut d = DMatrix::zeros(n + m + k, 1);
    for i in 0..n {
        d[(i, 0)] = -rc[(i, 0)];
    }
    for i in 0..m {
        d[(n + i, 0)] = -rb[(i, 0)];
    }
    for i in 0..k {
        d[(n + m + i, 0)] = -rh[(i, 0)] + rmu[(i, 0)] / z[(i, 0)];
    }
    d
}

/// A Newton direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Direction<R: Real> {
    pub dx: DMatrix<R>,
    pub dy: DMatrix<R>,
    pub dz: DMatrix<R>,
    pub ds: DMatrix<R>,
}

impl<R: Real> Direction<R> {
    /// Split a KKT solution and recover `ds = -(r_mu + s o dz) / z`.
    pub fn expand(n: usize, m: usize, d: &DMatrix<R>, rmu: &DMatrix<R>, s: &DMatrix<R>, z: &DMatrix<R>) -> Self {
        let k = d.nrows() - n - m;
        let dz = d.rows(n + m, k).clone_owned();
        let ds = DMatrix::from_fn(k, 1, |i, _| -(rmu[(i, 0)] + s[(i, 0)] * dz[(i, 0)]) / z[(i, 0)]);
        Self {
            dx: d.rows(0, n).clone_owned(),
            dy: d.rows(n, m).clone_owned(),
            dz,
            ds,
        }
    }

    /// `self += other`.
    pub fn add(&mut self, other: &Self) -> LaResult<()> {
        dense::axpy(R::one(), &other.dx, &mut self.dx)?;
        dense::axpy(R::one(), &other.dy, &mut self.dy)?;
        dense::axpy(R::one(), &other.dz, &mut self.dz)?;
        dense::axpy(R::one(), &other.ds, &mut self.ds)
    }
}

/// Regularized factorization of the current KKT matrix.
pub struct KktSolver<R: Real> {
    reordering: Reordering,
    info: SymmInfo,
    /// Signed regularization candidates: positive on the primal block,
    /// negative on the Lagrange and dual blocks.
    reg_cand: Vec<R>,
    factor: Option<Factor<R>>,
}

struct Factor<R: Real> {
    j_orig: SparseMatrix<R>,
    front: Front<R>,
    reg: Vec<R>,
    d_inner: Vec<R>,
}

impl<R: Real> KktSolver<R> {
    /// Order the pattern of `J` once.
    pub fn analyze(pattern: &SparseMatrix<R>, n: usize) -> LaResult<Self> {
        let (reordering, info) = nested_dissection(pattern, &BisectCtrl::default())?;
        let dim = pattern.height();
        let mag = Float::sqrt(R::epsilon());
        let reg_cand = (0..dim)
            .map(|i| if i < n { mag } else { -mag })
            .collect();
        Ok(Self {
            reordering,
            info,
            reg_cand,
            factor: None,
        })
    }

    /// Multiply the regularization candidates by `factor`.
    pub fn scale_reg_cand(&mut self, factor: R) {
        for c in &mut self.reg_cand {
            *c *= factor;
        }
    }

    pub fn reg_cand(&self) -> &[R] {
        &self.reg_cand
    }

    /// Equilibrate and factor `j` with a priori regularization.
    pub fn factor(&mut self, j: SparseMatrix<R>, log: Option<Indent>) -> LaResult<()> {
        let mut j_eq = j.clone();
        let d_inner = symmetric_equil(&mut j_eq, INNER_EQUIL_ITERS, log)?;
        let max_abs = j_eq.triplets()?.fold(R::zero(), |m, (_, _, v)| m.max(v.abs()));
        let piv_tol = max_abs * R::epsilon();
        let mut front = Front::pull(&j_eq, &self.reordering, &self.info, false)?;
        let reg = reg_qsd_ldl(&self.info, &self.reordering, &mut front, piv_tol, &self.reg_cand, true)?;
        self.factor = Some(Factor {
            j_orig: j,
            front,
            reg,
            d_inner,
        });
        Ok(())
    }

    /// Solve `J d = rhs` in place against the last factored `J`. Returns the
    /// number of inner refinement steps the solve needed.
    pub fn solve(&self, rhs: &mut DMatrix<R>, ctrl: &RegQsdCtrl) -> LaResult<usize> {
        let f = self
            .factor
            .as_ref()
            .ok_or_else(|| LaError::logic("KKT system solved before it was factored"))?;
        ldl::reg_qsd::solve_after(&f.j_orig, &f.reg, &f.d_inner, &self.reordering, &self.info, &f.front, rhs, ctrl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem() -> QpProblem<f64> {
        QpProblem {
            q: SparseMatrix::identity(2),
            a: SparseMatrix::from_triplets(1, 2, vec![(0, 0, 1.0), (0, 1, 1.0)]).unwrap(),
            g: SparseMatrix::from_triplets(2, 2, vec![(0, 0, -1.0), (1, 1, -1.0)]).unwrap(),
            b: DMatrix::from_column_slice(1, 1, &[1.0]),
            c: DMatrix::zeros(2, 1),
            h: DMatrix::zeros(2, 1),
        }
    }

    #[test]
    fn test_kkt_layout() {
        let p = problem();
        let s = DMatrix::from_column_slice(2, 1, &[2.0, 1.0]);
        let z = DMatrix::from_column_slice(2, 1, &[1.0, 4.0]);
        let j = kkt(&p, &s, &z).unwrap().to_dense().unwrap();
        assert_eq!(j.nrows(), 5);
        assert_eq!(j, j.transpose());
        assert_eq!(j[(2, 0)], 1.0);
        assert_eq!(j[(3, 0)], -1.0);
        assert_eq!(j[(3, 3)], -2.0);
        assert_eq!(j[(4, 4)], -0.25);
        assert_eq!(j[(2, 2)], 0.0);
    }

    #[test]
    fn test_expand_recovers_slack_direction() {
        let d = DMatrix::from_column_slice(5, 1, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        let rmu = DMatrix::from_column_slice(2, 1, &[1.0, 1.0]);
        let s = DMatrix::from_column_slice(2, 1, &[1.0, 2.0]);
        let z = DMatrix::from_column_slice(2, 1, &[2.0, 1.0]);
        let dir = Direction::expand(2, 1, &d, &rmu, &s, &z);
        assert_eq!(dir.dy[(0, 0)], 3.0);
        assert_eq!(dir.ds[(0, 0)], -(1.0 + 4.0) / 2.0);
        assert_eq!(dir.ds[(1, 0)], -(1.0 + 10.0));
    }

    #[test]
    fn test_regularized_solve_matches_dense() {
        let p = problem();
        let ones = DMatrix::from_element(2, 1, 1.0);
        let j = kkt(&p, &ones, &ones).unwrap();
        let mut solver = KktSolver::analyze(&j, 2).unwrap();
        assert!(solver.reg_cand()[0] > 0.0 && solver.reg_cand()[2] < 0.0);
        solver.factor(j.clone(), None).unwrap();
        let b = DMatrix::from_column_slice(5, 1, &[0.0, 0.0, 1.0, 0.0, 0.0]);
        let mut x = b.clone();
        solver.solve(&mut x, &RegQsdCtrl::default()).unwrap();
        assert!(dense::relative_residual(&j.to_dense().unwrap(), &x, &b).unwrap() < 1e-7);
    }
}
