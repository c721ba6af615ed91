//! Interior point solver for convex quadratic programs in affine form:
//!
//! ```text
//! min 1/2 x^T Q x + c^T x   s.t.  A x = b,  G x + s = h,  s >= 0
//! ```
//!
//! using Mehrotra's predictor-corrector scheme over a regularized
//! quasi-semidefinite factorization of the full KKT system.

pub mod equil;
pub mod kkt;
pub mod mehrotra;

pub use equil::{equilibrate, RuizScaling};
pub use kkt::{Direction, KktSolver};
pub use mehrotra::{max_step_in_positive_cone, mehrotra};

use crate::error::{LaError, LaResult};
use crate::linalg::sparse::SparseMatrix;
use crate::scalar::Real;
use nalgebra::DMatrix;

/// Problem data. Vectors are single columns.
#[derive(Debug, Clone)]
pub struct QpProblem<R: Real> {
    /// Symmetric `n x n`, both triangles stored.
    pub q: SparseMatrix<R>,
    /// Equality constraints, `m x n`.
    pub a: SparseMatrix<R>,
    /// Conic constraints, `k x n`.
    pub g: SparseMatrix<R>,
    pub b: DMatrix<R>,
    pub c: DMatrix<R>,
    pub h: DMatrix<R>,
}

impl<R: Real> QpProblem<R> {
    /// `(n, m, k)`: variables, equality rows, inequality rows.
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.a.width(), self.a.height(), self.g.height())
    }

    pub fn validate(&self) -> LaResult<()> {
        let (n, m, k) = self.dims();
        let checks = [
            (self.q.height(), n),
            (self.q.width(), n),
            (self.g.width(), n),
            (self.b.nrows(), m),
            (self.c.nrows(), n),
            (self.h.nrows(), k),
        ];
        for (actual, expected) in checks {
            if actual != expected {
                return Err(LaError::DimensionMismatch { expected, actual });
            }
        }
        if self.b.ncols() != 1 || self.c.ncols() != 1 || self.h.ncols() != 1 {
            return Err(LaError::logic("b, c and h must be single columns"));
        }
        Ok(())
    }
}

/// Primal-dual iterate and the number of iterations that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct QpSolution<R: Real> {
    pub x: DMatrix<R>,
    pub y: DMatrix<R>,
    pub z: DMatrix<R>,
    pub s: DMatrix<R>,
    pub num_its: usize,
}

impl<R: Real> QpSolution<R> {
    /// All-zero iterate for a problem of the given dimensions.
    pub fn zeros(n: usize, m: usize, k: usize) -> Self {
        Self {
            x: DMatrix::zeros(n, 1),
            y: DMatrix::zeros(m, 1),
            z: DMatrix::zeros(k, 1),
            s: DMatrix::zeros(k, 1),
            num_its: 0,
        }
    }

    fn check_dims(&self, n: usize, m: usize, k: usize) -> LaResult<()> {
        for (v, len) in [(&self.x, n), (&self.y, m), (&self.z, k), (&self.s, k)] {
            if v.nrows() != len || v.ncols() != 1 {
                return Err(LaError::DimensionMismatch {
                    expected: len,
                    actual: v.nrows(),
                });
            }
        }
        Ok(())
    }
}
