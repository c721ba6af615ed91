//! Dense local kernels on `nalgebra` storage.
//!
//! BLAS/LAPACK-style routines written over element access so that every
//! [`Field`] works, including the complex types. Shapes are checked up front
//! and reported as [`LaError::DimensionMismatch`].

use crate::error::{LaError, LaResult};
use crate::scalar::Field;
use nalgebra::DMatrix;
use num_traits::{Float, One, Zero};

/// How an operand enters a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Normal,
    Transpose,
    Adjoint,
}

impl Orientation {
    fn is_normal(self) -> bool {
        self == Orientation::Normal
    }
}

/// Which triangle holds the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Uplo {
    Lower,
    Upper,
}

/// Whether a triangular matrix has an implicit unit diagonal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diag {
    Unit,
    NonUnit,
}

/// Side of a triangular solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

fn mismatch(expected: usize, actual: usize) -> LaError {
    LaError::DimensionMismatch { expected, actual }
}

/// Dimensions of `op(a)`.
#[inline]
fn op_dims<F: Field>(a: &DMatrix<F>, orient: Orientation) -> (usize, usize) {
    if orient.is_normal() {
        (a.nrows(), a.ncols())
    } else {
        (a.ncols(), a.nrows())
    }
}

/// Entry `(i, j)` of `op(a)`.
#[inline]
fn op_at<F: Field>(a: &DMatrix<F>, orient: Orientation, i: usize, j: usize) -> F {
    match orient {
        Orientation::Normal => a[(i, j)],
        Orientation::Transpose => a[(j, i)],
        Orientation::Adjoint => a[(j, i)].conj(),
    }
}

/// `y += alpha * x`.
pub fn axpy<F: Field>(alpha: F, x: &DMatrix<F>, y: &mut DMatrix<F>) -> LaResult<()> {
    if x.shape() != y.shape() {
        return Err(mismatch(y.len(), x.len()));
    }
    for (yi, &xi) in y.iter_mut().zip(x.iter()) {
        *yi += alpha * xi;
    }
    Ok(())
}

/// `x *= alpha`.
pub fn scale<F: Field>(alpha: F, x: &mut DMatrix<F>) {
    if alpha.is_zero() {
        x.fill(F::zero());
        return;
    }
    for xi in x.iter_mut() {
        *xi *= alpha;
    }
}

/// Conjugated inner product `sum conj(x_i) y_i` over all entries.
pub fn dot<F: Field>(x: &DMatrix<F>, y: &DMatrix<F>) -> LaResult<F> {
    if x.shape() != y.shape() {
        return Err(mismatch(x.len(), y.len()));
    }
    Ok(x.iter()
        .zip(y.iter())
        .fold(F::zero(), |acc, (&a, &b)| acc + a.conj() * b))
}

/// Unconjugated inner product `sum x_i y_i`.
pub fn dotu<F: Field>(x: &DMatrix<F>, y: &DMatrix<F>) -> LaResult<F> {
    if x.shape() != y.shape() {
        return Err(mismatch(x.len(), y.len()));
    }
    Ok(x.iter().zip(y.iter()).fold(F::zero(), |acc, (&a, &b)| acc + a * b))
}

/// Frobenius norm, scaled to avoid overflow.
pub fn nrm2<F: Field>(x: &DMatrix<F>) -> F::Real {
    let scale = max_norm(x);
    if scale.is_zero() {
        return scale;
    }
    let sum = x.iter().fold(F::Real::zero(), |acc, &v| {
        let r = v.modulus() / scale;
        acc + r * r
    });
    scale * sum.sqrt()
}

/// Largest entry modulus.
pub fn max_norm<F: Field>(x: &DMatrix<F>) -> F::Real {
    x.iter()
        .fold(F::Real::zero(), |acc, &v| Float::max(acc, v.modulus()))
}

/// `y = alpha op(a) x + beta y`.
pub fn gemv<F: Field>(
    orient: Orientation,
    alpha: F,
    a: &DMatrix<F>,
    x: &DMatrix<F>,
    beta: F,
    y: &mut DMatrix<F>,
) -> LaResult<()> {
    let (m, n) = op_dims(a, orient);
    if x.nrows() != n || x.ncols() != 1 {
        return Err(mismatch(n, x.nrows()));
    }
    if y.nrows() != m || y.ncols() != 1 {
        return Err(mismatch(m, y.nrows()));
    }
    scale(beta, y);
    for j in 0..n {
        let t = alpha * x[(j, 0)];
        if t.is_zero() {
            continue;
        }
        for i in 0..m {
            y[(i, 0)] += op_at(a, orient, i, j) * t;
        }
    }
    Ok(())
}

/// `y = alpha A x + beta y` with `A` Hermitian (`conjugate`) or symmetric and
/// only its lower triangle referenced.
fn sym_lower_mv<F: Field>(
    alpha: F,
    a: &DMatrix<F>,
    x: &DMatrix<F>,
    beta: F,
    y: &mut DMatrix<F>,
    conjugate: bool,
) -> LaResult<()> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(mismatch(n, a.ncols()));
    }
    if x.nrows() != n || y.nrows() != n {
        return Err(mismatch(n, x.nrows().min(y.nrows())));
    }
    scale(beta, y);
    for c in 0..x.ncols().min(y.ncols()) {
        for j in 0..n {
            let xj = alpha * x[(j, c)];
            let d = a[(j, j)];
            let d = if conjugate { F::from_real(d.real_part()) } else { d };
            y[(j, c)] += d * xj;
            for i in j + 1..n {
                let aij = a[(i, j)];
                y[(i, c)] += aij * xj;
                y[(j, c)] += aij.conj_if(conjugate) * alpha * x[(i, c)];
            }
        }
    }
    Ok(())
}

/// Hermitian matrix-vector product from the lower triangle.
pub fn hemv<F: Field>(alpha: F, a: &DMatrix<F>, x: &DMatrix<F>, beta: F, y: &mut DMatrix<F>) -> LaResult<()> {
    sym_lower_mv(alpha, a, x, beta, y, true)
}

/// Symmetric matrix-vector product from the lower triangle.
pub fn symv<F: Field>(alpha: F, a: &DMatrix<F>, x: &DMatrix<F>, beta: F, y: &mut DMatrix<F>) -> LaResult<()> {
    sym_lower_mv(alpha, a, x, beta, y, false)
}

/// `c = alpha op(a) op(b) + beta c`.
pub fn gemm<F: Field>(
    orient_a: Orientation,
    orient_b: Orientation,
    alpha: F,
    a: &DMatrix<F>,
    b: &DMatrix<F>,
    beta: F,
    c: &mut DMatrix<F>,
) -> LaResult<()> {
    let (m, k) = op_dims(a, orient_a);
    let (kb, n) = op_dims(b, orient_b);
    if k != kb {
        return Err(mismatch(k, kb));
    }
    if c.nrows() != m || c.ncols() != n {
        return Err(mismatch(m * n, c.len()));
    }
    scale(beta, c);
    if alpha.is_zero() {
        return Ok(());
    }
    for j in 0..n {
        for l in 0..k {
            let t = alpha * op_at(b, orient_b, l, j);
            if t.is_zero() {
                continue;
            }
            for i in 0..m {
                c[(i, j)] += op_at(a, orient_a, i, l) * t;
            }
        }
    }
    Ok(())
}

/// Whether `op(a)` is effectively lower triangular.
fn effective_lower(uplo: Uplo, orient: Orientation) -> bool {
    (uplo == Uplo::Lower) == orient.is_normal()
}

/// Solve `op(a) x = alpha b` (left) or `x op(a) = alpha b` (right) in place.
///
/// Only the `uplo` triangle of `a` is referenced. A zero pivot is a
/// [`LaError::Runtime`].
pub fn trsm<F: Field>(
    side: Side,
    uplo: Uplo,
    orient: Orientation,
    diag: Diag,
    alpha: F,
    a: &DMatrix<F>,
    b: &mut DMatrix<F>,
) -> LaResult<()> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(mismatch(n, a.ncols()));
    }
    let along = if side == Side::Left { b.nrows() } else { b.ncols() };
    if along != n {
        return Err(mismatch(n, along));
    }
    scale(alpha, b);
    let pivot = |k: usize| -> LaResult<F> {
        if diag == Diag::Unit {
            return Ok(F::one());
        }
        let d = op_at(a, orient, k, k);
        if d.is_zero() {
            return Err(LaError::runtime(format!("zero pivot at {} in triangular solve", k)));
        }
        Ok(d)
    };
    let lower = effective_lower(uplo, orient);
    match side {
        Side::Left => {
            // x_k = (b_k - sum_l op(a)_{kl} x_l) / op(a)_{kk}
            let order: Vec<usize> = if lower { (0..n).collect() } else { (0..n).rev().collect() };
            for c in 0..b.ncols() {
                for (pos, &k) in order.iter().enumerate() {
                    let mut s = b[(k, c)];
                    for &l in &order[..pos] {
                        s -= op_at(a, orient, k, l) * b[(l, c)];
                    }
                    b[(k, c)] = s / pivot(k)?;
                }
            }
        }
        Side::Right => {
            // x op(a) = b: column k of x depends on columns after k when lower
            let order: Vec<usize> = if lower { (0..n).rev().collect() } else { (0..n).collect() };
            for r in 0..b.nrows() {
                for (pos, &k) in order.iter().enumerate() {
                    let mut s = b[(r, k)];
                    for &l in &order[..pos] {
                        s -= b[(r, l)] * op_at(a, orient, l, k);
                    }
                    b[(r, k)] = s / pivot(k)?;
                }
            }
        }
    }
    Ok(())
}

/// Triangular solve with a single column.
pub fn trsv<F: Field>(uplo: Uplo, orient: Orientation, diag: Diag, a: &DMatrix<F>, x: &mut DMatrix<F>) -> LaResult<()> {
    trsm(Side::Left, uplo, orient, diag, F::one(), a, x)
}

/// `a^T`, or `a^H` when `conjugate`.
pub fn transpose<F: Field>(a: &DMatrix<F>, conjugate: bool) -> DMatrix<F> {
    DMatrix::from_fn(a.ncols(), a.nrows(), |i, j| a[(j, i)].conj_if(conjugate))
}

/// Copy the `uplo` triangle over the other one (conjugated when `conjugate`).
pub fn make_symmetric<F: Field>(uplo: Uplo, a: &mut DMatrix<F>, conjugate: bool) -> LaResult<()> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(mismatch(n, a.ncols()));
    }
    for j in 0..n {
        if conjugate {
            a[(j, j)] = F::from_real(a[(j, j)].real_part());
        }
        for i in j + 1..n {
            match uplo {
                Uplo::Lower => a[(j, i)] = a[(i, j)].conj_if(conjugate),
                Uplo::Upper => a[(i, j)] = a[(j, i)].conj_if(conjugate),
            }
        }
    }
    Ok(())
}

/// Set every diagonal entry to `value`.
pub fn fill_diagonal<F: Field>(a: &mut DMatrix<F>, value: F) {
    for k in 0..a.nrows().min(a.ncols()) {
        a[(k, k)] = value;
    }
}

/// `[a, b]`.
pub fn hcat<F: Field>(a: &DMatrix<F>, b: &DMatrix<F>) -> LaResult<DMatrix<F>> {
    if a.nrows() != b.nrows() {
        return Err(mismatch(a.nrows(), b.nrows()));
    }
    let na = a.ncols();
    Ok(DMatrix::from_fn(a.nrows(), na + b.ncols(), |i, j| {
        if j < na {
            a[(i, j)]
        } else {
            b[(i, j - na)]
        }
    }))
}

/// `[a; b]`.
pub fn vcat<F: Field>(a: &DMatrix<F>, b: &DMatrix<F>) -> LaResult<DMatrix<F>> {
    if a.ncols() != b.ncols() {
        return Err(mismatch(a.ncols(), b.ncols()));
    }
    let ma = a.nrows();
    Ok(DMatrix::from_fn(ma + b.nrows(), a.ncols(), |i, j| {
        if i < ma {
            a[(i, j)]
        } else {
            b[(i - ma, j)]
        }
    }))
}

/// Reinterpret the column-major entries of `a` as a `height x width` matrix.
pub fn reshape<F: Field>(height: usize, width: usize, a: &DMatrix<F>) -> LaResult<DMatrix<F>> {
    if height * width != a.len() {
        return Err(mismatch(a.len(), height * width));
    }
    Ok(DMatrix::from_column_slice(height, width, a.as_slice()))
}

/// Tridiagonal matrix with 2 on the diagonal and 1 on both off-diagonals.
pub fn one_two_one<F: Field>(n: usize) -> DMatrix<F> {
    let two = F::one() + F::one();
    DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            two
        } else if i + 1 == j || j + 1 == i {
            F::one()
        } else {
            F::zero()
        }
    })
}

/// Relative residual `||b - a x||_inf / ||b||_inf` for diagnostics.
pub fn relative_residual<F: Field>(a: &DMatrix<F>, x: &DMatrix<F>, b: &DMatrix<F>) -> LaResult<F::Real> {
    let mut r = b.clone();
    gemm(Orientation::Normal, Orientation::Normal, -F::one(), a, x, F::one(), &mut r)?;
    let bn = max_norm(b);
    let rn = max_norm(&r);
    Ok(if bn.is_zero() { rn } else { rn / bn })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dmatrix;
    use num_complex::Complex64;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * (1.0 + a.abs().max(b.abs()))
    }

    #[test]
    fn test_gemm_transposes() {
        let a = dmatrix![1.0, 2.0; 3.0, 4.0; 5.0, 6.0];
        let b = dmatrix![1.0, 0.0, 2.0; 0.0, 1.0, 1.0];
        let mut c = DMatrix::zeros(3, 3);
        gemm(Orientation::Normal, Orientation::Normal, 1.0, &a, &b, 0.0, &mut c).unwrap();
        assert_eq!(c, &a * &b);

        let mut d = DMatrix::zeros(2, 2);
        gemm(Orientation::Transpose, Orientation::Normal, 2.0, &a, &a, 0.0, &mut d).unwrap();
        assert_eq!(d, a.transpose() * &a * 2.0);
    }

    #[test]
    fn test_trsm_all_triangles() {
        let l = dmatrix![2.0, 0.0, 0.0; 1.0, 3.0, 0.0; -1.0, 2.0, 4.0];
        let x = dmatrix![1.0, 2.0; -1.0, 0.5; 3.0, 1.0];
        for orient in [Orientation::Normal, Orientation::Transpose] {
            let op = if orient == Orientation::Normal { l.clone() } else { l.transpose() };
            let mut b = &op * &x;
            trsm(Side::Left, Uplo::Lower, orient, Diag::NonUnit, 1.0, &l, &mut b).unwrap();
            for (got, want) in b.iter().zip(x.iter()) {
                assert!(close(*got, *want));
            }
            let xt = x.transpose();
            let mut bt = &xt * &op;
            trsm(Side::Right, Uplo::Lower, orient, Diag::NonUnit, 1.0, &l, &mut bt).unwrap();
            for (got, want) in bt.iter().zip(xt.iter()) {
                assert!(close(*got, *want));
            }
        }
    }

    #[test]
    fn test_trsm_zero_pivot_is_runtime_error() {
        let l = dmatrix![1.0, 0.0; 1.0, 0.0];
        let mut b = dmatrix![1.0; 1.0];
        let err = trsv(Uplo::Lower, Orientation::Normal, Diag::NonUnit, &l, &mut b).unwrap_err();
        assert!(matches!(err, LaError::Runtime(_)));
    }

    #[test]
    fn test_hemv_matches_full_product() {
        let i = Complex64::i();
        let one = Complex64::new(1.0, 0.0);
        let mut a = DMatrix::from_fn(3, 3, |r, c| one * (r + c) as f64 + i * (r as f64 - c as f64));
        make_symmetric(Uplo::Lower, &mut a, true).unwrap();
        let x = DMatrix::from_fn(3, 1, |r, _| one * (r as f64 + 1.0) - i);
        let mut y = DMatrix::zeros(3, 1);
        hemv(one, &a, &x, Complex64::new(0.0, 0.0), &mut y).unwrap();
        let want = &a * &x;
        for (g, w) in y.iter().zip(want.iter()) {
            assert!((g - w).norm() < 1e-12);
        }
    }

    #[test]
    fn test_norms_and_dots() {
        let x = dmatrix![3.0; 4.0];
        assert!(close(nrm2(&x), 5.0));
        assert_eq!(max_norm(&x), 4.0);
        assert_eq!(dot(&x, &x).unwrap(), 25.0);
        let z = DMatrix::from_column_slice(1, 1, &[Complex64::new(0.0, 1.0)]);
        assert_eq!(dot(&z, &z).unwrap(), Complex64::new(1.0, 0.0));
        assert_eq!(dotu(&z, &z).unwrap(), Complex64::new(-1.0, 0.0));
    }

    #[test]
    fn test_concat_and_reshape() {
        let a = dmatrix![1.0, 2.0; 3.0, 4.0];
        let h = hcat(&a, &a).unwrap();
        assert_eq!(h.shape(), (2, 4));
        let v = vcat(&a, &a).unwrap();
        assert_eq!(v[(3, 1)], 4.0);
        let r = reshape(4, 1, &a).unwrap();
        assert_eq!(r.as_slice(), &[1.0, 3.0, 2.0, 4.0]);
        assert!(reshape(3, 1, &a).is_err());
        let t: DMatrix<f64> = one_two_one(3);
        assert_eq!(t, dmatrix![2.0, 1.0, 0.0; 1.0, 2.0, 1.0; 0.0, 1.0, 2.0]);
    }
}
