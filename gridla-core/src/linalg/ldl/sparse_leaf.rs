//! Up-looking sparse LDL of the small top-left blocks of leaf fronts.
//!
//! The elimination tree and column counts are computed first, then row `k` of
//! `L` is obtained by a sparse triangular solve against the rows already
//! factored. `L` is unit lower triangular and stored by columns.

use super::numeric::Pivoting;
use crate::error::{LaError, LaResult};
use crate::linalg::sparse::SparseMatrix;
use crate::scalar::Field;
use nalgebra::DMatrix;

#[derive(Debug, Clone, Default)]
pub struct SparseLdl<F: Field> {
    pub n: usize,
    /// Column pointers of the strictly lower part of `L`.
    pub col_ptr: Vec<usize>,
    pub row_ind: Vec<usize>,
    pub values: Vec<F>,
    pub diag: Vec<F>,
}

/// Elimination tree and the number of strictly lower entries in each column
/// of `L`, from the lower triangle of the symmetric matrix `a`.
pub fn etree<F: Field>(a: &SparseMatrix<F>) -> LaResult<(Vec<Option<usize>>, Vec<usize>)> {
    let n = a.height();
    let mut parent = vec![None; n];
    let mut flag = vec![usize::MAX; n];
    let mut counts = vec![0; n];
    for k in 0..n {
        flag[k] = k;
        for (j, _) in a.row(k)? {
            if j >= k {
                continue;
            }
            let mut i = j;
            while flag[i] != k {
                if parent[i].is_none() {
                    parent[i] = Some(k);
                }
                counts[i] += 1;
                flag[i] = k;
                match parent[i] {
                    Some(p) => i = p,
                    None => break,
                }
            }
        }
    }
    Ok((parent, counts))
}

impl<F: Field> SparseLdl<F> {
    /// Factor the symmetric (or Hermitian when `conjugate`) matrix `a`, which
    /// must store both triangles. `pivoting` may regularize each pivot; it
    /// receives indices offset by `offset`.
    pub fn factor(a: &SparseMatrix<F>, conjugate: bool, pivoting: &mut Pivoting<F>, offset: usize) -> LaResult<Self> {
        let n = a.height();
        let (parent, counts) = etree(a)?;
        let mut col_ptr = vec![0; n + 1];
        for k in 0..n {
            col_ptr[k + 1] = col_ptr[k] + counts[k];
        }
        let nnz = col_ptr[n];
        let mut row_ind = vec![0; nnz];
        let mut values = vec![F::zero(); nnz];
        let mut diag = vec![F::zero(); n];
        let mut fill = vec![0usize; n];
        let mut y = vec![F::zero(); n];
        let mut flag = vec![usize::MAX; n];
        let mut pattern = vec![0usize; n];

        for k in 0..n {
            let mut top = n;
            flag[k] = k;
            for (i0, v) in a.row(k)? {
                if i0 > k {
                    continue;
                }
                // A(i0, k) from the stored A(k, i0)
                y[i0] += v.conj_if(conjugate);
                let mut len = 0;
                let mut i = i0;
                while flag[i] != k {
                    pattern[len] = i;
                    len += 1;
                    flag[i] = k;
                    match parent[i] {
                        Some(p) => i = p,
                        None => break,
                    }
                }
                while len > 0 {
                    top -= 1;
                    len -= 1;
                    pattern[top] = pattern[len];
                }
            }
            let mut d = y[k];
            y[k] = F::zero();
            for &i in &pattern[top..n] {
                let yi = y[i];
                y[i] = F::zero();
                let start = col_ptr[i];
                for p in start..start + fill[i] {
                    y[row_ind[p]] -= values[p] * yi;
                }
                let l_ki = yi.conj_if(conjugate) / diag[i];
                d -= l_ki * yi;
                let p = start + fill[i];
                row_ind[p] = k;
                values[p] = l_ki;
                fill[i] += 1;
            }
            if conjugate {
                d = F::from_real(d.real_part());
            }
            diag[k] = pivoting.pivot(offset + k, d)?;
        }
        Ok(Self {
            n,
            col_ptr,
            row_ind,
            values,
            diag,
        })
    }

    /// Strictly lower entries in column `j` of `L`.
    pub fn col_count(&self, j: usize) -> usize {
        self.col_ptr[j + 1] - self.col_ptr[j]
    }

    pub fn num_entries(&self) -> usize {
        self.values.len() + self.n
    }

    /// `x = L^-1 x`, column by column of `x`.
    pub fn forward(&self, x: &mut DMatrix<F>) {
        for c in 0..x.ncols() {
            for j in 0..self.n {
                let xj = x[(j, c)];
                if xj.is_zero() {
                    continue;
                }
                for p in self.col_ptr[j]..self.col_ptr[j + 1] {
                    x[(self.row_ind[p], c)] -= self.values[p] * xj;
                }
            }
        }
    }

    /// `x = L^-T x` or `L^-H x`.
    pub fn backward(&self, x: &mut DMatrix<F>, conjugate: bool) {
        for c in 0..x.ncols() {
            for j in (0..self.n).rev() {
                let mut s = x[(j, c)];
                for p in self.col_ptr[j]..self.col_ptr[j + 1] {
                    s -= self.values[p].conj_if(conjugate) * x[(self.row_ind[p], c)];
                }
                x[(j, c)] = s;
            }
        }
    }

    /// `x = D^-1 x`.
    pub fn diagonal_solve(&self, x: &mut DMatrix<F>) -> LaResult<()> {
        for (j, &d) in self.diag.iter().enumerate() {
            if d.is_zero() {
                return Err(LaError::runtime(format!("zero pivot {} in diagonal solve", j)));
            }
            for c in 0..x.ncols() {
                x[(j, c)] /= d;
            }
        }
        Ok(())
    }

    /// Dense copy of the unit lower factor.
    pub fn to_dense_l(&self) -> DMatrix<F> {
        let mut l = DMatrix::identity(self.n, self.n);
        for j in 0..self.n {
            for p in self.col_ptr[j]..self.col_ptr[j + 1] {
                l[(self.row_ind[p], j)] = self.values[p];
            }
        }
        l
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::dense::{self, Orientation};

    #[test]
    fn test_factor_reproduces_matrix() {
        let t = vec![
            (0, 0, 4.0),
            (1, 1, 5.0),
            (2, 2, -3.0),
            (3, 3, 6.0),
            (1, 0, 1.0),
            (0, 1, 1.0),
            (3, 1, 2.0),
            (1, 3, 2.0),
            (3, 2, 1.0),
            (2, 3, 1.0),
        ];
        let a = SparseMatrix::from_triplets(4, 4, t).unwrap();
        let f = SparseLdl::factor(&a, false, &mut Pivoting::Plain, 0).unwrap();
        let l = f.to_dense_l();
        let d = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(f.diag.clone()));
        let rebuilt = &l * d * l.transpose();
        let want = a.to_dense().unwrap();
        assert!(dense::max_norm(&(rebuilt - &want)) < 1e-12);

        let b = DMatrix::from_column_slice(4, 1, &[1.0, 2.0, 3.0, 4.0]);
        let mut x = b.clone();
        f.forward(&mut x);
        f.diagonal_solve(&mut x).unwrap();
        f.backward(&mut x, false);
        let mut r = b.clone();
        dense::gemm(Orientation::Normal, Orientation::Normal, -1.0, &want, &x, 1.0, &mut r).unwrap();
        assert!(dense::max_norm(&r) < 1e-12);
    }

    #[test]
    fn test_zero_pivot_is_runtime_error() {
        let a = SparseMatrix::from_triplets(2, 2, vec![(0, 1, 1.0), (1, 0, 1.0)]).unwrap();
        let err = SparseLdl::factor(&a, false, &mut Pivoting::Plain, 0).unwrap_err();
        assert!(matches!(err, LaError::Runtime(_)));
    }
}
