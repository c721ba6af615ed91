//! Sparse matrices in compressed sparse row form.
//!
//! Entries are staged as coordinate triplets with [`SparseMatrix::queue_update`]
//! and compressed by [`SparseMatrix::process_queues`], which sorts them and sums
//! duplicates into a `sprs` CSR matrix. The offset/target/value buffers can
//! only be read once every queued update has been processed.

use super::dense::Orientation;
use crate::error::{LaError, LaResult};
use crate::scalar::Field;
use nalgebra::DMatrix;
use sprs::{CsMat, TriMat};

/// Row-compressed sparse matrix.
#[derive(Debug, Clone)]
pub struct SparseMatrix<F: Field> {
    height: usize,
    width: usize,
    pending: Vec<(usize, usize, F)>,
    csr: CsMat<F>,
}

fn empty_csr<F: Field>(height: usize, width: usize) -> CsMat<F> {
    let tri: TriMat<F> = TriMat::new((height, width));
    tri.to_csr()
}

impl<F: Field> SparseMatrix<F> {
    /// Empty `height x width` matrix.
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            pending: Vec::new(),
            csr: empty_csr(height, width),
        }
    }

    /// Identity of order `n`.
    pub fn identity(n: usize) -> Self {
        Self::from_triplets(n, n, (0..n).map(|i| (i, i, F::one())))
            .unwrap_or_else(|_| Self::new(n, n))
    }

    /// Build from triplets, summing duplicates.
    pub fn from_triplets<I>(height: usize, width: usize, triplets: I) -> LaResult<Self>
    where
        I: IntoIterator<Item = (usize, usize, F)>,
    {
        let mut a = Self::new(height, width);
        for (i, j, v) in triplets {
            a.queue_update(i, j, v)?;
        }
        a.process_queues();
        Ok(a)
    }

    /// Wrap an existing `sprs` matrix (converted to row storage).
    pub fn from_csmat(mat: CsMat<F>) -> Self {
        let (height, width) = mat.shape();
        let csr = if mat.is_csr() { mat } else { mat.to_csr() };
        Self {
            height,
            width,
            pending: Vec::new(),
            csr,
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Drop every entry and change the shape.
    pub fn resize(&mut self, height: usize, width: usize) {
        self.height = height;
        self.width = width;
        self.pending.clear();
        self.csr = empty_csr(height, width);
    }

    pub fn reserve(&mut self, num_entries: usize) {
        self.pending.reserve(num_entries);
    }

    /// Stage `A(i, j) += value`.
    pub fn queue_update(&mut self, i: usize, j: usize, value: F) -> LaResult<()> {
        if i >= self.height || j >= self.width {
            return Err(LaError::logic(format!(
                "entry ({}, {}) outside a {} x {} sparse matrix",
                i, j, self.height, self.width
            )));
        }
        self.pending.push((i, j, value));
        Ok(())
    }

    /// Whether updates are waiting to be compressed.
    pub fn locked(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn num_queued(&self) -> usize {
        self.pending.len()
    }

    /// Merge the queued updates into the compressed storage.
    pub fn process_queues(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let mut tri: TriMat<F> = TriMat::with_capacity(
            (self.height, self.width),
            self.csr.nnz() + self.pending.len(),
        );
        for (&v, (i, j)) in self.csr.iter() {
            tri.add_triplet(i, j, v);
        }
        for (i, j, v) in self.pending.drain(..) {
            tri.add_triplet(i, j, v);
        }
        self.csr = tri.to_csr();
    }

    /// Logic error while updates are queued.
    pub fn check_unlocked(&self) -> LaResult<()> {
        if self.locked() {
            return Err(LaError::logic(
                "sparse matrix has unprocessed updates; call process_queues first",
            ));
        }
        Ok(())
    }

    /// The compressed matrix.
    pub fn csr(&self) -> LaResult<&CsMat<F>> {
        self.check_unlocked()?;
        Ok(&self.csr)
    }

    /// Row offsets (length `height + 1`).
    pub fn offsets(&self) -> LaResult<Vec<usize>> {
        self.check_unlocked()?;
        Ok(self.csr.proper_indptr().into_owned())
    }

    /// Column index of every stored entry.
    pub fn targets(&self) -> LaResult<&[usize]> {
        self.check_unlocked()?;
        Ok(self.csr.indices())
    }

    pub fn values(&self) -> LaResult<&[F]> {
        self.check_unlocked()?;
        Ok(self.csr.data())
    }

    /// Number of entries in the compressed matrix. Queued updates are not
    /// counted.
    pub fn num_entries(&self) -> usize {
        self.csr.nnz()
    }

    /// Stored `(column, value)` pairs of row `i`.
    pub fn row(&self, i: usize) -> LaResult<Vec<(usize, F)>> {
        self.check_unlocked()?;
        Ok(self
            .csr
            .outer_view(i)
            .map(|r| r.iter().map(|(j, &v)| (j, v)).collect())
            .unwrap_or_default())
    }

    /// Entry `(i, j)`, zero when not stored.
    pub fn get(&self, i: usize, j: usize) -> LaResult<F> {
        self.check_unlocked()?;
        Ok(self.csr.get(i, j).copied().unwrap_or_else(F::zero))
    }

    /// Iterator over stored `(i, j, value)` triplets in row order.
    pub fn triplets(&self) -> LaResult<impl Iterator<Item = (usize, usize, F)> + '_> {
        self.check_unlocked()?;
        Ok(self.stored())
    }

    fn stored(&self) -> impl Iterator<Item = (usize, usize, F)> + '_ {
        self.csr.iter().map(|(&v, (i, j))| (i, j, v))
    }

    /// `y = alpha op(A) x + beta y` for a dense multi-vector `x`.
    pub fn multiply(
        &self,
        orient: Orientation,
        alpha: F,
        x: &DMatrix<F>,
        beta: F,
        y: &mut DMatrix<F>,
    ) -> LaResult<()> {
        self.check_unlocked()?;
        let (m, n) = match orient {
            Orientation::Normal => (self.height, self.width),
            _ => (self.width, self.height),
        };
        if x.nrows() != n {
            return Err(LaError::DimensionMismatch {
                expected: n,
                actual: x.nrows(),
            });
        }
        if y.nrows() != m || y.ncols() != x.ncols() {
            return Err(LaError::DimensionMismatch {
                expected: m,
                actual: y.nrows(),
            });
        }
        super::dense::scale(beta, y);
        for c in 0..x.ncols() {
            for (&v, (i, j)) in self.csr.iter() {
                match orient {
                    Orientation::Normal => y[(i, c)] += alpha * v * x[(j, c)],
                    Orientation::Transpose => y[(j, c)] += alpha * v * x[(i, c)],
                    Orientation::Adjoint => y[(j, c)] += alpha * v.conj() * x[(i, c)],
                }
            }
        }
        Ok(())
    }

    /// `A^T`, or `A^H` when `conjugate`.
    pub fn transpose(&self, conjugate: bool) -> LaResult<SparseMatrix<F>> {
        let mut t = SparseMatrix::new(self.width, self.height);
        t.pending = self.triplets()?.map(|(i, j, v)| (j, i, v.conj_if(conjugate))).collect();
        t.process_queues();
        Ok(t)
    }

    pub fn to_dense(&self) -> LaResult<DMatrix<F>> {
        let mut d = DMatrix::zeros(self.height, self.width);
        for (i, j, v) in self.triplets()? {
            d[(i, j)] += v;
        }
        Ok(d)
    }

    /// Scale rows by `d_rows` and columns by `d_cols`: `diag(r) A diag(c)`.
    pub fn scale_rows_cols(&mut self, d_rows: &[F::Real], d_cols: &[F::Real]) -> LaResult<()> {
        self.check_unlocked()?;
        if d_rows.len() != self.height || d_cols.len() != self.width {
            return Err(LaError::DimensionMismatch {
                expected: self.height + self.width,
                actual: d_rows.len() + d_cols.len(),
            });
        }
        self.pending = self
            .stored()
            .map(|(i, j, v)| (i, j, v * F::from_real(d_rows[i] * d_cols[j])))
            .collect();
        self.csr = empty_csr(self.height, self.width);
        self.process_queues();
        Ok(())
    }

    /// Largest modulus in each row.
    pub fn row_max_norms(&self) -> LaResult<Vec<F::Real>> {
        let mut out = vec![<F::Real as num_traits::Zero>::zero(); self.height];
        for (i, _, v) in self.triplets()? {
            let m = v.modulus();
            if m > out[i] {
                out[i] = m;
            }
        }
        Ok(out)
    }

    /// Largest modulus in each column.
    pub fn col_max_norms(&self) -> LaResult<Vec<F::Real>> {
        let mut out = vec![<F::Real as num_traits::Zero>::zero(); self.width];
        for (_, j, v) in self.triplets()? {
            let m = v.modulus();
            if m > out[j] {
                out[j] = m;
            }
        }
        Ok(out)
    }
}

/// `[A; B]`.
pub fn vstack<F: Field>(a: &SparseMatrix<F>, b: &SparseMatrix<F>) -> LaResult<SparseMatrix<F>> {
    if a.width() != b.width() {
        return Err(LaError::DimensionMismatch {
            expected: a.width(),
            actual: b.width(),
        });
    }
    let off = a.height();
    SparseMatrix::from_triplets(
        a.height() + b.height(),
        a.width(),
        a.triplets()?
            .chain(b.triplets()?.map(|(i, j, v)| (i + off, j, v))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_are_summed() {
        let mut a = SparseMatrix::<f64>::new(3, 3);
        a.queue_update(0, 0, 1.0).unwrap();
        a.queue_update(2, 1, 2.0).unwrap();
        a.queue_update(0, 0, 3.0).unwrap();
        assert!(a.offsets().is_err());
        a.process_queues();
        assert_eq!(a.num_entries(), 2);
        assert_eq!(a.get(0, 0).unwrap(), 4.0);
        assert_eq!(a.offsets().unwrap(), &[0, 1, 1, 2]);
        assert_eq!(a.targets().unwrap(), &[0, 1]);
        assert_eq!(a.values().unwrap(), &[4.0, 2.0]);
    }

    #[test]
    fn test_out_of_bounds_update_is_logic_error() {
        let mut a = SparseMatrix::<f64>::new(2, 2);
        assert!(matches!(a.queue_update(2, 0, 1.0), Err(LaError::Logic(_))));
    }

    #[test]
    fn test_multiply_and_transpose() {
        let a = SparseMatrix::from_triplets(2, 2, vec![(0, 0, 1.0), (0, 1, 2.0), (1, 0, 3.0), (1, 1, 4.0)])
            .unwrap();
        let x = DMatrix::from_column_slice(2, 1, &[1.0, 2.0]);
        let mut y = DMatrix::zeros(2, 1);
        a.multiply(Orientation::Normal, 1.0, &x, 0.0, &mut y).unwrap();
        assert_eq!(y.as_slice(), &[5.0, 11.0]);
        a.multiply(Orientation::Transpose, 1.0, &x, 0.0, &mut y).unwrap();
        assert_eq!(y.as_slice(), &[7.0, 10.0]);
        assert_eq!(a.transpose(false).unwrap().to_dense().unwrap(), a.to_dense().unwrap().transpose());
    }

    #[test]
    fn test_vstack() {
        let a = SparseMatrix::from_triplets(1, 2, vec![(0, 0, 1.0), (0, 1, 2.0)]).unwrap();
        let b = SparseMatrix::from_triplets(1, 2, vec![(0, 0, 3.0), (0, 1, 4.0)]).unwrap();
        let s = vstack(&a, &b).unwrap();
        assert_eq!(s.height(), 2);
        assert_eq!(s.num_entries(), 4);
        assert_eq!(s.get(1, 1).unwrap(), 4.0);
    }

    #[test]
    fn test_reads_refuse_queued_updates() {
        let mut a = SparseMatrix::from_triplets(2, 2, vec![(0, 0, 2.0), (1, 1, 2.0)]).unwrap();
        a.queue_update(1, 1, 5.0).unwrap();
        assert!(matches!(a.row(1), Err(LaError::Logic(_))));
        assert!(matches!(a.get(1, 1), Err(LaError::Logic(_))));
        assert!(a.triplets().is_err());
        assert!(a.to_dense().is_err());
        assert!(a.transpose(false).is_err());
        assert!(a.row_max_norms().is_err());
        assert!(vstack(&a, &a).is_err());
        a.process_queues();
        assert_eq!(a.get(1, 1).unwrap(), 7.0);
        assert_eq!(a.row(1).unwrap(), vec![(1, 7.0)]);
    }
}
