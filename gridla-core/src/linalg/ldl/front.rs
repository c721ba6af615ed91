//! Frontal matrices of the multifrontal LDL factorization.
//!
//! A [`Front`] tree mirrors the elimination tree of a [`SymmInfo`]: child `c`
//! of a front belongs to child `c` of its node. Childless nodes are sparse
//! leaves, whose top-left block stays sparse and is factored with an
//! up-looking sparse LDL; every other node is dense.

use super::sparse_leaf::{etree, SparseLdl};
use super::symbolic::{Reordering, SymmInfo};
use crate::error::{LaError, LaResult};
use crate::linalg::sparse::SparseMatrix;
use crate::scalar::Field;
use nalgebra::DMatrix;

/// Lifecycle of a front tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontState {
    /// Structure and original values loaded.
    Built,
    /// Holds `L` and `D`.
    Factored,
}

#[derive(Debug, Clone)]
pub struct Front<F: Field> {
    pub sparse_leaf: bool,
    /// Hermitian (`L D L^H`) rather than symmetric storage.
    pub conjugate: bool,
    pub state: FrontState,
    /// Dense nodes: `(size + lower) x size`. Sparse leaves: the `lower x size`
    /// connectivity block only.
    pub l_dense: DMatrix<F>,
    /// Sparse leaves: the symmetric `size x size` top-left block.
    pub work_sparse: SparseMatrix<F>,
    /// Sparse leaves: factor of `work_sparse`.
    pub l_sparse: SparseLdl<F>,
    /// Dense nodes: the pivots.
    pub diag: Vec<F>,
    /// Schur complement handed to the parent during factorization.
    pub work: DMatrix<F>,
    pub children: Vec<Front<F>>,
}

impl<F: Field> Front<F> {
    /// A dense front with the given lower-trapezoidal block.
    pub fn dense(l_dense: DMatrix<F>, children: Vec<Front<F>>) -> Self {
        Self {
            sparse_leaf: false,
            conjugate: false,
            state: FrontState::Built,
            l_dense,
            work_sparse: SparseMatrix::new(0, 0),
            l_sparse: SparseLdl::default(),
            diag: Vec::new(),
            work: DMatrix::zeros(0, 0),
            children,
        }
    }

    fn skeleton(info: &SymmInfo, id: usize, conjugate: bool) -> Self {
        let node = &info.nodes[id];
        let children = node
            .children
            .iter()
            .map(|&c| Self::skeleton(info, c, conjugate))
            .collect();
        let lower = node.lower_struct.len();
        let leaf = node.children.is_empty();
        let mut front = Self::dense(
            if leaf {
                DMatrix::zeros(lower, node.size)
            } else {
                DMatrix::zeros(node.size + lower, node.size)
            },
            children,
        );
        front.sparse_leaf = leaf;
        front.conjugate = conjugate;
        if leaf {
            front.work_sparse = SparseMatrix::new(node.size, node.size);
        }
        front
    }

    /// Load the entries of the symmetric matrix `a` (original ordering) into a
    /// new front tree. Only the lower triangle of the reordered matrix is read.
    pub fn pull(a: &SparseMatrix<F>, reordering: &Reordering, info: &SymmInfo, conjugate: bool) -> LaResult<Self> {
        let root = info.root().ok_or_else(|| LaError::logic("empty elimination tree"))?;
        a.check_unlocked()?;
        if a.height() != info.order() || a.width() != a.height() || reordering.len() != a.height() {
            return Err(LaError::DimensionMismatch {
                expected: info.order(),
                actual: a.height(),
            });
        }
        let mut front = Self::skeleton(info, root, conjugate);
        front.accumulate(a, reordering, info, root)?;
        Ok(front)
    }

    /// Add the entries of `a` into an existing (unfactored) tree.
    pub fn pull_update(&mut self, a: &SparseMatrix<F>, reordering: &Reordering, info: &SymmInfo) -> LaResult<()> {
        if self.state != FrontState::Built {
            return Err(LaError::logic("cannot update a factored front"));
        }
        let root = info.root().ok_or_else(|| LaError::logic("empty elimination tree"))?;
        a.check_unlocked()?;
        self.accumulate(a, reordering, info, root)
    }

    fn accumulate(&mut self, a: &SparseMatrix<F>, r: &Reordering, info: &SymmInfo, id: usize) -> LaResult<()> {
        let node = &info.nodes[id];
        if node.children.len() != self.children.len() {
            return Err(LaError::logic("front tree does not match the elimination tree"));
        }
        for (&c, child) in node.children.iter().zip(self.children.iter_mut()) {
            child.accumulate(a, r, info, c)?;
        }
        let (off, size) = (node.offset, node.size);
        for t in 0..size {
            let j = r.inverse[off + t];
            for (col, v) in a.row(j)? {
                let i = r.map[col];
                if i < off + t {
                    continue;
                }
                // lower-triangle entry (i, off + t) of the reordered matrix
                let value = v.conj_if(self.conjugate);
                if i < off + size {
                    if self.sparse_leaf {
                        let s = i - off;
                        self.work_sparse.queue_update(s, t, value)?;
                        if s != t {
                            self.work_sparse.queue_update(t, s, value.conj_if(self.conjugate))?;
                        }
                    } else {
                        self.l_dense[(i - off, t)] += value;
                    }
                    continue;
                }
                let k = node
                    .orig_lower_struct
                    .binary_search(&i)
                    .map_err(|_| LaError::logic(format!("entry {} is outside the front structure", i)))?;
                let rel = node.orig_lower_rel_inds[k];
                let row = if self.sparse_leaf { rel } else { size + rel };
                if !self.sparse_leaf && row < t {
                    return Err(LaError::logic("Tried to touch upper triangle"));
                }
                self.l_dense[(row, t)] += value;
            }
        }
        if self.sparse_leaf {
            self.work_sparse.process_queues();
        }
        Ok(())
    }

    /// Lower triangle (and connectivity) of the tree in nodal ordering.
    fn collect(&self, info: &SymmInfo, id: usize, out: &mut Vec<(usize, usize, F)>) -> LaResult<()> {
        let node = &info.nodes[id];
        for (&c, child) in node.children.iter().zip(self.children.iter()) {
            child.collect(info, c, out)?;
        }
        let (off, size) = (node.offset, node.size);
        let lower = &node.lower_struct;
        if self.sparse_leaf {
            for (s, t, v) in self.work_sparse.triplets()? {
                if s >= t {
                    out.push((off + s, off + t, v));
                }
            }
        } else {
            for t in 0..size {
                for s in t..size {
                    let v = self.l_dense[(s, t)];
                    if !v.is_zero() {
                        out.push((off + s, off + t, v));
                    }
                }
            }
        }
        let first = if self.sparse_leaf { 0 } else { size };
        for (k, &g) in lower.iter().enumerate() {
            for t in 0..size {
                let v = self.l_dense[(first + k, t)];
                if !v.is_zero() {
                    out.push((g, off + t, v));
                }
            }
        }
        Ok(())
    }

    /// The stored matrix in the original ordering, both triangles.
    pub fn push(&self, info: &SymmInfo, reordering: &Reordering) -> LaResult<SparseMatrix<F>> {
        let root = info.root().ok_or_else(|| LaError::logic("empty elimination tree"))?;
        let mut lower = Vec::new();
        self.collect(info, root, &mut lower)?;
        let n = info.order();
        let mut a = SparseMatrix::new(n, n);
        a.reserve(2 * lower.len());
        for (i, j, v) in lower {
            let (oi, oj) = (reordering.inverse[i], reordering.inverse[j]);
            a.queue_update(oi, oj, v)?;
            if i != j {
                a.queue_update(oj, oi, v.conj_if(self.conjugate))?;
            }
        }
        a.process_queues();
        Ok(a)
    }

    /// The stored lower triangle in nodal ordering.
    pub fn unpack(&self, info: &SymmInfo) -> LaResult<SparseMatrix<F>> {
        let root = info.root().ok_or_else(|| LaError::logic("empty elimination tree"))?;
        let mut lower = Vec::new();
        self.collect(info, root, &mut lower)?;
        let n = info.order();
        SparseMatrix::from_triplets(n, n, lower)
    }

    /// Rows of the front: `lower + size`.
    pub fn height(&self) -> usize {
        if self.sparse_leaf {
            self.l_dense.nrows() + self.l_dense.ncols()
        } else {
            self.l_dense.nrows()
        }
    }

    pub fn size(&self) -> usize {
        self.l_dense.ncols()
    }

    /// Strictly lower entries per column of the sparse leaf factor (symbolic
    /// before factorization).
    fn leaf_col_counts(&self) -> Vec<usize> {
        if self.state == FrontState::Factored {
            (0..self.l_sparse.n).map(|j| self.l_sparse.col_count(j)).collect()
        } else {
            // the leaf workspace is processed at the end of every pull
            etree(&self.work_sparse).map(|(_, counts)| counts).unwrap_or_default()
        }
    }

    fn own_top_left_entries(&self) -> usize {
        if !self.sparse_leaf {
            let n = self.size();
            return n * n;
        }
        if self.state == FrontState::Factored {
            self.l_sparse.num_entries()
        } else {
            self.work_sparse.num_entries()
        }
    }

    fn own_bottom_left_entries(&self) -> usize {
        if self.sparse_leaf {
            self.l_dense.len()
        } else {
            (self.l_dense.nrows() - self.size()) * self.size()
        }
    }

    pub fn num_top_left_entries(&self) -> usize {
        self.own_top_left_entries() + self.children.iter().map(|c| c.num_top_left_entries()).sum::<usize>()
    }

    pub fn num_bottom_left_entries(&self) -> usize {
        self.own_bottom_left_entries() + self.children.iter().map(|c| c.num_bottom_left_entries()).sum::<usize>()
    }

    pub fn num_entries(&self) -> usize {
        self.num_top_left_entries() + self.num_bottom_left_entries()
    }

    fn own_factor_flops(&self) -> f64 {
        let n = self.size() as f64;
        let m = self.l_dense.nrows() as f64;
        if self.sparse_leaf {
            let sparse: f64 = self
                .leaf_col_counts()
                .iter()
                .map(|&c| (c * (c + 2)) as f64)
                .sum();
            sparse + m * n + m * m * n
        } else {
            n * n * n / 3.0 + (m - n) * n + (m - n) * (m - n) * n
        }
    }

    fn own_solve_flops(&self, num_rhs: usize) -> f64 {
        let n = self.size() as f64;
        let m = self.l_dense.nrows() as f64;
        let k = num_rhs as f64;
        if self.sparse_leaf {
            let nnz: usize = self.leaf_col_counts().iter().sum();
            (nnz as f64 + m * n) * k
        } else {
            m * n * k
        }
    }

    fn complex_factor() -> f64 {
        if F::IS_COMPLEX {
            4.0
        } else {
            1.0
        }
    }

    fn total(&self, own: &dyn Fn(&Self) -> f64) -> f64 {
        own(self) + self.children.iter().map(|c| c.total(own)).sum::<f64>()
    }

    /// Gigaflops needed to factor the whole tree.
    pub fn factor_gflops(&self) -> f64 {
        self.total(&|f: &Self| f.own_factor_flops()) * Self::complex_factor() / 1e9
    }

    /// Gigaflops of one solve with `num_rhs` right-hand sides.
    pub fn solve_gflops(&self, num_rhs: usize) -> f64 {
        self.total(&|f: &Self| f.own_solve_flops(num_rhs)) * Self::complex_factor() / 1e9
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::ldl::symbolic::nested_dissection;
    use crate::settings::BisectCtrl;

    fn grid_laplacian(k: usize) -> SparseMatrix<f64> {
        let n = k * k;
        let mut t = Vec::new();
        for x in 0..k {
            for y in 0..k {
                let i = x * k + y;
                t.push((i, i, 4.0));
                if x + 1 < k {
                    t.push((i, i + k, -1.0));
                    t.push((i + k, i, -1.0));
                }
                if y + 1 < k {
                    t.push((i, i + 1, -1.0));
                    t.push((i + 1, i, -1.0));
                }
            }
        }
        SparseMatrix::from_triplets(n, n, t).unwrap()
    }

    #[test]
    fn test_pull_then_push_reproduces_matrix() {
        let a = grid_laplacian(5);
        let (r, info) = nested_dissection(&a, &BisectCtrl { cutoff: 4 }).unwrap();
        let front = Front::pull(&a, &r, &info, false).unwrap();
        assert!(info.nodes.len() > 1);
        let back = front.push(&info, &r).unwrap();
        assert_eq!(back.to_dense().unwrap(), a.to_dense().unwrap());
        let nodal = front.unpack(&info).unwrap();
        assert_eq!(nodal.num_entries(), (a.num_entries() + a.height()) / 2);
    }

    #[test]
    fn test_pull_update_doubles_values() {
        let a = grid_laplacian(3);
        let (r, info) = nested_dissection(&a, &BisectCtrl { cutoff: 2 }).unwrap();
        let mut front = Front::pull(&a, &r, &info, false).unwrap();
        front.pull_update(&a, &r, &info).unwrap();
        let back = front.push(&info, &r).unwrap();
        assert_eq!(back.to_dense().unwrap(), a.to_dense().unwrap() * 2.0);
    }

    #[test]
    fn test_pull_refuses_queued_updates() {
        let mut a = grid_laplacian(3);
        let (r, info) = nested_dissection(&a, &BisectCtrl { cutoff: 2 }).unwrap();
        let mut front = Front::pull(&a, &r, &info, false).unwrap();
        a.queue_update(2, 2, 5.0).unwrap();
        assert!(matches!(Front::pull(&a, &r, &info, false), Err(LaError::Logic(_))));
        assert!(matches!(front.pull_update(&a, &r, &info), Err(LaError::Logic(_))));
        a.process_queues();
        front.pull_update(&a, &r, &info).unwrap();
        let back = front.push(&info, &r).unwrap();
        assert_eq!(back.get(2, 2).unwrap(), 4.0 + 9.0);
    }

    #[test]
    fn test_root_with_lower_struct_over_dense_child() {
        // root: 3 pivots plus a 2-row lower structure; child: 2 pivots, no lower structure
        let child = Front::<f64>::dense(DMatrix::zeros(2, 2), Vec::new());
        let root = Front::dense(DMatrix::zeros(5, 3), vec![child]);
        let closed = |m: f64, n: f64| n * n * n / 3.0 + (m - n) * n + (m - n) * (m - n) * n;
        let want = (closed(5.0, 3.0) + closed(2.0, 2.0)) / 1e9;
        assert!((want - (27.0 + 8.0 / 3.0) / 1e9).abs() < 1e-20);
        assert!((root.factor_gflops() - want).abs() <= 1e-15 * want);
        for k in [1, 4] {
            let want = ((5 * 3 + 2 * 2) * k) as f64 / 1e9;
            assert!((root.solve_gflops(k) - want).abs() <= 1e-15 * want);
        }
    }

    #[test]
    fn test_two_node_flop_count() {
        let child = Front::<f64>::dense(DMatrix::zeros(5, 2), Vec::new());
        let root = Front::dense(DMatrix::zeros(3, 2), vec![child]);
        let closed = |m: f64, n: f64| n * n * n / 3.0 + (m - n) * n + (m - n) * (m - n) * n;
        let want = (closed(5.0, 2.0) + closed(3.0, 2.0)) / 1e9;
        assert!((root.factor_gflops() - want).abs() <= 1e-15 * want);
        assert!((root.solve_gflops(3) - (5.0 * 2.0 * 3.0 + 3.0 * 2.0 * 3.0) / 1e9).abs() < 1e-20);
        assert_eq!(root.num_top_left_entries(), 8);
        assert_eq!(root.num_bottom_left_entries(), 6 + 2);
        assert_eq!(root.height(), 3);
        let copy = root.clone();
        assert_eq!(copy.children.len(), 1);
    }

    #[test]
    fn test_leaf_height_counts_connectivity() {
        let a = grid_laplacian(4);
        let (r, info) = nested_dissection(&a, &BisectCtrl { cutoff: 4 }).unwrap();
        let front = Front::pull(&a, &r, &info, false).unwrap();
        fn check(f: &Front<f64>) {
            if f.sparse_leaf {
                assert_eq!(f.height(), f.l_dense.nrows() + f.l_dense.ncols());
            }
            f.children.iter().for_each(check);
        }
        check(&front);
    }
}
