//! Sparse matrices distributed by contiguous blocks of rows.
//!
//! Rank `r` of the communicator owns rows `[r * blocksize, r * blocksize +
//! local_height)` where `blocksize = height / size` and the last rank also
//! takes the remainder. Remote updates are routed to their owners with a single
//! all-to-all inside [`DistSparseMatrix::process_queues`].

use super::dense::Orientation;
use super::sparse::SparseMatrix;
use crate::comm::Comm;
use crate::error::{LaError, LaResult};
use crate::scalar::Field;
use nalgebra::DMatrix;

/// Owner layout of `height` rows over `size` processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowBlocks {
    pub height: usize,
    pub size: usize,
}

impl RowBlocks {
    pub fn blocksize(&self) -> usize {
        self.height / self.size
    }

    pub fn first_row(&self, rank: usize) -> usize {
        rank * self.blocksize()
    }

    pub fn local_height(&self, rank: usize) -> usize {
        if rank + 1 == self.size {
            self.height - self.first_row(rank)
        } else {
            self.blocksize()
        }
    }

    pub fn owner(&self, i: usize) -> usize {
        let bs = self.blocksize();
        if bs == 0 {
            self.size - 1
        } else {
            (i / bs).min(self.size - 1)
        }
    }
}

#[derive(Debug, Clone)]
pub struct DistSparseMatrix<F: Field> {
    comm: Comm,
    blocks: RowBlocks,
    width: usize,
    local: SparseMatrix<F>,
    remote: Vec<(usize, usize, F)>,
}

impl<F: Field> DistSparseMatrix<F> {
    pub fn new(comm: &Comm, height: usize, width: usize) -> Self {
        let blocks = RowBlocks {
            height,
            size: comm.size(),
        };
        let local = SparseMatrix::new(blocks.local_height(comm.rank()), width);
        Self {
            comm: comm.clone(),
            blocks,
            width,
            local,
            remote: Vec::new(),
        }
    }

    pub fn comm(&self) -> &Comm {
        &self.comm
    }

    pub fn height(&self) -> usize {
        self.blocks.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn blocks(&self) -> RowBlocks {
        self.blocks
    }

    pub fn first_local_row(&self) -> usize {
        self.blocks.first_row(self.comm.rank())
    }

    pub fn local_height(&self) -> usize {
        self.local.height()
    }

    pub fn row_owner(&self, i: usize) -> usize {
        self.blocks.owner(i)
    }

    /// The locally owned rows, indexed from zero.
    pub fn local(&self) -> &SparseMatrix<F> {
        &self.local
    }

    pub fn reserve(&mut self, num_local: usize, num_remote: usize) {
        self.local.reserve(num_local);
        self.remote.reserve(num_remote);
    }

    /// Stage `A(i, j) += value` for a locally owned global row `i`.
    pub fn queue_local_update(&mut self, i: usize, j: usize, value: F) -> LaResult<()> {
        let first = self.first_local_row();
        if i < first || i >= first + self.local_height() {
            return Err(LaError::logic(format!("row {} is not owned by this process", i)));
        }
        self.local.queue_update(i - first, j, value)
    }

    /// Stage `A(i, j) += value` for any global row; remote rows are sent to their
    /// owner by the next [`process_queues`](Self::process_queues).
    pub fn queue_update(&mut self, i: usize, j: usize, value: F) -> LaResult<()> {
        if i >= self.height() || j >= self.width {
            return Err(LaError::logic(format!(
                "entry ({}, {}) outside a {} x {} sparse matrix",
                i,
                j,
                self.height(),
                self.width
            )));
        }
        if self.row_owner(i) == self.comm.rank() {
            self.queue_local_update(i, j, value)
        } else {
            self.remote.push((i, j, value));
            Ok(())
        }
    }

    /// Route remote updates to their owners and compress. Collective.
    pub fn process_queues(&mut self) -> LaResult<()> {
        let mut parts: Vec<Vec<(usize, usize, F)>> = vec![Vec::new(); self.comm.size()];
        for (i, j, v) in self.remote.drain(..) {
            parts[self.blocks.owner(i)].push((i, j, v));
        }
        let received = self.comm.all_to_all(parts)?;
        let first = self.first_local_row();
        for (i, j, v) in received.into_iter().flatten() {
            self.local.queue_update(i - first, j, v)?;
        }
        self.local.process_queues();
        Ok(())
    }

    /// Number of stored entries over every process. Collective.
    pub fn num_entries(&self) -> LaResult<usize> {
        self.comm.all_reduce(self.local.num_entries(), |a, b| a + b)
    }

    /// `y = alpha A x + beta y` for multi-vectors distributed like the rows of
    /// `A` (for `x`, like the rows of a `width`-row matrix). Collective.
    pub fn multiply(&self, alpha: F, x_local: &DMatrix<F>, beta: F, y_local: &mut DMatrix<F>) -> LaResult<()> {
        let x_blocks = RowBlocks {
            height: self.width,
            size: self.comm.size(),
        };
        let expected = x_blocks.local_height(self.comm.rank());
        if x_local.nrows() != expected {
            return Err(LaError::DimensionMismatch {
                expected,
                actual: x_local.nrows(),
            });
        }
        let x = gather_rows(&self.comm, x_local, self.width)?;
        self.local.multiply(Orientation::Normal, alpha, &x, beta, y_local)
    }

    /// Assemble the full matrix on every process. Collective.
    pub fn to_local_copy(&self) -> LaResult<SparseMatrix<F>> {
        let first = self.first_local_row();
        let mine: Vec<(usize, usize, F)> = self.local.triplets()?.map(|(i, j, v)| (i + first, j, v)).collect();
        let all = self.comm.all_gather(mine)?;
        SparseMatrix::from_triplets(self.height(), self.width, all.into_iter().flatten())
    }
}

/// Concatenate row-block distributed multi-vectors into the full matrix on
/// every process. Collective.
pub fn gather_rows<F: Field>(comm: &Comm, local: &DMatrix<F>, height: usize) -> LaResult<DMatrix<F>> {
    let ncols = local.ncols();
    let pieces = comm.all_gather(local.clone())?;
    let mut out = DMatrix::zeros(height, ncols);
    let mut row = 0;
    for piece in pieces {
        if piece.ncols() != ncols {
            return Err(LaError::DimensionMismatch {
                expected: ncols,
                actual: piece.ncols(),
            });
        }
        if row + piece.nrows() > height {
            return Err(LaError::DimensionMismatch {
                expected: height,
                actual: row + piece.nrows(),
            });
        }
        out.rows_mut(row, piece.nrows()).copy_from(&piece);
        row += piece.nrows();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::spmd;

    #[test]
    fn test_row_blocks_last_takes_remainder() {
        let b = RowBlocks { height: 10, size: 3 };
        assert_eq!(b.blocksize(), 3);
        assert_eq!(b.local_height(2), 4);
        assert_eq!(b.owner(9), 2);
        assert_eq!(b.owner(5), 1);
        let tiny = RowBlocks { height: 2, size: 4 };
        assert_eq!(tiny.owner(1), 3);
        assert_eq!(tiny.local_height(3), 2);
    }

    #[test]
    fn test_remote_updates_reach_owners() {
        let results = spmd(3, |comm| {
            let mut a = DistSparseMatrix::<f64>::new(&comm, 7, 7);
            // every rank adds 1 to every diagonal entry
            for i in 0..7 {
                a.queue_update(i, i, 1.0)?;
            }
            a.process_queues()?;
            let full = a.to_local_copy()?;
            let x_blocks = RowBlocks { height: 7, size: 3 };
            let first = x_blocks.first_row(comm.rank());
            let x = DMatrix::from_fn(x_blocks.local_height(comm.rank()), 1, |i, _| (first + i) as f64);
            let mut y = DMatrix::zeros(a.local_height(), 1);
            a.multiply(1.0, &x, 0.0, &mut y)?;
            Ok((full.to_dense()?, y, first))
        });
        for r in results {
            let (full, y, first) = r.unwrap();
            assert_eq!(full, DMatrix::<f64>::identity(7, 7) * 3.0);
            for (k, v) in y.iter().enumerate() {
                assert_eq!(*v, 3.0 * (first + k) as f64);
            }
        }
    }
}
