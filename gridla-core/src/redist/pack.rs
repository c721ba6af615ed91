//! Packing of local blocks into message buffers.

use crate::dist::matrix::length;
use crate::dist::DistMeta;
use crate::scalar::Entry;
use nalgebra::{DMatrix, DMatrixView};

/// Column-major copy of `local`, zero-padded to `portion` entries.
pub fn pack_padded<T: Entry>(local: &DMatrixView<'_, T>, portion: usize) -> Vec<T> {
    let mut buf = Vec::with_capacity(portion.max(local.len()));
    for j in 0..local.ncols() {
        for i in 0..local.nrows() {
            buf.push(local[(i, j)]);
        }
    }
    if buf.len() < portion {
        buf.resize(portion, T::zero());
    }
    buf
}

/// Column-major copy of the rows `rows` and columns `cols` of `local`.
pub fn pack_selected<T: Entry>(local: &DMatrixView<'_, T>, rows: &[usize], cols: &[usize]) -> Vec<T> {
    let mut buf = Vec::with_capacity(rows.len() * cols.len());
    for &j in cols {
        for &i in rows {
            buf.push(local[(i, j)]);
        }
    }
    buf
}

/// Local block of the process with VC rank `vc` under `meta`, as the global
/// indices of its rows and columns.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
}

impl Block {
    pub fn of_vc(meta: &DistMeta, vc: usize) -> Block {
        if !meta.participating_vc(vc) {
            return Block::default();
        }
        let (cs, rs) = (meta.col_stride(), meta.row_stride());
        let col_shift = meta.col_shift_of(meta.rank_of_vc(meta.col_dist(), vc));
        let row_shift = meta.row_shift_of(meta.rank_of_vc(meta.row_dist(), vc));
        let rows = (0..length(meta.height, col_shift, cs))
            .map(|il| col_shift + il * cs)
            .collect();
        let cols = (0..length(meta.width, row_shift, rs))
            .map(|jl| row_shift + jl * rs)
            .collect();
        Block { rows, cols }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len() * self.cols.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scatter a column-major buffer holding `block` into `dst` wherever `dst`
/// stores the entry.
pub fn unpack_block<T: Entry>(buf: &[T], block: &Block, dst_meta: &DistMeta, dst: &mut DMatrix<T>) {
    if !dst_meta.participating() {
        return;
    }
    let (cs, rs) = (dst_meta.col_stride(), dst_meta.row_stride());
    let (col_rank, row_rank) = match (dst_meta.col_rank(), dst_meta.row_rank()) {
        (Some(c), Some(r)) => (c, r),
        _ => return,
    };
    let (col_shift, row_shift) = (dst_meta.col_shift(), dst_meta.row_shift());
    let nrows = block.rows.len();
    for (jb, &j) in block.cols.iter().enumerate() {
        if dst_meta.col_owner(j) != row_rank {
            continue;
        }
        let jl = (j - row_shift) / rs;
        for (ib, &i) in block.rows.iter().enumerate() {
            if dst_meta.row_owner(i) != col_rank {
                continue;
            }
            dst[((i - col_shift) / cs, jl)] = buf[jb * nrows + ib];
        }
    }
}

/// Positions within `block` of the rows and columns that the process with VC
/// rank `vc` stores under `dst_meta`.
pub fn select_for(block: &Block, dst_meta: &DistMeta, vc: usize) -> (Vec<usize>, Vec<usize>) {
    if !dst_meta.participating_vc(vc) {
        return (Vec::new(), Vec::new());
    }
    let col_rank = dst_meta.rank_of_vc(dst_meta.col_dist(), vc);
    let row_rank = dst_meta.rank_of_vc(dst_meta.row_dist(), vc);
    let rows = block
        .rows
        .iter()
        .enumerate()
        .filter(|&(_, &i)| dst_meta.row_owner(i) == col_rank)
        .map(|(ib, _)| ib)
        .collect();
    let cols = block
        .cols
        .iter()
        .enumerate()
        .filter(|&(_, &j)| dst_meta.col_owner(j) == row_rank)
        .map(|(jb, _)| jb)
        .collect();
    (rows, cols)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_padded() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let v = m.view((0, 0), (2, 2));
        assert_eq!(pack_padded(&v, 6), vec![1.0, 3.0, 2.0, 4.0, 0.0, 0.0]);
        assert_eq!(pack_selected(&v, &[1], &[0, 1]), vec![3.0, 4.0]);
    }
}
