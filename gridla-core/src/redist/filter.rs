//! Filters: keep a subset of data that is already present locally.

use crate::dist::matrix::length;
use crate::dist::{Axis, DistMatrix, DistRef};
use crate::error::{LaError, LaResult};
use crate::scalar::Entry;
use nalgebra::DMatrix;
use std::sync::Arc;

/// Local row positions in `src` of every local row of `dst`.
fn local_map(
    dst_shift: usize,
    dst_stride: usize,
    dst_len: usize,
    src_shift: usize,
    src_stride: usize,
    src_owns: impl Fn(usize) -> bool,
) -> LaResult<Vec<usize>> {
    (0..dst_len)
        .map(|l| {
            let g = dst_shift + l * dst_stride;
            if !src_owns(g) {
                return Err(LaError::logic(format!(
                    "filter source does not hold index {} (misaligned distributions)",
                    g
                )));
            }
            Ok((g - src_shift) / src_stride)
        })
        .collect()
}

/// Extract `dst`'s entries from a source that holds a superset of them
/// locally. Covers Filter, ColFilter, RowFilter and the partial filters.
pub(crate) fn filter<T: Entry>(src: &DistRef<'_, T>, dst: &mut DistMatrix<T>) -> LaResult<()> {
    if !src.grid().in_grid() || !dst.participating() {
        return Ok(());
    }
    let sm = src.meta().clone();
    if !sm.participating() {
        return Err(LaError::logic("filter source is not stored on this process"));
    }
    let (Some(src_col_rank), Some(src_row_rank)) = (sm.col_rank(), sm.row_rank()) else {
        return Ok(());
    };
    let dm = dst.meta().clone();
    let rows = local_map(
        dm.col_shift(),
        dm.col_stride(),
        dst.local_height(),
        sm.col_shift(),
        sm.col_stride(),
        |i| sm.row_owner(i) == src_col_rank,
    )?;
    let cols = local_map(
        dm.row_shift(),
        dm.row_stride(),
        dst.local_width(),
        sm.row_shift(),
        sm.row_stride(),
        |j| sm.col_owner(j) == src_row_rank,
    )?;
    let local = src.local();
    let out = dst.local_mut();
    for (jl, &js) in cols.iter().enumerate() {
        for (il, &is) in rows.iter().enumerate() {
            out[(il, jl)] = local[(is, js)];
        }
    }
    Ok(())
}

/// `[CIRC,CIRC]` to any distribution: the root broadcasts its matrix and every
/// process keeps its own portion.
pub(crate) fn scatter<T: Entry>(src: &DistRef<'_, T>, dst: &mut DistMatrix<T>) -> LaResult<()> {
    let grid = Arc::clone(src.grid());
    let Some(comm) = grid.comm(Axis::Vc) else {
        return Ok(());
    };
    let full = if src.meta().participating() {
        src.local().clone_owned()
    } else {
        DMatrix::zeros(0, 0)
    };
    let full = comm.broadcast(full, src.meta().root)?;
    if !dst.participating() {
        return Ok(());
    }
    let dm = dst.meta().clone();
    let (cs, rs) = (dm.col_stride(), dm.row_stride());
    let (col_shift, row_shift) = (dm.col_shift(), dm.row_shift());
    let lh = length(dm.height, col_shift, cs);
    let lw = length(dm.width, row_shift, rs);
    let out = dst.local_mut();
    for jl in 0..lw {
        for il in 0..lh {
            out[(il, jl)] = full[(col_shift + il * cs, row_shift + jl * rs)];
        }
    }
    Ok(())
}
