//! Gathers: replicate data along one or both axes.

use super::pack::{pack_padded, unpack_block, Block};
use crate::dist::{Axis, DistMatrix, DistRef};
use crate::error::{LaError, LaResult};
use crate::scalar::Entry;
use std::sync::Arc;

/// Every member of `axis` contributes its local block; each process keeps the
/// entries it stores in `dst`.
///
/// Blocks are padded to the largest local size so a single equal-portion
/// all-gather suffices.
pub(crate) fn gather_over<T: Entry>(
    src: &DistRef<'_, T>,
    dst: &mut DistMatrix<T>,
    axis: Axis,
) -> LaResult<()> {
    let grid = Arc::clone(src.grid());
    let Some(comm) = grid.comm(axis) else {
        return Ok(());
    };
    let portion = src.meta().max_local_height() * src.meta().max_local_width();
    let send = pack_padded(src.local(), portion);
    let recv = comm.all_gather_portions(&send)?;

    let dst_meta = dst.meta().clone();
    for q in 0..comm.size() {
        let vc = grid
            .member_vc(axis, q)
            .ok_or_else(|| LaError::Comm("member outside the grid".to_string()))?;
        let block = Block::of_vc(src.meta(), vc);
        if block.is_empty() {
            continue;
        }
        let start = q * portion;
        unpack_block(&recv[start..start + block.len()], &block, &dst_meta, dst.local_mut());
    }
    Ok(())
}

/// Any distribution to `[STAR,STAR]`.
///
/// Distributions owned by a root (CIRC, MD) finish with a broadcast from the
/// root over the cross communicator.
pub(crate) fn all_gather<T: Entry>(src: &DistRef<'_, T>, dst: &mut DistMatrix<T>) -> LaResult<()> {
    gather_over(src, dst, src.meta().dist_axis())?;
    let cross_axis = src.meta().cross_axis();
    if cross_axis == Axis::Own {
        return Ok(());
    }
    if let Some(cross) = src.grid().comm(cross_axis) {
        let full = cross.broadcast(dst.local().clone(), src.meta().root)?;
        *dst.local_mut() = full;
    }
    Ok(())
}

/// `[MC,MR] -> [STAR,MR]` and `[MR,MC] -> [STAR,MC]`.
pub(crate) fn col_all_gather<T: Entry>(src: &DistRef<'_, T>, dst: &mut DistMatrix<T>) -> LaResult<()> {
    gather_over(src, dst, Axis::of_dist(src.pair().col))
}

/// `[MC,MR] -> [MC,STAR]` and `[MR,MC] -> [MR,STAR]`.
pub(crate) fn row_all_gather<T: Entry>(src: &DistRef<'_, T>, dst: &mut DistMatrix<T>) -> LaResult<()> {
    gather_over(src, dst, Axis::of_dist(src.pair().row))
}

/// `[VC,STAR] -> [MC,STAR]` and `[VR,STAR] -> [MR,STAR]`.
pub(crate) fn partial_col_all_gather<T: Entry>(
    src: &DistRef<'_, T>,
    dst: &mut DistMatrix<T>,
) -> LaResult<()> {
    gather_over(src, dst, Axis::of_dist(src.pair().col.partial_union()))
}

/// `[STAR,VC] -> [STAR,MC]` and `[STAR,VR] -> [STAR,MR]`.
pub(crate) fn partial_row_all_gather<T: Entry>(
    src: &DistRef<'_, T>,
    dst: &mut DistMatrix<T>,
) -> LaResult<()> {
    gather_over(src, dst, Axis::of_dist(src.pair().row.partial_union()))
}

/// Any distribution to `[CIRC,CIRC]`: every process sends its block to the root.
pub(crate) fn gather_to_root<T: Entry>(src: &DistRef<'_, T>, dst: &mut DistMatrix<T>) -> LaResult<()> {
    let grid = Arc::clone(src.grid());
    let Some(comm) = grid.comm(Axis::Vc) else {
        return Ok(());
    };
    let send = pack_padded(src.local(), 0);
    let Some(all) = comm.gather(send, dst.root())? else {
        return Ok(());
    };
    let dst_meta = dst.meta().clone();
    for (vc, buf) in all.iter().enumerate() {
        let block = Block::of_vc(src.meta(), vc);
        if block.is_empty() {
            continue;
        }
        unpack_block(buf, &block, &dst_meta, dst.local_mut());
    }
    Ok(())
}
