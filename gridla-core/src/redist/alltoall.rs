//! All-to-all exchanges: promotions, demotions and general realignment.

use super::exchange::vector_exchange;
use super::pack::{pack_selected, select_for, unpack_block, Block};
use crate::dist::{Axis, Dist, DistMatrix, DistRef};
use crate::error::{LaError, LaResult};
use crate::scalar::Entry;
use std::sync::Arc;

/// Every member of `axis` sends each other member the part of its local block
/// that the other stores in `dst`.
///
/// Both sides derive the selected rows and columns from the layouts, so only
/// values travel. The members of `axis` must jointly hold every entry `dst`
/// needs on them, and no entry twice.
pub(crate) fn exchange_over<T: Entry>(
    src: &DistRef<'_, T>,
    dst: &mut DistMatrix<T>,
    axis: Axis,
) -> LaResult<()> {
    let grid = Arc::clone(src.grid());
    let (Some(comm), Some(me)) = (grid.comm(axis), grid.vc_rank()) else {
        return Ok(());
    };
    let sm = src.meta().clone();
    let dm = dst.meta().clone();
    let member_vc = |q: usize| {
        grid.member_vc(axis, q)
            .ok_or_else(|| LaError::Comm("member outside the grid".to_string()))
    };

    let mine = Block::of_vc(&sm, me);
    let mut parts = Vec::with_capacity(comm.size());
    for q in 0..comm.size() {
        let (rows, cols) = select_for(&mine, &dm, member_vc(q)?);
        parts.push(pack_selected(src.local(), &rows, &cols));
    }
    let recv = comm.all_to_all(parts)?;

    for (q, buf) in recv.iter().enumerate() {
        if buf.is_empty() {
            continue;
        }
        let theirs = Block::of_vc(&sm, member_vc(q)?);
        let (rows, cols) = select_for(&theirs, &dm, me);
        let sub = Block {
            rows: rows.iter().map(|&ib| theirs.rows[ib]).collect(),
            cols: cols.iter().map(|&jb| theirs.cols[jb]).collect(),
        };
        if sub.len() != buf.len() {
            return Err(LaError::DimensionMismatch {
                expected: sub.len(),
                actual: buf.len(),
            });
        }
        unpack_block(buf, &sub, &dm, dst.local_mut());
    }
    Ok(())
}

/// Shift a vector layout so that its alignment reduces to `target` modulo the
/// partial stride.
fn realigned_vector<T: Entry>(
    src: &DistRef<'_, T>,
    by_rows: bool,
    partial_stride: usize,
    target: usize,
) -> LaResult<DistMatrix<T>> {
    let pair = src.pair();
    let align = if by_rows { src.col_align() } else { src.row_align() };
    let diff = (target + partial_stride - align % partial_stride) % partial_stride;
    let p = src.grid().size();
    let mut tmp = DistMatrix::new(src.grid(), pair.col, pair.row)?;
    if by_rows {
        tmp.align_cols((align + diff) % p)?;
    } else {
        tmp.align_rows((align + diff) % p)?;
    }
    tmp.resize(src.height(), src.width());
    vector_exchange(src, &mut tmp)?;
    Ok(tmp)
}

/// `[VC,STAR] -> [MC,MR]` and `[VR,STAR] -> [MR,MC]`.
///
/// The source's column alignment must reduce to the destination's modulo the
/// partial stride; otherwise the source is first shifted with a send-recv.
pub(crate) fn col_all_to_all_promote<T: Entry>(
    src: &DistRef<'_, T>,
    dst: &mut DistMatrix<T>,
) -> LaResult<()> {
    let partial = src.meta().stride_of(src.pair().col.partial());
    let axis = Axis::of_dist(src.pair().col.partial_union());
    if src.col_align() % partial != dst.col_align() {
        log::warn!("Unaligned PartialColAllToAllPromote");
        let tmp = realigned_vector(src, true, partial, dst.col_align())?;
        return exchange_over(&tmp.as_ref(), dst, axis);
    }
    exchange_over(src, dst, axis)
}

/// `[STAR,VR] -> [MC,MR]` and `[STAR,VC] -> [MR,MC]`.
pub(crate) fn row_all_to_all_promote<T: Entry>(
    src: &DistRef<'_, T>,
    dst: &mut DistMatrix<T>,
) -> LaResult<()> {
    let partial = src.meta().stride_of(src.pair().row.partial());
    let axis = Axis::of_dist(src.pair().row.partial_union());
    if src.row_align() % partial != dst.row_align() {
        log::warn!("Unaligned PartialRowAllToAllPromote");
        let tmp = realigned_vector(src, false, partial, dst.row_align())?;
        return exchange_over(&tmp.as_ref(), dst, axis);
    }
    exchange_over(src, dst, axis)
}

/// `[MC,MR] -> [VC,STAR]` and `[MR,MC] -> [VR,STAR]`.
pub(crate) fn col_all_to_all_demote<T: Entry>(
    src: &DistRef<'_, T>,
    dst: &mut DistMatrix<T>,
) -> LaResult<()> {
    let partial = dst.meta().stride_of(dst.pair().col.partial());
    let axis = Axis::of_dist(dst.pair().col.partial_union());
    if dst.col_align() % partial != src.col_align() {
        log::warn!("Unaligned PartialColAllToAllDemote");
        let mut tmp = DistMatrix::new(src.grid(), dst.pair().col, Dist::Star)?;
        tmp.align_cols(src.col_align())?;
        tmp.resize(src.height(), src.width());
        exchange_over(src, &mut tmp, axis)?;
        return vector_exchange(&tmp.as_ref(), dst);
    }
    exchange_over(src, dst, axis)
}

/// `[MC,MR] -> [STAR,VR]` and `[MR,MC] -> [STAR,VC]`.
pub(crate) fn row_all_to_all_demote<T: Entry>(
    src: &DistRef<'_, T>,
    dst: &mut DistMatrix<T>,
) -> LaResult<()> {
    let partial = dst.meta().stride_of(dst.pair().row.partial());
    let axis = Axis::of_dist(dst.pair().row.partial_union());
    if dst.row_align() % partial != src.row_align() {
        log::warn!("Unaligned PartialRowAllToAllDemote");
        let mut tmp = DistMatrix::new(src.grid(), Dist::Star, dst.pair().row)?;
        tmp.align_rows(src.row_align())?;
        tmp.resize(src.height(), src.width());
        exchange_over(src, &mut tmp, axis)?;
        return vector_exchange(&tmp.as_ref(), dst);
    }
    exchange_over(src, dst, axis)
}
