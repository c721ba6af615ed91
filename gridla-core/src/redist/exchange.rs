//! Point-to-point exchanges between vector distributions.
//!
//! For `[VC,STAR]`, `[VR,STAR]` and their transposes every process's rows map
//! to exactly one process of the target layout, so one send-recv per process
//! suffices both for switching between VC and VR and for realigning.

use super::pack::{pack_padded, unpack_block, Block};
use crate::dist::{Axis, Dist, DistMatrix, DistRef};
use crate::error::{LaError, LaResult};
use crate::scalar::Entry;
use std::sync::Arc;

/// The vector distribution and alignment of the distributed axis of a vector
/// layout.
fn vector_axis(col: Dist, row: Dist) -> LaResult<(Dist, bool)> {
    match (col, row) {
        (Dist::Vc | Dist::Vr, Dist::Star) => Ok((col, true)),
        (Dist::Star, Dist::Vc | Dist::Vr) => Ok((row, false)),
        _ => Err(LaError::logic(format!(
            "[{},{}] is not a vector distribution",
            col, row
        ))),
    }
}

fn vc_of(grid: &crate::dist::Grid, dist: Dist, rank: usize) -> usize {
    match dist {
        Dist::Vr => grid.vr_to_vc(rank),
        _ => rank,
    }
}

/// Move between `[VC,STAR]`/`[VR,STAR]` (or the transposed pair) with any
/// alignments: ColwiseVectorExchange, RowwiseVectorExchange and vector
/// realignment.
pub(crate) fn vector_exchange<T: Entry>(src: &DistRef<'_, T>, dst: &mut DistMatrix<T>) -> LaResult<()> {
    let grid = Arc::clone(src.grid());
    let (src_dist, by_rows) = vector_axis(src.pair().col, src.pair().row)?;
    let (dst_dist, dst_by_rows) = vector_axis(dst.pair().col, dst.pair().row)?;
    if by_rows != dst_by_rows {
        return Err(LaError::logic("vector exchange cannot transpose"));
    }
    let (Some(comm), Some(me)) = (grid.comm(Axis::Vc), grid.vc_rank()) else {
        return Ok(());
    };
    let p = grid.size();
    let (src_align, dst_align) = if by_rows {
        (src.col_align(), dst.col_align())
    } else {
        (src.row_align(), dst.row_align())
    };
    let sm = src.meta().clone();
    let dm = dst.meta().clone();

    // index g lives on src rank (g + a) and dst rank (g + a')
    let my_src_rank = sm.rank_of_vc(src_dist, me);
    let target = vc_of(&grid, dst_dist, (my_src_rank + p - src_align + dst_align) % p);
    let my_dst_rank = dm.rank_of_vc(dst_dist, me);
    let source = vc_of(&grid, src_dist, (my_dst_rank + p - dst_align + src_align) % p);

    let send = pack_padded(src.local(), 0);
    let recv: Vec<T> = comm.send_recv(send, target, source)?;
    let block = Block::of_vc(&sm, source);
    if recv.len() != block.len() {
        return Err(LaError::DimensionMismatch {
            expected: block.len(),
            actual: recv.len(),
        });
    }
    unpack_block(&recv, &block, &dm, dst.local_mut());
    Ok(())
}
