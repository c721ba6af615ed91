//! Redistribution engine.
//!
//! [`copy`] converts a matrix between any two legal distribution pairs. Each
//! conversion is a shortest path through a graph whose nodes are the pairs and
//! whose edges are direct primitives (gathers, filters, all-to-alls, vector
//! exchanges, scatter/gather through a root), weighted by a rough
//! communication cost. Redistribution never does arithmetic, so results are
//! bit-identical to the source.
//!
//! Processes outside the grid follow the same bookkeeping (shapes, alignments,
//! temporaries) but skip every collective.

pub mod pack;

mod alltoall;
mod exchange;
mod filter;
mod gather;
mod transpose;

pub use transpose::{
    adjoint_axpy_contract, axpy_contract, contract, transpose_axpy_contract, transpose_contract,
    transpose_dist, transpose_partial_filter,
};

use crate::dist::{Dist, DistMatrix, DistPair, DistRef, LEGAL_PAIRS};
use crate::error::{LaError, LaResult};
use crate::scalar::Entry;
use std::fmt;

/// Direct redistribution primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prim {
    AllGather,
    ColAllGather,
    RowAllGather,
    PartialColAllGather,
    PartialRowAllGather,
    Filter,
    ColFilter,
    RowFilter,
    PartialColFilter,
    PartialRowFilter,
    ColAllToAllPromote,
    ColAllToAllDemote,
    RowAllToAllPromote,
    RowAllToAllDemote,
    ColwiseVectorExchange,
    RowwiseVectorExchange,
    Scatter,
    Gather,
}

impl fmt::Display for Prim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Prim {
    fn cost(self) -> usize {
        match self {
            Prim::AllGather => 8,
            Prim::Scatter | Prim::Gather => 6,
            Prim::ColAllGather | Prim::RowAllGather => 5,
            Prim::PartialColAllGather
            | Prim::PartialRowAllGather
            | Prim::ColAllToAllPromote
            | Prim::ColAllToAllDemote
            | Prim::RowAllToAllPromote
            | Prim::RowAllToAllDemote => 4,
            Prim::ColwiseVectorExchange | Prim::RowwiseVectorExchange => 3,
            Prim::Filter
            | Prim::ColFilter
            | Prim::RowFilter
            | Prim::PartialColFilter
            | Prim::PartialRowFilter => 1,
        }
    }

    /// Whether the primitive only works when alignments already agree.
    /// All-to-alls realign internally.
    fn needs_alignment(self) -> bool {
        !matches!(
            self,
            Prim::ColAllToAllPromote
                | Prim::ColAllToAllDemote
                | Prim::RowAllToAllPromote
                | Prim::RowAllToAllDemote
                | Prim::ColwiseVectorExchange
                | Prim::RowwiseVectorExchange
                | Prim::Scatter
                | Prim::Gather
                | Prim::AllGather
        )
    }
}

/// One hop of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: DistPair,
    pub to: DistPair,
    pub prim: Prim,
}

fn pair(col: Dist, row: Dist) -> DistPair {
    DistPair { col, row }
}

/// Every direct primitive between legal pairs.
pub fn edges() -> Vec<Edge> {
    use Dist::*;
    let mut out = Vec::new();
    let mut add = |from: DistPair, to: DistPair, prim: Prim| out.push(Edge { from, to, prim });

    let star_star = pair(Star, Star);
    let circ = pair(Circ, Circ);
    for p in LEGAL_PAIRS {
        if p != star_star {
            add(p, star_star, Prim::AllGather);
            add(star_star, p, Prim::Filter);
        }
        if p != circ {
            add(p, circ, Prim::Gather);
            add(circ, p, Prim::Scatter);
        }
    }
    for (c, r) in [(Mc, Mr), (Mr, Mc)] {
        add(pair(c, r), pair(Star, r), Prim::ColAllGather);
        add(pair(c, r), pair(c, Star), Prim::RowAllGather);
        add(pair(Star, r), pair(c, r), Prim::ColFilter);
        add(pair(c, Star), pair(c, r), Prim::RowFilter);
    }
    for v in [Vc, Vr] {
        add(pair(v, Star), pair(v.partial(), Star), Prim::PartialColAllGather);
        add(pair(Star, v), pair(Star, v.partial()), Prim::PartialRowAllGather);
        add(pair(v.partial(), Star), pair(v, Star), Prim::PartialColFilter);
        add(pair(Star, v.partial()), pair(Star, v), Prim::PartialRowFilter);
    }
    // column vectors refine the grid's column axis, row vectors its row axis
    add(pair(Vc, Star), pair(Mc, Mr), Prim::ColAllToAllPromote);
    add(pair(Vr, Star), pair(Mr, Mc), Prim::ColAllToAllPromote);
    add(pair(Mc, Mr), pair(Vc, Star), Prim::ColAllToAllDemote);
    add(pair(Mr, Mc), pair(Vr, Star), Prim::ColAllToAllDemote);
    add(pair(Star, Vr), pair(Mc, Mr), Prim::RowAllToAllPromote);
    add(pair(Star, Vc), pair(Mr, Mc), Prim::RowAllToAllPromote);
    add(pair(Mc, Mr), pair(Star, Vr), Prim::RowAllToAllDemote);
    add(pair(Mr, Mc), pair(Star, Vc), Prim::RowAllToAllDemote);

    add(pair(Vc, Star), pair(Vr, Star), Prim::ColwiseVectorExchange);
    add(pair(Vr, Star), pair(Vc, Star), Prim::ColwiseVectorExchange);
    add(pair(Star, Vc), pair(Star, Vr), Prim::RowwiseVectorExchange);
    add(pair(Star, Vr), pair(Star, Vc), Prim::RowwiseVectorExchange);
    out
}

/// Cheapest sequence of primitives from `from` to `to`. Empty when equal.
pub fn plan(from: DistPair, to: DistPair) -> LaResult<Vec<Edge>> {
    let n = LEGAL_PAIRS.len();
    let start = from
        .index()
        .ok_or_else(|| LaError::logic(format!("illegal distribution pair {}", from)))?;
    let goal = to
        .index()
        .ok_or_else(|| LaError::logic(format!("illegal distribution pair {}", to)))?;
    let all = edges();

    let mut dist = vec![usize::MAX; n];
    let mut prev: Vec<Option<Edge>> = vec![None; n];
    let mut done = vec![false; n];
    dist[start] = 0;
    loop {
        let next = (0..n)
            .filter(|&v| !done[v] && dist[v] != usize::MAX)
            .min_by_key(|&v| dist[v]);
        let Some(u) = next else { break };
        if u == goal {
            break;
        }
        done[u] = true;
        for e in all.iter().filter(|e| e.from == LEGAL_PAIRS[u]) {
            let Some(v) = e.to.index() else { continue };
            let d = dist[u] + e.prim.cost();
            if d < dist[v] {
                dist[v] = d;
                prev[v] = Some(*e);
            }
        }
    }
    if dist[goal] == usize::MAX {
        return Err(LaError::logic(format!("no redistribution from {} to {}", from, to)));
    }
    let mut route = Vec::new();
    let mut at = goal;
    while at != start {
        let e = prev[at].ok_or_else(|| LaError::logic("broken redistribution route"))?;
        route.push(e);
        at = e.from.index().unwrap_or(start);
    }
    route.reverse();
    Ok(route)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AxisRelation {
    /// Either side has stride one.
    Replicated,
    Same,
    /// VC -> MC, VR -> MR.
    Coarsen,
    /// MC -> VC, MR -> VR.
    Refine,
    Other,
}

fn relation(src: Dist, src_stride: usize, dst: Dist, dst_stride: usize) -> AxisRelation {
    if src_stride == 1 || dst_stride == 1 {
        return AxisRelation::Replicated;
    }
    match (src, dst) {
        _ if src == dst => AxisRelation::Same,
        (Dist::Vc, Dist::Mc) | (Dist::Vr, Dist::Mr) => AxisRelation::Coarsen,
        (Dist::Mc, Dist::Vc) | (Dist::Mr, Dist::Vr) => AxisRelation::Refine,
        _ => AxisRelation::Other,
    }
}

/// Alignment a destination axis takes when it is free.
fn natural_align(src: Dist, src_align: usize, src_stride: usize, dst: Dist, dst_stride: usize) -> usize {
    match relation(src, src_stride, dst, dst_stride) {
        AxisRelation::Replicated => 0,
        AxisRelation::Same | AxisRelation::Refine => src_align,
        AxisRelation::Coarsen | AxisRelation::Other => src_align % dst_stride,
    }
}

fn axis_compatible(
    src: Dist,
    src_align: usize,
    src_stride: usize,
    dst: Dist,
    dst_align: usize,
    dst_stride: usize,
) -> bool {
    match relation(src, src_stride, dst, dst_stride) {
        AxisRelation::Replicated | AxisRelation::Other => true,
        AxisRelation::Same => src_align == dst_align,
        AxisRelation::Coarsen => dst_align == src_align % dst_stride,
        AxisRelation::Refine => dst_align % src_stride == src_align,
    }
}

/// Size `dst` for `src`, choosing its free alignments and root.
fn prepare_dst<T: Entry>(src: &DistRef<'_, T>, dst: &mut DistMatrix<T>) {
    let sm = src.meta();
    let dm = dst.meta();
    let ca = natural_align(
        sm.col_dist(),
        sm.col_align,
        sm.col_stride(),
        dm.col_dist(),
        dm.col_stride(),
    );
    let ra = natural_align(
        sm.row_dist(),
        sm.row_align,
        sm.row_stride(),
        dm.row_dist(),
        dm.row_stride(),
    );
    let has_md = |m: &crate::dist::DistMeta| m.pair.col == Dist::Md || m.pair.row == Dist::Md;
    let same_root_kind =
        (sm.col_dist() == Dist::Circ && dm.col_dist() == Dist::Circ) || (has_md(sm) && has_md(dm));
    if same_root_kind {
        let root = sm.root;
        dst.set_free_root(root);
    }
    dst.prepare(src.height(), src.width(), ca, ra);
}

fn aligned<T: Entry>(src: &DistRef<'_, T>, dst: &DistMatrix<T>) -> bool {
    let sm = src.meta();
    let dm = dst.meta();
    axis_compatible(
        sm.col_dist(),
        sm.col_align,
        sm.col_stride(),
        dm.col_dist(),
        dm.col_align,
        dm.col_stride(),
    ) && axis_compatible(
        sm.row_dist(),
        sm.row_align,
        sm.row_stride(),
        dm.row_dist(),
        dm.row_align,
        dm.row_stride(),
    )
}

fn execute<T: Entry>(prim: Prim, src: &DistRef<'_, T>, dst: &mut DistMatrix<T>) -> LaResult<()> {
    match prim {
        Prim::AllGather => gather::all_gather(src, dst),
        Prim::ColAllGather => gather::col_all_gather(src, dst),
        Prim::RowAllGather => gather::row_all_gather(src, dst),
        Prim::PartialColAllGather => gather::partial_col_all_gather(src, dst),
        Prim::PartialRowAllGather => gather::partial_row_all_gather(src, dst),
        Prim::Filter
        | Prim::ColFilter
        | Prim::RowFilter
        | Prim::PartialColFilter
        | Prim::PartialRowFilter => filter::filter(src, dst),
        Prim::ColAllToAllPromote => alltoall::col_all_to_all_promote(src, dst),
        Prim::ColAllToAllDemote => alltoall::col_all_to_all_demote(src, dst),
        Prim::RowAllToAllPromote => alltoall::row_all_to_all_promote(src, dst),
        Prim::RowAllToAllDemote => alltoall::row_all_to_all_demote(src, dst),
        Prim::ColwiseVectorExchange | Prim::RowwiseVectorExchange => {
            exchange::vector_exchange(src, dst)
        }
        Prim::Scatter => filter::scatter(src, dst),
        Prim::Gather => gather::gather_to_root(src, dst),
    }
}

/// Run one primitive into `dst`, going through an aligned temporary when
/// `dst`'s constrained alignments do not suit the primitive.
fn run_step<T: Entry>(prim: Prim, src: &DistRef<'_, T>, dst: &mut DistMatrix<T>) -> LaResult<()> {
    prepare_dst(src, dst);
    if !prim.needs_alignment() || aligned(src, dst) {
        return execute(prim, src, dst);
    }
    let p = dst.pair();
    let mut tmp = DistMatrix::new(src.grid(), p.col, p.row)?;
    tmp.set_free_root(dst.root());
    prepare_dst(src, &mut tmp);
    execute(prim, src, &mut tmp)?;
    translate(&tmp.as_ref(), dst)
}

/// Same pair, different alignment or root.
pub(crate) fn translate<T: Entry>(src: &DistRef<'_, T>, dst: &mut DistMatrix<T>) -> LaResult<()> {
    use Dist::*;
    let p = src.pair();
    if p != dst.pair() {
        return Err(LaError::logic(format!("cannot translate {} into {}", p, dst.pair())));
    }
    if dst.height() != src.height() || dst.width() != src.width() {
        dst.resize(src.height(), src.width());
    }
    if src.col_align() == dst.col_align()
        && src.row_align() == dst.row_align()
        && src.meta().root == dst.root()
    {
        dst.local_mut().copy_from(src.local());
        return Ok(());
    }
    match (p.col, p.row) {
        (Star, Star) => {
            dst.local_mut().copy_from(src.local());
            Ok(())
        }
        (Circ, Circ) => {
            let Some(comm) = src.grid().comm(crate::dist::Axis::Vc) else {
                return Ok(());
            };
            let (from, to) = (src.meta().root, dst.root());
            let me = comm.rank();
            if me == from {
                comm.send(to, src.local().clone_owned())?;
            }
            if me == to {
                *dst.local_mut() = comm.recv(from)?;
            }
            Ok(())
        }
        (Md, _) | (_, Md) => {
            let mut full = DistMatrix::new(src.grid(), Star, Star)?;
            full.prepare(src.height(), src.width(), 0, 0);
            gather::all_gather(src, &mut full)?;
            filter::filter(&full.as_ref(), dst)
        }
        (Vc | Vr, Star) | (Star, Vc | Vr) => exchange::vector_exchange(src, dst),
        _ => alltoall::exchange_over(src, dst, src.meta().dist_axis()),
    }
}

/// Copy `src` into `dst`, redistributing as needed. Collective over the grid.
///
/// Free alignments (and root) of `dst` are chosen by the redistribution;
/// constrained ones are honoured.
pub fn copy<T: Entry>(src: &DistRef<'_, T>, dst: &mut DistMatrix<T>) -> LaResult<()> {
    src.meta().check_grid(dst.meta())?;
    if src.pair() == dst.pair() {
        dst.set_free_root(src.meta().root);
        dst.prepare(src.height(), src.width(), src.col_align(), src.row_align());
        return translate(src, dst);
    }
    let route = plan(src.pair(), dst.pair())?;
    log::trace!(
        "redistribute {} -> {} via {:?}",
        src.pair(),
        dst.pair(),
        route.iter().map(|e| e.prim).collect::<Vec<_>>()
    );
    let grid = std::sync::Arc::clone(src.grid());
    let mut current: Option<DistMatrix<T>> = None;
    let last = route.len() - 1;
    for (k, edge) in route.iter().enumerate() {
        if k == last {
            let input = current.as_ref().map(|m| m.as_ref()).unwrap_or_else(|| src.clone());
            return run_step(edge.prim, &input, dst);
        }
        let next = {
            let input = current.as_ref().map(|m| m.as_ref()).unwrap_or_else(|| src.clone());
            let mut tmp = DistMatrix::new(&grid, edge.to.col, edge.to.row)?;
            run_step(edge.prim, &input, &mut tmp)?;
            tmp
        };
        current = Some(next);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use Dist::*;

    #[test]
    fn test_every_pair_is_reachable() {
        for from in LEGAL_PAIRS {
            for to in LEGAL_PAIRS {
                let route = plan(from, to).unwrap();
                assert_eq!(route.is_empty(), from == to);
                if let (Some(first), Some(last)) = (route.first(), route.last()) {
                    assert_eq!(first.from, from);
                    assert_eq!(last.to, to);
                }
            }
        }
    }

    #[test]
    fn test_star_mr_to_vr_star_route() {
        let route = plan(pair(Star, Mr), pair(Vr, Star)).unwrap();
        let hops: Vec<DistPair> = route.iter().map(|e| e.to).collect();
        assert_eq!(hops, vec![pair(Mc, Mr), pair(Vc, Star), pair(Vr, Star)]);
    }

    #[test]
    fn test_md_goes_through_star_star() {
        let route = plan(pair(Md, Star), pair(Mc, Mr)).unwrap();
        assert_eq!(route[0].to, pair(Star, Star));
        assert_eq!(route.len(), 2);
    }

    #[test]
    fn test_alignment_rules() {
        assert!(axis_compatible(Vc, 5, 6, Mc, 1, 2));
        assert!(!axis_compatible(Vc, 5, 6, Mc, 0, 2));
        assert!(axis_compatible(Mc, 1, 2, Vc, 3, 6));
        assert_eq!(natural_align(Vc, 5, 6, Mc, 2), 1);
        assert_eq!(natural_align(Star, 0, 1, Mr, 3), 0);
    }
}
