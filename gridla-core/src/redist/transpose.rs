//! Transposed redistributions and contractions (sums of partial results).

use super::pack::{unpack_block, Block};
use super::{aligned, copy, prepare_dst, translate};
use crate::dist::{Axis, Dist, DistMatrix, DistRef};
use crate::error::{LaError, LaResult};
use crate::scalar::{Entry, Field};
use std::sync::Arc;

/// Transpose (or conjugate-transpose) each process's local block into the
/// transposed pair. No communication.
fn local_transpose<F: Field>(src: &DistRef<'_, F>, conjugate: bool) -> LaResult<DistMatrix<F>> {
    let p = src.pair().transposed();
    let mut out = DistMatrix::new(src.grid(), p.col, p.row)?;
    out.set_free_root(src.meta().root);
    out.prepare(src.width(), src.height(), src.row_align(), src.col_align());
    if out.participating() {
        *out.local_mut() = src.local().transpose().map(|x| x.conj_if(conjugate));
    }
    Ok(out)
}

/// `dst = src^T` (or `src^H`), for any source and destination pairs.
///
/// The source is redistributed into the transpose of `dst`'s pair, honouring
/// `dst`'s constraints, and then transposed locally.
pub fn transpose_dist<F: Field>(
    src: &DistRef<'_, F>,
    dst: &mut DistMatrix<F>,
    conjugate: bool,
) -> LaResult<()> {
    src.meta().check_grid(dst.meta())?;
    let p = dst.pair().transposed();
    let mut tmp = DistMatrix::new(src.grid(), p.col, p.row)?;
    if dst.row_constrained() {
        tmp.align_cols(dst.row_align())?;
    }
    if dst.col_constrained() {
        tmp.align_rows(dst.col_align())?;
    }
    if dst.root_constrained() {
        tmp.set_root(dst.root())?;
    }
    copy(src, &mut tmp)?;
    dst.set_free_root(tmp.root());
    dst.prepare(tmp.width(), tmp.height(), tmp.row_align(), tmp.col_align());
    if !dst.participating() {
        return Ok(());
    }
    *dst.local_mut() = tmp.local().transpose().map(|x| x.conj_if(conjugate));
    Ok(())
}

/// Transpose where the destination keeps a subset of the source's transposed
/// entries, e.g. `[STAR,MC] -> [MC,MR]` after a transpose.
pub fn transpose_partial_filter<F: Field>(
    src: &DistRef<'_, F>,
    dst: &mut DistMatrix<F>,
    conjugate: bool,
) -> LaResult<()> {
    let local = local_transpose(src, conjugate)?;
    copy(&local.as_ref(), dst)
}

/// Axis over which partial results are summed when contracting `src` into a
/// matrix with `dst`'s pair.
fn contraction_axis(src: &DistRef<'_, impl Entry>, dst: &DistMatrix<impl Entry>) -> LaResult<Axis> {
    let (s, d) = (src.pair(), dst.pair());
    if d.col == Dist::Circ || s.col == Dist::Circ {
        return Err(LaError::logic("cannot contract through a root distribution"));
    }
    if s.is_replicated() {
        return Ok(dst.meta().dist_axis());
    }
    if s.col == d.col && s.row == Dist::Star && d.row != Dist::Star {
        return Ok(Axis::of_dist(d.row));
    }
    if s.row == d.row && s.col == Dist::Star && d.col != Dist::Star {
        return Ok(Axis::of_dist(d.col));
    }
    Err(LaError::logic(format!("cannot contract {} into {}", s, d)))
}

fn reduce_scatter_into<T: Entry>(src: &DistRef<'_, T>, dst: &mut DistMatrix<T>, axis: Axis) -> LaResult<()> {
    let grid = Arc::clone(src.grid());
    let (Some(comm), Some(me)) = (grid.comm(axis), grid.vc_rank()) else {
        return Ok(());
    };
    let sm = src.meta().clone();
    let dm = dst.meta().clone();
    let mut parts = Vec::with_capacity(comm.size());
    for q in 0..comm.size() {
        let vc = grid
            .member_vc(axis, q)
            .ok_or_else(|| LaError::Comm("member outside the grid".to_string()))?;
        let block = Block::of_vc(&dm, vc);
        let mut part = Vec::with_capacity(block.len());
        for &j in &block.cols {
            for &i in &block.rows {
                let value = sm
                    .local_index(i, j)
                    .map(|(il, jl)| src.local()[(il, jl)])
                    .unwrap_or_else(T::zero);
                part.push(value);
            }
        }
        parts.push(part);
    }
    let summed = comm.reduce_scatter_sum(parts)?;
    let mine = Block::of_vc(&dm, me);
    if summed.len() != mine.len() {
        return Err(LaError::DimensionMismatch {
            expected: mine.len(),
            actual: summed.len(),
        });
    }
    unpack_block(&summed, &mine, &dm, dst.local_mut());
    Ok(())
}

/// `dst = sum of the partial copies of src`: `[U,STAR] -> [U,V]`,
/// `[STAR,V] -> [U,V]` and `[STAR,STAR] -> anything`.
pub fn contract<T: Entry>(src: &DistRef<'_, T>, dst: &mut DistMatrix<T>) -> LaResult<()> {
    src.meta().check_grid(dst.meta())?;
    let axis = contraction_axis(src, dst)?;
    prepare_dst(src, dst);
    if aligned(src, dst) {
        return reduce_scatter_into(src, dst, axis);
    }
    let p = dst.pair();
    let mut tmp = DistMatrix::new(src.grid(), p.col, p.row)?;
    tmp.set_free_root(dst.root());
    prepare_dst(src, &mut tmp);
    reduce_scatter_into(src, &mut tmp, axis)?;
    translate(&tmp.as_ref(), dst)
}

/// `dst += alpha * contract(src)`.
pub fn axpy_contract<F: Field>(alpha: F, src: &DistRef<'_, F>, dst: &mut DistMatrix<F>) -> LaResult<()> {
    if src.height() != dst.height() || src.width() != dst.width() {
        return Err(LaError::DimensionMismatch {
            expected: dst.height() * dst.width(),
            actual: src.height() * src.width(),
        });
    }
    let p = dst.pair();
    let mut tmp = DistMatrix::new(src.grid(), p.col, p.row)?;
    tmp.align(dst.col_align(), dst.row_align())?;
    tmp.set_root(dst.root())?;
    contract(src, &mut tmp)?;
    if dst.participating() {
        let out = dst.local_mut();
        for (d, &s) in out.iter_mut().zip(tmp.local().iter()) {
            *d += alpha * s;
        }
    }
    Ok(())
}

/// `dst = contract(src^T)` (or `src^H`).
pub fn transpose_contract<F: Field>(
    src: &DistRef<'_, F>,
    dst: &mut DistMatrix<F>,
    conjugate: bool,
) -> LaResult<()> {
    let local = local_transpose(src, conjugate)?;
    contract(&local.as_ref(), dst)
}

/// `dst += alpha * contract(src^T)` (or `src^H`).
pub fn transpose_axpy_contract<F: Field>(
    alpha: F,
    src: &DistRef<'_, F>,
    dst: &mut DistMatrix<F>,
    conjugate: bool,
) -> LaResult<()> {
    let local = local_transpose(src, conjugate)?;
    axpy_contract(alpha, &local.as_ref(), dst)
}

/// `dst += alpha * contract(src^H)`.
pub fn adjoint_axpy_contract<F: Field>(
    alpha: F,
    src: &DistRef<'_, F>,
    dst: &mut DistMatrix<F>,
) -> LaResult<()> {
    transpose_axpy_contract(alpha, src, dst, true)
}
