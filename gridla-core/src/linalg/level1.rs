//! Distributed level-1 operations and matrix utilities.
//!
//! Element-wise operations act on the local buffers once both operands share
//! a layout; reductions combine the distinct pieces over the distribution
//! communicator and then spread the result to every viewing process.

use super::dense::{self, Uplo};
use crate::comm::Comm;
use crate::dist::{Dist, DistMatrix, DistMeta, DistRef, Grid};
use crate::error::{LaError, LaResult};
use crate::redist::copy;
use crate::scalar::{Entry, Field, Real};
use nalgebra::DMatrix;
use num_traits::{Float, Zero};
use std::sync::Arc;

/// A value together with its global position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Located<R> {
    pub value: R,
    pub i: usize,
    pub j: usize,
}

/// Combine a per-process partial result over the whole matrix and make it
/// known on every viewing process.
fn spread<T, Op>(meta: &DistMeta, partial: T, op: Op) -> LaResult<T>
where
    T: Clone + Send + 'static,
    Op: Fn(T, T) -> T,
{
    let grid = &meta.grid;
    let mut value = partial;
    if grid.in_grid() {
        if let Some(dist) = meta.dist_comm() {
            value = dist.all_reduce(value, &op)?;
        }
        if let Some(cross) = meta.cross_comm() {
            if cross.size() > 1 {
                value = cross.broadcast(value, meta.root)?;
            }
        }
    }
    let viewing = grid.viewing_comm();
    if grid.size() < viewing.size() {
        value = viewing.broadcast(value, grid.vc_to_viewing(0))?;
    }
    Ok(value)
}

/// Whether this process is the one copy (among redundant ones) that should
/// contribute queued updates.
fn primary(meta: &DistMeta) -> bool {
    meta.participating() && meta.redundant_comm().map_or(false, |c| c.rank() == 0)
}

/// A copy of `x` laid out exactly like `like`.
fn aligned_like<T: Entry>(x: &DistRef<'_, T>, like: &DistMatrix<T>) -> LaResult<DistMatrix<T>> {
    let p = like.pair();
    let mut tmp = DistMatrix::new(x.grid(), p.col, p.row)?;
    tmp.align(like.col_align(), like.row_align())?;
    tmp.set_root(like.root())?;
    copy(x, &mut tmp)?;
    Ok(tmp)
}

fn same_layout<T: Entry>(x: &DistRef<'_, T>, y: &DistMatrix<T>) -> bool {
    x.pair() == y.pair()
        && x.col_align() == y.col_align()
        && x.row_align() == y.row_align()
        && x.meta().root == y.root()
}

fn check_same_shape(h: usize, w: usize, h2: usize, w2: usize) -> LaResult<()> {
    if h != h2 || w != w2 {
        return Err(LaError::DimensionMismatch {
            expected: h * w,
            actual: h2 * w2,
        });
    }
    Ok(())
}

/// `y += alpha x`, realigning `x` first when the layouts differ.
pub fn axpy<F: Field>(alpha: F, x: &DistRef<'_, F>, y: &mut DistMatrix<F>) -> LaResult<()> {
    x.meta().check_grid(y.meta())?;
    check_same_shape(y.height(), y.width(), x.height(), x.width())?;
    if same_layout(x, y) {
        let src = x.local();
        for (d, &s) in y.local_mut().iter_mut().zip(src.iter()) {
            *d += alpha * s;
        }
        return Ok(());
    }
    let tmp = aligned_like(x, y)?;
    dense::axpy(alpha, tmp.local(), y.local_mut())
}

/// `a *= alpha`.
pub fn scale<F: Field>(alpha: F, a: &mut DistMatrix<F>) {
    dense::scale(alpha, a.local_mut());
}

fn inner<F: Field>(x: &DistRef<'_, F>, y: &DistRef<'_, F>, conjugate: bool) -> LaResult<F> {
    x.meta().check_grid(y.meta())?;
    check_same_shape(x.height(), x.width(), y.height(), y.width())?;
    let local_dot = |a: &DMatrix<F>, b: &DMatrix<F>| {
        a.iter()
            .zip(b.iter())
            .fold(F::zero(), |acc, (&u, &v)| acc + u.conj_if(conjugate) * v)
    };
    let partial = if x.pair() == y.pair()
        && x.col_align() == y.col_align()
        && x.row_align() == y.row_align()
        && x.meta().root == y.meta().root
    {
        if x.meta().participating() {
            local_dot(&x.local().clone_owned(), &y.local().clone_owned())
        } else {
            F::zero()
        }
    } else {
        let y_owned = y.to_owned();
        let tmp = aligned_like(x, &y_owned)?;
        if y.meta().participating() {
            local_dot(tmp.local(), &y_owned.local().clone_owned())
        } else {
            F::zero()
        }
    };
    spread(y.meta(), partial, |a, b| a + b)
}

/// `sum conj(x_ij) y_ij`. Collective.
pub fn dot<F: Field>(x: &DistRef<'_, F>, y: &DistRef<'_, F>) -> LaResult<F> {
    inner(x, y, true)
}

/// `sum x_ij y_ij`. Collective.
pub fn dotu<F: Field>(x: &DistRef<'_, F>, y: &DistRef<'_, F>) -> LaResult<F> {
    inner(x, y, false)
}

/// Frobenius norm. Collective.
pub fn nrm2<F: Field>(x: &DistRef<'_, F>) -> LaResult<F::Real> {
    let scale = max_abs(x)?.value;
    if scale.is_zero() {
        return Ok(scale);
    }
    let partial = if x.meta().participating() {
        x.local().iter().fold(F::Real::zero(), |acc, &v| {
            let r = v.modulus() / scale;
            acc + r * r
        })
    } else {
        F::Real::zero()
    };
    let sum = spread(x.meta(), partial, |a, b| a + b)?;
    Ok(scale * sum.sqrt())
}

/// Larger value wins; ties go to the earlier column-major position.
fn pick_max<R: Real>(a: Option<Located<R>>, b: Option<Located<R>>) -> Option<Located<R>> {
    match (a, b) {
        (None, x) | (x, None) => x,
        (Some(a), Some(b)) => {
            if b.value > a.value || (b.value == a.value && (b.j, b.i) < (a.j, a.i)) {
                Some(b)
            } else {
                Some(a)
            }
        }
    }
}

fn located_max<F: Field, R: Real>(
    a: &DistRef<'_, F>,
    keep: impl Fn(usize, usize) -> bool,
    value: impl Fn(F) -> R,
) -> LaResult<Located<R>> {
    let meta = a.meta();
    let mut best: Option<Located<R>> = None;
    if meta.participating() {
        let local = a.local();
        for jl in 0..local.ncols() {
            let j = meta.global_col(jl);
            for il in 0..local.nrows() {
                let i = meta.global_row(il);
                if keep(i, j) {
                    let cand = Located {
                        value: value(local[(il, jl)]),
                        i,
                        j,
                    };
                    best = pick_max(best, Some(cand));
                }
            }
        }
    }
    let best = spread(meta, best, pick_max)?;
    best.ok_or_else(|| LaError::logic("maximum of an empty matrix"))
}

/// Largest entry and its position. Collective.
pub fn max<R: Real>(a: &DistRef<'_, R>) -> LaResult<Located<R>> {
    located_max(a, |_, _| true, |v| v)
}

/// Largest entry of the `uplo` triangle of a symmetric matrix. Collective.
pub fn symmetric_max<R: Real>(uplo: Uplo, a: &DistRef<'_, R>) -> LaResult<Located<R>> {
    located_max(
        a,
        |i, j| match uplo {
            Uplo::Lower => i >= j,
            Uplo::Upper => i <= j,
        },
        |v| v,
    )
}

/// Entry of largest modulus and its position. Collective.
pub fn max_abs<F: Field>(a: &DistRef<'_, F>) -> LaResult<Located<F::Real>> {
    if a.height() == 0 || a.width() == 0 {
        return Ok(Located {
            value: F::Real::zero(),
            i: 0,
            j: 0,
        });
    }
    located_max(a, |_, _| true, |v: F| v.modulus())
}

/// Replace the local data of every member of `comm` with that of `root`.
/// Collective over `comm`.
pub fn broadcast<T: Entry>(a: &mut DistMatrix<T>, comm: &Comm, root: usize) -> LaResult<()> {
    let shape = comm.broadcast((a.height(), a.width()), root)?;
    let data = comm.broadcast(a.local().clone(), root)?;
    if comm.rank() != root {
        a.resize(shape.0, shape.1);
        if data.shape() != a.local().shape() {
            return Err(LaError::logic("broadcast between differently laid out matrices"));
        }
        *a.local_mut() = data;
    }
    Ok(())
}

/// Set every diagonal entry to `value`. Not collective.
pub fn fill_diagonal<T: Entry>(a: &mut DistMatrix<T>, value: T) -> LaResult<()> {
    for k in 0..a.height().min(a.width()) {
        a.set(k, k, value)?;
    }
    Ok(())
}

/// Queue every locally stored entry of `src` through `map` into `dst` (from one
/// copy only) and deliver the updates. Collective over the viewing comm.
fn queue_mapped<T: Entry>(
    src: &DistRef<'_, T>,
    dst: &mut DistMatrix<T>,
    map: impl Fn(usize, usize) -> Option<(usize, usize)>,
) -> LaResult<()> {
    let meta = src.meta();
    if primary(meta) {
        let local = src.local();
        dst.reserve(local.len());
        for jl in 0..local.ncols() {
            let j = meta.global_col(jl);
            for il in 0..local.nrows() {
                if let Some((i2, j2)) = map(meta.global_row(il), j) {
                    dst.queue_update(i2, j2, local[(il, jl)])?;
                }
            }
        }
    }
    dst.process_queues()
}

/// `A(rows, cols)` for arbitrary index lists, in `A`'s distribution. Collective.
pub fn get_submatrix<T: Entry>(a: &DistRef<'_, T>, rows: &[usize], cols: &[usize]) -> LaResult<DistMatrix<T>> {
    let mut row_pos: Vec<Vec<usize>> = vec![Vec::new(); a.height()];
    for (k, &i) in rows.iter().enumerate() {
        let slot = row_pos
            .get_mut(i)
            .ok_or_else(|| LaError::logic(format!("row {} out of range", i)))?;
        slot.push(k);
    }
    let mut col_pos: Vec<Vec<usize>> = vec![Vec::new(); a.width()];
    for (k, &j) in cols.iter().enumerate() {
        let slot = col_pos
            .get_mut(j)
            .ok_or_else(|| LaError::logic(format!("column {} out of range", j)))?;
        slot.push(k);
    }
    let p = a.pair();
    let mut sub = DistMatrix::zeros(a.grid(), p.col, p.row, rows.len(), cols.len())?;
    let meta = a.meta();
    if primary(meta) {
        let local = a.local();
        for jl in 0..local.ncols() {
            let j = meta.global_col(jl);
            for il in 0..local.nrows() {
                let i = meta.global_row(il);
                for &r in &row_pos[i] {
                    for &c in &col_pos[j] {
                        sub.queue_update(r, c, local[(il, jl)])?;
                    }
                }
            }
        }
    }
    sub.process_queues()?;
    Ok(sub)
}

/// `[A, B]` in `[MC,MR]`. Collective.
pub fn hcat<T: Entry>(a: &DistRef<'_, T>, b: &DistRef<'_, T>) -> LaResult<DistMatrix<T>> {
    a.meta().check_grid(b.meta())?;
    if a.height() != b.height() {
        return Err(LaError::DimensionMismatch {
            expected: a.height(),
            actual: b.height(),
        });
    }
    let off = a.width();
    let mut c = DistMatrix::zeros(a.grid(), Dist::Mc, Dist::Mr, a.height(), off + b.width())?;
    queue_mapped(a, &mut c, |i, j| Some((i, j)))?;
    queue_mapped(b, &mut c, |i, j| Some((i, j + off)))?;
    Ok(c)
}

/// `[A; B]` in `[MC,MR]`. Collective.
pub fn vcat<T: Entry>(a: &DistRef<'_, T>, b: &DistRef<'_, T>) -> LaResult<DistMatrix<T>> {
    a.meta().check_grid(b.meta())?;
    if a.width() != b.width() {
        return Err(LaError::DimensionMismatch {
            expected: a.width(),
            actual: b.width(),
        });
    }
    let off = a.height();
    let mut c = DistMatrix::zeros(a.grid(), Dist::Mc, Dist::Mr, off + b.height(), a.width())?;
    queue_mapped(a, &mut c, |i, j| Some((i, j)))?;
    queue_mapped(b, &mut c, |i, j| Some((i + off, j)))?;
    Ok(c)
}

/// Reinterpret the column-major entries of `A` as `height x width`, keeping
/// `A`'s distribution. Collective.
pub fn reshape<T: Entry>(height: usize, width: usize, a: &DistRef<'_, T>) -> LaResult<DistMatrix<T>> {
    let m = a.height();
    if height * width != m * a.width() {
        return Err(LaError::DimensionMismatch {
            expected: m * a.width(),
            actual: height * width,
        });
    }
    let p = a.pair();
    let mut b = DistMatrix::zeros(a.grid(), p.col, p.row, height, width)?;
    queue_mapped(a, &mut b, |i, j| {
        let k = i + j * m;
        Some((k % height, k / height))
    })?;
    Ok(b)
}

/// Tridiagonal `[MC,MR]` matrix with 2 on the diagonal and 1 beside it.
pub fn one_two_one<F: Field>(grid: &Arc<Grid>, n: usize) -> LaResult<DistMatrix<F>> {
    let mut a = DistMatrix::zeros(grid, Dist::Mc, Dist::Mr, n, n)?;
    if a.participating() {
        let two = F::one() + F::one();
        let meta = a.meta().clone();
        let local = a.local_mut();
        for jl in 0..local.ncols() {
            let j = meta.global_col(jl);
            for il in 0..local.nrows() {
                let i = meta.global_row(il);
                local[(il, jl)] = if i == j {
                    two
                } else if i + 1 == j || j + 1 == i {
                    F::one()
                } else {
                    F::zero()
                };
            }
        }
    }
    Ok(a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::spmd;
    use crate::dist::GridOrder;

    fn global(n: usize, m: usize) -> DMatrix<f64> {
        DMatrix::from_fn(n, m, |i, j| (i * m + j) as f64 - 3.0)
    }

    #[test]
    fn test_reductions_match_local() {
        let g = global(5, 4);
        let results = spmd(4, |comm| {
            let grid = Arc::new(Grid::new(&comm, GridOrder::ColumnMajor)?);
            let a = DistMatrix::from_global(&grid, Dist::Mc, Dist::Mr, &g)?;
            let b = DistMatrix::from_global(&grid, Dist::Vc, Dist::Star, &g)?;
            let d = dot(&a.as_ref(), &b.as_ref())?;
            let n = nrm2(&a.as_ref())?;
            let mx = max(&a.as_ref())?;
            let ma = max_abs(&a.as_ref())?;
            Ok((d, n, mx, ma))
        });
        let want_dot: f64 = g.iter().map(|v| v * v).sum();
        for r in results {
            let (d, n, mx, ma) = r.unwrap();
            assert!((d - want_dot).abs() < 1e-9);
            assert!((n - want_dot.sqrt()).abs() < 1e-9);
            assert_eq!((mx.value, mx.i, mx.j), (16.0, 4, 3));
            assert_eq!(ma.value, 16.0);
        }
    }

    #[test]
    fn test_axpy_realigns() {
        let g = global(6, 3);
        let results = spmd(4, |comm| {
            let grid = Arc::new(Grid::new(&comm, GridOrder::ColumnMajor)?);
            let x = DistMatrix::from_global(&grid, Dist::Star, Dist::Vr, &g)?;
            let mut y = DistMatrix::from_global_aligned(&grid, Dist::Mc, Dist::Mr, 1, 1, 0, &g)?;
            axpy(2.0, &x.as_ref(), &mut y)?;
            y.to_global()
        });
        for r in results {
            assert_eq!(r.unwrap(), &g * 3.0);
        }
    }

    #[test]
    fn test_concat_reshape_submatrix() {
        let g = global(4, 3);
        let results = spmd(4, |comm| {
            let grid = Arc::new(Grid::new(&comm, GridOrder::ColumnMajor)?);
            let a = DistMatrix::from_global(&grid, Dist::Mc, Dist::Mr, &g)?;
            let s = DistMatrix::from_global(&grid, Dist::Star, Dist::Star, &g)?;
            let h = hcat(&a.as_ref(), &s.as_ref())?.to_global()?;
            let v = vcat(&a.as_ref(), &a.as_ref())?.to_global()?;
            let r = reshape(2, 6, &a.as_ref())?.to_global()?;
            let sub = get_submatrix(&s.as_ref(), &[3, 0], &[2, 2])?.to_global()?;
            let t: DistMatrix<f64> = one_two_one(&grid, 4)?;
            Ok((h, v, r, sub, t.to_global()?))
        });
        for res in results {
            let (h, v, r, sub, t) = res.unwrap();
            assert_eq!(h, dense::hcat(&g, &g).unwrap());
            assert_eq!(v, dense::vcat(&g, &g).unwrap());
            assert_eq!(r, dense::reshape(2, 6, &g).unwrap());
            assert_eq!(sub, DMatrix::from_row_slice(2, 2, &[g[(3, 2)], g[(3, 2)], g[(0, 2)], g[(0, 2)]]));
            assert_eq!(t, dense::one_two_one(4));
        }
    }
}
