//! Distributed matrix-matrix multiply (SUMMA).
//!
//! `C[MC,MR] = alpha op(A) op(B) + beta C`, proceeding over panels of the inner
//! dimension of width [`Config::blocksize`]: each step redistributes a column
//! panel of `op(A)` to `[MC,STAR]` and a row panel of `op(B)` to `[STAR,MR]`,
//! aligned with `C`, and accumulates their local product.

use super::dense::{self, Orientation};
use crate::dist::{Dist, DistMatrix, DistRef};
use crate::error::{LaError, LaResult};
use crate::redist::{copy, transpose_dist};
use crate::scalar::Field;
use crate::settings::Config;

fn op_shape<F: Field>(a: &DistRef<'_, F>, orient: Orientation) -> (usize, usize) {
    match orient {
        Orientation::Normal => (a.height(), a.width()),
        _ => (a.width(), a.height()),
    }
}

/// Columns `k0..k1` of `op(a)` as `[MC,STAR]`, aligned with `c`'s rows.
fn col_panel<F: Field>(
    a: &DistRef<'_, F>,
    orient: Orientation,
    k0: usize,
    k1: usize,
    col_align: usize,
) -> LaResult<DistMatrix<F>> {
    let mut panel = DistMatrix::new(a.grid(), Dist::Mc, Dist::Star)?;
    panel.align_cols(col_align)?;
    match orient {
        Orientation::Normal => copy(&a.view(0..a.height(), k0..k1)?, &mut panel)?,
        o => transpose_dist(
            &a.view(k0..k1, 0..a.width())?,
            &mut panel,
            o == Orientation::Adjoint,
        )?,
    }
    Ok(panel)
}

/// Rows `k0..k1` of `op(b)` as `[STAR,MR]`, aligned with `c`'s columns.
fn row_panel<F: Field>(
    b: &DistRef<'_, F>,
    orient: Orientation,
    k0: usize,
    k1: usize,
    row_align: usize,
) -> LaResult<DistMatrix<F>> {
    let mut panel = DistMatrix::new(b.grid(), Dist::Star, Dist::Mr)?;
    panel.align_rows(row_align)?;
    match orient {
        Orientation::Normal => copy(&b.view(k0..k1, 0..b.width())?, &mut panel)?,
        o => transpose_dist(
            &b.view(0..b.height(), k0..k1)?,
            &mut panel,
            o == Orientation::Adjoint,
        )?,
    }
    Ok(panel)
}

/// `c = alpha op(a) op(b) + beta c` with `c` in `[MC,MR]`. Collective.
#[allow(clippy::too_many_arguments)]
pub fn gemm<F: Field>(
    orient_a: Orientation,
    orient_b: Orientation,
    alpha: F,
    a: &DistRef<'_, F>,
    b: &DistRef<'_, F>,
    beta: F,
    c: &mut DistMatrix<F>,
    config: &Config,
) -> LaResult<()> {
    if c.pair().col != Dist::Mc || c.pair().row != Dist::Mr {
        return Err(LaError::logic(format!("gemm output must be [MC,MR], got {}", c.pair())));
    }
    a.meta().check_grid(c.meta())?;
    b.meta().check_grid(c.meta())?;
    let (m, k) = op_shape(a, orient_a);
    let (kb, n) = op_shape(b, orient_b);
    if k != kb {
        return Err(LaError::DimensionMismatch { expected: k, actual: kb });
    }
    if c.height() != m || c.width() != n {
        return Err(LaError::DimensionMismatch {
            expected: m * n,
            actual: c.height() * c.width(),
        });
    }
    let nb = config.blocksize.max(1);
    dense::scale(beta, c.local_mut());
    log::trace!("summa {}x{}x{} with panels of {}", m, n, k, nb);

    let mut k0 = 0;
    while k0 < k {
        let k1 = (k0 + nb).min(k);
        let a1 = col_panel(a, orient_a, k0, k1, c.col_align())?;
        let b1 = row_panel(b, orient_b, k0, k1, c.row_align())?;
        if c.participating() {
            dense::gemm(
                Orientation::Normal,
                Orientation::Normal,
                alpha,
                a1.local(),
                b1.local(),
                F::one(),
                c.local_mut(),
            )?;
        }
        k0 = k1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::spmd;
    use crate::dist::{Grid, GridOrder};
    use nalgebra::DMatrix;
    use std::sync::Arc;

    #[test]
    fn test_summa_matches_local_product() {
        let a = DMatrix::from_fn(5, 7, |i, j| (i + 2 * j) as f64 - 4.0);
        let b = DMatrix::from_fn(7, 3, |i, j| (3 * i + j) as f64 * 0.5);
        let cfg = Config::with_blocksize(3);
        let results = spmd(6, |comm| {
            let grid = Arc::new(Grid::new(&comm, GridOrder::ColumnMajor)?);
            let da = DistMatrix::from_global(&grid, Dist::Mc, Dist::Mr, &a)?;
            let db = DistMatrix::from_global(&grid, Dist::Vc, Dist::Star, &b)?;
            let mut dc = DistMatrix::zeros(&grid, Dist::Mc, Dist::Mr, 5, 3)?;
            gemm(Orientation::Normal, Orientation::Normal, 1.0, &da.as_ref(), &db.as_ref(), 0.0, &mut dc, &cfg)?;
            let at = DistMatrix::from_global(&grid, Dist::Star, Dist::Mr, &a.transpose())?;
            let mut dt = DistMatrix::zeros(&grid, Dist::Mc, Dist::Mr, 5, 3)?;
            gemm(Orientation::Transpose, Orientation::Normal, 1.0, &at.as_ref(), &db.as_ref(), 0.0, &mut dt, &cfg)?;
            Ok((dc.to_global()?, dt.to_global()?))
        });
        let want = &a * &b;
        for r in results {
            let (c, t) = r.unwrap();
            assert_eq!(c, want);
            assert_eq!(t, want);
        }
    }
}
