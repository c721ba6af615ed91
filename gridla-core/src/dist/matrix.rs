//! Distributed matrices and views.
//!
//! Row `i` of a matrix distributed over an axis of stride `s` with alignment
//! `a` lives on the process of that axis with rank `(i + a) mod s`, so a
//! process of rank `r` holds rows `shift, shift + s, ...` where
//! `shift = (r - a) mod s`. Columns follow the same rule with the row
//! distribution.

use super::grid::{Axis, Grid};
use super::{Dist, DistPair};
use crate::comm::Comm;
use crate::error::{LaError, LaResult};
use crate::scalar::Entry;
use nalgebra::{DMatrix, DMatrixView, DMatrixViewMut};
use std::ops::Range;
use std::sync::Arc;

/// First index owned by rank `rank` of an axis with the given alignment.
#[inline]
pub fn shift(rank: usize, align: usize, stride: usize) -> usize {
    (rank + stride - align % stride) % stride
}

/// Number of indices `shift, shift + stride, ...` below `n`.
#[inline]
pub fn length(n: usize, shift: usize, stride: usize) -> usize {
    if n > shift {
        (n - shift).div_ceil(stride)
    } else {
        0
    }
}

/// Largest local length over all ranks of an axis.
#[inline]
pub fn max_length(n: usize, stride: usize) -> usize {
    n.div_ceil(stride)
}

/// Global layout of a distributed matrix, independent of its storage.
#[derive(Debug, Clone)]
pub struct DistMeta {
    pub grid: Arc<Grid>,
    pub pair: DistPair,
    pub height: usize,
    pub width: usize,
    pub col_align: usize,
    pub row_align: usize,
    /// Owning process for CIRC, owning diagonal for MD.
    pub root: usize,
}

impl DistMeta {
    pub fn new(grid: &Arc<Grid>, pair: DistPair) -> Self {
        Self {
            grid: Arc::clone(grid),
            pair,
            height: 0,
            width: 0,
            col_align: 0,
            row_align: 0,
            root: 0,
        }
    }

    #[inline]
    pub fn col_dist(&self) -> Dist {
        self.pair.col
    }

    #[inline]
    pub fn row_dist(&self) -> Dist {
        self.pair.row
    }

    /// Number of processes an axis distributed by `dist` is spread over.
    pub fn stride_of(&self, dist: Dist) -> usize {
        match dist {
            Dist::Mc => self.grid.height(),
            Dist::Mr => self.grid.width(),
            Dist::Vc | Dist::Vr => self.grid.size(),
            Dist::Star | Dist::Circ => 1,
            Dist::Md => self.grid.lcm(),
        }
    }

    #[inline]
    pub fn col_stride(&self) -> usize {
        self.stride_of(self.pair.col)
    }

    #[inline]
    pub fn row_stride(&self) -> usize {
        self.stride_of(self.pair.row)
    }

    /// Rank along `dist` of the process with VC rank `vc`.
    pub fn rank_of_vc(&self, dist: Dist, vc: usize) -> usize {
        let shape = self.grid.shape();
        match dist {
            Dist::Mc => shape.vc_to_mc(vc),
            Dist::Mr => shape.vc_to_mr(vc),
            Dist::Vc => vc,
            Dist::Vr => shape.vc_to_vr(vc),
            Dist::Star | Dist::Circ => 0,
            Dist::Md => self.grid.diag_rank_of(vc),
        }
    }

    /// Rank in the cross communicator of the process with VC rank `vc`.
    pub fn cross_rank_of_vc(&self, vc: usize) -> usize {
        match (self.pair.col, self.pair.row) {
            (Dist::Circ, _) => vc,
            (Dist::Md, _) | (_, Dist::Md) => self.grid.diag_of(vc),
            _ => 0,
        }
    }

    pub fn col_rank(&self) -> Option<usize> {
        self.grid.vc_rank().map(|vc| self.rank_of_vc(self.pair.col, vc))
    }

    pub fn row_rank(&self) -> Option<usize> {
        self.grid.vc_rank().map(|vc| self.rank_of_vc(self.pair.row, vc))
    }

    pub fn cross_rank(&self) -> Option<usize> {
        self.grid.vc_rank().map(|vc| self.cross_rank_of_vc(vc))
    }

    /// Whether this process stores part of the matrix.
    pub fn participating(&self) -> bool {
        self.cross_rank() == Some(self.root)
    }

    /// Whether the process with VC rank `vc` stores part of the matrix.
    pub fn participating_vc(&self, vc: usize) -> bool {
        self.cross_rank_of_vc(vc) == self.root
    }

    pub fn col_shift(&self) -> usize {
        match self.col_rank() {
            Some(r) if self.participating() => shift(r, self.col_align, self.col_stride()),
            _ => 0,
        }
    }

    pub fn row_shift(&self) -> usize {
        match self.row_rank() {
            Some(r) if self.participating() => shift(r, self.row_align, self.row_stride()),
            _ => 0,
        }
    }

    /// Column shift of the process with column rank `col_rank`.
    #[inline]
    pub fn col_shift_of(&self, col_rank: usize) -> usize {
        shift(col_rank, self.col_align, self.col_stride())
    }

    #[inline]
    pub fn row_shift_of(&self, row_rank: usize) -> usize {
        shift(row_rank, self.row_align, self.row_stride())
    }

    pub fn local_height(&self) -> usize {
        if self.participating() {
            length(self.height, self.col_shift(), self.col_stride())
        } else {
            0
        }
    }

    pub fn local_width(&self) -> usize {
        if self.participating() {
            length(self.width, self.row_shift(), self.row_stride())
        } else {
            0
        }
    }

    #[inline]
    pub fn max_local_height(&self) -> usize {
        max_length(self.height, self.col_stride())
    }

    #[inline]
    pub fn max_local_width(&self) -> usize {
        max_length(self.width, self.row_stride())
    }

    /// Column rank owning global row `i`.
    #[inline]
    pub fn row_owner(&self, i: usize) -> usize {
        (i + self.col_align) % self.col_stride()
    }

    /// Row rank owning global column `j`.
    #[inline]
    pub fn col_owner(&self, j: usize) -> usize {
        (j + self.row_align) % self.row_stride()
    }

    /// Rank in the distribution communicator owning entry `(i, j)`.
    #[inline]
    pub fn owner(&self, i: usize, j: usize) -> usize {
        self.row_owner(i) + self.col_stride() * self.col_owner(j)
    }

    /// Local position of global entry `(i, j)` if this process stores it.
    pub fn local_index(&self, i: usize, j: usize) -> Option<(usize, usize)> {
        if !self.participating() || i >= self.height || j >= self.width {
            return None;
        }
        let (cs, rs) = (self.col_stride(), self.row_stride());
        let (col_rank, row_rank) = (self.col_rank()?, self.row_rank()?);
        if self.row_owner(i) != col_rank || self.col_owner(j) != row_rank {
            return None;
        }
        Some(((i - self.col_shift()) / cs, (j - self.row_shift()) / rs))
    }

    #[inline]
    pub fn global_row(&self, i_loc: usize) -> usize {
        self.col_shift() + i_loc * self.col_stride()
    }

    #[inline]
    pub fn global_col(&self, j_loc: usize) -> usize {
        self.row_shift() + j_loc * self.row_stride()
    }

    /// Axis over which distinct pieces of the matrix live, ordered so that
    /// rank `k = col_rank + col_stride * row_rank`.
    pub fn dist_axis(&self) -> Axis {
        use Dist::*;
        match (self.pair.col, self.pair.row) {
            (Mc, Mr) => Axis::Vc,
            (Mr, Mc) => Axis::Vr,
            (d, Star) | (Star, d) => Axis::of_dist(d),
            _ => Axis::Own,
        }
    }

    /// Axis over processes holding identical copies of the local data.
    pub fn redundant_axis(&self) -> Axis {
        use Dist::*;
        match (self.pair.col, self.pair.row) {
            (Mc, Star) | (Star, Mc) => Axis::Mr,
            (Mr, Star) | (Star, Mr) => Axis::Mc,
            (Star, Star) => Axis::Vc,
            _ => Axis::Own,
        }
    }

    /// Axis across the copies selected by `root`.
    pub fn cross_axis(&self) -> Axis {
        match (self.pair.col, self.pair.row) {
            (Dist::Circ, _) => Axis::Vc,
            (Dist::Md, _) | (_, Dist::Md) => Axis::MdPerp,
            _ => Axis::Own,
        }
    }

    pub fn dist_comm(&self) -> Option<Comm> {
        self.grid.comm(self.dist_axis())
    }

    pub fn redundant_comm(&self) -> Option<Comm> {
        self.grid.comm(self.redundant_axis())
    }

    pub fn cross_comm(&self) -> Option<Comm> {
        self.grid.comm(self.cross_axis())
    }

    /// Rank in the distribution communicator.
    pub fn dist_rank(&self) -> Option<usize> {
        Some(self.col_rank()? + self.col_stride() * self.row_rank()?)
    }

    pub fn same_grid(&self, other: &DistMeta) -> bool {
        Arc::ptr_eq(&self.grid, &other.grid)
    }

    /// VC ranks of every process storing entries in distribution slot `k`.
    pub fn owner_table(&self) -> Vec<Vec<usize>> {
        let cs = self.col_stride();
        let mut table = vec![Vec::new(); cs * self.row_stride()];
        for vc in 0..self.grid.size() {
            if !self.participating_vc(vc) {
                continue;
            }
            let k = self.rank_of_vc(self.pair.col, vc) + cs * self.rank_of_vc(self.pair.row, vc);
            table[k].push(vc);
        }
        table
    }

    /// Layout of the submatrix `rows x cols`.
    pub fn view(&self, rows: &Range<usize>, cols: &Range<usize>) -> LaResult<DistMeta> {
        if rows.start > rows.end || rows.end > self.height || cols.start > cols.end || cols.end > self.width {
            return Err(LaError::logic(format!(
                "view [{:?},{:?}] out of bounds of {}x{} matrix",
                rows, cols, self.height, self.width
            )));
        }
        Ok(DistMeta {
            grid: Arc::clone(&self.grid),
            pair: self.pair,
            height: rows.len(),
            width: cols.len(),
            col_align: (self.col_align + rows.start) % self.col_stride(),
            row_align: (self.row_align + cols.start) % self.row_stride(),
            root: self.root,
        })
    }

    /// Local index range of the rows `rows` of this layout.
    pub fn local_rows(&self, rows: &Range<usize>) -> Range<usize> {
        if !self.participating() {
            return 0..0;
        }
        let (s, st) = (self.col_shift(), self.col_stride());
        length(rows.start, s, st)..length(rows.end, s, st)
    }

    pub fn local_cols(&self, cols: &Range<usize>) -> Range<usize> {
        if !self.participating() {
            return 0..0;
        }
        let (s, st) = (self.row_shift(), self.row_stride());
        length(cols.start, s, st)..length(cols.end, s, st)
    }

    /// Error unless both layouts live on the same grid.
    pub fn check_grid(&self, other: &DistMeta) -> LaResult<()> {
        if !self.same_grid(other) {
            return Err(LaError::logic("matrices are distributed over different grids"));
        }
        Ok(())
    }

    /// Error unless both layouts have the same global shape.
    pub fn check_shape(&self, other: &DistMeta) -> LaResult<()> {
        if self.height != other.height || self.width != other.width {
            return Err(LaError::logic(format!(
                "shape mismatch: {}x{} vs {}x{}",
                self.height, self.width, other.height, other.width
            )));
        }
        Ok(())
    }
}

/// A matrix distributed over a [`Grid`] with a fixed distribution pair.
#[derive(Debug, Clone)]
pub struct DistMatrix<T: Entry> {
    meta: DistMeta,
    col_constrained: bool,
    row_constrained: bool,
    root_constrained: bool,
    local: DMatrix<T>,
    remote_updates: Vec<(usize, usize, T)>,
}

impl<T: Entry> DistMatrix<T> {
    /// Empty matrix with the given distribution.
    pub fn new(grid: &Arc<Grid>, col: Dist, row: Dist) -> LaResult<Self> {
        let pair = DistPair::new(col, row)?;
        Ok(Self {
            meta: DistMeta::new(grid, pair),
            col_constrained: false,
            row_constrained: false,
            root_constrained: false,
            local: DMatrix::zeros(0, 0),
            remote_updates: Vec::new(),
        })
    }

    /// Zero matrix of the given global shape.
    pub fn zeros(grid: &Arc<Grid>, col: Dist, row: Dist, height: usize, width: usize) -> LaResult<Self> {
        let mut a = Self::new(grid, col, row)?;
        a.resize(height, width);
        Ok(a)
    }

    /// Distribute a matrix every process already holds in full. Not collective.
    pub fn from_global(grid: &Arc<Grid>, col: Dist, row: Dist, global: &DMatrix<T>) -> LaResult<Self> {
        let mut a = Self::zeros(grid, col, row, global.nrows(), global.ncols())?;
        a.fill_from_global(global);
        Ok(a)
    }

    /// Same as [`from_global`](Self::from_global) with explicit root and alignments.
    pub fn from_global_aligned(
        grid: &Arc<Grid>,
        col: Dist,
        row: Dist,
        col_align: usize,
        row_align: usize,
        root: usize,
        global: &DMatrix<T>,
    ) -> LaResult<Self> {
        let mut a = Self::new(grid, col, row)?;
        a.set_root(root)?;
        a.align(col_align, row_align)?;
        a.resize(global.nrows(), global.ncols());
        a.fill_from_global(global);
        Ok(a)
    }

    fn fill_from_global(&mut self, global: &DMatrix<T>) {
        let (lh, lw) = (self.local_height(), self.local_width());
        for jl in 0..lw {
            let j = self.meta.global_col(jl);
            for il in 0..lh {
                let i = self.meta.global_row(il);
                self.local[(il, jl)] = global[(i, j)];
            }
        }
    }

    #[inline]
    pub fn meta(&self) -> &DistMeta {
        &self.meta
    }

    #[inline]
    pub fn grid(&self) -> &Arc<Grid> {
        &self.meta.grid
    }

    #[inline]
    pub fn pair(&self) -> DistPair {
        self.meta.pair
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.meta.height
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.meta.width
    }

    #[inline]
    pub fn col_align(&self) -> usize {
        self.meta.col_align
    }

    #[inline]
    pub fn row_align(&self) -> usize {
        self.meta.row_align
    }

    #[inline]
    pub fn root(&self) -> usize {
        self.meta.root
    }

    pub fn col_shift(&self) -> usize {
        self.meta.col_shift()
    }

    pub fn row_shift(&self) -> usize {
        self.meta.row_shift()
    }

    pub fn col_stride(&self) -> usize {
        self.meta.col_stride()
    }

    pub fn row_stride(&self) -> usize {
        self.meta.row_stride()
    }

    #[inline]
    pub fn local_height(&self) -> usize {
        self.local.nrows()
    }

    #[inline]
    pub fn local_width(&self) -> usize {
        self.local.ncols()
    }

    pub fn col_constrained(&self) -> bool {
        self.col_constrained
    }

    pub fn row_constrained(&self) -> bool {
        self.row_constrained
    }

    pub fn root_constrained(&self) -> bool {
        self.root_constrained
    }

    #[inline]
    pub fn local(&self) -> &DMatrix<T> {
        &self.local
    }

    #[inline]
    pub fn local_mut(&mut self) -> &mut DMatrix<T> {
        &mut self.local
    }

    pub fn participating(&self) -> bool {
        self.meta.participating()
    }

    /// Resize to `height x width`; the local contents are reset to zero.
    pub fn resize(&mut self, height: usize, width: usize) {
        self.meta.height = height;
        self.meta.width = width;
        let (lh, lw) = (self.meta.local_height(), self.meta.local_width());
        self.local = DMatrix::zeros(lh, lw);
    }

    /// Drop the data and any unconstrained alignment.
    pub fn empty(&mut self) {
        if !self.col_constrained {
            self.meta.col_align = 0;
        }
        if !self.row_constrained {
            self.meta.row_align = 0;
        }
        self.resize(0, 0);
    }

    /// Fix both alignments. Local data is reset.
    pub fn align(&mut self, col_align: usize, row_align: usize) -> LaResult<()> {
        self.align_cols(col_align)?;
        self.align_rows(row_align)
    }

    pub fn align_cols(&mut self, col_align: usize) -> LaResult<()> {
        let stride = self.col_stride();
        if col_align >= stride {
            return Err(LaError::logic(format!(
                "column alignment {} out of range for stride {}",
                col_align, stride
            )));
        }
        self.meta.col_align = col_align;
        self.col_constrained = true;
        self.resize(self.height(), self.width());
        Ok(())
    }

    pub fn align_rows(&mut self, row_align: usize) -> LaResult<()> {
        let stride = self.row_stride();
        if row_align >= stride {
            return Err(LaError::logic(format!(
                "row alignment {} out of range for stride {}",
                row_align, stride
            )));
        }
        self.meta.row_align = row_align;
        self.row_constrained = true;
        self.resize(self.height(), self.width());
        Ok(())
    }

    /// Forget alignment constraints; current alignments are kept.
    pub fn free_alignments(&mut self) {
        self.col_constrained = false;
        self.row_constrained = false;
        self.root_constrained = false;
    }

    /// Set alignments without constraining them, if they are not constrained.
    pub(crate) fn set_free_alignments(&mut self, col_align: usize, row_align: usize) {
        if !self.col_constrained {
            self.meta.col_align = col_align % self.col_stride();
        }
        if !self.row_constrained {
            self.meta.row_align = row_align % self.row_stride();
        }
        self.resize(self.height(), self.width());
    }

    /// Resize to `height x width`, taking the given alignments where they are
    /// not constrained.
    pub(crate) fn prepare(&mut self, height: usize, width: usize, col_align: usize, row_align: usize) {
        self.meta.height = height;
        self.meta.width = width;
        self.set_free_alignments(col_align, row_align);
    }

    /// Choose the owning process (CIRC) or diagonal (MD).
    pub fn set_root(&mut self, root: usize) -> LaResult<()> {
        let limit = match (self.pair().col, self.pair().row) {
            (Dist::Circ, _) => self.grid().size(),
            (Dist::Md, _) | (_, Dist::Md) => self.grid().gcd(),
            _ => 1,
        };
        if root >= limit {
            return Err(LaError::logic(format!("root {} out of range (limit {})", root, limit)));
        }
        self.meta.root = root;
        self.root_constrained = true;
        self.resize(self.height(), self.width());
        Ok(())
    }

    pub(crate) fn set_free_root(&mut self, root: usize) {
        if !self.root_constrained {
            self.meta.root = root;
            self.resize(self.height(), self.width());
        }
    }

    /// Read-only view of the whole matrix.
    pub fn as_ref(&self) -> DistRef<'_, T> {
        DistRef {
            meta: self.meta.clone(),
            local: self.local.view((0, 0), self.local.shape()),
        }
    }

    /// Mutable view of the whole matrix.
    pub fn as_mut(&mut self) -> DistMut<'_, T> {
        let shape = self.local.shape();
        DistMut {
            meta: self.meta.clone(),
            local: self.local.view_mut((0, 0), shape),
        }
    }

    /// View of the submatrix `rows x cols`, aliasing this matrix's storage.
    pub fn view(&self, rows: Range<usize>, cols: Range<usize>) -> LaResult<DistRef<'_, T>> {
        let meta = self.meta.view(&rows, &cols)?;
        let lr = self.meta.local_rows(&rows);
        let lc = self.meta.local_cols(&cols);
        Ok(DistRef {
            meta,
            local: self.local.view((lr.start, lc.start), (lr.len(), lc.len())),
        })
    }

    pub fn view_mut(&mut self, rows: Range<usize>, cols: Range<usize>) -> LaResult<DistMut<'_, T>> {
        let meta = self.meta.view(&rows, &cols)?;
        let lr = self.meta.local_rows(&rows);
        let lc = self.meta.local_cols(&cols);
        Ok(DistMut {
            meta,
            local: self.local.view_mut((lr.start, lc.start), (lr.len(), lc.len())),
        })
    }

    /// Local value of `(i, j)`, if stored here.
    pub fn get_local(&self, i: usize, j: usize) -> Option<T> {
        self.meta.local_index(i, j).map(|idx| self.local[idx])
    }

    /// Value of global entry `(i, j)` on every viewing process. Collective.
    pub fn get(&self, i: usize, j: usize) -> LaResult<T> {
        get_entry(&self.meta, &self.local.view((0, 0), self.local.shape()), i, j)
    }

    /// Overwrite `(i, j)` on every process storing it. Not collective.
    pub fn set(&mut self, i: usize, j: usize, value: T) -> LaResult<()> {
        self.check_index(i, j)?;
        if let Some(idx) = self.meta.local_index(i, j) {
            self.local[idx] = value;
        }
        Ok(())
    }

    /// Add to `(i, j)` on every process storing it. Not collective.
    pub fn update(&mut self, i: usize, j: usize, value: T) -> LaResult<()> {
        self.check_index(i, j)?;
        if let Some(idx) = self.meta.local_index(i, j) {
            self.local[idx] += value;
        }
        Ok(())
    }

    fn check_index(&self, i: usize, j: usize) -> LaResult<()> {
        if i >= self.height() || j >= self.width() {
            return Err(LaError::logic(format!(
                "entry ({}, {}) outside {}x{} matrix",
                i,
                j,
                self.height(),
                self.width()
            )));
        }
        Ok(())
    }

    /// Stage an update of any global entry, owned here or not.
    pub fn queue_update(&mut self, i: usize, j: usize, value: T) -> LaResult<()> {
        self.check_index(i, j)?;
        self.remote_updates.push((i, j, value));
        Ok(())
    }

    pub fn reserve(&mut self, num_updates: usize) {
        self.remote_updates.reserve(num_updates);
    }

    pub fn num_queued(&self) -> usize {
        self.remote_updates.len()
    }

    /// Deliver every staged update to all processes storing the entry and
    /// add it there. Collective over the viewing communicator.
    pub fn process_queues(&mut self) -> LaResult<()> {
        let updates = std::mem::take(&mut self.remote_updates);
        let viewing = self.grid().viewing_comm().clone();
        let table = self.meta.owner_table();
        let mut outgoing: Vec<Vec<(usize, usize, T)>> = vec![Vec::new(); viewing.size()];
        for (i, j, v) in updates {
            for &vc in &table[self.meta.owner(i, j)] {
                outgoing[self.grid().vc_to_viewing(vc)].push((i, j, v));
            }
        }
        let incoming = viewing.all_to_all(outgoing)?;
        for (i, j, v) in incoming.into_iter().flatten() {
            if let Some(idx) = self.meta.local_index(i, j) {
                self.local[idx] += v;
            }
        }
        Ok(())
    }

    /// Copy `src` into this matrix, redistributing as needed. Collective.
    pub fn copy_from(&mut self, src: &DistRef<'_, T>) -> LaResult<()> {
        crate::redist::copy(src, self)
    }

    /// Full matrix on every viewing process. Collective.
    pub fn to_global(&self) -> LaResult<DMatrix<T>> {
        let mut full = DistMatrix::new(self.grid(), Dist::Star, Dist::Star)?;
        crate::redist::copy(&self.as_ref(), &mut full)?;
        if self.grid().size() < self.grid().viewing_comm().size() {
            let root = self.grid().vc_to_viewing(0);
            let data = self.grid().viewing_comm().broadcast(full.local.clone(), root)?;
            return Ok(data);
        }
        Ok(full.local)
    }
}

fn get_entry<T: Entry>(meta: &DistMeta, local: &DMatrixView<'_, T>, i: usize, j: usize) -> LaResult<T> {
    if i >= meta.height || j >= meta.width {
        return Err(LaError::logic(format!(
            "entry ({}, {}) outside {}x{} matrix",
            i, j, meta.height, meta.width
        )));
    }
    let mut value = T::zero();
    if meta.grid.in_grid() {
        if let Some((il, jl)) = meta.local_index(i, j) {
            value = local[(il, jl)];
        }
        if let Some(dist) = meta.dist_comm() {
            value = dist.broadcast(value, meta.owner(i, j))?;
        }
        if let Some(cross) = meta.cross_comm() {
            if cross.size() > 1 {
                value = cross.broadcast(value, meta.root)?;
            }
        }
    }
    let viewing = meta.grid.viewing_comm();
    if meta.grid.size() < viewing.size() {
        value = viewing.broadcast(value, meta.grid.vc_to_viewing(0))?;
    }
    Ok(value)
}

/// Read-only view of a distributed matrix.
#[derive(Debug, Clone)]
pub struct DistRef<'a, T: Entry> {
    meta: DistMeta,
    local: DMatrixView<'a, T>,
}

impl<'a, T: Entry> DistRef<'a, T> {
    #[inline]
    pub fn meta(&self) -> &DistMeta {
        &self.meta
    }

    #[inline]
    pub fn grid(&self) -> &Arc<Grid> {
        &self.meta.grid
    }

    #[inline]
    pub fn pair(&self) -> DistPair {
        self.meta.pair
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.meta.height
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.meta.width
    }

    #[inline]
    pub fn col_align(&self) -> usize {
        self.meta.col_align
    }

    #[inline]
    pub fn row_align(&self) -> usize {
        self.meta.row_align
    }

    #[inline]
    pub fn local(&self) -> &DMatrixView<'a, T> {
        &self.local
    }

    #[inline]
    pub fn local_height(&self) -> usize {
        self.local.nrows()
    }

    #[inline]
    pub fn local_width(&self) -> usize {
        self.local.ncols()
    }

    /// Sub-view `rows x cols` of this view.
    pub fn view(&self, rows: Range<usize>, cols: Range<usize>) -> LaResult<DistRef<'_, T>> {
        let meta = self.meta.view(&rows, &cols)?;
        let lr = self.meta.local_rows(&rows);
        let lc = self.meta.local_cols(&cols);
        Ok(DistRef {
            meta,
            local: self.local.view((lr.start, lc.start), (lr.len(), lc.len())),
        })
    }

    /// Collective read of a global entry.
    pub fn get(&self, i: usize, j: usize) -> LaResult<T> {
        get_entry(&self.meta, &self.local, i, j)
    }

    /// Owned copy with the same layout.
    pub fn to_owned(&self) -> DistMatrix<T> {
        DistMatrix {
            meta: self.meta.clone(),
            col_constrained: false,
            row_constrained: false,
            root_constrained: false,
            local: self.local.clone_owned(),
            remote_updates: Vec::new(),
        }
    }
}

/// Mutable view of a distributed matrix.
#[derive(Debug)]
pub struct DistMut<'a, T: Entry> {
    meta: DistMeta,
    local: DMatrixViewMut<'a, T>,
}

impl<'a, T: Entry> DistMut<'a, T> {
    #[inline]
    pub fn meta(&self) -> &DistMeta {
        &self.meta
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.meta.height
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.meta.width
    }

    #[inline]
    pub fn local(&self) -> DMatrixView<'_, T> {
        self.local.view((0, 0), self.local.shape())
    }

    #[inline]
    pub fn local_mut(&mut self) -> &mut DMatrixViewMut<'a, T> {
        &mut self.local
    }

    pub fn as_ref(&self) -> DistRef<'_, T> {
        DistRef {
            meta: self.meta.clone(),
            local: self.local.view((0, 0), self.local.shape()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::spmd;
    use crate::dist::GridOrder;
    use proptest::prelude::*;

    #[test]
    fn test_shift_and_length() {
        assert_eq!(shift(0, 1, 3), 2);
        assert_eq!(shift(1, 1, 3), 0);
        assert_eq!(length(7, 2, 3), 2);
        assert_eq!(length(2, 2, 3), 0);
        assert_eq!(max_length(7, 3), 3);
    }

    #[test]
    fn test_local_entries_and_views() {
        let results = spmd(4, |comm| {
            let grid = Arc::new(Grid::new(&comm, GridOrder::ColumnMajor)?);
            let global = DMatrix::from_fn(5, 6, |i, j| (10 * i + j) as f64);
            let a = DistMatrix::from_global(&grid, Dist::Mc, Dist::Mr, &global)?;
            let (mc, mr) = (grid.mc_rank().unwrap_or(0), grid.mr_rank().unwrap_or(0));
            assert_eq!(a.local_height(), length(5, mc, 2));
            assert_eq!(a.local_width(), length(6, mr, 2));
            for jl in 0..a.local_width() {
                for il in 0..a.local_height() {
                    let (i, j) = (mc + 2 * il, mr + 2 * jl);
                    assert_eq!(a.local()[(il, jl)], global[(i, j)]);
                }
            }
            let v = a.view(1..4, 3..6)?;
            assert_eq!((v.col_align(), v.row_align()), (1, 1));
            let owned = v.to_owned();
            assert_eq!(owned.get(2, 0)?, global[(3, 3)]);
            assert_eq!(a.get(4, 5)?, 45.0);
            Ok(())
        });
        assert!(results.iter().all(|r| r.is_ok()), "{:?}", results);
    }

    #[test]
    fn test_queue_updates_reach_all_owners() {
        let results = spmd(4, |comm| {
            let grid = Arc::new(Grid::new(&comm, GridOrder::ColumnMajor)?);
            let mut a = DistMatrix::<f64>::zeros(&grid, Dist::Mc, Dist::Star, 3, 2)?;
            a.queue_update(2, 1, 1.0)?;
            a.process_queues()?;
            assert_eq!(a.num_queued(), 0);
            // every process contributed once and each copy gets all four
            if let Some(v) = a.get_local(2, 1) {
                assert_eq!(v, 4.0);
            }
            assert_eq!(a.get(2, 1)?, 4.0);
            Ok(())
        });
        assert!(results.iter().all(|r| r.is_ok()), "{:?}", results);
    }

    proptest! {
        #[test]
        fn local_height_matches_formula(h in 0usize..40, align in 0usize..4, rank in 0usize..4) {
            let stride = 4;
            let s = shift(rank, align, stride);
            let n = length(h, s, stride);
            let expected = if h > s { (h - s + stride - 1) / stride } else { 0 };
            prop_assert_eq!(n, expected);
            prop_assert!(n <= max_length(h, stride));
        }
    }
}
