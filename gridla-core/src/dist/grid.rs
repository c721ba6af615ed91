//! Two-dimensional process grid.
//!
//! `p = height * width` processes are arranged in a grid. A process's VC rank
//! enumerates the grid column-major, its VR rank row-major; its MC rank is its
//! row in the grid and its MR rank its column. Diagonals wrap around:
//! process `(mc, mr)` lies on diagonal `(mr - mc) mod gcd(height, width)`.

use super::Dist;
use crate::comm::Comm;
use crate::error::{LaError, LaResult};

/// Order in which viewing ranks are laid out on the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GridOrder {
    /// Owning rank = VC rank.
    #[default]
    ColumnMajor,
    /// Owning rank = VR rank.
    RowMajor,
}

/// Grid height used when none is given: the smallest divisor of `p` that is
/// at least `floor(sqrt(p))`.
pub fn find_factor(p: usize) -> usize {
    if p == 0 {
        return 0;
    }
    let mut factor = (p as f64).sqrt().floor() as usize;
    // guard against rounding in the square root
    while factor * factor > p {
        factor -= 1;
    }
    let factor = factor.max(1);
    (factor..=p).find(|f| p % f == 0).unwrap_or(p)
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Pure index arithmetic of a `height x width` grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridShape {
    pub height: usize,
    pub width: usize,
}

impl GridShape {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.height * self.width
    }

    #[inline]
    pub fn gcd(&self) -> usize {
        gcd(self.height, self.width)
    }

    #[inline]
    pub fn lcm(&self) -> usize {
        self.size() / self.gcd()
    }

    #[inline]
    pub fn vc_to_mc(&self, vc: usize) -> usize {
        vc % self.height
    }

    #[inline]
    pub fn vc_to_mr(&self, vc: usize) -> usize {
        vc / self.height
    }

    #[inline]
    pub fn vc_to_vr(&self, vc: usize) -> usize {
        let mc = vc % self.height;
        let mr = vc / self.height;
        mr + mc * self.width
    }

    #[inline]
    pub fn vr_to_vc(&self, vr: usize) -> usize {
        let mc = vr / self.width;
        let mr = vr % self.width;
        mc + mr * self.height
    }

    #[inline]
    pub fn diag(&self, vc: usize) -> usize {
        let g = self.gcd();
        let mc = self.vc_to_mc(vc);
        let mr = self.vc_to_mr(vc);
        (mr + g - mc % g) % g
    }

    /// Number of diagonal steps from the start of `vc`'s diagonal to `vc`.
    pub fn diag_rank(&self, vc: usize) -> usize {
        let mc = self.vc_to_mc(vc);
        let mr = self.vc_to_mr(vc);
        let (mut row, mut col) = (0, self.diag(vc));
        for step in 0..self.lcm() {
            if row == mc && col == mr {
                return step;
            }
            row = (row + 1) % self.height;
            col = (col + 1) % self.width;
        }
        // every process lies on its own diagonal
        0
    }

    /// VC rank of the process at position `rank` along diagonal `diag`.
    pub fn diag_path_to_vc(&self, diag: usize, rank: usize) -> usize {
        let mc = rank % self.height;
        let mr = (diag + rank) % self.width;
        mc + mr * self.height
    }
}

/// Sub-communicators of a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Processes in the same grid column, ranked by MC rank.
    Mc,
    /// Processes in the same grid row, ranked by MR rank.
    Mr,
    /// All processes, ranked column-major.
    Vc,
    /// All processes, ranked row-major.
    Vr,
    /// Processes on the same diagonal, ranked along it.
    Md,
    /// Processes with the same diagonal rank, ranked by diagonal.
    MdPerp,
    /// Just this process.
    Own,
}

impl Axis {
    /// Communicator an axis distributed by `dist` is spread over.
    pub fn of_dist(dist: Dist) -> Axis {
        match dist {
            Dist::Mc => Axis::Mc,
            Dist::Mr => Axis::Mr,
            Dist::Vc => Axis::Vc,
            Dist::Vr => Axis::Vr,
            Dist::Md => Axis::Md,
            Dist::Star | Dist::Circ => Axis::Own,
        }
    }
}

/// Communicators of a process that owns a grid position.
#[derive(Debug)]
struct Member {
    vc: usize,
    vr: usize,
    mc: usize,
    mr: usize,
    diag: usize,
    diag_rank: usize,
    owning: Comm,
    mc_comm: Comm,
    mr_comm: Comm,
    vc_comm: Comm,
    vr_comm: Comm,
    md_comm: Comm,
    md_perp_comm: Comm,
}

/// Process grid. Immutable once built; share through `Arc<Grid>`.
#[derive(Debug)]
pub struct Grid {
    viewing: Comm,
    order: GridOrder,
    shape: GridShape,
    member: Option<Member>,
    vc_to_viewing: Vec<usize>,
    diags: Vec<usize>,
    diag_ranks: Vec<usize>,
}

fn missing(what: &str) -> LaError {
    LaError::Comm(format!("{} split returned no communicator", what))
}

impl Grid {
    /// Grid over every process of `comm` with the default height. Collective.
    pub fn new(comm: &Comm, order: GridOrder) -> LaResult<Grid> {
        Self::with_height(comm, find_factor(comm.size()), order)
    }

    /// Grid over every process of `comm` with `height` rows. Collective.
    pub fn with_height(comm: &Comm, height: usize, order: GridOrder) -> LaResult<Grid> {
        let owners: Vec<usize> = (0..comm.size()).collect();
        Self::with_owners(comm, &owners, height, order)
    }

    /// Grid whose positions are held by the viewing ranks in `owners`.
    ///
    /// Every process of `viewing` must call this; the others get a grid they
    /// can hold matrices on but that owns no data.
    pub fn with_owners(
        viewing: &Comm,
        owners: &[usize],
        height: usize,
        order: GridOrder,
    ) -> LaResult<Grid> {
        let size = owners.len();
        if height == 0 || size == 0 || size % height != 0 {
            return Err(LaError::logic(format!(
                "grid height {} does not divide {} processes",
                height, size
            )));
        }
        if owners.iter().any(|&r| r >= viewing.size()) {
            return Err(LaError::logic("owner rank outside the viewing communicator"));
        }
        let shape = GridShape::new(height, size / height);
        let owner_rank = owners.iter().position(|&r| r == viewing.rank());

        let owning = viewing.split(owner_rank.map(|_| 0), owner_rank.unwrap_or(0))?;
        let vc_mine = owner_rank.map(|r| match order {
            GridOrder::ColumnMajor => r,
            GridOrder::RowMajor => shape.vr_to_vc(r),
        });

        let member = match (owning, vc_mine) {
            (Some(owning), Some(vc)) => {
                let mc = shape.vc_to_mc(vc);
                let mr = shape.vc_to_mr(vc);
                let vr = shape.vc_to_vr(vc);
                let diag = shape.diag(vc);
                let diag_rank = shape.diag_rank(vc);
                let mc_comm = owning.split(Some(mr), mc)?.ok_or_else(|| missing("MC"))?;
                let mr_comm = owning.split(Some(mc), mr)?.ok_or_else(|| missing("MR"))?;
                let vc_comm = owning.split(Some(0), vc)?.ok_or_else(|| missing("VC"))?;
                let vr_comm = owning.split(Some(0), vr)?.ok_or_else(|| missing("VR"))?;
                let md_comm = owning
                    .split(Some(diag), diag_rank)?
                    .ok_or_else(|| missing("MD"))?;
                let md_perp_comm = owning
                    .split(Some(diag_rank), diag)?
                    .ok_or_else(|| missing("MDPerp"))?;
                Some(Member {
                    vc,
                    vr,
                    mc,
                    mr,
                    diag,
                    diag_rank,
                    owning,
                    mc_comm,
                    mr_comm,
                    vc_comm,
                    vr_comm,
                    md_comm,
                    md_perp_comm,
                })
            }
            _ => None,
        };

        let all_vc = viewing.all_gather(vc_mine)?;
        let mut vc_to_viewing = vec![0; size];
        for (viewing_rank, vc) in all_vc.into_iter().enumerate() {
            if let Some(vc) = vc {
                vc_to_viewing[vc] = viewing_rank;
            }
        }
        let diags = (0..size).map(|vc| shape.diag(vc)).collect();
        let diag_ranks = (0..size).map(|vc| shape.diag_rank(vc)).collect();

        log::debug!(
            "built {}x{} grid ({:?}) over {} viewing processes",
            shape.height,
            shape.width,
            order,
            viewing.size()
        );

        Ok(Grid {
            viewing: viewing.clone(),
            order,
            shape,
            member,
            vc_to_viewing,
            diags,
            diag_ranks,
        })
    }

    #[inline]
    pub fn shape(&self) -> GridShape {
        self.shape
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.shape.height
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.shape.width
    }

    /// Number of owning processes.
    #[inline]
    pub fn size(&self) -> usize {
        self.shape.size()
    }

    #[inline]
    pub fn gcd(&self) -> usize {
        self.shape.gcd()
    }

    #[inline]
    pub fn lcm(&self) -> usize {
        self.shape.lcm()
    }

    pub fn order(&self) -> GridOrder {
        self.order
    }

    /// Whether this process owns a grid position.
    #[inline]
    pub fn in_grid(&self) -> bool {
        self.member.is_some()
    }

    pub fn viewing_comm(&self) -> &Comm {
        &self.viewing
    }

    pub fn owning_comm(&self) -> Option<&Comm> {
        self.member.as_ref().map(|m| &m.owning)
    }

    pub fn mc_rank(&self) -> Option<usize> {
        self.member.as_ref().map(|m| m.mc)
    }

    pub fn mr_rank(&self) -> Option<usize> {
        self.member.as_ref().map(|m| m.mr)
    }

    pub fn vc_rank(&self) -> Option<usize> {
        self.member.as_ref().map(|m| m.vc)
    }

    pub fn vr_rank(&self) -> Option<usize> {
        self.member.as_ref().map(|m| m.vr)
    }

    pub fn diag(&self) -> Option<usize> {
        self.member.as_ref().map(|m| m.diag)
    }

    pub fn diag_rank(&self) -> Option<usize> {
        self.member.as_ref().map(|m| m.diag_rank)
    }

    pub fn mc_comm(&self) -> Option<&Comm> {
        self.member.as_ref().map(|m| &m.mc_comm)
    }

    pub fn mr_comm(&self) -> Option<&Comm> {
        self.member.as_ref().map(|m| &m.mr_comm)
    }

    pub fn vc_comm(&self) -> Option<&Comm> {
        self.member.as_ref().map(|m| &m.vc_comm)
    }

    pub fn vr_comm(&self) -> Option<&Comm> {
        self.member.as_ref().map(|m| &m.vr_comm)
    }

    pub fn md_comm(&self) -> Option<&Comm> {
        self.member.as_ref().map(|m| &m.md_comm)
    }

    pub fn md_perp_comm(&self) -> Option<&Comm> {
        self.member.as_ref().map(|m| &m.md_perp_comm)
    }

    /// Handle on the sub-communicator `axis`; `None` outside the grid.
    pub fn comm(&self, axis: Axis) -> Option<Comm> {
        let m = self.member.as_ref()?;
        Some(match axis {
            Axis::Mc => m.mc_comm.clone(),
            Axis::Mr => m.mr_comm.clone(),
            Axis::Vc => m.vc_comm.clone(),
            Axis::Vr => m.vr_comm.clone(),
            Axis::Md => m.md_comm.clone(),
            Axis::MdPerp => m.md_perp_comm.clone(),
            Axis::Own => m.vc_comm.self_comm(),
        })
    }

    /// VC rank of member `q` of this process's `axis` communicator.
    pub fn member_vc(&self, axis: Axis, q: usize) -> Option<usize> {
        let m = self.member.as_ref()?;
        let h = self.height();
        Some(match axis {
            Axis::Mc => q + m.mr * h,
            Axis::Mr => m.mc + q * h,
            Axis::Vc => q,
            Axis::Vr => self.vr_to_vc(q),
            Axis::Md => self.shape.diag_path_to_vc(m.diag, q),
            Axis::MdPerp => self.shape.diag_path_to_vc(q, m.diag_rank),
            Axis::Own => m.vc,
        })
    }

    #[inline]
    pub fn vc_to_vr(&self, vc: usize) -> usize {
        self.shape.vc_to_vr(vc)
    }

    #[inline]
    pub fn vr_to_vc(&self, vr: usize) -> usize {
        self.shape.vr_to_vc(vr)
    }

    /// Viewing rank of the process with VC rank `vc`.
    #[inline]
    pub fn vc_to_viewing(&self, vc: usize) -> usize {
        self.vc_to_viewing[vc]
    }

    /// Diagonal of the process with VC rank `vc`.
    #[inline]
    pub fn diag_of(&self, vc: usize) -> usize {
        self.diags[vc]
    }

    /// Position along its diagonal of the process with VC rank `vc`.
    #[inline]
    pub fn diag_rank_of(&self, vc: usize) -> usize {
        self.diag_ranks[vc]
    }

    /// VC rank of the process holding `(col_rank, row_rank)` of a distribution.
    ///
    /// For distributions that leave an axis replicated, the rank along that
    /// axis is the rank in the matching redundant communicator.
    pub fn coords_to_vc(
        &self,
        col_dist: Dist,
        row_dist: Dist,
        col_rank: usize,
        row_rank: usize,
    ) -> LaResult<usize> {
        use Dist::*;
        let h = self.height();
        let vc = match (col_dist, row_dist) {
            (Mc, _) | (_, Mr) => col_rank + row_rank * h,
            (Mr, _) | (_, Mc) => row_rank + col_rank * h,
            (Vc, _) => col_rank,
            (_, Vc) => row_rank,
            (Vr, _) => self.vr_to_vc(col_rank),
            (_, Vr) => self.vr_to_vc(row_rank),
            (Md, _) => self.shape.diag_path_to_vc(row_rank, col_rank),
            (_, Md) => self.shape.diag_path_to_vc(col_rank, row_rank),
            (Star, Star) | (Circ, Circ) => col_rank,
            _ => {
                return Err(LaError::logic(format!(
                    "no coordinates for [{},{}]",
                    col_dist, row_dist
                )))
            }
        };
        if vc >= self.size() {
            return Err(LaError::logic(format!("coordinates map to invalid VC rank {}", vc)));
        }
        Ok(vc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::spmd;
    use proptest::prelude::*;

    #[test]
    fn test_find_factor() {
        assert_eq!(find_factor(1), 1);
        assert_eq!(find_factor(4), 2);
        assert_eq!(find_factor(6), 2);
        assert_eq!(find_factor(8), 2);
        assert_eq!(find_factor(12), 3);
        assert_eq!(find_factor(7), 7);
    }

    #[test]
    fn test_diagonals_partition_grid() {
        let shape = GridShape::new(2, 3);
        assert_eq!(shape.gcd(), 1);
        assert_eq!(shape.lcm(), 6);
        let mut ranks: Vec<usize> = (0..6).map(|vc| shape.diag_rank(vc)).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, vec![0, 1, 2, 3, 4, 5]);
        for vc in 0..6 {
            assert_eq!(shape.diag_path_to_vc(shape.diag(vc), shape.diag_rank(vc)), vc);
        }
    }

    #[test]
    fn test_grid_construction() {
        let results = spmd(6, |comm| {
            let grid = Grid::new(&comm, GridOrder::ColumnMajor)?;
            assert_eq!((grid.height(), grid.width()), (2, 3));
            let vc = grid.vc_rank().ok_or_else(|| LaError::logic("not in grid"))?;
            assert_eq!(vc, comm.rank());
            assert_eq!(grid.mc_comm().map(|c| c.size()), Some(2));
            assert_eq!(grid.mr_comm().map(|c| c.size()), Some(3));
            assert_eq!(grid.mc_comm().map(|c| c.rank()), grid.mc_rank());
            assert_eq!(grid.vr_comm().map(|c| c.rank()), grid.vr_rank());
            assert_eq!(grid.md_comm().map(|c| c.size()), Some(6));
            assert_eq!(grid.vc_to_viewing(vc), comm.rank());
            Ok(())
        });
        assert!(results.iter().all(|r| r.is_ok()), "{:?}", results);
    }

    #[test]
    fn test_bad_height_is_logic_error() {
        let results = spmd(4, |comm| Grid::with_height(&comm, 3, GridOrder::ColumnMajor).map(|_| ()));
        assert!(results.iter().all(|r| matches!(r, Err(LaError::Logic(_)))));
    }

    #[test]
    fn test_owner_subset() {
        let results = spmd(3, |comm| {
            let grid = Grid::with_owners(&comm, &[2, 0], 1, GridOrder::ColumnMajor)?;
            Ok((grid.in_grid(), grid.vc_rank(), grid.vc_to_viewing(0)))
        });
        let results: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(results[0], (true, Some(1), 2));
        assert_eq!(results[1], (false, None, 2));
        assert_eq!(results[2], (true, Some(0), 2));
    }

    proptest! {
        #[test]
        fn vc_vr_are_inverse(h in 1usize..8, w in 1usize..8) {
            let shape = GridShape::new(h, w);
            for r in 0..shape.size() {
                prop_assert_eq!(shape.vr_to_vc(shape.vc_to_vr(r)), r);
                prop_assert_eq!(shape.vc_to_vr(shape.vr_to_vc(r)), r);
            }
        }

        #[test]
        fn find_factor_divides(p in 1usize..500) {
            let f = find_factor(p);
            prop_assert_eq!(p % f, 0);
            prop_assert!(f * f >= p || f >= (p as f64).sqrt().floor() as usize);
        }
    }
}
