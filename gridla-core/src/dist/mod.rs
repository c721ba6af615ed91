//! Matrix distributions over a process grid.
//!
//! A distributed matrix carries one `(col, row)` pair of [`Dist`] tags for its
//! whole life. The column tag says how rows are spread (which process owns
//! row `i`), the row tag how columns are spread.

pub mod grid;
pub mod matrix;

pub use grid::{find_factor, Axis, Grid, GridOrder, GridShape};
pub use matrix::{DistMatrix, DistMeta, DistMut, DistRef};

use crate::error::{LaError, LaResult};
use std::fmt;

/// How one dimension of a matrix is spread over the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dist {
    /// Cyclic over the grid columns' members (the column communicator).
    Mc,
    /// Cyclic over the grid rows' members (the row communicator).
    Mr,
    /// Cyclic over all processes in column-major order.
    Vc,
    /// Cyclic over all processes in row-major order.
    Vr,
    /// Replicated.
    Star,
    /// Owned entirely by one root process.
    Circ,
    /// Cyclic along a diagonal of the grid.
    Md,
}

impl Dist {
    /// The grid axis a vector distribution refines.
    pub fn partial(self) -> Dist {
        match self {
            Dist::Vc => Dist::Mc,
            Dist::Vr => Dist::Mr,
            d => d,
        }
    }

    /// The other grid axis combined with `partial()` to form a vector distribution.
    pub fn partial_union(self) -> Dist {
        match self {
            Dist::Vc => Dist::Mr,
            Dist::Vr => Dist::Mc,
            _ => Dist::Star,
        }
    }

    /// The replicated version of this distribution.
    pub fn collect(self) -> Dist {
        match self {
            Dist::Circ => Dist::Circ,
            _ => Dist::Star,
        }
    }

    /// Vector distribution refining a matrix axis.
    pub fn promote(self) -> Dist {
        match self {
            Dist::Mc => Dist::Vc,
            Dist::Mr => Dist::Vr,
            d => d,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Dist::Mc => "MC",
            Dist::Mr => "MR",
            Dist::Vc => "VC",
            Dist::Vr => "VR",
            Dist::Star => "STAR",
            Dist::Circ => "CIRC",
            Dist::Md => "MD",
        }
    }
}

impl fmt::Display for Dist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A legal `(col, row)` distribution pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DistPair {
    pub col: Dist,
    pub row: Dist,
}

/// Every legal pair.
pub const LEGAL_PAIRS: [DistPair; 14] = {
    use Dist::*;
    [
        DistPair { col: Circ, row: Circ },
        DistPair { col: Mc, row: Mr },
        DistPair { col: Mc, row: Star },
        DistPair { col: Md, row: Star },
        DistPair { col: Mr, row: Mc },
        DistPair { col: Mr, row: Star },
        DistPair { col: Star, row: Mc },
        DistPair { col: Star, row: Md },
        DistPair { col: Star, row: Mr },
        DistPair { col: Star, row: Star },
        DistPair { col: Star, row: Vc },
        DistPair { col: Star, row: Vr },
        DistPair { col: Vc, row: Star },
        DistPair { col: Vr, row: Star },
    ]
};

impl DistPair {
    /// Checked constructor.
    pub fn new(col: Dist, row: Dist) -> LaResult<Self> {
        let pair = DistPair { col, row };
        if pair.index().is_none() {
            return Err(LaError::logic(format!("illegal distribution pair {}", pair)));
        }
        Ok(pair)
    }

    /// Position in [`LEGAL_PAIRS`].
    pub fn index(self) -> Option<usize> {
        LEGAL_PAIRS.iter().position(|&p| p == self)
    }

    /// The pair whose matrices are transposes of this pair's.
    pub fn transposed(self) -> DistPair {
        DistPair { col: self.row, row: self.col }
    }

    /// Whether every process holds the full matrix.
    pub fn is_replicated(self) -> bool {
        self.col == Dist::Star && self.row == Dist::Star
    }
}

impl fmt::Display for DistPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.col, self.row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_pairs() {
        assert!(DistPair::new(Dist::Mc, Dist::Mr).is_ok());
        assert!(DistPair::new(Dist::Mc, Dist::Mc).is_err());
        assert!(DistPair::new(Dist::Vc, Dist::Vr).is_err());
        for p in LEGAL_PAIRS {
            assert!(p.transposed().index().is_some(), "{} has no transpose", p);
        }
    }

    #[test]
    fn test_partial_unions() {
        assert_eq!(Dist::Vc.partial(), Dist::Mc);
        assert_eq!(Dist::Vr.partial_union(), Dist::Mc);
    }
}
