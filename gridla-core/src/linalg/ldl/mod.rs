//! Sparse symmetric LDL through nested dissection and multifrontal
//! elimination.
//!
//! The usual pipeline is [`nested_dissection`] once per sparsity pattern,
//! then [`Front::pull`], [`ldl`] (or [`reg_qsd_ldl`]) and any number of
//! [`solve_after`] calls.

pub mod front;
pub mod numeric;
pub mod reg_qsd;
pub mod sparse_leaf;
pub mod symbolic;

pub use front::{Front, FrontState};
pub use numeric::{factor_tree, ldl, solve_after, Pivoting};
pub use reg_qsd::{reg_qsd_ldl, symmetric_equil};
pub use symbolic::{adjacency, nested_dissection, NodeInfo, Reordering, SymmInfo};
