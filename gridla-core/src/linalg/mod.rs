//! Linear algebra layer.
//!
//! Local dense kernels, distributed level-1 and level-3 operations, sparse
//! matrices (local and row-distributed), the sparse LDL factorization and
//! iterative refinement.

pub mod dense;
pub mod dist_sparse;
pub mod gemm;
pub mod io;
pub mod ldl;
pub mod level1;
pub mod refined;
pub mod sparse;

pub use dense::{Diag, Orientation, Side, Uplo};
pub use dist_sparse::DistSparseMatrix;
pub use sparse::SparseMatrix;
