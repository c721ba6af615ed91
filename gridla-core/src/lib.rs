//! Gridla: distributed dense and sparse linear algebra over a 2D process grid.
//!
//! The library is organized in layers:
//!
//! - **Communication** ([`comm`]): a `Transport` abstraction and the
//!   collective operations built on it. [`comm::ThreadTransport`] runs an
//!   SPMD job as threads of one process.
//! - **Distributions** ([`dist`]): process grids and the element-cyclic
//!   matrix distributions `(U, V)` over them, with alignment and local
//!   index bookkeeping.
//! - **Redistribution** ([`redist`]): the protocols that move a matrix
//!   between any two of the canonical distribution pairs.
//! - **Linear algebra** ([`linalg`]): local dense kernels, distributed
//!   level-1 and GEMM, sparse storage, the supernodal LDL factorization
//!   with regularized quasi-semidefinite pivoting and iterative refinement.
//! - **Optimization** ([`ipm`]): Mehrotra predictor-corrector for convex
//!   quadratic programs in affine form.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use gridla_core::comm::spmd;
//! use gridla_core::dist::{Dist, Grid, GridOrder};
//! use gridla_core::DistMatrix;
//!
//! let results = spmd(4, |comm| {
//!     let grid = Arc::new(Grid::new(&comm, GridOrder::ColumnMajor)?);
//!     let a = DistMatrix::<f64>::zeros(&grid, Dist::Mc, Dist::Mr, 10, 10)?;
//!     let mut b = DistMatrix::new(&grid, Dist::Vc, Dist::Star)?;
//!     gridla_core::redist::copy(&a.as_ref(), &mut b)?;
//!     Ok(b.local_height())
//! });
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

pub mod comm;
pub mod dist;
pub mod error;
pub mod ipm;
pub mod linalg;
pub mod redist;
pub mod scalar;
pub mod settings;
pub mod util;

pub use comm::{Comm, Transport};
pub use dist::{Dist, DistMatrix, DistPair, Grid};
pub use error::{LaError, LaResult};
pub use ipm::{mehrotra, QpProblem, QpSolution};
pub use linalg::{DistSparseMatrix, SparseMatrix};
pub use scalar::{Entry, Field, Real};
pub use settings::{BisectCtrl, Config, MehrotraCtrl, RefineCtrl, RegQsdCtrl, RegSolveAlg};
