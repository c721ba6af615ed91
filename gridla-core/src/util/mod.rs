//! Utility functions.
//!
//! Scoped logging indentation, env-gated diagnostics and timing.

pub mod logging;
pub mod timer;
