//! Algorithm controls.
//!
//! Every algorithm takes its configuration explicitly; there is no process-wide
//! mutable state. Defaults can be overridden through `GRIDLA_*` environment
//! variables when the structs are built with `Default`.

use crate::util::logging::Indent;

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|s| s.parse::<usize>().ok())
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Blocking parameters shared by the blocked distributed kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Panel width used by blocked algorithms (SUMMA gemm).
    pub blocksize: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // GRIDLA_BLOCKSIZE overrides the panel width
            blocksize: env_usize("GRIDLA_BLOCKSIZE").unwrap_or(128),
        }
    }
}

impl Config {
    pub fn with_blocksize(blocksize: usize) -> Self {
        Self { blocksize }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.blocksize == 0 {
            return Err("blocksize must be positive".to_string());
        }
        Ok(())
    }
}

/// Controls for defect-correction refinement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefineCtrl {
    /// Stop once `||r||_inf / ||b||_inf` drops below this.
    pub rel_tol: f64,
    /// Maximum number of accepted corrections.
    pub max_refine_its: usize,
    /// Log the residual after every iteration.
    pub progress: bool,
    /// Indentation of the caller; progress is logged one level deeper.
    pub indent: Indent,
}

impl Default for RefineCtrl {
    fn default() -> Self {
        Self {
            rel_tol: 1e-12,
            max_refine_its: env_usize("GRIDLA_REFINE_ITS").unwrap_or(50),
            progress: env_flag("GRIDLA_PRINT"),
            indent: Indent::root(),
        }
    }
}

impl RefineCtrl {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.rel_tol >= 0.0) {
            return Err(format!("rel_tol must be nonnegative, got {}", self.rel_tol));
        }
        Ok(())
    }
}

/// How a regularized factorization is turned into a solve against the
/// unregularized operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegSolveAlg {
    /// Refine against the regularized operator only.
    Regularized,
    /// Refine against the true operator using the regularized solve as inverse.
    IterativeRefinement,
    /// Flexible GMRES preconditioned by the regularized solve.
    Fgmres,
}

/// Controls for solving with a regularized quasi-semidefinite factorization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegQsdCtrl {
    pub alg: RegSolveAlg,
    /// Target relative residual of the outer solve.
    pub rel_tol: f64,
    /// Refinement stops once `||b - A x|| <= rel_tol_refine * ||b||`.
    pub rel_tol_refine: f64,
    pub max_refine_its: usize,
    /// Krylov restart length for [`RegSolveAlg::Fgmres`].
    pub restart: usize,
    /// An iteration must shrink the residual by at least this factor to continue.
    pub min_reduction_factor: f64,
    pub progress: bool,
    pub indent: Indent,
}

impl Default for RegQsdCtrl {
    fn default() -> Self {
        let eps = f64::EPSILON;
        Self {
            alg: RegSolveAlg::Fgmres,
            rel_tol: eps.powf(0.5),
            rel_tol_refine: eps.powf(0.8),
            max_refine_its: env_usize("GRIDLA_REFINE_ITS").unwrap_or(50),
            restart: 10,
            min_reduction_factor: 2.0,
            progress: env_flag("GRIDLA_PRINT"),
            indent: Indent::root(),
        }
    }
}

impl RegQsdCtrl {
    pub fn validate(&self) -> Result<(), String> {
        if self.restart == 0 {
            return Err("restart must be positive".to_string());
        }
        if self.min_reduction_factor < 1.0 {
            return Err(format!(
                "min_reduction_factor must be >= 1, got {}",
                self.min_reduction_factor
            ));
        }
        if self.rel_tol_refine.is_nan() || self.rel_tol_refine < 0.0 {
            return Err(format!("rel_tol_refine must be >= 0, got {}", self.rel_tol_refine));
        }
        Ok(())
    }
}

/// Controls for nested dissection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BisectCtrl {
    /// Subgraphs with at most this many vertices become leaves.
    pub cutoff: usize,
}

impl Default for BisectCtrl {
    fn default() -> Self {
        Self { cutoff: 128 }
    }
}

/// Controls for the Mehrotra predictor-corrector QP solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MehrotraCtrl {
    /// Use the provided `x` (and `s`) instead of the KKT-based initialization.
    pub primal_initialized: bool,
    /// Use the provided `y`, `z` instead of the KKT-based initialization.
    pub dual_initialized: bool,
    pub tol: f64,
    pub max_its: usize,
    /// Fraction of the step to the cone boundary that is taken.
    pub max_step_ratio: f64,
    /// Ruiz-equilibrate `[A; G]` and `Q` before iterating.
    pub equilibrate: bool,
    /// Log per-iteration residuals.
    pub print: bool,
    pub indent: Indent,
    pub solve_ctrl: RegQsdCtrl,
}

impl Default for MehrotraCtrl {
    fn default() -> Self {
        Self {
            primal_initialized: false,
            dual_initialized: false,
            tol: 1e-8,
            max_its: 100,
            max_step_ratio: 0.99,
            equilibrate: false,
            print: env_flag("GRIDLA_PRINT"),
            indent: Indent::root(),
            solve_ctrl: RegQsdCtrl::default(),
        }
    }
}

impl MehrotraCtrl {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.tol > 0.0) {
            return Err(format!("tol must be positive, got {}", self.tol));
        }
        if !(self.max_step_ratio > 0.0 && self.max_step_ratio < 1.0) {
            return Err(format!(
                "max_step_ratio must lie in (0, 1), got {}",
                self.max_step_ratio
            ));
        }
        self.solve_ctrl.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(Config::default().validate().is_ok());
        assert!(RefineCtrl::default().validate().is_ok());
        assert!(MehrotraCtrl::default().validate().is_ok());
        assert_eq!(MehrotraCtrl::default().max_step_ratio, 0.99);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Config::with_blocksize(0).validate().is_err());
        let ctrl = MehrotraCtrl {
            max_step_ratio: 1.5,
            ..Default::default()
        };
        assert!(ctrl.validate().is_err());
        let solve = RegQsdCtrl {
            rel_tol_refine: -1.0,
            ..Default::default()
        };
        assert!(solve.validate().is_err());
    }
}
