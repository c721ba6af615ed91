//! Error types shared by every layer of the library.

use thiserror::Error;

/// Errors raised by grid, redistribution, factorization and solver routines.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LaError {
    /// Precondition violation (bad shapes, illegal distribution pairing,
    /// unsupported front type). Never retried.
    #[error("Logic error: {0}")]
    Logic(String),

    /// Numerically detected failure inside an iterative algorithm.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension
        expected: usize,
        /// Actual dimension
        actual: usize,
    },

    /// Malformed message or misuse of a communicator
    #[error("Communication failure: {0}")]
    Comm(String),

    /// Another rank of the job failed; raised on the peers blocked in a collective.
    #[error("Job aborted: {0}")]
    Aborted(String),

    /// Matrix file could not be read or written
    #[error("I/O error: {0}")]
    Io(String),
}

/// Result type for library operations.
pub type LaResult<T> = Result<T, LaError>;

impl LaError {
    /// Build a logic error from anything printable.
    pub fn logic(msg: impl Into<String>) -> Self {
        LaError::Logic(msg.into())
    }

    /// Build a runtime error from anything printable.
    pub fn runtime(msg: impl Into<String>) -> Self {
        LaError::Runtime(msg.into())
    }
}

/// Return a [`LaError::Logic`] when `cond` does not hold.
///
/// Only evaluated in debug builds or with the `checks` feature; release builds
/// compile the check away.
#[macro_export]
macro_rules! debug_check {
    ($cond:expr, $($arg:tt)*) => {
        if cfg!(any(debug_assertions, feature = "checks")) && !($cond) {
            return Err($crate::error::LaError::Logic(format!($($arg)*)));
        }
    };
}

/// Return a [`LaError::Logic`] when `cond` does not hold, in every build.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($arg:tt)*) => {
        if !($cond) {
            return Err($crate::error::LaError::Logic(format!($($arg)*)));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checked(n: usize) -> LaResult<usize> {
        ensure!(n > 0, "n must be positive, got {}", n);
        Ok(n)
    }

    #[test]
    fn test_ensure_reports_logic_error() {
        assert_eq!(checked(3), Ok(3));
        match checked(0) {
            Err(LaError::Logic(msg)) => assert!(msg.contains("positive")),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_display() {
        let e = LaError::DimensionMismatch { expected: 4, actual: 3 };
        assert_eq!(e.to_string(), "Dimension mismatch: expected 4, got 3");
    }
}
