//! Scoped log indentation and env-gated diagnostics.
//!
//! Nested algorithms (a Mehrotra iteration calling a regularized solve calling
//! refinement) indent their progress output through an [`Indent`] handle that
//! travels in their control structures. Each callee logs with
//! [`Indent::nested`] of the handle it was given, so the depth is a plain
//! value and no counter is shared between callers.

use std::env;
use std::sync::OnceLock;

/// Indentation level of progress output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Indent {
    depth: usize,
}

impl Indent {
    pub fn root() -> Self {
        Self::default()
    }

    /// One level deeper than `self`.
    #[must_use]
    pub fn nested(self) -> Self {
        Indent { depth: self.depth + 1 }
    }

    pub fn depth(self) -> usize {
        self.depth
    }

    /// Whitespace prefix for this depth.
    pub fn prefix(self) -> String {
        "  ".repeat(self.depth)
    }
}

/// Log at info level, indented by the given [`Indent`].
#[macro_export]
macro_rules! progress {
    ($indent:expr, $($arg:tt)*) => {
        log::info!("{}{}", $indent.prefix(), format_args!($($arg)*))
    };
}

#[derive(Debug, Clone)]
pub struct DiagnosticsConfig {
    pub enabled: bool,
    pub every: usize,
}

impl DiagnosticsConfig {
    pub fn from_env() -> Self {
        let enabled = match env::var("GRIDLA_DIAG") {
            Ok(v) => v != "0" && v.to_lowercase() != "false",
            Err(_) => false,
        };

        let every = env::var("GRIDLA_DIAG_EVERY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(1);

        Self { enabled, every }
    }

    #[inline]
    pub fn should_log(&self, iter: usize) -> bool {
        self.enabled && (iter % self.every == 0)
    }
}

/// Diagnostics settings, read from the environment once per process.
pub fn diagnostics() -> &'static DiagnosticsConfig {
    static CONFIG: OnceLock<DiagnosticsConfig> = OnceLock::new();
    CONFIG.get_or_init(DiagnosticsConfig::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_indent_is_independent_of_the_parent() {
        let root = Indent::root();
        let child = root.nested();
        let grandchild = child.nested();
        assert_eq!(root.depth(), 0);
        assert_eq!(grandchild.depth(), 2);
        assert_eq!(grandchild.prefix(), "    ");
        // siblings derived from one handle share a depth
        assert_eq!(root.nested(), child);
        assert_eq!(child.prefix().len(), 2);
    }

    #[test]
    fn test_indent_is_per_handle_across_threads() {
        let deep = Indent::root().nested().nested();
        let seen = std::thread::spawn(move || (Indent::root().depth(), deep.depth()))
            .join()
            .unwrap();
        assert_eq!(seen, (0, 2));
    }

    #[test]
    fn test_should_log_respects_stride() {
        let cfg = DiagnosticsConfig { enabled: true, every: 3 };
        assert!(cfg.should_log(0));
        assert!(!cfg.should_log(1));
        assert!(cfg.should_log(6));
        let off = DiagnosticsConfig { enabled: false, every: 1 };
        assert!(!off.should_log(0));
    }
}
