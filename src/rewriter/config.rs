//! Configuration for the method body rewriter.

/// Configuration for [`crate::rewriter::BodyRewriter`].
///
/// The defaults match what a JIT-time instrumentation agent needs: short branches where they
/// are safe, a full re-decode of every rewritten body before it is handed back to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriterConfig {
    /// Once `code_size + return_count` reaches this value, every branch in the method is
    /// written in long form (default: 127)
    pub long_branch_threshold: usize,

    /// Max stack declared when a tiny header is promoted to a fat one (default: 8, the implicit
    /// max stack of a tiny header)
    pub promoted_max_stack: u16,

    /// Re-parse and re-decode the assembled body before returning it (recommended: always true)
    pub verify_output: bool,
}

impl Default for RewriterConfig {
    fn default() -> Self {
        Self {
            long_branch_threshold: 127,
            promoted_max_stack: 8,
            verify_output: true,
        }
    }
}

impl RewriterConfig {
    /// Creates a configuration that writes every branch in long form
    ///
    /// Output is larger, but a branch can never fall out of range because of growth.
    #[must_use]
    pub fn always_long_branches() -> Self {
        Self {
            long_branch_threshold: 0,
            ..Self::default()
        }
    }

    /// Creates a configuration that skips the final self-check
    ///
    /// **Warning**: Use only when the output is validated elsewhere, a body that fails to load
    /// takes the host process down with it.
    #[must_use]
    pub fn unchecked() -> Self {
        Self {
            verify_output: false,
            ..Self::default()
        }
    }

    /// Returns `true` if a method of this size should be rewritten with long branches only.
    #[must_use]
    pub fn uses_long_branches(&self, code_size: usize, return_count: usize) -> bool {
        code_size.saturating_add(return_count) >= self.long_branch_threshold
    }
}
