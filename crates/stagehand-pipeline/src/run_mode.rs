//! Run-mode flags shared by every stage of one pipeline run.
//!
//! A [`RunConfig`] is assembled once, before any stage starts, and then handed
//! by value to each stage invocation. Stages read the flags at the moment they
//! need them: stats printing once per bundle completion, fail-on-error once
//! per diagnostic flush.

/// Process-wide run-mode toggles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunConfig {
    show_stats: bool,
    fail_on_error: bool,
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Print a bundler summary after every bundle run. Idempotent.
    pub fn enable_verbose_stats(&mut self) -> &mut Self {
        self.show_stats = true;
        self
    }

    /// Escalate any non-empty diagnostic flush to a failing exit status.
    /// Idempotent, and deliberately has no inverse.
    pub fn enable_fail_on_error(&mut self) -> &mut Self {
        self.fail_on_error = true;
        self
    }

    pub(crate) fn show_stats(&self) -> bool {
        self.show_stats
    }

    pub(crate) fn fail_on_error(&self) -> bool {
        self.fail_on_error
    }
}
