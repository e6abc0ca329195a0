//! Injectable diagnostics logger.
//!
//! The lifecycle and dispatcher report through an [`FsLogger`] rather than
//! straight to `tracing`, so an embedding application can route lock and
//! drain diagnostics wherever it wants. The default forwards to `tracing`.

use std::fmt;

/// Two-level diagnostics sink.
pub trait FsLogger: Send + Sync + fmt::Debug {
    /// Routine lifecycle progress.
    fn debug(&self, args: fmt::Arguments<'_>);

    /// Something a human should look at: stalls, usage errors, failed
    /// background work.
    fn alert(&self, args: fmt::Arguments<'_>);
}

/// Logger that forwards to `tracing` under the `kvfs` target, tagging
/// every event with the filesystem name.
#[derive(Debug, Clone, Default)]
pub struct TracingLogger {
    fs: String,
}

impl TracingLogger {
    pub fn new(fs: impl Into<String>) -> Self {
        Self { fs: fs.into() }
    }
}

impl FsLogger for TracingLogger {
    fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(target: "kvfs", fs = %self.fs, "{args}");
    }

    fn alert(&self, args: fmt::Arguments<'_>) {
        tracing::warn!(target: "kvfs", fs = %self.fs, "{args}");
    }
}
