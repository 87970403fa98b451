//! Progress sink
//!
//! Receives human-readable progress and subprocess output while a build
//! runs. Sinks are observers only: nothing they do feeds back into the
//! pipeline's control flow or result.

use tracing::{debug, info};

/// Observer for pipeline progress
pub trait ProgressSink: Send + Sync {
    /// A stage started, finished or was skipped
    fn stage(&self, build_id: &str, message: &str);

    /// One line printed by a subprocess
    fn output(&self, build_id: &str, line: &str);
}

/// Sink that forwards progress to `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn stage(&self, build_id: &str, message: &str) {
        info!(build_id, "{}", message);
    }

    fn output(&self, build_id: &str, line: &str) {
        debug!(build_id, "| {}", line);
    }
}
