//! Progress reporting for pipeline runs.
//!
//! The pipeline reports one step per stage. The CLI logs them; tests and
//! library callers that don't care use `NoopProgressReporter`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

/// Reports progress for long-running operations.
///
/// Progress values are normalized: `current` goes from 0.0 to `total` (default 1.0).
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// Fire-and-forget; never fails the caller.
    async fn report(&self, current: f64, total: f64, message: Option<String>);

    /// Convenience: report a step out of N total steps.
    async fn step(&self, step: usize, total_steps: usize, message: &str) {
        let current = step as f64 / total_steps.max(1) as f64;
        self.report(current, 1.0, Some(message.to_string())).await;
    }
}

pub struct NoopProgressReporter;

#[async_trait]
impl ProgressReporter for NoopProgressReporter {
    async fn report(&self, _current: f64, _total: f64, _message: Option<String>) {}
}

/// Logs each step at info level.
pub struct LogProgressReporter;

#[async_trait]
impl ProgressReporter for LogProgressReporter {
    async fn report(&self, current: f64, total: f64, message: Option<String>) {
        let percent = if total > 0.0 { current / total * 100.0 } else { 0.0 };
        info!(progress = format!("{percent:.0}%"), "{}", message.unwrap_or_default());
    }
}

pub fn noop_progress() -> Arc<dyn ProgressReporter> {
    Arc::new(NoopProgressReporter)
}
