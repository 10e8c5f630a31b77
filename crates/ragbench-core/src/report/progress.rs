//! Progress reporting for benchmark and judge runs. The orchestrator emits one
//! event per drained cohort; the console layer consumes them via a sink.

use std::sync::Arc;

/// One progress update: requests finished so far out of the run's total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub done: usize,
    pub total: usize,
    /// Number of cohorts drained so far.
    pub cohorts: usize,
}

/// Sink for progress events. Called after every drain, never concurrently.
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

pub(crate) fn emit(sink: Option<&ProgressSink>, done: usize, total: usize, cohorts: usize) {
    if let Some(sink) = sink {
        sink(ProgressEvent {
            done,
            total,
            cohorts,
        });
    }
}
