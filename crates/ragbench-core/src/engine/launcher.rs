use super::pool::{Job, WorkerPool};
use crate::errors::BenchError;
use crate::model::{CompletedRequest, RequestDescriptor, Ticket};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Timing of one drained cohort. A cohort finishes with its slowest member,
/// so `wall_time` tracks `slowest_request_s`, not the mean.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortStats {
    pub index: usize,
    pub size: usize,
    pub wall_time: Duration,
    pub slowest_request_s: f64,
}

/// Non-blocking submission plus barrier-style batch drain over a worker pool.
///
/// Everything submitted since the previous drain forms one cohort;
/// `drain_next_ready` returns only once the whole cohort has completed. The
/// launcher performs no retries of its own.
pub struct RequestLauncher {
    pool: WorkerPool,
    next_ticket: u64,
    pending: HashSet<Ticket>,
    cohort_started: Option<Instant>,
    cohorts: Vec<CohortStats>,
}

impl RequestLauncher {
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            pool,
            next_ticket: 0,
            pending: HashSet::new(),
            cohort_started: None,
            cohorts: Vec::new(),
        }
    }

    /// Number of workers behind this launcher.
    pub fn concurrency(&self) -> usize {
        self.pool.size()
    }

    /// Requests submitted since the last drain.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    pub fn cohorts(&self) -> &[CohortStats] {
        &self.cohorts
    }

    /// Queue a request and return immediately.
    pub fn submit(&mut self, descriptor: RequestDescriptor) -> Result<Ticket, BenchError> {
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        self.pool.dispatch(Job { ticket, descriptor })?;
        self.pending.insert(ticket);
        self.cohort_started.get_or_insert_with(Instant::now);
        Ok(ticket)
    }

    /// Wait until every request submitted since the previous drain has
    /// completed and return them, in completion order.
    pub async fn drain_next_ready(&mut self) -> Result<Vec<CompletedRequest>, BenchError> {
        let expected = self.pending.len();
        let mut batch = Vec::with_capacity(expected);

        while !self.pending.is_empty() {
            let Some(done) = self.pool.next_completion().await else {
                return Err(BenchError::PoolClosed {
                    missing: self.pending.len(),
                });
            };
            match done.ticket {
                Some(ticket) if self.pending.remove(&ticket) => batch.push(done),
                other => tracing::warn!(?other, "dropping completion that belongs to no pending request"),
            }
        }

        if expected > 0 {
            let stats = CohortStats {
                index: self.cohorts.len(),
                size: batch.len(),
                wall_time: self
                    .cohort_started
                    .take()
                    .map(|t| t.elapsed())
                    .unwrap_or_default(),
                slowest_request_s: batch
                    .iter()
                    .map(|r| r.metrics.end_to_end_latency_s)
                    .fold(0.0, f64::max),
            };
            tracing::debug!(
                cohort = stats.index,
                size = stats.size,
                wall_time_ms = stats.wall_time.as_millis() as u64,
                slowest_request_s = stats.slowest_request_s,
                "cohort drained"
            );
            self.cohorts.push(stats);
        }

        Ok(batch)
    }

    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }
}
