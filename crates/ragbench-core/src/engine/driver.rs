use super::launcher::{CohortStats, RequestLauncher};
use super::unix_now;
use crate::dataset::Dataset;
use crate::errors::BenchError;
use crate::model::{CompletedRequest, RequestDescriptor, ANSWER_KEY};
use crate::report::progress::{self, ProgressSink};
use crate::report::summary::{RunInfo, RunTally, SummaryMetrics};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Running,
    Draining,
    Done,
}

#[derive(Debug)]
pub struct BenchOutcome {
    pub summary: SummaryMetrics,
    /// Cohort by cohort; submission order within each cohort.
    pub results: Vec<CompletedRequest>,
    pub cohorts: Vec<CohortStats>,
}

/// Time-boxed dispatch loop over one dataset.
///
/// Prompts are submitted in input order, in cohorts of the launcher's
/// concurrency. The deadline is checked before each cohort is submitted; a
/// cohort that has started is always drained, so no request is left in flight
/// when the summary is computed.
pub struct BenchmarkDriver {
    launcher: RequestLauncher,
    info: RunInfo,
    timeout: Duration,
    state: DriverState,
    progress: Option<ProgressSink>,
}

impl BenchmarkDriver {
    pub fn new(launcher: RequestLauncher, info: RunInfo, timeout: Duration) -> Self {
        Self {
            launcher,
            info,
            timeout,
            state: DriverState::Running,
            progress: None,
        }
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    fn descriptor(&self, query: &str, answer: &str) -> RequestDescriptor {
        RequestDescriptor::new(&self.info.model, query, &self.info.llm_api)
            .with_sampling_params(self.info.additional_sampling_params.clone())
            .with_metadata(ANSWER_KEY, answer)
    }

    pub async fn run(&mut self, dataset: &Dataset) -> Result<BenchOutcome, BenchError> {
        let max_count = dataset.len();
        if max_count == 0 {
            self.state = DriverState::Done;
            return Err(BenchError::NoWork {
                dataset: dataset.name.clone(),
            });
        }

        let concurrency = self.launcher.concurrency();
        let start_time = unix_now();
        let started = Instant::now();
        let mut tally = RunTally {
            start_time,
            ..Default::default()
        };
        let mut results: Vec<CompletedRequest> = Vec::with_capacity(max_count);
        let mut pairs = dataset.iter();

        self.state = DriverState::Running;
        tracing::info!(
            model = %self.info.model,
            dataset = %dataset.name,
            requests = max_count,
            concurrency,
            timeout_s = self.timeout.as_secs(),
            "starting benchmark"
        );

        while results.len() < max_count {
            if started.elapsed() >= self.timeout {
                tally.timed_out = true;
                break;
            }

            let mut submitted = 0;
            for (query, answer) in pairs.by_ref().take(concurrency) {
                let descriptor = self.descriptor(query, answer);
                self.launcher.submit(descriptor)?;
                submitted += 1;
            }
            if submitted == 0 {
                break;
            }
            tally.num_submitted_requests += submitted;

            self.state = DriverState::Draining;
            let mut batch = self.launcher.drain_next_ready().await?;
            batch.sort_by_key(|r| r.ticket);
            results.extend(batch);
            tally.num_cohorts += 1;
            self.state = DriverState::Running;

            progress::emit(
                self.progress.as_ref(),
                results.len(),
                max_count,
                tally.num_cohorts,
            );
        }

        tally.end_time = start_time + started.elapsed().as_secs_f64();
        if tally.timed_out {
            tracing::warn!(
                completed = results.len(),
                total = max_count,
                "test timed out before all requests could be completed"
            );
        }

        let summary = SummaryMetrics::compute(&self.info, tally, &results)?;
        self.state = DriverState::Done;
        tracing::info!(
            completed = summary.num_completed_requests,
            errors = summary.num_errors,
            mismatches = summary.num_mismatched_requests,
            cohorts = summary.num_cohorts,
            "benchmark finished"
        );

        Ok(BenchOutcome {
            summary,
            results,
            cohorts: self.launcher.cohorts().to_vec(),
        })
    }

    pub async fn shutdown(self) {
        self.launcher.shutdown().await;
    }
}
