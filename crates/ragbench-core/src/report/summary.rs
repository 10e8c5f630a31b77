//! `<base>_summary.json` output.
//!
//! Layout follows the llmperf summary file read by the analysis notebooks:
//! a `version`/`name`/`timestamp` envelope with the metrics flattened in.

use crate::errors::BenchError;
use crate::model::{CompletedRequest, SamplingParams};
use serde::{Deserialize, Serialize};

/// Version tag of the summary layout.
pub const SUMMARY_VERSION: &str = "2023-08-31";

/// Static description of the run a summary belongs to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunInfo {
    pub model: String,
    pub llm_api: String,
    pub num_concurrent_requests: usize,
    pub additional_sampling_params: SamplingParams,
}

/// Counters the driver keeps while it runs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunTally {
    pub start_time: f64,
    pub end_time: f64,
    pub num_submitted_requests: usize,
    pub num_cohorts: usize,
    /// The deadline stopped the run before the dataset was exhausted.
    pub timed_out: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryMetrics {
    pub model: String,
    pub llm_api: String,
    pub num_concurrent_requests: usize,
    #[serde(default)]
    pub additional_sampling_params: SamplingParams,
    pub start_time: f64,
    pub end_time: f64,
    pub num_submitted_requests: usize,
    pub num_completed_requests: usize,
    #[serde(rename = "number_errors", alias = "num_errors")]
    pub num_errors: usize,
    pub num_non_errored_requests: usize,
    pub num_mismatched_requests: usize,
    pub error_rate: f64,
    pub mismatch_rate: f64,
    pub num_cohorts: usize,
    pub timed_out: bool,
    pub mean_end_to_end_latency_s: f64,
    pub max_end_to_end_latency_s: f64,
}

impl SummaryMetrics {
    /// Aggregate a finished run. Rates are only defined when at least one
    /// request completed, so an empty result list is an error.
    pub fn compute(
        info: &RunInfo,
        tally: RunTally,
        results: &[CompletedRequest],
    ) -> Result<Self, BenchError> {
        if results.is_empty() {
            return Err(BenchError::NoCompletedRequests { tally });
        }

        let completed = results.len();
        let errors = results.iter().filter(|r| r.is_error()).count();
        let mismatches = results.iter().filter(|r| r.is_mismatch()).count();

        let latencies: Vec<f64> = results
            .iter()
            .filter(|r| !r.is_error())
            .map(|r| r.metrics.end_to_end_latency_s)
            .collect();
        let mean_latency = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };
        let max_latency = latencies.iter().copied().fold(0.0, f64::max);

        Ok(Self {
            num_completed_requests: completed,
            num_errors: errors,
            num_non_errored_requests: completed - errors,
            num_mismatched_requests: mismatches,
            error_rate: errors as f64 / completed as f64,
            mismatch_rate: mismatches as f64 / completed as f64,
            mean_end_to_end_latency_s: mean_latency,
            max_end_to_end_latency_s: max_latency,
            ..Self::zeroed(info, tally)
        })
    }

    /// Zero-valued summary written when a job had nothing to run.
    pub fn zeroed(info: &RunInfo, tally: RunTally) -> Self {
        Self {
            model: info.model.clone(),
            llm_api: info.llm_api.clone(),
            num_concurrent_requests: info.num_concurrent_requests,
            additional_sampling_params: info.additional_sampling_params.clone(),
            start_time: tally.start_time,
            end_time: tally.end_time,
            num_submitted_requests: tally.num_submitted_requests,
            num_completed_requests: 0,
            num_errors: 0,
            num_non_errored_requests: 0,
            num_mismatched_requests: 0,
            error_rate: 0.0,
            mismatch_rate: 0.0,
            num_cohorts: tally.num_cohorts,
            timed_out: tally.timed_out,
            mean_end_to_end_latency_s: 0.0,
            max_end_to_end_latency_s: 0.0,
        }
    }
}

/// On-disk envelope around [`SummaryMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryFile {
    pub version: String,
    pub name: String,
    #[serde(flatten)]
    pub metrics: SummaryMetrics,
    pub timestamp: i64,
}

impl SummaryFile {
    pub fn new(name: impl Into<String>, metrics: SummaryMetrics) -> Self {
        Self {
            version: SUMMARY_VERSION.to_string(),
            name: name.into(),
            metrics,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RunError;
    use crate::model::{Generation, RequestDescriptor, ANSWER_KEY};

    fn info() -> RunInfo {
        RunInfo {
            model: "llama3".into(),
            llm_api: "RAG".into(),
            num_concurrent_requests: 2,
            additional_sampling_params: SamplingParams::new(),
        }
    }

    fn ok(answer: &str, text: &str, latency: f64) -> CompletedRequest {
        let desc = RequestDescriptor::new("llama3", "q", "RAG").with_metadata(ANSWER_KEY, answer);
        CompletedRequest::success(desc, Generation::text(text), 1, 10.0, 10.0 + latency)
    }

    #[test]
    fn rates_are_relative_to_completed_requests() {
        let results = vec![
            ok("Paris", "Paris.", 1.0),
            ok("Paris", "Lyon", 3.0),
            ok("Rome", "rome", 2.0),
            CompletedRequest::failed(
                RequestDescriptor::new("llama3", "q", "RAG"),
                RunError::provider_server(Some(500), None, "boom"),
                1,
                0.0,
                9.0,
            ),
        ];
        let tally = RunTally {
            start_time: 1.0,
            end_time: 2.0,
            num_submitted_requests: 4,
            num_cohorts: 2,
            timed_out: false,
        };
        let s = SummaryMetrics::compute(&info(), tally, &results).unwrap();
        assert_eq!(s.num_completed_requests, 4);
        assert_eq!(s.num_errors, 1);
        assert_eq!(s.num_non_errored_requests, 3);
        assert_eq!(s.num_mismatched_requests, 1);
        assert_eq!(s.error_rate, 0.25);
        assert_eq!(s.mismatch_rate, 0.25);
        assert_eq!(s.mean_end_to_end_latency_s, 2.0);
        assert_eq!(s.max_end_to_end_latency_s, 3.0, "errored latency excluded");
        assert_eq!(s.num_cohorts, 2);
    }

    #[test]
    fn empty_run_refuses_to_compute_rates() {
        let err = SummaryMetrics::compute(&info(), RunTally::default(), &[]).unwrap_err();
        assert!(matches!(err, BenchError::NoCompletedRequests { .. }));
    }

    #[test]
    fn zero_summary_keeps_the_deadline_tally() {
        let tally = RunTally {
            start_time: 10.0,
            end_time: 12.5,
            timed_out: true,
            ..Default::default()
        };
        let Err(BenchError::NoCompletedRequests { tally: carried }) =
            SummaryMetrics::compute(&info(), tally, &[])
        else {
            panic!("expected NoCompletedRequests");
        };
        let s = SummaryMetrics::zeroed(&info(), carried);
        assert!(s.timed_out);
        assert_eq!(s.start_time, 10.0);
        assert_eq!(s.end_time, 12.5);
        assert_eq!(s.num_completed_requests, 0);
    }

    #[test]
    fn summary_file_flattens_metrics_under_llmperf_keys() {
        let metrics = SummaryMetrics::zeroed(&info(), RunTally::default());
        let v = serde_json::to_value(SummaryFile::new("llama3_batch_1_prod", metrics)).unwrap();
        assert_eq!(v["version"], SUMMARY_VERSION);
        assert_eq!(v["name"], "llama3_batch_1_prod");
        assert_eq!(v["number_errors"], 0);
        assert_eq!(v["num_completed_requests"], 0);
        assert_eq!(v["error_rate"], 0.0);
        assert!(v.get("metrics").is_none());
        assert!(v["timestamp"].as_i64().unwrap() > 0);

        let back: SummaryFile = serde_json::from_value(v).unwrap();
        assert_eq!(back.metrics.model, "llama3");
    }
}
