use crate::errors::{RunError, RunErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form sampling parameters forwarded verbatim to the backend.
pub type SamplingParams = serde_json::Map<String, serde_json::Value>;

/// Metadata key carrying the ground-truth answer of a benchmark prompt.
pub const ANSWER_KEY: &str = "answer";

/// One request as handed to the worker pool.
///
/// Built once per submission and moved into the launcher, so it cannot be
/// mutated after it is submitted. `prompt` serializes as `[text, len]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub model: String,
    pub prompt: (String, usize),
    #[serde(default)]
    pub sampling_params: SamplingParams,
    pub llm_api: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

impl RequestDescriptor {
    pub fn new(
        model: impl Into<String>,
        prompt: impl Into<String>,
        llm_api: impl Into<String>,
    ) -> Self {
        let prompt = prompt.into();
        let len = prompt.chars().count();
        Self {
            model: model.into(),
            prompt: (prompt, len),
            sampling_params: SamplingParams::new(),
            llm_api: llm_api.into(),
            metadata: None,
        }
    }

    pub fn with_sampling_params(mut self, params: SamplingParams) -> Self {
        self.sampling_params = params;
        self
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn prompt_text(&self) -> &str {
        &self.prompt.0
    }

    /// Ground-truth answer attached by the benchmark driver, if any.
    pub fn ground_truth(&self) -> Option<String> {
        let value = self.metadata.as_ref()?.get(ANSWER_KEY)?;
        Some(match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// What a backend client returns for one successful call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    pub text: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    /// Time to first token, when the transport can observe it.
    pub ttft_s: Option<f64>,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Per-request execution metrics. Key names follow the llmperf result layout
/// consumed by the analysis tooling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestMetrics {
    pub error_code: Option<u16>,
    pub error_msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub ttft_s: f64,
    pub end_to_end_latency_s: f64,
    pub request_output_throughput_token_per_s: f64,
    pub number_input_tokens: u64,
    pub number_output_tokens: u64,
    pub number_total_tokens: u64,
    pub attempts: u32,
    /// Unix timestamps (seconds).
    pub start_time: f64,
    pub end_time: f64,
}

/// Handle returned by `submit`, carried by the matching completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(pub u64);

/// Exactly one of these is produced per submitted descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedRequest {
    pub metrics: RequestMetrics,
    pub generated_text: String,
    pub request_config: RequestDescriptor,
    #[serde(skip)]
    pub ticket: Option<Ticket>,
    #[serde(skip)]
    pub failure: Option<RunError>,
}

impl CompletedRequest {
    pub fn success(
        request_config: RequestDescriptor,
        generation: Generation,
        attempts: u32,
        start_time: f64,
        end_time: f64,
    ) -> Self {
        let latency = (end_time - start_time).max(0.0);
        let input_tokens = generation
            .input_tokens
            .unwrap_or(request_config.prompt.1 as u64);
        let output_tokens = generation.output_tokens.unwrap_or(0);
        let throughput = if latency > 0.0 {
            output_tokens as f64 / latency
        } else {
            0.0
        };
        Self {
            metrics: RequestMetrics {
                error_code: None,
                error_msg: String::new(),
                error_kind: None,
                ttft_s: generation.ttft_s.unwrap_or(latency),
                end_to_end_latency_s: latency,
                request_output_throughput_token_per_s: throughput,
                number_input_tokens: input_tokens,
                number_output_tokens: output_tokens,
                number_total_tokens: input_tokens + output_tokens,
                attempts,
                start_time,
                end_time,
            },
            generated_text: generation.text,
            request_config,
            ticket: None,
            failure: None,
        }
    }

    pub fn failed(
        request_config: RequestDescriptor,
        error: RunError,
        attempts: u32,
        start_time: f64,
        end_time: f64,
    ) -> Self {
        Self {
            metrics: RequestMetrics {
                error_code: Some(error.status.unwrap_or(0)),
                error_msg: error.message.clone(),
                error_kind: Some(error.kind.as_str().to_string()),
                end_to_end_latency_s: (end_time - start_time).max(0.0),
                attempts,
                start_time,
                end_time,
                ..Default::default()
            },
            generated_text: String::new(),
            request_config,
            ticket: None,
            failure: Some(error),
        }
    }

    /// Errored results survive a round trip through the responses file via
    /// `error_code`, so both fields are consulted.
    pub fn is_error(&self) -> bool {
        self.failure.is_some() || self.metrics.error_code.is_some()
    }

    pub fn failure_kind(&self) -> Option<RunErrorKind> {
        self.failure.as_ref().map(|f| f.kind)
    }

    pub fn is_mismatch(&self) -> bool {
        if self.is_error() {
            return false;
        }
        match self.request_config.ground_truth() {
            Some(answer) => normalize_answer(&self.generated_text) != normalize_answer(&answer),
            None => false,
        }
    }
}

/// Trim whitespace, strip trailing periods, lower-case.
pub fn normalize_answer(text: &str) -> String {
    text.trim().trim_end_matches('.').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_serializes_prompt_as_text_and_length() {
        let desc = RequestDescriptor::new("llama3", "What is the capital?", "RAG")
            .with_metadata(ANSWER_KEY, "Paris");
        let v = serde_json::to_value(&desc).unwrap();
        assert_eq!(v["prompt"][0], "What is the capital?");
        assert_eq!(v["prompt"][1], 20);
        assert_eq!(v["metadata"]["answer"], "Paris");
        assert_eq!(v["llm_api"], "RAG");
    }

    #[test]
    fn descriptor_without_metadata_omits_the_key() {
        let desc = RequestDescriptor::new("m", "q", "RAG");
        let v = serde_json::to_value(&desc).unwrap();
        assert!(v.get("metadata").is_none());
        assert_eq!(desc.ground_truth(), None);
    }

    #[test]
    fn non_string_ground_truth_is_stringified() {
        let desc = RequestDescriptor::new("m", "q", "RAG").with_metadata(ANSWER_KEY, 42);
        assert_eq!(desc.ground_truth().as_deref(), Some("42"));
    }

    #[test]
    fn normalize_strips_all_trailing_periods_and_case() {
        assert_eq!(normalize_answer("  Paris.. "), "paris");
        assert_eq!(normalize_answer("I don't know."), "i don't know");
        assert_eq!(normalize_answer("U.S.A"), "u.s.a");
    }

    #[test]
    fn success_derives_latency_and_tokens() {
        let desc = RequestDescriptor::new("m", "abcd", "RAG");
        let gen = Generation {
            text: "ok".into(),
            input_tokens: None,
            output_tokens: Some(10),
            ttft_s: None,
        };
        let done = CompletedRequest::success(desc, gen, 1, 100.0, 102.0);
        assert_eq!(done.metrics.end_to_end_latency_s, 2.0);
        assert_eq!(done.metrics.ttft_s, 2.0);
        assert_eq!(done.metrics.number_input_tokens, 4);
        assert_eq!(done.metrics.number_total_tokens, 14);
        assert_eq!(done.metrics.request_output_throughput_token_per_s, 5.0);
        assert!(!done.is_error());
    }

    #[test]
    fn failed_request_records_error_fields() {
        let desc = RequestDescriptor::new("m", "q", "RAG");
        let err = RunError::provider_rate_limit(429, None, "slow down");
        let done = CompletedRequest::failed(desc, err, 10, 1.0, 3.0);
        assert!(done.is_error());
        assert_eq!(done.metrics.error_code, Some(429));
        assert_eq!(done.metrics.error_kind.as_deref(), Some("provider_rate_limit"));
        assert_eq!(done.metrics.attempts, 10);
        assert_eq!(done.failure_kind(), Some(RunErrorKind::ProviderRateLimit));
    }

    #[test]
    fn mismatch_compares_normalized_answer() {
        let desc = RequestDescriptor::new("m", "q", "RAG").with_metadata(ANSWER_KEY, "Paris");
        let hit = CompletedRequest::success(desc.clone(), Generation::text("paris."), 1, 0.0, 1.0);
        let miss = CompletedRequest::success(desc.clone(), Generation::text("Lyon"), 1, 0.0, 1.0);
        let err = CompletedRequest::failed(desc, RunError::other("x"), 1, 0.0, 1.0);
        assert!(!hit.is_mismatch());
        assert!(miss.is_mismatch());
        assert!(!err.is_mismatch(), "errored requests count as errors, not mismatches");
    }
}
