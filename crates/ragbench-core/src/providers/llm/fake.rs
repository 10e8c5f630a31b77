use super::LlmClient;
use crate::errors::RunError;
use crate::model::{Generation, RequestDescriptor};
use async_trait::async_trait;

#[derive(Debug, Clone)]
enum Mode {
    Echo,
    Fixed(String),
}

/// Offline client for dry runs and tests.
#[derive(Debug, Clone)]
pub struct FakeClient {
    mode: Mode,
}

impl FakeClient {
    /// Answers with the ground truth when the request carries one, otherwise
    /// echoes the prompt.
    pub fn echo() -> Self {
        Self { mode: Mode::Echo }
    }

    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            mode: Mode::Fixed(response.into()),
        }
    }

    pub fn judge_fixed(score: f64, explanation: &str) -> Self {
        Self::with_response(
            serde_json::json!({ "score": score, "explanation": explanation }).to_string(),
        )
    }
}

#[async_trait]
impl LlmClient for FakeClient {
    async fn execute(&self, request: &RequestDescriptor) -> Result<Generation, RunError> {
        let text = match &self.mode {
            Mode::Echo => request
                .ground_truth()
                .unwrap_or_else(|| request.prompt_text().to_string()),
            Mode::Fixed(text) => text.clone(),
        };
        let output_tokens = text.split_whitespace().count() as u64;
        Ok(Generation {
            text,
            input_tokens: Some(request.prompt_text().split_whitespace().count() as u64),
            output_tokens: Some(output_tokens),
            ttft_s: None,
        })
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}
