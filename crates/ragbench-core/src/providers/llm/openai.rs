use super::{ClientRole, LlmClient};
use crate::config::BackendConfig;
use crate::errors::RunError;
use crate::judge::prompt::JUDGE_SYSTEM_PROMPT;
use crate::model::{Generation, RequestDescriptor};
use async_trait::async_trait;
use serde_json::json;

const PROVIDER: &str = "openai";

/// Client for any endpoint speaking the OpenAI chat-completions protocol
/// (vLLM, the RAG chat backend, or OpenAI itself for judging).
pub struct OpenAIClient {
    pub base_url: String,
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    pub role: ClientRole,
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn from_config(backend: &BackendConfig, role: ClientRole) -> Result<Self, RunError> {
        let client = reqwest::Client::builder()
            .timeout(backend.request_timeout())
            .build()
            .map_err(|e| RunError::other(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: backend.base_url.trim_end_matches('/').to_string(),
            api_key: backend.api_key(),
            max_tokens: backend.max_tokens,
            role,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_body(&self, request: &RequestDescriptor) -> serde_json::Value {
        let mut messages = Vec::new();
        if self.role == ClientRole::Judge {
            messages.push(json!({ "role": "system", "content": JUDGE_SYSTEM_PROMPT }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt_text() }));

        let mut body = serde_json::Map::new();
        body.insert("model".into(), json!(request.model));
        body.insert("messages".into(), json!(messages));
        if let Some(max_tokens) = self.max_tokens {
            body.insert("max_tokens".into(), json!(max_tokens));
        }
        for (k, v) in &request.sampling_params {
            body.insert(k.clone(), v.clone());
        }
        if self.role == ClientRole::Judge {
            body.insert("response_format".into(), json!({ "type": "json_object" }));
            body.insert("temperature".into(), json!(0.0));
        }
        serde_json::Value::Object(body)
    }
}

fn map_transport_error(err: reqwest::Error) -> RunError {
    let provider = Some(PROVIDER.to_string());
    if err.is_timeout() {
        RunError::provider_timeout(provider, err.to_string())
    } else if err.is_connect() || err.is_request() {
        RunError::network(provider, err.to_string())
    } else if let Some(status) = err.status() {
        RunError::from_status(status.as_u16(), provider, err.to_string())
    } else {
        RunError::other(format!("OpenAI transport error: {}", err)).with_provider(PROVIDER)
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn execute(&self, request: &RequestDescriptor) -> Result<Generation, RunError> {
        let body = self.build_body(request);

        let mut req = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.map_err(map_transport_error)?;
        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            return Err(RunError::from_status(
                status.as_u16(),
                Some(PROVIDER.to_string()),
                error_text,
            ));
        }

        let json: serde_json::Value = resp.json().await.map_err(map_transport_error)?;

        let text = json
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                RunError::provider_server(
                    Some(status.as_u16()),
                    Some(PROVIDER.to_string()),
                    "response missing choices[0].message.content",
                )
            })?
            .to_string();

        Ok(Generation {
            text,
            input_tokens: json.pointer("/usage/prompt_tokens").and_then(|v| v.as_u64()),
            output_tokens: json
                .pointer("/usage/completion_tokens")
                .and_then(|v| v.as_u64()),
            ttft_s: None,
        })
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}
