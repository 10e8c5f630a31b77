use crate::errors::RunError;
use crate::model::SamplingParams;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How each worker client reaches the serving backend.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BackendConfig {
    /// "openai" (any OpenAI-compatible endpoint) or "fake" (offline echo).
    pub provider: String,
    pub base_url: String,
    /// Name of the environment variable holding the API key, if any.
    pub api_key_env: Option<String>,
    /// Client-side bound for a single attempt. Keeps a hung backend from
    /// stalling a cohort past the run deadline.
    pub request_timeout_s: u64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub max_tokens: Option<u32>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: "http://localhost:8000/v1".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            request_timeout_s: 60,
            max_attempts: 10,
            retry_backoff_ms: 250,
            max_tokens: None,
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_s.max(1))
    }

    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|k| !k.is_empty())
    }
}

/// Prometheus range queries sampled once per run for energy accounting.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EnergyConfig {
    pub prometheus_url: String,
    #[serde(default = "default_step_s")]
    pub step_s: u64,
    /// Output suffix → PromQL expression.
    pub queries: BTreeMap<String, String>,
}

fn default_step_s() -> u64 {
    1
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    pub model: String,
    pub llm_api: String,
    pub num_concurrent_requests: usize,
    #[serde(alias = "timeout")]
    pub timeout_s: u64,
    pub warmup_input_dir: Option<PathBuf>,
    pub prod_input_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub treatment_id: String,
    pub rerun: bool,
    pub additional_sampling_params: SamplingParams,
    pub backend: BackendConfig,
    pub energy: Option<EnergyConfig>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            llm_api: "RAG".to_string(),
            num_concurrent_requests: 1,
            timeout_s: 90,
            warmup_input_dir: None,
            prod_input_dir: None,
            output_dir: PathBuf::from("results"),
            treatment_id: "1".to_string(),
            rerun: false,
            additional_sampling_params: SamplingParams::new(),
            backend: BackendConfig::default(),
            energy: None,
        }
    }
}

impl BenchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s)
    }

    pub fn validate(&self) -> Result<(), RunError> {
        if self.model.trim().is_empty() {
            return Err(RunError::invalid_args("model must be set (--model)"));
        }
        if self.num_concurrent_requests == 0 {
            return Err(RunError::invalid_args(
                "num_concurrent_requests must be at least 1",
            ));
        }
        if self.timeout_s == 0 {
            return Err(RunError::invalid_args("timeout must be greater than 0"));
        }
        if self.warmup_input_dir.is_none() && self.prod_input_dir.is_none() {
            return Err(RunError::invalid_args(
                "at least one of warmup_input_dir / prod_input_dir is required",
            ));
        }
        validate_backend(&self.backend)
    }
}

/// Previous run's (responses, accuracies) pair used to seed the score cache.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScoreCacheSource {
    pub response_file: PathBuf,
    pub accuracy_file: PathBuf,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct JudgeConfig {
    pub model: String,
    pub llm_api: String,
    pub num_concurrent_requests: usize,
    pub input_dir: PathBuf,
    /// Defaults to the directory of each responses file.
    pub output_dir: Option<PathBuf>,
    pub file_suffix: String,
    pub cache: Option<ScoreCacheSource>,
    pub backend: BackendConfig,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            llm_api: "openai".to_string(),
            num_concurrent_requests: 1,
            input_dir: PathBuf::from("results"),
            output_dir: None,
            file_suffix: "_prod_responses.json".to_string(),
            cache: None,
            backend: BackendConfig::default(),
        }
    }
}

impl JudgeConfig {
    pub fn validate(&self) -> Result<(), RunError> {
        if self.model.trim().is_empty() {
            return Err(RunError::invalid_args("judge model must be set (--model)"));
        }
        if self.num_concurrent_requests == 0 {
            return Err(RunError::invalid_args(
                "num_concurrent_requests must be at least 1",
            ));
        }
        if !self.file_suffix.contains("responses") {
            return Err(RunError::invalid_args(format!(
                "file_suffix '{}' must contain 'responses' so accuracy files get a distinct name",
                self.file_suffix
            )));
        }
        validate_backend(&self.backend)
    }
}

fn validate_backend(backend: &BackendConfig) -> Result<(), RunError> {
    if backend.max_attempts == 0 {
        return Err(RunError::invalid_args("backend.max_attempts must be at least 1"));
    }
    match backend.provider.as_str() {
        "openai" | "fake" => Ok(()),
        other => Err(RunError::invalid_args(format!(
            "unknown backend provider '{}' (expected openai|fake)",
            other
        ))),
    }
}

/// Load a JSON or YAML config file; the extension picks the format.
pub fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T, RunError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            RunError::missing_config(path.display().to_string(), e.to_string())
        } else {
            RunError::config_parse(
                Some(path.display().to_string()),
                format!("failed to read config: {}", e),
            )
        }
    })?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let parsed = if is_json {
        serde_json::from_str(&raw).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str(&raw).map_err(|e| format!("failed to parse YAML: {}", e))
    };
    parsed.map_err(|detail| RunError::config_parse(Some(path.display().to_string()), detail))
}
