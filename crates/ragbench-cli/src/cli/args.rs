use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ragbench",
    version,
    about = "Latency, energy and accuracy benchmarks for RAG serving backends"
)]
pub struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, env = "RAGBENCH_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run one treatment: warmup job, then prod job
    Bench(BenchArgs),
    /// Score prod responses against their ground truth
    Judge(JudgeArgs),
    Version,
}

/// Backend overrides shared by both commands.
#[derive(Args, Clone, Debug, Default)]
pub struct BackendArgs {
    /// openai (any OpenAI-compatible endpoint) or fake (offline)
    #[arg(long, env = "RAGBENCH_BACKEND")]
    pub backend: Option<String>,

    /// Base URL of the OpenAI-compatible API, e.g. http://localhost:8000/v1
    #[arg(long, env = "RAGBENCH_BASE_URL")]
    pub base_url: Option<String>,

    /// Per-attempt client timeout in seconds
    #[arg(long)]
    pub request_timeout: Option<u64>,

    /// Attempts per request, transient failures only
    #[arg(long)]
    pub max_attempts: Option<u32>,
}

#[derive(Args, Clone, Debug, Default)]
pub struct BenchArgs {
    /// JSON or YAML run configuration; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// The model to use for this load test
    #[arg(long)]
    pub model: Option<String>,

    /// Number of concurrent requests (also the cohort size)
    #[arg(long)]
    pub num_concurrent_requests: Option<usize>,

    /// Seconds before no new cohort is started
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Warmup dataset (file or directory of .jsonl / .jsonl.gz)
    #[arg(long)]
    pub warmup_input_dir: Option<PathBuf>,

    /// Prod dataset (file or directory of .jsonl / .jsonl.gz)
    #[arg(long)]
    pub prod_input_dir: Option<PathBuf>,

    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Logical API flavor recorded with every request
    #[arg(long)]
    pub llm_api: Option<String>,

    /// Used in output file names: {model}_batch_{treatment_id}_{phase}
    #[arg(long)]
    pub treatment_id: Option<String>,

    /// Run jobs even when a clean previous result exists
    #[arg(long)]
    pub rerun: bool,

    /// JSON object merged into every request body
    #[arg(long)]
    pub additional_sampling_params: Option<String>,

    #[command(flatten)]
    pub backend: BackendArgs,

    #[arg(long)]
    pub no_progress: bool,
}

#[derive(Args, Clone, Debug, Default)]
pub struct JudgeArgs {
    /// JSON or YAML judge configuration; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Judge model identifier, e.g. gpt-4o-mini
    #[arg(long, env = "RAGBENCH_JUDGE_MODEL")]
    pub model: Option<String>,

    #[arg(long)]
    pub num_concurrent_requests: Option<usize>,

    /// Directory holding the responses files to judge
    #[arg(long)]
    pub input_dir: Option<PathBuf>,

    /// Where accuracies files go; defaults to each input file's directory
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    #[arg(long)]
    pub llm_api: Option<String>,

    /// Only files ending in this suffix are judged
    #[arg(long)]
    pub file_suffix: Option<String>,

    /// Responses file of a previous judged run (score cache)
    #[arg(long, requires = "cache_accuracies")]
    pub cache_responses: Option<PathBuf>,

    /// Accuracies file judged from --cache-responses
    #[arg(long, requires = "cache_responses")]
    pub cache_accuracies: Option<PathBuf>,

    #[command(flatten)]
    pub backend: BackendArgs,

    #[arg(long)]
    pub no_progress: bool,
}
