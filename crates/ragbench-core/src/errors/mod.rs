use crate::report::RunTally;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunErrorKind {
    MissingConfig,
    ConfigParse,
    InvalidArgs,
    DatasetNotFound,
    DatasetParse,
    ProviderRateLimit,
    ProviderTimeout,
    ProviderServer,
    Network,
    Auth,
    MalformedRequest,
    JudgeOutput,
    Other,
}

impl RunErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunErrorKind::MissingConfig => "missing_config",
            RunErrorKind::ConfigParse => "config_parse",
            RunErrorKind::InvalidArgs => "invalid_args",
            RunErrorKind::DatasetNotFound => "dataset_not_found",
            RunErrorKind::DatasetParse => "dataset_parse",
            RunErrorKind::ProviderRateLimit => "provider_rate_limit",
            RunErrorKind::ProviderTimeout => "provider_timeout",
            RunErrorKind::ProviderServer => "provider_server",
            RunErrorKind::Network => "network",
            RunErrorKind::Auth => "auth",
            RunErrorKind::MalformedRequest => "malformed_request",
            RunErrorKind::JudgeOutput => "judge_output",
            RunErrorKind::Other => "other",
        }
    }
}

/// Structured failure shared by clients, loaders and config parsing.
///
/// Transient kinds (rate limit, timeout, connection) are retried by the
/// client retry policy; every other kind is fatal for the item it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RunError {
    pub kind: RunErrorKind,
    pub message: String,
    pub path: Option<String>,
    pub status: Option<u16>,
    pub provider: Option<String>,
    pub detail: Option<String>,
}

impl RunError {
    pub fn new(kind: RunErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            path: None,
            status: None,
            provider: None,
            detail: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            RunErrorKind::ProviderRateLimit | RunErrorKind::ProviderTimeout | RunErrorKind::Network
        )
    }

    pub fn missing_config(path: impl Into<String>, detail: impl Into<String>) -> Self {
        let path = path.into();
        let detail = detail.into();
        Self::new(
            RunErrorKind::MissingConfig,
            format!("Config file not found: {}", path),
        )
        .with_path(path)
        .with_detail(detail)
    }

    pub fn config_parse(path: Option<String>, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let mut err = Self::new(
            RunErrorKind::ConfigParse,
            format!("config error: {}", detail),
        )
        .with_detail(detail);
        if let Some(path) = path {
            err = err.with_path(path);
        }
        err
    }

    pub fn invalid_args(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self::new(
            RunErrorKind::InvalidArgs,
            format!("invalid argument: {}", detail),
        )
        .with_detail(detail)
    }

    pub fn dataset_not_found(path: impl Into<String>, detail: impl Into<String>) -> Self {
        let path = path.into();
        let detail = detail.into();
        Self::new(
            RunErrorKind::DatasetNotFound,
            format!("Dataset not found: {}", path),
        )
        .with_path(path)
        .with_detail(detail)
    }

    pub fn dataset_parse(path: impl Into<String>, line: usize, detail: impl Into<String>) -> Self {
        let path = path.into();
        let detail = detail.into();
        Self::new(
            RunErrorKind::DatasetParse,
            format!("Failed to parse dataset {} (line {}): {}", path, line, detail),
        )
        .with_path(path)
        .with_detail(detail)
    }

    pub fn provider_rate_limit(
        status: u16,
        provider: Option<String>,
        detail: impl Into<String>,
    ) -> Self {
        let detail = detail.into();
        let mut err = Self::new(
            RunErrorKind::ProviderRateLimit,
            format!("rate limited: {}", detail),
        )
        .with_status(status)
        .with_detail(detail);
        if let Some(provider) = provider {
            err = err.with_provider(provider);
        }
        err
    }

    pub fn provider_timeout(provider: Option<String>, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let mut err = Self::new(
            RunErrorKind::ProviderTimeout,
            format!("request timeout: {}", detail),
        )
        .with_detail(detail);
        if let Some(provider) = provider {
            err = err.with_provider(provider);
        }
        err
    }

    pub fn provider_server(
        status: Option<u16>,
        provider: Option<String>,
        detail: impl Into<String>,
    ) -> Self {
        let detail = detail.into();
        let mut err = Self::new(
            RunErrorKind::ProviderServer,
            format!("provider error: {}", detail),
        )
        .with_detail(detail);
        if let Some(status) = status {
            err = err.with_status(status);
        }
        if let Some(provider) = provider {
            err = err.with_provider(provider);
        }
        err
    }

    pub fn network(provider: Option<String>, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let mut err = Self::new(
            RunErrorKind::Network,
            format!("connection error: {}", detail),
        )
        .with_detail(detail);
        if let Some(provider) = provider {
            err = err.with_provider(provider);
        }
        err
    }

    pub fn auth(status: u16, provider: Option<String>, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let mut err = Self::new(
            RunErrorKind::Auth,
            format!("authentication failed: {}", detail),
        )
        .with_status(status)
        .with_detail(detail);
        if let Some(provider) = provider {
            err = err.with_provider(provider);
        }
        err
    }

    pub fn malformed_request(
        status: Option<u16>,
        provider: Option<String>,
        detail: impl Into<String>,
    ) -> Self {
        let detail = detail.into();
        let mut err = Self::new(
            RunErrorKind::MalformedRequest,
            format!("malformed request: {}", detail),
        )
        .with_detail(detail);
        if let Some(status) = status {
            err = err.with_status(status);
        }
        if let Some(provider) = provider {
            err = err.with_provider(provider);
        }
        err
    }

    pub fn judge_output(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self::new(
            RunErrorKind::JudgeOutput,
            format!("judge output unusable: {}", detail),
        )
        .with_detail(detail)
    }

    pub fn other(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self::new(RunErrorKind::Other, detail.clone()).with_detail(detail)
    }

    /// Map an HTTP status returned by a backend onto the error taxonomy.
    pub fn from_status(status: u16, provider: Option<String>, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            429 => Self::provider_rate_limit(status, provider, body),
            401 | 403 => Self::auth(status, provider, body),
            408 => Self::provider_timeout(provider, body).with_status(status),
            400 | 404 | 413 | 422 => Self::malformed_request(Some(status), provider, body),
            s if s >= 500 => Self::provider_server(Some(s), provider, body),
            s => Self::other(format!("unexpected status {}: {}", s, body)).with_status(s),
        }
    }
}

/// Orchestration-level failures of a benchmark or judge run.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("no work: dataset '{dataset}' is empty, nothing to measure")]
    NoWork { dataset: String },

    /// Nothing finished, typically because the deadline passed before the
    /// first cohort. `tally` is what the driver counted up to that point.
    #[error("no completed requests: rates are undefined for an empty run")]
    NoCompletedRequests { tally: RunTally },

    #[error("invalid concurrency {0}: the worker pool needs at least one client")]
    InvalidConcurrency(usize),

    #[error("worker pool closed with {missing} request(s) of the current cohort outstanding")]
    PoolClosed { missing: usize },

    #[error("failed to write {path}: {source}")]
    Sink {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Run(#[from] RunError),
}

impl BenchError {
    pub fn is_no_work(&self) -> bool {
        matches!(self, BenchError::NoWork { .. } | BenchError::NoCompletedRequests { .. })
    }
}
