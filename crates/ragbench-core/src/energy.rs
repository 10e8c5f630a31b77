use crate::config::EnergyConfig;
use crate::errors::{BenchError, RunError};
use crate::report::sink::write_json;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Samples power/energy counters for a finished run window.
#[async_trait]
pub trait EnergyCollector: Send + Sync {
    /// Writes one file per sample series next to `base` and returns their paths.
    async fn collect(&self, start: f64, end: f64, base: &Path) -> Result<Vec<PathBuf>, BenchError>;
}

pub struct NoopEnergyCollector;

#[async_trait]
impl EnergyCollector for NoopEnergyCollector {
    async fn collect(&self, _start: f64, _end: f64, _base: &Path) -> Result<Vec<PathBuf>, BenchError> {
        Ok(Vec::new())
    }
}

/// Runs each configured PromQL expression as a range query over the run
/// window and stores the raw response.
pub struct PrometheusEnergyCollector {
    config: EnergyConfig,
    client: reqwest::Client,
}

impl PrometheusEnergyCollector {
    pub fn new(config: EnergyConfig) -> Result<Self, RunError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RunError::other(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/api/v1/query_range",
            self.config.prometheus_url.trim_end_matches('/')
        )
    }

    async fn query_range(&self, expr: &str, start: f64, end: f64) -> Result<serde_json::Value, RunError> {
        let provider = Some("prometheus".to_string());
        let resp = self
            .client
            .get(self.endpoint())
            .query(&[
                ("query", expr.to_string()),
                ("start", format!("{:.3}", start)),
                ("end", format!("{:.3}", end)),
                ("step", format!("{}s", self.config.step_s.max(1))),
            ])
            .send()
            .await
            .map_err(|e| RunError::network(provider.clone(), e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RunError::from_status(status.as_u16(), provider, body));
        }
        resp.json()
            .await
            .map_err(|e| RunError::provider_server(Some(status.as_u16()), provider, e.to_string()))
    }
}

#[async_trait]
impl EnergyCollector for PrometheusEnergyCollector {
    async fn collect(&self, start: f64, end: f64, base: &Path) -> Result<Vec<PathBuf>, BenchError> {
        let mut written = Vec::with_capacity(self.config.queries.len());
        for (name, expr) in &self.config.queries {
            let samples = self.query_range(expr, start, end).await?;
            let path = PathBuf::from(format!("{}_{}.json", base.display(), name));
            write_json(&path, &samples)?;
            written.push(path);
        }
        Ok(written)
    }
}

pub fn collector_from_config(config: Option<&EnergyConfig>) -> Result<Arc<dyn EnergyCollector>, RunError> {
    Ok(match config {
        Some(cfg) if !cfg.queries.is_empty() => Arc::new(PrometheusEnergyCollector::new(cfg.clone())?),
        _ => Arc::new(NoopEnergyCollector),
    })
}

/// Fire-and-forget: failures are logged and never reach the caller.
pub async fn collect_energy(collector: &dyn EnergyCollector, start: f64, end: f64, base: &Path) {
    match collector.collect(start, end, base).await {
        Ok(files) if !files.is_empty() => {
            tracing::info!(files = files.len(), base = %base.display(), "energy samples written");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(base = %base.display(), "energy collection failed: {}", e),
    }
}
