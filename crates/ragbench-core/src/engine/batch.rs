use super::driver::BenchmarkDriver;
use super::launcher::RequestLauncher;
use super::pool::WorkerPool;
use super::retry::RetryPolicy;
use super::unix_now;
use crate::config::BenchConfig;
use crate::dataset::load_data;
use crate::energy::{collect_energy, collector_from_config, EnergyCollector};
use crate::errors::{BenchError, RunError};
use crate::providers::llm::{construct_clients, ClientRole, LlmClient};
use crate::report::progress::ProgressSink;
use crate::report::sink::{JsonDirSink, ResultSink};
use crate::report::summary::{RunInfo, RunTally, SummaryMetrics};
use std::path::Path;
use std::sync::Arc;

/// Builds `n` fresh clients for one job's worker pool.
pub type ClientFactory =
    Arc<dyn Fn(usize) -> Result<Vec<Arc<dyn LlmClient>>, RunError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Warmup,
    Prod,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Warmup => "warmup",
            Phase::Prod => "prod",
        }
    }
}

#[derive(Debug)]
pub enum JobStatus {
    /// A clean result from an earlier run was found.
    Skipped,
    /// Nothing completed (empty dataset, or the deadline passed before the
    /// first cohort); a zero summary was written and the job stays eligible
    /// for the next run.
    NoWork,
    Completed(SummaryMetrics),
}

#[derive(Debug)]
pub struct JobReport {
    pub phase: Phase,
    pub base_name: String,
    pub status: JobStatus,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub jobs: Vec<JobReport>,
}

impl BatchReport {
    pub fn total_errors(&self) -> usize {
        self.jobs
            .iter()
            .map(|j| match &j.status {
                JobStatus::Completed(s) => s.num_errors,
                _ => 0,
            })
            .sum()
    }
}

/// One treatment: a warmup job followed by a prod job, each against its own
/// freshly built worker pool.
pub struct BatchRunner {
    config: BenchConfig,
    clients: ClientFactory,
    sink: Arc<dyn ResultSink>,
    energy: Arc<dyn EnergyCollector>,
    progress: Option<ProgressSink>,
}

impl BatchRunner {
    pub fn from_config(config: BenchConfig) -> Result<Self, BenchError> {
        config.validate()?;
        let backend = config.backend.clone();
        let clients: ClientFactory =
            Arc::new(move |n| construct_clients(&backend, ClientRole::Generate, n));
        let sink: Arc<dyn ResultSink> = Arc::new(JsonDirSink::new(&config.output_dir)?);
        let energy = collector_from_config(config.energy.as_ref())?;
        Ok(Self {
            config,
            clients,
            sink,
            energy,
            progress: None,
        })
    }

    pub fn with_clients(mut self, clients: ClientFactory) -> Self {
        self.clients = clients;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_energy(mut self, energy: Arc<dyn EnergyCollector>) -> Self {
        self.energy = energy;
        self
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = Some(progress);
        self
    }

    /// `{model}_batch_{treatment}_{phase}`; a `/` in the model id becomes `_`
    /// so the artifacts stay in the output directory.
    pub fn base_name(&self, phase: Phase) -> String {
        format!(
            "{}_batch_{}_{}",
            self.config.model.replace('/', "_"),
            self.config.treatment_id,
            phase.as_str()
        )
    }

    fn run_info(&self) -> RunInfo {
        RunInfo {
            model: self.config.model.clone(),
            llm_api: self.config.llm_api.clone(),
            num_concurrent_requests: self.config.num_concurrent_requests,
            additional_sampling_params: self.config.additional_sampling_params.clone(),
        }
    }

    pub async fn run(&self) -> Result<BatchReport, BenchError> {
        let mut report = BatchReport::default();
        let jobs = [
            (Phase::Warmup, self.config.warmup_input_dir.as_deref()),
            (Phase::Prod, self.config.prod_input_dir.as_deref()),
        ];
        for (phase, input) in jobs {
            match input {
                Some(path) => report.jobs.push(self.run_job(phase, path).await?),
                None => tracing::info!(phase = phase.as_str(), "no input configured, skipping job"),
            }
        }
        Ok(report)
    }

    async fn run_job(&self, phase: Phase, input: &Path) -> Result<JobReport, BenchError> {
        let base_name = self.base_name(phase);
        if !self.config.rerun && self.sink.job_complete(&base_name)? {
            tracing::info!(job = %base_name, "previous run is clean, skipping");
            return Ok(JobReport {
                phase,
                base_name,
                status: JobStatus::Skipped,
            });
        }

        let dataset = load_data(input)?;
        let clients = (self.clients)(self.config.num_concurrent_requests)?;
        let pool = WorkerPool::new(clients, RetryPolicy::from_backend(&self.config.backend))?;
        let mut driver = BenchmarkDriver::new(
            RequestLauncher::new(pool),
            self.run_info(),
            self.config.timeout(),
        );
        if let Some(progress) = &self.progress {
            driver = driver.with_progress(progress.clone());
        }

        tracing::info!(job = %base_name, phase = phase.as_str(), "running job");
        let attempt_start = unix_now();
        let outcome = driver.run(&dataset).await;
        driver.shutdown().await;

        let (summary, results, status) = match outcome {
            Ok(out) => {
                let status = JobStatus::Completed(out.summary.clone());
                (out.summary, out.results, status)
            }
            Err(e) if e.is_no_work() => {
                tracing::warn!(job = %base_name, "{}", e);
                let tally = match e {
                    BenchError::NoCompletedRequests { tally } => tally,
                    _ => RunTally {
                        start_time: attempt_start,
                        end_time: unix_now(),
                        ..Default::default()
                    },
                };
                (
                    SummaryMetrics::zeroed(&self.run_info(), tally),
                    Vec::new(),
                    JobStatus::NoWork,
                )
            }
            Err(e) => return Err(e),
        };

        let summary_path = self.sink.write_summary(&base_name, &summary)?;
        self.sink.write_responses(&base_name, &results)?;
        tracing::info!(
            job = %base_name,
            file = %summary_path.display(),
            completed = summary.num_completed_requests,
            errors = summary.num_errors,
            error_rate = summary.error_rate,
            mismatch_rate = summary.mismatch_rate,
            "job summary written"
        );

        collect_energy(
            self.energy.as_ref(),
            summary.start_time,
            summary.end_time,
            &self.sink.energy_base(&base_name),
        )
        .await;

        Ok(JobReport {
            phase,
            base_name,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn config(out: PathBuf, warmup: Option<PathBuf>, prod: Option<PathBuf>) -> BenchConfig {
        BenchConfig {
            model: "org/llama3".into(),
            num_concurrent_requests: 2,
            warmup_input_dir: warmup,
            prod_input_dir: prod,
            output_dir: out,
            treatment_id: "t1".into(),
            backend: BackendConfig {
                provider: "fake".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn write_dataset(path: &Path, n: usize) {
        let lines: Vec<String> = (0..n)
            .map(|i| format!("{{\"query\": \"q{}\", \"answer\": \"a{}\"}}", i, i))
            .collect();
        std::fs::write(path, lines.join("\n")).unwrap();
    }

    #[tokio::test]
    async fn warmup_then_prod_write_artifacts() {
        let tmp = tempdir().unwrap();
        let warmup = tmp.path().join("warmup.jsonl");
        let prod = tmp.path().join("prod.jsonl");
        write_dataset(&warmup, 2);
        write_dataset(&prod, 3);
        let out = tmp.path().join("results");

        let runner = BatchRunner::from_config(config(out.clone(), Some(warmup), Some(prod))).unwrap();
        assert_eq!(runner.base_name(Phase::Prod), "org_llama3_batch_t1_prod");
        let report = runner.run().await.unwrap();

        assert_eq!(report.jobs.len(), 2);
        assert_eq!(report.jobs[0].phase, Phase::Warmup);
        assert_eq!(report.total_errors(), 0);
        assert!(out.join("org_llama3_batch_t1_warmup_summary.json").exists());
        let responses: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(out.join("org_llama3_batch_t1_prod_responses.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(responses.as_array().unwrap().len(), 3);
        assert_eq!(responses[0]["request_config"]["metadata"]["answer"], "a0");
    }

    #[tokio::test]
    async fn clean_previous_run_is_skipped_unless_rerun() {
        let tmp = tempdir().unwrap();
        let prod = tmp.path().join("prod.jsonl");
        write_dataset(&prod, 1);
        let out = tmp.path().join("results");
        let cfg = config(out, None, Some(prod));

        BatchRunner::from_config(cfg.clone()).unwrap().run().await.unwrap();
        let again = BatchRunner::from_config(cfg.clone()).unwrap().run().await.unwrap();
        assert!(matches!(again.jobs[0].status, JobStatus::Skipped));

        let forced = BatchRunner::from_config(BenchConfig { rerun: true, ..cfg })
            .unwrap()
            .run()
            .await
            .unwrap();
        assert!(matches!(forced.jobs[0].status, JobStatus::Completed(_)));
    }

    #[tokio::test]
    async fn empty_dataset_writes_zero_summary_and_continues() {
        let tmp = tempdir().unwrap();
        let warmup = tmp.path().join("empty.jsonl");
        std::fs::write(&warmup, "").unwrap();
        let prod = tmp.path().join("prod.jsonl");
        write_dataset(&prod, 2);
        let out = tmp.path().join("results");

        let report = BatchRunner::from_config(config(out.clone(), Some(warmup), Some(prod)))
            .unwrap()
            .run()
            .await
            .unwrap();
        assert!(matches!(report.jobs[0].status, JobStatus::NoWork));
        assert!(matches!(report.jobs[1].status, JobStatus::Completed(_)));
        assert_eq!(
            std::fs::read_to_string(out.join("org_llama3_batch_t1_warmup_responses.json")).unwrap(),
            "[]"
        );
    }

    #[tokio::test]
    async fn empty_job_is_not_skipped_on_the_next_run() {
        let tmp = tempdir().unwrap();
        let prod = tmp.path().join("prod.jsonl");
        std::fs::write(&prod, "").unwrap();
        let cfg = config(tmp.path().join("results"), None, Some(prod.clone()));

        let first = BatchRunner::from_config(cfg.clone()).unwrap().run().await.unwrap();
        assert!(matches!(first.jobs[0].status, JobStatus::NoWork));

        let second = BatchRunner::from_config(cfg.clone()).unwrap().run().await.unwrap();
        assert!(matches!(second.jobs[0].status, JobStatus::NoWork));

        write_dataset(&prod, 2);
        let third = BatchRunner::from_config(cfg).unwrap().run().await.unwrap();
        assert!(matches!(third.jobs[0].status, JobStatus::Completed(ref s) if s.num_completed_requests == 2));
    }

    struct Unauthorized;

    #[async_trait::async_trait]
    impl LlmClient for Unauthorized {
        async fn execute(
            &self,
            _request: &crate::model::RequestDescriptor,
        ) -> Result<crate::model::Generation, RunError> {
            Err(RunError::auth(401, Some("test".into()), "bad key"))
        }

        fn provider_name(&self) -> &'static str {
            "test"
        }
    }

    #[derive(Default)]
    struct RecordingEnergy {
        bases: std::sync::Mutex<Vec<PathBuf>>,
    }

    #[async_trait::async_trait]
    impl EnergyCollector for RecordingEnergy {
        async fn collect(&self, start: f64, end: f64, base: &Path) -> Result<Vec<PathBuf>, BenchError> {
            assert!(end >= start);
            self.bases.lock().unwrap().push(base.to_path_buf());
            Err(BenchError::Run(RunError::other("prometheus down")))
        }
    }

    #[tokio::test]
    async fn errored_job_is_reported_and_energy_failure_is_ignored() {
        let tmp = tempdir().unwrap();
        let prod = tmp.path().join("prod.jsonl");
        write_dataset(&prod, 3);
        let out = tmp.path().join("elsewhere");
        let energy = Arc::new(RecordingEnergy::default());
        let clients: ClientFactory = Arc::new(|n: usize| {
            Ok((0..n)
                .map(|_| Arc::new(Unauthorized) as Arc<dyn LlmClient>)
                .collect())
        });

        let cfg = config(tmp.path().join("results"), None, Some(prod));
        let report = BatchRunner::from_config(cfg)
            .unwrap()
            .with_clients(clients)
            .with_sink(Arc::new(JsonDirSink::new(&out).unwrap()))
            .with_energy(energy.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(report.total_errors(), 3);
        assert!(out.join("org_llama3_batch_t1_prod_summary.json").exists());
        let bases = energy.bases.lock().unwrap();
        assert_eq!(bases.len(), 1);
        assert!(bases[0].starts_with(&out));
    }

    #[tokio::test]
    async fn missing_dataset_fails_the_batch() {
        let tmp = tempdir().unwrap();
        let cfg = config(
            tmp.path().join("results"),
            None,
            Some(tmp.path().join("nope.jsonl")),
        );
        let err = BatchRunner::from_config(cfg).unwrap().run().await.unwrap_err();
        assert!(matches!(err, BenchError::Run(ref e) if e.kind == crate::errors::RunErrorKind::DatasetNotFound));
    }
}
