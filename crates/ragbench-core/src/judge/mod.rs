pub mod cache;
pub mod parse;
pub mod prompt;
pub mod rules;

pub use cache::{CachedScore, ScoreCache};
pub use rules::{classify, Candidate, Classification, Score};

use crate::config::JudgeConfig;
use crate::engine::{RequestLauncher, RetryPolicy, WorkerPool};
use crate::errors::{BenchError, RunError};
use crate::model::{normalize_answer, CompletedRequest, RequestDescriptor, SamplingParams, Ticket};
use crate::providers::llm::{construct_clients, ClientRole};
use crate::report::progress::{self, ProgressSink};
use crate::report::sink::{JsonDirSink, ResultSink};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Which step produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    Cache,
    Refusal,
    ExactMatch,
    MutualAbstain,
    OneSidedAbstain,
    Judge,
    Unscored,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Scored {
        score: Score,
        explanation: String,
        source: VerdictSource,
    },
    /// No score could be obtained. Never replaced by a guessed number.
    Unscored { reason: String },
}

/// One entry of an accuracies file. `score` is `null` for unscored answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyRecord {
    pub score: Option<Score>,
    pub explanation: String,
    pub request_config: RequestDescriptor,
    pub source: VerdictSource,
}

impl AccuracyRecord {
    pub fn new(verdict: Verdict, request_config: RequestDescriptor) -> Self {
        match verdict {
            Verdict::Scored {
                score,
                explanation,
                source,
            } => Self {
                score: Some(score),
                explanation,
                request_config,
                source,
            },
            Verdict::Unscored { reason } => Self {
                score: None,
                explanation: reason,
                request_config,
                source: VerdictSource::Unscored,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JudgeReport {
    pub files: usize,
    pub total: usize,
    pub cache_hits: usize,
    pub rule_hits: usize,
    pub judge_calls: usize,
    pub scored: usize,
    pub unscored: usize,
}

impl JudgeReport {
    pub fn merge(&mut self, other: &JudgeReport) {
        self.files += other.files;
        self.total += other.total;
        self.cache_hits += other.cache_hits;
        self.rule_hits += other.rule_hits;
        self.judge_calls += other.judge_calls;
        self.scored += other.scored;
        self.unscored += other.unscored;
    }

    fn record(&mut self, record: &AccuracyRecord) {
        self.total += 1;
        match record.source {
            VerdictSource::Cache => self.cache_hits += 1,
            VerdictSource::Judge | VerdictSource::Unscored => {}
            _ => self.rule_hits += 1,
        }
        if record.score.is_some() {
            self.scored += 1;
        } else {
            self.unscored += 1;
        }
    }
}

/// Request shape of judge calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JudgeSettings {
    pub model: String,
    pub llm_api: String,
    pub sampling_params: SamplingParams,
}

impl From<&JudgeConfig> for JudgeSettings {
    fn from(cfg: &JudgeConfig) -> Self {
        Self {
            model: cfg.model.clone(),
            llm_api: cfg.llm_api.clone(),
            sampling_params: SamplingParams::new(),
        }
    }
}

/// `<stem with responses → accuracies><ext>`, e.g.
/// `m_batch_1_prod_responses.json` → `m_batch_1_prod_accuracies.json`.
pub fn accuracy_filename(responses_file: &Path) -> Result<String, RunError> {
    let stem = responses_file
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| {
            RunError::invalid_args(format!("not a file name: {}", responses_file.display()))
        })?;
    let ext = responses_file
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    Ok(format!("{}{}", stem.replace("responses", "accuracies"), ext))
}

/// Files in `dir` whose name ends with `suffix`, sorted by name.
pub fn find_response_files(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>, RunError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| RunError::dataset_not_found(dir.display().to_string(), e.to_string()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| RunError::dataset_not_found(dir.display().to_string(), e.to_string()))?
            .path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(suffix));
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read_responses(path: &Path) -> Result<Vec<CompletedRequest>, RunError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| RunError::dataset_not_found(path.display().to_string(), e.to_string()))?;
    serde_json::from_str(&raw)
        .map_err(|e| RunError::dataset_parse(path.display().to_string(), e.line(), e.to_string()))
}

/// Scores (query, prediction, ground truth) triples: cache first, then the
/// rule table, then an LLM judge call through the launcher.
pub struct AccuracyJudge {
    launcher: RequestLauncher,
    cache: Arc<ScoreCache>,
    settings: JudgeSettings,
    progress: Option<ProgressSink>,
}

impl AccuracyJudge {
    pub fn new(launcher: RequestLauncher, cache: Arc<ScoreCache>, settings: JudgeSettings) -> Self {
        Self {
            launcher,
            cache,
            settings,
            progress: None,
        }
    }

    /// Build clients, worker pool and score cache from a judge config.
    pub fn from_config(config: &JudgeConfig) -> Result<Self, BenchError> {
        config.validate()?;
        let cache = match &config.cache {
            Some(src) => ScoreCache::load(&src.response_file, &src.accuracy_file)?,
            None => ScoreCache::empty(),
        };
        let clients = construct_clients(
            &config.backend,
            ClientRole::Judge,
            config.num_concurrent_requests,
        )?;
        let pool = WorkerPool::new(clients, RetryPolicy::from_backend(&config.backend))?;
        Ok(Self::new(
            RequestLauncher::new(pool),
            Arc::new(cache),
            JudgeSettings::from(config),
        ))
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    fn judge_request(&self, query: &str, ground_truth: &str, prediction: &str) -> RequestDescriptor {
        RequestDescriptor::new(
            &self.settings.model,
            prompt::build_judge_prompt(query, ground_truth, prediction),
            &self.settings.llm_api,
        )
        .with_sampling_params(self.settings.sampling_params.clone())
    }

    /// Verdicts for `responses`, in input order.
    pub async fn judge_responses(
        &mut self,
        responses: &[CompletedRequest],
    ) -> Result<(Vec<AccuracyRecord>, JudgeReport), BenchError> {
        let total = responses.len();
        let mut slots: Vec<Option<AccuracyRecord>> = vec![None; total];
        let mut pending: Vec<(usize, RequestDescriptor)> = Vec::new();

        for (idx, response) in responses.iter().enumerate() {
            if response.is_error() {
                slots[idx] = Some(AccuracyRecord::new(
                    Verdict::Unscored {
                        reason: format!("request failed: {}", response.metrics.error_msg),
                    },
                    response.request_config.clone(),
                ));
                continue;
            }
            let query = response.request_config.prompt_text();
            let prediction = normalize_answer(&response.generated_text);
            let Some(answer) = response.request_config.ground_truth() else {
                tracing::warn!(index = idx, "response carries no ground-truth answer");
                slots[idx] = Some(AccuracyRecord::new(
                    Verdict::Unscored {
                        reason: "response carries no ground-truth answer".to_string(),
                    },
                    response.request_config.clone(),
                ));
                continue;
            };
            let ground_truth = normalize_answer(&answer);
            let request = self.judge_request(query, &ground_truth, &prediction);

            let class = classify(
                &self.cache,
                &Candidate {
                    query,
                    prediction: &prediction,
                    ground_truth: &ground_truth,
                },
            );
            match class.verdict() {
                Some((score, explanation)) => {
                    slots[idx] = Some(AccuracyRecord::new(
                        Verdict::Scored {
                            score,
                            explanation,
                            source: class.source(),
                        },
                        request,
                    ));
                }
                None => pending.push((idx, request)),
            }
        }

        let mut report = JudgeReport {
            judge_calls: pending.len(),
            ..Default::default()
        };
        let mut done = total - pending.len();
        progress::emit(self.progress.as_ref(), done, total, 0);

        let cohort_size = self.launcher.concurrency();
        let mut queue = pending.into_iter();
        let mut cohorts = 0;
        loop {
            let cohort: Vec<(usize, RequestDescriptor)> = queue.by_ref().take(cohort_size).collect();
            if cohort.is_empty() {
                break;
            }
            let mut slot_of: HashMap<Ticket, usize> = HashMap::with_capacity(cohort.len());
            for (idx, request) in cohort {
                let ticket = self.launcher.submit(request)?;
                slot_of.insert(ticket, idx);
            }
            for completed in self.launcher.drain_next_ready().await? {
                let Some(idx) = completed.ticket.and_then(|t| slot_of.remove(&t)) else {
                    continue;
                };
                slots[idx] = Some(judged_record(completed));
                done += 1;
            }
            cohorts += 1;
            progress::emit(self.progress.as_ref(), done, total, cohorts);
        }

        let mut records = Vec::with_capacity(total);
        for (idx, slot) in slots.into_iter().enumerate() {
            let record = match slot {
                Some(record) => record,
                None => AccuracyRecord::new(
                    Verdict::Unscored {
                        reason: "no judge result was returned".to_string(),
                    },
                    responses[idx].request_config.clone(),
                ),
            };
            report.record(&record);
            records.push(record);
        }
        Ok((records, report))
    }

    /// Judge one responses file and write its accuracies file to `output_dir`,
    /// or next to the input when no directory is given.
    pub async fn judge_file(
        &mut self,
        responses_file: &Path,
        output_dir: Option<&Path>,
    ) -> Result<JudgeReport, BenchError> {
        let responses = read_responses(responses_file)?;
        let (records, mut report) = self.judge_responses(&responses).await?;
        report.files = 1;

        let dir = match output_dir {
            Some(dir) => dir.to_path_buf(),
            None => responses_file
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        };
        let sink = JsonDirSink::new(dir)?;
        let path = sink.write_accuracies(&accuracy_filename(responses_file)?, &records)?;
        tracing::info!(
            file = %path.display(),
            total = report.total,
            cache_hits = report.cache_hits,
            rule_hits = report.rule_hits,
            judge_calls = report.judge_calls,
            unscored = report.unscored,
            "accuracies written"
        );
        Ok(report)
    }

    /// Judge every `*{suffix}` file of `input_dir`.
    pub async fn judge_dir(
        &mut self,
        input_dir: &Path,
        suffix: &str,
        output_dir: Option<&Path>,
    ) -> Result<JudgeReport, BenchError> {
        let files = find_response_files(input_dir, suffix)?;
        tracing::info!(dir = %input_dir.display(), files = files.len(), "found response files");
        let mut total = JudgeReport::default();
        for file in &files {
            let report = self.judge_file(file, output_dir).await?;
            total.merge(&report);
        }
        Ok(total)
    }

    pub async fn shutdown(self) {
        self.launcher.shutdown().await;
    }
}

fn judged_record(completed: CompletedRequest) -> AccuracyRecord {
    let verdict = if completed.is_error() {
        Verdict::Unscored {
            reason: format!("judge call failed: {}", completed.metrics.error_msg),
        }
    } else {
        match parse::parse_judge_output(&completed.generated_text) {
            Ok((score, explanation)) => Verdict::Scored {
                score,
                explanation,
                source: VerdictSource::Judge,
            },
            Err(e) => {
                tracing::warn!("unscored judge reply: {}", e);
                Verdict::Unscored {
                    reason: e.to_string(),
                }
            }
        }
    };
    AccuracyRecord::new(verdict, completed.request_config)
}
