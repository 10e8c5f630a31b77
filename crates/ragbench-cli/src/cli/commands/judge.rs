use super::apply_backend_overrides;
use crate::cli::args::JudgeArgs;
use crate::exit_codes::{RUN_INCOMPLETE, SUCCESS};
use ragbench_core::config::ScoreCacheSource;
use ragbench_core::judge::AccuracyJudge;
use ragbench_core::{load_config, JudgeConfig, RunError};

pub async fn run(args: JudgeArgs) -> anyhow::Result<i32> {
    let config = resolve_config(&args)?;
    let mut judge = AccuracyJudge::from_config(&config)?;
    let bar = if args.no_progress {
        None
    } else {
        let (bar, sink) = crate::progress::bar("judge");
        judge = judge.with_progress(sink);
        Some(bar)
    };

    let report = judge
        .judge_dir(
            &config.input_dir,
            &config.file_suffix,
            config.output_dir.as_deref(),
        )
        .await;
    judge.shutdown().await;
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    let report = report?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.unscored > 0 {
        tracing::warn!(unscored = report.unscored, "some answers could not be scored");
        return Ok(RUN_INCOMPLETE);
    }
    Ok(SUCCESS)
}

fn resolve_config(args: &JudgeArgs) -> anyhow::Result<JudgeConfig> {
    let mut cfg = match &args.config {
        Some(path) => load_config::<JudgeConfig>(path)?,
        None => JudgeConfig::default(),
    };

    if let Some(model) = &args.model {
        cfg.model = model.clone();
    }
    if let Some(n) = args.num_concurrent_requests {
        cfg.num_concurrent_requests = n;
    }
    if let Some(dir) = &args.input_dir {
        cfg.input_dir = dir.clone();
    }
    if let Some(dir) = &args.output_dir {
        cfg.output_dir = Some(dir.clone());
    }
    if let Some(api) = &args.llm_api {
        cfg.llm_api = api.clone();
    }
    if let Some(suffix) = &args.file_suffix {
        cfg.file_suffix = suffix.clone();
    }
    match (&args.cache_responses, &args.cache_accuracies) {
        (Some(responses), Some(accuracies)) => {
            cfg.cache = Some(ScoreCacheSource {
                response_file: responses.clone(),
                accuracy_file: accuracies.clone(),
            });
        }
        (None, None) => {}
        _ => {
            return Err(RunError::invalid_args(
                "--cache-responses and --cache-accuracies must be given together",
            )
            .into())
        }
    }
    apply_backend_overrides(&mut cfg.backend, &args.backend);
    Ok(cfg)
}
