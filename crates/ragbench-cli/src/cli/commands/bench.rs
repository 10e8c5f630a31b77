use super::apply_backend_overrides;
use crate::cli::args::BenchArgs;
use crate::exit_codes::{RUN_INCOMPLETE, SUCCESS};
use anyhow::Context;
use ragbench_core::engine::{BatchRunner, JobStatus};
use ragbench_core::model::SamplingParams;
use ragbench_core::{load_config, BenchConfig};

pub async fn run(args: BenchArgs) -> anyhow::Result<i32> {
    let config = resolve_config(&args)?;
    config.validate()?;
    tracing::info!(
        model = %config.model,
        treatment = %config.treatment_id,
        concurrency = config.num_concurrent_requests,
        timeout_s = config.timeout_s,
        "starting benchmark"
    );

    let mut runner = BatchRunner::from_config(config)?;
    let bar = if args.no_progress {
        None
    } else {
        let (bar, sink) = crate::progress::bar("bench");
        runner = runner.with_progress(sink);
        Some(bar)
    };

    let report = runner.run().await;
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    let report = report?;

    let jobs: Vec<serde_json::Value> = report
        .jobs
        .iter()
        .map(|job| {
            let (status, summary) = match &job.status {
                JobStatus::Skipped => ("skipped", None),
                JobStatus::NoWork => ("no_work", None),
                JobStatus::Completed(s) => ("completed", Some(s)),
            };
            serde_json::json!({
                "phase": job.phase.as_str(),
                "name": job.base_name,
                "status": status,
                "summary": summary,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&jobs)?);

    let errors = report.total_errors();
    if errors > 0 {
        tracing::warn!(errors, "benchmark finished with errored requests");
        return Ok(RUN_INCOMPLETE);
    }
    Ok(SUCCESS)
}

fn resolve_config(args: &BenchArgs) -> anyhow::Result<BenchConfig> {
    let mut cfg = match &args.config {
        Some(path) => load_config::<BenchConfig>(path)?,
        None => BenchConfig::default(),
    };

    if let Some(model) = &args.model {
        cfg.model = model.clone();
    }
    if let Some(n) = args.num_concurrent_requests {
        cfg.num_concurrent_requests = n;
    }
    if let Some(t) = args.timeout {
        cfg.timeout_s = t;
    }
    if let Some(dir) = &args.warmup_input_dir {
        cfg.warmup_input_dir = Some(dir.clone());
    }
    if let Some(dir) = &args.prod_input_dir {
        cfg.prod_input_dir = Some(dir.clone());
    }
    if let Some(dir) = &args.output_dir {
        cfg.output_dir = dir.clone();
    }
    if let Some(api) = &args.llm_api {
        cfg.llm_api = api.clone();
    }
    if let Some(id) = &args.treatment_id {
        cfg.treatment_id = id.clone();
    }
    if args.rerun {
        cfg.rerun = true;
    }
    if let Some(raw) = &args.additional_sampling_params {
        let params: SamplingParams = serde_json::from_str(raw)
            .context("--additional-sampling-params must be a JSON object")?;
        cfg.additional_sampling_params.extend(params);
    }
    apply_backend_overrides(&mut cfg.backend, &args.backend);
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::BackendArgs;
    use std::path::PathBuf;

    #[test]
    fn flags_override_config_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("t1.yaml");
        std::fs::write(
            &path,
            "model: llama3\nnum_concurrent_requests: 8\ntreatment_id: t1\n\
             additional_sampling_params:\n  temperature: 0.0\n",
        )
        .unwrap();

        let args = BenchArgs {
            config: Some(path),
            num_concurrent_requests: Some(2),
            prod_input_dir: Some(PathBuf::from("data/prod")),
            additional_sampling_params: Some(r#"{"max_tokens": 32}"#.into()),
            backend: BackendArgs {
                backend: Some("fake".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let cfg = resolve_config(&args).unwrap();
        assert_eq!(cfg.model, "llama3");
        assert_eq!(cfg.num_concurrent_requests, 2);
        assert_eq!(cfg.treatment_id, "t1");
        assert_eq!(cfg.backend.provider, "fake");
        assert_eq!(cfg.additional_sampling_params["max_tokens"], 32);
        assert_eq!(cfg.additional_sampling_params["temperature"], 0.0);
        cfg.validate().unwrap();
    }

    #[test]
    fn malformed_sampling_params_are_rejected() {
        let args = BenchArgs {
            model: Some("m".into()),
            additional_sampling_params: Some("[1, 2]".into()),
            ..Default::default()
        };
        assert!(resolve_config(&args).is_err());
    }
}
