use super::summary::{SummaryFile, SummaryMetrics};
use crate::errors::{BenchError, RunError};
use crate::judge::AccuracyRecord;
use crate::model::CompletedRequest;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Narrow write interface the orchestrators persist through.
pub trait ResultSink: Send + Sync {
    fn write_summary(&self, base_name: &str, summary: &SummaryMetrics) -> Result<PathBuf, BenchError>;

    fn write_responses(
        &self,
        base_name: &str,
        results: &[CompletedRequest],
    ) -> Result<PathBuf, BenchError>;

    /// `file_name` is the full accuracy file name, extension included.
    fn write_accuracies(
        &self,
        file_name: &str,
        records: &[AccuracyRecord],
    ) -> Result<PathBuf, BenchError>;

    /// True when a previous run of `base_name` left both a summary and a
    /// responses file, and the summary reports at least one completed
    /// request and zero errors.
    fn job_complete(&self, base_name: &str) -> Result<bool, BenchError>;

    fn energy_base(&self, base_name: &str) -> PathBuf;
}

/// Writes every artifact as an indented JSON file into one directory.
#[derive(Debug, Clone)]
pub struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, BenchError> {
        let dir = dir.into();
        if dir.exists() && !dir.is_dir() {
            return Err(RunError::invalid_args(format!(
                "output path {} is not a directory",
                dir.display()
            ))
            .into());
        }
        std::fs::create_dir_all(&dir).map_err(|e| BenchError::Sink {
            path: dir.clone(),
            source: e.into(),
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn summary_path(&self, base_name: &str) -> PathBuf {
        self.dir.join(format!("{}_summary.json", base_name))
    }

    pub fn responses_path(&self, base_name: &str) -> PathBuf {
        self.dir.join(format!("{}_responses.json", base_name))
    }
}

impl ResultSink for JsonDirSink {
    fn write_summary(&self, base_name: &str, summary: &SummaryMetrics) -> Result<PathBuf, BenchError> {
        let path = self.summary_path(base_name);
        write_json(&path, &SummaryFile::new(base_name, summary.clone()))?;
        Ok(path)
    }

    fn write_responses(
        &self,
        base_name: &str,
        results: &[CompletedRequest],
    ) -> Result<PathBuf, BenchError> {
        let path = self.responses_path(base_name);
        write_json(&path, results)?;
        Ok(path)
    }

    fn write_accuracies(
        &self,
        file_name: &str,
        records: &[AccuracyRecord],
    ) -> Result<PathBuf, BenchError> {
        let path = self.dir.join(file_name);
        write_json(&path, records)?;
        Ok(path)
    }

    fn job_complete(&self, base_name: &str) -> Result<bool, BenchError> {
        let summary = self.summary_path(base_name);
        if !summary.exists() || !self.responses_path(base_name).exists() {
            return Ok(false);
        }
        let (errors, completed) = read_previous_counts(&summary)?;
        tracing::debug!(file = %summary.display(), errors, completed, "found previous summary");
        Ok(errors == 0 && completed > 0)
    }

    fn energy_base(&self, base_name: &str) -> PathBuf {
        self.dir.join(format!("{}_energy", base_name))
    }
}

/// `(number_errors, num_completed_requests)` of a previous summary. Summaries
/// written by older tooling carry many more keys, so only these are read; a
/// missing completion count reads as zero.
fn read_previous_counts(path: &Path) -> Result<(u64, u64), BenchError> {
    let unreadable = |detail: String| {
        BenchError::from(
            RunError::other(format!("cannot read summary {}: {}", path.display(), detail))
                .with_path(path.display().to_string()),
        )
    };
    let raw = std::fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
    let v: serde_json::Value = serde_json::from_str(&raw).map_err(|e| unreadable(e.to_string()))?;
    let errors = v
        .get("number_errors")
        .and_then(|n| n.as_u64())
        .ok_or_else(|| unreadable("missing number_errors".to_string()))?;
    let completed = v
        .get("num_completed_requests")
        .and_then(|n| n.as_u64())
        .unwrap_or(0);
    Ok((errors, completed))
}

/// Serialize `value` with four-space indentation.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), BenchError> {
    let sink_err = |e: anyhow::Error| BenchError::Sink {
        path: path.to_path_buf(),
        source: e,
    };
    let file = File::create(path).map_err(|e| sink_err(e.into()))?;
    let mut writer = BufWriter::new(file);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut writer, formatter);
    value.serialize(&mut ser).map_err(|e| sink_err(e.into()))?;
    writer.flush().map_err(|e| sink_err(e.into()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::summary::{RunInfo, RunTally};
    use tempfile::tempdir;

    fn summary_with_errors(errors: usize) -> SummaryMetrics {
        SummaryMetrics {
            num_errors: errors,
            num_completed_requests: 4,
            ..SummaryMetrics::zeroed(&RunInfo::default(), RunTally::default())
        }
    }

    #[test]
    fn writes_indented_artifacts() {
        let tmp = tempdir().unwrap();
        let sink = JsonDirSink::new(tmp.path().join("out")).unwrap();
        let path = sink.write_responses("m_batch_1_prod", &[]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");

        let path = sink.write_summary("m_batch_1_prod", &summary_with_errors(0)).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("{\n    \"version\""), "got {}", raw);
        assert!(path.ends_with("m_batch_1_prod_summary.json"));
    }

    #[test]
    fn job_complete_requires_both_files_zero_errors_and_completions() {
        let tmp = tempdir().unwrap();
        let sink = JsonDirSink::new(tmp.path()).unwrap();
        assert!(!sink.job_complete("job").unwrap());

        sink.write_summary("job", &summary_with_errors(0)).unwrap();
        assert!(!sink.job_complete("job").unwrap(), "responses missing");

        sink.write_responses("job", &[]).unwrap();
        assert!(sink.job_complete("job").unwrap());

        sink.write_summary("job", &summary_with_errors(3)).unwrap();
        assert!(!sink.job_complete("job").unwrap());

        let nothing_measured = SummaryMetrics::zeroed(&RunInfo::default(), RunTally::default());
        sink.write_summary("job", &nothing_measured).unwrap();
        assert!(!sink.job_complete("job").unwrap(), "zero completions");
    }

    #[test]
    fn corrupt_summary_is_an_error() {
        let tmp = tempdir().unwrap();
        let sink = JsonDirSink::new(tmp.path()).unwrap();
        std::fs::write(sink.summary_path("job"), "{not json").unwrap();
        sink.write_responses("job", &[]).unwrap();
        assert!(sink.job_complete("job").is_err());
    }

    #[test]
    fn output_path_must_be_a_directory() {
        let tmp = tempdir().unwrap();
        let file = tmp.path().join("plain.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(JsonDirSink::new(&file).is_err());
    }
}
