use crate::errors::RunError;
use bzip2::read::MultiBzDecoder;
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

/// Prompts and ground-truth answers in input order; `queries[i]` pairs with
/// `answers[i]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub name: String,
    pub queries: Vec<String>,
    pub answers: Vec<String>,
}

impl Dataset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn push(&mut self, query: impl Into<String>, answer: impl Into<String>) {
        self.queries.push(query.into());
        self.answers.push(answer.into());
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.queries
            .iter()
            .zip(&self.answers)
            .map(|(q, a)| (q.as_str(), a.as_str()))
    }
}

#[derive(Deserialize)]
struct Record {
    query: String,
    answer: serde_json::Value,
}

/// Load a JSON-lines dataset from a file, or from every `*.jsonl`,
/// `*.jsonl.gz` and `*.jsonl.bz2` file of a directory in file-name order.
pub fn load_data(path: &Path) -> Result<Dataset, RunError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mut dataset = Dataset::new(name);

    for file in dataset_files(path)? {
        read_jsonl(&file, &mut dataset)?;
    }
    tracing::debug!(path = %path.display(), records = dataset.len(), "loaded dataset");
    Ok(dataset)
}

const DATASET_SUFFIXES: [&str; 3] = [".jsonl", ".jsonl.gz", ".jsonl.bz2"];

fn dataset_files(path: &Path) -> Result<Vec<PathBuf>, RunError> {
    let meta = std::fs::metadata(path)
        .map_err(|e| RunError::dataset_not_found(path.display().to_string(), e.to_string()))?;
    if !meta.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let entries = std::fs::read_dir(path)
        .map_err(|e| RunError::dataset_not_found(path.display().to_string(), e.to_string()))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| RunError::dataset_not_found(path.display().to_string(), e.to_string()))?;
        let p = entry.path();
        let name = p.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if p.is_file() && DATASET_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            files.push(p);
        }
    }
    files.sort();
    Ok(files)
}

fn read_jsonl(path: &Path, dataset: &mut Dataset) -> Result<(), RunError> {
    let display = path.display().to_string();
    let file =
        File::open(path).map_err(|e| RunError::dataset_not_found(display.clone(), e.to_string()))?;
    let reader: Box<dyn Read> = match path.extension().and_then(|e| e.to_str()) {
        Some("gz") => Box::new(GzDecoder::new(file)),
        Some("bz2") => Box::new(MultiBzDecoder::new(file)),
        _ => Box::new(file),
    };

    for (idx, line) in BufReader::new(reader).lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|e| RunError::dataset_parse(display.clone(), line_no, e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(&line)
            .map_err(|e| RunError::dataset_parse(display.clone(), line_no, e.to_string()))?;
        let answer = match record.answer {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        dataset.push(record.query, answer);
    }
    Ok(())
}
