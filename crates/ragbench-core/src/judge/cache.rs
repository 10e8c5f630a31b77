use super::rules::Score;
use crate::errors::RunError;
use crate::model::normalize_answer;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedScore {
    pub score: Score,
    pub explanation: String,
}

/// Scores from a previous judged run, keyed by (raw query, normalized
/// prediction). Loaded once and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct ScoreCache {
    entries: HashMap<(String, String), CachedScore>,
}

impl ScoreCache {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: HashMap<(String, String), CachedScore>) -> Self {
        Self { entries }
    }

    /// Zip a responses file with the accuracies file judged from it. Entries
    /// are paired by position; unscored entries are not cached.
    pub fn load(response_file: &Path, accuracy_file: &Path) -> Result<Self, RunError> {
        let responses = read_array(response_file)?;
        let accuracies = read_array(accuracy_file)?;
        if responses.len() != accuracies.len() {
            tracing::warn!(
                responses = responses.len(),
                accuracies = accuracies.len(),
                "score cache files differ in length; pairing the common prefix"
            );
        }

        let mut entries = HashMap::new();
        let mut skipped = 0usize;
        for (response, accuracy) in responses.iter().zip(&accuracies) {
            let query = response
                .pointer("/request_config/prompt/0")
                .and_then(|v| v.as_str());
            let prediction = response.get("generated_text").map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            });
            let score = accuracy
                .get("score")
                .and_then(|v| v.as_f64())
                .and_then(|v| Score::try_from(v).ok());

            match (query, prediction, score) {
                (Some(query), Some(prediction), Some(score)) => {
                    let explanation = accuracy
                        .get("explanation")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    entries.insert(
                        (query.to_string(), normalize_answer(&prediction)),
                        CachedScore { score, explanation },
                    );
                }
                _ => skipped += 1,
            }
        }

        tracing::info!(
            entries = entries.len(),
            skipped,
            file = %accuracy_file.display(),
            "loaded score cache"
        );
        Ok(Self { entries })
    }

    pub fn get(&self, query: &str, normalized_prediction: &str) -> Option<&CachedScore> {
        // Tuple keys cannot be borrowed as (&str, &str), hence the owned probe.
        self.entries
            .get(&(query.to_string(), normalized_prediction.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn read_array(path: &Path) -> Result<Vec<serde_json::Value>, RunError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| RunError::dataset_not_found(path.display().to_string(), e.to_string()))?;
    serde_json::from_str(&raw)
        .map_err(|e| RunError::dataset_parse(path.display().to_string(), e.line(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RunErrorKind;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn pairs_by_position_and_skips_null_scores() {
        let tmp = tempdir().unwrap();
        let responses = tmp.path().join("m_prod_responses.json");
        let accuracies = tmp.path().join("m_prod_accuracies.json");
        std::fs::write(
            &responses,
            json!([
                {"generated_text": "Lyon.", "request_config": {"prompt": ["capital of France?", 18]}},
                {"generated_text": "Bern", "request_config": {"prompt": ["capital of Swiss?", 17]}},
                {"generated_text": "x", "request_config": {"prompt": ["third", 5]}},
            ])
            .to_string(),
        )
        .unwrap();
        std::fs::write(
            &accuracies,
            json!([
                {"score": 0.0, "explanation": "wrong city"},
                {"score": null, "explanation": "judge failed"},
            ])
            .to_string(),
        )
        .unwrap();

        let cache = ScoreCache::load(&responses, &accuracies).unwrap();
        assert_eq!(cache.len(), 1);
        let hit = cache.get("capital of France?", "lyon").unwrap();
        assert_eq!(hit.score, Score::Incorrect);
        assert_eq!(hit.explanation, "wrong city");
        assert!(cache.get("capital of Swiss?", "bern").is_none());
        assert!(cache.get("capital of france?", "lyon").is_none(), "query is not normalized");
    }

    #[test]
    fn missing_file_is_reported() {
        let tmp = tempdir().unwrap();
        let err = ScoreCache::load(&tmp.path().join("a.json"), &tmp.path().join("b.json")).unwrap_err();
        assert_eq!(err.kind, RunErrorKind::DatasetNotFound);
    }
}
