//! Deterministic scoring rules applied before any judge call.
//!
//! Rules overlap (an "I don't know" ground truth matches both the refusal and
//! the exact-match rule), so they are kept in one ordered table and the first
//! match wins. The score cache is consulted before the table.

use super::cache::{CachedScore, ScoreCache};
use super::VerdictSource;
use serde::{Deserialize, Serialize};

/// Normalized prediction that counts as a refusal.
pub const REFUSAL: &str = "i don't know";

/// Marker used by the dataset for questions with a false premise.
const ABSTAIN_MARKER: &str = "invalid";

/// Judge scale. Serialized as the bare number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub enum Score {
    Correct,
    Partial,
    Incorrect,
    Unsure,
}

impl Score {
    pub fn value(self) -> f64 {
        match self {
            Score::Correct => 1.0,
            Score::Partial => 0.5,
            Score::Incorrect => 0.0,
            Score::Unsure => -1.0,
        }
    }
}

impl From<Score> for f64 {
    fn from(score: Score) -> f64 {
        score.value()
    }
}

impl TryFrom<f64> for Score {
    type Error = String;

    fn try_from(v: f64) -> Result<Self, Self::Error> {
        [Score::Correct, Score::Partial, Score::Incorrect, Score::Unsure]
            .into_iter()
            .find(|s| s.value() == v)
            .ok_or_else(|| format!("score {} is not one of 1, 0.5, 0, -1", v))
    }
}

/// One answer under classification. `prediction` and `ground_truth` are
/// already normalized; `query` is the raw prompt text.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub query: &'a str,
    pub prediction: &'a str,
    pub ground_truth: &'a str,
}

impl Candidate<'_> {
    fn abstains(text: &str) -> bool {
        text.contains(ABSTAIN_MARKER)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Cached(CachedScore),
    Refusal,
    ExactMatch,
    MutualAbstain,
    OneSidedAbstain,
    NeedsJudge,
}

impl Classification {
    /// Score and explanation fixed by the rule, `None` when a judge call is needed.
    pub fn verdict(&self) -> Option<(Score, String)> {
        let (score, explanation) = match self {
            Classification::Cached(hit) => return Some((hit.score, hit.explanation.clone())),
            Classification::Refusal => (Score::Unsure, "The prediction is not sure about the answer."),
            Classification::ExactMatch => (Score::Correct, "The prediction is correct."),
            Classification::MutualAbstain => (Score::Correct, "The prediction is correct in hallucination."),
            Classification::OneSidedAbstain => {
                (Score::Incorrect, "The prediction is incorrect in hallucination.")
            }
            Classification::NeedsJudge => return None,
        };
        Some((score, explanation.to_string()))
    }

    pub fn source(&self) -> VerdictSource {
        match self {
            Classification::Cached(_) => VerdictSource::Cache,
            Classification::Refusal => VerdictSource::Refusal,
            Classification::ExactMatch => VerdictSource::ExactMatch,
            Classification::MutualAbstain => VerdictSource::MutualAbstain,
            Classification::OneSidedAbstain => VerdictSource::OneSidedAbstain,
            Classification::NeedsJudge => VerdictSource::Judge,
        }
    }
}

type Guard = fn(&Candidate<'_>) -> bool;

const RULES: [(Guard, Classification); 4] = [
    (|c| c.prediction == REFUSAL, Classification::Refusal),
    (|c| c.prediction == c.ground_truth, Classification::ExactMatch),
    (
        |c| Candidate::abstains(c.prediction) && Candidate::abstains(c.ground_truth),
        Classification::MutualAbstain,
    ),
    (
        |c| Candidate::abstains(c.prediction) != Candidate::abstains(c.ground_truth),
        Classification::OneSidedAbstain,
    ),
];

pub fn classify(cache: &ScoreCache, candidate: &Candidate<'_>) -> Classification {
    if let Some(hit) = cache.get(candidate.query, candidate.prediction) {
        return Classification::Cached(hit.clone());
    }
    RULES
        .iter()
        .find(|(guard, _)| guard(candidate))
        .map(|(_, class)| class.clone())
        .unwrap_or(Classification::NeedsJudge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::normalize_answer;

    fn run(prediction: &str, ground_truth: &str) -> Classification {
        let p = normalize_answer(prediction);
        let g = normalize_answer(ground_truth);
        classify(
            &ScoreCache::empty(),
            &Candidate {
                query: "q",
                prediction: &p,
                ground_truth: &g,
            },
        )
    }

    #[test]
    fn refusal_beats_exact_match() {
        let c = run("I don't know.", "I don't know.");
        assert_eq!(c, Classification::Refusal);
        assert_eq!(c.verdict().unwrap().0, Score::Unsure);
    }

    #[test]
    fn exact_match_ignores_case_space_and_trailing_periods() {
        assert_eq!(run("  Paris.. ", "paris"), Classification::ExactMatch);
    }

    #[test]
    fn abstention_is_symmetric_for_penalties() {
        assert_eq!(run("invalid request", "Paris"), Classification::OneSidedAbstain);
        assert_eq!(run("Paris", "invalid request"), Classification::OneSidedAbstain);
        assert_eq!(run("invalid", "invalid question"), Classification::MutualAbstain);
        assert_eq!(run("invalid", "invalid"), Classification::ExactMatch);
        assert_eq!(run("invalid", "invalid").verdict().unwrap().0, Score::Correct);
        assert_eq!(run("Invalid premise", "INVALID").verdict().unwrap().0, Score::Correct);
        assert_eq!(run("invalid request", "Paris").verdict().unwrap().0, Score::Incorrect);
    }

    #[test]
    fn everything_else_needs_the_judge() {
        let c = run("Lyon", "Paris");
        assert_eq!(c, Classification::NeedsJudge);
        assert!(c.verdict().is_none());
        assert_eq!(c.source(), VerdictSource::Judge);
    }

    #[test]
    fn cache_hit_short_circuits_every_rule() {
        let mut entries = std::collections::HashMap::new();
        entries.insert(
            ("q".to_string(), REFUSAL.to_string()),
            CachedScore {
                score: Score::Partial,
                explanation: "from last run".into(),
            },
        );
        let cache = ScoreCache::from_entries(entries);
        let c = classify(
            &cache,
            &Candidate {
                query: "q",
                prediction: REFUSAL,
                ground_truth: REFUSAL,
            },
        );
        assert_eq!(c.source(), VerdictSource::Cache);
        assert_eq!(c.verdict().unwrap(), (Score::Partial, "from last run".to_string()));
    }

    #[test]
    fn score_serializes_as_number() {
        assert_eq!(serde_json::to_string(&Score::Partial).unwrap(), "0.5");
        assert_eq!(serde_json::from_str::<Score>("-1").unwrap(), Score::Unsure);
        assert_eq!(serde_json::from_str::<Score>("1.0").unwrap(), Score::Correct);
        assert!(serde_json::from_str::<Score>("2").is_err());
    }
}
