use super::rules::Score;
use crate::errors::RunError;
use serde::Deserialize;

#[derive(Deserialize)]
struct JudgeReply {
    score: f64,
    #[serde(default)]
    explanation: String,
}

/// Extract `{score, explanation}` from a judge reply. Models sometimes wrap
/// the object in prose or code fences, so parsing starts at the first `{`
/// and stops after the first complete value.
pub fn parse_judge_output(text: &str) -> Result<(Score, String), RunError> {
    let text = text.trim();
    let start = text
        .find('{')
        .ok_or_else(|| RunError::judge_output("no JSON object in judge reply"))?;

    let reply: JudgeReply = serde_json::Deserializer::from_str(&text[start..])
        .into_iter::<JudgeReply>()
        .next()
        .ok_or_else(|| RunError::judge_output("empty judge reply"))?
        .map_err(|e| RunError::judge_output(format!("invalid judge JSON: {}", e)))?;

    let score = Score::try_from(reply.score).map_err(RunError::judge_output)?;
    Ok((score, reply.explanation))
}
