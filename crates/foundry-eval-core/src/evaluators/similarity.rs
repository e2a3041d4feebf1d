use anyhow::Result;
use async_trait::async_trait;
use foundry_eval_types::Record;
use serde_json::Value;
use strsim::normalized_levenshtein;

use crate::evaluator::{ConfigHandle, Evaluator, RawScore};

/// Normalized Levenshtein similarity between `response` and `ground_truth`, 0.0..=1.0.
pub struct SimilarityEvaluator;

#[async_trait]
impl Evaluator for SimilarityEvaluator {
    fn name(&self) -> &str {
        "similarity"
    }

    async fn score(&self, record: &Record, _config: ConfigHandle<'_>) -> Result<RawScore> {
        let e = stringify(record.get("ground_truth"));
        let o = stringify(record.get("response"));
        let similarity = if e.is_empty() && o.is_empty() {
            1.0
        } else {
            normalized_levenshtein(&e, &o)
        };
        Ok(RawScore::new(similarity))
    }
}

pub(crate) fn stringify(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn score(response: &str, truth: &str) -> f64 {
        let record = Record::from_value(json!({"response": response, "ground_truth": truth})).unwrap();
        let raw = SimilarityEvaluator.score(&record, ConfigHandle::None).await.unwrap();
        raw.value.and_then(|v| v.as_f64()).unwrap()
    }

    #[tokio::test]
    async fn identical_strings_score_one() {
        assert_eq!(score("Paris", "Paris").await, 1.0);
    }

    #[tokio::test]
    async fn distant_strings_score_low() {
        assert!(score("The capital is Paris", "xyz").await < 0.2);
    }
}
