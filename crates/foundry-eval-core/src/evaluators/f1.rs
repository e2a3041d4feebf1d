use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use foundry_eval_types::Record;

use super::similarity::stringify;
use crate::evaluator::{ConfigHandle, Evaluator, RawScore};

/// Token-overlap F1 between `response` and `ground_truth`.
pub struct F1ScoreEvaluator;

#[async_trait]
impl Evaluator for F1ScoreEvaluator {
    fn name(&self) -> &str {
        "f1_score"
    }

    async fn score(&self, record: &Record, _config: ConfigHandle<'_>) -> Result<RawScore> {
        let truth = tokens(&stringify(record.get("ground_truth")));
        let response = tokens(&stringify(record.get("response")));
        Ok(RawScore::new(f1(&response, &truth)))
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn f1(prediction: &[String], truth: &[String]) -> f64 {
    if prediction.is_empty() || truth.is_empty() {
        return if prediction.is_empty() && truth.is_empty() { 1.0 } else { 0.0 };
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for t in truth {
        *counts.entry(t.as_str()).or_default() += 1;
    }
    let mut common = 0usize;
    for p in prediction {
        if let Some(n) = counts.get_mut(p.as_str()) {
            if *n > 0 {
                *n -= 1;
                common += 1;
            }
        }
    }
    if common == 0 {
        return 0.0;
    }
    let precision = common as f64 / prediction.len() as f64;
    let recall = common as f64 / truth.len() as f64;
    2.0 * precision * recall / (precision + recall)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> Vec<String> {
        tokens(s)
    }

    #[test]
    fn exact_match_is_one() {
        assert_eq!(f1(&t("Paris is the capital"), &t("paris is the capital.")), 1.0);
    }

    #[test]
    fn partial_overlap() {
        // 2 common of 4 predicted, 2 of 2 truth: p=0.5 r=1.0
        let score = f1(&t("the capital is Paris"), &t("Paris capital"));
        assert!((score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn no_overlap_is_zero() {
        assert_eq!(f1(&t("London"), &t("Paris")), 0.0);
    }
}
