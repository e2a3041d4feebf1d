use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use foundry_eval_types::{FailureKind, Record};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::InvocationError;
use crate::evaluator::{ConfigHandle, Evaluator, RawScore};
use crate::http::send_json;

/// Harm metrics scored by the project's hosted safety service, 0 (very low) to 7 (high).
pub const CONTENT_SAFETY_METRICS: [&str; 4] = ["violence", "sexual", "self_harm", "hate_unfairness"];

/// Scores one or more harm metrics through the project safety endpoint.
///
/// A single metric yields a scalar score; several yield a composite keyed by metric.
pub struct SafetyEvaluator {
    name: String,
    metrics: Vec<String>,
    client: reqwest::Client,
}

impl SafetyEvaluator {
    pub fn new(name: impl Into<String>, metrics: &[&str], client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            metrics: metrics.iter().map(|m| m.to_string()).collect(),
            client,
        }
    }

    pub fn content_safety(client: reqwest::Client) -> Self {
        Self::new("content_safety", &CONTENT_SAFETY_METRICS, client)
    }
}

#[derive(Debug, Deserialize)]
struct MetricScore {
    score: Value,
    #[serde(default)]
    reason: Option<String>,
}

#[async_trait]
impl Evaluator for SafetyEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn score(&self, record: &Record, config: ConfigHandle<'_>) -> Result<RawScore> {
        let ConfigHandle::Project(project) = config else {
            return Err(InvocationError::new(
                FailureKind::MissingConfiguration,
                format!("{} needs a project configuration", self.name),
            )
            .into());
        };
        let url = format!("{}/safety/evaluate", project.config.endpoint());

        let mut scores = BTreeMap::new();
        let mut reasons = Vec::with_capacity(self.metrics.len());
        for metric in &self.metrics {
            let request = self
                .client
                .post(&url)
                .header("Authorization", project.token.bearer())
                .json(&json!({
                    "metric": metric,
                    "query": record.get_str("query"),
                    "response": record.get_str("response"),
                }));
            let result: MetricScore = send_json(request).await?;
            if let Some(reason) = result.reason {
                reasons.push(format!("{metric}: {reason}"));
            }
            scores.insert(metric.clone(), result.score);
        }

        let value = if scores.len() == 1 {
            scores.into_values().next().unwrap_or(Value::Null)
        } else {
            Value::Object(scores.into_iter().collect())
        };
        let raw = RawScore {
            value: Some(value),
            reason: None,
        };
        Ok(if reasons.is_empty() {
            raw
        } else {
            raw.with_reason(reasons.join("; "))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn requires_project_handle() {
        let eval = SafetyEvaluator::content_safety(reqwest::Client::new());
        let record = Record::from_value(json!({"query": "q", "response": "r"})).unwrap();
        let err = eval.score(&record, ConfigHandle::None).await.unwrap_err();
        assert_eq!(InvocationError::classify(&err).kind, FailureKind::MissingConfiguration);
        assert_eq!(eval.name(), "content_safety");
    }
}
