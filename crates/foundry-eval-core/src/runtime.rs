//! The runtime adapter: the failure boundary around one evaluator invocation.
//!
//! Whatever happens inside an invocation, `RuntimeAdapter::evaluate` returns an
//! `EvaluationOutcome`; nothing propagates to the orchestration loop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use foundry_eval_types::{EvaluationOutcome, ExecutionMode, FailureKind, Record, ScoreValue};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{InvocationContext, RetryPolicy};
use crate::descriptor::EvaluatorDescriptor;
use crate::error::InvocationError;
use crate::evaluator::RawScore;
use crate::registry::RegisteredEvaluator;
use crate::strategy::ExecutionStrategy;

/// A raw result after shape normalization, range checking and pass/fail derivation.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub score: Option<ScoreValue>,
    pub reason: Option<String>,
    pub passed: bool,
}

/// Turns whatever an evaluator returned into one score plus a verdict.
///
/// Scores outside the declared range are rejected as malformed, never clipped.
pub fn normalize(descriptor: &EvaluatorDescriptor, raw: RawScore) -> Result<Normalized, InvocationError> {
    let reason = raw.reason;
    let score = match raw.value {
        None | Some(Value::Null) => {
            return Ok(Normalized {
                score: None,
                reason,
                passed: false,
            })
        }
        Some(Value::Object(map)) => {
            let mut parts = BTreeMap::new();
            for (key, v) in &map {
                let Some(n) = as_number(v) else {
                    return Err(InvocationError::malformed_output(format!(
                        "{} returned a non-numeric sub-score {key}: {v}",
                        descriptor.name
                    )));
                };
                parts.insert(key.clone(), n);
            }
            if parts.is_empty() {
                return Err(InvocationError::malformed_output(format!(
                    "{} returned an object without sub-scores",
                    descriptor.name
                )));
            }
            ScoreValue::Composite(parts)
        }
        Some(other) => match as_number(&other) {
            Some(n) => ScoreValue::Scalar(n),
            None => {
                return Err(InvocationError::malformed_output(format!(
                    "{} returned a non-numeric score: {other}",
                    descriptor.name
                )))
            }
        },
    };

    let passed = match &score {
        ScoreValue::Scalar(v) => {
            check_range(descriptor, None, *v)?;
            descriptor.passes(*v)
        }
        ScoreValue::Composite(parts) => {
            let mut all = true;
            for (key, v) in parts {
                check_range(descriptor, Some(key), *v)?;
                all &= descriptor.passes(*v);
            }
            all
        }
    };

    Ok(Normalized {
        score: Some(score),
        reason,
        passed,
    })
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn check_range(descriptor: &EvaluatorDescriptor, key: Option<&str>, v: f64) -> Result<(), InvocationError> {
    if descriptor.range.contains(v) {
        return Ok(());
    }
    let what = key.map(|k| format!(" ({k})")).unwrap_or_default();
    Err(InvocationError::malformed_output(format!(
        "score {v}{what} outside declared range [{}, {}]",
        descriptor.range.min, descriptor.range.max
    )))
}

/// Invokes evaluators through an execution strategy with validation, retries and
/// failure isolation.
pub struct RuntimeAdapter {
    strategy: Arc<dyn ExecutionStrategy>,
    context: Arc<InvocationContext>,
    retry: RetryPolicy,
}

impl RuntimeAdapter {
    pub fn new(strategy: Arc<dyn ExecutionStrategy>, context: Arc<InvocationContext>, retry: RetryPolicy) -> Self {
        Self {
            strategy,
            context,
            retry,
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.strategy.mode()
    }

    pub fn context(&self) -> &InvocationContext {
        &self.context
    }

    pub async fn evaluate(
        &self,
        entry: &RegisteredEvaluator,
        record_index: usize,
        record: &Record,
        cancel: &CancellationToken,
    ) -> EvaluationOutcome {
        let name = entry.name();
        let started = Instant::now();

        let missing = record.missing_fields(&entry.descriptor.required_fields);
        if !missing.is_empty() {
            debug!(evaluator = name, record = record_index, ?missing, "Skipping record");
            return EvaluationOutcome::skipped(name, record_index, missing);
        }

        let Some(config) = self.context.handle_for(entry.descriptor.config_kind) else {
            let err = InvocationError::new(
                FailureKind::MissingConfiguration,
                format!("no {:?} configuration available", entry.descriptor.config_kind),
            );
            return EvaluationOutcome::failure(name, record_index, err.into());
        };

        let mut attempt = 0u32;
        let err = loop {
            if cancel.is_cancelled() {
                break InvocationError::cancelled();
            }
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(InvocationError::cancelled()),
                r = self.strategy.invoke(entry, record, config) => r,
            };

            match result.and_then(|raw| normalize(&entry.descriptor, raw)) {
                Ok(n) => {
                    debug!(evaluator = name, record = record_index, attempt, passed = n.passed, "Scored");
                    return EvaluationOutcome::success(name, record_index, n.score, n.reason, n.passed)
                        .with_timing(attempt, elapsed_ms(started));
                }
                Err(err) if err.is_transient() && attempt <= self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        evaluator = name,
                        record = record_index,
                        attempt,
                        kind = %err.kind,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break InvocationError::cancelled(),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) if err.is_transient() => {
                    let attempts = if attempt == 1 { "1 attempt".to_string() } else { format!("{attempt} attempts") };
                    break InvocationError::new(err.kind, format!("gave up after {attempts}: {}", err.message));
                }
                Err(err) => break err,
            }
        };

        warn!(
            evaluator = name,
            record = record_index,
            attempts = attempt,
            kind = %err.kind,
            error = %err.message,
            "Evaluation failed"
        );
        EvaluationOutcome::failure(name, record_index, err.into()).with_timing(attempt, elapsed_ms(started))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::LocalExecution;
    use crate::testing::{FlakyEvaluator, StubEvaluator};
    use foundry_eval_types::{Category, OutcomeKind};
    use serde_json::json;
    use std::time::Duration;

    fn quality(name: &str) -> EvaluatorDescriptor {
        EvaluatorDescriptor::new(name, Category::GeneralPurpose)
            .requires(&["query", "response"])
            .range(1.0, 5.0)
            .threshold(3.0)
    }

    fn safety(name: &str) -> EvaluatorDescriptor {
        EvaluatorDescriptor::new(name, Category::SafetySecurity)
            .requires(&["query", "response"])
            .range(0.0, 7.0)
            .threshold(3.0)
            .lower_is_better()
    }

    fn adapter(max_retries: u32) -> RuntimeAdapter {
        RuntimeAdapter::new(
            Arc::new(LocalExecution::new(Duration::from_secs(5))),
            Arc::new(InvocationContext::default()),
            RetryPolicy {
                max_retries,
                backoff_base_ms: 1,
                backoff_max_ms: 5,
            },
        )
    }

    fn record() -> Record {
        Record::from_value(json!({"query": "q", "response": "r"})).unwrap()
    }

    #[test]
    fn normalizes_numeric_strings_and_composites() {
        let n = normalize(&quality("q"), RawScore::new("4")).unwrap();
        assert_eq!(n.score, Some(ScoreValue::Scalar(4.0)));
        assert!(n.passed);

        let raw = RawScore::new(json!({"violence": 0, "sexual": "1"}));
        let n = normalize(&safety("content_safety"), raw).unwrap();
        match n.score {
            Some(ScoreValue::Composite(parts)) => assert_eq!(parts.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        assert!(n.passed);
    }

    #[test]
    fn composite_fails_when_any_part_fails() {
        let raw = RawScore::new(json!({"violence": 0, "self_harm": 5}));
        assert!(!normalize(&safety("content_safety"), raw).unwrap().passed);
    }

    #[test]
    fn composite_with_unscored_metric_is_malformed() {
        let raw = RawScore::new(json!({
            "violence": 0,
            "sexual": 0,
            "self_harm": null,
            "hate_unfairness": "High",
        }));
        let err = normalize(&safety("content_safety"), raw).unwrap_err();
        assert_eq!(err.kind, FailureKind::MalformedOutput);
        assert!(err.message.contains("hate_unfairness") || err.message.contains("self_harm"));

        let err = normalize(&safety("content_safety"), RawScore::new(json!({}))).unwrap_err();
        assert_eq!(err.kind, FailureKind::MalformedOutput);
    }

    #[test]
    fn out_of_range_is_malformed_not_clipped() {
        let err = normalize(&quality("q"), RawScore::new(6)).unwrap_err();
        assert_eq!(err.kind, FailureKind::MalformedOutput);
        let err = normalize(&safety("s"), RawScore::new(json!({"violence": 9}))).unwrap_err();
        assert_eq!(err.kind, FailureKind::MalformedOutput);
    }

    #[test]
    fn missing_value_is_success_without_score() {
        let n = normalize(&quality("q"), RawScore::unscored().with_reason("explained only")).unwrap();
        assert_eq!(n.score, None);
    }

    #[tokio::test]
    async fn skipped_records_never_invoke_the_evaluator() {
        let stub = Arc::new(StubEvaluator::constant("coherence", 4.0));
        let entry = RegisteredEvaluator {
            descriptor: quality("coherence"),
            evaluator: stub.clone(),
        };
        let record = Record::from_value(json!({"query": "q"})).unwrap();
        let outcome = adapter(0).evaluate(&entry, 3, &record, &CancellationToken::new()).await;
        assert_eq!(outcome.kind, OutcomeKind::Skipped);
        assert_eq!(outcome.missing_fields, vec!["response"]);
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn transient_failures_recover_within_retry_budget() {
        let flaky = Arc::new(FlakyEvaluator::transient("coherence", 2, 4.0));
        let entry = RegisteredEvaluator {
            descriptor: quality("coherence"),
            evaluator: flaky.clone(),
        };
        let outcome = adapter(3).evaluate(&entry, 0, &record(), &CancellationToken::new()).await;
        assert_eq!(outcome.kind, OutcomeKind::Success);
        assert_eq!(outcome.passed, Some(true));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_become_failure_with_reason() {
        let flaky = Arc::new(FlakyEvaluator::transient("coherence", 10, 4.0));
        let entry = RegisteredEvaluator {
            descriptor: quality("coherence"),
            evaluator: flaky.clone(),
        };
        let outcome = adapter(2).evaluate(&entry, 0, &record(), &CancellationToken::new()).await;
        assert_eq!(outcome.kind, OutcomeKind::Failure);
        assert_eq!(outcome.passed, None);
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::RateLimited);
        assert!(failure.message.contains("gave up after 3 attempts"));
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn transient_failure_without_retry_budget_says_it_gave_up() {
        let flaky = Arc::new(FlakyEvaluator::transient("coherence", 1, 4.0));
        let entry = RegisteredEvaluator {
            descriptor: quality("coherence"),
            evaluator: flaky.clone(),
        };
        let outcome = adapter(0).evaluate(&entry, 0, &record(), &CancellationToken::new()).await;
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::RateLimited);
        assert!(failure.message.starts_with("gave up after 1 attempt:"));
        assert_eq!(flaky.calls(), 1);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let flaky = Arc::new(FlakyEvaluator::permanent("coherence", FailureKind::Authentication));
        let entry = RegisteredEvaluator {
            descriptor: quality("coherence"),
            evaluator: flaky.clone(),
        };
        let outcome = adapter(5).evaluate(&entry, 0, &record(), &CancellationToken::new()).await;
        assert_eq!(outcome.failure.unwrap().kind, FailureKind::Authentication);
        assert_eq!(flaky.calls(), 1);
    }

    #[tokio::test]
    async fn cancelled_token_records_cancelled_failure() {
        let stub = Arc::new(StubEvaluator::constant("coherence", 4.0));
        let entry = RegisteredEvaluator {
            descriptor: quality("coherence"),
            evaluator: stub.clone(),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = adapter(0).evaluate(&entry, 0, &record(), &cancel).await;
        assert_eq!(outcome.failure.unwrap().kind, FailureKind::Cancelled);
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn missing_handle_is_a_failure_outcome() {
        let stub = Arc::new(StubEvaluator::constant("groundedness", 4.0));
        let entry = RegisteredEvaluator {
            descriptor: quality("groundedness").config(foundry_eval_types::ConfigKind::Model),
            evaluator: stub.clone(),
        };
        let outcome = adapter(0).evaluate(&entry, 0, &record(), &CancellationToken::new()).await;
        assert_eq!(outcome.failure.unwrap().kind, FailureKind::MissingConfiguration);
        assert_eq!(stub.calls(), 0);
    }
}
