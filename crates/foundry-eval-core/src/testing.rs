//! Helpers for testing evaluator suites and the harness itself.
//!
//! `StubEvaluator` counts calls and tracks peak concurrency, `FlakyEvaluator`
//! fails a scripted number of times, and the `assert_*` functions check a
//! finished `RunResult`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use foundry_eval_types::{FailureKind, OutcomeKind, Record, RunResult};

use crate::error::InvocationError;
use crate::evaluator::{ConfigHandle, Evaluator, RawScore};

type ScoreFn = Box<dyn Fn(&Record) -> Result<RawScore> + Send + Sync>;

/// A deterministic evaluator that records how often, and how concurrently, it was called.
pub struct StubEvaluator {
    name: String,
    score: ScoreFn,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl StubEvaluator {
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Record) -> Result<RawScore> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            score: Box::new(f),
            delay: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Always returns `score`.
    pub fn constant(name: impl Into<String>, score: f64) -> Self {
        Self::from_fn(name, move |_| Ok(RawScore::new(score)))
    }

    /// Returns whatever the record holds in `field`, so a dataset can script the scores.
    pub fn from_field(name: impl Into<String>, field: &str) -> Self {
        let field = field.to_string();
        Self::from_fn(name, move |record| {
            let value = record
                .get(&field)
                .cloned()
                .ok_or_else(|| anyhow!("record has no '{field}'"))?;
            Ok(RawScore {
                value: Some(value),
                reason: None,
            })
        })
    }

    /// Always fails with the given classification.
    pub fn failing(name: impl Into<String>, kind: FailureKind) -> Self {
        Self::from_fn(name, move |_| Err(InvocationError::new(kind, "stubbed failure").into()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Evaluator for StubEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn score(&self, record: &Record, _config: ConfigHandle<'_>) -> Result<RawScore> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = (self.score)(record);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Fails `failures` times with `kind`, then returns `score`.
pub struct FlakyEvaluator {
    name: String,
    failures: usize,
    kind: FailureKind,
    score: f64,
    calls: AtomicUsize,
}

impl FlakyEvaluator {
    /// Rate-limited `failures` times before succeeding.
    pub fn transient(name: impl Into<String>, failures: usize, score: f64) -> Self {
        Self {
            name: name.into(),
            failures,
            kind: FailureKind::RateLimited,
            score,
            calls: AtomicUsize::new(0),
        }
    }

    /// Never succeeds.
    pub fn permanent(name: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            name: name.into(),
            failures: usize::MAX,
            kind,
            score: 0.0,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Evaluator for FlakyEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn score(&self, _record: &Record, _config: ConfigHandle<'_>) -> Result<RawScore> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(InvocationError::new(self.kind, format!("scripted failure #{call}")).into());
        }
        Ok(RawScore::new(self.score))
    }
}

/// Every evaluator has exactly one outcome per record, in record order.
pub fn assert_no_gaps(result: &RunResult) -> Result<()> {
    let n = result.metadata.dataset_size;
    for report in &result.categories {
        for evaluator in &report.evaluators {
            let indices: Vec<usize> = report.outcomes_for(evaluator).map(|o| o.record_index).collect();
            if indices != (0..n).collect::<Vec<_>>() {
                anyhow::bail!(
                    "evaluator {evaluator} has outcomes for records {indices:?}, expected 0..{n}\n{}",
                    result.summary_table()
                );
            }
        }
    }
    Ok(())
}

/// Use this in `#[tokio::test]` functions to gate on one evaluator's pass rate.
///
/// # Example
/// ```ignore
/// let result = orchestrator.evaluate(&records, &[]).await?;
/// assert_pass_rate(&result, "groundedness", 0.8)?;
/// ```
pub fn assert_pass_rate(result: &RunResult, evaluator: &str, min_pass_rate: f64) -> Result<()> {
    let stats = result
        .stats(evaluator)
        .ok_or_else(|| anyhow!("evaluator {evaluator} is not part of this run"))?;
    if stats.pass_rate < min_pass_rate {
        anyhow::bail!(
            "{evaluator}: pass rate {:.1}% is below threshold {:.1}%\n{}",
            stats.pass_rate * 100.0,
            min_pass_rate * 100.0,
            result.summary_table()
        );
    }
    Ok(())
}

/// No outcome in the run is a failure.
pub fn assert_no_failures(result: &RunResult) -> Result<()> {
    let failures: Vec<String> = result
        .outcomes()
        .filter(|o| o.kind == OutcomeKind::Failure)
        .map(|o| format!("{}#{}: {}", o.evaluator, o.record_index, o.explanation()))
        .collect();
    if !failures.is_empty() {
        anyhow::bail!("{} failed calls:\n{}", failures.len(), failures.join("\n"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn flaky_evaluator_follows_its_script() {
        let flaky = FlakyEvaluator::transient("f", 1, 4.0);
        let record = Record::default();
        let err = flaky.score(&record, ConfigHandle::None).await.unwrap_err();
        assert_eq!(InvocationError::classify(&err).kind, FailureKind::RateLimited);
        let raw = flaky.score(&record, ConfigHandle::None).await.unwrap();
        assert_eq!(raw.value, Some(json!(4.0)));
        assert_eq!(flaky.calls(), 2);
    }

    #[tokio::test]
    async fn field_stub_reads_scores_from_records() {
        let stub = StubEvaluator::from_field("s", "expected");
        let record = Record::from_value(json!({"expected": 6})).unwrap();
        let raw = stub.score(&record, ConfigHandle::None).await.unwrap();
        assert_eq!(raw.value, Some(json!(6)));
        assert_eq!(stub.calls(), 1);
        assert_eq!(stub.peak_concurrency(), 1);
    }
}
