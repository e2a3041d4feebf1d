//! Category aggregation: groups a run's outcomes by declared category and counts them.
//!
//! Numbers stay per evaluator. Scales differ between evaluators, so nothing is
//! averaged across them.

use std::collections::BTreeMap;

use foundry_eval_types::{Category, CategoryReport, EvaluationOutcome, EvaluatorStats, OutcomeKind, RunResult};
use tracing::warn;

use crate::registry::Registry;
use crate::runner::RunOutcomes;

pub fn aggregate(run: RunOutcomes, registry: &Registry) -> RunResult {
    let mut grouped: BTreeMap<Category, Vec<String>> = BTreeMap::new();
    for name in &run.evaluators {
        let category = match registry.descriptor(name) {
            Ok(d) => d.category,
            Err(err) => {
                warn!(evaluator = %name, error = %err, "Outcomes for an unregistered evaluator");
                Category::GeneralPurpose
            }
        };
        grouped.entry(category).or_default().push(name.clone());
    }
    for names in grouped.values_mut() {
        names.sort_by_key(|n| registry.position(n).unwrap_or(usize::MAX));
    }

    let mut by_evaluator: BTreeMap<String, Vec<EvaluationOutcome>> = BTreeMap::new();
    for outcome in run.outcomes {
        by_evaluator.entry(outcome.evaluator.clone()).or_default().push(outcome);
    }

    let categories = Category::ALL
        .iter()
        .filter_map(|category| {
            let evaluators = grouped.remove(category)?;
            let mut stats = Vec::with_capacity(evaluators.len());
            let mut outcomes = Vec::new();
            for name in &evaluators {
                let mut own = by_evaluator.remove(name).unwrap_or_default();
                own.sort_by_key(|o| o.record_index);
                stats.push(evaluator_stats(name, *category, &own));
                outcomes.extend(own);
            }
            Some(CategoryReport {
                category: *category,
                evaluators,
                stats,
                outcomes,
            })
        })
        .collect();

    RunResult {
        metadata: run.metadata,
        categories,
    }
}

pub fn evaluator_stats(evaluator: &str, category: Category, outcomes: &[EvaluationOutcome]) -> EvaluatorStats {
    let skipped = outcomes.iter().filter(|o| o.kind == OutcomeKind::Skipped).count();
    let failed = outcomes.iter().filter(|o| o.kind == OutcomeKind::Failure).count();
    let succeeded = outcomes.iter().filter(|o| o.kind.is_success()).count();
    let passed = outcomes.iter().filter(|o| o.passed == Some(true)).count();
    let pass_rate = if succeeded == 0 {
        0.0
    } else {
        passed as f64 / succeeded as f64
    };
    EvaluatorStats {
        evaluator: evaluator.to_string(),
        category,
        attempted: outcomes.len() - skipped,
        succeeded,
        passed,
        failed,
        skipped,
        pass_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::EvaluatorDescriptor;
    use crate::testing::StubEvaluator;
    use chrono::Utc;
    use foundry_eval_types::{ExecutionMode, FailureKind, FailureReason, RunMetadata, ScoreValue};
    use std::sync::Arc;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        for (name, category) in [
            ("coherence", Category::GeneralPurpose),
            ("f1_score", Category::TextualSimilarity),
            ("fluency", Category::GeneralPurpose),
        ] {
            registry
                .register(
                    EvaluatorDescriptor::new(name, category),
                    Arc::new(StubEvaluator::constant(name, 4.0)),
                )
                .unwrap();
        }
        registry
    }

    fn metadata(n: usize) -> RunMetadata {
        RunMetadata {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            dataset_size: n,
            execution_mode: ExecutionMode::Local,
            evaluator_count: 3,
            cancelled: false,
        }
    }

    fn ok(name: &str, idx: usize, passed: bool) -> EvaluationOutcome {
        EvaluationOutcome::success(name, idx, Some(ScoreValue::Scalar(4.0)), None, passed)
    }

    fn failed(name: &str, idx: usize) -> EvaluationOutcome {
        EvaluationOutcome::failure(name, idx, FailureReason::new(FailureKind::Authentication, "401"))
    }

    #[test]
    fn groups_by_category_in_registry_order() {
        let run = RunOutcomes {
            metadata: metadata(1),
            evaluators: vec!["fluency".into(), "f1_score".into(), "coherence".into()],
            outcomes: vec![ok("fluency", 0, true), ok("f1_score", 0, true), ok("coherence", 0, true)],
        };
        let result = aggregate(run, &registry());
        let categories: Vec<Category> = result.categories.iter().map(|c| c.category).collect();
        assert_eq!(categories, vec![Category::GeneralPurpose, Category::TextualSimilarity]);
        assert_eq!(result.categories[0].evaluators, vec!["coherence", "fluency"]);
    }

    #[test]
    fn evaluators_in_one_category_are_not_averaged() {
        let mut outcomes: Vec<EvaluationOutcome> = (0..5).map(|i| ok("coherence", i, true)).collect();
        outcomes.extend((0..5).map(|i| failed("fluency", i)));
        let run = RunOutcomes {
            metadata: metadata(5),
            evaluators: vec!["coherence".into(), "fluency".into()],
            outcomes,
        };
        let result = aggregate(run, &registry());
        let report = result.category(Category::GeneralPurpose).unwrap();

        let a = report.stats_for("coherence").unwrap();
        assert_eq!((a.attempted, a.succeeded, a.passed), (5, 5, 5));
        assert_eq!(a.pass_rate, 1.0);

        let b = report.stats_for("fluency").unwrap();
        assert_eq!((b.attempted, b.succeeded, b.failed), (5, 0, 5));
        assert_eq!(b.pass_rate, 0.0);
        assert_eq!(report.outcomes.len(), 10);
    }

    #[test]
    fn skipped_outcomes_are_not_attempts() {
        let outcomes = vec![
            ok("coherence", 0, true),
            ok("coherence", 1, false),
            EvaluationOutcome::skipped("coherence", 2, vec!["response".into()]),
            EvaluationOutcome::success("coherence", 3, None, Some("no score".into()), false),
        ];
        let stats = evaluator_stats("coherence", Category::GeneralPurpose, &outcomes);
        assert_eq!(stats.attempted, 3);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.succeeded, 3);
        assert_eq!(stats.passed, 1);
        assert!((stats.pass_rate - 1.0 / 3.0).abs() < 1e-9);
    }
}
