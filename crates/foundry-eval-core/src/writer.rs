//! JSONL result files, one per category, plus a JSON summary of the whole run.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use foundry_eval_types::{Category, CategoryReport, EvaluationOutcome, OutcomeKind, Record, RunResult};
use serde_json::{json, Map, Value};
use tracing::info;

pub const DEFAULT_OUTPUT_DIR: &str = "evaluation_results";

/// Paths produced by one `ResultWriter::write`.
#[derive(Debug, Clone)]
pub struct WrittenFiles {
    pub categories: Vec<(Category, PathBuf)>,
    pub summary: PathBuf,
}

pub struct ResultWriter {
    dir: PathBuf,
}

impl ResultWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `foundry_<category>_results_<ts>.jsonl` for every category in the run and
    /// `foundry_summary_<ts>.json` holding the full result.
    pub fn write(&self, result: &RunResult, records: &[Record]) -> Result<WrittenFiles> {
        fs::create_dir_all(&self.dir).with_context(|| format!("Failed to create {:?}", self.dir))?;
        let stamp = result.metadata.started_at.format("%Y%m%d_%H%M%S").to_string();

        let mut categories = Vec::with_capacity(result.categories.len());
        for report in &result.categories {
            let path = self
                .dir
                .join(format!("foundry_{}_results_{stamp}.jsonl", report.category.slug()));
            let file = fs::File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
            let mut out = BufWriter::new(file);
            for line in category_lines(report, records) {
                serde_json::to_writer(&mut out, &line)?;
                out.write_all(b"\n")?;
            }
            out.flush().with_context(|| format!("Failed to write {:?}", path))?;
            info!(category = %report.category, path = ?path, "Wrote category results");
            categories.push((report.category, path));
        }

        let summary = self.dir.join(format!("foundry_summary_{stamp}.json"));
        let content = serde_json::to_string_pretty(result)?;
        fs::write(&summary, content).with_context(|| format!("Failed to write {:?}", summary))?;

        Ok(WrittenFiles { categories, summary })
    }
}

/// One `{"inputs": .., "outputs": {evaluator: ..}}` object per record. Every evaluator of
/// the category appears in every record's outputs.
pub fn category_lines(report: &CategoryReport, records: &[Record]) -> Vec<Value> {
    let mut outputs: Vec<Map<String, Value>> = vec![Map::new(); records.len()];
    for outcome in &report.outcomes {
        if let Some(slot) = outputs.get_mut(outcome.record_index) {
            slot.insert(outcome.evaluator.clone(), output_entry(outcome));
        }
    }
    records
        .iter()
        .zip(outputs)
        .map(|(record, outputs)| {
            json!({
                "inputs": record,
                "outputs": outputs,
            })
        })
        .collect()
}

fn output_entry(outcome: &EvaluationOutcome) -> Value {
    match outcome.kind {
        OutcomeKind::Success => json!({
            "score": outcome.score,
            "reason": outcome.reason,
            "passed": outcome.passed,
        }),
        OutcomeKind::SuccessWithoutScore => json!({
            "score": Value::Null,
            "status": outcome.kind.as_str(),
            "reason": outcome.reason,
        }),
        OutcomeKind::Skipped => json!({
            "score": Value::Null,
            "status": outcome.kind.as_str(),
            "reason": outcome.explanation(),
            "missing_fields": outcome.missing_fields,
        }),
        OutcomeKind::Failure => json!({
            "score": Value::Null,
            "status": outcome.kind.as_str(),
            "reason": outcome.explanation(),
            "failure_kind": outcome.failure.as_ref().map(|f| f.kind),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use foundry_eval_types::{ExecutionMode, FailureKind, FailureReason, RunMetadata, ScoreValue};

    fn result() -> (RunResult, Vec<Record>) {
        let records = vec![
            Record::from_value(json!({"response": "a", "ground_truth": "a"})).unwrap(),
            Record::from_value(json!({"response": "b"})).unwrap(),
        ];
        let outcomes = vec![
            EvaluationOutcome::success("similarity", 0, Some(ScoreValue::Scalar(1.0)), None, true),
            EvaluationOutcome::skipped("similarity", 1, vec!["ground_truth".into()]),
            EvaluationOutcome::failure("f1_score", 0, FailureReason::new(FailureKind::Internal, "boom")),
            EvaluationOutcome::skipped("f1_score", 1, vec!["ground_truth".into()]),
        ];
        let report = CategoryReport {
            category: Category::TextualSimilarity,
            evaluators: vec!["similarity".into(), "f1_score".into()],
            stats: Vec::new(),
            outcomes,
        };
        let result = RunResult {
            metadata: RunMetadata {
                started_at: Utc::now(),
                finished_at: Utc::now(),
                dataset_size: 2,
                execution_mode: ExecutionMode::Local,
                evaluator_count: 2,
                cancelled: false,
            },
            categories: vec![report],
        };
        (result, records)
    }

    #[test]
    fn every_evaluator_appears_for_every_record() {
        let (result, records) = result();
        let lines = category_lines(&result.categories[0], &records);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["outputs"]["similarity"]["score"], json!(1.0));
        assert_eq!(lines[0]["outputs"]["f1_score"]["status"], json!("failure"));
        assert_eq!(lines[0]["outputs"]["f1_score"]["score"], Value::Null);
        assert_eq!(lines[1]["outputs"]["similarity"]["status"], json!("skipped"));
        assert_eq!(lines[1]["inputs"]["response"], json!("b"));
    }

    #[test]
    fn lines_follow_record_order_whatever_the_outcome_order() {
        let (mut result, records) = result();
        let expected = category_lines(&result.categories[0], &records);
        result.categories[0].outcomes.reverse();
        assert_eq!(category_lines(&result.categories[0], &records), expected);

        let short = category_lines(&result.categories[0], &records[..1]);
        assert_eq!(short.len(), 1);
        assert_eq!(short[0]["outputs"]["similarity"]["score"], json!(1.0));
    }

    #[test]
    fn writes_category_and_summary_files() {
        let dir = tempfile::tempdir().unwrap();
        let (result, records) = result();
        let written = ResultWriter::new(dir.path()).write(&result, &records).unwrap();

        let (category, path) = &written.categories[0];
        assert_eq!(*category, Category::TextualSimilarity);
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("foundry_textual_similarity_results_"), "{name}");
        assert!(name.ends_with(".jsonl"));

        let content = fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 2);

        let summary: RunResult = serde_json::from_str(&fs::read_to_string(&written.summary).unwrap()).unwrap();
        assert_eq!(summary.metadata.dataset_size, 2);
    }
}
