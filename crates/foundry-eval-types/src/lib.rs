use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tabled::{Table, Tabled};

/// One evaluation unit: field name to value, exactly as read from one dataset line.
///
/// A field counts as present only when it exists and is not `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
	fields: Map<String, Value>,
}

impl Record {
	pub fn new(fields: Map<String, Value>) -> Self {
		Self { fields }
	}

	/// Builds a record from a JSON object; any other JSON shape yields `None`.
	pub fn from_value(value: Value) -> Option<Self> {
		match value {
			Value::Object(fields) => Some(Self { fields }),
			_ => None,
		}
	}

	pub fn get(&self, field: &str) -> Option<&Value> {
		self.fields.get(field).filter(|v| !v.is_null())
	}

	pub fn get_str(&self, field: &str) -> Option<&str> {
		self.get(field).and_then(Value::as_str)
	}

	pub fn has_field(&self, field: &str) -> bool {
		self.get(field).is_some()
	}

	/// Required fields this record does not supply, in the order they were asked for.
	pub fn missing_fields(&self, required: &[String]) -> Vec<String> {
		required
			.iter()
			.filter(|f| !self.has_field(f))
			.cloned()
			.collect()
	}

	/// A copy holding only the named fields that are present.
	pub fn project(&self, fields: &[String]) -> Record {
		let fields = fields
			.iter()
			.filter_map(|f| self.get(f).map(|v| (f.clone(), v.clone())))
			.collect();
		Record { fields }
	}

	pub fn fields(&self) -> &Map<String, Value> {
		&self.fields
	}

	pub fn len(&self) -> usize {
		self.fields.len()
	}

	pub fn is_empty(&self) -> bool {
		self.fields.is_empty()
	}
}

impl From<Map<String, Value>> for Record {
	fn from(fields: Map<String, Value>) -> Self {
		Self { fields }
	}
}

/// Reporting group an evaluator belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
	RagRetrieval,
	Agents,
	GeneralPurpose,
	SafetySecurity,
	TextualSimilarity,
}

impl Category {
	pub const ALL: [Category; 5] = [
		Category::RagRetrieval,
		Category::Agents,
		Category::GeneralPurpose,
		Category::SafetySecurity,
		Category::TextualSimilarity,
	];

	/// File-name friendly identifier.
	pub fn slug(&self) -> &'static str {
		match self {
			Category::RagRetrieval => "rag_retrieval",
			Category::Agents => "agents",
			Category::GeneralPurpose => "general_purpose",
			Category::SafetySecurity => "safety_security",
			Category::TextualSimilarity => "textual_similarity",
		}
	}

	pub fn label(&self) -> &'static str {
		match self {
			Category::RagRetrieval => "RAG & Retrieval",
			Category::Agents => "Agents",
			Category::GeneralPurpose => "General Purpose",
			Category::SafetySecurity => "Safety & Security",
			Category::TextualSimilarity => "Textual Similarity",
		}
	}
}

impl fmt::Display for Category {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.label())
	}
}

/// Which configuration handle an evaluator needs to be invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigKind {
	/// Model endpoint credentials (LLM judges).
	Model,
	/// Project handle (hosted safety service).
	Project,
	None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
	#[default]
	Local,
	Remote,
}

impl fmt::Display for ExecutionMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ExecutionMode::Local => f.write_str("local"),
			ExecutionMode::Remote => f.write_str("remote"),
		}
	}
}

impl FromStr for ExecutionMode {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"local" => Ok(ExecutionMode::Local),
			"remote" | "cloud" => Ok(ExecutionMode::Remote),
			other => Err(format!("unknown execution mode '{other}' (expected local or remote)")),
		}
	}
}

/// A normalized score: one number, or named sub-scores for composite evaluators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScoreValue {
	Scalar(f64),
	Composite(BTreeMap<String, f64>),
}

impl ScoreValue {
	pub fn as_scalar(&self) -> Option<f64> {
		match self {
			ScoreValue::Scalar(v) => Some(*v),
			ScoreValue::Composite(_) => None,
		}
	}
}

impl fmt::Display for ScoreValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ScoreValue::Scalar(v) => write!(f, "{v}"),
			ScoreValue::Composite(parts) => {
				let joined = parts
					.iter()
					.map(|(k, v)| format!("{k}={v}"))
					.collect::<Vec<_>>()
					.join(", ");
				write!(f, "{{{joined}}}")
			}
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
	Success,
	SuccessWithoutScore,
	Skipped,
	Failure,
}

impl OutcomeKind {
	pub fn is_success(&self) -> bool {
		matches!(self, OutcomeKind::Success | OutcomeKind::SuccessWithoutScore)
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			OutcomeKind::Success => "success",
			OutcomeKind::SuccessWithoutScore => "success_without_score",
			OutcomeKind::Skipped => "skipped",
			OutcomeKind::Failure => "failure",
		}
	}
}

/// Classified cause of a failed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
	Authentication,
	PermissionDenied,
	InvalidRequest,
	RateLimited,
	Network,
	ServerError,
	Timeout,
	MalformedResponse,
	/// Score outside the declared range, or an unusable result shape.
	MalformedOutput,
	MissingConfiguration,
	Cancelled,
	Internal,
}

impl FailureKind {
	/// Transient failures are retried with backoff; everything else is terminal at once.
	pub fn is_transient(&self) -> bool {
		matches!(
			self,
			FailureKind::RateLimited
				| FailureKind::Network
				| FailureKind::ServerError
				| FailureKind::Timeout
		)
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			FailureKind::Authentication => "authentication",
			FailureKind::PermissionDenied => "permission_denied",
			FailureKind::InvalidRequest => "invalid_request",
			FailureKind::RateLimited => "rate_limited",
			FailureKind::Network => "network",
			FailureKind::ServerError => "server_error",
			FailureKind::Timeout => "timeout",
			FailureKind::MalformedResponse => "malformed_response",
			FailureKind::MalformedOutput => "malformed_output",
			FailureKind::MissingConfiguration => "missing_configuration",
			FailureKind::Cancelled => "cancelled",
			FailureKind::Internal => "internal",
		}
	}
}

impl fmt::Display for FailureKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReason {
	pub kind: FailureKind,
	pub message: String,
}

impl FailureReason {
	pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
		Self { kind, message: message.into() }
	}
}

impl fmt::Display for FailureReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.kind, self.message)
	}
}

/// Result of one evaluator scoring one record. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
	pub evaluator: String,
	pub record_index: usize,
	pub kind: OutcomeKind,
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub score: Option<ScoreValue>,
	/// Free-text explanation from the evaluator.
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub reason: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub passed: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub failure: Option<FailureReason>,
	#[serde(skip_serializing_if = "Vec::is_empty", default)]
	pub missing_fields: Vec<String>,
	#[serde(default)]
	pub attempts: u32,
	#[serde(default)]
	pub duration_ms: u64,
}

impl EvaluationOutcome {
	/// A successful outcome. Without a score the kind is `SuccessWithoutScore` and no
	/// pass/fail is derived.
	pub fn success(
		evaluator: impl Into<String>,
		record_index: usize,
		score: Option<ScoreValue>,
		reason: Option<String>,
		passed: bool,
	) -> Self {
		let (kind, passed) = match score {
			Some(_) => (OutcomeKind::Success, Some(passed)),
			None => (OutcomeKind::SuccessWithoutScore, None),
		};
		Self {
			evaluator: evaluator.into(),
			record_index,
			kind,
			score,
			reason,
			passed,
			failure: None,
			missing_fields: Vec::new(),
			attempts: 0,
			duration_ms: 0,
		}
	}

	pub fn skipped(evaluator: impl Into<String>, record_index: usize, missing_fields: Vec<String>) -> Self {
		Self {
			evaluator: evaluator.into(),
			record_index,
			kind: OutcomeKind::Skipped,
			score: None,
			reason: Some(format!("missing required fields: {}", missing_fields.join(", "))),
			passed: None,
			failure: None,
			missing_fields,
			attempts: 0,
			duration_ms: 0,
		}
	}

	pub fn failure(evaluator: impl Into<String>, record_index: usize, failure: FailureReason) -> Self {
		Self {
			evaluator: evaluator.into(),
			record_index,
			kind: OutcomeKind::Failure,
			score: None,
			reason: None,
			passed: None,
			failure: Some(failure),
			missing_fields: Vec::new(),
			attempts: 0,
			duration_ms: 0,
		}
	}

	pub fn with_timing(mut self, attempts: u32, duration_ms: u64) -> Self {
		self.attempts = attempts;
		self.duration_ms = duration_ms;
		self
	}

	/// Human readable explanation: evaluator reason, skip cause or failure cause.
	pub fn explanation(&self) -> String {
		match (&self.failure, &self.reason) {
			(Some(failure), _) => failure.to_string(),
			(None, Some(reason)) => reason.clone(),
			(None, None) => String::new(),
		}
	}
}

/// Per-evaluator counts. `attempted` excludes skipped pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorStats {
	pub evaluator: String,
	pub category: Category,
	pub attempted: usize,
	pub succeeded: usize,
	pub passed: usize,
	pub failed: usize,
	pub skipped: usize,
	pub pass_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryReport {
	pub category: Category,
	/// Evaluator names in registration order.
	pub evaluators: Vec<String>,
	pub stats: Vec<EvaluatorStats>,
	/// Every (record, evaluator) outcome, grouped by evaluator then record index.
	pub outcomes: Vec<EvaluationOutcome>,
}

impl CategoryReport {
	pub fn stats_for(&self, evaluator: &str) -> Option<&EvaluatorStats> {
		self.stats.iter().find(|s| s.evaluator == evaluator)
	}

	pub fn outcomes_for<'a>(&'a self, evaluator: &'a str) -> impl Iterator<Item = &'a EvaluationOutcome> + 'a {
		self.outcomes.iter().filter(move |o| o.evaluator == evaluator)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
	pub started_at: DateTime<Utc>,
	pub finished_at: DateTime<Utc>,
	pub dataset_size: usize,
	pub execution_mode: ExecutionMode,
	pub evaluator_count: usize,
	#[serde(default)]
	pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
	pub metadata: RunMetadata,
	pub categories: Vec<CategoryReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct SummaryRow {
	category: String,
	evaluator: String,
	attempted: usize,
	succeeded: usize,
	passed: usize,
	skipped: usize,
	failed: usize,
	pass_rate: String,
}

impl RunResult {
	pub fn category(&self, category: Category) -> Option<&CategoryReport> {
		self.categories.iter().find(|c| c.category == category)
	}

	pub fn stats(&self, evaluator: &str) -> Option<&EvaluatorStats> {
		self.categories.iter().find_map(|c| c.stats_for(evaluator))
	}

	pub fn evaluator_stats(&self) -> impl Iterator<Item = &EvaluatorStats> {
		self.categories.iter().flat_map(|c| c.stats.iter())
	}

	pub fn outcomes(&self) -> impl Iterator<Item = &EvaluationOutcome> {
		self.categories.iter().flat_map(|c| c.outcomes.iter())
	}

	pub fn summary_table(&self) -> String {
		let rows: Vec<SummaryRow> = self
			.evaluator_stats()
			.map(|s| SummaryRow {
				category: s.category.label().to_string(),
				evaluator: s.evaluator.clone(),
				attempted: s.attempted,
				succeeded: s.succeeded,
				passed: s.passed,
				skipped: s.skipped,
				failed: s.failed,
				pass_rate: format!("{:.1}%", s.pass_rate * 100.0),
			})
			.collect();

		let table = Table::new(rows);
		let table_str = table.to_string();

		let failed: usize = self.evaluator_stats().map(|s| s.failed).sum();
		let skipped: usize = self.evaluator_stats().map(|s| s.skipped).sum();
		let summary_text = format!(
			"Mode: {}  Records: {}  Evaluators: {}  Failed calls: {}  Skipped: {}{}",
			self.metadata.execution_mode,
			self.metadata.dataset_size,
			self.metadata.evaluator_count,
			failed,
			skipped,
			if self.metadata.cancelled { "  (cancelled)" } else { "" },
		);

		format!("{}\n\n{}\n", table_str, summary_text)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn null_fields_count_as_missing() {
		let record = Record::from_value(json!({"query": "q", "ground_truth": null})).unwrap();
		let required = vec!["query".to_string(), "ground_truth".to_string(), "context".to_string()];
		assert_eq!(record.missing_fields(&required), vec!["ground_truth", "context"]);
	}

	#[test]
	fn project_keeps_only_requested_fields() {
		let record = Record::from_value(json!({"query": "q", "context": "c", "response": "r"})).unwrap();
		let projected = record.project(&["query".to_string(), "response".to_string()]);
		assert_eq!(projected.len(), 2);
		assert!(!projected.has_field("context"));
	}

	#[test]
	fn score_value_serializes_as_number_or_object() {
		let scalar = serde_json::to_value(ScoreValue::Scalar(4.0)).unwrap();
		assert_eq!(scalar, json!(4.0));

		let mut parts = BTreeMap::new();
		parts.insert("violence".to_string(), 1.0);
		let composite = serde_json::to_value(ScoreValue::Composite(parts)).unwrap();
		assert_eq!(composite, json!({"violence": 1.0}));
	}

	#[test]
	fn success_without_score_has_no_verdict() {
		let outcome = EvaluationOutcome::success("fluency", 0, None, Some("n/a".into()), true);
		assert_eq!(outcome.kind, OutcomeKind::SuccessWithoutScore);
		assert_eq!(outcome.passed, None);
	}

	#[test]
	fn execution_mode_parses_aliases() {
		assert_eq!("Remote".parse::<ExecutionMode>().unwrap(), ExecutionMode::Remote);
		assert_eq!("cloud".parse::<ExecutionMode>().unwrap(), ExecutionMode::Remote);
		assert!("batch".parse::<ExecutionMode>().is_err());
	}
}
