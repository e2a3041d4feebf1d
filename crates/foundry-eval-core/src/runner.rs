use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use foundry_eval_types::{EvaluationOutcome, Record, RunMetadata, RunResult};
use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::aggregate::aggregate;
use crate::config::{InvocationContext, RateLimit, RateLimitScope, RetryPolicy, DEFAULT_MAX_IN_FLIGHT};
use crate::error::{ConfigurationError, InvocationError};
use crate::registry::{RegisteredEvaluator, Registry};
use crate::runtime::RuntimeAdapter;
use crate::strategy::ExecutionStrategy;

/// Outcomes of a finished matrix run, before category aggregation.
#[derive(Debug, Clone)]
pub struct RunOutcomes {
	pub metadata: RunMetadata,
	/// Evaluators in the order they were resolved.
	pub evaluators: Vec<String>,
	/// Evaluator-major, each evaluator's block in record order.
	pub outcomes: Vec<EvaluationOutcome>,
}

impl RunOutcomes {
	pub fn outcomes_for<'a>(&'a self, evaluator: &'a str) -> impl Iterator<Item = &'a EvaluationOutcome> + 'a {
		self.outcomes.iter().filter(move |o| o.evaluator == evaluator)
	}
}

pub struct OrchestratorBuilder {
	registry: Option<Arc<Registry>>,
	strategy: Option<Arc<dyn ExecutionStrategy>>,
	context: Arc<InvocationContext>,
	retry: RetryPolicy,
	rate_limit: RateLimit,
	max_in_flight: usize,
	cancel: CancellationToken,
}

impl OrchestratorBuilder {
	pub fn new() -> Self {
		Self {
			registry: None,
			strategy: None,
			context: Arc::new(InvocationContext::default()),
			retry: RetryPolicy::default(),
			rate_limit: RateLimit::default(),
			max_in_flight: DEFAULT_MAX_IN_FLIGHT,
			cancel: CancellationToken::new(),
		}
	}

	pub fn registry(mut self, registry: Arc<Registry>) -> Self {
		self.registry = Some(registry);
		self
	}

	pub fn strategy(mut self, strategy: Arc<dyn ExecutionStrategy>) -> Self {
		self.strategy = Some(strategy);
		self
	}

	pub fn context(mut self, context: InvocationContext) -> Self {
		self.context = Arc::new(context);
		self
	}

	pub fn retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;
		self
	}

	pub fn rate_limit(mut self, rate_limit: RateLimit) -> Self {
		self.rate_limit = rate_limit;
		self
	}

	pub fn max_in_flight(mut self, n: usize) -> Self {
		self.max_in_flight = n.max(1);
		self
	}

	pub fn cancellation(mut self, token: CancellationToken) -> Self {
		self.cancel = token;
		self
	}

	pub fn build(self) -> Result<Orchestrator> {
		let registry = self.registry.ok_or_else(|| anyhow::anyhow!("registry must be set"))?;
		let strategy = self.strategy.ok_or_else(|| anyhow::anyhow!("execution strategy must be set"))?;
		Ok(Orchestrator {
			registry,
			adapter: RuntimeAdapter::new(strategy, self.context, self.retry),
			rate_limit: RateLimit {
				scope: self.rate_limit.scope,
				permits: self.rate_limit.permits.max(1),
			},
			max_in_flight: self.max_in_flight,
			cancel: self.cancel,
		})
	}
}

impl Default for OrchestratorBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Runs the evaluator x record matrix through a bounded pool.
pub struct Orchestrator {
	registry: Arc<Registry>,
	adapter: RuntimeAdapter,
	rate_limit: RateLimit,
	max_in_flight: usize,
	cancel: CancellationToken,
}

impl Orchestrator {
	pub fn builder() -> OrchestratorBuilder {
		OrchestratorBuilder::new()
	}

	pub fn registry(&self) -> &Registry {
		&self.registry
	}

	/// Token that stops the current run from issuing new calls when cancelled.
	pub fn cancellation_token(&self) -> CancellationToken {
		self.cancel.clone()
	}

	/// Resolves an evaluator selection against the registry and the available configuration.
	///
	/// An empty selection means every registered evaluator whose configuration is available.
	/// Explicitly named evaluators must exist and have their configuration available.
	pub fn resolve(&self, names: &[String]) -> Result<Vec<&RegisteredEvaluator>, ConfigurationError> {
		let context = self.adapter.context();
		let selected: Vec<&RegisteredEvaluator> = if names.is_empty() {
			self.registry
				.iter()
				.filter(|entry| {
					let available = context.handle_for(entry.descriptor.config_kind).is_some();
					if !available {
						debug!(evaluator = entry.name(), kind = ?entry.descriptor.config_kind, "Configuration unavailable, not selected");
					}
					available
				})
				.collect()
		} else {
			let mut seen = HashSet::new();
			let mut out = Vec::with_capacity(names.len());
			for name in names {
				if !seen.insert(name.as_str()) {
					continue;
				}
				let entry = self.registry.resolve(name)?;
				if context.handle_for(entry.descriptor.config_kind).is_none() {
					return Err(ConfigurationError::MissingHandle {
						evaluator: name.clone(),
						kind: entry.descriptor.config_kind,
					});
				}
				out.push(entry);
			}
			out
		};

		if selected.is_empty() {
			return Err(ConfigurationError::NoEvaluators);
		}
		Ok(selected)
	}

	/// Runs every selected evaluator over every record.
	///
	/// Fails only on preconditions; per-pair problems become outcomes.
	pub async fn run(&self, records: &[Record], evaluators: &[String]) -> Result<RunOutcomes, ConfigurationError> {
		if records.is_empty() {
			return Err(ConfigurationError::EmptyDataset);
		}
		let selected = self.resolve(evaluators)?;
		let started_at = Utc::now();
		let n = records.len();
		info!(
			records = n,
			evaluators = selected.len(),
			mode = %self.adapter.mode(),
			max_in_flight = self.max_in_flight,
			"Starting evaluation run"
		);

		let budgets = self.budgets(selected.len());
		let mut slots: Vec<Option<EvaluationOutcome>> = vec![None; selected.len() * n];

		let jobs = (0..selected.len()).flat_map(|e| (0..n).map(move |r| (e, r)));
		let mut results = stream::iter(jobs)
			.map(|(e, r)| {
				let entry = selected[e];
				let budget = budgets[e].clone();
				let record = &records[r];
				let adapter = &self.adapter;
				let cancel = &self.cancel;
				async move {
					if cancel.is_cancelled() {
						return (e, r, cancelled(entry.name(), r));
					}
					let _permit = tokio::select! {
						biased;
						_ = cancel.cancelled() => return (e, r, cancelled(entry.name(), r)),
						permit = budget.acquire() => permit,
					};
					(e, r, adapter.evaluate(entry, r, record, cancel).await)
				}
			})
			.buffer_unordered(self.max_in_flight);

		while let Some((e, r, outcome)) = results.next().await {
			slots[e * n + r] = Some(outcome);
		}

		let outcomes: Vec<EvaluationOutcome> = slots
			.into_iter()
			.enumerate()
			.map(|(i, slot)| slot.unwrap_or_else(|| cancelled(selected[i / n].name(), i % n)))
			.collect();

		let was_cancelled = self.cancel.is_cancelled();
		let metadata = RunMetadata {
			started_at,
			finished_at: Utc::now(),
			dataset_size: n,
			execution_mode: self.adapter.mode(),
			evaluator_count: selected.len(),
			cancelled: was_cancelled,
		};
		info!(
			outcomes = outcomes.len(),
			cancelled = was_cancelled,
			elapsed_ms = (metadata.finished_at - started_at).num_milliseconds(),
			"Evaluation run finished"
		);

		Ok(RunOutcomes {
			metadata,
			evaluators: selected.iter().map(|e| e.name().to_string()).collect(),
			outcomes,
		})
	}

	/// `run` followed by category aggregation.
	pub async fn evaluate(&self, records: &[Record], evaluators: &[String]) -> Result<RunResult, ConfigurationError> {
		let outcomes = self.run(records, evaluators).await?;
		Ok(aggregate(outcomes, &self.registry))
	}

	fn budgets(&self, evaluators: usize) -> Vec<Arc<Semaphore>> {
		match self.rate_limit.scope {
			RateLimitScope::Shared => {
				let shared = Arc::new(Semaphore::new(self.rate_limit.permits));
				vec![shared; evaluators]
			}
			RateLimitScope::PerEvaluator => (0..evaluators)
				.map(|_| Arc::new(Semaphore::new(self.rate_limit.permits)))
				.collect(),
		}
	}
}

fn cancelled(evaluator: &str, record_index: usize) -> EvaluationOutcome {
	EvaluationOutcome::failure(evaluator, record_index, InvocationError::cancelled().into())
}
