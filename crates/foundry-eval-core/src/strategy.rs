//! Execution strategies: one interface, chosen once per run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use foundry_eval_types::{ExecutionMode, Record};
use tracing::debug;

use crate::config::{PollPolicy, RetryPolicy};
use crate::error::InvocationError;
use crate::evaluator::{ConfigHandle, RawScore};
use crate::registry::RegisteredEvaluator;

#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn mode(&self) -> ExecutionMode;

    /// One attempt at scoring `record`. Retries are the caller's business.
    async fn invoke(
        &self,
        entry: &RegisteredEvaluator,
        record: &Record,
        config: ConfigHandle<'_>,
    ) -> Result<RawScore, InvocationError>;
}

/// Calls the evaluator in-process and waits for it, bounded by a timeout.
pub struct LocalExecution {
    timeout: Duration,
}

impl LocalExecution {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ExecutionStrategy for LocalExecution {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Local
    }

    async fn invoke(
        &self,
        entry: &RegisteredEvaluator,
        record: &Record,
        config: ConfigHandle<'_>,
    ) -> Result<RawScore, InvocationError> {
        match tokio::time::timeout(self.timeout, entry.evaluator.score(record, config)).await {
            Ok(Ok(raw)) => Ok(raw),
            Ok(Err(err)) => Err(InvocationError::classify(&err)),
            Err(_) => Err(InvocationError::timeout(format!(
                "{} did not finish within {:?}",
                entry.name(),
                self.timeout
            ))),
        }
    }
}

/// Identifier of a submitted remote evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobId(pub String);

#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Pending,
    Completed(RawScore),
    Failed(InvocationError),
}

/// Transport to a hosted evaluation service.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn submit(&self, evaluator: &str, inputs: &Record) -> Result<JobId, InvocationError>;
    async fn poll(&self, job: &JobId) -> Result<JobStatus, InvocationError>;
}

/// Submits the evaluator's required columns to a remote service and polls for the result.
///
/// Transient poll errors stretch the wait between polls along the retry backoff; a
/// pending reply drops it back to the regular interval.
pub struct RemoteExecution {
    client: Arc<dyn RemoteClient>,
    poll: PollPolicy,
    backoff: RetryPolicy,
}

impl RemoteExecution {
    pub fn new(client: Arc<dyn RemoteClient>, poll: PollPolicy, backoff: RetryPolicy) -> Self {
        Self { client, poll, backoff }
    }

    fn wait_after(&self, transient_streak: u32) -> Duration {
        let interval = Duration::from_millis(self.poll.interval_ms);
        if transient_streak == 0 {
            interval
        } else {
            interval.max(self.backoff.delay_for(transient_streak))
        }
    }
}

#[async_trait]
impl ExecutionStrategy for RemoteExecution {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Remote
    }

    async fn invoke(
        &self,
        entry: &RegisteredEvaluator,
        record: &Record,
        _config: ConfigHandle<'_>,
    ) -> Result<RawScore, InvocationError> {
        let inputs = record.project(&entry.descriptor.required_fields);
        let job = self.client.submit(entry.name(), &inputs).await?;
        debug!(evaluator = entry.name(), job = %job.0, "Submitted remote evaluation");

        let mut transient_streak = 0u32;
        for poll in 1..=self.poll.max_polls {
            match self.client.poll(&job).await {
                Ok(JobStatus::Completed(raw)) => return Ok(raw),
                Ok(JobStatus::Failed(err)) => return Err(err),
                Ok(JobStatus::Pending) => transient_streak = 0,
                Err(err) if err.is_transient() => {
                    transient_streak += 1;
                    debug!(
                        evaluator = entry.name(),
                        poll,
                        streak = transient_streak,
                        error = %err,
                        "Transient poll failure"
                    );
                }
                Err(err) => return Err(err),
            }
            if poll < self.poll.max_polls {
                tokio::time::sleep(self.wait_after(transient_streak)).await;
            }
        }
        Err(InvocationError::timeout(format!(
            "remote job {} still pending after {} polls",
            job.0, self.poll.max_polls
        )))
    }
}
