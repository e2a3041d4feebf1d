//! foundry-eval-core: evaluation orchestration for RAG and agent outputs.
//! Register evaluators, pick an execution strategy, run the evaluator x record
//! matrix with bounded concurrency, and aggregate outcomes by category.
//! See `examples/local_run.rs` for a quickstart.

pub mod aggregate;
pub mod config;
pub mod credentials;
pub mod datasource;
pub mod descriptor;
pub mod error;
pub mod evaluator;
mod http;
pub mod registry;
pub mod remote;
pub mod report;
pub mod runner;
pub mod runtime;
pub mod strategy;
pub mod testing;
pub mod writer;

pub mod evaluators {
    pub mod builtin;
    pub mod f1;
    pub mod prompt;
    pub mod safety;
    pub mod similarity;
}

pub use aggregate::aggregate;
pub use config::{
    InvocationContext, ModelConfig, PollPolicy, ProjectConfig, ProjectHandle, RateLimit, RateLimitScope, RetryPolicy,
    RunSettings, Settings,
};
pub use credentials::{AccessToken, AzureCliCredential, CredentialChain, CredentialSource, StaticTokenCredential};
pub use datasource::{DataSource, JsonlDataSource, VecDataSource};
pub use descriptor::{EvaluatorDescriptor, ScoreRange};
pub use error::{ConfigurationError, InvocationError, RegistryError};
pub use evaluator::{from_async_fn, ConfigHandle, Evaluator, RawScore};
pub use evaluators::{
    builtin::{builtin_evaluators, standard_registry},
    f1::F1ScoreEvaluator,
    prompt::PromptEvaluator,
    safety::SafetyEvaluator,
    similarity::SimilarityEvaluator,
};
pub use registry::{RegisteredEvaluator, Registry};
pub use remote::HttpRemoteClient;
pub use report::generate_html_report;
pub use runner::{Orchestrator, OrchestratorBuilder, RunOutcomes};
pub use runtime::RuntimeAdapter;
pub use strategy::{ExecutionStrategy, JobId, JobStatus, LocalExecution, RemoteClient, RemoteExecution};
pub use writer::{ResultWriter, WrittenFiles};

pub use foundry_eval_types::{
    Category, CategoryReport, ConfigKind, EvaluationOutcome, EvaluatorStats, ExecutionMode, FailureKind, FailureReason,
    OutcomeKind, Record, RunMetadata, RunResult, ScoreValue,
};

#[cfg(feature = "persistence")]
pub use foundry_eval_store::Store;
