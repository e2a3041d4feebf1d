use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use foundry_eval_types::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ModelConfig, ProjectHandle};

/// What an evaluator hands back before normalization.
///
/// `value` may be a number, a numeric string, an object of numeric sub-scores, or
/// absent for evaluators that only explain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawScore {
    #[serde(default, alias = "score")]
    pub value: Option<Value>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl RawScore {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: Some(value.into()),
            reason: None,
        }
    }

    pub fn unscored() -> Self {
        Self::default()
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// The configuration handle selected by an evaluator's `ConfigKind`.
#[derive(Debug, Clone, Copy)]
pub enum ConfigHandle<'a> {
    Model(&'a ModelConfig),
    Project(&'a ProjectHandle),
    None,
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &str;
    async fn score(&self, record: &Record, config: ConfigHandle<'_>) -> Result<RawScore>;
}

/// Wrap an async closure over a record as an `Evaluator`.
pub fn from_async_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Evaluator>
where
    F: Send + Sync + 'static + Fn(&Record) -> Fut,
    Fut: Future<Output = Result<RawScore>> + Send + 'static,
{
    struct ClosureEvaluator<F, Fut>
    where
        F: Send + Sync + 'static + Fn(&Record) -> Fut,
        Fut: Future<Output = Result<RawScore>> + Send + 'static,
    {
        name: String,
        f: F,
    }

    #[async_trait]
    impl<F, Fut> Evaluator for ClosureEvaluator<F, Fut>
    where
        F: Send + Sync + 'static + Fn(&Record) -> Fut,
        Fut: Future<Output = Result<RawScore>> + Send + 'static,
    {
        fn name(&self) -> &str {
            &self.name
        }

        async fn score(&self, record: &Record, _config: ConfigHandle<'_>) -> Result<RawScore> {
            (self.f)(record).await
        }
    }

    Arc::new(ClosureEvaluator {
        name: name.into(),
        f,
    })
}
