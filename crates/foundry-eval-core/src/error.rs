use std::path::PathBuf;

use foundry_eval_types::{ConfigKind, FailureKind, FailureReason};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("evaluator '{0}' is already registered")]
    DuplicateEvaluator(String),

    #[error("evaluator '{0}' is not registered")]
    UnknownEvaluator(String),
}

/// Fatal problems detected before any evaluator is invoked.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("missing required setting {0}")]
    MissingSetting(String),

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidSetting {
        key: String,
        value: String,
        reason: String,
    },

    #[error("no credential source produced a token: {0}")]
    Credentials(String),

    #[error("evaluator '{evaluator}' needs {kind:?} configuration, which is not available")]
    MissingHandle { evaluator: String, kind: ConfigKind },

    #[error("dataset is empty")]
    EmptyDataset,

    #[error("no evaluators resolved for this run")]
    NoEvaluators,

    #[error("failed to read dataset {path:?}: {reason}")]
    Dataset { path: PathBuf, reason: String },
}

/// A classified failure of one evaluator invocation. Never escapes the runtime adapter.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct InvocationError {
    pub kind: FailureKind,
    pub message: String,
}

impl InvocationError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn malformed_output(message: impl Into<String>) -> Self {
        Self::new(FailureKind::MalformedOutput, message)
    }

    pub fn malformed_response(message: impl Into<String>) -> Self {
        Self::new(FailureKind::MalformedResponse, message)
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "run cancelled before the call completed")
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Maps an HTTP status from a scoring endpoint onto the failure taxonomy.
    pub fn from_status(status: u16, body: impl AsRef<str>) -> Self {
        let kind = match status {
            401 => FailureKind::Authentication,
            403 => FailureKind::PermissionDenied,
            408 => FailureKind::Timeout,
            429 => FailureKind::RateLimited,
            500..=599 => FailureKind::ServerError,
            _ => FailureKind::InvalidRequest,
        };
        let body = body.as_ref();
        let snippet: String = body.chars().take(200).collect();
        Self::new(kind, format!("HTTP {status}: {snippet}"))
    }

    /// Classifies an error returned by an evaluator implementation.
    pub fn classify(err: &anyhow::Error) -> Self {
        if let Some(inv) = err.downcast_ref::<InvocationError>() {
            return inv.clone();
        }
        if let Some(req) = err.downcast_ref::<reqwest::Error>() {
            return Self::from_reqwest(req);
        }
        if err.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            return Self::timeout(err.to_string());
        }
        if err.downcast_ref::<serde_json::Error>().is_some() {
            return Self::malformed_response(format!("{err:#}"));
        }
        Self::new(FailureKind::Internal, format!("{err:#}"))
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::timeout(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), err.to_string());
        }
        if err.is_decode() {
            return Self::malformed_response(err.to_string());
        }
        if err.is_connect() || err.is_request() || err.is_body() {
            return Self::new(FailureKind::Network, err.to_string());
        }
        Self::new(FailureKind::Internal, err.to_string())
    }
}

impl From<reqwest::Error> for InvocationError {
    fn from(err: reqwest::Error) -> Self {
        Self::from_reqwest(&err)
    }
}

impl From<InvocationError> for FailureReason {
    fn from(err: InvocationError) -> Self {
        FailureReason::new(err.kind, err.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_failure_kinds() {
        assert_eq!(InvocationError::from_status(401, "").kind, FailureKind::Authentication);
        assert_eq!(InvocationError::from_status(403, "").kind, FailureKind::PermissionDenied);
        assert_eq!(InvocationError::from_status(429, "").kind, FailureKind::RateLimited);
        assert_eq!(InvocationError::from_status(503, "").kind, FailureKind::ServerError);
        assert_eq!(InvocationError::from_status(400, "").kind, FailureKind::InvalidRequest);
    }

    #[test]
    fn transient_only_for_retryable_kinds() {
        assert!(InvocationError::from_status(429, "slow down").is_transient());
        assert!(InvocationError::from_status(502, "").is_transient());
        assert!(!InvocationError::from_status(401, "").is_transient());
        assert!(!InvocationError::malformed_output("score 9").is_transient());
    }

    #[test]
    fn classify_preserves_invocation_errors() {
        let err = anyhow::Error::new(InvocationError::from_status(429, "quota"));
        assert_eq!(InvocationError::classify(&err).kind, FailureKind::RateLimited);

        let other = anyhow::anyhow!("boom");
        assert_eq!(InvocationError::classify(&other).kind, FailureKind::Internal);
    }
}
