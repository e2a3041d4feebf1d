use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use foundry_eval_types::{ConfigKind, ExecutionMode};
use serde::{Deserialize, Serialize};

use crate::credentials::AccessToken;
use crate::error::ConfigurationError;
use crate::evaluator::ConfigHandle;

const DEFAULT_API_VERSION: &str = "2024-02-01";
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;
const DEFAULT_LOCAL_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_MAX_POLLS: u32 = 60;
const DEFAULT_RATE_LIMIT_PERMITS: usize = 4;

/// Credentials for model-based (LLM judge) evaluators.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
}

impl ModelConfig {
    pub fn chat_completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint.trim_end_matches('/'),
            self.deployment,
            self.api_version
        )
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("deployment", &self.deployment)
            .field("api_version", &self.api_version)
            .finish()
    }
}

/// Identifies the hosted project that runs project-based and remote evaluations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    pub subscription_id: String,
    pub resource_group: String,
    pub project_name: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl ProjectConfig {
    pub fn endpoint(&self) -> String {
        match &self.endpoint {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!(
                "https://{p}.services.ai.azure.com/api/projects/{p}",
                p = self.project_name
            ),
        }
    }
}

/// A project together with the token resolved for it before the run.
#[derive(Debug, Clone)]
pub struct ProjectHandle {
    pub config: ProjectConfig,
    pub token: AccessToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = run once).
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        let ms = self.backoff_base_ms.saturating_mul(factor).min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    pub interval_ms: u64,
    pub max_polls: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    /// One budget shared by every evaluator.
    #[default]
    Shared,
    /// A separate budget per evaluator.
    PerEvaluator,
}

impl FromStr for RateLimitScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "shared" => Ok(RateLimitScope::Shared),
            "per_evaluator" => Ok(RateLimitScope::PerEvaluator),
            other => Err(format!("unknown rate limit scope '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimit {
    pub scope: RateLimitScope,
    pub permits: usize,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            scope: RateLimitScope::Shared,
            permits: DEFAULT_RATE_LIMIT_PERMITS,
        }
    }
}

/// Run-shaping knobs. Loadable from a YAML run file; environment values override it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub mode: ExecutionMode,
    /// Explicit evaluator selection; empty means every available built-in.
    pub evaluators: Vec<String>,
    pub max_in_flight: usize,
    pub local_timeout_secs: u64,
    pub retry: RetryPolicy,
    pub poll: PollPolicy,
    pub rate_limit: RateLimit,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Local,
            evaluators: Vec::new(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            local_timeout_secs: DEFAULT_LOCAL_TIMEOUT_SECS,
            retry: RetryPolicy::default(),
            poll: PollPolicy::default(),
            rate_limit: RateLimit::default(),
        }
    }
}

impl RunSettings {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("invalid run settings YAML")
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        Self::from_yaml_str(&content)
    }

    pub fn local_timeout(&self) -> Duration {
        Duration::from_secs(self.local_timeout_secs)
    }

    /// Applies `EVAL_*` overrides on top of the current values.
    pub fn apply_overrides<F>(&mut self, lookup: &F) -> Result<(), ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = parse_setting(lookup, "EVAL_EXECUTION_MODE")? {
            self.mode = mode;
        }
        if let Some(n) = parse_setting(lookup, "EVAL_MAX_IN_FLIGHT")? {
            self.max_in_flight = n;
        }
        if let Some(n) = parse_setting(lookup, "EVAL_MAX_RETRIES")? {
            self.retry.max_retries = n;
        }
        if let Some(ms) = parse_setting(lookup, "EVAL_BACKOFF_BASE_MS")? {
            self.retry.backoff_base_ms = ms;
        }
        if let Some(ms) = parse_setting(lookup, "EVAL_BACKOFF_MAX_MS")? {
            self.retry.backoff_max_ms = ms;
        }
        if let Some(secs) = parse_setting(lookup, "EVAL_LOCAL_TIMEOUT_SECS")? {
            self.local_timeout_secs = secs;
        }
        if let Some(ms) = parse_setting(lookup, "EVAL_POLL_INTERVAL_MS")? {
            self.poll.interval_ms = ms;
        }
        if let Some(n) = parse_setting(lookup, "EVAL_MAX_POLLS")? {
            self.poll.max_polls = n;
        }
        if let Some(scope) = parse_setting(lookup, "EVAL_RATE_LIMIT_SCOPE")? {
            self.rate_limit.scope = scope;
        }
        if let Some(n) = parse_setting(lookup, "EVAL_RATE_LIMIT_PERMITS")? {
            self.rate_limit.permits = n;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_in_flight == 0 {
            return Err(invalid("EVAL_MAX_IN_FLIGHT", "0", "must be at least 1"));
        }
        if self.rate_limit.permits == 0 {
            return Err(invalid("EVAL_RATE_LIMIT_PERMITS", "0", "must be at least 1"));
        }
        if self.local_timeout_secs == 0 {
            return Err(invalid("EVAL_LOCAL_TIMEOUT_SECS", "0", "must be at least 1"));
        }
        if self.poll.max_polls == 0 {
            return Err(invalid("EVAL_MAX_POLLS", "0", "must be at least 1"));
        }
        Ok(())
    }
}

/// Everything read from the environment-style configuration surface.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub model: Option<ModelConfig>,
    pub project: Option<ProjectConfig>,
    /// Static bearer token for the project, tried before the Azure CLI.
    pub access_token: Option<String>,
    pub run: RunSettings,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(RunSettings::default(), |key| std::env::var(key).ok())
    }

    /// Builds settings from any key/value lookup, starting from `run` defaults.
    pub fn from_lookup<F>(mut run: RunSettings, lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let model = setting_group(
            &lookup,
            &[
                "AZURE_OPENAI_ENDPOINT",
                "AZURE_OPENAI_API_KEY",
                "AZURE_OPENAI_DEPLOYMENT",
            ],
        )?
        .map(|v| ModelConfig {
            endpoint: v[0].clone(),
            api_key: v[1].clone(),
            deployment: v[2].clone(),
            api_version: non_empty(&lookup, "AZURE_OPENAI_API_VERSION")
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
        });

        let project = setting_group(
            &lookup,
            &[
                "AZURE_SUBSCRIPTION_ID",
                "AZURE_RESOURCE_GROUP",
                "AZURE_AI_FOUNDRY_PROJECT",
            ],
        )?
        .map(|v| ProjectConfig {
            subscription_id: v[0].clone(),
            resource_group: v[1].clone(),
            project_name: v[2].clone(),
            endpoint: non_empty(&lookup, "AZURE_AI_PROJECT_ENDPOINT"),
        });

        run.apply_overrides(&lookup)?;

        Ok(Self {
            model,
            project,
            access_token: non_empty(&lookup, "AZURE_ACCESS_TOKEN"),
            run,
        })
    }

    pub fn has(&self, kind: ConfigKind) -> bool {
        match kind {
            ConfigKind::Model => self.model.is_some(),
            ConfigKind::Project => self.project.is_some(),
            ConfigKind::None => true,
        }
    }

    pub fn log_summary(&self) {
        tracing::info!(
            mode = %self.run.mode,
            max_in_flight = self.run.max_in_flight,
            max_retries = self.run.retry.max_retries,
            rate_limit_scope = ?self.run.rate_limit.scope,
            rate_limit_permits = self.run.rate_limit.permits,
            model = self.model.as_ref().map(|m| m.deployment.as_str()).unwrap_or("unconfigured"),
            project = self.project.as_ref().map(|p| p.project_name.as_str()).unwrap_or("unconfigured"),
            "Loaded settings"
        );
    }
}

/// Read-only configuration handles shared by every invocation in a run.
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    pub model: Option<ModelConfig>,
    pub project: Option<ProjectHandle>,
}

impl InvocationContext {
    pub fn new(model: Option<ModelConfig>, project: Option<ProjectHandle>) -> Self {
        Self { model, project }
    }

    pub fn handle_for(&self, kind: ConfigKind) -> Option<ConfigHandle<'_>> {
        match kind {
            ConfigKind::Model => self.model.as_ref().map(ConfigHandle::Model),
            ConfigKind::Project => self.project.as_ref().map(ConfigHandle::Project),
            ConfigKind::None => Some(ConfigHandle::None),
        }
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// All-or-nothing group of keys: none set is `None`, some set is an error.
fn setting_group<F>(lookup: &F, keys: &[&str]) -> Result<Option<Vec<String>>, ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    let values: Vec<Option<String>> = keys.iter().map(|k| non_empty(lookup, k)).collect();
    if values.iter().all(Option::is_none) {
        return Ok(None);
    }
    if let Some(i) = values.iter().position(Option::is_none) {
        return Err(ConfigurationError::MissingSetting(keys[i].to_string()));
    }
    Ok(Some(values.into_iter().flatten().collect()))
}

fn parse_setting<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigurationError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(key, &raw, &e.to_string())),
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidSetting {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
