//! Project credential resolution with fallback.
//!
//! Sources are tried in order and the first token wins. Resolution happens once,
//! before a run starts; the resulting token is read-only for the whole run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::ConfigurationError;

const AZURE_MANAGEMENT_RESOURCE: &str = "https://management.azure.com/";
const CLI_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AccessToken {
    secret: String,
    pub source: String,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            source: source.into(),
        }
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.secret)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait CredentialSource: Send + Sync {
    fn name(&self) -> &str;
    async fn token(&self) -> Result<AccessToken>;
}

/// A token supplied directly through configuration.
pub struct StaticTokenCredential {
    token: Option<String>,
}

impl StaticTokenCredential {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

#[async_trait]
impl CredentialSource for StaticTokenCredential {
    fn name(&self) -> &str {
        "environment"
    }

    async fn token(&self) -> Result<AccessToken> {
        match &self.token {
            Some(t) => Ok(AccessToken::new(t.clone(), self.name())),
            None => bail!("AZURE_ACCESS_TOKEN is not set"),
        }
    }
}

/// Asks a logged-in Azure CLI for a token.
pub struct AzureCliCredential {
    program: String,
    resource: String,
}

impl AzureCliCredential {
    pub fn new() -> Self {
        Self {
            program: "az".to_string(),
            resource: AZURE_MANAGEMENT_RESOURCE.to_string(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

impl Default for AzureCliCredential {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
}

#[async_trait]
impl CredentialSource for AzureCliCredential {
    fn name(&self) -> &str {
        "azure_cli"
    }

    async fn token(&self) -> Result<AccessToken> {
        let output = tokio::time::timeout(
            CLI_TIMEOUT,
            tokio::process::Command::new(&self.program)
                .args(["account", "get-access-token", "--output", "json", "--resource"])
                .arg(&self.resource)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| anyhow!("'{}' did not answer within {:?}", self.program, CLI_TIMEOUT))?
        .with_context(|| format!("failed to launch '{}'", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("'{}' exited with {}: {}", self.program, output.status, stderr.trim());
        }
        let parsed: CliToken =
            serde_json::from_slice(&output.stdout).context("unexpected az token output")?;
        Ok(AccessToken::new(parsed.access_token, self.name()))
    }
}

/// Ordered fallback over credential sources.
#[derive(Clone, Default)]
pub struct CredentialChain {
    sources: Vec<Arc<dyn CredentialSource>>,
}

impl CredentialChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Environment token first, then the Azure CLI.
    pub fn standard(static_token: Option<String>) -> Self {
        Self::new()
            .with(Arc::new(StaticTokenCredential::new(static_token)))
            .with(Arc::new(AzureCliCredential::new()))
    }

    pub async fn resolve(&self) -> Result<AccessToken, ConfigurationError> {
        let mut failures = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            debug!(source = source.name(), "Trying credential source");
            match source.token().await {
                Ok(token) => {
                    info!(source = source.name(), "Authenticated");
                    return Ok(token);
                }
                Err(err) => {
                    warn!(source = source.name(), error = %err, "Credential source failed, falling back");
                    failures.push(format!("{}: {err:#}", source.name()));
                }
            }
        }
        if failures.is_empty() {
            failures.push("no credential sources configured".to_string());
        }
        Err(ConfigurationError::Credentials(failures.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait]
    impl CredentialSource for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn token(&self) -> Result<AccessToken> {
            bail!("refused")
        }
    }

    #[tokio::test]
    async fn falls_back_to_next_source() {
        let chain = CredentialChain::new()
            .with(Arc::new(Failing))
            .with(Arc::new(StaticTokenCredential::new(Some("tok".into()))));
        let token = chain.resolve().await.unwrap();
        assert_eq!(token.source, "environment");
        assert_eq!(token.bearer(), "Bearer tok");
    }

    #[tokio::test]
    async fn reports_every_failure_when_exhausted() {
        let chain = CredentialChain::new()
            .with(Arc::new(StaticTokenCredential::new(None)))
            .with(Arc::new(
                AzureCliCredential::new().with_program("definitely-not-an-az-binary"),
            ));
        let err = chain.resolve().await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("environment"), "{msg}");
        assert!(msg.contains("azure_cli"), "{msg}");
    }

    #[test]
    fn debug_output_hides_secret() {
        let token = AccessToken::new("super-secret", "environment");
        assert!(!format!("{token:?}").contains("super-secret"));
    }
}
