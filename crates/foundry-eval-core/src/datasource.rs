use std::path::PathBuf;

use async_trait::async_trait;
use foundry_eval_types::Record;
use serde_json::Value;
use tracing::debug;

use crate::error::ConfigurationError;

#[async_trait]
pub trait DataSource: Send + Sync {
    async fn load(&self) -> Result<Vec<Record>, ConfigurationError>;
}

pub struct VecDataSource {
    records: Vec<Record>,
}

impl VecDataSource {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl DataSource for VecDataSource {
    async fn load(&self) -> Result<Vec<Record>, ConfigurationError> {
        Ok(self.records.clone())
    }
}

/// Read JSONL where each non-blank line is one JSON object, e.g.
/// `{"query": "...", "context": "...", "response": "...", "ground_truth": "..."}`.
///
/// Record indices follow line order, blank lines excluded.
pub struct JsonlDataSource {
    path: PathBuf,
}

impl JsonlDataSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn error(&self, reason: impl Into<String>) -> ConfigurationError {
        ConfigurationError::Dataset {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl DataSource for JsonlDataSource {
    async fn load(&self) -> Result<Vec<Record>, ConfigurationError> {
        let content = read_to_string(&self.path).await.map_err(|e| self.error(e.to_string()))?;
        let records = parse_jsonl(&content).map_err(|reason| self.error(reason))?;
        debug!(path = ?self.path, records = records.len(), "Loaded dataset");
        Ok(records)
    }
}

pub fn parse_jsonl(content: &str) -> Result<Vec<Record>, String> {
    let mut records = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value =
            serde_json::from_str(line).map_err(|e| format!("invalid JSON on line {}: {e}", idx + 1))?;
        let record = Record::from_value(value).ok_or_else(|| format!("line {}: expected object", idx + 1))?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(not(feature = "sync-fs"))]
async fn read_to_string(path: &PathBuf) -> std::io::Result<String> {
    tokio::fs::read_to_string(path).await
}

#[cfg(feature = "sync-fs")]
async fn read_to_string(path: &PathBuf) -> std::io::Result<String> {
    let path = path.clone();
    tokio::task::spawn_blocking(move || std::fs::read_to_string(path))
        .await
        .map_err(std::io::Error::other)?
}
