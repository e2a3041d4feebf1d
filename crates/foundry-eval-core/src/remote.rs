use async_trait::async_trait;
use foundry_eval_types::{FailureKind, Record};
use serde::Deserialize;
use serde_json::json;

use crate::config::ProjectHandle;
use crate::error::InvocationError;
use crate::evaluator::RawScore;
use crate::http::send_json;
use crate::strategy::{JobId, JobStatus, RemoteClient};

/// Submit/poll client for the project's hosted evaluation endpoint.
///
/// `POST {endpoint}/evaluations/runs` with the evaluator name and input columns returns
/// a job id; `GET {endpoint}/evaluations/runs/{id}` reports its status.
pub struct HttpRemoteClient {
    http: reqwest::Client,
    project: ProjectHandle,
}

impl HttpRemoteClient {
    pub fn new(http: reqwest::Client, project: ProjectHandle) -> Self {
        Self { http, project }
    }

    fn runs_url(&self) -> String {
        format!("{}/evaluations/runs", self.project.config.endpoint())
    }
}

#[derive(Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    result: Option<RawScore>,
    #[serde(default)]
    error: Option<RemoteError>,
}

#[derive(Deserialize)]
struct RemoteError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: String,
}

impl RemoteError {
    fn into_invocation_error(self) -> InvocationError {
        let kind = match self.code.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("unauthorized") | Some("authentication_failed") => FailureKind::Authentication,
            Some("forbidden") | Some("permission_denied") | Some("authorization_failed") => {
                FailureKind::PermissionDenied
            }
            Some("throttled") | Some("too_many_requests") => FailureKind::RateLimited,
            Some("timeout") => FailureKind::Timeout,
            Some("internal_error") | Some("service_unavailable") => FailureKind::ServerError,
            Some("bad_request") | Some("invalid_input") => FailureKind::InvalidRequest,
            _ => FailureKind::Internal,
        };
        InvocationError::new(kind, self.message)
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn submit(&self, evaluator: &str, inputs: &Record) -> Result<JobId, InvocationError> {
        let config = &self.project.config;
        let request = self
            .http
            .post(self.runs_url())
            .header("Authorization", self.project.token.bearer())
            .json(&json!({
                "evaluator": evaluator,
                "inputs": inputs,
                "project": {
                    "subscription_id": config.subscription_id,
                    "resource_group_name": config.resource_group,
                    "project_name": config.project_name,
                },
            }));
        let resp: SubmitResponse = send_json(request).await?;
        Ok(JobId(resp.id))
    }

    async fn poll(&self, job: &JobId) -> Result<JobStatus, InvocationError> {
        let request = self
            .http
            .get(format!("{}/{}", self.runs_url(), job.0))
            .header("Authorization", self.project.token.bearer());
        let resp: StatusResponse = send_json(request).await?;
        parse_status(resp)
    }
}

fn parse_status(resp: StatusResponse) -> Result<JobStatus, InvocationError> {
    match resp.status.to_ascii_lowercase().as_str() {
        "queued" | "pending" | "running" | "notstarted" | "not_started" => Ok(JobStatus::Pending),
        "succeeded" | "completed" => Ok(JobStatus::Completed(resp.result.unwrap_or_default())),
        "failed" | "canceled" | "cancelled" => Ok(JobStatus::Failed(match resp.error {
            Some(err) => err.into_invocation_error(),
            None => InvocationError::new(FailureKind::Internal, "remote job failed without detail"),
        })),
        other => Err(InvocationError::malformed_response(format!(
            "unknown remote job status '{other}'"
        ))),
    }
}
