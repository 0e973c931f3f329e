use std::sync::Arc;
use std::time::Duration;

use jobboard_core::{parse_status_response, ApiError, ApiErrorKind, JobId, JobMap};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::poller::SnapshotSource;
use crate::transport::{RequestOptions, Transport};

/// Timeout for the AI-backed issue endpoints, which routinely take a minute.
pub const AI_REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerRequest {
    pub repo: String,
    #[serde(rename = "issueNumber")]
    pub issue_number: u64,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Repo {
    pub name: String,
    pub full_name: String,
}

/// Typed access to the job server's HTTP API.
#[derive(Clone)]
pub struct JobBoardClient {
    transport: Arc<dyn Transport>,
}

impl JobBoardClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn fetch_status(&self) -> Result<JobMap, ApiError> {
        let body = self
            .transport
            .get_json("/api/status", RequestOptions::default())
            .await?;
        Ok(parse_status_response(&body))
    }

    pub async fn fetch_logs(&self, job_id: &JobId) -> Result<String, ApiError> {
        let body = self
            .transport
            .get_json(&format!("/api/logs/{job_id}"), RequestOptions::default())
            .await?;
        body.get("logs")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .ok_or_else(|| ApiError::new(ApiErrorKind::InvalidJson, "response has no logs field"))
    }

    pub async fn approve(&self, job_id: &JobId) -> Result<(), ApiError> {
        self.post_job_decision("/approve", job_id).await
    }

    pub async fn reject(&self, job_id: &JobId) -> Result<(), ApiError> {
        self.post_job_decision("/reject", job_id).await
    }

    /// Starts a job. A `Conflict` error carries the server's reason, e.g. a
    /// duplicate or an already running job for the issue.
    pub async fn trigger_job(&self, request: &TriggerRequest) -> Result<Option<JobId>, ApiError> {
        let body = serde_json::to_value(request)
            .map_err(|err| ApiError::new(ApiErrorKind::Unknown, err.to_string()))?;
        let response = self
            .transport
            .post_json("/jobs/trigger", &body, RequestOptions::default())
            .await?;
        Ok(["job_id", "jobId", "id"]
            .iter()
            .find_map(|key| response.get(*key).and_then(Value::as_str))
            .map(JobId::new))
    }

    pub async fn list_repos(&self) -> Result<Vec<Repo>, ApiError> {
        let body = self
            .transport
            .get_json("/repos", RequestOptions::default())
            .await?;
        let list = match body {
            Value::Object(mut map) => map.remove("repos").unwrap_or(Value::Array(Vec::new())),
            other => other,
        };
        serde_json::from_value(list)
            .map_err(|err| ApiError::new(ApiErrorKind::InvalidJson, err.to_string()))
    }

    pub async fn create_issue(&self, body: &Value) -> Result<Value, ApiError> {
        self.transport
            .post_json(
                "/issues/create",
                body,
                RequestOptions::default().with_timeout(AI_REQUEST_TIMEOUT),
            )
            .await
    }

    pub async fn enhance_issue(&self, body: &Value) -> Result<Value, ApiError> {
        self.transport
            .post_json(
                "/issues/enhance",
                body,
                RequestOptions::default().with_timeout(AI_REQUEST_TIMEOUT),
            )
            .await
    }

    /// Workflow phase state of one issue; `repo` is `owner/name`.
    pub async fn issue_workflow(&self, repo: &str, issue_number: u64) -> Result<Value, ApiError> {
        self.transport
            .get_json(
                &format!("/issues/{repo}/{issue_number}/workflow"),
                RequestOptions::default(),
            )
            .await
    }

    async fn post_job_decision(&self, path: &str, job_id: &JobId) -> Result<(), ApiError> {
        self.transport
            .post_json(path, &json!({ "job_id": job_id }), RequestOptions::default())
            .await
            .map(|_| ())
    }
}

#[async_trait::async_trait]
impl SnapshotSource for JobBoardClient {
    async fn fetch_snapshot(&self) -> Result<JobMap, ApiError> {
        self.fetch_status().await
    }
}
