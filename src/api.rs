use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::job::JobStatus;
use crate::review::{PrReviewRequest, PrReviewResponse};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Response envelope used by every platform endpoint.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<ErrorDetails>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetails {
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap the payload, turning `success: false` into an error.
    pub fn into_data(self, what: &str) -> Result<Option<T>> {
        if !self.success {
            let msg = self
                .error
                .and_then(|e| e.message)
                .or(self.message)
                .unwrap_or_else(|| format!("failed to {what}"));
            return Err(Error::Api(msg));
        }
        Ok(self.data)
    }
}

/// A test suite as listed by `GET /test-suites`. Only the fields the client
/// uses are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSuite {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub suite_type: Option<String>,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub progress: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_tests: Option<u64>,
    pub passed_tests: Option<u64>,
    pub failed_tests: Option<u64>,
    pub coverage: Option<f64>,
    pub execution_time: Option<u64>,
    #[serde(rename = "activePRs")]
    pub active_prs: Option<u64>,
    #[serde(rename = "mergedPRs")]
    pub merged_prs: Option<u64>,
    pub generated_test_suites: Option<u64>,
    pub running_tests: Option<u64>,
}

/// One run of a suite as listed by `GET /test-executions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteExecution {
    pub id: String,
    #[serde(default)]
    pub suite_id: Option<String>,
    #[serde(default)]
    pub pr_number: Option<u64>,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    /// Milliseconds.
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub results: Option<ExecutionResults>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResults {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub passed: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub skipped: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestSummary {
    pub number: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// `OPEN`, `MERGED` or `CLOSED`.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub tests_generated: Option<u64>,
    #[serde(default)]
    pub tests_passed: Option<u64>,
    #[serde(default)]
    pub tests_failed: Option<u64>,
    #[serde(default)]
    pub coverage: Option<f64>,
}

// ---------------------------------------------------------------------------
// Client abstraction (for testability)
// ---------------------------------------------------------------------------

/// The remote platform. Calls block; async callers run them on the blocking pool.
pub trait PlatformApi: Send + Sync {
    /// Ask the platform to start executing a suite.
    fn start_execution(&self, suite_id: &str) -> Result<serde_json::Value>;

    /// Ask the platform to stop a running execution.
    fn stop_execution(&self, execution_id: &str) -> Result<()>;

    /// Execution history, most recent as the platform orders it.
    fn list_executions(&self) -> Result<Vec<RemoteExecution>>;

    /// Current status of every known suite.
    fn list_suites(&self) -> Result<Vec<RemoteSuite>>;

    fn get_suite(&self, suite_id: &str) -> Result<RemoteSuite>;

    fn delete_suite(&self, suite_id: &str) -> Result<()>;

    fn list_pull_requests(&self) -> Result<Vec<PullRequestSummary>>;

    /// Aggregate dashboard numbers.
    fn dashboard_stats(&self) -> Result<DashboardStats>;

    /// Run the AI reviewer over a pull request.
    fn review_pull_request(&self, request: &PrReviewRequest) -> Result<PrReviewResponse>;
}

/// `PlatformApi` over HTTP, rooted at `{api_url}/api`.
pub struct HttpPlatformApi {
    base_url: String,
    token: Option<String>,
    agent: ureq::Agent,
}

impl HttpPlatformApi {
    pub fn new(config: &Config) -> Self {
        Self::with_options(
            &config.api_url,
            config.resolve_token(),
            config.request_timeout(),
        )
    }

    pub fn with_options(api_url: &str, token: Option<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            base_url: format!("{}/api", api_url.trim_end_matches('/')),
            token,
            agent,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let url = format!("{}{path}", self.base_url);
        let mut req = self
            .agent
            .request(method, &url)
            .set("Content-Type", "application/json");
        if let Some(ref token) = self.token {
            req = req.set("Authorization", &format!("Bearer {token}"));
        }
        req
    }

    fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        path: &str,
        body: Option<serde_json::Value>,
        what: &str,
    ) -> Result<Option<T>> {
        debug!(method, path, "platform request");
        let req = self.request(method, path);
        let result = match body {
            Some(ref b) => req.send_json(b),
            None => req.call(),
        };

        match result {
            Ok(response) => {
                let envelope: ApiEnvelope<T> = response
                    .into_json()
                    .map_err(|e| Error::Api(format!("failed to parse response ({what}): {e}")))?;
                envelope.into_data(what)
            }
            Err(ureq::Error::Status(401, _)) => Err(Error::Unauthorized(format!(
                "platform rejected credentials while trying to {what}"
            ))),
            Err(ureq::Error::Status(code, response)) => {
                let msg = response
                    .into_json::<ApiEnvelope<serde_json::Value>>()
                    .ok()
                    .and_then(|env| env.error.and_then(|e| e.message).or(env.message))
                    .unwrap_or_else(|| format!("failed to {what}"));
                Err(Error::Api(format!("{msg} (HTTP {code})")))
            }
            Err(e) => Err(Error::Api(format!("failed to {what}: {e}"))),
        }
    }
}

impl PlatformApi for HttpPlatformApi {
    fn start_execution(&self, suite_id: &str) -> Result<serde_json::Value> {
        let data = self.call(
            "POST",
            "/test-executions",
            Some(serde_json::json!({ "suiteId": suite_id })),
            "start test execution",
        )?;
        Ok(data.unwrap_or(serde_json::Value::Null))
    }

    fn stop_execution(&self, execution_id: &str) -> Result<()> {
        let path = format!("/test-executions/{execution_id}/stop");
        self.call::<serde_json::Value>("POST", &path, None, "stop test execution")?;
        Ok(())
    }

    fn list_executions(&self) -> Result<Vec<RemoteExecution>> {
        let data: Option<Vec<RemoteExecution>> =
            self.call("GET", "/test-executions", None, "fetch test executions")?;
        Ok(data.unwrap_or_default())
    }

    fn list_suites(&self) -> Result<Vec<RemoteSuite>> {
        let data: Option<Vec<RemoteSuite>> =
            self.call("GET", "/test-suites", None, "fetch test suites")?;
        Ok(data.unwrap_or_default())
    }

    fn get_suite(&self, suite_id: &str) -> Result<RemoteSuite> {
        let path = format!("/test-suites/{suite_id}");
        let data: Option<RemoteSuite> = self.call("GET", &path, None, "fetch test suite")?;
        data.ok_or_else(|| Error::Api(format!("test suite {suite_id} response missing data")))
    }

    fn delete_suite(&self, suite_id: &str) -> Result<()> {
        let path = format!("/test-suites/{suite_id}");
        self.call::<serde_json::Value>("DELETE", &path, None, "delete test suite")?;
        Ok(())
    }

    fn list_pull_requests(&self) -> Result<Vec<PullRequestSummary>> {
        let data: Option<Vec<PullRequestSummary>> =
            self.call("GET", "/pull-requests", None, "fetch pull requests")?;
        Ok(data.unwrap_or_default())
    }

    fn dashboard_stats(&self) -> Result<DashboardStats> {
        let data: Option<DashboardStats> =
            self.call("GET", "/dashboard/stats", None, "fetch dashboard stats")?;
        data.ok_or_else(|| Error::Api("dashboard stats response missing data".to_string()))
    }

    fn review_pull_request(&self, request: &PrReviewRequest) -> Result<PrReviewResponse> {
        let body = serde_json::to_value(request)
            .map_err(|e| Error::Review(format!("failed to encode review request: {e}")))?;
        let data: Option<PrReviewResponse> =
            self.call("POST", "/review/pr", Some(body), "review pull request")?;
        data.ok_or_else(|| Error::Review("review response missing data".to_string()))
    }
}
