use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::api::RemoteSuite;

/// Execution status as reported by the platform.
///
/// Unrecognised strings deserialize to `Unknown`, which is treated as still
/// active so a session keeps polling until the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Passed,
    Failed,
    Skipped,
    Blocked,
    Cancelled,
    Timeout,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            JobStatus::Pending | JobStatus::Queued | JobStatus::Running | JobStatus::Unknown
        )
    }

    pub fn is_success(self) -> bool {
        matches!(self, JobStatus::Passed | JobStatus::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Passed => "PASSED",
            JobStatus::Failed => "FAILED",
            JobStatus::Skipped => "SKIPPED",
            JobStatus::Blocked => "BLOCKED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Timeout => "TIMEOUT",
            JobStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single remote test-suite execution being tracked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub status: JobStatus,
    /// Unix seconds, captured locally when tracking started.
    pub started_at: u64,
    pub progress: Option<f64>,
}

impl Job {
    pub fn running(id: impl Into<String>, started_at: u64) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            status: JobStatus::Running,
            started_at,
            progress: Some(0.0),
        }
    }

    /// Fold a status report into this job. `started_at` is never taken from
    /// the remote side.
    pub fn merge_remote(&mut self, remote: &RemoteSuite) {
        if let Some(ref name) = remote.name
            && !name.is_empty()
        {
            self.name = name.clone();
        }
        if let Some(status) = remote.status {
            self.status = status;
        }
        if remote.progress.is_some() {
            self.progress = remote.progress;
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

pub fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
