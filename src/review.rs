use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

static PR_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:https?://)?(?:www\.)?github\.com/([^/]+)/([^/]+)/pull/(\d+)")
        .expect("PR URL regex is valid")
});

static FILE_ISSUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*:?\s*(.+)").expect("file issue regex is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrReviewRequest {
    pub repo_owner: String,
    pub repo_name: String,
    pub pr_number: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Success,
    Error,
    NoSuggestions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffComment {
    pub file_name: String,
    pub diff_line: i64,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrReviewResponse {
    pub status: ReviewStatus,
    pub pr_number: u64,
    #[serde(default)]
    pub review_summary: Option<String>,
    #[serde(default)]
    pub comments: Vec<DiffComment>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl PrReviewResponse {
    /// Surface a reviewer-side `error` status as an `Err`.
    pub fn into_result(self) -> Result<Self> {
        if self.status == ReviewStatus::Error {
            let msg = self
                .error_message
                .or(self.review_summary)
                .unwrap_or_else(|| "failed to review pull request".to_string());
            return Err(Error::Review(msg));
        }
        Ok(self)
    }
}

/// Extract owner, repo and PR number from a GitHub pull request URL.
pub fn parse_pr_url(url: &str) -> Result<PrReviewRequest> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::InvalidPrUrl("empty URL".to_string()));
    }

    let caps = PR_URL_RE.captures(url).ok_or_else(|| {
        Error::InvalidPrUrl(format!(
            "{url} (expected: https://github.com/owner/repo/pull/123)"
        ))
    })?;

    let pr_number = caps[3]
        .parse::<u64>()
        .map_err(|_| Error::InvalidPrUrl(format!("PR number out of range in {url}")))?;

    Ok(PrReviewRequest {
        repo_owner: caps[1].to_string(),
        repo_name: caps[2].to_string(),
        pr_number,
    })
}

/// Pull `(file, issue)` pairs out of a review summary.
///
/// Only lines that mention a bold `**...**` marker and a `.java` file are
/// considered, matching how the reviewer formats per-file findings.
pub fn extract_file_issues(summary: &str) -> Vec<(String, String)> {
    summary
        .lines()
        .filter(|line| line.contains("**") && line.contains(".java"))
        .filter_map(|line| {
            FILE_ISSUE_RE
                .captures(line)
                .map(|c| (c[1].to_string(), c[2].to_string()))
        })
        .collect()
}
