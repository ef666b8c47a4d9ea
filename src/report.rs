use std::collections::BTreeMap;

use serde::Serialize;

use crate::api::RemoteSuite;
use crate::error::{Error, Result};
use crate::job::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuiteSummary {
    pub total: usize,
    pub running: usize,
    pub passed: usize,
    pub failed: usize,
    /// Percentage of finished suites that succeeded; `None` when nothing finished.
    pub pass_rate: Option<f64>,
}

/// Suite count per test type, in order of first appearance.
pub fn type_distribution(suites: &[RemoteSuite]) -> Vec<(String, usize)> {
    let mut out: Vec<(String, usize)> = Vec::new();
    for suite in suites {
        let ty = suite.suite_type.as_deref().unwrap_or("UNKNOWN");
        match out.iter_mut().find(|(name, _)| name == ty) {
            Some((_, count)) => *count += 1,
            None => out.push((ty.to_string(), 1)),
        }
    }
    out
}

pub fn status_counts(suites: &[RemoteSuite]) -> BTreeMap<JobStatus, usize> {
    let mut counts = BTreeMap::new();
    for suite in suites {
        *counts
            .entry(suite.status.unwrap_or(JobStatus::Pending))
            .or_insert(0) += 1;
    }
    counts
}

pub fn summarize(suites: &[RemoteSuite]) -> SuiteSummary {
    let mut summary = SuiteSummary {
        total: suites.len(),
        running: 0,
        passed: 0,
        failed: 0,
        pass_rate: None,
    };
    for status in suites.iter().filter_map(|s| s.status) {
        if status == JobStatus::Running {
            summary.running += 1;
        } else if status.is_success() {
            summary.passed += 1;
        } else if status.is_terminal() {
            summary.failed += 1;
        }
    }
    let finished = summary.passed + summary.failed;
    if finished > 0 {
        summary.pass_rate = Some(summary.passed as f64 * 100.0 / finished as f64);
    }
    summary
}

/// Plain-text breakdown of the suite list: summary, per-status and per-type counts.
pub fn render_overview(suites: &[RemoteSuite]) -> String {
    let summary = summarize(suites);
    let pass_rate = summary
        .pass_rate
        .map(|r| format!("{r:.1}%"))
        .unwrap_or_else(|| "-".to_string());
    let mut out = format!(
        "suites {}: {} passed, {} failed, {} running, pass rate {pass_rate}\n",
        summary.total, summary.passed, summary.failed, summary.running
    );
    if suites.is_empty() {
        return out;
    }

    out.push_str("\nby status:\n");
    for (status, count) in status_counts(suites) {
        out.push_str(&format!("  {:<12} {count}\n", status.as_str()));
    }
    out.push_str("\nby type:\n");
    for (ty, count) in type_distribution(suites) {
        out.push_str(&format!("  {ty:<12} {count}\n"));
    }
    out
}

pub fn export(suites: &[RemoteSuite], format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Csv => Ok(to_csv(suites)),
        ExportFormat::Json => serde_json::to_string_pretty(suites)
            .map_err(|e| Error::Export(format!("failed to encode suites as JSON: {e}"))),
    }
}

fn to_csv(suites: &[RemoteSuite]) -> String {
    let mut out = String::from("id,name,type,status\n");
    for suite in suites {
        let row = [
            csv_field(&suite.id),
            csv_field(suite.name.as_deref().unwrap_or("")),
            csv_field(suite.suite_type.as_deref().unwrap_or("")),
            csv_field(suite.status.map(JobStatus::as_str).unwrap_or("")),
        ];
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
