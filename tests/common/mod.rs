#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, mpsc};

use tpwatch::api::{DashboardStats, PlatformApi, PullRequestSummary, RemoteExecution, RemoteSuite};
use tpwatch::error::{Error, Result};
use tpwatch::job::JobStatus;
use tpwatch::review::{PrReviewRequest, PrReviewResponse};

/// Scripted platform. Status polls pop from `statuses`; once the script runs
/// out every poll returns `fallback`.
#[derive(Default)]
pub struct MockPlatform {
    statuses: Mutex<VecDeque<std::result::Result<Vec<RemoteSuite>, String>>>,
    fallback: Vec<RemoteSuite>,
    fail_start: HashSet<String>,
    dashboard_error: Option<String>,
    pub started: Mutex<Vec<String>>,
    pub list_calls: AtomicUsize,
    pub dashboard_calls: AtomicUsize,
    gate: Option<StatusGate>,
}

/// Holds every status poll until the test lets it through.
struct StatusGate {
    entered: tokio::sync::mpsc::UnboundedSender<()>,
    release: Mutex<mpsc::Receiver<()>>,
}

/// Test side of a [`StatusGate`].
pub struct GateControl {
    entered: tokio::sync::mpsc::UnboundedReceiver<()>,
    release: mpsc::Sender<()>,
}

impl GateControl {
    /// Resolves once a status poll is in flight.
    pub async fn entered(&mut self) {
        self.entered.recv().await.expect("status poll never started");
    }

    /// Let the in-flight status poll return.
    pub fn release(&self) {
        self.release.send(()).ok();
    }
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statuses(
        mut self,
        statuses: Vec<std::result::Result<Vec<RemoteSuite>, String>>,
    ) -> Self {
        self.statuses = Mutex::new(statuses.into());
        self
    }

    pub fn with_fallback(mut self, fallback: Vec<RemoteSuite>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn failing_start(mut self, ids: &[&str]) -> Self {
        self.fail_start = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Make every status poll wait for [`GateControl::release`].
    pub fn gated(mut self) -> (Self, GateControl) {
        let (entered_tx, entered_rx) = tokio::sync::mpsc::unbounded_channel();
        let (release_tx, release_rx) = mpsc::channel();
        self.gate = Some(StatusGate {
            entered: entered_tx,
            release: Mutex::new(release_rx),
        });
        (
            self,
            GateControl {
                entered: entered_rx,
                release: release_tx,
            },
        )
    }

    pub fn failing_dashboard(mut self, msg: &str) -> Self {
        self.dashboard_error = Some(msg.to_string());
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn dashboard_calls(&self) -> usize {
        self.dashboard_calls.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<String> {
        let mut started = self.started.lock().unwrap().clone();
        started.sort();
        started
    }
}

impl PlatformApi for MockPlatform {
    fn start_execution(&self, suite_id: &str) -> Result<serde_json::Value> {
        if self.fail_start.contains(suite_id) {
            return Err(Error::Api(format!("suite {suite_id} not found")));
        }
        self.started.lock().unwrap().push(suite_id.to_string());
        Ok(serde_json::json!({ "id": format!("exec-{suite_id}"), "status": "RUNNING" }))
    }

    fn stop_execution(&self, execution_id: &str) -> Result<()> {
        Err(Error::Api(format!("execution {execution_id} not found")))
    }

    fn list_executions(&self) -> Result<Vec<RemoteExecution>> {
        Ok(Vec::new())
    }

    fn list_suites(&self) -> Result<Vec<RemoteSuite>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref gate) = self.gate {
            gate.entered.send(()).ok();
            gate.release.lock().unwrap().recv().ok();
        }
        match self.statuses.lock().unwrap().pop_front() {
            Some(Ok(suites)) => Ok(suites),
            Some(Err(msg)) => Err(Error::Api(msg)),
            None => Ok(self.fallback.clone()),
        }
    }

    fn get_suite(&self, suite_id: &str) -> Result<RemoteSuite> {
        self.fallback
            .iter()
            .find(|s| s.id == suite_id)
            .cloned()
            .ok_or_else(|| Error::Api(format!("suite {suite_id} not found")))
    }

    fn delete_suite(&self, suite_id: &str) -> Result<()> {
        Err(Error::Api(format!("suite {suite_id} not found")))
    }

    fn list_pull_requests(&self) -> Result<Vec<PullRequestSummary>> {
        Ok(Vec::new())
    }

    fn dashboard_stats(&self) -> Result<DashboardStats> {
        self.dashboard_calls.fetch_add(1, Ordering::SeqCst);
        match self.dashboard_error {
            Some(ref msg) => Err(Error::Api(msg.clone())),
            None => Ok(DashboardStats {
                total_tests: Some(10),
                passed_tests: Some(8),
                failed_tests: Some(2),
                ..Default::default()
            }),
        }
    }

    fn review_pull_request(&self, _request: &PrReviewRequest) -> Result<PrReviewResponse> {
        Err(Error::Review("not scripted".to_string()))
    }
}

pub fn suite(id: &str, status: JobStatus) -> RemoteSuite {
    RemoteSuite {
        id: id.to_string(),
        name: Some(format!("{id} suite")),
        suite_type: Some("UNIT".to_string()),
        status: Some(status),
        progress: None,
    }
}
