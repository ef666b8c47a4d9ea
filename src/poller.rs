//! Tracks remote test executions to completion.
//!
//! A [`JobPoller`] starts executions on the platform and hands back a
//! [`PollSessionHandle`]. Each session runs on its own task: wait one
//! interval, fetch every suite's status once, fold the result into the
//! [`PollSession`] state machine, repeat until every job is terminal or the
//! attempt ceiling is hit. Observers read cloned [`PollSnapshot`]s from a
//! `watch` channel and never touch the session itself.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{DashboardStats, PlatformApi, RemoteSuite};
use crate::config::{Config, DEFAULT_MAX_POLLS, DEFAULT_POLL_INTERVAL_SECS};
use crate::error::{Error, Result};
use crate::job::{Job, now_unix_secs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Active,
    Concluded,
    Cancelled,
    Inconclusive,
}

impl SessionState {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            SessionState::Concluded | SessionState::Cancelled | SessionState::Inconclusive
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_attempts: DEFAULT_MAX_POLLS,
        }
    }
}

impl From<&Config> for PollSettings {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.poll_interval(),
            max_attempts: config.max_polls,
        }
    }
}

/// Read-only view of a session, published after every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollSnapshot {
    pub jobs: BTreeMap<String, Job>,
    pub state: SessionState,
    pub attempts: u32,
    pub max_attempts: u32,
}

impl PollSnapshot {
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Jobs that have not reached a terminal status yet.
    pub fn still_running(&self) -> Vec<&Job> {
        self.jobs.values().filter(|j| !j.is_terminal()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// Every job reached a terminal status.
    Completed {
        attempts: u32,
        jobs: BTreeMap<String, Job>,
        dashboard: Option<DashboardStats>,
    },
    /// The ceiling was reached with jobs still active.
    Inconclusive {
        attempts: u32,
        remaining: Vec<String>,
        jobs: BTreeMap<String, Job>,
    },
    Cancelled {
        attempts: u32,
        jobs: BTreeMap<String, Job>,
    },
}

impl SessionOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            SessionOutcome::Completed { attempts, .. }
            | SessionOutcome::Inconclusive { attempts, .. }
            | SessionOutcome::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn jobs(&self) -> &BTreeMap<String, Job> {
        match self {
            SessionOutcome::Completed { jobs, .. }
            | SessionOutcome::Inconclusive { jobs, .. }
            | SessionOutcome::Cancelled { jobs, .. } => jobs,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SessionOutcome::Completed { .. })
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Session bookkeeping with no timers or I/O.
///
/// Transitions: `Idle -> Active` on [`activate`](Self::activate), `Active ->
/// Concluded | Inconclusive` on [`apply_tick`](Self::apply_tick), `Active ->
/// Cancelled` on [`cancel`](Self::cancel). Finished sessions ignore further
/// input.
#[derive(Debug, Clone)]
pub struct PollSession {
    jobs: BTreeMap<String, Job>,
    tracked: BTreeSet<String>,
    attempts: u32,
    max_attempts: u32,
    state: SessionState,
}

impl PollSession {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            jobs: BTreeMap::new(),
            tracked: BTreeSet::new(),
            attempts: 0,
            max_attempts,
            state: SessionState::Idle,
        }
    }

    /// Mark every id RUNNING with the same start time and begin tracking.
    pub fn activate(&mut self, ids: &BTreeSet<String>, started_at: u64) {
        if self.state != SessionState::Idle {
            return;
        }
        for id in ids {
            self.jobs.insert(id.clone(), Job::running(id.as_str(), started_at));
            self.tracked.insert(id.clone());
        }
        self.state = SessionState::Active;
    }

    /// Undo `activate` after a failed start: no RUNNING entries survive.
    pub fn rollback(&mut self) {
        if self.state != SessionState::Active || self.attempts > 0 {
            return;
        }
        self.jobs.clear();
        self.tracked.clear();
        self.state = SessionState::Idle;
    }

    /// Fold one status poll into the session and return the resulting state.
    ///
    /// A failed poll still consumes an attempt.
    pub fn apply_tick(&mut self, result: Result<Vec<RemoteSuite>>) -> SessionState {
        if self.state != SessionState::Active {
            return self.state;
        }
        self.attempts += 1;

        match result {
            Ok(suites) => {
                let by_id: HashMap<&str, &RemoteSuite> =
                    suites.iter().map(|s| (s.id.as_str(), s)).collect();
                let mut finished = Vec::new();
                for id in &self.tracked {
                    let (Some(job), Some(remote)) =
                        (self.jobs.get_mut(id), by_id.get(id.as_str()))
                    else {
                        continue;
                    };
                    job.merge_remote(remote);
                    if job.is_terminal() {
                        debug!(job = %id, status = %job.status, "job finished");
                        finished.push(id.clone());
                    }
                }
                for id in finished {
                    self.tracked.remove(&id);
                }
            }
            Err(e) => {
                warn!(
                    attempt = self.attempts,
                    max_attempts = self.max_attempts,
                    error = %e,
                    "status poll failed, retrying next interval"
                );
            }
        }

        if self.tracked.is_empty() {
            self.state = SessionState::Concluded;
        } else if self.attempts >= self.max_attempts {
            self.state = SessionState::Inconclusive;
        }
        self.state
    }

    /// Stop tracking without touching job states. Returns `false` if the
    /// session was not active.
    pub fn cancel(&mut self) -> bool {
        if self.state != SessionState::Active {
            return false;
        }
        self.state = SessionState::Cancelled;
        true
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn tracked(&self) -> &BTreeSet<String> {
        &self.tracked
    }

    pub fn jobs(&self) -> &BTreeMap<String, Job> {
        &self.jobs
    }

    pub fn snapshot(&self) -> PollSnapshot {
        PollSnapshot {
            jobs: self.jobs.clone(),
            state: self.state,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

type Registry = Arc<Mutex<HashSet<String>>>;

/// Ownership of job ids for the lifetime of one session. Dropping it
/// releases the ids.
struct Claim {
    registry: Registry,
    ids: Vec<String>,
}

impl Claim {
    fn acquire(registry: &Registry, ids: &BTreeSet<String>) -> Result<Self> {
        let mut held = registry.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(taken) = ids.iter().find(|id| held.contains(*id)) {
            return Err(Error::JobAlreadyTracked(taken.clone()));
        }
        held.extend(ids.iter().cloned());
        Ok(Self {
            registry: Arc::clone(registry),
            ids: ids.iter().cloned().collect(),
        })
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut held = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        for id in &self.ids {
            held.remove(id);
        }
    }
}

/// Starts remote executions and tracks them in independent sessions.
pub struct JobPoller<A> {
    api: Arc<A>,
    settings: PollSettings,
    registry: Registry,
    next_session_id: AtomicU64,
}

impl<A: PlatformApi + 'static> JobPoller<A> {
    pub fn new(api: Arc<A>, settings: PollSettings) -> Self {
        Self {
            api,
            settings,
            registry: Arc::new(Mutex::new(HashSet::new())),
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    /// Whether `job_id` belongs to a session that has not finished yet.
    pub fn is_tracked(&self, job_id: &str) -> bool {
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(job_id)
    }

    /// Start an execution for every id and begin polling their status.
    ///
    /// Either every job comes back RUNNING in the returned session, or the
    /// call fails with [`Error::StartFailed`] and nothing stays tracked.
    pub async fn start<I, S>(&self, job_ids: I) -> Result<PollSessionHandle>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: BTreeSet<String> = job_ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Err(Error::EmptyJobSet);
        }

        let claim = Claim::acquire(&self.registry, &ids)?;
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        let mut session = PollSession::new(self.settings.max_attempts);
        session.activate(&ids, now_unix_secs());
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());

        info!(session = session_id, jobs = ids.len(), "starting executions");
        let failures = self.start_all(&ids).await;

        if !failures.is_empty() {
            session.rollback();
            snapshot_tx.send_replace(session.snapshot());
            warn!(
                session = session_id,
                failed = failures.len(),
                "execution start failed, session rolled back"
            );
            return Err(Error::StartFailed { failures });
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(run_session(
            session_id,
            Arc::clone(&self.api),
            session,
            self.settings.interval,
            snapshot_tx,
            cancel_rx,
            claim,
        ));

        Ok(PollSessionHandle {
            id: session_id,
            cancel_tx,
            snapshot_rx,
            task: Some(task),
        })
    }

    /// Issue every start request concurrently; return the failures sorted by id.
    async fn start_all(&self, ids: &BTreeSet<String>) -> Vec<(String, String)> {
        let mut join_set: tokio::task::JoinSet<(String, Result<serde_json::Value>)> =
            tokio::task::JoinSet::new();
        let mut task_job_ids: HashMap<tokio::task::Id, String> = HashMap::new();

        for id in ids {
            let api = Arc::clone(&self.api);
            let job_id = id.clone();
            let handle = join_set.spawn_blocking(move || {
                let result = api.start_execution(&job_id);
                (job_id, result)
            });
            task_job_ids.insert(handle.id(), id.clone());
        }

        let mut failures = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((id, Ok(_))) => debug!(job = %id, "execution started"),
                Ok((id, Err(e))) => {
                    warn!(job = %id, error = %e, "failed to start execution");
                    failures.push((id, e.to_string()));
                }
                Err(e) => {
                    let id = task_job_ids
                        .remove(&e.id())
                        .unwrap_or_else(|| "<unknown>".to_string());
                    warn!(job = %id, error = %e, "start request task panicked");
                    failures.push((id, format!("start request task failed: {e}")));
                }
            }
        }
        failures.sort();
        failures
    }
}

/// Caller's side of a running session. Dropping the handle cancels the session.
pub struct PollSessionHandle {
    id: u64,
    cancel_tx: watch::Sender<bool>,
    snapshot_rx: watch::Receiver<PollSnapshot>,
    task: Option<JoinHandle<SessionOutcome>>,
}

impl PollSessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop polling. Jobs keep their last observed status; nothing is
    /// aborted on the platform.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn subscribe(&self) -> watch::Receiver<PollSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn snapshot(&self) -> PollSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.snapshot_rx.borrow().is_active()
    }

    /// Wait for the session to finish.
    ///
    /// Safe to call again after the returned future was dropped unfinished
    /// (e.g. lost a `select!`); errors once the outcome has been taken.
    pub async fn wait(&mut self) -> Result<SessionOutcome> {
        let Some(task) = self.task.as_mut() else {
            return Err(Error::Task(format!(
                "session {} outcome already taken",
                self.id
            )));
        };
        let outcome = task.await.map_err(|e| Error::Task(e.to_string()));
        self.task = None;
        outcome
    }
}

async fn run_session<A: PlatformApi + 'static>(
    session_id: u64,
    api: Arc<A>,
    mut session: PollSession,
    interval: Duration,
    snapshot_tx: watch::Sender<PollSnapshot>,
    mut cancel: watch::Receiver<bool>,
    _claim: Claim,
) -> SessionOutcome {
    loop {
        if wait_or_cancel(interval, &mut cancel).await {
            return finish_cancelled(session_id, &mut session, &snapshot_tx);
        }

        let fetch_api = Arc::clone(&api);
        let fetch = tokio::task::spawn_blocking(move || fetch_api.list_suites());
        let result = tokio::select! {
            biased;
            _ = cancel_signalled(&mut cancel) => {
                debug!(session = session_id, "cancelled during status poll, discarding result");
                return finish_cancelled(session_id, &mut session, &snapshot_tx);
            }
            joined = fetch => joined.unwrap_or_else(|e| {
                Err(Error::PollTransient(format!("status task failed: {e}")))
            }),
        };

        let state = session.apply_tick(result);
        snapshot_tx.send_replace(session.snapshot());
        debug!(
            session = session_id,
            attempt = session.attempts(),
            tracked = session.tracked().len(),
            "poll tick"
        );

        match state {
            SessionState::Concluded => {
                info!(
                    session = session_id,
                    attempts = session.attempts(),
                    "all executions finished"
                );
                let dashboard = refresh_dashboard(&api).await;
                return SessionOutcome::Completed {
                    attempts: session.attempts(),
                    jobs: session.jobs().clone(),
                    dashboard,
                };
            }
            SessionState::Inconclusive => {
                let remaining: Vec<String> = session.tracked().iter().cloned().collect();
                warn!(
                    session = session_id,
                    attempts = session.attempts(),
                    remaining = remaining.len(),
                    "poll ceiling reached with executions still running"
                );
                return SessionOutcome::Inconclusive {
                    attempts: session.attempts(),
                    remaining,
                    jobs: session.jobs().clone(),
                };
            }
            SessionState::Cancelled => {
                return finish_cancelled(session_id, &mut session, &snapshot_tx);
            }
            SessionState::Idle | SessionState::Active => {}
        }
    }
}

fn finish_cancelled(
    session_id: u64,
    session: &mut PollSession,
    snapshot_tx: &watch::Sender<PollSnapshot>,
) -> SessionOutcome {
    session.cancel();
    snapshot_tx.send_replace(session.snapshot());
    info!(
        session = session_id,
        attempts = session.attempts(),
        "poll session cancelled"
    );
    SessionOutcome::Cancelled {
        attempts: session.attempts(),
        jobs: session.jobs().clone(),
    }
}

async fn refresh_dashboard<A: PlatformApi + 'static>(api: &Arc<A>) -> Option<DashboardStats> {
    let api = Arc::clone(api);
    match tokio::task::spawn_blocking(move || api.dashboard_stats()).await {
        Ok(Ok(stats)) => Some(stats),
        Ok(Err(e)) => {
            warn!(error = %e, "dashboard refresh failed");
            None
        }
        Err(e) => {
            warn!(error = %e, "dashboard refresh task failed");
            None
        }
    }
}

/// Resolves once cancellation is requested or the handle is gone.
async fn cancel_signalled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow_and_update() {
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep for one interval, returning early with `true` on cancellation.
async fn wait_or_cancel(duration: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = cancel_signalled(cancel) => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
