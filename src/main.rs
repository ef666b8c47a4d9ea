use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use tpwatch::api::{DashboardStats, HttpPlatformApi, PlatformApi, RemoteSuite};
use tpwatch::cli::{Cli, CliCommand, ExecutionsAction, ExportFormatArg, SuitesAction};
use tpwatch::config::Config;
use tpwatch::error::{Error, Result};
use tpwatch::poller::{JobPoller, PollSettings, PollSnapshot, SessionOutcome};
use tpwatch::report::{self, ExportFormat};
use tpwatch::review;

const EXIT_INCONCLUSIVE: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging();

    let config = match Config::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    info!(api_url = %config.api_url, "tpwatch starting");

    let api = Arc::new(HttpPlatformApi::new(&config));
    match dispatch(cli.command, &config, api).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

async fn dispatch(
    command: CliCommand,
    config: &Config,
    api: Arc<HttpPlatformApi>,
) -> Result<i32> {
    match command {
        CliCommand::Run { suites } => run_suites(suites, config, api).await,
        CliCommand::Suites { action } => match action.unwrap_or(SuitesAction::List) {
            SuitesAction::List => {
                let suites = blocking(move || api.list_suites()).await?;
                if suites.is_empty() {
                    println!("no test suites");
                }
                for suite in &suites {
                    print_suite(suite);
                }
                Ok(0)
            }
            SuitesAction::Show { id } => {
                let suite = blocking(move || api.get_suite(&id)).await?;
                print_suite(&suite);
                if let Some(progress) = suite.progress {
                    println!("progress {progress:.0}%");
                }
                Ok(0)
            }
            SuitesAction::Delete { id } => {
                let deleted = id.clone();
                blocking(move || api.delete_suite(&id)).await?;
                info!(suite = %deleted, "test suite deleted");
                println!("deleted {deleted}");
                Ok(0)
            }
        },
        CliCommand::Executions { action } => match action.unwrap_or(ExecutionsAction::List) {
            ExecutionsAction::List => {
                let executions = blocking(move || api.list_executions()).await?;
                if executions.is_empty() {
                    println!("no test executions");
                }
                for exec in &executions {
                    let results = exec
                        .results
                        .as_ref()
                        .map(|r| format!("{}/{} passed, {} failed", r.passed, r.total, r.failed))
                        .unwrap_or_default();
                    println!(
                        "{:<24} {:<24} {:<10} {}",
                        exec.id,
                        exec.suite_id.as_deref().unwrap_or("-"),
                        exec.status.map(|s| s.as_str()).unwrap_or("-"),
                        results
                    );
                }
                Ok(0)
            }
            ExecutionsAction::Stop { id } => {
                let stopped = id.clone();
                blocking(move || api.stop_execution(&id)).await?;
                info!(execution = %stopped, "test execution stopped");
                println!("stopped {stopped}");
                Ok(0)
            }
        },
        CliCommand::Prs => {
            let prs = blocking(move || api.list_pull_requests()).await?;
            if prs.is_empty() {
                println!("no pull requests");
            }
            for pr in &prs {
                println!(
                    "#{:<6} {:<8} {:<24} tests {}/{} passed  {}",
                    pr.number,
                    pr.status.as_deref().unwrap_or("-"),
                    pr.branch.as_deref().unwrap_or("-"),
                    pr.tests_passed.unwrap_or(0),
                    pr.tests_generated.unwrap_or(0),
                    pr.title.as_deref().unwrap_or("")
                );
            }
            Ok(0)
        }
        CliCommand::Stats => {
            let stats_api = Arc::clone(&api);
            let stats = blocking(move || stats_api.dashboard_stats()).await?;
            print_stats(&stats);
            let suites = blocking(move || api.list_suites()).await?;
            println!();
            print!("{}", report::render_overview(&suites));
            Ok(0)
        }
        CliCommand::Review { pr_url } => {
            let request = review::parse_pr_url(&pr_url)?;
            info!(
                owner = %request.repo_owner,
                repo = %request.repo_name,
                pr = request.pr_number,
                "requesting AI review"
            );
            let response = blocking(move || api.review_pull_request(&request))
                .await?
                .into_result()?;
            println!("PR #{} review: {:?}", response.pr_number, response.status);
            if let Some(ref summary) = response.review_summary {
                println!("\n{summary}");
                let issues = review::extract_file_issues(summary);
                if !issues.is_empty() {
                    println!("\nFile issues:");
                    for (file, issue) in issues {
                        println!("  {file}: {issue}");
                    }
                }
            }
            for c in &response.comments {
                println!("\n{}:{}\n  {}", c.file_name, c.diff_line, c.comment);
            }
            Ok(0)
        }
        CliCommand::Export { format } => {
            let suites = blocking(move || api.list_suites()).await?;
            let format = match format {
                ExportFormatArg::Csv => ExportFormat::Csv,
                ExportFormatArg::Json => ExportFormat::Json,
            };
            print!("{}", report::export(&suites, format)?);
            Ok(0)
        }
    }
}

async fn run_suites(
    suite_ids: Vec<String>,
    config: &Config,
    api: Arc<HttpPlatformApi>,
) -> Result<i32> {
    let suite_ids = if suite_ids.is_empty() {
        let list_api = Arc::clone(&api);
        let suites = blocking(move || list_api.list_suites()).await?;
        suites.into_iter().map(|s| s.id).collect()
    } else {
        suite_ids
    };
    if suite_ids.is_empty() {
        println!("no test suites to run");
        return Ok(0);
    }

    eprintln!(
        "[tpwatch] starting {} execution(s): {}",
        suite_ids.len(),
        suite_ids.join(", ")
    );
    let poller = JobPoller::new(api, PollSettings::from(config));
    let mut handle = poller.start(suite_ids).await?;
    eprintln!(
        "[tpwatch] started {} execution(s), polling every {}s (max {} polls)",
        handle.snapshot().jobs.len(),
        config.poll_interval,
        config.max_polls
    );

    let progress = tokio::spawn(render_progress(handle.subscribe()));

    let outcome = tokio::select! {
        outcome = handle.wait() => outcome?,
        _ = tokio::signal::ctrl_c() => {
            handle.cancel();
            handle.wait().await?
        }
    };
    join_progress(progress).await;

    print_outcome(&outcome);
    Ok(match outcome {
        SessionOutcome::Completed { .. } => 0,
        SessionOutcome::Inconclusive { .. } => EXIT_INCONCLUSIVE,
        SessionOutcome::Cancelled { .. } => EXIT_INTERRUPTED,
    })
}

async fn render_progress(mut rx: watch::Receiver<PollSnapshot>) {
    while rx.changed().await.is_ok() {
        let snap = rx.borrow_and_update().clone();
        if snap.state.is_finished() {
            break;
        }
        let running = snap.still_running().len();
        eprintln!(
            "[tpwatch] poll {}/{}: {} running, {} finished",
            snap.attempts,
            snap.max_attempts,
            running,
            snap.jobs.len() - running
        );
    }
}

/// Wait for the progress renderer; its failure never changes the exit code.
async fn join_progress(task: JoinHandle<()>) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, "progress renderer failed");
            false
        }
    }
}

fn print_outcome(outcome: &SessionOutcome) {
    for job in outcome.jobs().values() {
        println!("{:<24} {:<10} {}", job.id, job.status.as_str(), job.name);
    }
    match outcome {
        SessionOutcome::Completed {
            attempts,
            dashboard,
            ..
        } => {
            eprintln!("[tpwatch] all executions finished after {attempts} poll(s)");
            if let Some(stats) = dashboard {
                print_stats(stats);
            }
        }
        SessionOutcome::Inconclusive {
            attempts,
            remaining,
            ..
        } => {
            eprintln!(
                "[tpwatch] gave up after {attempts} poll(s); still running: {}",
                remaining.join(", ")
            );
        }
        SessionOutcome::Cancelled { attempts, .. } => {
            eprintln!("[tpwatch] cancelled after {attempts} poll(s)");
        }
    }
}

fn print_suite(suite: &RemoteSuite) {
    println!(
        "{:<24} {:<10} {:<12} {}",
        suite.id,
        suite.status.map(|s| s.as_str()).unwrap_or("-"),
        suite.suite_type.as_deref().unwrap_or("-"),
        suite.name.as_deref().unwrap_or("")
    );
}

fn print_stats(stats: &DashboardStats) {
    let show = |label: &str, value: Option<String>| {
        println!("{label:<16} {}", value.unwrap_or_else(|| "-".to_string()));
    };
    show("total tests", stats.total_tests.map(|v| v.to_string()));
    show("passed", stats.passed_tests.map(|v| v.to_string()));
    show("failed", stats.failed_tests.map(|v| v.to_string()));
    show("running", stats.running_tests.map(|v| v.to_string()));
    show("coverage", stats.coverage.map(|v| format!("{v:.1}%")));
    show("active PRs", stats.active_prs.map(|v| v.to_string()));
    show("merged PRs", stats.merged_prs.map(|v| v.to_string()));
}

/// Run a blocking platform call off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Task(e.to_string()))?
}
