use clap::{Parser, Subcommand, ValueEnum};

/// tpwatch — run and watch test executions on a test-management platform
#[derive(Parser, Debug, Clone)]
#[command(name = "tpwatch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,

    /// Path to config file (default: .tpwatch.toml, optional)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Base URL of the platform (default: http://localhost:8080)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Seconds between status polls
    #[arg(long = "poll-seconds", alias = "poll-interval", global = true)]
    pub poll_seconds: Option<u64>,

    /// Maximum status polls before giving up on a session
    #[arg(long, global = true)]
    pub max_polls: Option<u32>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CliCommand {
    /// Start test executions and watch them until they finish
    Run {
        /// Suite id to execute (repeatable; default: every suite)
        #[arg(long = "suite")]
        suites: Vec<String>,
    },

    /// List, inspect or delete test suites
    Suites {
        #[command(subcommand)]
        action: Option<SuitesAction>,
    },

    /// List or stop test executions
    Executions {
        #[command(subcommand)]
        action: Option<ExecutionsAction>,
    },

    /// List pull requests known to the platform
    Prs,

    /// Show aggregate dashboard statistics
    Stats,

    /// Request an AI review of a GitHub pull request
    Review {
        /// Pull request URL, e.g. https://github.com/owner/repo/pull/123
        pr_url: String,
    },

    /// Export the current suite list as a report
    Export {
        /// Output format
        #[arg(long, value_enum, default_value_t = ExportFormatArg::Csv)]
        format: ExportFormatArg,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum SuitesAction {
    /// List test suites and their current status (default)
    List,
    /// Show one suite
    Show { id: String },
    /// Delete a suite
    Delete { id: String },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionsAction {
    /// List past and running executions (default)
    List,
    /// Stop a running execution
    Stop { id: String },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormatArg {
    Csv,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_without_suites() {
        let cli = Cli::parse_from(["tpwatch", "run"]);
        match cli.command {
            CliCommand::Run { suites } => assert!(suites.is_empty()),
            _ => panic!("expected Run subcommand"),
        }
    }

    #[test]
    fn test_parse_run_with_suites() {
        let cli = Cli::parse_from(["tpwatch", "run", "--suite", "s1", "--suite", "s2"]);
        match cli.command {
            CliCommand::Run { suites } => assert_eq!(suites, vec!["s1", "s2"]),
            _ => panic!("expected Run subcommand"),
        }
    }

    #[test]
    fn test_parse_global_overrides_after_subcommand() {
        let cli = Cli::parse_from([
            "tpwatch",
            "run",
            "--api-url",
            "http://ci:9000",
            "--poll-seconds",
            "2",
            "--max-polls",
            "10",
        ]);
        assert_eq!(cli.api_url.as_deref(), Some("http://ci:9000"));
        assert_eq!(cli.poll_seconds, Some(2));
        assert_eq!(cli.max_polls, Some(10));
    }

    #[test]
    fn test_parse_poll_interval_alias() {
        let cli = Cli::parse_from(["tpwatch", "suites", "--poll-interval", "7"]);
        assert_eq!(cli.poll_seconds, Some(7));
    }

    #[test]
    fn test_parse_review() {
        let cli = Cli::parse_from(["tpwatch", "review", "https://github.com/o/r/pull/3"]);
        match cli.command {
            CliCommand::Review { pr_url } => assert_eq!(pr_url, "https://github.com/o/r/pull/3"),
            _ => panic!("expected Review subcommand"),
        }
    }

    #[test]
    fn test_parse_suites_defaults_to_list() {
        let cli = Cli::parse_from(["tpwatch", "suites"]);
        assert!(matches!(cli.command, CliCommand::Suites { action: None }));
    }

    #[test]
    fn test_parse_suites_show_and_delete() {
        let cli = Cli::parse_from(["tpwatch", "suites", "show", "s1"]);
        match cli.command {
            CliCommand::Suites { action } => {
                assert_eq!(action, Some(SuitesAction::Show { id: "s1".into() }))
            }
            _ => panic!("expected Suites subcommand"),
        }
        let cli = Cli::parse_from(["tpwatch", "suites", "delete", "s2"]);
        match cli.command {
            CliCommand::Suites { action } => {
                assert_eq!(action, Some(SuitesAction::Delete { id: "s2".into() }))
            }
            _ => panic!("expected Suites subcommand"),
        }
    }

    #[test]
    fn test_parse_executions_stop() {
        let cli = Cli::parse_from(["tpwatch", "executions", "stop", "exec-1"]);
        match cli.command {
            CliCommand::Executions { action } => assert_eq!(
                action,
                Some(ExecutionsAction::Stop {
                    id: "exec-1".into()
                })
            ),
            _ => panic!("expected Executions subcommand"),
        }
    }

    #[test]
    fn test_parse_prs() {
        let cli = Cli::parse_from(["tpwatch", "prs", "--api-url", "http://ci:9000"]);
        assert!(matches!(cli.command, CliCommand::Prs));
        assert_eq!(cli.api_url.as_deref(), Some("http://ci:9000"));
    }

    #[test]
    fn test_parse_export_default_format() {
        let cli = Cli::parse_from(["tpwatch", "export"]);
        match cli.command {
            CliCommand::Export { format } => assert_eq!(format, ExportFormatArg::Csv),
            _ => panic!("expected Export subcommand"),
        }
    }

    #[test]
    fn test_parse_export_json() {
        let cli = Cli::parse_from(["tpwatch", "export", "--format", "json"]);
        assert!(matches!(
            cli.command,
            CliCommand::Export {
                format: ExportFormatArg::Json
            }
        ));
    }
}
