use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    ConfigValidation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("api error: {0}")]
    Api(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("no jobs to track")]
    EmptyJobSet,

    #[error("job {0} is already tracked by an active session")]
    JobAlreadyTracked(String),

    #[error("failed to start {} execution(s): {}", .failures.len(), format_failures(.failures))]
    StartFailed { failures: Vec<(String, String)> },

    #[error("status poll failed: {0}")]
    PollTransient(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("invalid PR URL: {0}")]
    InvalidPrUrl(String),

    #[error("review error: {0}")]
    Review(String),

    #[error("export error: {0}")]
    Export(String),
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(id, msg)| format!("{id}: {msg}"))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_failed_lists_every_failure() {
        let err = Error::StartFailed {
            failures: vec![
                ("s1".to_string(), "timeout".to_string()),
                ("s3".to_string(), "500".to_string()),
            ],
        };
        assert_eq!(
            err.to_string(),
            "failed to start 2 execution(s): s1: timeout; s3: 500"
        );
    }
}
