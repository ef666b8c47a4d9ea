use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::cli::Cli;
use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_PATH: &str = ".tpwatch.toml";
pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_TOKEN_ENV: &str = "TPWATCH_TOKEN";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_MAX_POLLS: u32 = 24;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub api_url: Option<String>,
    pub token_env: Option<String>,
    pub poll_interval: Option<u64>,
    pub max_polls: Option<u32>,
    pub request_timeout: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_url: String,
    pub token_env: String,
    pub poll_interval: u64,
    pub max_polls: u32,
    pub request_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL_SECS,
            max_polls: DEFAULT_MAX_POLLS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load the config file (if any) and apply CLI overrides.
    ///
    /// An explicit `--config` path must exist; the default path is optional.
    pub fn load(cli: &Cli) -> Result<Self> {
        let (path, explicit) = match cli.config.as_deref() {
            Some(p) => (Path::new(p), true),
            None => (Path::new(DEFAULT_CONFIG_PATH), false),
        };

        let file_config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            parse_config(&content)?
        } else if explicit {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        } else {
            debug!(path = %path.display(), "no config file, using defaults");
            ConfigFile::default()
        };

        let config = merge(file_config, cli);
        validate_merged(&config)?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Bearer token from the configured environment variable, if set and non-empty.
    pub fn resolve_token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}

pub fn parse_config(content: &str) -> Result<ConfigFile> {
    let config: ConfigFile = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &ConfigFile) -> Result<()> {
    if let Some(ref url) = config.api_url {
        validate_api_url(url)?;
    }
    if let Some(interval) = config.poll_interval
        && interval == 0
    {
        return Err(Error::ConfigValidation(
            "poll_interval must be > 0".to_string(),
        ));
    }
    if let Some(max) = config.max_polls
        && max == 0
    {
        return Err(Error::ConfigValidation("max_polls must be > 0".to_string()));
    }
    if let Some(timeout) = config.request_timeout
        && timeout == 0
    {
        return Err(Error::ConfigValidation(
            "request_timeout must be > 0".to_string(),
        ));
    }
    if let Some(ref env) = config.token_env
        && env.trim().is_empty()
    {
        return Err(Error::ConfigValidation(
            "token_env must not be empty".to_string(),
        ));
    }
    Ok(())
}

// CLI values bypass `validate`, so re-check the merged result.
fn validate_merged(config: &Config) -> Result<()> {
    validate_api_url(&config.api_url)?;
    if config.poll_interval == 0 {
        return Err(Error::ConfigValidation(
            "poll_interval must be > 0".to_string(),
        ));
    }
    if config.max_polls == 0 {
        return Err(Error::ConfigValidation("max_polls must be > 0".to_string()));
    }
    Ok(())
}

fn validate_api_url(url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(Error::ConfigValidation(format!(
            "api_url must start with http:// or https:// (got: {url})"
        )))
    }
}

pub fn merge(file: ConfigFile, cli: &Cli) -> Config {
    Config {
        api_url: cli
            .api_url
            .clone()
            .or(file.api_url)
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        token_env: file
            .token_env
            .unwrap_or_else(|| DEFAULT_TOKEN_ENV.to_string()),
        poll_interval: cli
            .poll_seconds
            .or(file.poll_interval)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
        max_polls: cli.max_polls.or(file.max_polls).unwrap_or(DEFAULT_MAX_POLLS),
        request_timeout: file
            .request_timeout
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
    }
}
