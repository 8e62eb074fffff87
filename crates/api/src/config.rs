//! Environment-driven configuration for the HTTP server and the job engine.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rollout_core::execution::{PlaybookLayout, ProcessLimits};
use rollout_core::job::request::DEFAULT_ENVIRONMENTS;

/// Invalid or missing configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} must be {expected}, got {value:?}")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8080`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Upper bound on the post-signal drain of in-flight jobs (default: `30`).
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `8080`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:3000`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: parse_var("PORT", 8080, "a valid port number")?,
            cors_origins: list_var("CORS_ORIGINS", "http://localhost:3000"),
            request_timeout_secs: parse_var("REQUEST_TIMEOUT_SECS", 30, "a number of seconds")?,
            shutdown_timeout_secs: parse_var("SHUTDOWN_TIMEOUT_SECS", 30, "a number of seconds")?,
        })
    }
}

/// Job engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SQLite URL of the job store.
    pub database_url: String,
    /// Automation root holding `playbooks/` and `inventory/`.
    pub ansible_root: PathBuf,
    /// Automation tool executable.
    pub tool_binary: String,
    /// Playbook path relative to `ansible_root`.
    pub playbook: PathBuf,
    /// Environments a request may target.
    pub environments: Vec<String>,
    /// Concurrency ceiling for tool processes.
    pub max_concurrent_jobs: usize,
    /// Bound on jobs accepted but not yet running.
    pub max_queued_jobs: usize,
    pub job_timeout: Duration,
    /// Delay between SIGTERM and SIGKILL.
    pub kill_grace: Duration,
    /// Terminal jobs older than this are purged.
    pub retention: Duration,
    pub cleanup_interval: Duration,
    /// Output lines kept in a job's result.
    pub log_tail_lines: usize,
}

impl EngineConfig {
    /// Defaults for everything except the store URL and automation root.
    pub fn new(database_url: impl Into<String>, ansible_root: impl Into<PathBuf>) -> Self {
        Self {
            database_url: database_url.into(),
            ansible_root: ansible_root.into(),
            tool_binary: "ansible-playbook".to_string(),
            playbook: PathBuf::from("playbooks/universal.yml"),
            environments: DEFAULT_ENVIRONMENTS.iter().map(|s| s.to_string()).collect(),
            max_concurrent_jobs: 5,
            max_queued_jobs: 100,
            job_timeout: Duration::from_secs(3600),
            kill_grace: Duration::from_secs(10),
            retention: Duration::from_secs(7 * 24 * 3600),
            cleanup_interval: Duration::from_secs(3600),
            log_tail_lines: 50,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// | Env Var                     | Default                          |
    /// |-----------------------------|----------------------------------|
    /// | `DATABASE_URL`              | required                         |
    /// | `ANSIBLE_ROOT`              | `.`                              |
    /// | `ANSIBLE_PLAYBOOK_BIN`      | `ansible-playbook`               |
    /// | `ANSIBLE_PLAYBOOK`          | `playbooks/universal.yml`        |
    /// | `DEPLOY_ENVIRONMENTS`       | `staging,production,preprod`     |
    /// | `MAX_CONCURRENT_JOBS`       | `5`                              |
    /// | `MAX_QUEUED_JOBS`           | `100`                            |
    /// | `JOB_TIMEOUT_SECS`          | `3600`                           |
    /// | `KILL_GRACE_SECS`           | `10`                             |
    /// | `JOB_RETENTION_DAYS`        | `7`                              |
    /// | `JOB_CLEANUP_INTERVAL_SECS` | `3600`                           |
    /// | `LOG_TAIL_LINES`            | `50`                             |
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;
        let ansible_root = std::env::var("ANSIBLE_ROOT").unwrap_or_else(|_| ".".into());
        let mut config = Self::new(database_url, ansible_root);

        if let Ok(bin) = std::env::var("ANSIBLE_PLAYBOOK_BIN") {
            config.tool_binary = bin;
        }
        if let Ok(playbook) = std::env::var("ANSIBLE_PLAYBOOK") {
            config.playbook = PathBuf::from(playbook);
        }
        config.environments = list_var("DEPLOY_ENVIRONMENTS", &DEFAULT_ENVIRONMENTS.join(","));
        if config.environments.is_empty() {
            return Err(ConfigError::Invalid {
                key: "DEPLOY_ENVIRONMENTS",
                expected: "a non-empty list",
                value: String::new(),
            });
        }

        config.max_concurrent_jobs = parse_var("MAX_CONCURRENT_JOBS", 5, "a positive integer")?;
        if config.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_CONCURRENT_JOBS",
                expected: "a positive integer",
                value: "0".into(),
            });
        }
        config.max_queued_jobs = parse_var("MAX_QUEUED_JOBS", 100, "an integer")?;
        config.job_timeout =
            Duration::from_secs(parse_var("JOB_TIMEOUT_SECS", 3600, "a number of seconds")?);
        config.kill_grace =
            Duration::from_secs(parse_var("KILL_GRACE_SECS", 10, "a number of seconds")?);
        let retention_days: u64 = parse_var("JOB_RETENTION_DAYS", 7, "a number of days")?;
        config.retention = Duration::from_secs(retention_days * 24 * 3600);
        config.cleanup_interval = Duration::from_secs(parse_var(
            "JOB_CLEANUP_INTERVAL_SECS",
            3600,
            "a number of seconds",
        )?);
        config.log_tail_lines = parse_var("LOG_TAIL_LINES", 50, "an integer")?;

        Ok(config)
    }

    pub fn layout(&self) -> PlaybookLayout {
        PlaybookLayout::new(&self.ansible_root, &self.tool_binary).with_playbook(&self.playbook)
    }

    pub fn limits(&self) -> ProcessLimits {
        ProcessLimits {
            timeout: self.job_timeout,
            kill_grace: self.kill_grace,
            tail_lines: self.log_tail_lines,
        }
    }
}

fn parse_var<T: FromStr>(
    key: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            expected,
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

fn list_var(key: &str, default: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_else(|_| default.into())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
