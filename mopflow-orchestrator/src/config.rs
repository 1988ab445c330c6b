//! Orchestrator configuration
//!
//! Every tunable of a run lives in one explicit object handed to the
//! controller at construction. Defaults can be overridden from environment
//! variables, then from a batch file, then from command-line flags.

use mopflow_core::error::OrchestratorError;
use std::path::PathBuf;
use std::time::Duration;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Task database shared with the worker processes
    pub database_path: PathBuf,

    /// Maximum number of submissions in flight at once
    pub concurrency: usize,

    /// Whether `run` waits for every task to reach a terminal state
    pub wait: bool,

    /// Delay between two polls of the store while waiting
    pub poll_interval: Duration,

    /// Overall wait deadline, `None` waits until everything is terminal
    pub deadline: Option<Duration>,

    /// Upper bound on any single store operation
    pub store_timeout: Duration,

    /// Whether the wait loop asks the scheduler about running tasks
    pub detect_lost_jobs: bool,

    /// Address of the read-only status API
    pub bind_addr: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("mopflow_tasks.db"),
            concurrency: 4,
            wait: false,
            poll_interval: Duration::from_secs(30),
            deadline: None,
            store_timeout: Duration::from_secs(10),
            detect_lost_jobs: true,
            bind_addr: "127.0.0.1:8501".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates configuration from environment variables over the defaults
    ///
    /// Recognised variables:
    /// - MOPFLOW_DB (path of the task database)
    /// - MOPFLOW_CONCURRENCY (default: 4)
    /// - MOPFLOW_POLL_INTERVAL (seconds, default: 30)
    /// - MOPFLOW_DEADLINE (seconds, unset waits forever)
    /// - MOPFLOW_STORE_TIMEOUT (seconds, default: 10)
    /// - MOPFLOW_BIND_ADDR (default: 127.0.0.1:8501)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("MOPFLOW_DB") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(concurrency) = env_parse::<usize>("MOPFLOW_CONCURRENCY") {
            config.concurrency = concurrency;
        }

        if let Some(secs) = env_parse::<u64>("MOPFLOW_POLL_INTERVAL") {
            config.poll_interval = Duration::from_secs(secs);
        }

        if let Some(secs) = env_parse::<u64>("MOPFLOW_DEADLINE") {
            config.deadline = Some(Duration::from_secs(secs));
        }

        if let Some(secs) = env_parse::<u64>("MOPFLOW_STORE_TIMEOUT") {
            config.store_timeout = Duration::from_secs(secs);
        }

        if let Ok(addr) = std::env::var("MOPFLOW_BIND_ADDR") {
            config.bind_addr = addr;
        }

        config
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.database_path.as_os_str().is_empty() {
            return Err(invalid("database_path cannot be empty"));
        }

        if self.concurrency == 0 {
            return Err(invalid("concurrency must be greater than 0"));
        }

        if self.poll_interval.is_zero() {
            return Err(invalid("poll_interval must be greater than 0"));
        }

        if self.store_timeout.is_zero() {
            return Err(invalid("store_timeout must be greater than 0"));
        }

        if self.bind_addr.is_empty() {
            return Err(invalid("bind_addr cannot be empty"));
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn invalid(msg: &str) -> OrchestratorError {
    OrchestratorError::InvalidConfig(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert!(config.deadline.is_none());
        assert!(!config.wait);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = OrchestratorConfig::default();

        config.concurrency = 0;
        assert!(config.validate().is_err());
        config.concurrency = 1;

        config.poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());
        config.poll_interval = Duration::from_millis(10);

        config.database_path = PathBuf::new();
        assert!(config.validate().is_err());
        config.database_path = PathBuf::from("tasks.db");

        assert!(config.validate().is_ok());
    }
}
