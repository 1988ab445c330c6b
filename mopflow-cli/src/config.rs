//! Configuration module
//!
//! Resolves the orchestrator configuration for a CLI invocation:
//! environment first, then the batch file, then command-line flags.

use anyhow::{Context, Result};
use mopflow_orchestrator::config::OrchestratorConfig;
use mopflow_orchestrator::repository::SqliteTaskStore;
use std::path::PathBuf;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// `--db` given on the command line
    pub db_override: Option<PathBuf>,
}

impl Config {
    pub fn new(db_override: Option<PathBuf>) -> Self {
        Self { db_override }
    }

    /// Environment defaults with the command-line database applied
    pub fn orchestrator(&self) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::from_env();
        self.apply_overrides(&mut config);
        config
    }

    pub fn apply_overrides(&self, config: &mut OrchestratorConfig) {
        if let Some(path) = &self.db_override {
            config.database_path = path.clone();
        }
    }
}

/// Opens the task store described by `config`
pub async fn open_store(config: &OrchestratorConfig) -> Result<SqliteTaskStore> {
    SqliteTaskStore::open(&config.database_path, config.store_timeout)
        .await
        .with_context(|| {
            format!(
                "Failed to open task database {}",
                config.database_path.display()
            )
        })
}
