use anyhow::Context;
use mopflow_orchestrator::{
    api, config::OrchestratorConfig, repository::SqliteTaskStore, service::StatusReader,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mopflow_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Mopflow status server...");

    let config = OrchestratorConfig::from_env();
    config.validate()?;

    tracing::info!("Opening task store at {}", config.database_path.display());

    let store = SqliteTaskStore::open(&config.database_path, config.store_timeout)
        .await
        .context("Failed to open task store")?;

    let reader = StatusReader::new(Arc::new(store));

    api::serve(&config.bind_addr, reader)
        .await
        .with_context(|| format!("Failed to serve on {}", config.bind_addr))
}
