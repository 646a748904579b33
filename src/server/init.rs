//! Engine initialization and main run loop

use super::loader::load_config;
use super::mailer::LogMailer;
use anyhow::{Context, Result};
use extract_core::shutdown::wait_for_shutdown_signal;
use extract_core::{
    ConnectorPlugin, Orchestrator, OrchestratorComponents, PluginRegistry, Repositories,
    ShutdownController, SqliteStore, TaskPlugin, TaskRegistrar,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Run the engine until Ctrl+C or SIGTERM
pub async fn run() -> Result<()> {
    info!("Starting Extract v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config().context("Failed to load configuration")?;
    config.validate()?;
    info!("Configuration loaded");

    let store = Arc::new(
        SqliteStore::from_path(&config.database.path)
            .await
            .with_context(|| format!("Failed to open {}", config.database.path.display()))?,
    );
    info!(path = %config.database.path.display(), "Database ready");

    let shutdown = ShutdownController::with_timeout(Duration::from_secs(config.shutdown.timeout_secs));
    let registrar = Arc::new(TaskRegistrar::new(shutdown.token()));

    // Plugins are linked in by embedding applications
    let connector_plugins = Arc::new(PluginRegistry::<dyn ConnectorPlugin>::new());
    let task_plugins = Arc::new(PluginRegistry::<dyn TaskPlugin>::new());
    if connector_plugins.is_empty() {
        warn!("No connector plugin registered, nothing will be imported");
    }

    let mut builder = OrchestratorComponents::builder()
        .registrar(registrar)
        .language(config.language.clone())
        .repositories(Repositories::from_store(store.clone()))
        .connector_plugins(connector_plugins)
        .task_plugins(task_plugins)
        .email_settings(Arc::new(LogMailer::new(
            &config.language,
            config.notifications.enabled,
        )))
        .settings(config.orchestrator.clone());
    if let Some(max) = config.workers.max_concurrent_tasks {
        builder = builder.max_concurrent_tasks(max);
    }
    let components = builder.build()?;

    let orchestrator = Orchestrator::new();
    orchestrator
        .initialize(components)
        .await
        .context("Failed to initialize the orchestrator")?;

    info!(
        mode = %config.orchestrator.mode,
        state = %orchestrator.working_state().await?,
        frequency_secs = config.orchestrator.frequency_secs,
        "Extract is running"
    );

    wait_for_shutdown_signal().await;
    shutdown.shutdown(&orchestrator).await;
    store.close().await;

    info!("Extract stopped");
    Ok(())
}
