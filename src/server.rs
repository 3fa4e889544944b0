/// Server setup and initialization
///
/// Wires together all components: definition store, backend factory, auth,
/// registry, lifecycle service and HTTP routes.

use crate::{
    api::{create_router, AppState},
    automation::{AutomationRegistry, AutomationService},
    backend::{BackendContext, BackendFactory, DatabaseManager},
    config::Config,
    definitions,
    runtime::{AuthGate, AutomationEngine},
};
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Build every shared component and load the stored automations
pub async fn build_state(config: &Config) -> Result<AppState> {
    tracing::info!("📁 Ensuring data directory exists: {}", config.database.data_dir);
    std::fs::create_dir_all(&config.database.data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory: {}", e))?;

    let timeout = config.runtime.backend_timeout();
    let databases = Arc::new(DatabaseManager::new(config.database.data_dir.clone()).with_acquire_timeout(timeout));

    tracing::info!("🧩 Registering storage backends");
    let backends = Arc::new(BackendFactory::with_builtin(BackendContext {
        database_url: config.database.url.clone(),
        database_name: config.database.name.clone(),
        timeout,
        databases: Arc::clone(&databases),
    }));
    tracing::debug!("🧩 Backend types: {:?}", backends.backend_types());

    let auth = Arc::new(AuthGate::from_config(&config.auth)?);
    tracing::info!("🔐 Endpoint auth enforcement: {}", if auth.is_enabled() { "on" } else { "off" });

    let engine = Arc::new(AutomationEngine::new(backends, auth));
    let registry = Arc::new(AutomationRegistry::new());
    let store = definitions::open(&config.definitions, &databases).await?;
    let service = Arc::new(AutomationService::new(store, Arc::clone(&registry), engine));

    tracing::info!("📥 Loading automations");
    let report = service
        .load_all()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load automations: {}", e))?;
    for failure in &report.failed {
        tracing::warn!("⚠️ Automation {} was not loaded: {}", failure.id, failure.error);
    }

    Ok(AppState {
        service,
        registry,
        databases,
    })
}

/// Create the Axum application for an already built state
pub fn create_app(state: AppState) -> Router {
    tracing::info!("📡 Creating HTTP router");
    create_router(state)
}

/// Start the HTTP server with the given configuration
///
/// Runs until Ctrl-C, then drops every automation and closes the database pools.
pub async fn start_server(config: Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.runtime.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Restwright server...");

    let state = build_state(&config).await?;
    let registry = Arc::clone(&state.registry);
    let databases = Arc::clone(&state.databases);
    let app = create_app(state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("🛑 Shutting down: dropping {} automation(s)", registry.len());
    registry.clear();
    databases.close_all().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
