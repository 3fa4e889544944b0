/// HTTP API Layer
///
/// - Management console for automation definitions (`/console/*`)
/// - Dynamic dispatch of every live automation endpoint (router fallback)
/// - Health check
/// - Mapping of automation errors to HTTP responses

// Automation management endpoints
pub mod console;

// Fallback handler routing requests into the registry
pub mod dispatch;

// AutomationError -> status code + JSON body
pub mod error;

use crate::automation::{AutomationRegistry, AutomationService};
use crate::backend::DatabaseManager;
use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;

pub use console::create_console_routes;
pub use dispatch::dispatch;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// Lifecycle operations, persisted through the definition store
    pub service: Arc<AutomationService>,
    /// Live routing table read by the dispatcher
    pub registry: Arc<AutomationRegistry>,
    /// SQLite pools shared by every sqlite-backed automation
    pub databases: Arc<DatabaseManager>,
}

/// Console, health check and the dynamic fallback
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(create_console_routes())
        .fallback(dispatch)
        .with_state(state)
}

/// GET /healthz
async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "automations": state.registry.ids(),
        "database_pools": state.databases.pool_count().await,
    }))
}
