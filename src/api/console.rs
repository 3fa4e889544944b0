/// Automation management console
///
/// CRUD, activation, reload and endpoint edits for automation definitions.
/// Every change is applied to the live registry immediately.

use crate::api::AppState;
use crate::automation::service::{AutomationPage, LoadReport, ReloadOutcome};
use crate::automation::AutomationStatus;
use crate::error::{AutomationError, Rule, Violation};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_PAGE_LIMIT: usize = 20;

/// Query string of the listing endpoint
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    #[serde(default)]
    pub skip: usize,
    pub limit: Option<usize>,
}

/// Create management routes under `/console`
pub fn create_console_routes() -> Router<AppState> {
    Router::new()
        .route("/console/automations", get(list_automations).post(create_automation))
        .route(
            "/console/automations/{id}",
            get(get_automation).put(update_automation).delete(delete_automation),
        )
        .route("/console/automations/{id}/activate", post(activate_automation))
        .route("/console/automations/{id}/deactivate", post(deactivate_automation))
        .route("/console/automations/{id}/reload", post(reload_automation))
        .route("/console/automations/{id}/endpoints", post(add_endpoint))
        .route(
            "/console/automations/{id}/endpoints/{endpoint_id}",
            put(update_endpoint).delete(remove_endpoint),
        )
        .route("/console/reload", post(reload_all))
}

/// GET /console/automations?status=active&skip=0&limit=20
async fn list_automations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<AutomationPage>, AutomationError> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<AutomationStatus>().map_err(|e| {
            AutomationError::Validation(vec![Violation::new("status", Rule::UnsupportedValue, e)])
        })?),
    };

    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    if limit == 0 || limit > crate::automation::service::MAX_PAGE_LIMIT {
        return Err(AutomationError::Validation(vec![Violation::new(
            "limit",
            Rule::OutOfRange,
            format!("must be between 1 and {}", crate::automation::service::MAX_PAGE_LIMIT),
        )]));
    }

    Ok(Json(state.service.list(status, query.skip, limit)))
}

/// POST /console/automations
/// Body: an automation document; only `name` is required
async fn create_automation(
    State(state): State<AppState>,
    Json(document): Json<Value>,
) -> Result<(StatusCode, Json<Value>), AutomationError> {
    let created = state.service.create(document).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /console/automations/{id}
async fn get_automation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AutomationError> {
    Ok(Json(state.service.get_document(&id).await?))
}

/// PUT /console/automations/{id}
/// Body: the fields to change
async fn update_automation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(changes): Json<Value>,
) -> Result<Json<Value>, AutomationError> {
    Ok(Json(state.service.update(&id, changes).await?))
}

/// DELETE /console/automations/{id}
async fn delete_automation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AutomationError> {
    state.service.delete(&id).await?;
    Ok(Json(json!({ "id": id, "deleted": true })))
}

async fn activate_automation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AutomationError> {
    Ok(Json(state.service.activate(&id).await?))
}

async fn deactivate_automation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AutomationError> {
    Ok(Json(state.service.deactivate(&id).await?))
}

/// POST /console/automations/{id}/reload
/// Re-reads the definition from the store
async fn reload_automation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AutomationError> {
    let outcome: ReloadOutcome = state.service.reload(&id).await?;
    Ok(Json(json!({ "id": id, "outcome": outcome })))
}

/// POST /console/reload
async fn reload_all(State(state): State<AppState>) -> Result<Json<LoadReport>, AutomationError> {
    Ok(Json(state.service.reload_all().await?))
}

/// POST /console/automations/{id}/endpoints
async fn add_endpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(endpoint): Json<Value>,
) -> Result<(StatusCode, Json<Value>), AutomationError> {
    let document = state.service.add_endpoint(&id, endpoint).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

async fn update_endpoint(
    State(state): State<AppState>,
    Path((id, endpoint_id)): Path<(String, String)>,
    Json(endpoint): Json<Value>,
) -> Result<Json<Value>, AutomationError> {
    Ok(Json(state.service.update_endpoint(&id, &endpoint_id, endpoint).await?))
}

async fn remove_endpoint(
    State(state): State<AppState>,
    Path((id, endpoint_id)): Path<(String, String)>,
) -> Result<Json<Value>, AutomationError> {
    Ok(Json(state.service.remove_endpoint(&id, &endpoint_id).await?))
}
