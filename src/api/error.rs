/// HTTP mapping for [`AutomationError`]
///
/// Body shape: `{"error": {"type", "message", "violations"?, "resource"?, "key"?}}`.

use crate::error::AutomationError;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Map, Value};

/// Seconds a client should wait before retrying a storage outage
const RETRY_AFTER_SECS: &str = "5";

pub fn status_of(err: &AutomationError) -> StatusCode {
    match err {
        AutomationError::DefinitionInvalid(_) => StatusCode::BAD_REQUEST,
        AutomationError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AutomationError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        AutomationError::NotFound { .. } => StatusCode::NOT_FOUND,
        AutomationError::RouteConflict { .. } | AutomationError::AlreadyExists { .. } => StatusCode::CONFLICT,
        AutomationError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        AutomationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_body(err: &AutomationError) -> Value {
    let mut error = Map::new();
    error.insert("type".to_string(), json!(err.kind()));
    error.insert("message".to_string(), json!(err.to_string()));

    match err {
        AutomationError::DefinitionInvalid(violations) | AutomationError::Validation(violations) => {
            error.insert("violations".to_string(), json!(violations));
        }
        AutomationError::NotFound { resource, key } | AutomationError::AlreadyExists { resource, key } => {
            error.insert("resource".to_string(), json!(resource));
            error.insert("key".to_string(), json!(key));
        }
        AutomationError::RouteConflict { owner, .. } => {
            error.insert("resource".to_string(), json!("Automation"));
            error.insert("key".to_string(), json!(owner));
        }
        _ => {}
    }

    json!({ "error": error })
}

impl IntoResponse for AutomationError {
    fn into_response(self) -> Response {
        let status = status_of(&self);
        if status.is_server_error() {
            tracing::error!("❌ {}", self);
        }

        let mut response = (status, Json(error_body(&self))).into_response();
        let headers = response.headers_mut();
        match self {
            AutomationError::Unauthorized(_) => {
                headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            AutomationError::BackendUnavailable(_) => {
                headers.insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
            }
            _ => {}
        }
        response
    }
}
