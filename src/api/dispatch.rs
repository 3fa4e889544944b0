/// Dynamic automation endpoints
///
/// Every request that no static route claims lands here. The request is
/// resolved against the registry snapshot and handed to the matching
/// endpoint executor.

use crate::api::AppState;
use crate::automation::HttpMethod;
use crate::backend::Record;
use crate::error::{AutomationError, Rule, Violation};
use crate::runtime::auth::bearer_token;
use crate::runtime::EndpointRequest;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, Uri},
    response::{IntoResponse, Json, Response},
};
use serde_json::Value;
use std::collections::HashMap;

pub const TOTAL_COUNT_HEADER: HeaderName = HeaderName::from_static("x-total-count");

/// Fallback handler serving every live automation endpoint
pub async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AutomationError> {
    let path = uri.path();
    let route_missing = || AutomationError::not_found("Route", format!("{} {}", method, path));

    let http_method: HttpMethod = method.as_str().parse().map_err(|_| route_missing())?;
    let resolved = state.registry.resolve(http_method, path).ok_or_else(route_missing)?;
    let executor = resolved
        .executor()
        .ok_or_else(|| AutomationError::internal(format!("Resolved endpoint {} has no executor", resolved.endpoint_index)))?;

    tracing::debug!(
        "📥 {} {} -> {} [{}]",
        method,
        path,
        resolved.automation.id(),
        executor.endpoint().label()
    );

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string);
    // Unauthenticated callers learn nothing about the request shape
    executor.authorize(bearer.as_deref())?;

    let request = EndpointRequest {
        path_params: decode_path_params(&resolved.path_params)?,
        query: parse_query(&uri)?,
        body: parse_body(http_method, &body)?,
        bearer_token: bearer,
    };

    let outcome = executor.execute(request).await?;
    let mut response = (outcome.status, Json(outcome.body)).into_response();
    if let Some(total) = outcome.total {
        response.headers_mut().insert(TOTAL_COUNT_HEADER, HeaderValue::from(total));
    }
    Ok(response)
}

/// Routes match on raw segments; captured values are percent-decoded before binding
fn decode_path_params(raw: &HashMap<String, String>) -> Result<HashMap<String, String>, AutomationError> {
    let mut violations = Vec::new();
    let mut decoded = HashMap::with_capacity(raw.len());
    for (name, value) in raw {
        match urlencoding::decode(value) {
            Ok(text) => {
                decoded.insert(name.clone(), text.into_owned());
            }
            Err(_) => violations.push(Violation::new(
                name.as_str(),
                Rule::InvalidFormat,
                format!("path parameter '{name}' is not valid percent-encoded UTF-8"),
            )),
        }
    }
    if violations.is_empty() {
        Ok(decoded)
    } else {
        Err(AutomationError::Validation(violations))
    }
}

fn parse_query(uri: &Uri) -> Result<HashMap<String, String>, AutomationError> {
    Query::<HashMap<String, String>>::try_from_uri(uri)
        .map(|Query(query)| query)
        .map_err(|e| AutomationError::Validation(vec![Violation::new("query", Rule::InvalidFormat, e.body_text())]))
}

/// Empty bodies and methods without a body bind nothing; anything else must be a JSON object
fn parse_body(method: HttpMethod, body: &Bytes) -> Result<Option<Record>, AutomationError> {
    if !method.reads_body() || body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let invalid = |message: String| AutomationError::Validation(vec![Violation::new("body", Rule::InvalidBody, message)]);
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(record)) => Ok(Some(record)),
        Ok(_) => Err(invalid("request body must be a JSON object".to_string())),
        Err(e) => Err(invalid(format!("request body is not valid JSON: {e}"))),
    }
}
