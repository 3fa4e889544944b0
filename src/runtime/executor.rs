/// Endpoint Executor
///
/// Runs one request through a compiled endpoint:
/// AuthCheck -> Bind -> Dispatch -> Shape -> Done, with any stage able to fail.
/// Executors hold no per-request state, so one instance serves any number of
/// concurrent requests.

use crate::automation::{CompiledEndpoint, HttpMethod};
use crate::backend::{BackendError, Page, Record, StorageBackend, RECORD_ID_KEY};
use crate::error::{AutomationError, Rule, Violation};
use crate::runtime::auth::AuthGate;
use crate::runtime::binder;
use axum::http::StatusCode;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Raw inputs of one request, already split by the transport
#[derive(Debug, Clone, Default)]
pub struct EndpointRequest {
    pub path_params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    /// JSON object body for POST/PUT/PATCH
    pub body: Option<Record>,
    pub bearer_token: Option<String>,
}

/// Shaped result handed back to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointResponse {
    pub status: StatusCode,
    pub body: Value,
    /// Total matching records, set for list endpoints
    pub total: Option<u64>,
}

/// Stage a request is in; logged when a request fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStage {
    AuthCheck,
    Bind,
    Dispatch,
    Shape,
    Done,
}

impl fmt::Display for ExecutionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionStage::AuthCheck => "auth_check",
            ExecutionStage::Bind => "bind",
            ExecutionStage::Dispatch => "dispatch",
            ExecutionStage::Shape => "shape",
            ExecutionStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Result of the Dispatch stage, before envelope shaping
#[derive(Debug)]
enum Outcome {
    Page(Page),
    Found(Record),
    Created(Record),
    Updated(Record),
    Deleted(Value),
}

#[derive(Debug, Clone)]
pub struct EndpointExecutor {
    automation_id: String,
    endpoint: Arc<CompiledEndpoint>,
    backend: Arc<dyn StorageBackend>,
    auth: Arc<AuthGate>,
}

impl EndpointExecutor {
    pub fn new(
        automation_id: String,
        endpoint: Arc<CompiledEndpoint>,
        backend: Arc<dyn StorageBackend>,
        auth: Arc<AuthGate>,
    ) -> Self {
        Self {
            automation_id,
            endpoint,
            backend,
            auth,
        }
    }

    pub fn endpoint(&self) -> &CompiledEndpoint {
        &self.endpoint
    }

    /// AuthCheck alone, run by the transport before it reads the query or body
    pub fn authorize(&self, bearer_token: Option<&str>) -> Result<(), AutomationError> {
        self.auth
            .check(self.endpoint.definition.requires_auth, bearer_token)
            .map(|_| ())
            .map_err(|err| {
                tracing::warn!(
                    "⚠️ {} [{}] rejected at {}: {}",
                    self.endpoint.label(),
                    self.automation_id,
                    ExecutionStage::AuthCheck,
                    err
                );
                err.into()
            })
    }

    /// Execute one request against this endpoint
    pub async fn execute(&self, request: EndpointRequest) -> Result<EndpointResponse, AutomationError> {
        let mut stage = ExecutionStage::AuthCheck;
        let result = self.run(&mut stage, request).await;

        match &result {
            Ok(response) => tracing::debug!(
                "✅ {} [{}] -> {}",
                self.endpoint.label(),
                self.automation_id,
                response.status
            ),
            Err(err @ (AutomationError::BackendUnavailable(_) | AutomationError::Internal(_))) => {
                tracing::error!(
                    "❌ {} [{}] failed at {}: {}",
                    self.endpoint.label(),
                    self.automation_id,
                    stage,
                    err
                )
            }
            Err(err) => tracing::warn!(
                "⚠️ {} [{}] rejected at {}: {}",
                self.endpoint.label(),
                self.automation_id,
                stage,
                err
            ),
        }

        result
    }

    async fn run(
        &self,
        stage: &mut ExecutionStage,
        request: EndpointRequest,
    ) -> Result<EndpointResponse, AutomationError> {
        let definition = &self.endpoint.definition;

        self.auth
            .check(definition.requires_auth, request.bearer_token.as_deref())?;

        *stage = ExecutionStage::Bind;
        let params = binder::bind(
            &self.endpoint,
            &request.path_params,
            &request.query,
            request.body.as_ref(),
        )
        .map_err(AutomationError::Validation)?;

        *stage = ExecutionStage::Dispatch;
        let outcome = self.dispatch(params).await?;

        *stage = ExecutionStage::Shape;
        let response = self.shape(outcome);

        *stage = ExecutionStage::Done;
        Ok(response)
    }

    async fn dispatch(&self, mut params: Record) -> Result<Outcome, AutomationError> {
        let definition = &self.endpoint.definition;

        match definition.method {
            HttpMethod::Get if !definition.single_item => {
                let (limit, offset) = take_paging(&mut params)?;
                for name in &self.endpoint.path_params {
                    params.remove(name);
                }
                let page = self
                    .backend
                    .list(&params, limit, offset)
                    .await
                    .map_err(|e| self.backend_failure(e))?;
                Ok(Outcome::Page(page))
            }
            HttpMethod::Get => {
                let id = self.record_id(&mut params)?;
                match self.backend.get(&id).await.map_err(|e| self.backend_failure(e))? {
                    Some(record) => Ok(Outcome::Found(record)),
                    None => Err(self.not_found(&id)),
                }
            }
            HttpMethod::Post => {
                if let Some(id_field) = &definition.id_field {
                    if let Some(id) = params.remove(id_field) {
                        params.insert(RECORD_ID_KEY.to_string(), id);
                    }
                }
                let record = self
                    .backend
                    .insert(params)
                    .await
                    .map_err(|e| self.backend_failure(e))?;
                Ok(Outcome::Created(record))
            }
            HttpMethod::Put | HttpMethod::Patch => {
                let id = self.record_id(&mut params)?;
                match self
                    .backend
                    .update(&id, params)
                    .await
                    .map_err(|e| self.backend_failure(e))?
                {
                    Some(record) => Ok(Outcome::Updated(record)),
                    None => Err(self.not_found(&id)),
                }
            }
            HttpMethod::Delete => {
                let id = self.record_id(&mut params)?;
                if self.backend.delete(&id).await.map_err(|e| self.backend_failure(e))? {
                    Ok(Outcome::Deleted(id))
                } else {
                    Err(self.not_found(&id))
                }
            }
        }
    }

    /// Remove and return the identifier named by `id_field`
    fn record_id(&self, params: &mut Record) -> Result<Value, AutomationError> {
        let id_field = self.endpoint.definition.id_field.as_deref().ok_or_else(|| {
            AutomationError::internal(format!("{} has no id_field", self.endpoint.label()))
        })?;
        params.remove(id_field).ok_or_else(|| {
            AutomationError::Validation(vec![Violation::new(
                id_field,
                Rule::MissingRequired,
                format!("parameter '{id_field}' is required"),
            )])
        })
    }

    fn shape(&self, outcome: Outcome) -> EndpointResponse {
        let definition = &self.endpoint.definition;

        let (status, data, total) = match outcome {
            Outcome::Page(page) => {
                let items = page.records.into_iter().map(Value::Object).collect();
                (StatusCode::OK, Value::Array(items), Some(page.total))
            }
            Outcome::Found(record) | Outcome::Updated(record) => {
                (StatusCode::OK, self.single(Value::Object(record)), None)
            }
            Outcome::Created(record) => (StatusCode::CREATED, self.single(Value::Object(record)), None),
            Outcome::Deleted(id) => (
                StatusCode::OK,
                self.single(json!({ "id": id, "deleted": true })),
                None,
            ),
        };

        let body = match (definition.wrap_response, total) {
            (true, Some(count)) => json!({ "data": data, "count": count }),
            (true, None) => json!({ "data": data }),
            (false, _) => data,
        };

        EndpointResponse { status, body, total }
    }

    /// Single-item endpoints answer with one object, list-shaped ones with an array
    fn single(&self, item: Value) -> Value {
        if self.endpoint.definition.single_item {
            item
        } else {
            Value::Array(vec![item])
        }
    }

    fn not_found(&self, id: &Value) -> AutomationError {
        let key = match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        AutomationError::not_found(format!("Record in '{}'", self.backend.collection()), key)
    }

    fn backend_failure(&self, err: BackendError) -> AutomationError {
        match err {
            BackendError::Unavailable(message) => AutomationError::BackendUnavailable(message),
            BackendError::DuplicateKey(key) => AutomationError::Validation(vec![Violation::new(
                self.endpoint
                    .definition
                    .id_field
                    .clone()
                    .unwrap_or_else(|| RECORD_ID_KEY.to_string()),
                Rule::Duplicate,
                format!("a record with id '{key}' already exists"),
            )]),
            BackendError::Internal(message) => AutomationError::Internal(message),
        }
    }
}

/// Pull `limit` / `offset` out of the bound parameters; they never become filters
fn take_paging(params: &mut Record) -> Result<(u64, u64), AutomationError> {
    let mut violations = Vec::new();
    let mut read = |name: &str| -> u64 {
        match params.remove(name) {
            None => 0,
            Some(value) => match value.as_i64() {
                Some(n) if n >= 0 => n as u64,
                Some(_) => {
                    violations.push(Violation::new(
                        name,
                        Rule::OutOfRange,
                        format!("{name} must not be negative"),
                    ));
                    0
                }
                None => value.as_u64().unwrap_or_else(|| {
                    violations.push(Violation::new(
                        name,
                        Rule::TypeMismatch,
                        format!("{name} must be a non-negative integer"),
                    ));
                    0
                }),
            },
        }
    };
    let limit = read("limit");
    let offset = read("offset");

    if violations.is_empty() {
        Ok((limit, offset))
    } else {
        Err(AutomationError::Validation(violations))
    }
}
