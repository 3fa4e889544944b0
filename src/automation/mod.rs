//! Automation Management Layer
//!
//! Definitions, their compiled form, the hot-reload registry and the lifecycle
//! service that keeps the registry and the definition store in step.

// Wire types of the persisted automation document
pub mod types;

// Path templates and request path matching
pub mod path;

// Definition Validator: raw JSON -> CompiledAutomation
pub mod validate;

// Copy-on-write registry using ArcSwap
pub mod registry;

// Create / replace / delete / activate / reload, persisted through a DefinitionStore
pub mod service;

use path::PathTemplate;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

pub use registry::{AutomationRegistry, AutomationSummary, ResolvedRoute};
pub use service::AutomationService;
pub use types::{Automation, AutomationStatus, DbBinding, Endpoint, HttpMethod, ParamType, Parameter};
pub use validate::validate;

/// Immutable, validated form of an automation document
#[derive(Debug, Clone)]
pub struct CompiledAutomation {
    pub definition: Automation,
    /// One entry per declared endpoint, in declaration order
    pub endpoints: Vec<Arc<CompiledEndpoint>>,
}

impl CompiledAutomation {
    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn is_active(&self) -> bool {
        self.definition.status == AutomationStatus::Active
    }

    /// Serialize back into the persisted document shape
    pub fn to_document(&self) -> Value {
        serde_json::to_value(&self.definition).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone)]
pub struct CompiledEndpoint {
    pub definition: Endpoint,
    /// `base_path` joined with the endpoint path
    pub template: PathTemplate,
    /// Parameters sourced from path segments rather than query or body
    pub path_params: HashSet<String>,
}

impl CompiledEndpoint {
    pub fn method(&self) -> HttpMethod {
        self.definition.method
    }

    /// Human-readable label used in logs, e.g. `GET /api/tasks/{task_id}`
    pub fn label(&self) -> String {
        format!("{} {}", self.definition.method, self.template)
    }
}
