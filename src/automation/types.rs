//! Automation definition types
//!
//! These structures are the persisted JSON wire contract between the definition
//! store and the compiler. They are only ever constructed from a document that
//! already passed [`crate::automation::validate`], and they serialize back into
//! an equivalent document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// A complete automation: a mini REST API bound to one storage backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Automation {
    /// Opaque stable identifier, unique within the registry
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Semantic version string (e.g. "1.0.0")
    #[serde(default = "default_version")]
    pub version: String,
    /// URL prefix shared by every endpoint (e.g. "/api/tasks")
    pub base_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub status: AutomationStatus,
    /// Order is significant: it is the tie-break order inside one automation
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    pub db_config: DbBinding,
    /// Free-form data, never interpreted by the engine
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Unrecognised top-level keys, kept so compilation stays lossless
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_true() -> bool {
    true
}

/// Lifecycle state of an automation. Only `Active` automations are routed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomationStatus {
    Active,
    Inactive,
    #[default]
    Draft,
}

impl AutomationStatus {
    pub const ALL: [&'static str; 3] = ["active", "inactive", "draft"];

    pub fn as_str(&self) -> &'static str {
        match self {
            AutomationStatus::Active => "active",
            AutomationStatus::Inactive => "inactive",
            AutomationStatus::Draft => "draft",
        }
    }
}

impl fmt::Display for AutomationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AutomationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AutomationStatus::Active),
            "inactive" => Ok(AutomationStatus::Inactive),
            "draft" => Ok(AutomationStatus::Draft),
            other => Err(format!("unknown automation status '{other}'")),
        }
    }
}

/// One HTTP method + path rule within an automation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Optional endpoint identity used by the console's endpoint edit operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Path template relative to `base_path`, with `{name}` placeholders
    pub path: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub requires_auth: bool,
    /// Inactive endpoints are never routed
    #[serde(default = "default_true")]
    pub active: bool,
    /// Wrap the result in a `{ "data": .., "count": .. }` envelope
    #[serde(default)]
    pub wrap_response: bool,
    /// One record (or not-found) instead of a list
    #[serde(default)]
    pub single_item: bool,
    /// Name of the parameter that carries the record identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_field: Option<String>,
}

impl Endpoint {
    /// Whether this endpoint addresses one stored record by identifier
    pub fn is_per_record(&self) -> bool {
        match self.method {
            HttpMethod::Get => self.single_item,
            HttpMethod::Post => false,
            HttpMethod::Put | HttpMethod::Patch | HttpMethod::Delete => true,
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// HTTP verbs an endpoint may be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub const ALL: [&'static str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// POST/PUT/PATCH read non-path parameters from the body, GET/DELETE from the query string
    pub fn reads_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(format!("unsupported HTTP method '{other}'")),
        }
    }
}

/// Declared input of an endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    /// Only meaningful when `required` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamType {
    pub const ALL: [&'static str; 4] = ["string", "integer", "number", "boolean"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
        }
    }

    /// Whether an already-typed JSON value (e.g. a declared default) fits this type
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(ParamType::String),
            "integer" => Ok(ParamType::Integer),
            "number" => Ok(ParamType::Number),
            "boolean" => Ok(ParamType::Boolean),
            other => Err(format!("unknown parameter type '{other}'")),
        }
    }
}

/// Storage binding of an automation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbBinding {
    /// Backend discriminator, e.g. "sqlite" or "memory"
    #[serde(rename = "type")]
    pub backend_type: String,
    /// Interpreted only by the matching backend (connection string, database name, ...)
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Logical table or collection the backend operates on
    pub collection_name: String,
}

impl DbBinding {
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoint_defaults_fill_missing_flags() {
        let endpoint: Endpoint = serde_json::from_value(json!({
            "path": "/",
            "method": "GET"
        }))
        .unwrap();
        assert!(endpoint.active);
        assert!(!endpoint.requires_auth);
        assert!(!endpoint.wrap_response);
        assert!(!endpoint.single_item);
        assert!(endpoint.parameters.is_empty());
    }

    #[test]
    fn per_record_operations() {
        let mut endpoint: Endpoint =
            serde_json::from_value(json!({"path": "/{id}", "method": "GET"})).unwrap();
        assert!(!endpoint.is_per_record());
        endpoint.single_item = true;
        assert!(endpoint.is_per_record());
        endpoint.method = HttpMethod::Post;
        assert!(!endpoint.is_per_record());
        endpoint.method = HttpMethod::Delete;
        assert!(endpoint.is_per_record());
    }

    #[test]
    fn param_type_accepts_matching_defaults() {
        assert!(ParamType::Integer.accepts(&json!(3)));
        assert!(!ParamType::Integer.accepts(&json!(3.5)));
        assert!(ParamType::Number.accepts(&json!(3.5)));
        assert!(ParamType::Boolean.accepts(&json!(false)));
        assert!(!ParamType::String.accepts(&json!(1)));
    }

    #[test]
    fn unknown_top_level_keys_survive() {
        let doc = json!({
            "id": "a1",
            "name": "notes",
            "base_path": "/notes",
            "display_name": "Notes",
            "db_config": {"type": "memory", "collection_name": "notes"}
        });
        let automation: Automation = serde_json::from_value(doc).unwrap();
        assert_eq!(automation.extensions.get("display_name"), Some(&json!("Notes")));
        let back = serde_json::to_value(&automation).unwrap();
        assert_eq!(back["display_name"], "Notes");
        assert_eq!(back["status"], "draft");
    }
}
