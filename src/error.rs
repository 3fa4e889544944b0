//! Error taxonomy shared by the compiler, the registry and the request path.
//!
//! Every failure that reaches the request layer is one of the variants of
//! [`AutomationError`]. Field-level problems are carried as [`Violation`]s so a
//! client can render per-field feedback instead of parsing a message string.

use serde::Serialize;
use std::fmt;

/// Machine-readable rule that a field broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    // Definition rules
    MissingField,
    InvalidType,
    InvalidFormat,
    UnsupportedValue,
    Duplicate,
    UnknownReference,
    ConflictingFields,
    // Request rules
    MissingRequired,
    TypeMismatch,
    OutOfRange,
    InvalidBody,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rule::MissingField => "missing_field",
            Rule::InvalidType => "invalid_type",
            Rule::InvalidFormat => "invalid_format",
            Rule::UnsupportedValue => "unsupported_value",
            Rule::Duplicate => "duplicate",
            Rule::UnknownReference => "unknown_reference",
            Rule::ConflictingFields => "conflicting_fields",
            Rule::MissingRequired => "missing_required",
            Rule::TypeMismatch => "type_mismatch",
            Rule::OutOfRange => "out_of_range",
            Rule::InvalidBody => "invalid_body",
        };
        f.write_str(name)
    }
}

/// A single `(field-path, rule, message)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Dotted path to the offending field, e.g. `endpoints[1].parameters[0].type`
    pub field: String,
    pub rule: Rule,
    pub message: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, rule: Rule, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            rule,
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.field, self.message, self.rule)
    }
}

/// Conditions surfaced to the request layer.
#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    /// Compile-time rejection; nothing from the definition was applied.
    #[error("Automation definition is invalid: {}", join_violations(.0))]
    DefinitionInvalid(Vec<Violation>),

    /// Request parameters failed binding or coercion.
    #[error("Request validation failed: {}", join_violations(.0))]
    Validation(Vec<Violation>),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("{resource} not found: {key}")]
    NotFound { resource: String, key: String },

    /// Two active automations claim the same method and path shape.
    #[error("Route {method} {path} is already served by automation '{owner}'")]
    RouteConflict {
        method: String,
        path: String,
        owner: String,
    },

    #[error("{resource} already exists: {key}")]
    AlreadyExists { resource: String, key: String },

    /// Transient storage failure; the caller may retry with backoff.
    #[error("Storage backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AutomationError {
    pub fn not_found(resource: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            key: key.into(),
        }
    }

    pub fn already_exists(resource: impl Into<String>, key: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource: resource.into(),
            key: key.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable snake_case discriminator used in response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AutomationError::DefinitionInvalid(_) => "definition_invalid",
            AutomationError::Validation(_) => "validation_error",
            AutomationError::Unauthorized(_) => "unauthorized",
            AutomationError::NotFound { .. } => "not_found",
            AutomationError::RouteConflict { .. } => "route_conflict",
            AutomationError::AlreadyExists { .. } => "already_exists",
            AutomationError::BackendUnavailable(_) => "backend_unavailable",
            AutomationError::Internal(_) => "internal_error",
        }
    }

    /// Field violations carried by this error, if any.
    pub fn violations(&self) -> &[Violation] {
        match self {
            AutomationError::DefinitionInvalid(v) | AutomationError::Validation(v) => v,
            _ => &[],
        }
    }
}

impl From<anyhow::Error> for AutomationError {
    fn from(err: anyhow::Error) -> Self {
        AutomationError::Internal(format!("{err:#}"))
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
