//! Definition Validator
//!
//! Walks a raw automation document and records every structural problem it
//! finds, each with the dotted path of the offending field. Only a document
//! that produces no violations is deserialized into the typed model and
//! compiled. The walk has no side effects.

use super::path::{is_identifier, PathTemplate};
use super::types::{Automation, AutomationStatus, HttpMethod, ParamType};
use super::{CompiledAutomation, CompiledEndpoint};
use crate::error::{Rule, Violation};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

static BASE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/[a-zA-Z0-9/_-]*$").expect("Invalid base_path regex"));

/// Prefixes served by the static router; automations cannot claim them
const RESERVED_PREFIXES: [&str; 2] = ["/console", "/healthz"];

static SEMVER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(0|[1-9][0-9]*)\.(0|[1-9][0-9]*)\.(0|[1-9][0-9]*)(-[0-9A-Za-z.-]+)?(\+[0-9A-Za-z.-]+)?$")
        .expect("Invalid semver regex")
});

/// Validate a raw automation document and compile it.
///
/// All violations are collected; nothing is compiled unless there are none.
pub fn validate(document: &Value) -> Result<CompiledAutomation, Vec<Violation>> {
    let Some(root) = document.as_object() else {
        return Err(vec![Violation::new(
            "$",
            Rule::InvalidType,
            "automation definition must be a JSON object",
        )]);
    };
    let root = without_nulls(root);

    let mut violations = Vec::new();
    check_root(&root, &mut violations);
    if !violations.is_empty() {
        return Err(violations);
    }

    let definition: Automation = serde_json::from_value(Value::Object(root))
        .map_err(|e| vec![Violation::new("$", Rule::InvalidType, e.to_string())])?;
    compile(definition)
}

/// Copy of the document where an explicit `null` reads as an absent field.
///
/// Applies to root, db_config, endpoint and parameter fields. Values inside
/// metadata and db_config.config are kept as written.
fn without_nulls(root: &Map<String, Value>) -> Map<String, Value> {
    fn strip(object: &Map<String, Value>) -> Map<String, Value> {
        object
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    let mut root = strip(root);
    if let Some(Value::Object(db_config)) = root.get_mut("db_config") {
        *db_config = strip(db_config);
    }
    if let Some(Value::Array(endpoints)) = root.get_mut("endpoints") {
        for endpoint in endpoints.iter_mut() {
            let Value::Object(fields) = endpoint else { continue };
            *fields = strip(fields);
            if let Some(Value::Array(params)) = fields.get_mut("parameters") {
                for param in params.iter_mut() {
                    if let Value::Object(param_fields) = param {
                        *param_fields = strip(param_fields);
                    }
                }
            }
        }
    }
    root
}

/// Build the compiled form of an already-checked definition
fn compile(definition: Automation) -> Result<CompiledAutomation, Vec<Violation>> {
    let mut endpoints = Vec::with_capacity(definition.endpoints.len());
    let mut violations = Vec::new();

    for (index, endpoint) in definition.endpoints.iter().enumerate() {
        match PathTemplate::join(&definition.base_path, &endpoint.path) {
            Ok(template) => {
                let path_params = template.placeholders().map(str::to_string).collect();
                endpoints.push(Arc::new(CompiledEndpoint {
                    definition: endpoint.clone(),
                    template,
                    path_params,
                }));
            }
            Err(message) => violations.push(Violation::new(
                format!("endpoints[{index}].path"),
                Rule::InvalidFormat,
                message,
            )),
        }
    }

    if violations.is_empty() {
        Ok(CompiledAutomation {
            definition,
            endpoints,
        })
    } else {
        Err(violations)
    }
}

fn check_root(root: &Map<String, Value>, out: &mut Vec<Violation>) {
    required_text(root, "id", "id", out);
    required_text(root, "name", "name", out);
    optional_string(root, "description", "description", out);

    if let Some(version) = optional_string(root, "version", "version", out) {
        if !SEMVER.is_match(version) {
            out.push(Violation::new(
                "version",
                Rule::InvalidFormat,
                format!("'{version}' is not a semantic version (expected MAJOR.MINOR.PATCH)"),
            ));
        }
    }

    let base_path = required_text(root, "base_path", "base_path", out);
    if let Some(base_path) = base_path {
        if !BASE_PATH.is_match(base_path) {
            out.push(Violation::new(
                "base_path",
                Rule::InvalidFormat,
                format!("'{base_path}' must start with '/' and contain only letters, digits, '/', '_' or '-'"),
            ));
        } else if let Some(prefix) = reserved_prefix(base_path) {
            out.push(Violation::new(
                "base_path",
                Rule::UnsupportedValue,
                format!("'{base_path}' falls under the reserved prefix '{prefix}'"),
            ));
        }
    }

    for key in ["created_at", "updated_at"] {
        if let Some(stamp) = optional_string(root, key, key, out) {
            if !is_timestamp(stamp) {
                out.push(Violation::new(
                    key,
                    Rule::InvalidFormat,
                    format!("'{stamp}' is not an ISO 8601 / RFC 3339 timestamp"),
                ));
            }
        }
    }

    if let Some(status) = optional_string(root, "status", "status", out) {
        if AutomationStatus::from_str(status).is_err() {
            out.push(Violation::new(
                "status",
                Rule::UnsupportedValue,
                format!(
                    "'{status}' is not one of {}",
                    AutomationStatus::ALL.join(", ")
                ),
            ));
        }
    }

    match root.get("endpoints") {
        None => out.push(Violation::new(
            "endpoints",
            Rule::MissingField,
            "endpoints is required",
        )),
        Some(Value::Array(endpoints)) => {
            check_endpoints(base_path.filter(|b| BASE_PATH.is_match(b)), endpoints, out)
        }
        Some(_) => out.push(Violation::new(
            "endpoints",
            Rule::InvalidType,
            "endpoints must be an array",
        )),
    }

    match root.get("db_config") {
        None => out.push(Violation::new(
            "db_config",
            Rule::MissingField,
            "db_config is required",
        )),
        Some(Value::Object(db_config)) => check_db_config(db_config, out),
        Some(_) => out.push(Violation::new(
            "db_config",
            Rule::InvalidType,
            "db_config must be an object",
        )),
    }

    if let Some(metadata) = root.get("metadata") {
        if !metadata.is_object() {
            out.push(Violation::new(
                "metadata",
                Rule::InvalidType,
                "metadata must be an object",
            ));
        }
    }
}

fn check_db_config(db_config: &Map<String, Value>, out: &mut Vec<Violation>) {
    required_text(db_config, "type", "db_config.type", out);
    required_text(db_config, "collection_name", "db_config.collection_name", out);
    if let Some(config) = db_config.get("config") {
        if !config.is_object() {
            out.push(Violation::new(
                "db_config.config",
                Rule::InvalidType,
                "db_config.config must be an object",
            ));
        }
    }
}

fn check_endpoints(base_path: Option<&str>, endpoints: &[Value], out: &mut Vec<Violation>) {
    // (method, path shape) -> index of the first endpoint claiming it
    let mut routes: HashMap<(HttpMethod, String), usize> = HashMap::new();
    let mut endpoint_ids: HashSet<&str> = HashSet::new();

    for (index, value) in endpoints.iter().enumerate() {
        let at = format!("endpoints[{index}]");
        let Some(endpoint) = value.as_object() else {
            out.push(Violation::new(at, Rule::InvalidType, "endpoint must be an object"));
            continue;
        };

        if let Some(id) = optional_string(endpoint, "id", &format!("{at}.id"), out) {
            if !endpoint_ids.insert(id) {
                out.push(Violation::new(
                    format!("{at}.id"),
                    Rule::Duplicate,
                    format!("endpoint id '{id}' is declared more than once"),
                ));
            }
        }

        let template = required_text(endpoint, "path", &format!("{at}.path"), out).and_then(|path| {
            match PathTemplate::parse(path) {
                Ok(template) => Some(template),
                Err(message) => {
                    out.push(Violation::new(format!("{at}.path"), Rule::InvalidFormat, message));
                    None
                }
            }
        });

        let method = required_text(endpoint, "method", &format!("{at}.method"), out).and_then(|m| {
            match HttpMethod::from_str(m) {
                Ok(method) => Some(method),
                Err(_) => {
                    out.push(Violation::new(
                        format!("{at}.method"),
                        Rule::UnsupportedValue,
                        format!("'{m}' is not one of {}", HttpMethod::ALL.join(", ")),
                    ));
                    None
                }
            }
        });

        optional_string(endpoint, "summary", &format!("{at}.summary"), out);
        optional_string(endpoint, "description", &format!("{at}.description"), out);
        for flag in ["requires_auth", "active", "wrap_response"] {
            optional_bool(endpoint, flag, &format!("{at}.{flag}"), out);
        }
        let single_item =
            optional_bool(endpoint, "single_item", &format!("{at}.single_item"), out).unwrap_or(false);

        let params = check_parameters(endpoint, &at, out);

        if let Some(template) = &template {
            for placeholder in template.placeholders() {
                match params.get(placeholder) {
                    None => out.push(Violation::new(
                        format!("{at}.path"),
                        Rule::UnknownReference,
                        format!("placeholder '{{{placeholder}}}' has no parameter named '{placeholder}'"),
                    )),
                    Some((param_index, false)) => out.push(Violation::new(
                        format!("{at}.parameters[{param_index}].required"),
                        Rule::ConflictingFields,
                        format!("parameter '{placeholder}' fills a path placeholder and must be required"),
                    )),
                    Some(_) => {}
                }
            }
        }

        let id_field = optional_string(endpoint, "id_field", &format!("{at}.id_field"), out);
        if let Some(id_field) = id_field {
            if !params.contains_key(id_field) {
                out.push(Violation::new(
                    format!("{at}.id_field"),
                    Rule::UnknownReference,
                    format!("id_field '{id_field}' does not name a declared parameter"),
                ));
            }
        }

        if let Some(method) = method {
            let per_record = match method {
                HttpMethod::Get => single_item,
                HttpMethod::Post => false,
                HttpMethod::Put | HttpMethod::Patch | HttpMethod::Delete => true,
            };
            if per_record && id_field.is_none() && endpoint.get("id_field").is_none() {
                out.push(Violation::new(
                    format!("{at}.id_field"),
                    Rule::MissingField,
                    format!("{method} endpoints addressing a single record must declare id_field"),
                ));
            }
        }

        if let (Some(method), Some(template), Some(base)) = (method, &template, base_path) {
            if let Ok(full) = PathTemplate::join(base, &template.to_string()) {
                if let Some(first) = routes.insert((method, full.shape()), index) {
                    out.push(Violation::new(
                        at.clone(),
                        Rule::Duplicate,
                        format!("{method} {full} duplicates endpoints[{first}]"),
                    ));
                }
            }
        }
    }
}

/// Check an endpoint's parameter list.
///
/// Returns `name -> (index, required)` for every well-named parameter.
fn check_parameters(
    endpoint: &Map<String, Value>,
    at: &str,
    out: &mut Vec<Violation>,
) -> HashMap<String, (usize, bool)> {
    let mut declared = HashMap::new();
    let params = match endpoint.get("parameters") {
        None => return declared,
        Some(Value::Array(params)) => params,
        Some(_) => {
            out.push(Violation::new(
                format!("{at}.parameters"),
                Rule::InvalidType,
                "parameters must be an array",
            ));
            return declared;
        }
    };

    for (index, value) in params.iter().enumerate() {
        let at = format!("{at}.parameters[{index}]");
        let Some(param) = value.as_object() else {
            out.push(Violation::new(at, Rule::InvalidType, "parameter must be an object"));
            continue;
        };

        let name = required_text(param, "name", &format!("{at}.name"), out);
        let param_type = required_text(param, "type", &format!("{at}.type"), out).and_then(|t| {
            match ParamType::from_str(t) {
                Ok(param_type) => Some(param_type),
                Err(_) => {
                    out.push(Violation::new(
                        format!("{at}.type"),
                        Rule::UnsupportedValue,
                        format!("'{t}' is not one of {}", ParamType::ALL.join(", ")),
                    ));
                    None
                }
            }
        });
        optional_string(param, "description", &format!("{at}.description"), out);
        let required = optional_bool(param, "required", &format!("{at}.required"), out).unwrap_or(false);

        if let Some(default) = param.get("default").filter(|d| !d.is_null()) {
            if required {
                out.push(Violation::new(
                    format!("{at}.default"),
                    Rule::ConflictingFields,
                    "a required parameter cannot declare a default",
                ));
            }
            if let Some(param_type) = param_type {
                if !param_type.accepts(default) {
                    out.push(Violation::new(
                        format!("{at}.default"),
                        Rule::InvalidType,
                        format!("default {default} does not match declared type {param_type}"),
                    ));
                }
            }
        }

        let Some(name) = name else { continue };
        if !is_identifier(name) {
            out.push(Violation::new(
                format!("{at}.name"),
                Rule::InvalidFormat,
                format!("'{name}' is not a valid parameter name"),
            ));
            continue;
        }
        if declared.contains_key(name) {
            out.push(Violation::new(
                format!("{at}.name"),
                Rule::Duplicate,
                format!("parameter '{name}' is declared more than once"),
            ));
            continue;
        }
        declared.insert(name.to_string(), (index, required));
    }

    declared
}

/// A present, non-empty string field. Records a violation otherwise.
fn required_text<'a>(
    object: &'a Map<String, Value>,
    key: &str,
    field: &str,
    out: &mut Vec<Violation>,
) -> Option<&'a str> {
    match object.get(key) {
        None | Some(Value::Null) => {
            out.push(Violation::new(field, Rule::MissingField, format!("{key} is required")));
            None
        }
        Some(Value::String(s)) if s.trim().is_empty() => {
            out.push(Violation::new(field, Rule::MissingField, format!("{key} must not be empty")));
            None
        }
        Some(Value::String(s)) => Some(s.as_str()),
        Some(_) => {
            out.push(Violation::new(field, Rule::InvalidType, format!("{key} must be a string")));
            None
        }
    }
}

fn optional_string<'a>(
    object: &'a Map<String, Value>,
    key: &str,
    field: &str,
    out: &mut Vec<Violation>,
) -> Option<&'a str> {
    match object.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.as_str()),
        Some(_) => {
            out.push(Violation::new(field, Rule::InvalidType, format!("{key} must be a string")));
            None
        }
    }
}

fn optional_bool(
    object: &Map<String, Value>,
    key: &str,
    field: &str,
    out: &mut Vec<Violation>,
) -> Option<bool> {
    match object.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::Bool(b)) => Some(*b),
        Some(_) => {
            out.push(Violation::new(field, Rule::InvalidType, format!("{key} must be a boolean")));
            None
        }
    }
}

fn reserved_prefix(base_path: &str) -> Option<&'static str> {
    let trimmed = base_path.trim_end_matches('/');
    RESERVED_PREFIXES.into_iter().find(|prefix| {
        trimmed
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}

/// RFC 3339, or a naive local stamp with either a `T` or a space separator
fn is_timestamp(value: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(value).is_ok()
        || ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .any(|format| chrono::NaiveDateTime::parse_from_str(value, format).is_ok())
}
