//! Parameter Binder
//!
//! Turns the raw inputs of one request into the typed, defaulted parameter set
//! an endpoint declared. Values are looked up in the path first, then in the
//! query string (GET, DELETE) or the JSON body (POST, PUT, PATCH), then in the
//! declared default. Every problem is reported, not just the first.

use crate::automation::{CompiledEndpoint, ParamType, Parameter};
use crate::backend::Record;
use crate::error::{Rule, Violation};
use regex::Regex;
use serde_json::{Number, Value};
use std::collections::HashMap;
use std::sync::LazyLock;

static INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?[0-9]+$").expect("Invalid integer regex"));

static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?([0-9]+(\.[0-9]*)?|\.[0-9]+)([eE][+-]?[0-9]+)?$").expect("Invalid number regex")
});

/// A value as it arrived: text from the path or query string, or JSON from the body
#[derive(Debug, Clone, Copy)]
enum Raw<'a> {
    Text(&'a str),
    Json(&'a Value),
}

/// Bind request inputs against an endpoint's declared parameters.
///
/// `null` body fields count as absent. Undeclared inputs are ignored.
pub fn bind(
    endpoint: &CompiledEndpoint,
    path_params: &HashMap<String, String>,
    query: &HashMap<String, String>,
    body: Option<&Record>,
) -> Result<Record, Vec<Violation>> {
    let reads_body = endpoint.method().reads_body();
    let mut bound = Record::new();
    let mut violations = Vec::new();

    for param in &endpoint.definition.parameters {
        let raw = if endpoint.path_params.contains(&param.name) {
            path_params.get(&param.name).map(|s| Raw::Text(s))
        } else if reads_body {
            body.and_then(|b| b.get(&param.name))
                .filter(|v| !v.is_null())
                .map(Raw::Json)
        } else {
            query.get(&param.name).map(|s| Raw::Text(s))
        };

        match raw {
            Some(raw) => match coerce(param.param_type, raw) {
                Ok(value) => {
                    bound.insert(param.name.clone(), value);
                }
                Err(message) => violations.push(Violation::new(
                    param.name.as_str(),
                    Rule::TypeMismatch,
                    message,
                )),
            },
            None => match fallback(param) {
                Some(value) => {
                    bound.insert(param.name.clone(), value);
                }
                None if param.required => violations.push(Violation::new(
                    param.name.as_str(),
                    Rule::MissingRequired,
                    format!("parameter '{}' is required", param.name),
                )),
                None => {}
            },
        }
    }

    if violations.is_empty() {
        Ok(bound)
    } else {
        Err(violations)
    }
}

fn fallback(param: &Parameter) -> Option<Value> {
    if param.required {
        return None;
    }
    param.default.clone()
}

fn coerce(param_type: ParamType, raw: Raw<'_>) -> Result<Value, String> {
    match raw {
        Raw::Text(s) => coerce_text(param_type, s),
        Raw::Json(Value::String(s)) => coerce_text(param_type, s),
        Raw::Json(value) => coerce_json(param_type, value),
    }
}

fn coerce_text(param_type: ParamType, s: &str) -> Result<Value, String> {
    match param_type {
        ParamType::String => Ok(Value::String(s.to_string())),
        ParamType::Integer => parse_integer(s),
        ParamType::Number => parse_number(s),
        ParamType::Boolean => match s {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            other => Err(format!("expected true or false, got '{other}'")),
        },
    }
}

fn coerce_json(param_type: ParamType, value: &Value) -> Result<Value, String> {
    match (param_type, value) {
        (ParamType::Integer, Value::Number(n)) => integral(n)
            .map(Value::from)
            .ok_or_else(|| format!("expected an integer, got {n}")),
        (ParamType::Number, Value::Number(n)) => Ok(Value::Number(n.clone())),
        (ParamType::Boolean, Value::Bool(b)) => Ok(Value::Bool(*b)),
        (expected, other) => Err(format!("expected {expected}, got {}", json_kind(other))),
    }
}

fn parse_integer(s: &str) -> Result<Value, String> {
    if !INTEGER.is_match(s) {
        return Err(format!("expected an integer, got '{s}'"));
    }
    s.trim_start_matches('+')
        .parse::<i64>()
        .map(Value::from)
        .map_err(|_| format!("'{s}' is out of range for an integer"))
}

fn parse_number(s: &str) -> Result<Value, String> {
    if INTEGER.is_match(s) {
        if let Ok(i) = s.trim_start_matches('+').parse::<i64>() {
            return Ok(Value::from(i));
        }
    }
    if !NUMBER.is_match(s) {
        return Err(format!("expected a number, got '{s}'"));
    }
    s.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| format!("'{s}' is out of range for a number"))
}

/// Integer value of a JSON number, refusing anything with a fractional part
fn integral(n: &Number) -> Option<i64> {
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    if n.is_u64() {
        return None;
    }
    n.as_f64()
        .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
        .map(|f| f as i64)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
