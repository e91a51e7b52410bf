//! Payload validation boundary for the registration API.
//!
//! Every mutating management call submits its payload here before the store
//! is touched; a failure short-circuits the operation and its error detail is
//! returned to the caller verbatim. The validator is injected by constructor
//! so a different implementation (e.g. a JSON-Schema gate) can be swapped in
//! without touching the handlers.

use super::types::ErrorDetail;
use crate::response::GeneratorScript;
use serde_json::Value;

/// A failed validation: one entry per offending field.
#[derive(Debug, Clone)]
pub struct ValidationFailure {
    pub errors: Vec<ErrorDetail>,
}

impl ValidationFailure {
    fn issue(field: &str, message: impl Into<String>) -> ErrorDetail {
        ErrorDetail {
            code: "validation".to_string(),
            field: Some(field.to_string()),
            message: message.into(),
        }
    }
}

/// Pass/fail gate for registration payloads.
pub trait PayloadValidator: Send + Sync {
    fn validate(&self, payload: &Value) -> Result<(), ValidationFailure>;
}

const KNOWN_METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "DELETE", "PATCH", "OPTIONS", "TRACE",
];

/// Structural validation of registration payloads, including generator
/// script compilation so syntax errors surface at registration time rather
/// than at request time.
#[derive(Debug, Default)]
pub struct DefaultValidator;

impl PayloadValidator for DefaultValidator {
    fn validate(&self, payload: &Value) -> Result<(), ValidationFailure> {
        let mut errors = Vec::new();

        let Some(obj) = payload.as_object() else {
            return Err(ValidationFailure {
                errors: vec![ErrorDetail::new("validation", "payload must be a JSON object")],
            });
        };

        match obj.get("method").and_then(Value::as_str) {
            Some(method) if KNOWN_METHODS.contains(&method.to_uppercase().as_str()) => {}
            Some(method) => errors.push(ValidationFailure::issue(
                "method",
                format!("unknown HTTP method '{method}'"),
            )),
            None => errors.push(ValidationFailure::issue(
                "method",
                "required and must be a string",
            )),
        }

        match obj.get("path").and_then(Value::as_str) {
            Some(path) if path.starts_with('/') => {}
            Some(_) => errors.push(ValidationFailure::issue("path", "must start with '/'")),
            None => errors.push(ValidationFailure::issue(
                "path",
                "required and must be a string",
            )),
        }

        if let Some(criteria) = obj.get("matchCriteria") {
            validate_criteria(criteria, &mut errors);
        }

        match obj.get("response") {
            Some(response) => validate_response(response, &mut errors),
            None => errors.push(ValidationFailure::issue("response", "required")),
        }

        if let Some(times) = obj.get("timesAllowed") {
            let valid = match times {
                Value::Number(n) => n.as_u64().is_some_and(|n| u32::try_from(n).is_ok()),
                Value::String(s) => s == "unlimited",
                _ => false,
            };
            if !valid {
                errors.push(ValidationFailure::issue(
                    "timesAllowed",
                    "must be a non-negative integer or \"unlimited\"",
                ));
            }
        }

        if let Some(delay) = obj.get("delay") {
            validate_delay(delay, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationFailure { errors })
        }
    }
}

fn validate_criteria(criteria: &Value, errors: &mut Vec<ErrorDetail>) {
    let Some(obj) = criteria.as_object() else {
        errors.push(ValidationFailure::issue("matchCriteria", "must be an object"));
        return;
    };

    if let Some(query) = obj.get("query") {
        match query.as_object() {
            Some(map) if map.values().all(Value::is_string) => {}
            _ => errors.push(ValidationFailure::issue(
                "matchCriteria.query",
                "must be an object of string values",
            )),
        }
    }

    if let Some(mode) = obj.get("bodyMatch") {
        match mode.as_str() {
            Some("partial") | Some("exact") => {}
            _ => errors.push(ValidationFailure::issue(
                "matchCriteria.bodyMatch",
                "must be \"partial\" or \"exact\"",
            )),
        }
    }
}

fn validate_response(response: &Value, errors: &mut Vec<ErrorDetail>) {
    let Some(obj) = response.as_object() else {
        errors.push(ValidationFailure::issue("response", "must be an object"));
        return;
    };

    let kinds: Vec<&str> = ["literal", "sequence", "generator"]
        .into_iter()
        .filter(|k| obj.contains_key(*k))
        .collect();

    if kinds.len() != 1 {
        errors.push(ValidationFailure::issue(
            "response",
            "must contain exactly one of 'literal', 'sequence', or 'generator'",
        ));
        return;
    }

    match kinds[0] {
        "sequence" => match obj.get("sequence").and_then(Value::as_array) {
            Some(payloads) if !payloads.is_empty() => {}
            _ => errors.push(ValidationFailure::issue(
                "response.sequence",
                "must be a non-empty array of payloads",
            )),
        },
        "generator" => {
            let script = obj
                .get("generator")
                .and_then(|g| g.get("script"))
                .and_then(Value::as_str);
            match script {
                Some(code) if !code.trim().is_empty() => {
                    if let Err(e) = GeneratorScript::compile(code) {
                        errors.push(ValidationFailure::issue(
                            "response.generator.script",
                            e.to_string(),
                        ));
                    }
                }
                _ => errors.push(ValidationFailure::issue(
                    "response.generator.script",
                    "required and must be a non-empty string",
                )),
            }
        }
        _ => {
            if !obj.get("literal").is_some_and(Value::is_object) {
                errors.push(ValidationFailure::issue(
                    "response.literal",
                    "must be an object",
                ));
            }
        }
    }
}

fn validate_delay(delay: &Value, errors: &mut Vec<ErrorDetail>) {
    let valid = match delay {
        Value::Number(n) => n.as_u64().is_some(),
        Value::Object(obj) => {
            let min = obj.get("min").and_then(Value::as_u64);
            let max = obj.get("max").and_then(Value::as_u64);
            matches!((min, max), (Some(min), Some(max)) if min <= max)
        }
        _ => false,
    };
    if !valid {
        errors.push(ValidationFailure::issue(
            "delay",
            "must be milliseconds or { min, max } with min <= max",
        ));
    }
}
