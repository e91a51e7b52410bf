//! Rhai generator engine for computed responses.
//!
//! Generator scripts are compiled to an AST once, at registration time, and
//! evaluated per request with a `request` map and a `state` map in scope.
//! The script returns a map; its `status`, `headers`, and `body` entries
//! become the response payload.

use crate::registry::{InvocationState, RequestView, ResponsePayload};
use rhai::{Dynamic, Engine, Map, Scope, AST};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Error types for generator compilation and evaluation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GeneratorError {
    #[error("failed to compile generator script: {0}")]
    Compile(String),
    #[error("generator script failed: {0}")]
    Runtime(String),
    #[error("generator script returned an invalid result: {0}")]
    BadResult(String),
}

/// A compiled generator script.
#[derive(Clone, Debug)]
pub struct GeneratorScript {
    ast: Arc<AST>,
}

impl GeneratorScript {
    pub fn compile(script: &str) -> Result<Self, GeneratorError> {
        let engine = Engine::new();
        let ast = engine
            .compile(script)
            .map_err(|e| GeneratorError::Compile(e.to_string()))?;
        Ok(Self { ast: Arc::new(ast) })
    }

    /// Evaluate the script against a request and the stub's invocation state.
    pub fn evaluate(
        &self,
        request: &RequestView,
        state: &InvocationState,
    ) -> Result<ResponsePayload, GeneratorError> {
        let engine = Engine::new();
        let mut scope = Scope::new();
        scope.push("request", request_to_map(request));
        scope.push("state", state_to_map(state));

        let result: Dynamic = engine
            .eval_ast_with_scope(&mut scope, self.ast.as_ref())
            .map_err(|e| GeneratorError::Runtime(e.to_string()))?;

        parse_result(result)
    }
}

fn request_to_map(request: &RequestView) -> Map {
    let mut map = Map::new();
    map.insert("method".into(), Dynamic::from(request.method.clone()));
    map.insert("path".into(), Dynamic::from(request.path.clone()));

    let mut query = Map::new();
    for (k, v) in &request.query {
        query.insert(k.clone().into(), Dynamic::from(v.clone()));
    }
    map.insert("query".into(), Dynamic::from(query));

    let mut headers = Map::new();
    for (k, v) in &request.headers {
        headers.insert(k.clone().into(), Dynamic::from(v.clone()));
    }
    map.insert("headers".into(), Dynamic::from(headers));

    let body = request
        .body_json
        .clone()
        .or_else(|| request.body.clone().map(Value::String))
        .unwrap_or(Value::Null);
    map.insert("body".into(), json_to_dynamic(body));

    map
}

fn state_to_map(state: &InvocationState) -> Map {
    let mut map = Map::new();
    map.insert("callCount".into(), Dynamic::from(state.call_count as i64));
    map.insert(
        "sequenceIndex".into(),
        Dynamic::from(state.sequence_index as i64),
    );
    map
}

fn parse_result(result: Dynamic) -> Result<ResponsePayload, GeneratorError> {
    let map = result
        .try_cast::<Map>()
        .ok_or_else(|| GeneratorError::BadResult("script must return a map".to_string()))?;

    let status = match map.get("status") {
        Some(v) => {
            let n = v
                .as_int()
                .map_err(|_| GeneratorError::BadResult("'status' must be an integer".to_string()))?;
            u16::try_from(n)
                .map_err(|_| GeneratorError::BadResult(format!("invalid status code {n}")))?
        }
        None => 200,
    };

    let mut headers = HashMap::new();
    if let Some(value) = map.get("headers") {
        let header_map = value.clone().try_cast::<Map>().ok_or_else(|| {
            GeneratorError::BadResult("'headers' must be a map of strings".to_string())
        })?;
        for (key, value) in header_map {
            let value = value
                .try_cast::<String>()
                .ok_or_else(|| GeneratorError::BadResult(format!("header '{key}' is not a string")))?;
            headers.insert(key.to_string(), value);
        }
    }

    let body = map.get("body").map(|v| dynamic_to_json(v.clone()));

    Ok(ResponsePayload {
        status,
        headers,
        body,
    })
}

fn json_to_dynamic(value: Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        Value::String(s) => Dynamic::from(s),
        Value::Array(arr) => {
            let vec: Vec<Dynamic> = arr.into_iter().map(json_to_dynamic).collect();
            Dynamic::from(vec)
        }
        Value::Object(obj) => {
            let mut map = Map::new();
            for (k, v) in obj {
                map.insert(k.into(), json_to_dynamic(v));
            }
            Dynamic::from(map)
        }
    }
}

fn dynamic_to_json(value: Dynamic) -> Value {
    if value.is_unit() {
        Value::Null
    } else if let Ok(b) = value.as_bool() {
        Value::Bool(b)
    } else if let Ok(i) = value.as_int() {
        Value::Number(i.into())
    } else if let Ok(f) = value.as_float() {
        Value::Number(serde_json::Number::from_f64(f).unwrap_or(0.into()))
    } else if let Some(s) = value.clone().try_cast::<String>() {
        Value::String(s)
    } else if let Some(arr) = value.clone().try_cast::<Vec<Dynamic>>() {
        Value::Array(arr.into_iter().map(dynamic_to_json).collect())
    } else if let Some(map) = value.clone().try_cast::<Map>() {
        let mut obj = serde_json::Map::new();
        for (k, v) in map {
            obj.insert(k.to_string(), dynamic_to_json(v));
        }
        Value::Object(obj)
    } else {
        Value::String(format!("{value}"))
    }
}
