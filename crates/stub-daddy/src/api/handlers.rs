//! Registration API handlers.

use super::types::{
    collect_body, error_response, json_response, stub_not_found, ErrorResponse, StubView,
};
use super::validation::PayloadValidator;
use crate::engine::{RegisterError, StubEngine};
use crate::metrics;
use crate::registry::{InvocationState, StoreError, StubId, StubSpec};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use tracing::{error, info};

/// POST {prefix} - register a stub.
pub async fn handle_register(
    req: Request<Incoming>,
    engine: Arc<StubEngine>,
    validator: Arc<dyn PayloadValidator>,
) -> Response<Full<Bytes>> {
    let spec = match parse_payload(req, validator.as_ref()).await {
        Ok(spec) => spec,
        Err(response) => return *response,
    };

    match engine.register(spec) {
        Ok(definition) => {
            info!(id = definition.id, method = %definition.method, path = %definition.path, "registered stub");
            let state = InvocationState::new(definition.times_allowed);
            json_response(StatusCode::CREATED, &StubView::new(&definition, state))
        }
        Err(e) => register_error_response(e),
    }
}

/// PUT/PATCH {prefix}/{id} - update an existing stub.
pub async fn handle_update(
    id: StubId,
    req: Request<Incoming>,
    engine: Arc<StubEngine>,
    validator: Arc<dyn PayloadValidator>,
) -> Response<Full<Bytes>> {
    let spec = match parse_payload(req, validator.as_ref()).await {
        Ok(spec) => spec,
        Err(response) => return *response,
    };

    match engine.update(id, spec) {
        Ok(definition) => {
            info!(id, "updated stub");
            let state = InvocationState::new(definition.times_allowed);
            json_response(StatusCode::OK, &StubView::new(&definition, state))
        }
        Err(RegisterError::Store(StoreError::NotFound(_))) => stub_not_found(id),
        Err(e) => register_error_response(e),
    }
}

/// DELETE {prefix}/{id} - unregister a stub.
pub async fn handle_unregister(id: StubId, engine: Arc<StubEngine>) -> Response<Full<Bytes>> {
    match engine.unregister(id) {
        Ok(definition) => {
            info!(id, "unregistered stub");
            json_response(
                StatusCode::OK,
                &serde_json::json!({ "deleted": true, "id": definition.id }),
            )
        }
        Err(StoreError::NotFound(_)) => stub_not_found(id),
        Err(e) => internal_error(&e.to_string()),
    }
}

/// GET {prefix}/{id} - describe a stub and its invocation state.
pub async fn handle_describe(id: StubId, engine: Arc<StubEngine>) -> Response<Full<Bytes>> {
    match engine.describe(id) {
        Some((definition, state)) => {
            json_response(StatusCode::OK, &StubView::new(&definition, state))
        }
        None => stub_not_found(id),
    }
}

/// GET {prefix} - list all stubs with their invocation state.
pub async fn handle_list(engine: Arc<StubEngine>) -> Response<Full<Bytes>> {
    let entries = engine.list();
    let stubs: Vec<serde_json::Value> = entries
        .iter()
        .filter_map(|(definition, state)| {
            serde_json::to_value(StubView::new(definition, *state)).ok()
        })
        .collect();
    json_response(StatusCode::OK, &serde_json::json!({ "stubs": stubs }))
}

/// POST {prefix}/{id}/reset - re-arm a stub.
pub async fn handle_reset(id: StubId, engine: Arc<StubEngine>) -> Response<Full<Bytes>> {
    match engine.reset(id) {
        Ok(()) => handle_describe(id, engine).await,
        Err(StoreError::NotFound(_)) => stub_not_found(id),
        Err(e) => internal_error(&e.to_string()),
    }
}

/// DELETE {prefix} - unregister everything.
pub async fn handle_clear(engine: Arc<StubEngine>) -> Response<Full<Bytes>> {
    let deleted = engine.clear();
    info!(deleted, "cleared all stubs");
    json_response(StatusCode::OK, &serde_json::json!({ "deleted": deleted }))
}

/// GET {prefix}/health - liveness probe.
pub async fn handle_health() -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, &serde_json::json!({ "status": "ok" }))
}

/// GET {prefix}/metrics - Prometheus text exposition.
pub async fn handle_metrics() -> Response<Full<Bytes>> {
    super::types::build_response_with_headers(
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        metrics::collect_metrics(),
    )
}

/// Collect, validate, and deserialize a registration payload. Validation
/// failures short-circuit with the validator's error detail verbatim.
async fn parse_payload(
    req: Request<Incoming>,
    validator: &dyn PayloadValidator,
) -> Result<StubSpec, Box<Response<Full<Bytes>>>> {
    let body = collect_body(req)
        .await
        .map_err(|e| Box::new(error_response(StatusCode::BAD_REQUEST, "bad_request", &e)))?;

    let payload: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        Box::new(error_response(
            StatusCode::BAD_REQUEST,
            "bad_request",
            &format!("invalid JSON payload: {e}"),
        ))
    })?;

    validator.validate(&payload).map_err(|failure| {
        Box::new(json_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            &ErrorResponse {
                errors: failure.errors,
            },
        ))
    })?;

    serde_json::from_value(payload).map_err(|e| {
        Box::new(error_response(
            StatusCode::BAD_REQUEST,
            "bad_request",
            &format!("malformed stub payload: {e}"),
        ))
    })
}

fn register_error_response(error: RegisterError) -> Response<Full<Bytes>> {
    match error {
        RegisterError::Store(StoreError::DuplicateIntent { method, path }) => error_response(
            StatusCode::CONFLICT,
            "duplicate_intent",
            &format!("an active stub for {method} {path} with equal specificity already exists"),
        ),
        RegisterError::Store(StoreError::IdCollision(id)) => {
            // Invariant violation: abort this operation, keep serving.
            error!(id, "stub id collision detected in registration store");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_corruption",
                &format!("stub id {id} already present in the store"),
            )
        }
        RegisterError::Store(StoreError::NotFound(id)) => stub_not_found(id),
        RegisterError::Generator(e) => error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "validation",
            &e.to_string(),
        ),
    }
}

fn internal_error(message: &str) -> Response<Full<Bytes>> {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
}
