//! Request handling for the dispatch front end.
//!
//! Management-prefix requests go to the registration API router; everything
//! else runs the data-plane pipeline: match, record the call, resolve the
//! response. Unmatched requests get a deterministic diagnostic error so a
//! missing stub is easy to spot from the system under test.

use crate::api::types::{build_response, json_response};
use crate::api::{route_management, PayloadValidator};
use crate::engine::StubEngine;
use crate::metrics;
use crate::registry::RequestView;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything a request handler needs, shared across connections.
pub struct DispatchContext {
    pub engine: Arc<StubEngine>,
    pub validator: Arc<dyn PayloadValidator>,
    pub management_prefix: String,
}

/// Handle one inbound request, on either plane.
pub async fn handle_request(
    req: Request<Incoming>,
    ctx: Arc<DispatchContext>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();

    if let Some(rest) = strip_management_prefix(&path, &ctx.management_prefix) {
        metrics::record_request("management");
        let rest = rest.to_string();
        return Ok(route_management(
            &rest,
            req,
            Arc::clone(&ctx.engine),
            Arc::clone(&ctx.validator),
        )
        .await);
    }

    metrics::record_request("data");
    Ok(handle_data_plane(req, &ctx).await)
}

/// Match `path` against the management prefix, returning the remainder.
fn strip_management_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if path == prefix {
        return Some("");
    }
    path.strip_prefix(prefix)
        .filter(|rest| rest.starts_with('/'))
}

async fn handle_data_plane(req: Request<Incoming>, ctx: &DispatchContext) -> Response<Full<Bytes>> {
    let method = req.method().to_string();
    let uri = req.uri().clone();
    let headers: HashMap<String, String> = req
        .headers()
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();

    // The body is always collected: it may be needed for criteria matching
    // and for generator scripts.
    let body = match req.into_body().collect().await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            if bytes.is_empty() {
                None
            } else {
                Some(String::from_utf8_lossy(&bytes).to_string())
            }
        }
        Err(_) => None,
    };

    let request = RequestView::new(&method, uri.path(), uri.query(), headers, body);

    // The counter update inside claim_match is synchronous and complete
    // before this function can next be cancelled at an await point.
    let Some((definition, state)) = ctx.engine.claim_match(&request) else {
        // Expected during test development; not a system fault.
        debug!(%method, path = %uri.path(), "no stub matched");
        metrics::record_unmatched(&request.method);
        return unmatched_response(&request.method, uri.path());
    };

    metrics::record_match(&request.method);
    debug!(
        stub_id = definition.id,
        %method,
        path = %uri.path(),
        call_count = state.call_count,
        "stub matched"
    );

    match ctx.engine.resolver().resolve(&definition, &request, &state).await {
        Ok(resolved) => {
            let mut response = Response::builder().status(
                StatusCode::from_u16(resolved.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            );
            for (key, value) in &resolved.headers {
                response = response.header(key, value);
            }
            response = response.header("x-stub-daddy-id", definition.id.to_string());
            response
                .body(Full::new(Bytes::from(resolved.body)))
                .unwrap_or_else(|_| {
                    build_response(StatusCode::INTERNAL_SERVER_ERROR, "Response build error")
                })
        }
        Err(e) => {
            // The call was made: the stub's state stays advanced even though
            // the scripted response failed.
            warn!(stub_id = definition.id, error = %e, "generator failed");
            metrics::record_generator_failure();
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &serde_json::json!({
                    "errors": [{ "code": "generator_error", "message": e.to_string() }]
                }),
            )
        }
    }
}

/// Deterministic diagnostic for requests no stub matched.
fn unmatched_response(method: &str, path: &str) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({
            "errors": [{
                "code": "unmatched_request",
                "message": format!("no stub matched {method} {path}"),
            }],
            "method": method,
            "path": path,
        }),
    )
}
