//! DTOs and response helpers for the registration API.

use crate::registry::{InvocationState, StubDefinition};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;

/// Structured error body: `{ "errors": [ { "code", "message" } ] }`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub errors: Vec<ErrorDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            field: None,
            message: message.into(),
        }
    }
}

/// Invocation state as reported by describe/list.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateView {
    pub call_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    pub sequence_index: u64,
    pub exhausted: bool,
}

impl From<InvocationState> for StateView {
    fn from(state: InvocationState) -> Self {
        Self {
            call_count: state.call_count,
            remaining: state.remaining,
            sequence_index: state.sequence_index,
            exhausted: state.is_exhausted(),
        }
    }
}

/// A registered stub with its invocation state.
#[derive(Debug, Serialize)]
pub struct StubView<'a> {
    #[serde(flatten)]
    pub definition: &'a StubDefinition,
    pub state: StateView,
}

impl<'a> StubView<'a> {
    pub fn new(definition: &'a StubDefinition, state: InvocationState) -> Self {
        Self {
            definition,
            state: state.into(),
        }
    }
}

// =============================================================================
// Response helper functions
// =============================================================================

/// Create a JSON response.
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string_pretty(body).unwrap_or_else(|_| "{}".to_string());
    build_response_with_headers(status, [("Content-Type", "application/json")], json)
}

/// Build an HTTP response with the given status and body. Builder failure is
/// impossible with a valid status, but degrade to a bare 500 anyway instead
/// of panicking on a request path.
pub fn build_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("Internal Server Error"))))
}

pub fn build_response_with_headers(
    status: StatusCode,
    headers: impl IntoIterator<Item = (impl AsRef<str>, impl AsRef<str>)>,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(status);
    for (key, value) in headers {
        builder = builder.header(key.as_ref(), value.as_ref());
    }
    builder
        .body(Full::new(body.into()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("Internal Server Error"))))
}

/// Create a single-detail error response.
pub fn error_response(status: StatusCode, code: &str, message: &str) -> Response<Full<Bytes>> {
    let error = ErrorResponse {
        errors: vec![ErrorDetail::new(code, message)],
    };
    json_response(status, &error)
}

pub fn not_found() -> Response<Full<Bytes>> {
    error_response(StatusCode::NOT_FOUND, "not_found", "Not Found")
}

pub fn stub_not_found(id: u64) -> Response<Full<Bytes>> {
    error_response(
        StatusCode::NOT_FOUND,
        "not_found",
        &format!("no stub registered with id {id}"),
    )
}

/// Collect a request body into bytes.
pub async fn collect_body(req: Request<Incoming>) -> Result<Bytes, String> {
    use http_body_util::BodyExt;
    req.collect()
        .await
        .map(|c| c.to_bytes())
        .map_err(|e| format!("Failed to read request body: {e}"))
}
