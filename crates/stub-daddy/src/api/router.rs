//! Route dispatch for the registration API.

use super::handlers;
use super::types::not_found;
use super::validation::PayloadValidator;
use crate::engine::StubEngine;
use crate::registry::StubId;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use std::sync::Arc;
use tracing::debug;

/// Parsed management-plane route (path segments after the prefix).
enum ManagementRoute {
    /// POST/GET/DELETE {prefix}
    Collection,
    /// GET/PUT/PATCH/DELETE {prefix}/:id
    Stub(StubId),
    /// POST {prefix}/:id/reset
    Reset(StubId),
    /// GET {prefix}/health
    Health,
    /// GET {prefix}/metrics
    Metrics,
}

impl ManagementRoute {
    fn parse(segments: &[&str]) -> Option<Self> {
        match segments {
            [] => Some(ManagementRoute::Collection),
            ["health"] => Some(ManagementRoute::Health),
            ["metrics"] => Some(ManagementRoute::Metrics),
            [id] => id.parse().ok().map(ManagementRoute::Stub),
            [id, "reset"] => id.parse().ok().map(ManagementRoute::Reset),
            _ => None,
        }
    }
}

/// Route a management-plane request. `path` is the request path with the
/// management prefix already stripped.
pub async fn route_management(
    path: &str,
    req: Request<Incoming>,
    engine: Arc<StubEngine>,
    validator: Arc<dyn PayloadValidator>,
) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    debug!("management API: {} {}", method, path);

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let route = match ManagementRoute::parse(&segments) {
        Some(route) => route,
        None => return not_found(),
    };

    match (&method, route) {
        (&Method::POST, ManagementRoute::Collection) => {
            handlers::handle_register(req, engine, validator).await
        }
        (&Method::GET, ManagementRoute::Collection) => handlers::handle_list(engine).await,
        (&Method::DELETE, ManagementRoute::Collection) => handlers::handle_clear(engine).await,

        (&Method::GET, ManagementRoute::Stub(id)) => handlers::handle_describe(id, engine).await,
        (&Method::PUT, ManagementRoute::Stub(id)) | (&Method::PATCH, ManagementRoute::Stub(id)) => {
            handlers::handle_update(id, req, engine, validator).await
        }
        (&Method::DELETE, ManagementRoute::Stub(id)) => {
            handlers::handle_unregister(id, engine).await
        }

        (&Method::POST, ManagementRoute::Reset(id)) => handlers::handle_reset(id, engine).await,

        (&Method::GET, ManagementRoute::Health) => handlers::handle_health().await,
        (&Method::GET, ManagementRoute::Metrics) => handlers::handle_metrics().await,

        _ => not_found(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_parse() {
        assert!(matches!(
            ManagementRoute::parse(&[]),
            Some(ManagementRoute::Collection)
        ));
        assert!(matches!(
            ManagementRoute::parse(&["12"]),
            Some(ManagementRoute::Stub(12))
        ));
        assert!(matches!(
            ManagementRoute::parse(&["12", "reset"]),
            Some(ManagementRoute::Reset(12))
        ));
        assert!(matches!(
            ManagementRoute::parse(&["health"]),
            Some(ManagementRoute::Health)
        ));
        assert!(matches!(
            ManagementRoute::parse(&["metrics"]),
            Some(ManagementRoute::Metrics)
        ));

        assert!(ManagementRoute::parse(&["nope"]).is_none());
        assert!(ManagementRoute::parse(&["12", "unknown"]).is_none());
        assert!(ManagementRoute::parse(&["12", "reset", "extra"]).is_none());
    }
}
