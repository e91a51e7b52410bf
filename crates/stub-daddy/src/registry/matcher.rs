//! Best-match selection over the registration store.
//!
//! Filters a store snapshot down to definitions whose method, path, and
//! criteria are satisfied by the incoming request and which are still armed,
//! then picks the winner by `(specificity, registration sequence)`. Matching
//! never mutates invocation state.

use super::types::{BodyMatchMode, MatchCriteria, StubDefinition, StubId};
use std::collections::HashMap;
use std::sync::Arc;

/// The parts of an inbound request the matcher and generators care about.
#[derive(Debug, Clone)]
pub struct RequestView {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    /// The body parsed as JSON, when it parses.
    pub body_json: Option<serde_json::Value>,
}

impl RequestView {
    pub fn new(
        method: &str,
        path: &str,
        query: Option<&str>,
        headers: HashMap<String, String>,
        body: Option<String>,
    ) -> Self {
        let body_json = body
            .as_deref()
            .and_then(|b| serde_json::from_str(b).ok());
        RequestView {
            method: method.to_uppercase(),
            path: path.to_string(),
            query: query.map_or_else(HashMap::new, parse_query_string),
            headers,
            body,
            body_json,
        }
    }
}

/// Parse a query string, URL-decoding both keys and values.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (
                urlencoding::decode(key).unwrap_or_default().into_owned(),
                urlencoding::decode(value).unwrap_or_default().into_owned(),
            ),
            None => (
                urlencoding::decode(pair).unwrap_or_default().into_owned(),
                String::new(),
            ),
        })
        .collect()
}

/// Select the best armed match for a request, or `None`.
pub fn find_best_match<F>(
    stubs: &[Arc<StubDefinition>],
    request: &RequestView,
    wildcard_paths: bool,
    is_armed: F,
) -> Option<Arc<StubDefinition>>
where
    F: Fn(StubId) -> bool,
{
    stubs
        .iter()
        .filter(|stub| definition_matches(stub, request, wildcard_paths))
        .filter(|stub| is_armed(stub.id))
        .max_by_key(|stub| (stub.specificity, stub.seq))
        .cloned()
}

/// Check method, path, and criteria; ignores invocation state.
pub fn definition_matches(
    stub: &StubDefinition,
    request: &RequestView,
    wildcard_paths: bool,
) -> bool {
    if stub.method != request.method {
        return false;
    }
    if !path_matches(&stub.path, &request.path, wildcard_paths) {
        return false;
    }
    match &stub.match_criteria {
        Some(criteria) => criteria_satisfied(criteria, request),
        None => true,
    }
}

fn path_matches(pattern: &str, path: &str, wildcard_paths: bool) -> bool {
    if wildcard_paths {
        if let Some(prefix) = pattern.strip_suffix("/*") {
            return path == prefix || path.starts_with(&format!("{prefix}/"));
        }
    }
    pattern == path
}

fn criteria_satisfied(criteria: &MatchCriteria, request: &RequestView) -> bool {
    if let Some(expected_query) = &criteria.query {
        for (key, expected) in expected_query {
            match request.query.get(key) {
                Some(actual) if actual == expected => {}
                _ => return false,
            }
        }
    }

    if let Some(expected_body) = &criteria.body {
        let satisfied = match &request.body_json {
            Some(actual) => body_matches(expected_body, actual, criteria.body_match),
            // A non-JSON body can still satisfy a plain string criterion.
            None => match (expected_body, &request.body) {
                (serde_json::Value::String(expected), Some(actual)) => expected == actual,
                _ => false,
            },
        };
        if !satisfied {
            return false;
        }
    }

    true
}

/// Deep body comparison. Partial mode requires every key/value pair in
/// `expected` to be present and equal in `actual`, recursing into nested
/// objects; extra keys in `actual` are ignored. Exact mode additionally
/// rejects extra keys at every level. Arrays and scalars compare by equality
/// in both modes.
pub fn body_matches(
    expected: &serde_json::Value,
    actual: &serde_json::Value,
    mode: BodyMatchMode,
) -> bool {
    match (expected, actual) {
        (serde_json::Value::Object(expected_map), serde_json::Value::Object(actual_map)) => {
            if mode == BodyMatchMode::Exact && expected_map.len() != actual_map.len() {
                return false;
            }
            expected_map.iter().all(|(key, expected_value)| {
                actual_map
                    .get(key)
                    .is_some_and(|actual_value| body_matches(expected_value, actual_value, mode))
            })
        }
        (expected, actual) => expected == actual,
    }
}
