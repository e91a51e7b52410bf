//! Type definitions for stub registration and matching.
//!
//! This module contains the structs, enums, and errors shared by the
//! registration store, the call tracker, and the matcher.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque stub identifier, unique for the lifetime of the process.
pub type StubId = u64;

/// How many times a stub may be matched before it is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimesAllowed {
    /// The stub never exhausts.
    Unlimited,
    /// The stub exhausts after this many matches. Zero means the stub is
    /// registered already exhausted (queryable but never matched).
    Finite(u32),
}

impl Default for TimesAllowed {
    fn default() -> Self {
        TimesAllowed::Unlimited
    }
}

impl Serialize for TimesAllowed {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            TimesAllowed::Unlimited => serializer.serialize_str("unlimited"),
            TimesAllowed::Finite(n) => serializer.serialize_u32(*n),
        }
    }
}

impl<'de> Deserialize<'de> for TimesAllowed {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::Number(n) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(TimesAllowed::Finite)
                .ok_or_else(|| D::Error::custom("timesAllowed must be a non-negative integer")),
            serde_json::Value::String(s) if s == "unlimited" => Ok(TimesAllowed::Unlimited),
            other => Err(D::Error::custom(format!(
                "timesAllowed must be a number or \"unlimited\", got {other}"
            ))),
        }
    }
}

/// Body matching mode for [`MatchCriteria`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyMatchMode {
    /// Every key/value pair in the criteria must be present and equal in the
    /// incoming body; extra keys in the incoming body are ignored.
    #[default]
    Partial,
    /// The incoming body must equal the criteria exactly.
    Exact,
}

impl BodyMatchMode {
    pub fn is_partial(&self) -> bool {
        *self == BodyMatchMode::Partial
    }
}

/// Optional constraints a request must satisfy beyond method and path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCriteria {
    /// Required query-string values. Extra query parameters are ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<HashMap<String, String>>,
    /// Required request-body shape (JSON).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "BodyMatchMode::is_partial")]
    pub body_match: BodyMatchMode,
}

impl MatchCriteria {
    /// Specificity score used for matcher tie-breaking: one point per query
    /// constraint, one per body leaf constraint, plus one when the body match
    /// mode is exact. Empty criteria score zero.
    pub fn specificity(&self) -> u32 {
        let query_score = self.query.as_ref().map_or(0, |q| q.len() as u32);
        let body_score = self.body.as_ref().map_or(0, count_leaves);
        let mode_score = match self.body_match {
            BodyMatchMode::Exact if self.body.is_some() => 1,
            _ => 0,
        };
        query_score + body_score + mode_score
    }

    pub fn is_empty(&self) -> bool {
        self.query.is_none() && self.body.is_none()
    }
}

fn count_leaves(value: &serde_json::Value) -> u32 {
    match value {
        serde_json::Value::Object(map) => map.values().map(count_leaves).sum(),
        _ => 1,
    }
}

fn default_status_code() -> u16 {
    200
}

/// A concrete response: status, headers, body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    #[serde(default = "default_status_code")]
    pub status: u16,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl Default for ResponsePayload {
    fn default() -> Self {
        Self {
            status: default_status_code(),
            headers: HashMap::new(),
            body: None,
        }
    }
}

/// A response computed per request by a rhai script.
///
/// The script sees a `request` map (method, path, query, headers, body) and a
/// `state` map (callCount, sequenceIndex) and returns a map with optional
/// `status`, `headers`, and `body` entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorSpec {
    pub script: String,
}

/// What to answer when a stub matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseSpec {
    /// A fixed payload returned unchanged on every match.
    Literal(ResponsePayload),
    /// A list of payloads cycled through across repeated matches.
    Sequence(Vec<ResponsePayload>),
    /// A script evaluated against the matched request.
    Generator(GeneratorSpec),
}

impl ResponseSpec {
    /// Length of the response cycle, when the spec is a sequence.
    pub fn cycle_len(&self) -> Option<u32> {
        match self {
            ResponseSpec::Sequence(payloads) => Some(payloads.len() as u32),
            _ => None,
        }
    }
}

/// Artificial delay applied before a response is returned.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DelaySpec {
    /// Fixed delay in milliseconds.
    Fixed(u64),
    /// Random delay within a range.
    Range { min: u64, max: u64 },
}

impl DelaySpec {
    pub fn duration_ms(&self) -> u64 {
        match self {
            DelaySpec::Fixed(ms) => *ms,
            DelaySpec::Range { min, max } => {
                if max >= min {
                    use rand::Rng;
                    rand::thread_rng().gen_range(*min..=*max)
                } else {
                    *min
                }
            }
        }
    }
}

/// A registration payload as submitted by a test process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StubSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_criteria: Option<MatchCriteria>,
    pub response: ResponseSpec,
    #[serde(default)]
    pub times_allowed: TimesAllowed,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<DelaySpec>,
}

/// A registered stub: a [`StubSpec`] plus the identity and ordering data the
/// store assigns at registration time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StubDefinition {
    pub id: StubId,
    /// Registration sequence number; later registrations win matcher ties.
    #[serde(skip)]
    pub seq: u64,
    /// Precomputed criteria specificity.
    #[serde(skip)]
    pub specificity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_criteria: Option<MatchCriteria>,
    pub response: ResponseSpec,
    pub times_allowed: TimesAllowed,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<DelaySpec>,
    pub registered_at: chrono::DateTime<chrono::Utc>,
}

impl StubDefinition {
    pub fn from_spec(spec: StubSpec, id: StubId, seq: u64) -> Self {
        let specificity = spec
            .match_criteria
            .as_ref()
            .map_or(0, MatchCriteria::specificity);
        StubDefinition {
            id,
            seq,
            specificity,
            name: spec.name,
            // Methods match case-insensitively; normalize once at registration.
            method: spec.method.to_uppercase(),
            path: spec.path,
            match_criteria: spec.match_criteria,
            response: spec.response,
            times_allowed: spec.times_allowed,
            delay: spec.delay,
            registered_at: chrono::Utc::now(),
        }
    }
}

/// Error types for registration-store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no stub registered with id {0}")]
    NotFound(StubId),
    #[error("an active stub for {method} {path} with equal specificity already exists")]
    DuplicateIntent { method: String, path: String },
    /// Invariant violation: the store already holds this id. The offending
    /// operation is aborted; the process keeps serving.
    #[error("stub id {0} already present in the store")]
    IdCollision(StubId),
}
