//! Response resolution: turning a matched definition into a concrete
//! response.
//!
//! Literal payloads pass through unchanged, sequences are indexed by the
//! stub's sequence position, generators are evaluated against the request.
//! The optional artificial delay is an async sleep on the handling task, so
//! one slow stub never stalls unrelated in-flight requests.

use super::script::{GeneratorError, GeneratorScript};
use crate::registry::{InvocationState, RequestView, ResponsePayload, ResponseSpec, StubDefinition, StubId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

/// A fully-resolved response ready to be written to the wire.
#[derive(Debug, Clone)]
pub struct ResolvedResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Resolves matched definitions into responses. Holds the cache of compiled
/// generator scripts, keyed by stub id and maintained by the engine across
/// register/update/unregister.
pub struct ResponseResolver {
    scripts: RwLock<HashMap<StubId, GeneratorScript>>,
}

impl Default for ResponseResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseResolver {
    pub fn new() -> Self {
        Self {
            scripts: RwLock::new(HashMap::new()),
        }
    }

    pub fn install_script(&self, id: StubId, script: GeneratorScript) {
        self.scripts.write().insert(id, script);
    }

    pub fn remove_script(&self, id: StubId) {
        self.scripts.write().remove(&id);
    }

    pub fn clear_scripts(&self) {
        self.scripts.write().clear();
    }

    /// Produce the response for a recorded call.
    ///
    /// `state` is the snapshot returned by the call tracker for this call;
    /// its `sequence_index` selects the payload for sequence responses and is
    /// visible to generator scripts.
    pub async fn resolve(
        &self,
        definition: &StubDefinition,
        request: &RequestView,
        state: &InvocationState,
    ) -> Result<ResolvedResponse, GeneratorError> {
        if let Some(delay) = &definition.delay {
            tokio::time::sleep(Duration::from_millis(delay.duration_ms())).await;
        }

        let payload = match &definition.response {
            ResponseSpec::Literal(payload) => payload.clone(),
            ResponseSpec::Sequence(payloads) => {
                // The tracker already wraps the index; mod again so a stale
                // state from before an update can never index out of bounds.
                let index = (state.sequence_index as usize) % payloads.len().max(1);
                payloads
                    .get(index)
                    .cloned()
                    .ok_or_else(|| GeneratorError::BadResult("empty response sequence".to_string()))?
            }
            ResponseSpec::Generator(spec) => {
                let script = self.scripts.read().get(&definition.id).cloned();
                let script = match script {
                    Some(script) => script,
                    // Seed path for scripts registered out of band: compile
                    // lazily and cache.
                    None => {
                        let compiled = GeneratorScript::compile(&spec.script)?;
                        self.scripts
                            .write()
                            .insert(definition.id, compiled.clone());
                        compiled
                    }
                };
                script.evaluate(request, state)?
            }
        };

        Ok(render_payload(payload))
    }
}

/// Flatten a payload into wire form. JSON bodies are serialized and get a
/// `Content-Type: application/json` header unless one was set explicitly.
fn render_payload(payload: ResponsePayload) -> ResolvedResponse {
    let mut headers = payload.headers;

    let body = payload
        .body
        .map(|b| {
            if let serde_json::Value::String(s) = b {
                s
            } else {
                if !headers
                    .keys()
                    .any(|k| k.eq_ignore_ascii_case("content-type"))
                {
                    headers.insert("Content-Type".to_string(), "application/json".to_string());
                }
                serde_json::to_string(&b).unwrap_or_default()
            }
        })
        .unwrap_or_default();

    ResolvedResponse {
        status: payload.status,
        headers,
        body,
    }
}
