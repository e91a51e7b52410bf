//! The stub engine: registration store, call tracker, and response resolver
//! wired together behind one handle.
//!
//! Every stub-lifecycle operation goes through here so the store and the
//! tracker never drift apart: a definition and its invocation state are
//! created, replaced, and removed together.

use crate::config::MatchingConfig;
use crate::registry::{
    find_best_match, CallTracker, ConsumeOutcome, InvocationState, RequestView, ResponseSpec,
    StoreError, StubDefinition, StubId, StubSpec, StubStore,
};
use crate::response::{GeneratorError, GeneratorScript, ResponseResolver};
use std::sync::Arc;
use tracing::warn;

/// Error type for registration operations.
#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Generator(#[from] GeneratorError),
}

pub struct StubEngine {
    store: StubStore,
    tracker: CallTracker,
    resolver: ResponseResolver,
    wildcard_paths: bool,
}

impl StubEngine {
    pub fn new(matching: &MatchingConfig) -> Self {
        Self {
            store: StubStore::new(matching.reject_duplicate_intent),
            tracker: CallTracker::new(),
            resolver: ResponseResolver::new(),
            wildcard_paths: matching.wildcard_paths,
        }
    }

    pub fn resolver(&self) -> &ResponseResolver {
        &self.resolver
    }

    /// Register a stub: generator scripts compile first (so a broken script
    /// never lands in the store), then the definition and a fresh invocation
    /// state are created.
    pub fn register(&self, spec: StubSpec) -> Result<Arc<StubDefinition>, RegisterError> {
        let script = self.compile_generator(&spec)?;
        let definition = self
            .store
            .add(spec, |id| self.tracker.is_armed(id))?;
        self.tracker.insert(
            definition.id,
            definition.times_allowed,
            definition.response.cycle_len(),
        );
        if let Some(script) = script {
            self.resolver.install_script(definition.id, script);
        }
        Ok(definition)
    }

    /// Replace a stub in place. The invocation state is reset and the stub
    /// becomes "most recently registered" for tie-breaking.
    pub fn update(
        &self,
        id: StubId,
        spec: StubSpec,
    ) -> Result<Arc<StubDefinition>, RegisterError> {
        let script = self.compile_generator(&spec)?;
        let definition = self
            .store
            .update(id, spec, |other| self.tracker.is_armed(other))?;
        self.tracker.insert(
            definition.id,
            definition.times_allowed,
            definition.response.cycle_len(),
        );
        match script {
            Some(script) => self.resolver.install_script(id, script),
            None => self.resolver.remove_script(id),
        }
        Ok(definition)
    }

    pub fn unregister(&self, id: StubId) -> Result<Arc<StubDefinition>, StoreError> {
        let removed = self.store.remove(id)?;
        self.tracker.remove(id);
        self.resolver.remove_script(id);
        Ok(removed)
    }

    pub fn describe(&self, id: StubId) -> Option<(Arc<StubDefinition>, InvocationState)> {
        let definition = self.store.get(id)?;
        let state = self.tracker.status(id)?;
        Some((definition, state))
    }

    /// All registered stubs with their invocation state, in registration
    /// order.
    pub fn list(&self) -> Vec<(Arc<StubDefinition>, InvocationState)> {
        self.store
            .snapshot()
            .into_iter()
            .filter_map(|definition| {
                let state = self.tracker.status(definition.id)?;
                Some((definition, state))
            })
            .collect()
    }

    /// Re-arm a stub: counters reset, exhaustion cleared.
    pub fn reset(&self, id: StubId) -> Result<(), StoreError> {
        if self.store.get(id).is_none() || !self.tracker.reset(id) {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// Unregister everything; returns how many stubs were removed.
    pub fn clear(&self) -> usize {
        let removed = self.store.clear();
        self.tracker.clear();
        self.resolver.clear_scripts();
        removed.len()
    }

    /// Dry match: select the best armed candidate without recording a call.
    pub fn probe(&self, request: &RequestView) -> Option<Arc<StubDefinition>> {
        find_best_match(&self.store.snapshot(), request, self.wildcard_paths, |id| {
            self.tracker.is_armed(id)
        })
    }

    /// Match a request and record the call atomically.
    ///
    /// The armed filter during matching is advisory; capacity is consumed by
    /// `try_consume` under the per-id lock. When a race loses (the candidate
    /// exhausted between the scan and the consume), the match is retried
    /// against a fresh snapshot, where the exhausted stub no longer passes
    /// the filter. This is what makes N concurrent requests against a
    /// `timesAllowed = N` stub succeed exactly N times.
    pub fn claim_match(
        &self,
        request: &RequestView,
    ) -> Option<(Arc<StubDefinition>, InvocationState)> {
        loop {
            let snapshot = self.store.snapshot();
            let candidate =
                find_best_match(&snapshot, request, self.wildcard_paths, |id| {
                    self.tracker.is_armed(id)
                })?;
            match self.tracker.try_consume(candidate.id) {
                ConsumeOutcome::Consumed(state) => return Some((candidate, state)),
                ConsumeOutcome::Exhausted | ConsumeOutcome::Missing => {
                    // Lost the race for the last slot (or the stub was just
                    // unregistered); rescan.
                    continue;
                }
            }
        }
    }

    fn compile_generator(&self, spec: &StubSpec) -> Result<Option<GeneratorScript>, GeneratorError> {
        match &spec.response {
            ResponseSpec::Generator(generator) => {
                let compiled = GeneratorScript::compile(&generator.script).map_err(|e| {
                    warn!(error = %e, "rejecting stub with uncompilable generator script");
                    e
                })?;
                Ok(Some(compiled))
            }
            _ => Ok(None),
        }
    }
}
