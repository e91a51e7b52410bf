//! The registration store: the set of currently-registered stub definitions.
//!
//! Definitions are held behind a single `RwLock` as `Arc`s so the matcher can
//! take a cheap snapshot and scan without holding the lock. A reader never
//! observes a partially-constructed definition: definitions are built before
//! the write lock is taken and swapped in whole.

use super::types::{StubDefinition, StubId, StubSpec, StoreError};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

pub struct StubStore {
    stubs: RwLock<Vec<Arc<StubDefinition>>>,
    next_id: AtomicU64,
    next_seq: AtomicU64,
    reject_duplicate_intent: bool,
}

impl StubStore {
    pub fn new(reject_duplicate_intent: bool) -> Self {
        Self {
            stubs: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            next_seq: AtomicU64::new(1),
            reject_duplicate_intent,
        }
    }

    /// Register a new definition and return it with its assigned id.
    ///
    /// `is_active` reports whether a given existing stub is still armed; it is
    /// consulted only when the store is configured to reject duplicate-intent
    /// registrations.
    pub fn add<F>(&self, spec: StubSpec, is_active: F) -> Result<Arc<StubDefinition>, StoreError>
    where
        F: Fn(StubId) -> bool,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let definition = Arc::new(StubDefinition::from_spec(spec, id, seq));

        let mut stubs = self.stubs.write();
        if stubs.iter().any(|existing| existing.id == id) {
            return Err(StoreError::IdCollision(id));
        }
        if self.reject_duplicate_intent {
            if let Some(existing) = Self::find_collision(&stubs, &definition, &is_active) {
                return Err(StoreError::DuplicateIntent {
                    method: existing.method.clone(),
                    path: existing.path.clone(),
                });
            }
        }
        stubs.push(Arc::clone(&definition));
        debug!(id, method = %definition.method, path = %definition.path, "stub registered");
        Ok(definition)
    }

    /// Replace an existing definition in place, keeping its id but assigning a
    /// fresh registration sequence so the updated stub wins matcher ties.
    pub fn update<F>(
        &self,
        id: StubId,
        spec: StubSpec,
        is_active: F,
    ) -> Result<Arc<StubDefinition>, StoreError>
    where
        F: Fn(StubId) -> bool,
    {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let definition = Arc::new(StubDefinition::from_spec(spec, id, seq));

        let mut stubs = self.stubs.write();
        let index = stubs
            .iter()
            .position(|existing| existing.id == id)
            .ok_or(StoreError::NotFound(id))?;
        if self.reject_duplicate_intent {
            let others = stubs
                .iter()
                .filter(|existing| existing.id != id)
                .cloned()
                .collect::<Vec<_>>();
            if let Some(existing) = Self::find_collision(&others, &definition, &is_active) {
                return Err(StoreError::DuplicateIntent {
                    method: existing.method.clone(),
                    path: existing.path.clone(),
                });
            }
        }
        stubs[index] = Arc::clone(&definition);
        debug!(id, "stub updated");
        Ok(definition)
    }

    pub fn remove(&self, id: StubId) -> Result<Arc<StubDefinition>, StoreError> {
        let mut stubs = self.stubs.write();
        let index = stubs
            .iter()
            .position(|existing| existing.id == id)
            .ok_or(StoreError::NotFound(id))?;
        let removed = stubs.remove(index);
        debug!(id, "stub unregistered");
        Ok(removed)
    }

    pub fn get(&self, id: StubId) -> Option<Arc<StubDefinition>> {
        self.stubs.read().iter().find(|s| s.id == id).cloned()
    }

    /// A point-in-time snapshot of all definitions, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<StubDefinition>> {
        self.stubs.read().clone()
    }

    /// Remove every definition, returning the removed set.
    pub fn clear(&self) -> Vec<Arc<StubDefinition>> {
        std::mem::take(&mut *self.stubs.write())
    }

    pub fn len(&self) -> usize {
        self.stubs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.read().is_empty()
    }

    /// Two definitions collide when they share method, path, and criteria
    /// specificity while the existing one is still armed.
    fn find_collision<'a, F>(
        stubs: &'a [Arc<StubDefinition>],
        candidate: &StubDefinition,
        is_active: &F,
    ) -> Option<&'a Arc<StubDefinition>>
    where
        F: Fn(StubId) -> bool,
    {
        stubs.iter().find(|existing| {
            existing.method == candidate.method
                && existing.path == candidate.path
                && existing.specificity == candidate.specificity
                && is_active(existing.id)
        })
    }
}
