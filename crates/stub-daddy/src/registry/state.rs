//! Per-stub invocation state: call counters and lifecycle.
//!
//! Each registered stub owns one [`InvocationState`], created alongside the
//! definition and mutated only here. `try_consume` is serialized per id with
//! a per-entry mutex; operations on different ids never contend. All lock
//! sections are synchronous and never held across an await, so a counter
//! update always completes atomically before the transport can observe a
//! cancellation.

use super::types::{StubId, TimesAllowed};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Invocation counters for one stub.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationState {
    /// Incremented exactly once per successful match.
    pub call_count: u64,
    /// Matches left before exhaustion; absent for unlimited stubs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    /// Index of the next payload for sequence responses (wrapping modulo the
    /// sequence length); a raw per-stub ordinal for other response kinds.
    pub sequence_index: u64,
}

impl InvocationState {
    pub fn new(times_allowed: TimesAllowed) -> Self {
        InvocationState {
            call_count: 0,
            remaining: match times_allowed {
                TimesAllowed::Unlimited => None,
                TimesAllowed::Finite(n) => Some(n),
            },
            sequence_index: 0,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

/// Outcome of a compare-and-consume attempt.
#[derive(Debug)]
pub enum ConsumeOutcome {
    /// The call was recorded. The snapshot carries the post-increment
    /// `call_count`, the post-decrement `remaining`, and the `sequence_index`
    /// to use for this call (pre-advance).
    Consumed(InvocationState),
    /// The stub was exhausted; nothing was recorded.
    Exhausted,
    /// No state is tracked for this id (unregistered concurrently).
    Missing,
}

struct TrackedState {
    times_allowed: TimesAllowed,
    cycle_len: Option<u32>,
    state: Mutex<InvocationState>,
}

/// Tracks invocation state for all registered stubs.
pub struct CallTracker {
    entries: RwLock<HashMap<StubId, Arc<TrackedState>>>,
}

impl Default for CallTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CallTracker {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Create (or replace, on update) the state entry for a stub.
    pub fn insert(&self, id: StubId, times_allowed: TimesAllowed, cycle_len: Option<u32>) {
        let tracked = Arc::new(TrackedState {
            times_allowed,
            cycle_len,
            state: Mutex::new(InvocationState::new(times_allowed)),
        });
        self.entries.write().insert(id, tracked);
    }

    pub fn remove(&self, id: StubId) {
        self.entries.write().remove(&id);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Read-only status query; never mutates.
    pub fn status(&self, id: StubId) -> Option<InvocationState> {
        let entry = self.entries.read().get(&id).cloned()?;
        let state = *entry.state.lock();
        Some(state)
    }

    /// Whether the stub can still be matched. Missing entries count as
    /// unarmed. This is advisory only: the authoritative check happens inside
    /// [`CallTracker::try_consume`].
    pub fn is_armed(&self, id: StubId) -> bool {
        self.status(id).is_some_and(|s| !s.is_exhausted())
    }

    /// Atomically record a call against the stub if it has capacity left.
    ///
    /// Concurrent calls against the same id serialize on the entry's mutex,
    /// so a finite stub with `timesAllowed = N` yields exactly N consumes no
    /// matter how many requests race.
    pub fn try_consume(&self, id: StubId) -> ConsumeOutcome {
        let Some(entry) = self.entries.read().get(&id).cloned() else {
            return ConsumeOutcome::Missing;
        };

        let mut state = entry.state.lock();
        if state.is_exhausted() {
            return ConsumeOutcome::Exhausted;
        }

        state.call_count += 1;
        if let Some(remaining) = state.remaining.as_mut() {
            *remaining -= 1;
        }
        let snapshot = *state;
        state.sequence_index = match entry.cycle_len {
            Some(len) if len > 0 => (state.sequence_index + 1) % u64::from(len),
            _ => state.sequence_index + 1,
        };
        ConsumeOutcome::Consumed(snapshot)
    }

    /// Re-arm a stub: counters back to zero, `remaining` restored from the
    /// registered `timesAllowed`.
    pub fn reset(&self, id: StubId) -> bool {
        let Some(entry) = self.entries.read().get(&id).cloned() else {
            return false;
        };
        *entry.state.lock() = InvocationState::new(entry.times_allowed);
        true
    }
}
