//! Stub registration and matching.
//!
//! ## Module Structure
//!
//! - `types`: definitions, criteria, response specs, store errors
//! - `store`: the registration store (CRUD over registered definitions)
//! - `state`: per-stub invocation counters and lifecycle
//! - `matcher`: best-match selection for inbound requests

mod matcher;
mod state;
mod store;
mod types;


pub use matcher::{body_matches, definition_matches, find_best_match, parse_query_string, RequestView};
pub use state::{CallTracker, ConsumeOutcome, InvocationState};
pub use store::StubStore;
pub use types::{
    BodyMatchMode, DelaySpec, GeneratorSpec, MatchCriteria, ResponsePayload, ResponseSpec,
    StoreError, StubDefinition, StubId, StubSpec, TimesAllowed,
};
