//! The dispatch front end: receives every inbound request and routes it to
//! the registration API (management prefix) or the matching pipeline.

mod handler;
mod server;

pub use handler::{handle_request, DispatchContext};
pub use server::DispatchServer;
