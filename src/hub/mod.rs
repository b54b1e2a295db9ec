//! Hub connectivity
//!
//! - `session`: the persistent authenticated WebSocket session (state
//!   machine, subscriptions, discovery, watchdog)
//! - `endpoints`: endpoint priority list with flap damping
//! - `rest`: the REST surface used by the test harness and discovery
//!   fallback

pub mod session;
pub mod endpoints;
pub mod rest;

pub use endpoints::EndpointSet;
pub use rest::{HubRestClient, HubRestError};
pub use session::{HubSession, SessionMetrics, SessionSnapshot, SessionState};
