//! Shared data structures for the home-automation telemetry pipeline
//!
//! This module defines the core types flowing through the system:
//! - Hub frame vocabulary (WebSocket channel) and raw events
//! - NormalizedEvent / EnrichedEvent (the pipeline currency)
//! - Device capabilities parsed from the hub's device-list broadcast
//! - Pattern records mined from event history
//! - Suggestions derived from patterns plus capabilities
//! - Safety validation reports

mod event;
mod frame;
mod capability;
mod pattern;
mod suggestion;
mod context;
mod safety;

pub use event::*;
pub use frame::*;
pub use capability::*;
pub use pattern::*;
pub use suggestion::*;
pub use context::*;
pub use safety::*;
