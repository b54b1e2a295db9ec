//! Hestia: Home Automation Telemetry & Intelligence
//!
//! Ingestion-to-intelligence pipeline for a smart-home hub:
//!
//! - **Hub Session Manager**: persistent authenticated WebSocket session
//!   with failover, event subscription, and discovery
//! - **Enrichment Pipeline**: per-event validation, normalization,
//!   weather/occupancy enrichment, schema-stable time-series persistence
//! - **Pattern Detection Engine**: batch analysis producing typed pattern
//!   records with confidence scores
//! - **Suggestion & Test Loop**: description-first suggestions, safety
//!   validation, and round-trip test-by-creation against the live hub

pub mod config;
pub mod types;
pub mod context;
pub mod capabilities;
pub mod hub;
pub mod enrichment;
pub mod timeseries;
pub mod patterns;
pub mod suggestions;
pub mod llm;
pub mod safety;
pub mod harness;
pub mod scheduler;
pub mod storage;
pub mod api;

// Re-export the pipeline currency types
pub use types::{
    EnrichedEvent, NormalizedEvent, Pattern, PatternType, RawEvent, SafetyLevel, SafetyReport,
    StateValue, Suggestion, SuggestionStatus,
};

// Re-export the component entry points
pub use capabilities::CapabilityStore;
pub use enrichment::{EnrichmentPipeline, EventInbox};
pub use harness::TestHarness;
pub use hub::{HubRestClient, HubSession};
pub use safety::SafetyValidator;
pub use suggestions::SuggestionGenerator;
pub use timeseries::TimeseriesWriter;
