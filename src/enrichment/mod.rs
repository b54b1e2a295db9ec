//! Enrichment Pipeline
//!
//! Receives raw events from the hub session, validates and normalizes them,
//! attaches weather/occupancy context and time-in-previous-state, and hands
//! one enriched event per accepted raw event to the time-series writer.
//!
//! ## Architecture
//! - `normalize`: per-event validation, coercion, unit canonicalization
//! - `units`: unit alias table
//! - `quality`: validation accounting and health rating
//! - `pipeline`: the long-lived pipeline task and its bounded inbox

pub mod normalize;
pub mod units;
pub mod quality;
pub mod pipeline;

pub use normalize::{ErrorClass, Normalizer, ValidationResult};
pub use pipeline::{EnrichmentPipeline, EventInbox, PipelineStats};
pub use quality::{HealthRating, QualityCollector, QualityReader, QualitySnapshot};
