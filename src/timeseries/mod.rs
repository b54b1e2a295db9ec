//! Time-series persistence
//!
//! - `point`: schema-stable point construction and line-protocol rendering
//! - `client`: HTTP write/query boundary to the external store
//! - `writer`: bounded batching with backoff and spill-on-outage
//! - `spill`: durable local queue absorbing writes during outages

pub mod point;
pub mod client;
pub mod writer;
pub mod spill;

pub use client::{QueryError, TimeseriesClient, WriteError};
pub use point::{FieldValue, Point, SchemaViolation};
pub use spill::SpillQueue;
pub use writer::{TimeseriesWriter, WriterMetrics, WriterSnapshot};
