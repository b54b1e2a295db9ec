//! Validation quality accounting
//!
//! The collector is owned by the pipeline task (single aggregator, no
//! locks on the write path) and periodically publishes an immutable
//! snapshot through `arc-swap` for the observability surface.

use arc_swap::ArcSwap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::normalize::{ErrorClass, ValidationResult};

/// Health rating derived from the valid-event rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthRating {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Per-domain counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DomainStats {
    pub total: u64,
    pub valid: u64,
    pub invalid: u64,
    pub warnings: u64,
}

/// Immutable snapshot published for readers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QualitySnapshot {
    pub total_events: u64,
    pub valid_events: u64,
    pub invalid_events: u64,
    pub dropped_events: u64,
    pub errors_by_class: HashMap<String, u64>,
    pub warnings_by_class: HashMap<String, u64>,
    pub by_domain: HashMap<String, DomainStats>,
    pub avg_validation_time_ms: f64,
}

impl QualitySnapshot {
    pub fn valid_rate(&self) -> f64 {
        if self.total_events == 0 {
            return 1.0;
        }
        self.valid_events as f64 / self.total_events as f64
    }

    /// ≥95% healthy, ≥90% degraded, else unhealthy.
    pub fn health(&self) -> HealthRating {
        let rate = self.valid_rate();
        if rate >= 0.95 {
            HealthRating::Healthy
        } else if rate >= 0.90 {
            HealthRating::Degraded
        } else {
            HealthRating::Unhealthy
        }
    }
}

/// Single-owner collector with a published snapshot.
pub struct QualityCollector {
    current: QualitySnapshot,
    total_validation_time_ms: f64,
    published: Arc<ArcSwap<QualitySnapshot>>,
}

impl Default for QualityCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl QualityCollector {
    pub fn new() -> Self {
        Self {
            current: QualitySnapshot::default(),
            total_validation_time_ms: 0.0,
            published: Arc::new(ArcSwap::from_pointee(QualitySnapshot::default())),
        }
    }

    /// Handle readers can poll without touching the collector.
    pub fn reader(&self) -> QualityReader {
        QualityReader {
            published: Arc::clone(&self.published),
        }
    }

    /// Fold one validation result into the counters.
    pub fn record(&mut self, result: &ValidationResult) {
        self.current.total_events += 1;
        self.total_validation_time_ms += result.validation_time_ms;

        let domain = self.current.by_domain.entry(result.domain.clone()).or_default();
        domain.total += 1;

        if result.is_valid {
            self.current.valid_events += 1;
            domain.valid += 1;
        } else {
            self.current.invalid_events += 1;
            domain.invalid += 1;
        }
        domain.warnings += result.warnings.len() as u64;

        for error in &result.errors {
            *self
                .current
                .errors_by_class
                .entry(class_key(error.class))
                .or_insert(0) += 1;
        }
        for warning in &result.warnings {
            *self
                .current
                .warnings_by_class
                .entry(class_key(warning.class))
                .or_insert(0) += 1;
        }
    }

    /// Count an event dropped by back-pressure (never validated).
    pub fn record_dropped(&mut self, count: u64) {
        self.current.dropped_events += count;
    }

    /// Publish the current counters for readers. Called by the pipeline on
    /// a coarse cadence (every N events), not per event.
    pub fn publish(&mut self) {
        let mut snapshot = self.current.clone();
        snapshot.avg_validation_time_ms = if snapshot.total_events > 0 {
            self.total_validation_time_ms / snapshot.total_events as f64
        } else {
            0.0
        };
        self.published.store(Arc::new(snapshot));
    }

    pub fn snapshot(&self) -> QualitySnapshot {
        self.current.clone()
    }
}

/// Read handle for the observability surface.
#[derive(Clone)]
pub struct QualityReader {
    published: Arc<ArcSwap<QualitySnapshot>>,
}

impl QualityReader {
    pub fn snapshot(&self) -> Arc<QualitySnapshot> {
        self.published.load_full()
    }
}

fn class_key(class: ErrorClass) -> String {
    class.to_string()
}
