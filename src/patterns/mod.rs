//! Pattern Detection Engine
//!
//! Batch analysis over historical events producing typed pattern records
//! with confidence scores.
//!
//! ## Architecture
//! - `table`: the time-sorted read model shared by all detectors
//! - `kmeans`: deterministic 1-D clustering for time-of-day grouping
//! - `time_of_day` / `co_occurrence` / `sequence` / `contextual` /
//!   `duration` / `anomaly`: the detector suite
//!
//! Detectors are pure CPU work; the suite runs on the rayon pool sized
//! CPU−1 (minimum 2). Only patterns meeting the persistence floor
//! (confidence ≥ 0.5 and the detector's occurrence minimum) survive.

pub mod table;
pub mod kmeans;
pub mod time_of_day;
pub mod co_occurrence;
pub mod sequence;
pub mod contextual;
pub mod duration;
pub mod anomaly;

use rayon::prelude::*;
use std::time::Instant;
use tracing::info;

use crate::config::DetectorConfig;
use crate::types::{DetectorStats, Pattern};

pub use table::{EventRecord, EventsTable};

/// Confidence floor below which no pattern is persisted, regardless of the
/// detector's own tuning.
pub const PERSISTENCE_CONFIDENCE_FLOOR: f64 = 0.5;

/// Tuning shared across the suite; a renamed view of `DetectorConfig`.
#[derive(Debug, Clone)]
pub struct DetectorTuning {
    pub min_confidence: f64,
    pub min_occurrences: u64,
    pub co_occurrence_window_secs: i64,
    pub co_occurrence_min_support: u64,
    pub co_occurrence_sample_threshold: usize,
    pub sequence_window_secs: i64,
    pub sequence_min_length: usize,
    pub sequence_min_occurrences: u64,
    pub contextual_min_occurrences: u64,
    pub anomaly_z_threshold: f64,
}

impl Default for DetectorTuning {
    fn default() -> Self {
        Self::from(&DetectorConfig::default())
    }
}

impl From<&DetectorConfig> for DetectorTuning {
    fn from(config: &DetectorConfig) -> Self {
        Self {
            min_confidence: config.min_confidence,
            min_occurrences: config.min_occurrences,
            co_occurrence_window_secs: config.co_occurrence_window_secs,
            co_occurrence_min_support: config.co_occurrence_min_support,
            co_occurrence_sample_threshold: config.co_occurrence_sample_threshold,
            sequence_window_secs: config.sequence_window_secs,
            sequence_min_length: config.sequence_min_length,
            sequence_min_occurrences: config.sequence_min_occurrences,
            contextual_min_occurrences: config.contextual_min_occurrences,
            anomaly_z_threshold: config.anomaly_z_threshold,
        }
    }
}

/// Common detector interface: pure batch analysis over the table.
pub trait PatternDetector: Send + Sync {
    fn name(&self) -> &'static str;
    fn detect(&self, table: &EventsTable) -> Vec<Pattern>;
}

/// The full suite in its canonical order.
pub fn detector_suite(tuning: &DetectorTuning) -> Vec<Box<dyn PatternDetector>> {
    vec![
        Box::new(time_of_day::TimeOfDayDetector::new(tuning)),
        Box::new(co_occurrence::CoOccurrenceDetector::new(tuning)),
        Box::new(sequence::SequenceDetector::new(tuning)),
        Box::new(contextual::ContextualDetector::new(tuning)),
        Box::new(duration::DurationDetector::new(tuning)),
        Box::new(anomaly::AnomalyDetector::new(tuning)),
    ]
}

/// Build the dedicated detection pool: CPU cores − 1, minimum 2.
pub fn detection_pool() -> Result<rayon::ThreadPool, rayon::ThreadPoolBuildError> {
    let threads = std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(2)
        .max(2);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("detector-{i}"))
        .build()
}

/// Run every detector over the table on the given pool. Patterns below the
/// persistence floor are discarded here; per-detector stats are returned
/// for the scheduler to log.
pub fn run_suite(
    pool: &rayon::ThreadPool,
    detectors: &[Box<dyn PatternDetector>],
    table: &EventsTable,
) -> (Vec<Pattern>, Vec<DetectorStats>) {
    let results: Vec<(DetectorStats, Vec<Pattern>)> = pool.install(|| {
        detectors
            .par_iter()
            .map(|detector| {
                let started = Instant::now();
                let mut patterns = detector.detect(table);
                patterns.retain(|p| p.confidence >= PERSISTENCE_CONFIDENCE_FLOOR);
                let stats = DetectorStats {
                    detector: detector.name().to_string(),
                    total_patterns: patterns.len(),
                    events_analyzed: table.len(),
                    processing_time_ms: started.elapsed().as_millis() as u64,
                };
                (stats, patterns)
            })
            .collect()
    });

    let mut all_patterns = Vec::new();
    let mut all_stats = Vec::new();
    for (stats, patterns) in results {
        info!(
            detector = %stats.detector,
            patterns = stats.total_patterns,
            time_ms = stats.processing_time_ms,
            "detector run complete"
        );
        all_patterns.extend(patterns);
        all_stats.push(stats);
    }
    (all_patterns, all_stats)
}
