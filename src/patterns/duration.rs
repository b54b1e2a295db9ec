//! Duration pattern detector
//!
//! Per entity and state value, summarizes how long the entity stays in that
//! state. Consistent durations score high: confidence is one minus the
//! normalized variance (squared coefficient of variation, clamped).

use serde_json::json;
use statrs::statistics::Statistics;
use std::collections::HashMap;

use crate::types::{Pattern, PatternSubject, PatternType};

use super::table::EventsTable;
use super::{DetectorTuning, PatternDetector};

pub struct DurationDetector {
    pub min_occurrences: u64,
    pub min_confidence: f64,
}

impl DurationDetector {
    pub fn new(tuning: &DetectorTuning) -> Self {
        Self {
            min_occurrences: tuning.min_occurrences,
            min_confidence: tuning.min_confidence,
        }
    }
}

impl PatternDetector for DurationDetector {
    fn name(&self) -> &'static str {
        "duration"
    }

    fn detect(&self, table: &EventsTable) -> Vec<Pattern> {
        // (entity, state) → the rows carrying a duration. The duration rides
        // on the transition event that ended the previous state.
        let mut groups: HashMap<(String, String), Vec<&super::table::EventRecord>> =
            HashMap::new();
        for record in table.records() {
            if record.duration_in_state_seconds.is_none() {
                continue;
            }
            groups
                .entry((record.entity_id.clone(), record.state.clone()))
                .or_default()
                .push(record);
        }

        let mut patterns = Vec::new();
        for ((entity_id, state), events) in groups {
            if (events.len() as u64) < self.min_occurrences {
                continue;
            }
            let durations: Vec<f64> = events
                .iter()
                .filter_map(|e| e.duration_in_state_seconds)
                .collect();

            let avg = durations.iter().mean();
            let variance = durations.iter().variance();
            let min = durations.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = durations.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

            // Normalized variance: squared coefficient of variation.
            let normalized_variance = if avg > 0.0 {
                (variance / (avg * avg)).clamp(0.0, 1.0)
            } else {
                1.0
            };
            let confidence = 1.0 - normalized_variance;
            if confidence < self.min_confidence {
                continue;
            }

            let first_seen = events.iter().map(|e| e.time_fired).min();
            let last_seen = events.iter().map(|e| e.time_fired).max();
            let (Some(first_seen), Some(last_seen)) = (first_seen, last_seen) else {
                continue;
            };

            patterns.push(Pattern::new(
                PatternType::Duration,
                PatternSubject::Device(entity_id),
                Some(&state),
                confidence,
                events.len() as u64,
                json!({
                    "state": state,
                    "avg_duration_seconds": avg,
                    "min_duration_seconds": min,
                    "max_duration_seconds": max,
                    "variance": variance,
                }),
                first_seen,
                last_seen,
            ));
        }
        patterns
    }
}
