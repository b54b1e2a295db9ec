//! Co-occurrence pattern detector
//!
//! Finds device pairs that fire within a short window of each other.
//! Pair identity is unordered; confidence is the pair count over the rarer
//! device's event count. Large datasets are down-sampled first, preserving
//! per-device ratios.

use serde_json::json;
use std::collections::HashMap;

use crate::types::{Pattern, PatternSubject, PatternType};

use super::table::EventsTable;
use super::{DetectorTuning, PatternDetector};

pub struct CoOccurrenceDetector {
    pub window_secs: i64,
    pub min_support: u64,
    pub min_confidence: f64,
    pub sample_threshold: usize,
}

impl CoOccurrenceDetector {
    pub fn new(tuning: &DetectorTuning) -> Self {
        Self {
            window_secs: tuning.co_occurrence_window_secs,
            min_support: tuning.co_occurrence_min_support,
            min_confidence: tuning.min_confidence,
            sample_threshold: tuning.co_occurrence_sample_threshold,
        }
    }
}

#[derive(Default)]
struct PairStats {
    count: u64,
    delta_sum_secs: f64,
    first_seen: Option<chrono::DateTime<chrono::Utc>>,
    last_seen: Option<chrono::DateTime<chrono::Utc>>,
}

impl PatternDetector for CoOccurrenceDetector {
    fn name(&self) -> &'static str {
        "co_occurrence"
    }

    fn detect(&self, table: &EventsTable) -> Vec<Pattern> {
        // Quadratic in the window; sample large datasets down first.
        let sampled;
        let table = if table.len() > self.sample_threshold {
            sampled = table.sampled(self.sample_threshold);
            &sampled
        } else {
            table
        };

        let records = table.records();
        let frequencies = table.entity_frequencies();
        let mut pairs: HashMap<(String, String), PairStats> = HashMap::new();

        for (i, first) in records.iter().enumerate() {
            for second in records[i + 1..].iter() {
                let delta = (second.time_fired - first.time_fired).num_seconds();
                if delta > self.window_secs {
                    break; // Sorted table: nothing further can be in window.
                }
                if second.entity_id == first.entity_id {
                    continue;
                }

                let (a, b) = ordered_pair(&first.entity_id, &second.entity_id);
                let stats = pairs.entry((a, b)).or_default();
                stats.count += 1;
                stats.delta_sum_secs += delta as f64;
                stats.first_seen = Some(
                    stats
                        .first_seen
                        .map_or(first.time_fired, |t| t.min(first.time_fired)),
                );
                stats.last_seen = Some(
                    stats
                        .last_seen
                        .map_or(second.time_fired, |t| t.max(second.time_fired)),
                );
            }
        }

        let mut patterns = Vec::new();
        for ((device1, device2), stats) in pairs {
            if stats.count < self.min_support {
                continue;
            }
            let freq1 = *frequencies.get(device1.as_str()).unwrap_or(&0) as u64;
            let freq2 = *frequencies.get(device2.as_str()).unwrap_or(&0) as u64;
            let rarer = freq1.min(freq2).max(1);
            let confidence = (stats.count as f64 / rarer as f64).min(1.0);
            if confidence < self.min_confidence {
                continue;
            }
            let (Some(first_seen), Some(last_seen)) = (stats.first_seen, stats.last_seen)
            else {
                continue;
            };

            patterns.push(Pattern::new(
                PatternType::CoOccurrence,
                PatternSubject::pair(device1, device2),
                None,
                confidence,
                stats.count,
                json!({
                    "avg_time_delta_seconds": stats.delta_sum_secs / stats.count as f64,
                    "window_seconds": self.window_secs,
                }),
                first_seen,
                last_seen,
            ));
        }
        patterns
    }
}

fn ordered_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}
