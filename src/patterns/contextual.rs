//! Contextual pattern detector
//!
//! Joins events with their enrichment context (weather bin, presence flag,
//! time-of-day bucket) and looks for entities whose activity concentrates in
//! one context. Confidence is a weighted blend of the per-dimension
//! concentrations: weather 0.3, presence 0.4, time 0.3.

use serde_json::json;
use std::collections::HashMap;

use crate::types::{Pattern, PatternSubject, PatternType};

use super::table::{EventRecord, EventsTable};
use super::{DetectorTuning, PatternDetector};

const WEIGHT_WEATHER: f64 = 0.3;
const WEIGHT_PRESENCE: f64 = 0.4;
const WEIGHT_TIME: f64 = 0.3;

pub struct ContextualDetector {
    pub min_occurrences: u64,
    pub min_confidence: f64,
}

impl ContextualDetector {
    pub fn new(tuning: &DetectorTuning) -> Self {
        Self {
            min_occurrences: tuning.contextual_min_occurrences,
            min_confidence: tuning.min_confidence,
        }
    }
}

fn weather_bin(record: &EventRecord) -> String {
    if let Some(condition) = &record.weather_condition {
        return condition.to_ascii_lowercase();
    }
    match record.weather_temp {
        Some(t) if t < 10.0 => "cold".to_string(),
        Some(t) if t < 22.0 => "mild".to_string(),
        Some(_) => "warm".to_string(),
        None => "unknown".to_string(),
    }
}

fn presence_bin(record: &EventRecord) -> &'static str {
    match (record.occupancy_home, record.occupancy_away) {
        (Some(true), _) => "home",
        (_, Some(true)) => "away",
        _ => "unknown",
    }
}

fn time_bin(record: &EventRecord) -> &'static str {
    use chrono::Timelike;
    match record.time_fired.hour() {
        5..=11 => "morning",
        12..=16 => "afternoon",
        17..=21 => "evening",
        _ => "night",
    }
}

/// Largest single-bin share of a count map.
fn concentration(counts: &HashMap<String, u64>, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    counts.values().copied().max().unwrap_or(0) as f64 / total as f64
}

impl PatternDetector for ContextualDetector {
    fn name(&self) -> &'static str {
        "contextual"
    }

    fn detect(&self, table: &EventsTable) -> Vec<Pattern> {
        let mut patterns = Vec::new();

        for (entity_id, events) in table.by_entity() {
            let total = events.len() as u64;
            if total < self.min_occurrences {
                continue;
            }

            let mut weather_counts: HashMap<String, u64> = HashMap::new();
            let mut presence_counts: HashMap<String, u64> = HashMap::new();
            let mut time_counts: HashMap<String, u64> = HashMap::new();
            let mut context_counts: HashMap<String, u64> = HashMap::new();

            for event in &events {
                let w = weather_bin(event);
                let p = presence_bin(event);
                let t = time_bin(event);
                *context_counts.entry(format!("{w}|{p}|{t}")).or_insert(0) += 1;
                *weather_counts.entry(w).or_insert(0) += 1;
                *presence_counts.entry(p.to_string()).or_insert(0) += 1;
                *time_counts.entry(t.to_string()).or_insert(0) += 1;
            }

            let confidence = WEIGHT_WEATHER * concentration(&weather_counts, total)
                + WEIGHT_PRESENCE * concentration(&presence_counts, total)
                + WEIGHT_TIME * concentration(&time_counts, total);
            if confidence < self.min_confidence {
                continue;
            }

            let Some((dominant_key, dominant_count)) = context_counts
                .iter()
                .max_by_key(|(key, count)| (**count, std::cmp::Reverse(key.as_str())))
                .map(|(k, c)| (k.clone(), *c))
            else {
                continue;
            };
            if dominant_count < self.min_occurrences {
                continue;
            }

            let first_seen = events.iter().map(|e| e.time_fired).min();
            let last_seen = events.iter().map(|e| e.time_fired).max();
            let (Some(first_seen), Some(last_seen)) = (first_seen, last_seen) else {
                continue;
            };

            let parts: Vec<&str> = dominant_key.split('|').collect();
            patterns.push(Pattern::new(
                PatternType::Contextual,
                PatternSubject::Device(entity_id.to_string()),
                Some(&dominant_key.replace('|', "_")),
                confidence,
                dominant_count,
                json!({
                    "context_key": dominant_key,
                    "weather": parts.first().copied().unwrap_or("unknown"),
                    "presence": parts.get(1).copied().unwrap_or("unknown"),
                    "time_bucket": parts.get(2).copied().unwrap_or("unknown"),
                    "context_share": dominant_count as f64 / total as f64,
                }),
                first_seen,
                last_seen,
            ));
        }

        patterns
    }
}

#[cfg(test)]
mod tests {
    use super::super::table::testing::{at, record};
    use super::*;

    fn detector() -> ContextualDetector {
        ContextualDetector {
            min_occurrences: 5,
            min_confidence: 0.5,
        }
    }

    fn contextual_record(
        entity: &str,
        day: u32,
        hour: u32,
        condition: &str,
        home: bool,
    ) -> crate::patterns::table::EventRecord {
        let mut r = record(entity, at(2025, 6, 1 + day, hour, 0, 0), "on");
        r.weather_condition = Some(condition.to_string());
        r.occupancy_home = Some(home);
        r.occupancy_away = Some(!home);
        r
    }

    #[test]
    fn concentrated_context_is_detected() {
        // Fan turns on every warm afternoon while home.
        let records: Vec<_> = (0..8)
            .map(|day| contextual_record("fan.bedroom", day, 14, "sunny", true))
            .collect();
        let patterns = detector().detect(&EventsTable::new(records));
        assert_eq!(patterns.len(), 1);

        let p = &patterns[0];
        assert_eq!(p.pattern_type, PatternType::Contextual);
        // Fully concentrated in every dimension.
        assert!((p.confidence - 1.0).abs() < 1e-9);
        assert_eq!(p.metadata["weather"], "sunny");
        assert_eq!(p.metadata["presence"], "home");
        assert_eq!(p.metadata["time_bucket"], "afternoon");
        assert_eq!(p.occurrences, 8);
    }

    #[test]
    fn scattered_context_scores_low() {
        let conditions = ["sunny", "rain", "cloudy", "snow"];
        let hours = [2, 8, 14, 20];
        let records: Vec<_> = (0..8)
            .map(|i| {
                contextual_record(
                    "light.hall",
                    i,
                    hours[i as usize % 4],
                    conditions[i as usize % 4],
                    i % 2 == 0,
                )
            })
            .collect();
        let patterns = detector().detect(&EventsTable::new(records));
        // Max concentration per dimension is 0.25/0.5/0.25 → ~0.35 blended.
        assert!(patterns.is_empty());
    }

    #[test]
    fn too_few_events_are_ignored() {
        let records: Vec<_> = (0..4)
            .map(|day| contextual_record("fan.bedroom", day, 14, "sunny", true))
            .collect();
        assert!(detector().detect(&EventsTable::new(records)).is_empty());
    }
}
