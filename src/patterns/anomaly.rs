//! Anomaly pattern detector
//!
//! Builds a per-entity hourly activity baseline over the table's span and
//! z-scores the most recent day against it. Hours whose activity deviates
//! beyond the threshold produce an `anomaly` pattern with a severity band.

use chrono::{Datelike, Timelike};
use serde_json::json;
use statrs::statistics::Statistics;
use std::collections::HashMap;

use crate::types::{Pattern, PatternSubject, PatternType};

use super::table::EventsTable;
use super::{DetectorTuning, PatternDetector};

pub struct AnomalyDetector {
    pub z_threshold: f64,
    pub min_occurrences: u64,
    pub min_confidence: f64,
}

impl AnomalyDetector {
    pub fn new(tuning: &DetectorTuning) -> Self {
        Self {
            z_threshold: tuning.anomaly_z_threshold,
            min_occurrences: tuning.min_occurrences,
            min_confidence: tuning.min_confidence,
        }
    }

    fn severity(z_abs: f64, threshold: f64) -> &'static str {
        if z_abs >= threshold * 2.0 {
            "high"
        } else if z_abs >= threshold * 1.5 {
            "medium"
        } else {
            "low"
        }
    }
}

impl PatternDetector for AnomalyDetector {
    fn name(&self) -> &'static str {
        "anomaly"
    }

    fn detect(&self, table: &EventsTable) -> Vec<Pattern> {
        let Some((_, span_end)) = table.span() else {
            return Vec::new();
        };
        let latest_day = span_end.date_naive();

        let mut patterns = Vec::new();
        for (entity_id, events) in table.by_entity() {
            if (events.len() as u64) < self.min_occurrences {
                continue;
            }

            // (day, hour) → event count.
            let mut day_hour_counts: HashMap<(i64, u32), f64> = HashMap::new();
            let mut days: Vec<i64> = Vec::new();
            for event in &events {
                let day = i64::from(event.time_fired.date_naive().num_days_from_ce());
                let hour = event.time_fired.hour();
                *day_hour_counts.entry((day, hour)).or_insert(0.0) += 1.0;
                if !days.contains(&day) {
                    days.push(day);
                }
            }
            // A baseline needs history beyond the day being scored.
            if days.len() < 3 {
                continue;
            }

            let latest = i64::from(latest_day.num_days_from_ce());
            let baseline_days: Vec<i64> = days.iter().copied().filter(|d| *d != latest).collect();

            let mut anomalous_hours = Vec::new();
            let mut worst_z = 0.0_f64;
            for hour in 0..24u32 {
                let baseline: Vec<f64> = baseline_days
                    .iter()
                    .map(|d| *day_hour_counts.get(&(*d, hour)).unwrap_or(&0.0))
                    .collect();
                let mean = baseline.iter().mean();
                let std = baseline.iter().std_dev();
                if !std.is_finite() || std < 1e-9 {
                    continue; // Constant baseline: no usable distribution.
                }

                let today = *day_hour_counts.get(&(latest, hour)).unwrap_or(&0.0);
                let z = (today - mean) / std;
                if z.abs() >= self.z_threshold {
                    anomalous_hours.push(json!({
                        "hour": hour,
                        "observed": today,
                        "baseline_mean": mean,
                        "z_score": z,
                    }));
                    if z.abs() > worst_z.abs() {
                        worst_z = z;
                    }
                }
            }

            if anomalous_hours.is_empty() {
                continue;
            }

            let confidence = (worst_z.abs() / (self.z_threshold * 2.0)).clamp(0.0, 1.0);
            if confidence < self.min_confidence {
                continue;
            }
            let anomaly_type = if worst_z > 0.0 { "activity_spike" } else { "activity_drop" };

            let first_seen = events.iter().map(|e| e.time_fired).min();
            let last_seen = events.iter().map(|e| e.time_fired).max();
            let (Some(first_seen), Some(last_seen)) = (first_seen, last_seen) else {
                continue;
            };

            patterns.push(Pattern::new(
                PatternType::Anomaly,
                PatternSubject::Device(entity_id.to_string()),
                Some(&latest_day.to_string()),
                confidence,
                anomalous_hours.len() as u64,
                json!({
                    "anomaly_type": anomaly_type,
                    "score": worst_z,
                    "baseline_deviation": worst_z.abs(),
                    "severity": Self::severity(worst_z.abs(), self.z_threshold),
                    "hours": anomalous_hours,
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

    fn detector() -> AnomalyDetector {
        AnomalyDetector {
            z_threshold: 3.0,
            min_occurrences: 5,
            min_confidence: 0.5,
        }
    }

    #[test]
    fn activity_spike_on_latest_day_is_flagged() {
        let mut records = Vec::new();
        // Baseline: 1-2 events at 20:00 for 9 days (some jitter so the
        // baseline has spread).
        for day in 0..9u32 {
            records.push(record("light.porch", at(2025, 6, 1 + day, 20, 0, 0), "on"));
            if day % 2 == 0 {
                records.push(record("light.porch", at(2025, 6, 1 + day, 20, 30, 0), "on"));
            }
        }
        // Latest day: 40 events in the same hour.
        for i in 0..40 {
            records.push(record(
                "light.porch",
                at(2025, 6, 10, 20, 0, 0) + chrono::Duration::seconds(i * 30),
                "on",
            ));
        }

        let patterns = detector().detect(&EventsTable::new(records));
        assert_eq!(patterns.len(), 1);
        let p = &patterns[0];
        assert_eq!(p.pattern_type, PatternType::Anomaly);
        assert_eq!(p.metadata["anomaly_type"], "activity_spike");
        assert_eq!(p.metadata["severity"], "high");
        assert!(p.confidence >= 0.5);
    }

    #[test]
    fn steady_activity_produces_nothing() {
        let mut records = Vec::new();
        for day in 0..10u32 {
            // Alternate 1 and 2 events so the baseline has nonzero spread.
            records.push(record("light.porch", at(2025, 6, 1 + day, 20, 0, 0), "on"));
            if day % 2 == 0 {
                records.push(record("light.porch", at(2025, 6, 1 + day, 20, 30, 0), "on"));
            }
        }
        assert!(detector().detect(&EventsTable::new(records)).is_empty());
    }

    #[test]
    fn short_history_is_skipped() {
        let mut records = Vec::new();
        for day in 0..2u32 {
            for i in 0..5 {
                records.push(record(
                    "light.new",
                    at(2025, 6, 1 + day, 20, 0, 0) + chrono::Duration::minutes(i),
                    "on",
                ));
            }
        }
        assert!(detector().detect(&EventsTable::new(records)).is_empty());
    }
}
