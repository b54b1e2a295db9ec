//! Time-of-day pattern detector
//!
//! Clusters each device's event times (hour decimals) with 1-D k-means,
//! where k scales with sample size. Clusters holding at least
//! `min_confidence` of the device's events become patterns. Qualifying
//! clusters are ordered lower-variance-first (earlier hour on ties) when
//! cluster ids are assigned.

use serde_json::json;

use crate::types::{Pattern, PatternSubject, PatternType};

use super::kmeans::{cluster_count_for, kmeans_1d};
use super::table::EventsTable;
use super::{DetectorTuning, PatternDetector};

pub struct TimeOfDayDetector {
    pub min_occurrences: u64,
    pub min_confidence: f64,
}

impl TimeOfDayDetector {
    pub fn new(tuning: &DetectorTuning) -> Self {
        Self {
            min_occurrences: tuning.min_occurrences,
            min_confidence: tuning.min_confidence,
        }
    }
}

impl PatternDetector for TimeOfDayDetector {
    fn name(&self) -> &'static str {
        "time_of_day"
    }

    fn detect(&self, table: &EventsTable) -> Vec<Pattern> {
        let mut patterns = Vec::new();

        for (entity_id, events) in table.by_entity() {
            if (events.len() as u64) < self.min_occurrences {
                continue;
            }

            let times: Vec<f64> = events.iter().map(|e| e.hour_decimal()).collect();
            let total = times.len();
            let clusters = kmeans_1d(&times, cluster_count_for(total));

            let mut qualifying: Vec<_> = clusters
                .into_iter()
                .filter(|c| c.members.len() as f64 / total as f64 >= self.min_confidence)
                .collect();
            // Lower variance wins; earlier hour breaks exact ties.
            qualifying.sort_by(|a, b| {
                a.variance()
                    .partial_cmp(&b.variance())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        a.centroid
                            .partial_cmp(&b.centroid)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
            });

            let first_seen = events.iter().map(|e| e.time_fired).min();
            let last_seen = events.iter().map(|e| e.time_fired).max();
            let (Some(first_seen), Some(last_seen)) = (first_seen, last_seen) else {
                continue;
            };

            for (cluster_id, cluster) in qualifying.iter().enumerate() {
                let share = cluster.members.len() as f64 / total as f64;
                let hour = cluster.centroid.floor() as u32 % 24;
                let minute = ((cluster.centroid - cluster.centroid.floor()) * 60.0).round() as u32;
                let lo = cluster
                    .members
                    .iter()
                    .cloned()
                    .fold(f64::INFINITY, f64::min);
                let hi = cluster
                    .members
                    .iter()
                    .cloned()
                    .fold(f64::NEG_INFINITY, f64::max);

                patterns.push(Pattern::new(
                    PatternType::TimeOfDay,
                    PatternSubject::Device(entity_id.to_string()),
                    Some(&format!("c{cluster_id}")),
                    share,
                    cluster.members.len() as u64,
                    json!({
                        "hour": hour,
                        "minute": minute % 60,
                        "cluster_id": cluster_id,
                        "std_minutes": cluster.std_dev() * 60.0,
                        "time_range": format!("{}-{}", format_decimal(lo), format_decimal(hi)),
                        "avg_time_decimal": cluster.centroid,
                    }),
                    first_seen,
                    last_seen,
                ));
            }
        }

        patterns
    }
}

fn format_decimal(hour_decimal: f64) -> String {
    let hour = hour_decimal.floor() as u32 % 24;
    let minute = ((hour_decimal - hour_decimal.floor()) * 60.0).round() as u32;
    format!("{hour:02}:{:02}", minute % 60)
}

#[cfg(test)]
mod tests {
    use super::super::table::testing::{at, record};
    use super::*;

    fn tuning() -> DetectorTuning {
        DetectorTuning {
            min_occurrences: 5,
            min_confidence: 0.5,
            ..DetectorTuning::default()
        }
    }

    #[test]
    fn morning_light_yields_single_pattern() {
        // 20 daily events on light.bedroom at 07:00 ± 2 minutes.
        let records: Vec<_> = (0..20)
            .map(|day| {
                let minute_offset = (day % 5) as i64 - 2; // -2..=2 minutes
                record(
                    "light.bedroom",
                    at(2025, 6, 1 + day as u32 % 28, 7, 0, 0)
                        + chrono::Duration::minutes(minute_offset),
                    "on",
                )
            })
            .collect();
        let table = EventsTable::new(records);

        let patterns = TimeOfDayDetector::new(&tuning()).detect(&table);
        assert_eq!(patterns.len(), 1);

        let p = &patterns[0];
        assert_eq!(p.pattern_type, PatternType::TimeOfDay);
        assert_eq!(p.occurrences, 20);
        assert!((p.confidence - 1.0).abs() < 1e-9);
        assert_eq!(p.metadata["hour"], 7);
        assert_eq!(p.subject, PatternSubject::Device("light.bedroom".into()));
    }

    #[test]
    fn below_min_occurrences_is_silent() {
        let records: Vec<_> = (0..4)
            .map(|day| record("light.rare", at(2025, 6, 1 + day, 7, 0, 0), "on"))
            .collect();
        let patterns = TimeOfDayDetector::new(&tuning()).detect(&EventsTable::new(records));
        assert!(patterns.is_empty());
    }

    #[test]
    fn exactly_min_occurrences_is_emitted() {
        let records: Vec<_> = (0..5)
            .map(|day| record("light.edge", at(2025, 6, 1 + day, 7, 0, 0), "on"))
            .collect();
        let patterns = TimeOfDayDetector::new(&tuning()).detect(&EventsTable::new(records));
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].occurrences, 5);
    }

    #[test]
    fn bimodal_usage_yields_two_clusters() {
        let mut records = Vec::new();
        for day in 0..14 {
            records.push(record("light.porch", at(2025, 6, 1 + day, 7, 0, 0), "on"));
            records.push(record("light.porch", at(2025, 6, 1 + day, 19, 0, 0), "on"));
        }
        // 28 events → k=3, merging collapses to two real groups. Each group
        // holds 50% of events, exactly at the confidence floor (inclusive).
        let patterns = TimeOfDayDetector::new(&tuning()).detect(&EventsTable::new(records));
        assert_eq!(patterns.len(), 2);
        let hours: Vec<u64> = patterns
            .iter()
            .map(|p| p.metadata["hour"].as_u64().unwrap())
            .collect();
        assert!(hours.contains(&7) && hours.contains(&19));
    }
}
