//! Events table: the detectors' read model
//!
//! A flat, time-sorted slice of historical events from the time-series
//! store. Sorting happens on construction because cross-session reordering
//! is allowed upstream; detectors always see chronological order.

use chrono::{DateTime, Timelike, Utc};
use std::collections::HashMap;

/// One historical event row as returned by the query surface.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub entity_id: String,
    pub domain: String,
    pub device_class: Option<String>,
    pub area_id: Option<String>,
    pub event_type: String,
    pub state: String,
    pub time_fired: DateTime<Utc>,
    pub duration_in_state_seconds: Option<f64>,
    pub weather_condition: Option<String>,
    pub weather_temp: Option<f64>,
    pub occupancy_home: Option<bool>,
    pub occupancy_away: Option<bool>,
}

impl EventRecord {
    /// Fractional hour of day (7.5 = 07:30), used by time clustering.
    pub fn hour_decimal(&self) -> f64 {
        f64::from(self.time_fired.hour())
            + f64::from(self.time_fired.minute()) / 60.0
            + f64::from(self.time_fired.second()) / 3600.0
    }
}

/// Time-sorted event collection handed to every detector.
#[derive(Debug, Default)]
pub struct EventsTable {
    records: Vec<EventRecord>,
}

impl EventsTable {
    /// Build a table, sorting by `time_fired` (then entity for stability).
    pub fn new(mut records: Vec<EventRecord>) -> Self {
        records.sort_by(|a, b| {
            a.time_fired
                .cmp(&b.time_fired)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        Self { records }
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows grouped by entity, preserving chronological order per entity.
    pub fn by_entity(&self) -> HashMap<&str, Vec<&EventRecord>> {
        let mut groups: HashMap<&str, Vec<&EventRecord>> = HashMap::new();
        for record in &self.records {
            groups.entry(record.entity_id.as_str()).or_default().push(record);
        }
        groups
    }

    /// Event count per entity.
    pub fn entity_frequencies(&self) -> HashMap<&str, usize> {
        let mut freq: HashMap<&str, usize> = HashMap::new();
        for record in &self.records {
            *freq.entry(record.entity_id.as_str()).or_insert(0) += 1;
        }
        freq
    }

    /// First/last timestamps in the table.
    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((
            self.records.first()?.time_fired,
            self.records.last()?.time_fired,
        ))
    }

    /// Deterministic uniform down-sampling that preserves per-entity sample
    /// ratios. Used by quadratic detectors on large datasets.
    pub fn sampled(&self, target: usize) -> EventsTable {
        if self.records.len() <= target || target == 0 {
            return EventsTable::new(self.records.clone());
        }
        let ratio = target as f64 / self.records.len() as f64;

        let mut kept = Vec::with_capacity(target + 16);
        let mut per_entity_seen: HashMap<&str, usize> = HashMap::new();
        let mut per_entity_kept: HashMap<&str, usize> = HashMap::new();

        for record in &self.records {
            let seen = per_entity_seen.entry(record.entity_id.as_str()).or_insert(0);
            *seen += 1;
            let kept_count = per_entity_kept.entry(record.entity_id.as_str()).or_insert(0);
            // Keep the event whenever the kept ratio lags the target ratio.
            if (*kept_count as f64) < (*seen as f64) * ratio {
                *kept_count += 1;
                kept.push(record.clone());
            }
        }
        EventsTable::new(kept)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{at, record};
    use super::*;

    #[test]
    fn table_sorts_on_construction() {
        let table = EventsTable::new(vec![
            record("light.b", at(2025, 6, 1, 9, 0, 0), "on"),
            record("light.a", at(2025, 6, 1, 7, 0, 0), "on"),
        ]);
        assert_eq!(table.records()[0].entity_id, "light.a");
        assert_eq!(table.records()[1].entity_id, "light.b");
    }

    #[test]
    fn hour_decimal() {
        let r = record("light.a", at(2025, 6, 1, 7, 30, 0), "on");
        assert!((r.hour_decimal() - 7.5).abs() < 1e-9);
    }

    #[test]
    fn sampling_preserves_entity_ratios() {
        let mut records = Vec::new();
        for i in 0..900 {
            records.push(record("light.many", at(2025, 6, 1, 0, 0, 0) + chrono::Duration::seconds(i), "on"));
        }
        for i in 0..100 {
            records.push(record("light.few", at(2025, 6, 1, 1, 0, 0) + chrono::Duration::seconds(i), "on"));
        }
        let table = EventsTable::new(records);
        let sampled = table.sampled(100);

        assert!(sampled.len() <= 110);
        let freq = sampled.entity_frequencies();
        let many = *freq.get("light.many").unwrap_or(&0) as f64;
        let few = *freq.get("light.few").unwrap_or(&0) as f64;
        // 9:1 ratio roughly preserved.
        assert!(many / few > 6.0 && many / few < 12.0);
    }

    #[test]
    fn small_tables_are_not_sampled() {
        let table = EventsTable::new(vec![record("light.a", at(2025, 6, 1, 7, 0, 0), "on")]);
        assert_eq!(table.sampled(100).len(), 1);
    }
}
