//! Aggregate rollups
//!
//! Compresses raw event history into per-day (and per-week/per-month)
//! rollup points that the pattern detectors can consume instead of raw
//! events: hourly distributions, peak hours, counts, and average durations
//! per entity.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use std::collections::HashMap;

use crate::patterns::EventRecord;
use crate::timeseries::{FieldValue, Point};

pub const MEASUREMENT_DAILY: &str = "home_assistant_events_daily";
pub const MEASUREMENT_WEEKLY: &str = "home_assistant_events_weekly";
pub const MEASUREMENT_MONTHLY: &str = "home_assistant_events_monthly";

/// Rollup granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    fn measurement(self) -> &'static str {
        match self {
            Granularity::Daily => MEASUREMENT_DAILY,
            Granularity::Weekly => MEASUREMENT_WEEKLY,
            Granularity::Monthly => MEASUREMENT_MONTHLY,
        }
    }

    /// Bucket key for a timestamp: the period's first day.
    fn bucket(self, t: DateTime<Utc>) -> NaiveDate {
        let date = t.date_naive();
        match self {
            Granularity::Daily => date,
            Granularity::Weekly => {
                date - chrono::Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
            Granularity::Monthly => date.with_day(1).unwrap_or(date),
        }
    }
}

#[derive(Default)]
struct EntityAggregate {
    hourly_distribution: [u64; 24],
    event_count: u64,
    duration_sum: f64,
    duration_count: u64,
    domain: String,
}

/// Build rollup points for one granularity from raw events.
pub fn build_rollup_points(records: &[EventRecord], granularity: Granularity) -> Vec<Point> {
    let mut buckets: HashMap<(NaiveDate, String), EntityAggregate> = HashMap::new();

    for record in records {
        let bucket = granularity.bucket(record.time_fired);
        let aggregate = buckets
            .entry((bucket, record.entity_id.clone()))
            .or_default();
        aggregate.hourly_distribution[record.time_fired.hour() as usize] += 1;
        aggregate.event_count += 1;
        aggregate.domain = record.domain.clone();
        if let Some(duration) = record.duration_in_state_seconds {
            aggregate.duration_sum += duration;
            aggregate.duration_count += 1;
        }
    }

    let mut points: Vec<Point> = buckets
        .into_iter()
        .map(|((date, entity_id), aggregate)| {
            let timestamp_ms = date
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc().timestamp_millis())
                .unwrap_or_default();

            let peak = peak_hours(&aggregate.hourly_distribution);
            let mut point = Point::new(granularity.measurement(), timestamp_ms)
                .tag("entity_id", entity_id)
                .tag("domain", aggregate.domain.clone())
                .field(
                    "event_count",
                    FieldValue::Integer(aggregate.event_count as i64),
                )
                .field(
                    "hourly_distribution",
                    FieldValue::Text(
                        serde_json::to_string(&aggregate.hourly_distribution.to_vec())
                            .unwrap_or_default(),
                    ),
                )
                .field(
                    "peak_hours",
                    FieldValue::Text(serde_json::to_string(&peak).unwrap_or_default()),
                );
            if aggregate.duration_count > 0 {
                point = point.field(
                    "avg_duration",
                    FieldValue::Float(aggregate.duration_sum / aggregate.duration_count as f64),
                );
            }
            point
        })
        .collect();

    points.sort_by(|a, b| a.timestamp_ms.cmp(&b.timestamp_ms));
    points
}

/// Hours holding at least half of the busiest hour's traffic.
fn peak_hours(distribution: &[u64; 24]) -> Vec<u32> {
    let max = distribution.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return Vec::new();
    }
    let threshold = max.div_ceil(2);
    distribution
        .iter()
        .enumerate()
        .filter(|(_, &count)| count >= threshold)
        .map(|(hour, _)| hour as u32)
        .collect()
}
