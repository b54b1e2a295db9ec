//! Calendar event parsing and occupancy detection
//!
//! Raw events arrive in the hub calendar API shape: `start`/`end` are either
//! `{"dateTime": ...}` for timed events, `{"date": ...}` for all-day events,
//! or occasionally a bare ISO string. Everything is normalized to UTC;
//! all-day dates become start-of-day UTC.
//!
//! Occupancy detection runs three case-insensitive regex classes over
//! summary + location + description. Precedence: WFH implies home (never
//! away); home alone implies home; away alone implies away.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::RegexSet;
use serde_json::Value;
use std::sync::RwLock;
use tracing::{debug, warn};

use crate::types::{CalendarEvent, Occupancy, RawCalendarEvent};

/// Work-from-home indicators.
const WFH_PATTERNS: &[&str] = &[
    r"(?i)\bWFH\b",
    r"(?i)\bwork from home\b",
    r"(?i)\bhome office\b",
    r"(?i)\bremote work\b",
    r"(?i)\bworking from home\b",
];

/// At-home indicators.
const HOME_PATTERNS: &[&str] = &[
    r"(?i)\bhome\b",
    r"(?i)\bhouse\b",
    r"(?i)\bresidence\b",
    r"(?i)\bapartment\b",
];

/// Away-from-home indicators.
const AWAY_PATTERNS: &[&str] = &[
    r"(?i)\boffice\b",
    r"(?i)\bwork\b",
    r"(?i)\btravel\b",
    r"(?i)\btrip\b",
    r"(?i)\bvacation\b",
    r"(?i)\bout of town\b",
    r"(?i)\bbusiness\b",
];

/// Stateless parser with precompiled pattern sets.
pub struct CalendarParser {
    wfh: RegexSet,
    home: RegexSet,
    away: RegexSet,
}

impl Default for CalendarParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CalendarParser {
    pub fn new() -> Self {
        // Static patterns; compilation cannot fail.
        #[allow(clippy::unwrap_used)]
        Self {
            wfh: RegexSet::new(WFH_PATTERNS).unwrap(),
            home: RegexSet::new(HOME_PATTERNS).unwrap(),
            away: RegexSet::new(AWAY_PATTERNS).unwrap(),
        }
    }

    /// Parse one raw event. Returns None when start or end is unusable.
    pub fn parse(&self, raw: &RawCalendarEvent) -> Option<CalendarEvent> {
        let start = parse_instant(raw.start.as_ref())?;
        let end = parse_instant(raw.end.as_ref())?;
        let is_all_day = matches!(raw.start.as_ref(), Some(Value::Object(map)) if map.contains_key("date") && !map.contains_key("dateTime"));

        let summary = raw.summary.clone().unwrap_or_else(|| "Untitled Event".to_string());
        let location = raw.location.clone().unwrap_or_default();
        let description = raw.description.clone().unwrap_or_default();

        let haystack = format!("{summary} {location} {description}");
        let matched_wfh = self.wfh.is_match(&haystack);
        let matched_home = self.home.is_match(&haystack);
        let matched_away = self.away.is_match(&haystack);

        // Base 0.5; home/WFH 0.85; away 0.75; +0.1 when classes agree, cap 0.95.
        let mut confidence = 0.5;
        if matched_wfh || matched_home {
            confidence = 0.85;
        } else if matched_away {
            confidence = 0.75;
        }
        let class_count =
            usize::from(matched_wfh) + usize::from(matched_home) + usize::from(matched_away);
        if class_count > 1 {
            confidence = (confidence + 0.1_f64).min(0.95);
        }

        let event = CalendarEvent {
            summary,
            location,
            description,
            start,
            end,
            is_all_day,
            is_wfh: matched_wfh,
            is_home: matched_home || matched_wfh,
            is_away: matched_away && !matched_wfh && !matched_home,
            confidence,
        };
        debug!(
            summary = %event.summary,
            is_home = event.is_home,
            is_away = event.is_away,
            "parsed calendar event"
        );
        Some(event)
    }

    /// Parse a batch, skipping events that fail to parse.
    pub fn parse_all(&self, raws: &[RawCalendarEvent]) -> Vec<CalendarEvent> {
        let parsed: Vec<CalendarEvent> = raws.iter().filter_map(|r| self.parse(r)).collect();
        if parsed.len() < raws.len() {
            warn!(
                dropped = raws.len() - parsed.len(),
                "some calendar events failed to parse"
            );
        }
        parsed
    }
}

/// Parse a start/end value: dict with `dateTime`/`date`, or a bare string.
fn parse_instant(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(s) => parse_datetime_str(s),
        Value::Object(map) => {
            if let Some(Value::String(s)) = map.get("dateTime") {
                parse_datetime_str(s)
            } else if let Some(Value::String(s)) = map.get("date") {
                // All-day: start of day UTC.
                let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
                Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// ISO-8601 with offset preferred; naive strings are assumed UTC.
fn parse_datetime_str(s: &str) -> Option<DateTime<Utc>> {
    let trimmed = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    // Naive datetime: no offset present, treat as UTC.
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    None
}

/// Background-refreshed set of currently-active calendar events.
///
/// Written by the scheduler's calendar refresh, read per-event by the
/// enrichment pipeline to attach occupancy. Readers take the read lock only
/// long enough to fold the active events into an `Occupancy`.
#[derive(Default)]
pub struct ActiveEventsSet {
    events: RwLock<Vec<CalendarEvent>>,
}

impl ActiveEventsSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the full event set (typically today's events).
    pub fn replace(&self, events: Vec<CalendarEvent>) {
        if let Ok(mut guard) = self.events.write() {
            *guard = events;
        }
    }

    /// Fold the events active at `now` into an occupancy verdict.
    /// Returns None when no event is active (pipeline attaches nothing).
    pub fn occupancy_at(&self, now: DateTime<Utc>) -> Option<Occupancy> {
        let guard = self.events.read().ok()?;
        let active: Vec<&CalendarEvent> =
            guard.iter().filter(|e| e.is_active_at(now)).collect();
        if active.is_empty() {
            return None;
        }

        // WFH/home wins over away when events disagree.
        let is_wfh = active.iter().any(|e| e.is_wfh);
        let is_home = active.iter().any(|e| e.is_home);
        let is_away = !is_home && active.iter().any(|e| e.is_away);
        let confidence = active
            .iter()
            .map(|e| e.confidence)
            .fold(0.0_f64, f64::max);

        Some(Occupancy {
            is_home,
            is_wfh,
            is_away,
            confidence,
        })
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(summary: &str, location: &str, start: Value, end: Value) -> RawCalendarEvent {
        RawCalendarEvent {
            summary: Some(summary.to_string()),
            location: Some(location.to_string()),
            description: None,
            start: Some(start),
            end: Some(end),
        }
    }

    #[test]
    fn timed_event_with_offset_converts_to_utc() {
        let parser = CalendarParser::new();
        let event = parser
            .parse(&raw(
                "Standup",
                "",
                serde_json::json!({"dateTime": "2025-06-01T09:00:00+02:00"}),
                serde_json::json!({"dateTime": "2025-06-01T09:30:00+02:00"}),
            ))
            .unwrap();
        assert_eq!(event.start, Utc.with_ymd_and_hms(2025, 6, 1, 7, 0, 0).unwrap());
        assert!(!event.is_all_day);
    }

    #[test]
    fn all_day_event_becomes_start_of_day_utc() {
        let parser = CalendarParser::new();
        let event = parser
            .parse(&raw(
                "Holiday",
                "",
                serde_json::json!({"date": "2025-06-01"}),
                serde_json::json!({"date": "2025-06-02"}),
            ))
            .unwrap();
        assert!(event.is_all_day);
        assert_eq!(event.start, Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn naive_datetime_assumed_utc() {
        let parser = CalendarParser::new();
        let event = parser
            .parse(&raw(
                "Dinner",
                "",
                serde_json::json!({"dateTime": "2025-06-01T18:00:00"}),
                serde_json::json!({"dateTime": "2025-06-01T20:00:00"}),
            ))
            .unwrap();
        assert_eq!(event.start, Utc.with_ymd_and_hms(2025, 6, 1, 18, 0, 0).unwrap());
    }

    #[test]
    fn wfh_implies_home_not_away() {
        let parser = CalendarParser::new();
        let event = parser
            .parse(&raw(
                "WFH - focus work",
                "",
                serde_json::json!({"dateTime": "2025-06-02T08:00:00Z"}),
                serde_json::json!({"dateTime": "2025-06-02T17:00:00Z"}),
            ))
            .unwrap();
        assert!(event.is_wfh);
        assert!(event.is_home);
        assert!(!event.is_away);
        // WFH + "work" keyword means two classes agree: 0.85 + 0.1
        assert!((event.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn away_only_event() {
        let parser = CalendarParser::new();
        let event = parser
            .parse(&raw(
                "Business trip",
                "Denver",
                serde_json::json!({"dateTime": "2025-06-03T08:00:00Z"}),
                serde_json::json!({"dateTime": "2025-06-05T17:00:00Z"}),
            ))
            .unwrap();
        assert!(!event.is_home);
        assert!(event.is_away);
        // "business" + "trip" are the same class; no agreement bonus.
        assert!((event.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn no_indicators_default_confidence() {
        let parser = CalendarParser::new();
        let event = parser
            .parse(&raw(
                "Dentist",
                "",
                serde_json::json!({"dateTime": "2025-06-03T08:00:00Z"}),
                serde_json::json!({"dateTime": "2025-06-03T09:00:00Z"}),
            ))
            .unwrap();
        assert!(!event.is_home && !event.is_away && !event.is_wfh);
        assert!((event.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn active_set_occupancy_precedence() {
        let parser = CalendarParser::new();
        let events = parser.parse_all(&[
            raw(
                "WFH",
                "",
                serde_json::json!({"dateTime": "2025-06-02T08:00:00Z"}),
                serde_json::json!({"dateTime": "2025-06-02T17:00:00Z"}),
            ),
            raw(
                "Office sync",
                "HQ",
                serde_json::json!({"dateTime": "2025-06-02T09:00:00Z"}),
                serde_json::json!({"dateTime": "2025-06-02T10:00:00Z"}),
            ),
        ]);
        let set = ActiveEventsSet::new();
        set.replace(events);

        let occ = set
            .occupancy_at(Utc.with_ymd_and_hms(2025, 6, 2, 9, 30, 0).unwrap())
            .unwrap();
        assert!(occ.is_home);
        assert!(!occ.is_away);

        assert!(set
            .occupancy_at(Utc.with_ymd_and_hms(2025, 6, 2, 22, 0, 0).unwrap())
            .is_none());
    }
}
