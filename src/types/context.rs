//! Calendar context types
//!
//! Raw calendar events arrive in the hub's calendar API shape; the parser
//! normalizes them into UTC instants with occupancy indicators attached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A calendar event in the hub API shape, before parsing.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawCalendarEvent {
    #[serde(default)]
    pub summary: Option<String>,
    /// Either `{"dateTime": "..."}`, `{"date": "..."}`, or a bare ISO string.
    #[serde(default)]
    pub start: Option<Value>,
    #[serde(default)]
    pub end: Option<Value>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A parsed, UTC-normalized calendar event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarEvent {
    pub summary: String,
    pub location: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub is_all_day: bool,
    /// Occupancy indicators derived from summary/location/description.
    pub is_wfh: bool,
    pub is_home: bool,
    pub is_away: bool,
    pub confidence: f64,
}

impl CalendarEvent {
    /// Whether the event is active at `now` (start inclusive, end exclusive).
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.end
    }
}
