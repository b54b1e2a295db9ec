//! Raw, normalized, and enriched event types
//!
//! A `RawEvent` is what the hub hands us inside an `event` frame. The
//! enrichment pipeline turns it into a `NormalizedEvent` (validated,
//! UTC timestamps, coerced state values, canonical units) and finally an
//! `EnrichedEvent` carrying weather/occupancy context and the derived
//! time-in-previous-state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event context propagated by the hub (causality chain).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventContext {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// One side of a state change as reported by the hub, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawStateSnapshot {
    #[serde(default)]
    pub entity_id: Option<String>,
    /// State is loosely typed on the wire: string, number, or bool.
    #[serde(default)]
    pub state: Option<Value>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub last_changed: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

/// A raw event as received from the hub, prior to validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub event_type: Option<String>,
    /// ISO-8601 string on the wire; may be absent.
    #[serde(default)]
    pub time_fired: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub old_state: Option<RawStateSnapshot>,
    #[serde(default)]
    pub new_state: Option<RawStateSnapshot>,
    #[serde(default)]
    pub context: EventContext,
}

/// Coerced state value. Boolean tokens and pure numerics are lifted out of
/// their string forms; everything else stays text (including the hub's
/// `unavailable` / `unknown` markers, which must survive untouched).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl StateValue {
    /// Render the value the way the time-series store expects its `state`
    /// field: the canonical string form.
    pub fn as_field_string(&self) -> String {
        match self {
            StateValue::Bool(true) => "true".to_string(),
            StateValue::Bool(false) => "false".to_string(),
            StateValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{n}")
                }
            }
            StateValue::Text(s) => s.clone(),
        }
    }

}

impl std::fmt::Display for StateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_field_string())
    }
}

/// Entity metadata derived during normalization from the entity id and an
/// allow-listed subset of attributes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityMetadata {
    pub domain: String,
    #[serde(default)]
    pub device_class: Option<String>,
    #[serde(default)]
    pub friendly_name: Option<String>,
    #[serde(default)]
    pub area_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub entity_category: Option<String>,
    #[serde(default)]
    pub unit_of_measurement: Option<String>,
}

/// An event after validation and normalization (§ enrichment pipeline).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub event_type: String,
    pub entity_id: String,
    pub domain: String,
    /// Always UTC. When the hub omitted the timestamp this is the receive
    /// time and `synthetic_timestamp` is set.
    pub time_fired: DateTime<Utc>,
    #[serde(default)]
    pub synthetic_timestamp: bool,
    pub state: StateValue,
    #[serde(default)]
    pub previous_state: Option<StateValue>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    pub metadata: EntityMetadata,
    #[serde(default)]
    pub context: EventContext,
}

/// A normalized event plus enrichment context. One `EnrichedEvent` becomes
/// exactly one time-series point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedEvent {
    pub event: NormalizedEvent,
    #[serde(default)]
    pub weather: Option<WeatherSnapshot>,
    #[serde(default)]
    pub occupancy: Option<Occupancy>,
    /// Seconds the entity spent in its previous state, when the previous
    /// transition is known for this entity within the session.
    #[serde(default)]
    pub duration_in_state_seconds: Option<f64>,
}

/// Point-in-time weather used for enrichment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeatherSnapshot {
    pub temperature: f64,
    #[serde(default)]
    pub humidity: Option<i64>,
    #[serde(default)]
    pub pressure: Option<f64>,
    #[serde(default)]
    pub wind_speed: Option<f64>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub location: String,
}

/// Calendar-derived occupancy attached during enrichment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Occupancy {
    pub is_home: bool,
    pub is_wfh: bool,
    pub is_away: bool,
    /// 0.0–1.0
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_value_field_strings() {
        assert_eq!(StateValue::Bool(true).as_field_string(), "true");
        assert_eq!(StateValue::Number(21.0).as_field_string(), "21");
        assert_eq!(StateValue::Number(21.5).as_field_string(), "21.5");
        assert_eq!(
            StateValue::Text("unavailable".into()).as_field_string(),
            "unavailable"
        );
    }

    #[test]
    fn raw_event_deserializes_hub_payload() {
        let json = serde_json::json!({
            "event_type": "state_changed",
            "time_fired": "2025-06-01T07:00:00+00:00",
            "new_state": {
                "entity_id": "light.bedroom",
                "state": "on",
                "attributes": {"friendly_name": "Bedroom"}
            },
            "context": {"id": "abc"}
        });

        let raw: RawEvent = serde_json::from_value(json).unwrap();
        assert_eq!(raw.event_type.as_deref(), Some("state_changed"));
        let new_state = raw.new_state.unwrap();
        assert_eq!(new_state.entity_id.as_deref(), Some("light.bedroom"));
        assert_eq!(raw.context.id.as_deref(), Some("abc"));
    }
}
