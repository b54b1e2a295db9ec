//! Time-series point model
//!
//! One point per enriched event, measurement `home_assistant_events`.
//! Tags are low-cardinality identity; fields hold values. Schema rules are
//! enforced before anything reaches the wire: violations drop the point,
//! never the pipeline.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::types::EnrichedEvent;

// Measurement names.
pub const MEASUREMENT_EVENTS: &str = "home_assistant_events";
pub const MEASUREMENT_WEATHER: &str = "weather_data";
pub const MEASUREMENT_SPORTS: &str = "sports_data";
pub const MEASUREMENT_SYSTEM: &str = "system_metrics";

// Retention policy durations, applied when provisioning buckets.
pub const RETENTION_EVENTS: &str = "365d";
pub const RETENTION_WEATHER: &str = "180d";
pub const RETENTION_SPORTS: &str = "90d";
pub const RETENTION_SYSTEM: &str = "30d";

/// A field value in its wire type.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    Text(String),
}

/// One measurement point: tags + fields + millisecond timestamp.
#[derive(Debug, Clone)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp_ms: i64,
}

/// A schema rule the point failed. The fingerprint groups structured logs.
#[derive(Debug, thiserror::Error)]
pub enum SchemaViolation {
    #[error("missing required tag '{0}'")]
    MissingTag(&'static str),
    #[error("tag '{tag}' value '{value}' violates pattern")]
    TagPattern { tag: &'static str, value: String },
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
}

impl SchemaViolation {
    /// Short stable string for log grouping.
    pub fn fingerprint(&self) -> String {
        match self {
            SchemaViolation::MissingTag(tag) => format!("missing_tag:{tag}"),
            SchemaViolation::TagPattern { tag, .. } => format!("tag_pattern:{tag}"),
            SchemaViolation::MissingField(field) => format!("missing_field:{field}"),
        }
    }
}

fn entity_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::unwrap_used)]
    RE.get_or_init(|| Regex::new(r"^[a-z0-9_]+\.[a-z0-9_]+$").unwrap())
}

impl Point {
    pub fn new(measurement: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp_ms,
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.tags.insert(key.into(), value);
        }
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Build the single event point for an enriched event.
    pub fn from_enriched(enriched: &EnrichedEvent) -> Self {
        let event = &enriched.event;
        let mut point = Point::new(MEASUREMENT_EVENTS, event.time_fired.timestamp_millis())
            .tag("entity_id", event.entity_id.clone())
            .tag("domain", event.domain.clone())
            .tag("event_type", event.event_type.clone())
            .field("state", FieldValue::Text(event.state.as_field_string()));

        if let Some(dc) = &event.metadata.device_class {
            point = point.tag("device_class", dc.clone());
        }
        if let Some(area) = &event.metadata.area_id {
            point = point.tag("area_id", area.clone());
        }
        if let Some(device) = &event.metadata.device_id {
            point = point.tag("device_id", device.clone());
        }

        if let Some(prev) = &event.previous_state {
            point = point.field("previous_state", FieldValue::Text(prev.as_field_string()));
        }
        if !event.attributes.is_empty() {
            let json = serde_json::to_string(&event.attributes).unwrap_or_default();
            point = point.field("attributes", FieldValue::Text(json));
            // Numeric and boolean attributes also land flattened for direct
            // aggregation, without exploding string cardinality.
            for (key, value) in &event.attributes {
                match value {
                    Value::Number(n) => {
                        if let Some(f) = n.as_f64() {
                            point = point.field(format!("attr_{key}"), FieldValue::Float(f));
                        }
                    }
                    Value::Bool(b) => {
                        point = point.field(format!("attr_{key}"), FieldValue::Boolean(*b));
                    }
                    _ => {}
                }
            }
        }

        if let Some(id) = &event.context.id {
            point = point.field("context_id", FieldValue::Text(id.clone()));
        }
        if let Some(id) = &event.context.parent_id {
            point = point.field("context_parent_id", FieldValue::Text(id.clone()));
        }
        if let Some(id) = &event.context.user_id {
            point = point.field("context_user_id", FieldValue::Text(id.clone()));
        }

        if let Some(weather) = &enriched.weather {
            point = point
                .tag("location", weather.location.clone())
                .field("weather_temp", FieldValue::Float(weather.temperature));
            if let Some(condition) = &weather.condition {
                point = point.tag("weather_condition", condition.clone());
            }
            if let Some(h) = weather.humidity {
                point = point.field("weather_humidity", FieldValue::Integer(h));
            }
            if let Some(p) = weather.pressure {
                point = point.field("weather_pressure", FieldValue::Float(p));
            }
            if let Some(w) = weather.wind_speed {
                point = point.field("wind_speed", FieldValue::Float(w));
            }
        }

        if let Some(occ) = &enriched.occupancy {
            point = point
                .field("occupancy_home", FieldValue::Boolean(occ.is_home))
                .field("occupancy_wfh", FieldValue::Boolean(occ.is_wfh))
                .field("occupancy_away", FieldValue::Boolean(occ.is_away))
                .field("occupancy_confidence", FieldValue::Float(occ.confidence));
        }

        if let Some(duration) = enriched.duration_in_state_seconds {
            point = point.field("duration_in_state_seconds", FieldValue::Float(duration));
        }
        if event.synthetic_timestamp {
            point = point.field("synthetic_timestamp", FieldValue::Boolean(true));
        }

        point
    }

    /// Enforce schema rules: required tags with patterns, required fields.
    pub fn validate(&self) -> Result<(), SchemaViolation> {
        let entity_id = self
            .tags
            .get("entity_id")
            .ok_or(SchemaViolation::MissingTag("entity_id"))?;
        if !entity_id_pattern().is_match(entity_id) {
            return Err(SchemaViolation::TagPattern {
                tag: "entity_id",
                value: entity_id.clone(),
            });
        }
        if !self.tags.contains_key("domain") {
            return Err(SchemaViolation::MissingTag("domain"));
        }
        if !self.fields.contains_key("state") {
            return Err(SchemaViolation::MissingField("state"));
        }
        Ok(())
    }

    /// Render as one line-protocol line with millisecond precision.
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape_measurement(&self.measurement);
        for (key, value) in &self.tags {
            line.push(',');
            line.push_str(&escape_tag(key));
            line.push('=');
            line.push_str(&escape_tag(value));
        }
        line.push(' ');
        let mut first = true;
        for (key, value) in &self.fields {
            if !first {
                line.push(',');
            }
            first = false;
            line.push_str(&escape_tag(key));
            line.push('=');
            match value {
                FieldValue::Float(f) => line.push_str(&format!("{f}")),
                FieldValue::Integer(i) => line.push_str(&format!("{i}i")),
                FieldValue::Boolean(b) => line.push_str(if *b { "true" } else { "false" }),
                FieldValue::Text(s) => {
                    line.push('"');
                    line.push_str(&s.replace('\\', "\\\\").replace('"', "\\\""));
                    line.push('"');
                }
            }
        }
        line.push(' ');
        line.push_str(&self.timestamp_ms.to_string());
        line
    }
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_tag(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        EntityMetadata, EventContext, NormalizedEvent, Occupancy, StateValue, WeatherSnapshot,
    };
    use chrono::TimeZone;
    use chrono::Utc;

    fn enriched() -> EnrichedEvent {
        EnrichedEvent {
            event: NormalizedEvent {
                event_type: "state_changed".into(),
                entity_id: "light.kitchen".into(),
                domain: "light".into(),
                time_fired: Utc.with_ymd_and_hms(2025, 6, 1, 7, 0, 0).unwrap(),
                synthetic_timestamp: false,
                state: StateValue::Bool(true),
                previous_state: Some(StateValue::Bool(false)),
                attributes: serde_json::from_value(
                    serde_json::json!({"brightness": 180, "friendly_name": "Kitchen"}),
                )
                .unwrap(),
                metadata: EntityMetadata {
                    domain: "light".into(),
                    area_id: Some("kitchen".into()),
                    ..EntityMetadata::default()
                },
                context: EventContext {
                    id: Some("ctx1".into()),
                    ..EventContext::default()
                },
            },
            weather: Some(WeatherSnapshot {
                temperature: 18.5,
                humidity: Some(60),
                pressure: Some(1012.0),
                wind_speed: None,
                condition: Some("Clouds".into()),
                description: None,
                location: "home".into(),
            }),
            occupancy: Some(Occupancy {
                is_home: true,
                is_wfh: false,
                is_away: false,
                confidence: 0.85,
            }),
            duration_in_state_seconds: Some(330.0),
        }
    }

    #[test]
    fn one_point_per_enriched_event_with_schema_tags() {
        let point = Point::from_enriched(&enriched());
        assert_eq!(point.measurement, MEASUREMENT_EVENTS);
        assert_eq!(point.tags["entity_id"], "light.kitchen");
        assert_eq!(point.tags["domain"], "light");
        assert_eq!(point.tags["weather_condition"], "Clouds");
        assert!(matches!(point.fields["state"], FieldValue::Text(ref s) if s == "true"));
        assert!(matches!(point.fields["duration_in_state_seconds"], FieldValue::Float(d) if d == 330.0));
        assert!(matches!(point.fields["attr_brightness"], FieldValue::Float(b) if b == 180.0));
        assert!(point.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_entity_tag() {
        let point = Point::new(MEASUREMENT_EVENTS, 0)
            .tag("entity_id", "Bad.Entity")
            .tag("domain", "bad")
            .field("state", FieldValue::Text("on".into()));
        let violation = point.validate().unwrap_err();
        assert_eq!(violation.fingerprint(), "tag_pattern:entity_id");
    }

    #[test]
    fn validation_requires_state_field() {
        let point = Point::new(MEASUREMENT_EVENTS, 0)
            .tag("entity_id", "light.kitchen")
            .tag("domain", "light");
        assert!(matches!(
            point.validate(),
            Err(SchemaViolation::MissingField("state"))
        ));
    }

    #[test]
    fn line_protocol_escapes_and_orders() {
        let point = Point::new(MEASUREMENT_EVENTS, 1_717_225_200_000)
            .tag("entity_id", "light.kitchen")
            .tag("domain", "light")
            .field("state", FieldValue::Text("said \"on\"".into()))
            .field("weather_temp", FieldValue::Float(18.5))
            .field("weather_humidity", FieldValue::Integer(60));

        let line = point.to_line_protocol();
        assert!(line.starts_with("home_assistant_events,domain=light,entity_id=light.kitchen "));
        assert!(line.contains(r#"state="said \"on\"""#));
        assert!(line.contains("weather_humidity=60i"));
        assert!(line.contains("weather_temp=18.5"));
        assert!(line.ends_with(" 1717225200000"));
    }
}
