//! Per-event validation and normalization
//!
//! `normalize()` turns a raw hub event into a `NormalizedEvent`: UTC
//! timestamps, coerced state values, canonical units, derived metadata.
//! Every call also produces a `ValidationResult` for the quality collector,
//! whether or not the event survives.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::warn;

use crate::types::{
    EntityMetadata, EventContext, NormalizedEvent, RawEvent, RawStateSnapshot, StateValue,
};

use super::units;

/// Error classes tracked by the quality collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    MissingField,
    InvalidFormat,
    InvalidType,
    OutOfRange,
    TimestampError,
    InvalidState,
    Other,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorClass::MissingField => "missing_field",
            ErrorClass::InvalidFormat => "invalid_format",
            ErrorClass::InvalidType => "invalid_type",
            ErrorClass::OutOfRange => "out_of_range",
            ErrorClass::TimestampError => "timestamp_error",
            ErrorClass::InvalidState => "invalid_state",
            ErrorClass::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// One validation finding.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Finding {
    pub class: ErrorClass,
    pub message: String,
}

/// Outcome of one normalize() call, consumed by the quality collector.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<Finding>,
    pub warnings: Vec<Finding>,
    pub domain: String,
    pub validation_time_ms: f64,
}

/// Attributes copied into `EntityMetadata` when present.
const METADATA_ALLOW_LIST: &[&str] = &[
    "device_class",
    "friendly_name",
    "area_id",
    "device_id",
    "icon",
    "entity_category",
    "unit_of_measurement",
];

/// Hub state markers that must never be coerced.
const PRESERVED_STATES: &[&str] = &["unavailable", "unknown"];

fn entity_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Static pattern; compilation cannot fail.
    #[allow(clippy::unwrap_used)]
    RE.get_or_init(|| Regex::new(r"^[a-z0-9_]+\.[a-z0-9_]+$").unwrap())
}

/// Stateful normalizer. Owned by the pipeline task; the per-entity
/// last-timestamp map backs the monotonicity check, which logs violations
/// without rejecting the event.
pub struct Normalizer {
    last_time_fired: HashMap<String, DateTime<Utc>>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self {
            last_time_fired: HashMap::new(),
        }
    }

    /// Validate and normalize one raw event. `received_at` backs synthetic
    /// timestamps when the hub omitted `time_fired`.
    pub fn normalize(
        &mut self,
        raw: &RawEvent,
        received_at: DateTime<Utc>,
    ) -> (Option<NormalizedEvent>, ValidationResult) {
        let started = Instant::now();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // Required fields: event_type and new_state.entity_id.
        let event_type = raw.event_type.clone().unwrap_or_default();
        if event_type.is_empty() {
            errors.push(Finding {
                class: ErrorClass::MissingField,
                message: "event_type is missing".to_string(),
            });
        }

        let entity_id = raw
            .new_state
            .as_ref()
            .and_then(|s| s.entity_id.clone())
            .or_else(|| raw.entity_id.clone())
            .unwrap_or_default();
        if entity_id.is_empty() {
            errors.push(Finding {
                class: ErrorClass::MissingField,
                message: "new_state.entity_id is missing".to_string(),
            });
        } else if !is_valid_entity_id(&entity_id) {
            errors.push(Finding {
                class: ErrorClass::InvalidFormat,
                message: format!("entity_id '{entity_id}' is not domain.name form"),
            });
        }

        let domain = entity_id
            .split('.')
            .next()
            .unwrap_or("unknown")
            .to_string();

        if !errors.is_empty() {
            return (
                None,
                ValidationResult {
                    is_valid: false,
                    errors,
                    warnings,
                    domain,
                    validation_time_ms: elapsed_ms(started),
                },
            );
        }

        // Timestamp rules.
        let (time_fired, synthetic_timestamp) = match raw.time_fired.as_deref() {
            Some(s) => match parse_timestamp(s) {
                Some(dt) => (dt, false),
                None => {
                    warnings.push(Finding {
                        class: ErrorClass::TimestampError,
                        message: format!("unparseable time_fired '{s}', using receive time"),
                    });
                    (received_at, true)
                }
            },
            None => (received_at, true),
        };

        // Monotonicity per entity within a session: log, never reject.
        if let Some(prev) = self.last_time_fired.get(&entity_id) {
            if time_fired < *prev {
                warn!(
                    entity_id = %entity_id,
                    previous = %prev,
                    current = %time_fired,
                    "non-monotonic time_fired for entity"
                );
                warnings.push(Finding {
                    class: ErrorClass::TimestampError,
                    message: format!("time_fired went backwards for {entity_id}"),
                });
            }
        }
        self.last_time_fired.insert(entity_id.clone(), time_fired);

        let new_state = raw.new_state.clone().unwrap_or_default();
        let state = coerce_state(new_state.state.as_ref());
        let previous_state = raw
            .old_state
            .as_ref()
            .and_then(|s| s.state.as_ref())
            .map(|v| coerce_state(Some(v)));

        // Canonical units + metadata extraction from the allow-list.
        let mut attributes = new_state.attributes.clone();
        if let Some(Value::String(unit)) = attributes.get("unit_of_measurement").cloned() {
            let canonical = units::canonicalize(&unit);
            attributes.insert(
                "unit_of_measurement".to_string(),
                Value::String(canonical),
            );
        }
        let metadata = extract_metadata(&domain, &attributes);

        let normalized = NormalizedEvent {
            event_type,
            entity_id,
            domain: domain.clone(),
            time_fired,
            synthetic_timestamp,
            state,
            previous_state,
            attributes,
            metadata,
            context: raw.context.clone(),
        };

        (
            Some(normalized),
            ValidationResult {
                is_valid: true,
                errors,
                warnings,
                domain,
                validation_time_ms: elapsed_ms(started),
            },
        )
    }

    /// Rebuild a RawEvent from a NormalizedEvent. Exists so the idempotence
    /// law `normalize(normalize(E)) = normalize(E)` is directly testable.
    pub fn to_raw(event: &NormalizedEvent) -> RawEvent {
        RawEvent {
            event_type: Some(event.event_type.clone()),
            time_fired: Some(event.time_fired.to_rfc3339()),
            entity_id: Some(event.entity_id.clone()),
            domain: Some(event.domain.clone()),
            old_state: event.previous_state.as_ref().map(|s| RawStateSnapshot {
                entity_id: Some(event.entity_id.clone()),
                state: Some(state_to_value(s)),
                ..RawStateSnapshot::default()
            }),
            new_state: Some(RawStateSnapshot {
                entity_id: Some(event.entity_id.clone()),
                state: Some(state_to_value(&event.state)),
                attributes: event.attributes.clone(),
                ..RawStateSnapshot::default()
            }),
            context: event.context.clone(),
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// `domain.name` form, lower-case segments, no trailing underscore.
pub fn is_valid_entity_id(entity_id: &str) -> bool {
    entity_id_regex().is_match(entity_id)
        && !entity_id.ends_with('_')
        && !entity_id.contains("..")
}

/// Timestamp parsing: explicit offset converts to UTC, a naive string is
/// assumed UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let trimmed = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

/// Boolean-token table, checked case-insensitively before the numeric parse.
fn boolean_token(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" | "enabled" => Some(true),
        "off" | "false" | "0" | "no" | "disabled" => Some(false),
        _ => None,
    }
}

/// Coerce a wire state value: boolean tokens, then numerics, else text.
/// `unavailable`/`unknown` are preserved verbatim.
pub fn coerce_state(value: Option<&Value>) -> StateValue {
    match value {
        Some(Value::Bool(b)) => StateValue::Bool(*b),
        Some(Value::Number(n)) => n
            .as_f64()
            .map_or_else(|| StateValue::Text(n.to_string()), StateValue::Number),
        Some(Value::String(s)) => {
            if PRESERVED_STATES.contains(&s.as_str()) {
                return StateValue::Text(s.clone());
            }
            if let Some(b) = boolean_token(s) {
                return StateValue::Bool(b);
            }
            if let Ok(n) = s.trim().parse::<f64>() {
                return StateValue::Number(n);
            }
            StateValue::Text(s.clone())
        }
        _ => StateValue::Text(String::new()),
    }
}

fn state_to_value(state: &StateValue) -> Value {
    match state {
        StateValue::Bool(b) => Value::Bool(*b),
        StateValue::Number(n) => serde_json::Number::from_f64(*n)
            .map_or_else(|| Value::String(n.to_string()), Value::Number),
        StateValue::Text(s) => Value::String(s.clone()),
    }
}

fn extract_metadata(domain: &str, attributes: &Map<String, Value>) -> EntityMetadata {
    let mut metadata = EntityMetadata {
        domain: domain.to_string(),
        ..EntityMetadata::default()
    };
    for key in METADATA_ALLOW_LIST {
        let Some(Value::String(value)) = attributes.get(*key) else {
            continue;
        };
        let value = Some(value.clone());
        match *key {
            "device_class" => metadata.device_class = value,
            "friendly_name" => metadata.friendly_name = value,
            "area_id" => metadata.area_id = value,
            "device_id" => metadata.device_id = value,
            "icon" => metadata.icon = value,
            "entity_category" => metadata.entity_category = value,
            "unit_of_measurement" => metadata.unit_of_measurement = value,
            _ => {}
        }
    }
    metadata
}

/// Build a RawEvent from a hub event-frame payload (`data` of the envelope).
pub fn raw_from_envelope(
    event_type: &str,
    data: &Value,
    time_fired: Option<&str>,
    context: EventContext,
) -> RawEvent {
    let mut raw: RawEvent = data
        .clone()
        .as_object()
        .map(|obj| {
            serde_json::from_value(Value::Object(obj.clone())).unwrap_or_default()
        })
        .unwrap_or_default();
    raw.event_type = Some(event_type.to_string());
    if raw.time_fired.is_none() {
        raw.time_fired = time_fired.map(str::to_string);
    }
    raw.context = context;
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn receive_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn raw_event(entity_id: &str, state: Value) -> RawEvent {
        RawEvent {
            event_type: Some("state_changed".to_string()),
            time_fired: Some("2025-06-01T07:00:00+00:00".to_string()),
            new_state: Some(RawStateSnapshot {
                entity_id: Some(entity_id.to_string()),
                state: Some(state),
                ..RawStateSnapshot::default()
            }),
            ..RawEvent::default()
        }
    }

    #[test]
    fn missing_event_type_is_invalid() {
        let mut n = Normalizer::new();
        let mut raw = raw_event("light.kitchen", Value::String("on".into()));
        raw.event_type = None;
        let (event, result) = n.normalize(&raw, receive_time());
        assert!(event.is_none());
        assert!(!result.is_valid);
        assert_eq!(result.errors[0].class, ErrorClass::MissingField);
    }

    #[test]
    fn missing_entity_id_is_invalid() {
        let mut n = Normalizer::new();
        let raw = RawEvent {
            event_type: Some("state_changed".to_string()),
            ..RawEvent::default()
        };
        let (event, result) = n.normalize(&raw, receive_time());
        assert!(event.is_none());
        assert!(result.errors.iter().any(|e| e.class == ErrorClass::MissingField));
    }

    #[test]
    fn malformed_entity_ids_are_rejected() {
        let mut n = Normalizer::new();
        for bad in ["light..hall", "light.hall_", "Light.Hall", "nodot", ".hall"] {
            let (event, result) = n.normalize(&raw_event(bad, Value::String("on".into())), receive_time());
            assert!(event.is_none(), "expected rejection for {bad}");
            assert!(
                result.errors.iter().any(|e| {
                    e.class == ErrorClass::InvalidFormat || e.class == ErrorClass::MissingField
                }),
                "expected invalid_format for {bad}"
            );
        }
    }

    #[test]
    fn boolean_tokens_coerce_before_numeric() {
        assert_eq!(coerce_state(Some(&Value::String("ON".into()))), StateValue::Bool(true));
        assert_eq!(coerce_state(Some(&Value::String("Disabled".into()))), StateValue::Bool(false));
        assert_eq!(coerce_state(Some(&Value::String("1".into()))), StateValue::Bool(true));
        assert_eq!(coerce_state(Some(&Value::String("21.5".into()))), StateValue::Number(21.5));
        assert_eq!(
            coerce_state(Some(&Value::String("unavailable".into()))),
            StateValue::Text("unavailable".into())
        );
    }

    #[test]
    fn timestamp_with_offset_converts_to_utc() {
        let mut n = Normalizer::new();
        let mut raw = raw_event("sensor.temp", Value::String("21.5".into()));
        raw.time_fired = Some("2025-06-01T09:00:00+02:00".to_string());
        let (event, _) = n.normalize(&raw, receive_time());
        let event = event.unwrap();
        assert_eq!(event.time_fired, Utc.with_ymd_and_hms(2025, 6, 1, 7, 0, 0).unwrap());
        assert!(!event.synthetic_timestamp);
    }

    #[test]
    fn utc_offset_zero_round_trips_unchanged() {
        let mut n = Normalizer::new();
        let raw = raw_event("sensor.temp", Value::String("21.5".into()));
        let (event, _) = n.normalize(&raw, receive_time());
        assert_eq!(
            event.unwrap().time_fired,
            Utc.with_ymd_and_hms(2025, 6, 1, 7, 0, 0).unwrap()
        );
    }

    #[test]
    fn naive_timestamp_assumed_utc() {
        let mut n = Normalizer::new();
        let mut raw = raw_event("sensor.temp", Value::String("20".into()));
        raw.time_fired = Some("2025-06-01T07:00:00".to_string());
        let (event, _) = n.normalize(&raw, receive_time());
        assert_eq!(
            event.unwrap().time_fired,
            Utc.with_ymd_and_hms(2025, 6, 1, 7, 0, 0).unwrap()
        );
    }

    #[test]
    fn absent_timestamp_uses_receive_time_with_flag() {
        let mut n = Normalizer::new();
        let mut raw = raw_event("sensor.temp", Value::String("20".into()));
        raw.time_fired = None;
        let (event, result) = n.normalize(&raw, receive_time());
        let event = event.unwrap();
        assert!(event.synthetic_timestamp);
        assert_eq!(event.time_fired, receive_time());
        assert!(result.is_valid);
    }

    #[test]
    fn non_monotonic_timestamp_warns_but_passes() {
        let mut n = Normalizer::new();
        let mut first = raw_event("light.hall", Value::String("on".into()));
        first.time_fired = Some("2025-06-01T08:00:00Z".to_string());
        let mut second = raw_event("light.hall", Value::String("off".into()));
        second.time_fired = Some("2025-06-01T07:00:00Z".to_string());

        let (e1, r1) = n.normalize(&first, receive_time());
        assert!(e1.is_some() && r1.warnings.is_empty());

        let (e2, r2) = n.normalize(&second, receive_time());
        assert!(e2.is_some());
        assert!(r2.is_valid);
        assert!(r2.warnings.iter().any(|w| w.class == ErrorClass::TimestampError));
    }

    #[test]
    fn units_canonicalized_and_metadata_extracted() {
        let mut n = Normalizer::new();
        let mut raw = raw_event("sensor.outdoor_temp", Value::String("18.2".into()));
        let attrs = raw.new_state.as_mut().unwrap();
        attrs.attributes.insert("unit_of_measurement".into(), Value::String("°C".into()));
        attrs.attributes.insert("device_class".into(), Value::String("temperature".into()));
        attrs.attributes.insert("friendly_name".into(), Value::String("Outdoor Temp".into()));
        attrs.attributes.insert("not_allowed".into(), Value::String("x".into()));

        let (event, _) = n.normalize(&raw, receive_time());
        let event = event.unwrap();
        assert_eq!(event.metadata.unit_of_measurement.as_deref(), Some("celsius"));
        assert_eq!(event.metadata.device_class.as_deref(), Some("temperature"));
        assert_eq!(event.metadata.friendly_name.as_deref(), Some("Outdoor Temp"));
        assert_eq!(event.domain, "sensor");
        assert!(event.metadata.icon.is_none());
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut n = Normalizer::new();
        let mut raw = raw_event("sensor.outdoor_temp", Value::String("18.2".into()));
        raw.new_state
            .as_mut()
            .unwrap()
            .attributes
            .insert("unit_of_measurement".into(), Value::String("°C".into()));

        let (first, _) = n.normalize(&raw, receive_time());
        let first = first.unwrap();

        let mut n2 = Normalizer::new();
        let (second, _) = n2.normalize(&Normalizer::to_raw(&first), receive_time());
        let second = second.unwrap();

        assert_eq!(first.entity_id, second.entity_id);
        assert_eq!(first.time_fired, second.time_fired);
        assert_eq!(first.state, second.state);
        assert_eq!(first.attributes, second.attributes);
        assert_eq!(first.metadata, second.metadata);
    }
}
