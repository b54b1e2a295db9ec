//! Device capability parser
//!
//! Universal parsing of the hub's Zigbee2MQTT-style `exposes` format into a
//! typed capability map. Works across manufacturers: composite exposes
//! (light/switch/climate) collapse into one control capability, while
//! enum/numeric/binary exposes become individually named capabilities.
//! Malformed entries are skipped; unknown types are logged at debug.

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::types::{Capability, CapabilityKind, Complexity};

/// Hub-native name → friendly name aliases that the mechanical
/// camelCase→snake_case rule cannot produce.
const NAME_ALIASES: &[(&str, &str)] = &[
    ("smartBulbMode", "smart_bulb_mode"),
    ("autoTimerOff", "auto_off_timer"),
    ("led_effect", "led_notifications"),
    ("LEDWhenOn", "led_when_on"),
    ("powerOnBehavior", "power_on_behavior"),
];

/// Parse one `exposes` array into a capability map keyed by friendly name.
pub fn parse_exposes(exposes: &[Value]) -> BTreeMap<String, Capability> {
    let mut capabilities = BTreeMap::new();

    for expose in exposes {
        let Value::Object(obj) = expose else {
            debug!("skipping non-object expose entry");
            continue;
        };
        let Some(expose_type) = obj.get("type").and_then(Value::as_str) else {
            debug!("skipping expose without a type");
            continue;
        };

        match expose_type {
            "light" | "switch" | "climate" => {
                let features: Vec<String> = obj
                    .get("features")
                    .and_then(Value::as_array)
                    .map(|fs| {
                        fs.iter()
                            .filter_map(|f| f.get("name").and_then(Value::as_str))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();

                let (name, kind, complexity) = match expose_type {
                    "light" => ("light_control", CapabilityKind::Composite, composite_complexity(&features)),
                    "climate" => ("climate_control", CapabilityKind::Composite, Complexity::Medium),
                    // A bare switch has no features worth enumerating.
                    _ => ("switch_control", CapabilityKind::Binary, Complexity::Easy),
                };

                capabilities.insert(
                    name.to_string(),
                    Capability {
                        kind,
                        source_name: None,
                        features,
                        values: Vec::new(),
                        min: None,
                        max: None,
                        unit: None,
                        value_on: None,
                        value_off: None,
                        complexity,
                    },
                );
            }
            "enum" => {
                let Some(source_name) = obj.get("name").and_then(Value::as_str) else {
                    debug!("skipping enum expose without a name");
                    continue;
                };
                let values: Vec<String> = obj
                    .get("values")
                    .and_then(Value::as_array)
                    .map(|vs| {
                        vs.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();

                capabilities.insert(
                    map_source_to_friendly(source_name),
                    Capability {
                        kind: CapabilityKind::Enum,
                        source_name: Some(source_name.to_string()),
                        features: Vec::new(),
                        values,
                        min: None,
                        max: None,
                        unit: None,
                        value_on: None,
                        value_off: None,
                        complexity: assess_complexity(source_name),
                    },
                );
            }
            "numeric" => {
                let Some(source_name) = obj.get("name").and_then(Value::as_str) else {
                    debug!("skipping numeric expose without a name");
                    continue;
                };
                capabilities.insert(
                    map_source_to_friendly(source_name),
                    Capability {
                        kind: CapabilityKind::Numeric,
                        source_name: Some(source_name.to_string()),
                        features: Vec::new(),
                        values: Vec::new(),
                        min: obj.get("value_min").and_then(Value::as_f64),
                        max: obj.get("value_max").and_then(Value::as_f64),
                        unit: obj.get("unit").and_then(Value::as_str).map(str::to_string),
                        value_on: None,
                        value_off: None,
                        complexity: assess_complexity(source_name),
                    },
                );
            }
            "binary" => {
                let Some(source_name) = obj.get("name").and_then(Value::as_str) else {
                    debug!("skipping binary expose without a name");
                    continue;
                };
                capabilities.insert(
                    map_source_to_friendly(source_name),
                    Capability {
                        kind: CapabilityKind::Binary,
                        source_name: Some(source_name.to_string()),
                        features: Vec::new(),
                        values: Vec::new(),
                        min: None,
                        max: None,
                        unit: None,
                        value_on: obj.get("value_on").cloned(),
                        value_off: obj.get("value_off").cloned(),
                        complexity: assess_complexity(source_name),
                    },
                );
            }
            other => {
                debug!(expose_type = other, "skipping unknown expose type");
            }
        }
    }

    capabilities
}

/// Map a hub-native feature name to its friendly snake_case form: alias
/// table first, mechanical conversion otherwise.
pub fn map_source_to_friendly(source_name: &str) -> String {
    for (from, to) in NAME_ALIASES {
        if *from == source_name {
            return (*to).to_string();
        }
    }
    camel_to_snake(source_name)
}

/// Mechanical camelCase → snake_case. Runs of capitals collapse into one
/// word (`LEDWhenOn` → `led_when_on`).
fn camel_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let chars: Vec<char> = name.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev_lower = i > 0 && chars[i - 1].is_ascii_lowercase();
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            let prev_upper = i > 0 && chars[i - 1].is_ascii_uppercase();
            if prev_lower || (prev_upper && next_lower) {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Feature complexity heuristic, matched against the hub-native name.
pub fn assess_complexity(name: &str) -> Complexity {
    let lower = name.to_ascii_lowercase();
    if ["effect", "transition", "calibration"]
        .iter()
        .any(|k| lower.contains(k))
    {
        Complexity::Advanced
    } else if ["timer", "delay", "threshold"].iter().any(|k| lower.contains(k)) {
        Complexity::Medium
    } else {
        Complexity::Easy
    }
}

/// Composite light complexity: plain on/off is easy, color/effects advanced
/// features push it up.
fn composite_complexity(features: &[String]) -> Complexity {
    if features.iter().any(|f| assess_complexity(f) == Complexity::Advanced) {
        Complexity::Advanced
    } else if features.len() > 2 {
        Complexity::Medium
    } else {
        Complexity::Easy
    }
}
