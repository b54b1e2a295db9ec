//! Device capability model
//!
//! Capabilities are parsed from the hub's device-list broadcast (the
//! Zigbee2MQTT-style `exposes` format) into a per-model map of named,
//! typed, complexity-rated features.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Shape of a capability's value space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Multiple features under one control surface (light, switch, climate).
    Composite,
    Enum,
    Numeric,
    Binary,
}

/// How hard a capability is to use correctly in an automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Easy,
    Medium,
    Advanced,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Complexity::Easy => write!(f, "easy"),
            Complexity::Medium => write!(f, "medium"),
            Complexity::Advanced => write!(f, "advanced"),
        }
    }
}

/// One named capability of a device model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub kind: CapabilityKind,
    /// Hub-native name before friendly mapping (e.g. `smartBulbMode`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    /// Feature names for composite capabilities.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
    /// Allowed values for enum capabilities.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_on: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_off: Option<Value>,
    pub complexity: Complexity,
}

impl Capability {
    pub fn composite(features: Vec<String>, complexity: Complexity) -> Self {
        Self {
            kind: CapabilityKind::Composite,
            source_name: None,
            features,
            values: Vec::new(),
            min: None,
            max: None,
            unit: None,
            value_on: None,
            value_off: None,
            complexity,
        }
    }
}

/// All capabilities of one device model, keyed by friendly capability name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    #[serde(default)]
    pub manufacturer: Option<String>,
    pub model: String,
    pub capabilities: BTreeMap<String, Capability>,
}

impl DeviceCapabilities {
    /// Capabilities at or below the given complexity, cheapest first.
    pub fn up_to_complexity(&self, max: Complexity) -> Vec<(&str, &Capability)> {
        let mut caps: Vec<(&str, &Capability)> = self
            .capabilities
            .iter()
            .filter(|(_, c)| c.complexity <= max)
            .map(|(name, c)| (name.as_str(), c))
            .collect();
        caps.sort_by_key(|(_, c)| c.complexity);
        caps
    }
}
