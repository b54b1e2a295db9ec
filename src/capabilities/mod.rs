//! Capability Store
//!
//! Maintains the `model → capabilities` index derived from the hub's
//! device-list broadcast. Single writer (the session manager's device-list
//! handler), many readers. Refreshes swap a whole new map in atomically via
//! `arc-swap`, so readers never observe a partially-built index and hold no
//! references across refresh boundaries.

pub mod parser;

use arc_swap::ArcSwap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::types::DeviceCapabilities;

pub use parser::{assess_complexity, map_source_to_friendly, parse_exposes};

type CapabilityIndex = HashMap<String, Arc<DeviceCapabilities>>;

/// Copy-on-refresh capability index keyed by device model.
pub struct CapabilityStore {
    index: ArcSwap<CapabilityIndex>,
    /// entity_id → device model, populated from the entity registry.
    entity_models: ArcSwap<HashMap<String, String>>,
}

impl Default for CapabilityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityStore {
    pub fn new() -> Self {
        Self {
            index: ArcSwap::from_pointee(HashMap::new()),
            entity_models: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Rebuild the whole index from a device-list broadcast. Devices whose
    /// `exposes` are missing or empty are indexed with no capabilities so
    /// lookups still resolve manufacturer/model.
    pub fn refresh_from_device_list(&self, devices: &[Value]) {
        let mut next: CapabilityIndex = HashMap::with_capacity(devices.len());

        for device in devices {
            let Some(model) = device.get("model").and_then(Value::as_str) else {
                debug!("skipping device entry without a model");
                continue;
            };
            let manufacturer = device
                .get("manufacturer")
                .and_then(Value::as_str)
                .map(str::to_string);
            let exposes = device
                .get("exposes")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            let capabilities = parser::parse_exposes(&exposes);
            next.insert(
                model.to_string(),
                Arc::new(DeviceCapabilities {
                    manufacturer,
                    model: model.to_string(),
                    capabilities,
                }),
            );
        }

        let count = next.len();
        self.index.store(Arc::new(next));
        info!(models = count, "capability index refreshed");
    }

    /// Update the entity → model mapping from the entity registry payload.
    pub fn refresh_entity_models(&self, entities: &[Value]) {
        let mut next = HashMap::with_capacity(entities.len());
        for entity in entities {
            let (Some(entity_id), Some(model)) = (
                entity.get("entity_id").and_then(Value::as_str),
                entity
                    .get("model")
                    .or_else(|| entity.get("device_model"))
                    .and_then(Value::as_str),
            ) else {
                continue;
            };
            next.insert(entity_id.to_string(), model.to_string());
        }
        let count = next.len();
        self.entity_models.store(Arc::new(next));
        debug!(entities = count, "entity-model map refreshed");
    }

    /// Capabilities for a device model. The returned Arc is a snapshot;
    /// callers must not cache it across refreshes.
    pub fn for_model(&self, model: &str) -> Option<Arc<DeviceCapabilities>> {
        self.index.load().get(model).cloned()
    }

    /// Capabilities for an entity, resolved through the entity-model map.
    pub fn for_entity(&self, entity_id: &str) -> Option<Arc<DeviceCapabilities>> {
        let model = self.entity_models.load().get(entity_id)?.clone();
        self.for_model(&model)
    }

    /// JSON snapshot of capabilities for a set of entities, frozen into
    /// suggestions at creation time.
    pub fn snapshot_for_entities(&self, entity_ids: &[&str]) -> Value {
        let mut snapshot = serde_json::Map::new();
        for entity_id in entity_ids {
            if let Some(caps) = self.for_entity(entity_id) {
                if let Ok(value) = serde_json::to_value(caps.as_ref()) {
                    snapshot.insert((*entity_id).to_string(), value);
                }
            }
        }
        Value::Object(snapshot)
    }

    pub fn model_count(&self) -> usize {
        self.index.load().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn device_list() -> Vec<Value> {
        vec![
            json!({
                "manufacturer": "Inovelli",
                "model": "VZM31-SN",
                "exposes": [
                    {"type": "light", "features": [{"name": "state"}, {"name": "brightness"}]},
                    {"type": "enum", "name": "smartBulbMode", "values": ["Disabled", "Enabled"]},
                    {"type": "numeric", "name": "autoTimerOff", "value_min": 0, "value_max": 32767, "unit": "seconds"}
                ]
            }),
            json!({
                "manufacturer": "Aqara",
                "model": "MCCGQ11LM",
                "exposes": [
                    {"type": "binary", "name": "contact", "value_on": "open", "value_off": "close"},
                    {"type": "numeric", "name": "battery", "unit": "%", "value_min": 0, "value_max": 100}
                ]
            }),
            json!({
                "manufacturer": "IKEA",
                "model": "LED1624G9",
                "exposes": [
                    {"type": "light", "features": [{"name": "state"}, {"name": "brightness"}, {"name": "color_temp"}]},
                    {"type": "enum", "name": "effect", "values": ["blink", "breathe"]}
                ]
            }),
        ]
    }

    #[test]
    fn multi_manufacturer_refresh() {
        let store = CapabilityStore::new();
        store.refresh_from_device_list(&device_list());

        assert_eq!(store.model_count(), 3);
        assert_eq!(store.for_model("VZM31-SN").unwrap().capabilities.len(), 3);
        assert_eq!(store.for_model("MCCGQ11LM").unwrap().capabilities.len(), 2);
        assert_eq!(store.for_model("LED1624G9").unwrap().capabilities.len(), 2);
    }

    #[test]
    fn refresh_replaces_whole_index() {
        let store = CapabilityStore::new();
        store.refresh_from_device_list(&device_list());
        assert_eq!(store.model_count(), 3);

        store.refresh_from_device_list(&[json!({
            "manufacturer": "Aqara", "model": "MCCGQ11LM",
            "exposes": [{"type": "binary", "name": "contact", "value_on": "open", "value_off": "close"}]
        })]);
        assert_eq!(store.model_count(), 1);
        assert!(store.for_model("VZM31-SN").is_none());
    }

    #[test]
    fn entity_resolution_through_registry() {
        let store = CapabilityStore::new();
        store.refresh_from_device_list(&device_list());
        store.refresh_entity_models(&[
            json!({"entity_id": "light.office", "model": "VZM31-SN"}),
        ]);

        let caps = store.for_entity("light.office").unwrap();
        assert_eq!(caps.model, "VZM31-SN");
        assert!(store.for_entity("light.unknown").is_none());

        let snapshot = store.snapshot_for_entities(&["light.office", "light.unknown"]);
        assert!(snapshot.get("light.office").is_some());
        assert!(snapshot.get("light.unknown").is_none());
    }
}
