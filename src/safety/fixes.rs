//! Structural auto-fixes for automation YAML
//!
//! A limited normalizer for the mistakes LLM-generated YAML makes most:
//! plural section keys, `trigger:` where `platform:` belongs, `action:`
//! where `service:` belongs, and manufacturer-specific services that should
//! use the generic light domain (`wled.* → light.*`).

use serde_yaml::{Mapping, Value};
use tracing::debug;

/// Result of a fix pass: the (possibly rewritten) YAML plus what changed.
#[derive(Debug, Clone)]
pub struct FixOutcome {
    pub yaml: String,
    pub fixes_applied: Vec<String>,
}

impl FixOutcome {
    pub fn changed(&self) -> bool {
        !self.fixes_applied.is_empty()
    }
}

/// Apply the structural fixer. Unparseable input comes back untouched; the
/// safety validator reports the syntax error separately.
pub fn apply_structural_fixes(yaml_text: &str) -> FixOutcome {
    let Ok(mut doc) = serde_yaml::from_str::<Value>(yaml_text) else {
        return FixOutcome {
            yaml: yaml_text.to_string(),
            fixes_applied: Vec::new(),
        };
    };

    let mut fixes = Vec::new();

    if let Value::Mapping(map) = &mut doc {
        rename_plural_key(map, "triggers", "trigger", &mut fixes);
        rename_plural_key(map, "conditions", "condition", &mut fixes);
        rename_plural_key(map, "actions", "action", &mut fixes);
    }

    if let Some(triggers) = doc.get_mut("trigger") {
        fix_trigger_items(triggers, &mut fixes);
    }
    if let Some(actions) = doc.get_mut("action") {
        fix_action_tree(actions, &mut fixes);
    }

    if fixes.is_empty() {
        return FixOutcome {
            yaml: yaml_text.to_string(),
            fixes_applied: fixes,
        };
    }

    let yaml = serde_yaml::to_string(&doc).unwrap_or_else(|_| yaml_text.to_string());
    for fix in &fixes {
        debug!(fix = %fix, "structural fix applied");
    }
    FixOutcome {
        yaml,
        fixes_applied: fixes,
    }
}

fn rename_plural_key(map: &mut Mapping, plural: &str, singular: &str, fixes: &mut Vec<String>) {
    let plural_key = Value::String(plural.to_string());
    let singular_key = Value::String(singular.to_string());
    if map.contains_key(&plural_key) && !map.contains_key(&singular_key) {
        if let Some(value) = map.remove(&plural_key) {
            map.insert(singular_key, value);
            fixes.push(format!("{plural}: → {singular}:"));
        }
    }
}

/// `trigger: state` inside a trigger item means `platform: state`.
fn fix_trigger_items(triggers: &mut Value, fixes: &mut Vec<String>) {
    let items: Vec<&mut Value> = match triggers {
        Value::Sequence(seq) => seq.iter_mut().collect(),
        item @ Value::Mapping(_) => vec![item],
        _ => return,
    };

    for item in items {
        let Value::Mapping(map) = item else { continue };
        let trigger_key = Value::String("trigger".to_string());
        let platform_key = Value::String("platform".to_string());
        let is_platform_name = map
            .get(&trigger_key)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.contains('.'));
        if is_platform_name && !map.contains_key(&platform_key) {
            if let Some(value) = map.remove(&trigger_key) {
                map.insert(platform_key, value);
                fixes.push("trigger: <platform> → platform: <platform>".to_string());
            }
        }
    }
}

/// Walk the action tree fixing `action:` keys and wled services.
fn fix_action_tree(actions: &mut Value, fixes: &mut Vec<String>) {
    match actions {
        Value::Sequence(seq) => {
            for item in seq {
                fix_action_item(item, fixes);
            }
        }
        item @ Value::Mapping(_) => fix_action_item(item, fixes),
        _ => {}
    }
}

fn fix_action_item(item: &mut Value, fixes: &mut Vec<String>) {
    let Value::Mapping(map) = item else { return };

    // `action: domain.service` → `service: domain.service`.
    let action_key = Value::String("action".to_string());
    let service_key = Value::String("service".to_string());
    let is_service_name = map
        .get(&action_key)
        .and_then(Value::as_str)
        .is_some_and(|s| s.contains('.'));
    if is_service_name && !map.contains_key(&service_key) {
        if let Some(value) = map.remove(&action_key) {
            map.insert(service_key.clone(), value);
            fixes.push("action: <service> → service: <service>".to_string());
        }
    }

    // WLED entities are driven through the light domain.
    if let Some(Value::String(service)) = map.get_mut(&service_key) {
        if let Some(rest) = service.strip_prefix("wled.") {
            let fixed = format!("light.{rest}");
            fixes.push(format!("{service} → {fixed}"));
            *service = fixed;
        }
    }

    // Recurse into nested structures.
    for key in ["sequence", "repeat", "choose", "default", "then", "else"] {
        let nested_key = Value::String(key.to_string());
        if let Some(nested) = map.get_mut(&nested_key) {
            fix_action_tree(nested, fixes);
        }
    }
}
