//! Component detection for the automation test harness
//!
//! Finds delay/repeat/time-condition components in a suggestion's
//! description (and anything that leaked into the generated YAML) so the
//! strip step knows what to remove and the restore step what to put back.
//! Exact regexes catch the common phrasings; a token-sort fuzzy matcher at
//! the 0.6 threshold catches variations and typos.

use regex::Regex;
use serde::Serialize;
use serde_yaml::Value;
use std::sync::OnceLock;

use crate::config::validation::levenshtein;

/// Fuzzy acceptance threshold (token-sort ratio).
pub const FUZZY_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    Delay,
    Repeat,
    TimeCondition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    Description,
    Yaml,
}

/// One component that the strip step will remove.
#[derive(Debug, Clone, Serialize)]
pub struct DetectedComponent {
    pub component_type: ComponentType,
    pub original_value: String,
    pub detected_from: DetectionSource,
    pub confidence: f64,
    /// True when this component sits inside a containing component
    /// (a delay inside a detected repeat block).
    pub nested: bool,
}

/// Test-YAML shape: simple single action, or a sequence that must keep its
/// structure through stripping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestMode {
    Simple,
    Sequence,
}

struct PatternBank {
    delay: Vec<Regex>,
    repeat: Vec<Regex>,
    time_condition: Vec<Regex>,
}

fn patterns() -> &'static PatternBank {
    static BANK: OnceLock<PatternBank> = OnceLock::new();
    #[allow(clippy::unwrap_used)]
    BANK.get_or_init(|| PatternBank {
        delay: vec![
            Regex::new(r"(?i)delay[:\s]+['\x22]?\d+(?:\.\d+)?\s*(?:second|sec|secs|minute|min|mins|hour|hr|hrs)").unwrap(),
            Regex::new(r"(?i)wait[:\s]+['\x22]?\d+(?:\.\d+)?\s*(?:second|sec|secs|minute|min|mins|hour|hr|hrs)").unwrap(),
            Regex::new(r"(?i)for[:\s]+['\x22]?\d+(?:\.\d+)?\s*(?:second|sec|secs|minute|min|mins|hour|hr|hrs)").unwrap(),
            Regex::new(r"(?i)every\s+\d+\s*(?:second|sec|secs|minute|min|mins|hour|hr|hrs)").unwrap(),
        ],
        repeat: vec![
            Regex::new(r"(?i)repeat[:\s]+\d+").unwrap(),
            Regex::new(r"(?i)\d+\s*times").unwrap(),
            Regex::new(r"(?i)loop[:\s]+\d+").unwrap(),
            Regex::new(r"(?i)cycle[:\s]+\d+").unwrap(),
            Regex::new(r"(?i)\bflash(?:ing)?\b").unwrap(),
            Regex::new(r"(?i)\bblink(?:ing)?\b").unwrap(),
        ],
        time_condition: vec![
            Regex::new(r"(?i)after[:\s]+\d{1,2}:?\d{0,2}\s*(?:am|pm)?").unwrap(),
            Regex::new(r"(?i)before[:\s]+\d{1,2}:?\d{0,2}\s*(?:am|pm)?").unwrap(),
            Regex::new(r"(?i)\bat[:\s]+\d{1,2}:?\d{0,2}\s*(?:am|pm)?").unwrap(),
            Regex::new(r"(?i)between[:\s]+\d{1,2}:?\d{0,2}\s+and\s+\d{1,2}:?\d{0,2}").unwrap(),
        ],
    })
}

const DELAY_KEYWORDS: &[&str] = &["delay", "wait", "pause", "sleep", "hold"];
const REPEAT_KEYWORDS: &[&str] = &["repeat", "loop", "cycle", "times", "iterations"];
const SPECIAL_TIMES: &[&str] = &["sunset", "sunrise", "dawn", "dusk"];

/// Token-sort ratio: similarity of the two strings after sorting their
/// tokens, on a 0–1 scale.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    let sort_tokens = |s: &str| {
        let mut tokens: Vec<&str> = s
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        tokens.sort_unstable();
        tokens.join(" ").to_ascii_lowercase()
    };
    let left = sort_tokens(a);
    let right = sort_tokens(b);
    let longest = left.len().max(right.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&left, &right) as f64 / longest as f64
}

/// Detect strippable components from the description plus the YAML the
/// generator produced (components sometimes leak through).
pub fn detect_components(description: &str, yaml_text: &str) -> Vec<DetectedComponent> {
    let mut detected = Vec::new();
    detect_from_yaml(yaml_text, &mut detected);
    detect_from_description(description, &mut detected);

    // Dedup on (type, value), keeping the highest-confidence instance.
    let mut unique: Vec<DetectedComponent> = Vec::new();
    for component in detected {
        let key = (
            component.component_type,
            component.original_value.to_ascii_lowercase(),
        );
        match unique.iter_mut().find(|c| {
            (c.component_type, c.original_value.to_ascii_lowercase()) == key
        }) {
            Some(existing) if existing.confidence < component.confidence => {
                *existing = component;
            }
            Some(_) => {}
            None => unique.push(component),
        }
    }

    // Nested classification: a delay alongside a repeat lives inside it.
    let has_repeat = unique
        .iter()
        .any(|c| c.component_type == ComponentType::Repeat);
    if has_repeat {
        for component in &mut unique {
            if component.component_type == ComponentType::Delay {
                component.nested = true;
            }
        }
    }
    unique
}

/// Sequence mode whenever any delay or repeat was detected.
pub fn mode_for(components: &[DetectedComponent]) -> TestMode {
    let sequential = components.iter().any(|c| {
        matches!(
            c.component_type,
            ComponentType::Delay | ComponentType::Repeat
        )
    });
    if sequential {
        TestMode::Sequence
    } else {
        TestMode::Simple
    }
}

fn detect_from_description(description: &str, out: &mut Vec<DetectedComponent>) {
    let lower = description.to_ascii_lowercase();
    let bank = patterns();

    for (regexes, component_type) in [
        (&bank.delay, ComponentType::Delay),
        (&bank.repeat, ComponentType::Repeat),
        (&bank.time_condition, ComponentType::TimeCondition),
    ] {
        for regex in regexes {
            for found in regex.find_iter(&lower) {
                out.push(DetectedComponent {
                    component_type,
                    original_value: found.as_str().to_string(),
                    detected_from: DetectionSource::Description,
                    confidence: 0.95,
                    nested: false,
                });
            }
        }
    }

    for time_ref in SPECIAL_TIMES {
        if lower.contains(time_ref) {
            out.push(DetectedComponent {
                component_type: ComponentType::TimeCondition,
                original_value: (*time_ref).to_string(),
                detected_from: DetectionSource::Description,
                confidence: 0.9,
                nested: false,
            });
        }
    }

    // Fuzzy pass for phrasings the exact patterns miss.
    fuzzy_keyword_scan(&lower, DELAY_KEYWORDS, ComponentType::Delay, out);
    fuzzy_keyword_scan(&lower, REPEAT_KEYWORDS, ComponentType::Repeat, out);
}

fn fuzzy_keyword_scan(
    lower: &str,
    keywords: &[&str],
    component_type: ComponentType,
    out: &mut Vec<DetectedComponent>,
) {
    let reference_phrases: &[&str] = match component_type {
        ComponentType::Delay => &["wait 30 seconds", "delay for 30 seconds", "pause 1 minute"],
        ComponentType::Repeat => &["repeat 3 times", "loop 3 times", "cycle 3"],
        ComponentType::TimeCondition => &[],
    };

    for keyword in keywords {
        let Some(position) = lower.find(keyword) else {
            continue;
        };
        let start = position.saturating_sub(10);
        let end = (position + 50).min(lower.len());
        let context = &lower[start..end];
        if !context.chars().any(|c| c.is_ascii_digit()) {
            continue;
        }

        let best = reference_phrases
            .iter()
            .map(|phrase| token_sort_ratio(context, phrase))
            .fold(0.0_f64, f64::max);
        if best >= FUZZY_THRESHOLD {
            out.push(DetectedComponent {
                component_type,
                original_value: context.trim().to_string(),
                detected_from: DetectionSource::Description,
                // Fuzzy hits carry reduced confidence.
                confidence: best * 0.8,
                nested: false,
            });
        }
    }
}

/// Components that leaked into the generated YAML are certain.
fn detect_from_yaml(yaml_text: &str, out: &mut Vec<DetectedComponent>) {
    let Ok(doc) = serde_yaml::from_str::<Value>(yaml_text) else {
        return;
    };

    if let Some(actions) = doc.get("action").or_else(|| doc.get("actions")) {
        scan_yaml_actions(actions, out);
    }

    let conditions = doc.get("condition").or_else(|| doc.get("conditions"));
    if let Some(Value::Sequence(items)) = conditions {
        for condition in items {
            if condition.get("condition").and_then(Value::as_str) == Some("time") {
                let after = condition.get("after").and_then(Value::as_str);
                let before = condition.get("before").and_then(Value::as_str);
                if after.is_some() || before.is_some() {
                    let value = after.map_or_else(
                        || format!("before={}", before.unwrap_or_default()),
                        |a| format!("after={a}"),
                    );
                    out.push(DetectedComponent {
                        component_type: ComponentType::TimeCondition,
                        original_value: value,
                        detected_from: DetectionSource::Yaml,
                        confidence: 1.0,
                        nested: false,
                    });
                }
            }
        }
    }
}

fn scan_yaml_actions(actions: &Value, out: &mut Vec<DetectedComponent>) {
    let items: Vec<&Value> = match actions {
        Value::Sequence(seq) => seq.iter().collect(),
        mapping @ Value::Mapping(_) => vec![mapping],
        _ => return,
    };

    for action in items {
        if let Some(delay) = action.get("delay") {
            out.push(DetectedComponent {
                component_type: ComponentType::Delay,
                original_value: yaml_scalar_string(delay),
                detected_from: DetectionSource::Yaml,
                confidence: 1.0,
                nested: false,
            });
        }
        if let Some(repeat) = action.get("repeat") {
            let count = repeat
                .get("count")
                .map(yaml_scalar_string)
                .unwrap_or_else(|| "?".to_string());
            out.push(DetectedComponent {
                component_type: ComponentType::Repeat,
                original_value: count,
                detected_from: DetectionSource::Yaml,
                confidence: 1.0,
                nested: false,
            });
            if let Some(sequence) = repeat.get("sequence") {
                scan_yaml_actions(sequence, out);
            }
        }
        if let Some(sequence) = action.get("sequence") {
            scan_yaml_actions(sequence, out);
        }
    }
}

fn yaml_scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => serde_yaml::to_string(other)
            .unwrap_or_default()
            .trim()
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flash_description_detects_all_three_components() {
        let description = "Flash office lights every 30 seconds after 5pm for 10 minutes";
        let components = detect_components(description, "");

        let types: Vec<ComponentType> =
            components.iter().map(|c| c.component_type).collect();
        assert!(types.contains(&ComponentType::Delay), "{components:?}");
        assert!(types.contains(&ComponentType::Repeat), "{components:?}");
        assert!(types.contains(&ComponentType::TimeCondition), "{components:?}");
        assert_eq!(mode_for(&components), TestMode::Sequence);

        // Delay nests inside the detected repeat.
        assert!(components
            .iter()
            .filter(|c| c.component_type == ComponentType::Delay)
            .all(|c| c.nested));
    }

    #[test]
    fn plain_description_is_simple_mode() {
        let components =
            detect_components("Turn on the kitchen light when motion is detected", "");
        assert!(components.is_empty());
        assert_eq!(mode_for(&components), TestMode::Simple);
    }

    #[test]
    fn time_only_description_stays_simple() {
        let components = detect_components("Close the blinds at sunset", "");
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].component_type, ComponentType::TimeCondition);
        assert_eq!(mode_for(&components), TestMode::Simple);
    }

    #[test]
    fn yaml_leaks_are_detected_with_certainty() {
        let yaml = r#"
alias: Leaky
trigger:
  - platform: event
    event_type: test_automation_trigger
condition:
  - condition: time
    after: "17:00:00"
action:
  - delay: "00:00:30"
  - repeat:
      count: 20
      sequence:
        - service: light.toggle
"#;
        let components = detect_components("", yaml);
        assert!(components
            .iter()
            .any(|c| c.component_type == ComponentType::Delay && c.confidence == 1.0));
        assert!(components
            .iter()
            .any(|c| c.component_type == ComponentType::Repeat && c.original_value == "20"));
        assert!(components
            .iter()
            .any(|c| c.component_type == ComponentType::TimeCondition
                && c.original_value.contains("17:00")));
    }

    #[test]
    fn dedup_keeps_highest_confidence() {
        // "wait 30 seconds" matches both the exact regex and the fuzzy scan.
        let components = detect_components("wait 30 seconds then turn off", "");
        let delays: Vec<_> = components
            .iter()
            .filter(|c| c.component_type == ComponentType::Delay)
            .collect();
        assert!(!delays.is_empty());
        assert!(delays.iter().all(|c| c.confidence >= 0.9));
    }

    #[test]
    fn token_sort_ratio_behaviour() {
        assert!(token_sort_ratio("wait 30 seconds", "30 seconds wait") > 0.99);
        assert!(token_sort_ratio("wait around 30 secondz", "wait 30 seconds") > FUZZY_THRESHOLD);
        assert!(token_sort_ratio("unrelated text", "wait 30 seconds") < FUZZY_THRESHOLD);
    }
}
