//! Prompt construction for suggestion generation
//!
//! Prompts are description-first: the oracle is asked for a short plain-
//! language automation idea, never YAML, at this stage. YAML synthesis has
//! its own prompt used at approval time.

use serde_json::Value;

use crate::types::{Pattern, PatternSubject, PatternType};

pub const DESCRIPTION_SYSTEM: &str = "You are a home-automation assistant. \
Given a detected behavioral pattern and the device's capabilities, describe \
one useful automation in two sentences of plain language. Do not write YAML. \
Do not mention pattern confidence or internal identifiers.";

pub const YAML_SYSTEM: &str = "You are a home-automation engineer. Convert \
the automation description into a single Home Assistant automation YAML \
document with alias, trigger, condition (optional), and action. Return \
exactly one YAML document and nothing else.";

pub const REFINE_SYSTEM: &str = "You are a home-automation assistant \
refining an automation description based on user feedback. Return the \
revised description only, in plain language, without YAML.";

/// Build the description prompt for one pattern + capability snapshot.
/// `simple_controls` lists the easy/medium capabilities of the involved
/// devices so the oracle leans on controls a homeowner can actually use.
pub fn description_prompt(
    pattern: &Pattern,
    capabilities: &Value,
    simple_controls: &[String],
) -> String {
    let mut prompt = String::new();
    prompt.push_str(&pattern_summary(pattern));
    prompt.push('\n');

    if capabilities.as_object().is_some_and(|o| !o.is_empty()) {
        prompt.push_str("Device capabilities:\n");
        prompt.push_str(&serde_json::to_string_pretty(capabilities).unwrap_or_default());
        prompt.push('\n');
    }
    if !simple_controls.is_empty() {
        prompt.push_str(&format!(
            "Prefer these straightforward controls: {}.\n",
            simple_controls.join(", ")
        ));
    }

    prompt.push_str("Describe one automation a homeowner would want from this pattern.");
    prompt
}

/// Build the YAML synthesis prompt for an approved description.
pub fn yaml_prompt(description: &str, capabilities: &Value) -> String {
    let mut prompt = format!("Automation description:\n{description}\n");
    if capabilities.as_object().is_some_and(|o| !o.is_empty()) {
        prompt.push_str("\nDevice capabilities (use supported features only):\n");
        prompt.push_str(&serde_json::to_string_pretty(capabilities).unwrap_or_default());
        prompt.push('\n');
    }
    prompt
}

/// Build the refinement prompt.
pub fn refine_prompt(current_description: &str, feedback: &str) -> String {
    format!(
        "Current description:\n{current_description}\n\nUser feedback:\n{feedback}\n\nRevise the description accordingly."
    )
}

/// Human-readable pattern summary used in prompts and fallback templates.
pub fn pattern_summary(pattern: &Pattern) -> String {
    match (&pattern.pattern_type, &pattern.subject) {
        (PatternType::TimeOfDay, PatternSubject::Device(device)) => {
            let hour = pattern.metadata.get("hour").and_then(Value::as_u64).unwrap_or(0);
            let minute = pattern.metadata.get("minute").and_then(Value::as_u64).unwrap_or(0);
            format!(
                "Pattern: {device} is used around {hour:02}:{minute:02} ({} occurrences).",
                pattern.occurrences
            )
        }
        (PatternType::CoOccurrence, PatternSubject::DevicePair { device1, device2 }) => {
            let delta = pattern
                .metadata
                .get("avg_time_delta_seconds")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            format!(
                "Pattern: {device1} and {device2} fire together, about {delta:.0} seconds apart ({} occurrences).",
                pattern.occurrences
            )
        }
        (PatternType::Sequence, PatternSubject::Sequence(chain)) => {
            format!(
                "Pattern: the routine {} repeats ({} occurrences).",
                chain.join(" → "),
                pattern.occurrences
            )
        }
        (PatternType::Contextual, PatternSubject::Device(device)) => {
            let context = pattern
                .metadata
                .get("context_key")
                .and_then(Value::as_str)
                .unwrap_or("a specific context");
            format!("Pattern: {device} activity concentrates in context [{context}].")
        }
        (PatternType::Duration, PatternSubject::Device(device)) => {
            let avg = pattern
                .metadata
                .get("avg_duration_seconds")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            format!(
                "Pattern: {device} stays in state '{}' for about {:.0} minutes.",
                pattern.metadata.get("state").and_then(Value::as_str).unwrap_or("?"),
                avg / 60.0
            )
        }
        (PatternType::Anomaly, PatternSubject::Device(device)) => {
            format!(
                "Pattern: unusual activity on {device} ({}).",
                pattern
                    .metadata
                    .get("anomaly_type")
                    .and_then(Value::as_str)
                    .unwrap_or("anomaly")
            )
        }
        (_, subject) => format!(
            "Pattern of type {} on {:?} ({} occurrences).",
            pattern.pattern_type, subject, pattern.occurrences
        ),
    }
}

/// Deterministic description used when the oracle is unavailable. A pattern
/// is never left unsuggested because the LLM failed.
pub fn template_description(pattern: &Pattern) -> String {
    match (&pattern.pattern_type, &pattern.subject) {
        (PatternType::TimeOfDay, PatternSubject::Device(device)) => {
            let hour = pattern.metadata.get("hour").and_then(Value::as_u64).unwrap_or(0);
            let minute = pattern.metadata.get("minute").and_then(Value::as_u64).unwrap_or(0);
            format!("Turn on {device} automatically at {hour:02}:{minute:02}, matching your usual routine.")
        }
        (PatternType::CoOccurrence, PatternSubject::DevicePair { device1, device2 }) => {
            format!("When {device1} activates, also activate {device2} — they are almost always used together.")
        }
        (PatternType::Sequence, PatternSubject::Sequence(chain)) => {
            format!(
                "Run the routine {} as one automation triggered by the first step.",
                chain.join(" → ")
            )
        }
        (PatternType::Duration, PatternSubject::Device(device)) => {
            let avg = pattern
                .metadata
                .get("avg_duration_seconds")
                .and_then(Value::as_f64)
                .unwrap_or(600.0);
            format!(
                "Turn off {device} automatically after {:.0} minutes, its typical usage time.",
                (avg / 60.0).max(1.0)
            )
        }
        (PatternType::Contextual, PatternSubject::Device(device)) => {
            format!("Automate {device} based on the weather and presence conditions it usually follows.")
        }
        (PatternType::Anomaly, PatternSubject::Device(device)) => {
            format!("Notify when {device} shows unusual activity compared to its normal schedule.")
        }
        (_, subject) => format!("Automate {:?} based on its detected usage pattern.", subject),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn time_pattern() -> Pattern {
        Pattern::new(
            PatternType::TimeOfDay,
            PatternSubject::Device("light.bedroom".into()),
            Some("c0"),
            0.9,
            20,
            json!({"hour": 7, "minute": 0}),
            Utc::now(),
            Utc::now(),
        )
    }

    #[test]
    fn description_prompt_mentions_pattern_and_capabilities() {
        let caps = json!({"light.bedroom": {"capabilities": {"light_control": {}}}});
        let controls = vec!["light_control".to_string(), "auto_off_timer".to_string()];
        let prompt = description_prompt(&time_pattern(), &caps, &controls);
        assert!(prompt.contains("light.bedroom"));
        assert!(prompt.contains("07:00"));
        assert!(prompt.contains("light_control"));
        assert!(prompt.contains("auto_off_timer"));
        assert!(!prompt.to_lowercase().contains("yaml"));
    }

    #[test]
    fn empty_control_list_adds_no_preference_line() {
        let prompt = description_prompt(&time_pattern(), &json!({}), &[]);
        assert!(!prompt.contains("straightforward controls"));
    }

    #[test]
    fn template_fallback_is_specific() {
        let description = template_description(&time_pattern());
        assert!(description.contains("light.bedroom"));
        assert!(description.contains("07:00"));
    }

    #[test]
    fn co_occurrence_template_names_both_devices() {
        let pattern = Pattern::new(
            PatternType::CoOccurrence,
            PatternSubject::pair("light.hall", "binary_sensor.motion_hall"),
            None,
            1.0,
            5,
            json!({"avg_time_delta_seconds": 19.0}),
            Utc::now(),
            Utc::now(),
        );
        let text = template_description(&pattern);
        assert!(text.contains("light.hall"));
        assert!(text.contains("binary_sensor.motion_hall"));
    }
}
