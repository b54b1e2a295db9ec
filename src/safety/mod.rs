//! Safety Validator
//!
//! Rule-based policy engine over automation YAML. Six rule families produce
//! issues with severities; the score starts at 100 and loses 30 per
//! critical, 10 per warning, 2 per info. Passing requires zero criticals
//! and a score at or above the level threshold. Overrides are blocked only
//! for destructive system actions.

pub mod fixes;

use serde_yaml::Value;
use tracing::debug;

use crate::types::{SafetyIssue, SafetyLevel, SafetyReport, SafetySeverity};

pub use fixes::{apply_structural_fixes, FixOutcome};

/// Safe setpoint band in °F.
const CLIMATE_MIN_F: f64 = 55.0;
const CLIMATE_MAX_F: f64 = 85.0;

/// Entity-id fragments that mark security equipment.
const SECURITY_FRAGMENTS: &[&str] = &["alarm", "security", "lock", "camera"];

/// System services that are never allowed in generated automations.
const DESTRUCTIVE_SYSTEM_SERVICES: &[&str] = &[
    "homeassistant.restart",
    "homeassistant.stop",
    "recorder.purge",
    "recorder.disable",
    "hassio.host_reboot",
    "hassio.host_shutdown",
];

pub struct SafetyValidator {
    level: SafetyLevel,
    bulk_entity_width: usize,
}

impl SafetyValidator {
    pub fn new(level: SafetyLevel, bulk_entity_width: usize) -> Self {
        Self {
            level,
            bulk_entity_width,
        }
    }

    /// Validate one automation YAML document.
    pub fn validate(&self, yaml_text: &str) -> SafetyReport {
        let doc: Value = match serde_yaml::from_str(yaml_text) {
            Ok(doc) => doc,
            Err(e) => {
                return SafetyReport {
                    passed: false,
                    safety_score: 0,
                    issues: vec![SafetyIssue {
                        rule: "yaml_syntax".to_string(),
                        severity: SafetySeverity::Critical,
                        message: format!("YAML does not parse: {e}"),
                        suggested_fix: None,
                    }],
                    can_override: false,
                    summary: "❌ Automation YAML is not valid".to_string(),
                };
            }
        };

        let mut issues = Vec::new();
        let triggers = section_items(&doc, "trigger", "triggers");
        let conditions = section_items(&doc, "condition", "conditions");
        let actions = collect_service_calls(&section_items(&doc, "action", "actions"));
        let time_constrained = has_time_constraint(&triggers, &conditions);

        for action in &actions {
            self.check_climate_extremes(action, &mut issues);
            self.check_bulk_device_off(action, time_constrained, &mut issues);
            self.check_security_disable(action, &mut issues);
            self.check_time_constraints(action, time_constrained, &mut issues);
            self.check_destructive_system(action, &mut issues);
        }
        self.check_excessive_triggers(&triggers, &mut issues);

        self.report(issues)
    }

    fn report(&self, issues: Vec<SafetyIssue>) -> SafetyReport {
        let criticals = issues
            .iter()
            .filter(|i| i.severity == SafetySeverity::Critical)
            .count() as u32;
        let warnings = issues
            .iter()
            .filter(|i| i.severity == SafetySeverity::Warning)
            .count() as u32;
        let infos = issues
            .iter()
            .filter(|i| i.severity == SafetySeverity::Info)
            .count() as u32;

        let safety_score = 100i64 - 30 * i64::from(criticals) - 10 * i64::from(warnings)
            - 2 * i64::from(infos);
        let safety_score = safety_score.clamp(0, 100) as u32;

        let passed = criticals == 0 && safety_score >= self.level.threshold();
        let can_override = !issues.iter().any(|i| {
            i.severity == SafetySeverity::Critical && i.rule == "destructive_actions"
        });

        let summary = if passed {
            format!("✅ Safe to deploy (score {safety_score}/100)")
        } else {
            format!(
                "❌ Blocked: {criticals} critical, {warnings} warning issue(s), score {safety_score}/100"
            )
        };
        debug!(score = safety_score, passed, "safety validation complete");

        SafetyReport {
            passed,
            safety_score,
            issues,
            can_override,
            summary,
        }
    }

    // Rule 1: climate extremes.
    fn check_climate_extremes(&self, action: &ServiceCall, issues: &mut Vec<SafetyIssue>) {
        if action.service != "climate.set_temperature" {
            return;
        }
        let Some(temperature) = action.data_number("temperature") else {
            return;
        };
        if !(CLIMATE_MIN_F..=CLIMATE_MAX_F).contains(&temperature) {
            issues.push(SafetyIssue {
                rule: "climate_extremes".to_string(),
                severity: SafetySeverity::Critical,
                message: format!(
                    "Setpoint {temperature} is outside the safe band ({CLIMATE_MIN_F}-{CLIMATE_MAX_F} °F)"
                ),
                suggested_fix: Some("Clamp the setpoint to a livable range".to_string()),
            });
        }
    }

    // Rule 2: bulk shutoff. `area_id: all` with a destructive service is
    // critical at every level; wide lists are critical when unconstrained.
    fn check_bulk_device_off(
        &self,
        action: &ServiceCall,
        time_constrained: bool,
        issues: &mut Vec<SafetyIssue>,
    ) {
        if !action.service.ends_with(".turn_off") {
            return;
        }
        if action.targets_all_areas() {
            issues.push(SafetyIssue {
                rule: "bulk_device_off".to_string(),
                severity: SafetySeverity::Critical,
                message: format!("{} targets ALL areas", action.service),
                suggested_fix: Some("Target specific areas or entities".to_string()),
            });
            return;
        }
        if action.target_width() > self.bulk_entity_width && !time_constrained {
            issues.push(SafetyIssue {
                rule: "bulk_device_off".to_string(),
                severity: SafetySeverity::Critical,
                message: format!(
                    "{} targets {} devices with no time constraint",
                    action.service,
                    action.target_width()
                ),
                suggested_fix: Some("Add a time condition or narrow the target".to_string()),
            });
        }
    }

    // Rule 3: security equipment disable.
    fn check_security_disable(&self, action: &ServiceCall, issues: &mut Vec<SafetyIssue>) {
        if !action.service.ends_with(".turn_off") && action.service != "lock.unlock" {
            return;
        }
        for entity_id in action.target_entities() {
            let lower = entity_id.to_ascii_lowercase();
            if SECURITY_FRAGMENTS.iter().any(|f| lower.contains(f)) {
                issues.push(SafetyIssue {
                    rule: "security_disable".to_string(),
                    severity: SafetySeverity::Critical,
                    message: format!("{} disables security entity {entity_id}", action.service),
                    suggested_fix: None,
                });
            }
        }
    }

    // Rule 4: destructive action over a broad target without a time anchor.
    fn check_time_constraints(
        &self,
        action: &ServiceCall,
        time_constrained: bool,
        issues: &mut Vec<SafetyIssue>,
    ) {
        if time_constrained {
            return;
        }
        let destructive =
            action.service.ends_with(".turn_off") || action.service == "cover.close_cover";
        if !destructive {
            return;
        }
        let broad = action.has_area_target() || action.target_width() > 1;
        if broad {
            issues.push(SafetyIssue {
                rule: "time_constraints".to_string(),
                severity: SafetySeverity::Warning,
                message: format!(
                    "{} affects a broad target with no time condition or sun trigger",
                    action.service
                ),
                suggested_fix: Some("Add a time condition or a sun trigger".to_string()),
            });
        }
    }

    // Rule 5: high-frequency triggers without debounce.
    fn check_excessive_triggers(&self, triggers: &[Value], issues: &mut Vec<SafetyIssue>) {
        for trigger in triggers {
            let platform = string_at(trigger, "platform");
            if platform.as_deref() != Some("time_pattern") {
                continue;
            }
            let minutes = string_at(trigger, "minutes");
            let every_minute = matches!(minutes.as_deref(), Some("*") | Some("/1"));
            let has_debounce = trigger.get("for").is_some();
            if every_minute && !has_debounce {
                issues.push(SafetyIssue {
                    rule: "excessive_triggers".to_string(),
                    severity: SafetySeverity::Warning,
                    message: "time_pattern fires every minute with no debounce".to_string(),
                    suggested_fix: Some("Widen the interval or add a for: duration".to_string()),
                });
            }
        }
    }

    // Rule 6: destructive system services. Never overridable.
    fn check_destructive_system(&self, action: &ServiceCall, issues: &mut Vec<SafetyIssue>) {
        if DESTRUCTIVE_SYSTEM_SERVICES.contains(&action.service.as_str()) {
            issues.push(SafetyIssue {
                rule: "destructive_actions".to_string(),
                severity: SafetySeverity::Critical,
                message: format!("{} is a destructive system action", action.service),
                suggested_fix: None,
            });
        }
    }
}

// ============================================================================
// YAML Walking Helpers
// ============================================================================

/// One service call found anywhere in the action tree.
struct ServiceCall {
    service: String,
    target: Option<Value>,
    data: Option<Value>,
}

impl ServiceCall {
    fn data_number(&self, key: &str) -> Option<f64> {
        self.data.as_ref()?.get(key)?.as_f64()
    }

    fn targets_all_areas(&self) -> bool {
        let Some(target) = &self.target else {
            return false;
        };
        match target.get("area_id") {
            Some(Value::String(s)) => s == "all",
            Some(Value::Sequence(seq)) => seq.iter().any(|v| v.as_str() == Some("all")),
            _ => false,
        }
    }

    fn has_area_target(&self) -> bool {
        self.target
            .as_ref()
            .is_some_and(|t| t.get("area_id").is_some())
    }

    /// How many entities/areas the action touches.
    fn target_width(&self) -> usize {
        let Some(target) = &self.target else {
            return 0;
        };
        let count = |value: Option<&Value>| match value {
            Some(Value::String(_)) => 1,
            Some(Value::Sequence(seq)) => seq.len(),
            _ => 0,
        };
        count(target.get("entity_id")) + count(target.get("area_id"))
    }

    fn target_entities(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(target) = &self.target {
            match target.get("entity_id") {
                Some(Value::String(s)) => out.push(s.clone()),
                Some(Value::Sequence(seq)) => {
                    out.extend(seq.iter().filter_map(|v| v.as_str().map(str::to_string)));
                }
                _ => {}
            }
        }
        out
    }
}

/// Accept singular or plural section keys, mapping or sequence shape.
fn section_items(doc: &Value, singular: &str, plural: &str) -> Vec<Value> {
    let section = doc.get(singular).or_else(|| doc.get(plural));
    match section {
        Some(Value::Sequence(items)) => items.clone(),
        Some(other @ Value::Mapping(_)) => vec![other.clone()],
        _ => Vec::new(),
    }
}

/// Recursively collect service calls from actions, sequences, repeats, and
/// choose branches.
fn collect_service_calls(actions: &[Value]) -> Vec<ServiceCall> {
    let mut calls = Vec::new();
    for action in actions {
        walk_action(action, &mut calls);
    }
    calls
}

fn walk_action(value: &Value, calls: &mut Vec<ServiceCall>) {
    if !matches!(value, Value::Mapping(_)) {
        return;
    }

    if let Some(service) = value.get("service").and_then(Value::as_str) {
        calls.push(ServiceCall {
            service: service.to_string(),
            target: value.get("target").cloned(),
            data: value.get("data").cloned(),
        });
    }

    for key in ["sequence", "repeat", "choose", "default", "then", "else"] {
        match value.get(key) {
            Some(Value::Sequence(items)) => {
                for item in items {
                    walk_action(item, calls);
                }
            }
            Some(nested @ Value::Mapping(_)) => walk_action(nested, calls),
            _ => {}
        }
    }
}

/// Time-anchored: a time/sun trigger or a time condition anywhere.
fn has_time_constraint(triggers: &[Value], conditions: &[Value]) -> bool {
    let trigger_anchor = triggers.iter().any(|t| {
        matches!(
            string_at(t, "platform").as_deref(),
            Some("time") | Some("sun")
        )
    });
    let condition_anchor = conditions
        .iter()
        .any(|c| string_at(c, "condition").as_deref() == Some("time"));
    trigger_anchor || condition_anchor
}

fn string_at(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moderate() -> SafetyValidator {
        SafetyValidator::new(SafetyLevel::Moderate, 3)
    }

    #[test]
    fn clean_automation_passes() {
        let yaml = r#"
alias: Morning Lights
trigger:
  - platform: time
    at: "07:00:00"
condition:
  - condition: state
    entity_id: binary_sensor.workday
    state: "on"
action:
  - service: light.turn_on
    target:
      entity_id: light.kitchen
    data:
      brightness_pct: 50
"#;
        let report = moderate().validate(yaml);
        assert!(report.passed);
        assert!(report.safety_score >= 90);
        assert!(report.issues.is_empty());
        assert!(report.summary.contains('✅'));
    }

    #[test]
    fn invalid_yaml_scores_zero() {
        let report = moderate().validate("alias: [unclosed");
        assert!(!report.passed);
        assert_eq!(report.safety_score, 0);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].rule, "yaml_syntax");
        assert_eq!(report.issues[0].severity, SafetySeverity::Critical);
    }

    #[test]
    fn climate_extreme_is_critical() {
        let yaml = r#"
alias: Dangerous Heat
trigger:
  - platform: time
    at: "12:00:00"
action:
  - service: climate.set_temperature
    data:
      temperature: 95
"#;
        let report = moderate().validate(yaml);
        assert!(!report.passed);
        assert!(report.safety_score < 70);
        assert!(report.issues.iter().any(|i| i.rule == "climate_extremes"));
    }

    #[test]
    fn climate_band_is_inclusive_at_both_ends() {
        for (setpoint, expect_pass) in [(55, true), (85, true), (72, true), (54, false), (86, false), (20, false)] {
            let yaml = format!(
                r#"
alias: Setpoint
trigger:
  - platform: time
    at: "07:00:00"
action:
  - service: climate.set_temperature
    data:
      temperature: {setpoint}
"#
            );
            let report = moderate().validate(&yaml);
            assert_eq!(report.passed, expect_pass, "setpoint {setpoint}");
        }
    }

    #[test]
    fn bulk_area_all_is_critical_even_with_time_anchor() {
        let yaml = r#"
alias: Turn Off Everything
trigger:
  - platform: time
    at: "22:00:00"
action:
  - service: light.turn_off
    target:
      area_id: all
"#;
        let report = moderate().validate(yaml);
        assert!(!report.passed);
        let issue = report
            .issues
            .iter()
            .find(|i| i.rule == "bulk_device_off")
            .unwrap();
        assert_eq!(issue.severity, SafetySeverity::Critical);
        assert!(issue.message.contains("ALL"));
    }

    #[test]
    fn security_disable_is_critical() {
        let yaml = r#"
alias: Disable Security
trigger:
  - platform: time
    at: "08:00:00"
action:
  - service: automation.turn_off
    target:
      entity_id: automation.security_alarm
"#;
        let report = moderate().validate(yaml);
        assert!(!report.passed);
        assert!(report.issues.iter().any(|i| i.rule == "security_disable"));
        // Not the destructive-system family: still overridable.
        assert!(report.can_override);
    }

    #[test]
    fn broad_destructive_action_without_anchor_warns() {
        let yaml = r#"
alias: Close All Blinds
trigger:
  - platform: state
    entity_id: sensor.brightness
action:
  - service: cover.close_cover
    target:
      area_id: all_rooms
"#;
        let report = moderate().validate(yaml);
        assert!(report.passed); // Warnings alone do not fail moderate.
        assert!(report.safety_score < 100);
        assert!(report.issues.iter().any(|i| i.rule == "time_constraints"));
    }

    #[test]
    fn time_condition_prevents_the_warning() {
        let yaml = r#"
alias: Scheduled Close
trigger:
  - platform: sun
    event: sunset
condition:
  - condition: time
    after: "18:00:00"
    before: "23:00:00"
action:
  - service: cover.close_cover
    target:
      entity_id: cover.blinds
"#;
        let report = moderate().validate(yaml);
        assert!(report.passed);
        assert!(!report.issues.iter().any(|i| i.rule == "time_constraints"));
    }

    #[test]
    fn every_minute_trigger_warns() {
        let yaml = r#"
alias: Every Minute Check
trigger:
  - platform: time_pattern
    minutes: "*"
action:
  - service: light.turn_on
    target:
      entity_id: light.kitchen
"#;
        let report = moderate().validate(yaml);
        assert!(report.passed);
        assert!(report.issues.iter().any(|i| i.rule == "excessive_triggers"));
    }

    #[test]
    fn debounced_state_trigger_does_not_warn() {
        let yaml = r#"
alias: Debounced Sensor
trigger:
  - platform: state
    entity_id: sensor.power
    for: "00:05:00"
action:
  - service: notify.pushover
    data:
      message: "Power stable"
"#;
        let report = moderate().validate(yaml);
        assert!(report.passed);
        assert!(!report.issues.iter().any(|i| i.rule == "excessive_triggers"));
    }

    #[test]
    fn system_restart_blocks_override() {
        let yaml = r#"
alias: Restart HA
trigger:
  - platform: time
    at: "03:00:00"
action:
  - service: homeassistant.restart
"#;
        let report = moderate().validate(yaml);
        assert!(!report.passed);
        assert!(report.issues.iter().any(|i| i.rule == "destructive_actions"));
        assert!(!report.can_override);
    }

    #[test]
    fn multiple_issues_accumulate() {
        let yaml = r#"
alias: Multiple Problems
trigger:
  - platform: time_pattern
    minutes: "*"
action:
  - service: climate.set_temperature
    data:
      temperature: 95
  - service: light.turn_off
    target:
      area_id: all
"#;
        let report = moderate().validate(yaml);
        assert!(!report.passed);
        assert!(report.issues.len() > 1);
        assert!(report.safety_score < 50);
    }

    #[test]
    fn specific_entities_do_not_trigger_bulk() {
        let yaml = r#"
alias: Specific Lights
trigger:
  - platform: time
    at: "22:00:00"
action:
  - service: light.turn_off
    target:
      entity_id:
        - light.kitchen
        - light.living_room
"#;
        let report = moderate().validate(yaml);
        assert!(report.passed);
        assert!(!report.issues.iter().any(|i| i.rule == "bulk_device_off"));
    }

    #[test]
    fn nested_sequence_actions_are_inspected() {
        let yaml = r#"
alias: Nested Restart
trigger:
  - platform: time
    at: "03:00:00"
action:
  - repeat:
      count: 2
      sequence:
        - service: homeassistant.restart
"#;
        let report = moderate().validate(yaml);
        assert!(!report.passed);
        assert!(report.issues.iter().any(|i| i.rule == "destructive_actions"));
    }

    #[test]
    fn permissive_allows_lower_scores() {
        let yaml = r#"
alias: Somewhat Risky
trigger:
  - platform: time
    at: "22:00:00"
action:
  - service: light.turn_off
    target:
      area_id:
        - bedroom
        - kitchen
        - living_room
        - office
"#;
        let report = SafetyValidator::new(SafetyLevel::Permissive, 3).validate(yaml);
        assert!(report.safety_score >= 40);
    }

    #[test]
    fn score_bounds_and_pass_invariant() {
        let yaml = r#"
alias: Everything Wrong
trigger:
  - platform: time_pattern
    minutes: "*"
action:
  - service: homeassistant.restart
  - service: recorder.purge
  - service: climate.set_temperature
    data:
      temperature: 120
  - service: light.turn_off
    target:
      area_id: all
"#;
        let report = moderate().validate(yaml);
        assert!(report.safety_score <= 100);
        assert!(!report.passed);
        assert!(report.critical_count() >= 4);
        assert!(!report.can_override);
    }
}
