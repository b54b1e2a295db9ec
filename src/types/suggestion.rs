//! Automation suggestions
//!
//! A suggestion starts life as a natural-language description only; YAML is
//! synthesized later, on approval. The status machine enforces that
//! `automation_yaml` is absent for drafts and immutable once set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Draft,
    Approved,
    Deployed,
    Rejected,
}

impl SuggestionStatus {
    /// Allowed transitions: Draft → Approved|Rejected, Approved → Deployed|Rejected.
    pub fn can_transition_to(self, next: SuggestionStatus) -> bool {
        matches!(
            (self, next),
            (SuggestionStatus::Draft, SuggestionStatus::Approved)
                | (SuggestionStatus::Draft, SuggestionStatus::Rejected)
                | (SuggestionStatus::Approved, SuggestionStatus::Deployed)
                | (SuggestionStatus::Approved, SuggestionStatus::Rejected)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionCategory {
    Energy,
    Comfort,
    Security,
    Convenience,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionPriority {
    High,
    Medium,
    Low,
}

/// A candidate automation surfaced to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub suggestion_id: String,
    #[serde(default)]
    pub pattern_id: Option<String>,
    pub status: SuggestionStatus,
    /// Natural-language description; the only content while `Draft`.
    pub description_only: String,
    /// Capability snapshot for the involved devices, frozen at creation.
    #[serde(default)]
    pub device_capabilities: Value,
    pub refinement_count: u32,
    /// None while `Draft`; set exactly once on approval.
    #[serde(default)]
    pub automation_yaml: Option<String>,
    pub category: SuggestionCategory,
    pub priority: SuggestionPriority,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deployed_at: Option<DateTime<Utc>>,
    /// Hub-side automation id after deployment.
    #[serde(default)]
    pub external_automation_id: Option<String>,
}

impl Suggestion {
    /// Invariant check: drafts carry no YAML, advanced statuses always do.
    pub fn yaml_invariant_holds(&self) -> bool {
        match self.status {
            SuggestionStatus::Draft => self.automation_yaml.is_none(),
            SuggestionStatus::Approved | SuggestionStatus::Deployed => {
                self.automation_yaml.is_some()
            }
            SuggestionStatus::Rejected => true,
        }
    }
}

/// Map pattern confidence onto a user-facing priority.
pub fn priority_from_confidence(confidence: f64) -> SuggestionPriority {
    if confidence >= 0.85 {
        SuggestionPriority::High
    } else if confidence >= 0.65 {
        SuggestionPriority::Medium
    } else {
        SuggestionPriority::Low
    }
}

/// Infer a category from the primary device's domain.
pub fn category_from_domain(domain: &str) -> SuggestionCategory {
    match domain {
        "climate" => SuggestionCategory::Comfort,
        "lock" | "door" | "alarm_control_panel" | "alarm" | "camera" => {
            SuggestionCategory::Security
        }
        "binary_sensor" => SuggestionCategory::Security,
        "energy" | "power" | "utility_meter" => SuggestionCategory::Energy,
        _ => SuggestionCategory::Convenience,
    }
}
