//! Safety validation types

use serde::{Deserialize, Serialize};

/// How strict the validator is about the final score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    Strict,
    #[default]
    Moderate,
    Permissive,
}

impl SafetyLevel {
    /// Minimum passing score at this level.
    pub fn threshold(self) -> u32 {
        match self {
            SafetyLevel::Strict => 85,
            SafetyLevel::Moderate => 70,
            SafetyLevel::Permissive => 50,
        }
    }

    /// Parse a config string, falling back to moderate on anything unknown.
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "strict" => SafetyLevel::Strict,
            "permissive" => SafetyLevel::Permissive,
            _ => SafetyLevel::Moderate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetySeverity {
    Info,
    Warning,
    Critical,
}

/// One rule violation found in an automation YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyIssue {
    /// Rule family, e.g. `bulk_device_off`, `climate_extremes`.
    pub rule: String,
    pub severity: SafetySeverity,
    pub message: String,
    #[serde(default)]
    pub suggested_fix: Option<String>,
}

/// Full validation verdict for one YAML document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyReport {
    pub passed: bool,
    /// 0–100.
    pub safety_score: u32,
    pub issues: Vec<SafetyIssue>,
    /// False only when a destructive system action was found.
    pub can_override: bool,
    pub summary: String,
}

impl SafetyReport {
    pub fn critical_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == SafetySeverity::Critical)
            .count()
    }
}
