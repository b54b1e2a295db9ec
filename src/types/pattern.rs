//! Behavioral pattern records
//!
//! Patterns are recurring regularities mined from the event stream by the
//! detector suite. Each record carries a stable id, a confidence in [0,1],
//! an occurrence count, and detector-specific metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which detector produced a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    TimeOfDay,
    CoOccurrence,
    Sequence,
    Contextual,
    Duration,
    Anomaly,
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PatternType::TimeOfDay => "time_of_day",
            PatternType::CoOccurrence => "co_occurrence",
            PatternType::Sequence => "sequence",
            PatternType::Contextual => "contextual",
            PatternType::Duration => "duration",
            PatternType::Anomaly => "anomaly",
        };
        write!(f, "{s}")
    }
}

/// What a pattern is about: one device, an unordered pair, or an ordered
/// chain of devices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSubject {
    Device(String),
    /// Members are stored sorted so pair identity is unordered.
    DevicePair { device1: String, device2: String },
    Sequence(Vec<String>),
}

impl PatternSubject {
    /// Unordered pair constructor: members are sorted before storage.
    pub fn pair(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (mut a, mut b) = (a.into(), b.into());
        if b < a {
            std::mem::swap(&mut a, &mut b);
        }
        PatternSubject::DevicePair { device1: a, device2: b }
    }

    /// All entity ids involved, primary first.
    pub fn devices(&self) -> Vec<&str> {
        match self {
            PatternSubject::Device(d) => vec![d.as_str()],
            PatternSubject::DevicePair { device1, device2 } => {
                vec![device1.as_str(), device2.as_str()]
            }
            PatternSubject::Sequence(devices) => devices.iter().map(String::as_str).collect(),
        }
    }

    /// Stable key fragment for deterministic pattern ids.
    pub fn key(&self) -> String {
        match self {
            PatternSubject::Device(d) => d.clone(),
            PatternSubject::DevicePair { device1, device2 } => format!("{device1}+{device2}"),
            PatternSubject::Sequence(devices) => devices.join(">"),
        }
    }
}

/// A mined behavioral pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    /// Deterministic: `<type>:<subject key>[:<discriminator>]`. Re-detection
    /// of the same regularity updates the existing record instead of
    /// duplicating it.
    pub pattern_id: String,
    pub pattern_type: PatternType,
    pub subject: PatternSubject,
    /// 0.0–1.0
    pub confidence: f64,
    pub occurrences: u64,
    /// Detector-specific payload (cluster stats, time deltas, ...).
    #[serde(default)]
    pub metadata: Value,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Pattern {
    pub fn new(
        pattern_type: PatternType,
        subject: PatternSubject,
        discriminator: Option<&str>,
        confidence: f64,
        occurrences: u64,
        metadata: Value,
        first_seen: DateTime<Utc>,
        last_seen: DateTime<Utc>,
    ) -> Self {
        let pattern_id = match discriminator {
            Some(d) => format!("{pattern_type}:{}:{d}", subject.key()),
            None => format!("{pattern_type}:{}", subject.key()),
        };
        Self {
            pattern_id,
            pattern_type,
            subject,
            confidence: confidence.clamp(0.0, 1.0),
            occurrences,
            metadata,
            first_seen,
            last_seen,
        }
    }
}

/// Per-run detector statistics, logged by the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectorStats {
    pub detector: String,
    pub total_patterns: usize,
    pub events_analyzed: usize,
    pub processing_time_ms: u64,
}
