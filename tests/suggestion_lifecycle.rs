//! Suggestion Lifecycle Tests
//!
//! End-to-end over the sled stores: pattern → draft suggestion →
//! refinement → approval (YAML attached once) → deployment, with the
//! status-machine invariants checked at each step, including YAML
//! immutability via content hashing across reads.

use chrono::{TimeZone, Utc};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use hestia::capabilities::CapabilityStore;
use hestia::context::clock::FixedClock;
use hestia::llm::testing::ScriptedOracle;
use hestia::storage;
use hestia::suggestions::SuggestionGenerator;
use hestia::types::{Pattern, PatternSubject, PatternType, SuggestionStatus};

fn pattern() -> Pattern {
    let ts = Utc.with_ymd_and_hms(2025, 6, 1, 7, 0, 0).unwrap();
    Pattern::new(
        PatternType::TimeOfDay,
        PatternSubject::Device("light.bedroom".into()),
        Some("c0"),
        0.92,
        20,
        serde_json::json!({"hour": 7, "minute": 0}),
        ts,
        ts,
    )
}

fn content_hash(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

#[tokio::test]
async fn full_lifecycle_with_invariants() {
    let dir = tempfile::tempdir().unwrap();
    let (patterns, suggestions) = storage::open(dir.path()).unwrap();
    let clock = FixedClock::at(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap());

    let generator = SuggestionGenerator::new(
        Arc::new(ScriptedOracle::new(vec![
            Ok("Turn on the bedroom light at 07:00 on weekdays.".to_string()),
            Ok("Turn on the bedroom light at 07:00, dimmed to 40%.".to_string()),
        ])),
        Arc::new(CapabilityStore::new()),
        patterns.clone(),
        suggestions.clone(),
        clock,
    );

    // Pattern → draft.
    patterns.upsert(&pattern()).unwrap();
    let stats = generator.generate_sweep().await.unwrap();
    assert_eq!(stats.suggestions_created, 1);

    let drafts = suggestions.list_by_status(SuggestionStatus::Draft).unwrap();
    let draft = &drafts[0];
    assert!(draft.automation_yaml.is_none(), "drafts carry no YAML");
    assert_eq!(draft.refinement_count, 0);
    assert!(draft.yaml_invariant_holds());

    // Refinement keeps it a draft.
    let refined = generator
        .refine(&draft.suggestion_id, "dim it in the morning")
        .await
        .unwrap();
    assert_eq!(refined.status, SuggestionStatus::Draft);
    assert_eq!(refined.refinement_count, 1);
    assert!(refined.automation_yaml.is_none());

    // Approval attaches YAML exactly once.
    let yaml = "alias: Morning Light\ntrigger:\n  - platform: time\n    at: \"07:00:00\"\naction:\n  - service: light.turn_on\n    target:\n      entity_id: light.bedroom\n";
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 13, 0, 0).unwrap();
    let approved = suggestions.approve(&draft.suggestion_id, yaml, now).unwrap();
    assert_eq!(approved.status, SuggestionStatus::Approved);
    let first_hash = content_hash(approved.automation_yaml.as_deref().unwrap());

    // YAML hash stable across reads.
    for _ in 0..3 {
        let read = suggestions.get(&draft.suggestion_id).unwrap().unwrap();
        assert_eq!(
            content_hash(read.automation_yaml.as_deref().unwrap()),
            first_hash
        );
    }

    // Deployment records the hub-side id and keeps the YAML byte-stable.
    let deployed = suggestions
        .mark_deployed(&draft.suggestion_id, "automation.morning_light", now)
        .unwrap();
    assert_eq!(deployed.status, SuggestionStatus::Deployed);
    assert_eq!(
        content_hash(deployed.automation_yaml.as_deref().unwrap()),
        first_hash
    );
    assert!(deployed.yaml_invariant_holds());

    // The pattern was consumed by the sweep.
    assert!(patterns.unsuggested(0.5).unwrap().is_empty());
}

#[tokio::test]
async fn llm_outage_still_produces_a_draft() {
    let dir = tempfile::tempdir().unwrap();
    let (patterns, suggestions) = storage::open(dir.path()).unwrap();
    let clock = FixedClock::at(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap());

    let generator = SuggestionGenerator::new(
        Arc::new(ScriptedOracle::failing()),
        Arc::new(CapabilityStore::new()),
        patterns.clone(),
        suggestions.clone(),
        clock,
    );

    patterns.upsert(&pattern()).unwrap();
    let stats = generator.generate_sweep().await.unwrap();
    assert_eq!(stats.suggestions_created, 1);
    assert_eq!(stats.llm_fallbacks, 1);

    // Template fallback still names the device and the time.
    let draft = &suggestions.list_by_status(SuggestionStatus::Draft).unwrap()[0];
    assert!(draft.description_only.contains("light.bedroom"));
    assert!(draft.description_only.contains("07:00"));
}

#[test]
fn stores_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (patterns, _suggestions) = storage::open(dir.path()).unwrap();
        patterns.upsert(&pattern()).unwrap();
        patterns.flush().unwrap();
    }
    let (patterns, _suggestions) = storage::open(dir.path()).unwrap();
    assert_eq!(patterns.count(), 1);
    let stored = patterns
        .get("time_of_day:light.bedroom:c0")
        .unwrap()
        .unwrap();
    assert_eq!(stored.occurrences, 20);
}
