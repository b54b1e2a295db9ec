//! Suggestion store
//!
//! Enforces the suggestion lifecycle at the storage boundary: drafts carry
//! no YAML, YAML is set exactly once on approval and immutable afterwards,
//! and status only moves along the allowed transitions.

use chrono::{DateTime, Utc};
use sled::Db;
use std::sync::Arc;

use crate::types::{Suggestion, SuggestionStatus};

use super::StoreError;

pub const TREE_SUGGESTIONS: &str = "suggestions";

#[derive(Clone)]
pub struct SuggestionStore {
    suggestions: sled::Tree,
}

impl SuggestionStore {
    pub fn new(db: Arc<Db>) -> Result<Self, StoreError> {
        Ok(Self {
            suggestions: db.open_tree(TREE_SUGGESTIONS)?,
        })
    }

    /// Persist a new draft. Rejects anything that is not a YAML-less draft.
    pub fn insert_draft(&self, suggestion: &Suggestion) -> Result<(), StoreError> {
        if suggestion.status != SuggestionStatus::Draft {
            return Err(StoreError::IllegalTransition(
                "new suggestions must be drafts".to_string(),
            ));
        }
        if suggestion.automation_yaml.is_some() {
            return Err(StoreError::IllegalTransition(
                "drafts must not carry automation_yaml".to_string(),
            ));
        }
        self.put(suggestion)
    }

    pub fn get(&self, suggestion_id: &str) -> Result<Option<Suggestion>, StoreError> {
        Ok(self
            .suggestions
            .get(suggestion_id.as_bytes())?
            .and_then(|v| serde_json::from_slice(&v).ok()))
    }

    /// Approve a draft, attaching its synthesized YAML exactly once.
    pub fn approve(
        &self,
        suggestion_id: &str,
        automation_yaml: &str,
        now: DateTime<Utc>,
    ) -> Result<Suggestion, StoreError> {
        let mut suggestion = self.require(suggestion_id)?;
        self.check_transition(&suggestion, SuggestionStatus::Approved)?;
        suggestion.status = SuggestionStatus::Approved;
        suggestion.automation_yaml = Some(automation_yaml.to_string());
        suggestion.approved_at = Some(now);
        suggestion.updated_at = now;
        self.put(&suggestion)?;
        Ok(suggestion)
    }

    /// Mark an approved suggestion deployed, recording the hub-side id.
    /// The YAML is immutable from approval on.
    pub fn mark_deployed(
        &self,
        suggestion_id: &str,
        external_automation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Suggestion, StoreError> {
        let mut suggestion = self.require(suggestion_id)?;
        self.check_transition(&suggestion, SuggestionStatus::Deployed)?;
        suggestion.status = SuggestionStatus::Deployed;
        suggestion.external_automation_id = Some(external_automation_id.to_string());
        suggestion.deployed_at = Some(now);
        suggestion.updated_at = now;
        self.put(&suggestion)?;
        Ok(suggestion)
    }

    pub fn reject(&self, suggestion_id: &str, now: DateTime<Utc>) -> Result<Suggestion, StoreError> {
        let mut suggestion = self.require(suggestion_id)?;
        self.check_transition(&suggestion, SuggestionStatus::Rejected)?;
        suggestion.status = SuggestionStatus::Rejected;
        suggestion.updated_at = now;
        self.put(&suggestion)?;
        Ok(suggestion)
    }

    /// Conversational refinement: replace the description, bump the count.
    /// Only drafts can be refined.
    pub fn refine(
        &self,
        suggestion_id: &str,
        new_description: &str,
        now: DateTime<Utc>,
    ) -> Result<Suggestion, StoreError> {
        let mut suggestion = self.require(suggestion_id)?;
        if suggestion.status != SuggestionStatus::Draft {
            return Err(StoreError::IllegalTransition(
                "only drafts can be refined".to_string(),
            ));
        }
        suggestion.description_only = new_description.to_string();
        suggestion.refinement_count += 1;
        suggestion.updated_at = now;
        self.put(&suggestion)?;
        Ok(suggestion)
    }

    pub fn list_by_status(&self, status: SuggestionStatus) -> Result<Vec<Suggestion>, StoreError> {
        let mut out = Vec::new();
        for item in self.suggestions.iter() {
            let (_, value) = item?;
            if let Ok(s) = serde_json::from_slice::<Suggestion>(&value) {
                if s.status == status {
                    out.push(s);
                }
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    pub fn count(&self) -> usize {
        self.suggestions.len()
    }

    fn require(&self, suggestion_id: &str) -> Result<Suggestion, StoreError> {
        self.get(suggestion_id)?
            .ok_or_else(|| StoreError::NotFound(suggestion_id.to_string()))
    }

    fn check_transition(
        &self,
        suggestion: &Suggestion,
        next: SuggestionStatus,
    ) -> Result<(), StoreError> {
        if !suggestion.status.can_transition_to(next) {
            return Err(StoreError::IllegalTransition(format!(
                "{:?} -> {:?} is not allowed for {}",
                suggestion.status, next, suggestion.suggestion_id
            )));
        }
        Ok(())
    }

    fn put(&self, suggestion: &Suggestion) -> Result<(), StoreError> {
        debug_assert!(suggestion.yaml_invariant_holds());
        let value = serde_json::to_vec(suggestion)?;
        self.suggestions
            .insert(suggestion.suggestion_id.as_bytes(), value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SuggestionCategory, SuggestionPriority};
    use chrono::TimeZone;

    fn store() -> (tempfile::TempDir, SuggestionStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(sled::open(dir.path().join("db")).unwrap());
        (dir, SuggestionStore::new(db).unwrap())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn draft(id: &str) -> Suggestion {
        Suggestion {
            suggestion_id: id.to_string(),
            pattern_id: Some("time_of_day:light.bedroom:c0".into()),
            status: SuggestionStatus::Draft,
            description_only: "Turn on the bedroom light at 07:00".into(),
            device_capabilities: serde_json::json!({}),
            refinement_count: 0,
            automation_yaml: None,
            category: SuggestionCategory::Convenience,
            priority: SuggestionPriority::High,
            confidence: 0.9,
            created_at: now(),
            updated_at: now(),
            approved_at: None,
            deployed_at: None,
            external_automation_id: None,
        }
    }

    #[test]
    fn draft_with_yaml_is_rejected() {
        let (_dir, store) = store();
        let mut bad = draft("s1");
        bad.automation_yaml = Some("alias: x".into());
        assert!(store.insert_draft(&bad).is_err());
    }

    #[test]
    fn lifecycle_draft_approve_deploy() {
        let (_dir, store) = store();
        store.insert_draft(&draft("s1")).unwrap();

        let approved = store.approve("s1", "alias: Morning\naction: []", now()).unwrap();
        assert_eq!(approved.status, SuggestionStatus::Approved);
        assert!(approved.automation_yaml.is_some());
        assert!(approved.approved_at.is_some());

        let deployed = store.mark_deployed("s1", "automation.morning", now()).unwrap();
        assert_eq!(deployed.status, SuggestionStatus::Deployed);
        assert_eq!(deployed.external_automation_id.as_deref(), Some("automation.morning"));
        // YAML survived the transition untouched.
        assert_eq!(deployed.automation_yaml, approved.automation_yaml);
    }

    #[test]
    fn deploy_without_approval_is_illegal() {
        let (_dir, store) = store();
        store.insert_draft(&draft("s1")).unwrap();
        assert!(matches!(
            store.mark_deployed("s1", "automation.x", now()),
            Err(StoreError::IllegalTransition(_))
        ));
    }

    #[test]
    fn refine_bumps_count_and_replaces_description() {
        let (_dir, store) = store();
        store.insert_draft(&draft("s1")).unwrap();

        let refined = store.refine("s1", "Dim to 30% instead", now()).unwrap();
        assert_eq!(refined.refinement_count, 1);
        assert_eq!(refined.description_only, "Dim to 30% instead");

        store.approve("s1", "alias: x\naction: []", now()).unwrap();
        assert!(store.refine("s1", "too late", now()).is_err());
    }

    #[test]
    fn rejected_is_terminal() {
        let (_dir, store) = store();
        store.insert_draft(&draft("s1")).unwrap();
        store.reject("s1", now()).unwrap();
        assert!(store.approve("s1", "alias: x", now()).is_err());
    }
}
