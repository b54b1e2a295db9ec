//! Suggestion Generator
//!
//! Description-first suggestion generation: unsuggested patterns above the
//! quality floor become natural-language drafts (no YAML), each carrying a
//! frozen capability snapshot, an inferred category, and a priority derived
//! from the pattern's confidence. The oracle writes the description; a
//! deterministic template stands in when it fails.

pub mod prompts;

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::capabilities::CapabilityStore;
use crate::context::clock::SharedClock;
use crate::llm::{CompletionParams, Oracle};
use crate::storage::{PatternStore, StoreError, SuggestionStore};
use crate::types::{
    category_from_domain, priority_from_confidence, Complexity, Pattern, Suggestion,
    SuggestionStatus,
};

/// Patterns below this confidence are not worth suggesting.
pub const DEFAULT_QUALITY_FLOOR: f64 = 0.6;

pub struct SuggestionGenerator {
    oracle: Arc<dyn Oracle>,
    capabilities: Arc<CapabilityStore>,
    patterns: PatternStore,
    suggestions: SuggestionStore,
    clock: SharedClock,
    quality_floor: f64,
}

/// Outcome counters for one generation sweep, logged by the scheduler.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct GenerationStats {
    pub patterns_considered: usize,
    pub suggestions_created: usize,
    pub llm_fallbacks: usize,
}

impl SuggestionGenerator {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        capabilities: Arc<CapabilityStore>,
        patterns: PatternStore,
        suggestions: SuggestionStore,
        clock: SharedClock,
    ) -> Self {
        Self {
            oracle,
            capabilities,
            patterns,
            suggestions,
            clock,
            quality_floor: DEFAULT_QUALITY_FLOOR,
        }
    }

    /// One sweep: draft a suggestion for every unsuggested pattern above
    /// the floor, newest first.
    pub async fn generate_sweep(&self) -> Result<GenerationStats, StoreError> {
        let pending = self.patterns.unsuggested(self.quality_floor)?;
        let mut stats = GenerationStats {
            patterns_considered: pending.len(),
            ..GenerationStats::default()
        };

        for pattern in pending {
            let suggestion = self.draft_for_pattern(&pattern, &mut stats).await;
            self.suggestions.insert_draft(&suggestion)?;
            self.patterns.mark_suggested(&pattern.pattern_id)?;
            stats.suggestions_created += 1;
        }

        if stats.suggestions_created > 0 {
            info!(
                created = stats.suggestions_created,
                fallbacks = stats.llm_fallbacks,
                "suggestion sweep complete"
            );
        }
        Ok(stats)
    }

    /// Build one draft. The oracle failure path falls back to the template
    /// description; the pattern is never left unsuggested.
    async fn draft_for_pattern(&self, pattern: &Pattern, stats: &mut GenerationStats) -> Suggestion {
        let devices = pattern.subject.devices();
        let capability_snapshot = self.capabilities.snapshot_for_entities(&devices);
        // Steer the oracle toward controls a homeowner can actually use;
        // advanced features (effects, calibration) stay out of the prompt.
        let simple_controls: Vec<String> = devices
            .iter()
            .filter_map(|device| self.capabilities.for_entity(device))
            .flat_map(|caps| {
                caps.up_to_complexity(Complexity::Medium)
                    .iter()
                    .map(|(name, _)| (*name).to_string())
                    .collect::<Vec<_>>()
            })
            .collect();

        let description = match self
            .oracle
            .complete(
                prompts::DESCRIPTION_SYSTEM,
                &prompts::description_prompt(pattern, &capability_snapshot, &simple_controls),
                &CompletionParams::default(),
            )
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) | Err(_) => {
                warn!(pattern_id = %pattern.pattern_id, "oracle failed, using template description");
                stats.llm_fallbacks += 1;
                prompts::template_description(pattern)
            }
        };

        let primary_domain = devices
            .first()
            .and_then(|d| d.split('.').next())
            .unwrap_or("unknown");
        let now = self.clock.now();

        Suggestion {
            suggestion_id: Uuid::new_v4().to_string(),
            pattern_id: Some(pattern.pattern_id.clone()),
            status: SuggestionStatus::Draft,
            description_only: description,
            device_capabilities: capability_snapshot,
            refinement_count: 0,
            automation_yaml: None,
            category: category_from_domain(primary_domain),
            priority: priority_from_confidence(pattern.confidence),
            confidence: pattern.confidence,
            created_at: now,
            updated_at: now,
            approved_at: None,
            deployed_at: None,
            external_automation_id: None,
        }
    }

    /// Conversational refinement: new description from the oracle based on
    /// user feedback, persisted with an incremented refinement count.
    pub async fn refine(
        &self,
        suggestion_id: &str,
        feedback: &str,
    ) -> Result<Suggestion, StoreError> {
        let current = self
            .suggestions
            .get(suggestion_id)?
            .ok_or_else(|| StoreError::NotFound(suggestion_id.to_string()))?;

        let revised = match self
            .oracle
            .complete(
                prompts::REFINE_SYSTEM,
                &prompts::refine_prompt(&current.description_only, feedback),
                &CompletionParams::default(),
            )
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) | Err(_) => {
                // Refinement is user-initiated; surface the failure by
                // keeping the old text and appending the request verbatim.
                format!("{} ({feedback})", current.description_only)
            }
        };

        self.suggestions
            .refine(suggestion_id, &revised, self.clock.now())
    }
}
