//! Automation Test Harness
//!
//! Executes a suggestion against the live hub with zero lingering side
//! effects: detect strippable components, have the oracle produce a minimal
//! test YAML with a manual trigger, validate it, create → trigger → dwell →
//! delete, then (on request) restore the stripped components into the
//! deployable YAML. Every exit path reaches the delete step; deletes that
//! keep failing land in the janitor queue.

pub mod components;
pub mod janitor;

use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::HarnessConfig;
use crate::hub::{HubRestClient, HubRestError};
use crate::llm::{complete_yaml, CompletionParams, LlmError, Oracle};
use crate::safety::{apply_structural_fixes, SafetyValidator};
use crate::suggestions::prompts;
use crate::types::{SafetyReport, Suggestion};

pub use components::{ComponentType, DetectedComponent, TestMode};
pub use janitor::CleanupQueue;

/// The manual trigger wired into every stripped test YAML.
pub const TEST_TRIGGER_EVENT: &str = "test_automation_trigger";

const STRIP_SYSTEM: &str = "You are a home-automation engineer preparing an \
automation for a safe one-shot test. Rewrite the YAML so that: (1) all \
interval and schedule triggers are replaced by a single manual trigger \
`platform: event, event_type: test_automation_trigger`; (2) time conditions \
are removed; (3) delays and long repeats are removed, but when the original \
action is a sequence, the sequence structure is preserved with the delays \
taken out; (4) the core action is kept intact. Return exactly one YAML \
document and nothing else.";

const RESTORE_SYSTEM: &str = "You are a home-automation engineer. Reinsert \
the listed stripped components (delays, repeats, time conditions) into the \
automation YAML at their natural positions, honoring the recorded nesting \
(delays inside repeats). Return exactly one YAML document and nothing else.";

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("LLM step failed: {0}")]
    Llm(#[from] LlmError),
    #[error("safety validation failed: {summary}")]
    SafetyRejected { summary: String, report: Box<SafetyReport> },
    #[error("hub call failed: {0}")]
    Hub(#[from] HubRestError),
    #[error("stripped YAML is not a valid mapping")]
    MalformedYaml,
}

/// Everything a caller learns from one test run.
#[derive(Debug, Clone, Serialize)]
pub struct TestRunReport {
    pub automation_id: String,
    pub mode: TestMode,
    pub components: Vec<DetectedComponent>,
    pub candidate_yaml: String,
    pub stripped_yaml: String,
    pub safety: SafetyReport,
    pub triggered: bool,
    pub deleted: bool,
}

pub struct TestHarness {
    oracle: Arc<dyn Oracle>,
    rest: HubRestClient,
    validator: SafetyValidator,
    cleanup: Arc<CleanupQueue>,
    config: HarnessConfig,
}

impl TestHarness {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        rest: HubRestClient,
        validator: SafetyValidator,
        cleanup: Arc<CleanupQueue>,
        config: HarnessConfig,
    ) -> Self {
        Self {
            oracle,
            rest,
            validator,
            cleanup,
            config,
        }
    }

    /// Full round-trip test of a suggestion. Any step failure aborts the
    /// flow, but a created automation is always deleted (or queued for the
    /// janitor) before returning.
    pub async fn run_test(
        &self,
        suggestion: &Suggestion,
        cancel: &CancellationToken,
    ) -> Result<TestRunReport, HarnessError> {
        // 1. Candidate YAML: the approved one, or synthesized on the spot.
        let candidate_yaml = match &suggestion.automation_yaml {
            Some(yaml) => yaml.clone(),
            None => {
                complete_yaml(
                    self.oracle.as_ref(),
                    prompts::YAML_SYSTEM,
                    &prompts::yaml_prompt(
                        &suggestion.description_only,
                        &suggestion.device_capabilities,
                    ),
                    &CompletionParams::default(),
                )
                .await?
            }
        };

        // 2. Component detection: description first, YAML leaks second.
        let components =
            components::detect_components(&suggestion.description_only, &candidate_yaml);
        let mode = components::mode_for(&components);
        info!(
            components = components.len(),
            ?mode,
            "detected strippable components"
        );

        // 3. Strip to a minimal test YAML with the manual trigger.
        let strip_prompt = format!(
            "Components to strip:\n{}\n\nAutomation YAML:\n{candidate_yaml}\n\nMode: {}",
            serde_json::to_string_pretty(&components).unwrap_or_default(),
            if mode == TestMode::Sequence { "preserve sequence structure" } else { "simple" },
        );
        let stripped = complete_yaml(
            self.oracle.as_ref(),
            STRIP_SYSTEM,
            &strip_prompt,
            &CompletionParams::default(),
        )
        .await?;

        // 4. Structural fixes, then safety. Re-validate the fixed version.
        let fixed = apply_structural_fixes(&stripped);
        let stripped_yaml = fixed.yaml;
        let safety = self.validator.validate(&stripped_yaml);
        if !safety.passed {
            return Err(HarnessError::SafetyRejected {
                summary: safety.summary.clone(),
                report: Box::new(safety),
            });
        }

        let config_json: serde_json::Value = serde_yaml::from_str(&stripped_yaml)
            .map_err(|_| HarnessError::MalformedYaml)?;
        if !config_json.is_object() {
            return Err(HarnessError::MalformedYaml);
        }

        // 5. Create on the hub under a throwaway id.
        let automation_id = format!("test_automation_{:08x}", rand::thread_rng().gen::<u32>());
        self.rest
            .create_automation(&automation_id, &config_json)
            .await?;
        info!(automation_id = %automation_id, "test automation created");

        // 6-7. Trigger and dwell; failures fall through to delete.
        let trigger_result = self.trigger_and_dwell(&automation_id, cancel).await;

        // 8. Delete, always.
        let deleted = self.delete_with_retries(&automation_id).await;

        let triggered = match trigger_result {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "test trigger failed");
                false
            }
        };

        Ok(TestRunReport {
            automation_id,
            mode,
            components,
            candidate_yaml,
            stripped_yaml,
            safety,
            triggered,
            deleted,
        })
    }

    async fn trigger_and_dwell(
        &self,
        automation_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), HubRestError> {
        self.rest
            .call_service(
                "automation",
                "trigger",
                &serde_json::json!({ "entity_id": format!("automation.{automation_id}") }),
            )
            .await?;

        // Fixed dwell to let the automation run.
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(self.config.test_duration_secs)) => {}
            _ = cancel.cancelled() => {}
        }
        Ok(())
    }

    /// Bounded delete retries, then the janitor queue as the backstop.
    async fn delete_with_retries(&self, automation_id: &str) -> bool {
        for attempt in 1..=self.config.delete_retries.max(1) {
            match self.rest.delete_automation(automation_id).await {
                Ok(()) => {
                    info!(automation_id = %automation_id, "test automation deleted");
                    return true;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "delete attempt failed");
                    if attempt < self.config.delete_retries {
                        tokio::time::sleep(Duration::from_secs(
                            self.config.delete_retry_delay_secs,
                        ))
                        .await;
                    }
                }
            }
        }
        self.cleanup.enqueue(automation_id);
        false
    }

    /// Restore the stripped components into the original YAML, producing
    /// the user-facing deployable document. Validated before returning.
    pub async fn restore(
        &self,
        report: &TestRunReport,
    ) -> Result<(String, SafetyReport), HarnessError> {
        let restore_prompt = format!(
            "Stripped components (with nesting):\n{}\n\nAutomation YAML:\n{}",
            serde_json::to_string_pretty(&report.components).unwrap_or_default(),
            report.candidate_yaml,
        );
        let restored = complete_yaml(
            self.oracle.as_ref(),
            RESTORE_SYSTEM,
            &restore_prompt,
            &CompletionParams::default(),
        )
        .await?;

        let fixed = apply_structural_fixes(&restored);
        let safety = self.validator.validate(&fixed.yaml);
        if !safety.passed {
            return Err(HarnessError::SafetyRejected {
                summary: safety.summary.clone(),
                report: Box::new(safety),
            });
        }
        Ok((fixed.yaml, safety))
    }
}
