//! Hub REST client
//!
//! The REST surface the harness and discovery fallback consume: automation
//! create/replace and delete, service calls, and the full state snapshot.
//! One shared client with a 30 s deadline; every call carries bearer auth.

use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum HubRestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("hub returned status {0}")]
    Status(reqwest::StatusCode),
}

/// HTTP client for the hub's REST surface.
#[derive(Clone)]
pub struct HubRestClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HubRestClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    /// Create or replace an automation from its YAML rendered as JSON.
    pub async fn create_automation(
        &self,
        automation_id: &str,
        config: &Value,
    ) -> Result<(), HubRestError> {
        let resp = self
            .http
            .post(format!(
                "{}/api/config/automation/config/{automation_id}",
                self.base_url
            ))
            .header("Authorization", format!("Bearer {}", self.token))
            .json(config)
            .send()
            .await?;
        debug!(automation_id, status = %resp.status(), "create automation");
        ok_or_status(resp.status())
    }

    /// Delete an automation by id.
    pub async fn delete_automation(&self, automation_id: &str) -> Result<(), HubRestError> {
        let resp = self
            .http
            .delete(format!(
                "{}/api/config/automation/config/{automation_id}",
                self.base_url
            ))
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await?;
        debug!(automation_id, status = %resp.status(), "delete automation");
        ok_or_status(resp.status())
    }

    /// Fire a service in a domain, e.g. `automation.trigger`.
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        body: &Value,
    ) -> Result<Value, HubRestError> {
        let resp = self
            .http
            .post(format!("{}/api/services/{domain}/{service}", self.base_url))
            .header("Authorization", format!("Bearer {}", self.token))
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(HubRestError::Status(status));
        }
        Ok(resp.json().await.unwrap_or(Value::Null))
    }

    /// Snapshot of all entity states; discovery fallback.
    pub async fn get_states(&self) -> Result<Vec<Value>, HubRestError> {
        let resp = self
            .http
            .get(format!("{}/api/states", self.base_url))
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(HubRestError::Status(status));
        }
        Ok(resp.json().await.unwrap_or_default())
    }

}

fn ok_or_status(status: reqwest::StatusCode) -> Result<(), HubRestError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(HubRestError::Status(status))
    }
}
