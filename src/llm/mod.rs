//! LLM oracle
//!
//! The model is a request/response text oracle with a single capability:
//! `complete(system, user, params) → text`. This module owns prompt
//! transport, retries, and structured-output extraction; prompt content
//! lives with the components that own the task.

pub mod extract;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::LlmConfig;

/// Retries per completion: 3 attempts with exponential backoff.
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_INITIAL_MS: u64 = 500;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("oracle returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("empty or malformed completion")]
    EmptyCompletion,
    #[error("no parseable object in completion")]
    Unparseable,
}

/// Completion request knobs.
#[derive(Debug, Clone)]
pub struct CompletionParams {
    pub max_tokens: u32,
    pub temperature: f64,
    /// Hint the oracle to emit a single JSON object.
    pub json_mode: bool,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.2,
            json_mode: false,
        }
    }
}

/// The oracle contract. Network client in production, scripted fake in tests.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        params: &CompletionParams,
    ) -> Result<String, LlmError>;
}

/// OpenAI-compatible chat-completions payload shape.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Network oracle client. One shared instance with a 60 s deadline.
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    async fn complete_once(
        &self,
        system: &str,
        user: &str,
        params: &CompletionParams,
    ) -> Result<String, LlmError> {
        let mut body = json!({
            "model": self.model,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        if params.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        let mut request = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&body);
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(LlmError::Status(status));
        }

        let payload: ChatResponse = resp.json().await?;
        payload
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|s| !s.trim().is_empty())
            .ok_or(LlmError::EmptyCompletion)
    }
}

#[async_trait]
impl Oracle for LlmClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        params: &CompletionParams,
    ) -> Result<String, LlmError> {
        let mut delay_ms = BACKOFF_INITIAL_MS;
        let mut last_error = LlmError::EmptyCompletion;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.complete_once(system, user, params).await {
                Ok(text) => {
                    debug!(attempt, chars = text.len(), "completion received");
                    return Ok(text);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "completion attempt failed");
                    last_error = e;
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        delay_ms *= 2;
                    }
                }
            }
        }
        Err(last_error)
    }
}

/// Ask for a single JSON object and parse it, re-prompting once when the
/// first completion contains no parseable object.
pub async fn complete_json(
    oracle: &dyn Oracle,
    system: &str,
    user: &str,
    params: &CompletionParams,
) -> Result<Value, LlmError> {
    let strict = CompletionParams {
        json_mode: true,
        ..params.clone()
    };
    for nudge in ["", "\n\nReturn exactly one JSON object and nothing else."] {
        let prompt = format!("{user}{nudge}");
        let text = oracle.complete(system, &prompt, &strict).await?;
        if let Some(value) = extract::extract_json(&text) {
            return Ok(value);
        }
        warn!("completion had no parseable JSON object, re-prompting");
    }
    Err(LlmError::Unparseable)
}

/// Ask for one YAML document, re-prompting once on parse failure.
pub async fn complete_yaml(
    oracle: &dyn Oracle,
    system: &str,
    user: &str,
    params: &CompletionParams,
) -> Result<String, LlmError> {
    for nudge in ["", "\n\nReturn exactly one YAML document and nothing else."] {
        let prompt = format!("{user}{nudge}");
        let text = oracle.complete(system, &prompt, params).await?;
        if let Some(yaml) = extract::extract_yaml(&text) {
            return Ok(yaml);
        }
        warn!("completion had no parseable YAML document, re-prompting");
    }
    Err(LlmError::Unparseable)
}

pub mod testing {
    //! Scripted oracle for tests: returns canned responses in order.
    //! Compiled unconditionally so integration tests can use it.

    use super::*;
    use std::sync::Mutex;

    pub struct ScriptedOracle {
        responses: Mutex<Vec<Result<String, ()>>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedOracle {
        pub fn new(responses: Vec<Result<String, ()>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn always(response: &str) -> Self {
            Self::new(vec![Ok(response.to_string()); 16])
        }

        pub fn failing() -> Self {
            Self::new(vec![Err(()); 16])
        }
    }

    #[async_trait]
    impl Oracle for ScriptedOracle {
        async fn complete(
            &self,
            _system: &str,
            user: &str,
            _params: &CompletionParams,
        ) -> Result<String, LlmError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(user.to_string());
            }
            let Ok(mut responses) = self.responses.lock() else {
                return Err(LlmError::EmptyCompletion);
            };
            if responses.is_empty() {
                return Err(LlmError::EmptyCompletion);
            }
            responses
                .remove(0)
                .map_err(|()| LlmError::EmptyCompletion)
        }
    }
}
