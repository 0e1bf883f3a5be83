use crate::config::BackendConfig;
use crate::error::{LogiqError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Text-generation backend used for NL→SQL and result summaries.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;

    fn name(&self) -> &str;
}

/// Which strategy produced a query or an explanation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    RemoteBackend,
    TemplateFallback,
}

/// Strategy selected once at construction; the remote variant falls back to
/// templates per call when the backend errors or times out.
#[derive(Clone)]
pub enum Strategy {
    RemoteBackend {
        backend: Arc<dyn CompletionBackend>,
        timeout: Duration,
    },
    TemplateFallback,
}

impl Strategy {
    pub fn from_config(config: &BackendConfig) -> Self {
        match config {
            BackendConfig::Remote {
                api_key,
                model,
                base_url,
                timeout,
            } => Strategy::RemoteBackend {
                backend: Arc::new(LlmClient::new(api_key.clone(), model.clone(), base_url.clone(), *timeout)),
                timeout: *timeout,
            },
            BackendConfig::Disabled => Strategy::TemplateFallback,
        }
    }

    pub fn remote(backend: Arc<dyn CompletionBackend>, timeout: Duration) -> Self {
        Strategy::RemoteBackend { backend, timeout }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::RemoteBackend { .. } => StrategyKind::RemoteBackend,
            Strategy::TemplateFallback => StrategyKind::TemplateFallback,
        }
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::RemoteBackend { backend, timeout } => f
                .debug_struct("RemoteBackend")
                .field("backend", &backend.name())
                .field("timeout", timeout)
                .finish(),
            Strategy::TemplateFallback => f.write_str("TemplateFallback"),
        }
    }
}

/// Run a completion bounded by `timeout`; expiry is reported as an LLM error.
pub async fn complete_within(
    backend: &dyn CompletionBackend,
    timeout: Duration,
    system: &str,
    prompt: &str,
) -> Result<String> {
    match tokio::time::timeout(timeout, backend.complete(system, prompt)).await {
        Ok(result) => result,
        Err(_) => Err(LogiqError::Llm(format!(
            "LLM call timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

/// OpenAI-compatible chat-completions client
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url,
            model,
            timeout,
        }
    }

    pub async fn call_llm(&self, system: &str, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1,
            "max_tokens": 500,
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| LogiqError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LogiqError::Llm(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LogiqError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        extract_content(&response_json)
    }
}

/// Pull `choices[0].message.content` out of a chat-completions payload.
fn extract_content(response_json: &serde_json::Value) -> Result<String> {
    if let Some(error) = response_json.get("error") {
        return Err(LogiqError::Llm(format!("LLM API error: {}", error)));
    }

    let choices = response_json
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| LogiqError::Llm("No choices array in LLM response".to_string()))?;

    let first = choices
        .first()
        .ok_or_else(|| LogiqError::Llm("Empty choices array in LLM response".to_string()))?;

    match first.get("finish_reason").and_then(|r| r.as_str()) {
        Some("content_filter") => {
            return Err(LogiqError::Llm("LLM response was filtered by content policy".to_string()));
        }
        Some("length") => warn!("⚠️  LLM response was truncated due to length limit"),
        _ => {}
    }

    let content = first["message"]["content"]
        .as_str()
        .ok_or_else(|| LogiqError::Llm("No content in LLM response".to_string()))?;

    if content.trim().is_empty() {
        return Err(LogiqError::Llm("Empty content in LLM response".to_string()));
    }

    debug!("LLM returned {} chars", content.len());
    Ok(content.to_string())
}

#[async_trait]
impl CompletionBackend for LlmClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        self.call_llm(system, prompt).await
    }

    fn name(&self) -> &str {
        &self.model
    }
}
