//! Model client seam.
//!
//! The [`ModelClient`] trait decouples the controller and the sub-call
//! router from the completion backend. Tests use scripted clients; the
//! production client speaks an OpenAI-compatible chat completions API with
//! keys resolved through the external registry seam.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde_json::json;

/// A single completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Requested model id; `None` resolves to the client's default.
    pub model: Option<String>,
    pub system: Option<String>,
    pub prompt: String,
}

/// Abstraction over completion backends.
pub trait ModelClient: Send + Sync {
    fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// External model-registry seam: maps a model id to an API key.
pub trait KeyRegistry: Send + Sync {
    fn api_key(&self, model: &str) -> Result<String>;
}

/// Registry backed by a single environment variable.
pub struct EnvKeyRegistry {
    var: String,
}

impl EnvKeyRegistry {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvKeyRegistry {
    fn default() -> Self {
        Self::new("RLM_API_KEY")
    }
}

impl KeyRegistry for EnvKeyRegistry {
    fn api_key(&self, _model: &str) -> Result<String> {
        std::env::var(&self.var).with_context(|| format!("missing API key in ${}", self.var))
    }
}

/// Blocking HTTP client for OpenAI-compatible chat completion endpoints.
pub struct HttpModelClient {
    http: reqwest::blocking::Client,
    base_url: String,
    default_model: String,
    registry: Arc<dyn KeyRegistry>,
}

impl HttpModelClient {
    pub fn new(
        base_url: impl Into<String>,
        default_model: impl Into<String>,
        registry: Arc<dyn KeyRegistry>,
    ) -> Self {
        Self {
            http: reqwest::blocking::Client::new(),
            base_url: base_url.into(),
            default_model: default_model.into(),
            registry,
        }
    }

    /// Build from `RLM_API_BASE`, `RLM_MODEL`, and `RLM_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("RLM_API_BASE").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let default_model =
            std::env::var("RLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Ok(Self::new(
            base_url,
            default_model,
            Arc::new(EnvKeyRegistry::default()),
        ))
    }
}

impl ModelClient for HttpModelClient {
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let key = self.registry.api_key(&model)?;

        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(key)
            .json(&json!({"model": model, "messages": messages}))
            .send()
            .context("send completion request")?;

        let status = response.status();
        let body: serde_json::Value = response.json().context("parse completion response")?;
        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("unknown completion error");
            return Err(anyhow!("completion failed ({status}): {message}"));
        }
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("completion response missing content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_registry_reports_missing_keys() {
        let registry = EnvKeyRegistry::new("RLM_TEST_KEY_THAT_IS_UNSET");
        let err = registry.api_key("any-model").expect_err("missing key");
        assert!(err.to_string().contains("RLM_TEST_KEY_THAT_IS_UNSET"));
    }
}
