//! Ollama backend over the `/api/generate` endpoint.

use serde::Deserialize;

use super::prompt::{ApproxTokenizer, fit_to_context_window};
use super::{LlmResult, Prompt, PromptVars, TextBackend, post_json};
use crate::error::LlmError;

/// Configuration for the Ollama backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Base URL for the Ollama API.
    pub base_url: String,
    /// Model name to use.
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Context window in tokens (`num_ctx`).
    pub context_window: usize,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "llama3.2".into(),
            timeout_secs: 120,
            context_window: 8_192,
        }
    }
}

/// Client for a local Ollama server.
pub struct OllamaBackend {
    config: OllamaConfig,
}

impl OllamaBackend {
    pub fn new(config: OllamaConfig) -> Self {
        Self { config }
    }

    /// Check that the server answers on `/api/tags`.
    pub fn probe(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);
        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(5))
            .build();
        matches!(agent.get(&url).call(), Ok(resp) if resp.status() == 200)
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

impl TextBackend for OllamaBackend {
    fn complete(&self, prompt: Prompt, vars: &PromptVars, temperature: f32) -> LlmResult<String> {
        let text = fit_to_context_window(
            prompt.template(),
            vars,
            self.config.context_window,
            &ApproxTokenizer,
        );
        tracing::debug!(%prompt, model = %self.config.model, temperature, "ollama request");

        let body = serde_json::json!({
            "model": self.config.model,
            "prompt": text,
            "stream": false,
            "options": {
                "temperature": temperature,
                "num_ctx": self.config.context_window,
            },
        });
        let url = format!("{}/api/generate", self.config.base_url);
        let json = post_json(&url, &[], &body, self.config.timeout_secs)?;

        json["response"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::ParseError {
                message: "missing 'response' field".into(),
            })
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

impl std::fmt::Debug for OllamaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaBackend")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}
