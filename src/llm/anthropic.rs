//! Anthropic messages-API backend.

use serde::Deserialize;

use super::prompt::{ApproxTokenizer, fit_to_context_window};
use super::{LlmResult, Prompt, PromptVars, TextBackend, post_json};
use crate::error::LlmError;

const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnthropicConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com/v1".into(),
            api_key: String::new(),
            model: "claude-3-5-haiku-latest".into(),
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }
}

/// Context window for a model name, by family prefix.
pub fn context_window(model: &str) -> usize {
    if model.starts_with("claude-2.0") || model == "claude-2" {
        100_000
    } else {
        200_000
    }
}

pub struct AnthropicBackend {
    config: AnthropicConfig,
}

impl AnthropicBackend {
    pub fn new(config: AnthropicConfig) -> Self {
        Self { config }
    }
}

impl TextBackend for AnthropicBackend {
    fn complete(&self, prompt: Prompt, vars: &PromptVars, temperature: f32) -> LlmResult<String> {
        // Leave room for the completion itself.
        let budget = context_window(&self.config.model).saturating_sub(self.config.max_tokens as usize);
        let text = fit_to_context_window(prompt.template(), vars, budget, &ApproxTokenizer);
        tracing::debug!(%prompt, model = %self.config.model, temperature, "anthropic request");

        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": temperature,
            "messages": [{"role": "user", "content": text}],
        });
        let url = format!("{}/messages", self.config.base_url.trim_end_matches('/'));
        let json = post_json(
            &url,
            &[
                ("x-api-key", self.config.api_key.as_str()),
                ("anthropic-version", API_VERSION),
            ],
            &body,
            self.config.timeout_secs,
        )?;

        let text: String = json["content"]
            .as_array()
            .ok_or_else(|| LlmError::ParseError {
                message: "missing 'content' array".into(),
            })?
            .iter()
            .filter(|block| block["type"] == "text")
            .filter_map(|block| block["text"].as_str())
            .collect();
        Ok(text)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

impl std::fmt::Debug for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicBackend")
            .field("model", &self.config.model)
            .finish_non_exhaustive()
    }
}
