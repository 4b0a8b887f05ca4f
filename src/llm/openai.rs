//! OpenAI chat-completions backend. Works against any server that speaks
//! the same API (vLLM, llama.cpp server, LM Studio).

use serde::Deserialize;

use super::prompt::{ApproxTokenizer, fit_to_context_window};
use super::{LlmResult, Prompt, PromptVars, TextBackend, post_json};
use crate::error::LlmError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
    pub context_window: usize,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            model: "gpt-4o-mini".into(),
            timeout_secs: 120,
            context_window: 32_000,
        }
    }
}

pub struct OpenAiBackend {
    config: OpenAiConfig,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiConfig) -> Self {
        Self { config }
    }
}

impl TextBackend for OpenAiBackend {
    fn complete(&self, prompt: Prompt, vars: &PromptVars, temperature: f32) -> LlmResult<String> {
        let text = fit_to_context_window(
            prompt.template(),
            vars,
            self.config.context_window,
            &ApproxTokenizer,
        );
        tracing::debug!(%prompt, model = %self.config.model, temperature, "openai request");

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": text}],
            "temperature": temperature,
        });
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let auth = format!("Bearer {}", self.config.api_key);
        let json = post_json(
            &url,
            &[("Authorization", auth.as_str())],
            &body,
            self.config.timeout_secs,
        )?;

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::ParseError {
                message: "missing 'choices[0].message.content' field".into(),
            })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish_non_exhaustive()
    }
}
