//! Text-generation backends.
//!
//! The memory pipeline talks to a language model only through
//! [`TextBackend::complete`]: a logical prompt name, the variables to
//! substitute, and a sampling temperature. Backends render the template and
//! fit it into their context window before sending it.
//!
//! - [`prompt`]: templates, substitution and context-window fitting
//! - [`ollama`], [`openai`], [`anthropic`]: HTTP backends over blocking `ureq`
//! - [`replay`]: scripted backend for tests and offline dry runs

pub mod anthropic;
pub mod ollama;
pub mod openai;
pub mod prompt;
pub mod replay;

use std::collections::BTreeMap;
use std::fmt;

pub use anthropic::{AnthropicBackend, AnthropicConfig};
pub use ollama::{OllamaBackend, OllamaConfig};
pub use openai::{OpenAiBackend, OpenAiConfig};
pub use prompt::{ApproxTokenizer, Tokenizer, fit_to_context_window};
pub use replay::ReplayBackend;

use crate::error::LlmError;

/// Result type for text-generation calls.
pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Temperature used for mutation synthesis.
pub const COMMIT_TEMPERATURE: f32 = 0.2;
/// Temperature used for ontology expansion.
pub const EXPAND_TEMPERATURE: f32 = 0.3;
/// Temperature used when no step-specific value applies.
pub const DEFAULT_TEMPERATURE: f32 = 0.5;

/// The logical prompt templates the pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Prompt {
    CommitToMemory,
    CommitToMemoryErrorHandling,
    ExpandOntology,
    SummarizeMemory,
    UpdateMemory,
}

impl Prompt {
    pub const ALL: [Prompt; 5] = [
        Prompt::CommitToMemory,
        Prompt::CommitToMemoryErrorHandling,
        Prompt::ExpandOntology,
        Prompt::SummarizeMemory,
        Prompt::UpdateMemory,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Prompt::CommitToMemory => "commit_to_memory",
            Prompt::CommitToMemoryErrorHandling => "commit_to_memory_error_handling",
            Prompt::ExpandOntology => "expand_ontology",
            Prompt::SummarizeMemory => "summarize_memory",
            Prompt::UpdateMemory => "update_memory",
        }
    }

    /// The template text with `${name}` placeholders.
    pub fn template(self) -> &'static str {
        prompt::template(self)
    }
}

impl std::str::FromStr for Prompt {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Prompt::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| format!("unknown prompt \"{s}\""))
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Named values substituted into a prompt template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptVars(BTreeMap<String, String>);

impl PromptVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn set(mut self, name: &str, value: impl Into<String>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut String> {
        self.0.get_mut(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A text-generation service: prompt template in, completion out.
pub trait TextBackend: Send + Sync {
    /// Render `prompt` with `vars`, fit it to the context window, and return
    /// the model's completion.
    fn complete(&self, prompt: Prompt, vars: &PromptVars, temperature: f32) -> LlmResult<String>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

impl fmt::Debug for dyn TextBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TextBackend({})", self.name())
    }
}

/// Shared HTTP plumbing: POST a JSON body and decode a JSON response.
pub(crate) fn post_json(
    url: &str,
    headers: &[(&str, &str)],
    body: &serde_json::Value,
    timeout_secs: u64,
) -> LlmResult<serde_json::Value> {
    let agent = ureq::AgentBuilder::new()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build();

    let body_str = serde_json::to_string(body).map_err(|e| LlmError::RequestFailed {
        message: format!("JSON serialize error: {e}"),
    })?;

    let mut request = agent.post(url).set("Content-Type", "application/json");
    for (name, value) in headers {
        request = request.set(name, value);
    }

    let resp = request.send_string(&body_str).map_err(|e| match e {
        ureq::Error::Transport(t) => {
            tracing::debug!(url, error = %t, "transport failure");
            LlmError::Unavailable {
                url: url.to_string(),
            }
        }
        ureq::Error::Status(code, resp) => LlmError::RequestFailed {
            message: format!(
                "server returned status {code}: {}",
                resp.into_string().unwrap_or_default()
            ),
        },
    })?;

    let resp_str = resp.into_string().map_err(|e| LlmError::ParseError {
        message: e.to_string(),
    })?;

    serde_json::from_str(&resp_str).map_err(|e| LlmError::ParseError {
        message: e.to_string(),
    })
}
