//! Scripted text backend.
//!
//! Returns canned completions per prompt and records every call, so the
//! whole pipeline can run without a model server.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use super::{LlmResult, Prompt, PromptVars, TextBackend};
use crate::error::LlmError;

/// One recorded `complete` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub prompt: Prompt,
    pub vars: PromptVars,
    pub temperature: f32,
}

#[derive(Debug, Default)]
struct Script {
    queued: HashMap<Prompt, VecDeque<String>>,
    defaults: HashMap<Prompt, String>,
    calls: Vec<RecordedCall>,
}

/// A backend that answers from a script.
///
/// Queued responses are consumed first, in order; after that the prompt's
/// default is returned on every call. A prompt with neither fails with
/// [`LlmError::Exhausted`].
#[derive(Debug, Default)]
pub struct ReplayBackend {
    script: Mutex<Script>,
}

impl ReplayBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one response for `prompt`.
    pub fn respond(self, prompt: Prompt, text: impl Into<String>) -> Self {
        self.push(prompt, text);
        self
    }

    /// Response for `prompt` once its queue is empty.
    pub fn with_default(self, prompt: Prompt, text: impl Into<String>) -> Self {
        self.lock().defaults.insert(prompt, text.into());
        self
    }

    pub fn push(&self, prompt: Prompt, text: impl Into<String>) {
        self.lock()
            .queued
            .entry(prompt)
            .or_default()
            .push_back(text.into());
    }

    /// Every call so far, oldest first.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, prompt: Prompt) -> usize {
        self.lock().calls.iter().filter(|c| c.prompt == prompt).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TextBackend for ReplayBackend {
    fn complete(&self, prompt: Prompt, vars: &PromptVars, temperature: f32) -> LlmResult<String> {
        let mut script = self.lock();
        script.calls.push(RecordedCall {
            prompt,
            vars: vars.clone(),
            temperature,
        });

        let queued = script.queued.get_mut(&prompt).and_then(VecDeque::pop_front);
        queued
            .or_else(|| script.defaults.get(&prompt).cloned())
            .ok_or_else(|| LlmError::Exhausted {
                prompt: prompt.to_string(),
            })
    }

    fn name(&self) -> &str {
        "replay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_then_default() {
        let llm = ReplayBackend::new()
            .respond(Prompt::SummarizeMemory, "first")
            .with_default(Prompt::SummarizeMemory, "again");
        let vars = PromptVars::new();

        assert_eq!(llm.complete(Prompt::SummarizeMemory, &vars, 0.5).unwrap(), "first");
        assert_eq!(llm.complete(Prompt::SummarizeMemory, &vars, 0.5).unwrap(), "again");
        assert_eq!(llm.complete(Prompt::SummarizeMemory, &vars, 0.5).unwrap(), "again");
        assert_eq!(llm.call_count(Prompt::SummarizeMemory), 3);
    }

    #[test]
    fn unscripted_prompt_is_exhausted_but_recorded() {
        let llm = ReplayBackend::new();
        let vars = PromptVars::new().set("user_message", "hi");
        let err = llm.complete(Prompt::CommitToMemory, &vars, 0.2).unwrap_err();
        assert!(matches!(err, LlmError::Exhausted { .. }));

        let calls = llm.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].vars.get("user_message"), Some("hi"));
        assert!((calls[0].temperature - 0.2).abs() < f32::EPSILON);
    }
}
