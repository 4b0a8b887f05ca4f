//! Prompt templates and context-window fitting.
//!
//! Templates use `${name}` placeholders. A placeholder with no matching
//! variable renders as the empty string.

use std::sync::LazyLock;

use regex::Regex;

use super::{Prompt, PromptVars};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// The JSON instruction vocabulary shared by every mutation prompt.
const INSTRUCTION_SCHEMA: &str = r#"Respond with a JSON array of operations and nothing else. Allowed operations:
  {"op": "add_triple", "subject": "<curie>", "predicate": "<curie>", "object": "<curie>"}
  {"op": "add_triple", "subject": "<curie>", "predicate": "<curie>", "literal": <string|number|boolean>, "datatype": "<curie, optional>", "lang": "<tag, optional>"}
  {"op": "remove_triple", "subject": "<curie, optional>", "predicate": "<curie, optional>", "object": "<curie, optional>"}
  {"op": "remove_triple", "subject": "<curie, optional>", "predicate": "<curie, optional>", "literal": <string|number|boolean>, "datatype": "<curie, optional>", "lang": "<tag, optional>"}
  {"op": "add_class", "class": "<curie>", "label": "<optional>", "subclass_of": "<curie, optional>"}
  {"op": "add_property", "property": "<curie>", "domain": "<curie, optional>", "range": "<curie, optional>", "label": "<optional>"}
Use only the namespace prefixes declared in the ontology plus rdf, rdfs, owl and xsd.
Local names must not contain spaces.
Return [] if nothing should change."#;

const COMMIT_TO_MEMORY: &str = r#"You maintain an RDF knowledge graph that follows this ontology:

${ontology}

Facts already stored that relate to the message:
${relevant_memory}

Facts that were just updated or removed because of the message:
${updated_memory}

Message:
${user_message}

Record every fact in the message as triples. ${instruction}
Do not repeat facts that are already stored.

${schema}"#;

const COMMIT_TO_MEMORY_ERROR_HANDLING: &str = r#"These graph instructions failed:

${script}

Error:
${error}

Ontology:
${ontology}

They were meant to record this message:
${user_message}

Fix the instructions so they apply cleanly.

${schema}"#;

const EXPAND_ONTOLOGY: &str = r#"Here is an ontology:

${ontology}

Message:
${user_message}

If the message mentions kinds of things or relationships the ontology cannot express, declare the missing classes and properties. Only use add_class and add_property operations, and never redefine what already exists.

${schema}"#;

const SUMMARIZE_MEMORY: &str = r#"Here is what is remembered, as RDF triples:

${memory}

Focus on what is relevant to this, if anything is given:
${context}

Summarize the remembered facts in plain prose. Do not mention triples, IRIs or prefixes, and do not invent facts that are not listed. If nothing is remembered, say so."#;

const UPDATE_MEMORY: &str = r#"Ontology:
${ontology}

Existing facts:
${memory}

New message:
${user_message}

Rewrite any existing fact that the message makes outdated or wrong, and drop facts the message contradicts outright. Keep every other fact exactly as given. Respond with only the resulting facts as JSON, in exactly the same shape and with the same keys as the existing facts."#;

/// Template text for a prompt.
pub fn template(prompt: Prompt) -> &'static str {
    match prompt {
        Prompt::CommitToMemory => COMMIT_TO_MEMORY,
        Prompt::CommitToMemoryErrorHandling => COMMIT_TO_MEMORY_ERROR_HANDLING,
        Prompt::ExpandOntology => EXPAND_ONTOLOGY,
        Prompt::SummarizeMemory => SUMMARIZE_MEMORY,
        Prompt::UpdateMemory => UPDATE_MEMORY,
    }
}

/// Substitute `${name}` placeholders. `${schema}` resolves to the instruction
/// vocabulary unless the caller supplies its own.
pub fn render(template: &str, vars: &PromptVars) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match (vars.get(name), name) {
                (Some(value), _) => value.to_string(),
                (None, "schema") => INSTRUCTION_SCHEMA.to_string(),
                (None, _) => String::new(),
            }
        })
        .into_owned()
}

/// Counts and truncates text in model tokens.
pub trait Tokenizer: Send + Sync {
    fn count(&self, text: &str) -> usize;

    /// Longest prefix of `text` that fits in `max_tokens`.
    fn truncate<'a>(&self, text: &'a str, max_tokens: usize) -> &'a str;
}

/// Four characters per token. Close enough for budgeting English prose and
/// Turtle against any of the supported models.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxTokenizer;

const CHARS_PER_TOKEN: usize = 4;

impl Tokenizer for ApproxTokenizer {
    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }

    fn truncate<'a>(&self, text: &'a str, max_tokens: usize) -> &'a str {
        let max_chars = max_tokens * CHARS_PER_TOKEN;
        match text.char_indices().nth(max_chars) {
            Some((byte, _)) => &text[..byte],
            None => text,
        }
    }
}

/// Render `template` so that it fits in `limit` tokens.
///
/// While the rendered prompt is too long, the variable with the most tokens
/// is cut down by the overflow. Gives up and returns the over-long prompt
/// once every variable is empty.
pub fn fit_to_context_window(
    template: &str,
    vars: &PromptVars,
    limit: usize,
    tokenizer: &dyn Tokenizer,
) -> String {
    let mut vars = vars.clone();
    loop {
        let rendered = render(template, &vars);
        let total = tokenizer.count(&rendered);
        if total <= limit {
            return rendered;
        }

        let longest = vars
            .iter()
            .map(|(name, value)| (tokenizer.count(value), name.to_string()))
            .filter(|(tokens, _)| *tokens > 0)
            .max();
        let Some((tokens, name)) = longest else {
            tracing::warn!(total, limit, "prompt exceeds the context window even with empty variables");
            return rendered;
        };

        let keep = tokens.saturating_sub(total - limit);
        tracing::debug!(variable = %name, from = tokens, to = keep, "truncating prompt variable");
        if let Some(value) = vars.get_mut(&name) {
            let cut = tokenizer.truncate(value, keep).len();
            value.truncate(cut);
        }
    }
}
