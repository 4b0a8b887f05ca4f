//! Contextual retrieval: which stored facts matter for a query.
//!
//! With a query, the closest facts from the vector index seed a bounded
//! breadth-first walk over the triple store (see
//! [`TripleStore::get_context`](crate::store::TripleStore::get_context)).
//! Without one, the whole data partition is returned. Ephemeral memories
//! never touch a store: the in-memory data graph is the context.

use crate::graph::io::render;
use crate::graph::{Format, Graph, Namespaces};
use crate::llm::{DEFAULT_TEMPERATURE, Prompt, PromptVars, TextBackend};
use crate::store::{StoreResult, Stores};

/// Where recalled facts come from.
#[derive(Clone, Copy)]
pub enum Source<'a> {
    /// The session's own data graph.
    Ephemeral(&'a Graph),
    /// The group's partitions in the stores.
    Stored(Stores<'a>),
}

/// Search and traversal limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecallLimits {
    /// Nearest matches taken from the vector index.
    pub k: usize,
    /// Traversal levels around the matches.
    pub depth: usize,
}

impl Default for RecallLimits {
    fn default() -> Self {
        Self { k: 3, depth: 1 }
    }
}

/// Turtle text of the facts relevant to `query`.
///
/// Never fails: search, traversal and store errors are logged and yield an
/// empty context.
pub fn get_contextual_memory(
    query: Option<&str>,
    group: Option<&str>,
    source: Source<'_>,
    namespaces: &Namespaces,
    limits: RecallLimits,
) -> String {
    let stores = match source {
        Source::Ephemeral(data) => {
            return render(data, Format::Turtle).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to serialize ephemeral memory");
                String::new()
            });
        }
        Source::Stored(stores) => stores,
    };

    let query = query.map(str::trim).filter(|q| !q.is_empty());
    let result = match query {
        Some(q) => search_context(q, group, stores, namespaces, limits),
        None => stores.triple.get_all(namespaces, group),
    };
    result.unwrap_or_else(|e| {
        tracing::warn!(?group, error = %e, "contextual retrieval failed, continuing without context");
        String::new()
    })
}

fn search_context(
    query: &str,
    group: Option<&str>,
    stores: Stores<'_>,
    namespaces: &Namespaces,
    limits: RecallLimits,
) -> StoreResult<String> {
    let matches = stores.vector.search(query, group, limits.k)?;
    tracing::debug!(?group, matches = matches.len(), "vector matches");
    let ids: Vec<String> = matches.into_keys().collect();
    stores
        .triple
        .get_context(&ids, group, limits.depth, namespaces)
}

/// Ask the backend for a prose summary of `memory`, focused on `context`.
///
/// Backend failures are logged and produce an empty summary.
pub fn summarize(llm: &dyn TextBackend, context: Option<&str>, memory: &str) -> String {
    let vars = PromptVars::new()
        .set("context", context.unwrap_or_default())
        .set("memory", memory);
    match llm.complete(Prompt::SummarizeMemory, &vars, DEFAULT_TEMPERATURE) {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!(error = %e, "summarization failed");
            String::new()
        }
    }
}
