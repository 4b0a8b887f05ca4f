//! Update reconciliation: retire facts that a new message supersedes.
//!
//! Before new facts are committed, the facts most related to the message are
//! shown to the text backend, which returns them rewritten where the message
//! makes them outdated. Facts that changed or disappeared are deleted, and a
//! description of the rewritten facts is threaded into the commit prompt.
//!
//! Stored memories delete from the triple store first, then from the vector
//! index. A failed triple-store delete skips the vector delete so neither
//! store changes; a failed vector delete after a successful triple-store
//! delete is reported in [`UpdateOutcome::inconsistent_ids`].

use std::collections::{BTreeMap, HashSet};

use serde::de::DeserializeOwned;

use crate::error::LlmError;
use crate::graph::reify::{remove_statements, strip_reification};
use crate::graph::{Graph, Triple};
use crate::llm::{DEFAULT_TEMPERATURE, LlmResult, Prompt, PromptVars, TextBackend};
use crate::store::{FactRecord, Stores};

/// What a reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Rewritten facts as JSON, for the commit prompt. Empty when nothing
    /// was rewritten.
    pub description: String,
    /// Facts removed from the graph (ephemeral) or statement ids deleted
    /// from the stores.
    pub removed: usize,
    /// Ids deleted from the triple store but still present in the vector
    /// index.
    pub inconsistent_ids: Vec<String>,
}

/// Facts of `updated` that do not appear in `original`, in `updated` order.
pub fn find_updated_triples_ephemeral(
    original: &[FactRecord],
    updated: &[FactRecord],
) -> Vec<FactRecord> {
    let known: HashSet<&FactRecord> = original.iter().collect();
    updated
        .iter()
        .filter(|fact| !known.contains(fact))
        .cloned()
        .collect()
}

/// Ids whose fact the backend rewrote or dropped.
pub fn find_updated_ids(
    original: &BTreeMap<String, FactRecord>,
    updated: &BTreeMap<String, FactRecord>,
) -> Vec<String> {
    original
        .iter()
        .filter(|(id, fact)| updated.get(*id) != Some(*fact))
        .map(|(id, _)| id.clone())
        .collect()
}

/// Asks the text backend which facts a message supersedes.
pub struct Reconciler<'a> {
    llm: &'a dyn TextBackend,
    /// Serialized ontology shown to the backend.
    ontology: &'a str,
    /// Candidate facts fetched from the vector index.
    k: usize,
}

impl<'a> Reconciler<'a> {
    pub fn new(llm: &'a dyn TextBackend, ontology: &'a str, k: usize) -> Self {
        Self { llm, ontology, k }
    }

    /// Reconcile an in-memory data graph against `message`.
    ///
    /// Every fact of the graph is a candidate. Facts missing from the
    /// backend's answer are removed from `data`.
    pub fn ephemeral(&self, message: &str, data: &mut Graph) -> UpdateOutcome {
        let facts: Vec<Triple> = strip_reification(data).iter().cloned().collect();
        if facts.is_empty() {
            return UpdateOutcome::default();
        }
        let original: Vec<FactRecord> = facts.iter().map(FactRecord::from_triple).collect();

        let returned: Vec<FactRecord> = match self.ask(message, &original) {
            Ok(returned) => returned,
            Err(e) => {
                tracing::warn!(error = %e, "update check failed, keeping memory as is");
                return UpdateOutcome::default();
            }
        };

        let kept: HashSet<&FactRecord> = returned.iter().collect();
        let mut removed = 0;
        for (fact, record) in facts.iter().zip(&original) {
            if !kept.contains(record) && data.remove_triple(fact) {
                removed += 1;
            }
        }

        let updated = find_updated_triples_ephemeral(&original, &returned);
        tracing::debug!(removed, updated = updated.len(), "reconciled ephemeral memory");
        UpdateOutcome {
            description: describe(&updated),
            removed,
            inconsistent_ids: Vec::new(),
        }
    }

    /// Reconcile a stored memory group against `message`.
    ///
    /// Retired facts are deleted from both stores and from `data`, which may
    /// hold the group's graph after a remember.
    pub fn stored(
        &self,
        message: &str,
        group: Option<&str>,
        data: &mut Graph,
        stores: Stores<'_>,
    ) -> UpdateOutcome {
        let candidates = match stores.vector.search(message, group, self.k) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(?group, error = %e, "update search failed");
                return UpdateOutcome::default();
            }
        };
        if candidates.is_empty() {
            tracing::debug!(?group, "no related facts to update");
            return UpdateOutcome::default();
        }

        let returned: BTreeMap<String, FactRecord> = match self.ask(message, &candidates) {
            Ok(returned) => returned,
            Err(e) => {
                tracing::warn!(?group, error = %e, "update check failed, keeping memory as is");
                return UpdateOutcome::default();
            }
        };

        let changed = find_updated_ids(&candidates, &returned);
        let updated: Vec<FactRecord> = changed
            .iter()
            .filter_map(|id| returned.get(id).cloned())
            .collect();
        let mut outcome = UpdateOutcome {
            description: describe(&updated),
            ..UpdateOutcome::default()
        };
        if changed.is_empty() {
            return outcome;
        }

        if let Err(e) = stores.triple.delete_by_ids(group, &changed) {
            tracing::error!(?group, ids = ?changed, error = %e, "triple store delete failed, leaving both stores unchanged");
            return outcome;
        }
        let pruned = remove_statements(data, &changed);
        if pruned > 0 {
            tracing::debug!(?group, pruned, "dropped retired facts from the loaded graph");
        }
        if let Err(e) = stores.vector.delete_by_ids(group, &changed) {
            tracing::error!(?group, ids = ?changed, error = %e, "vector delete failed after triple store delete, stores disagree");
            outcome.inconsistent_ids = changed.clone();
        }
        outcome.removed = changed.len();
        tracing::debug!(?group, removed = outcome.removed, "retired superseded facts");
        outcome
    }

    fn ask<T>(&self, message: &str, facts: &T) -> LlmResult<T>
    where
        T: serde::Serialize + DeserializeOwned,
    {
        let memory = serde_json::to_string_pretty(facts).map_err(|e| LlmError::ParseError {
            message: e.to_string(),
        })?;
        let vars = PromptVars::new()
            .set("ontology", self.ontology)
            .set("memory", memory)
            .set("user_message", message);
        let answer = self
            .llm
            .complete(Prompt::UpdateMemory, &vars, DEFAULT_TEMPERATURE)?;
        tracing::debug!(%answer, "update answer");
        parse_json_answer(&answer)
    }
}

/// Decode the JSON value embedded in a model answer, ignoring any prose or
/// code fence around it.
fn parse_json_answer<T: DeserializeOwned>(answer: &str) -> LlmResult<T> {
    let start = answer.find(['[', '{']);
    let close = match start.map(|i| answer.as_bytes()[i]) {
        Some(b'[') => ']',
        _ => '}',
    };
    let json = match (start, answer.rfind(close)) {
        (Some(s), Some(e)) if e > s => &answer[s..=e],
        _ => {
            return Err(LlmError::ParseError {
                message: "no JSON value in update answer".into(),
            });
        }
    };
    serde_json::from_str(json).map_err(|e| LlmError::ParseError {
        message: e.to_string(),
    })
}

fn describe(updated: &[FactRecord]) -> String {
    if updated.is_empty() {
        return String::new();
    }
    serde_json::to_string_pretty(updated).unwrap_or_default()
}
