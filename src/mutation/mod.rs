//! Mutation executor: applies model-synthesized edits with bounded repair.
//!
//! Instructions come from the text backend as a JSON array (see
//! [`instruction`]). When an attempt fails to decode or apply, the error, the
//! failed instructions, the ontology and the user message go back to the
//! backend under the `commit_to_memory_error_handling` prompt, with the
//! temperature doubling each round (capped at 1.0). The graph is snapshotted
//! before every attempt and restored when the attempt fails.

pub mod instruction;

use crate::graph::{Graph, Namespaces};
use crate::llm::{Prompt, PromptVars, TextBackend};

use instruction::{Resolver, apply, parse_instructions};

/// What the executor needs besides the instructions themselves.
#[derive(Debug, Clone, Copy)]
pub struct RepairContext<'a> {
    /// Serialized ontology shown to the backend in repair prompts.
    pub ontology: &'a str,
    /// The original user message.
    pub message: &'a str,
}

/// Outcome of an [`MutationExecutor::execute`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Number of times instructions were applied (successfully or not).
    pub attempts: usize,
    /// Whether the final attempt succeeded.
    pub succeeded: bool,
    /// Triples added plus triples removed by the successful attempt.
    pub changed: usize,
    /// Error text of the last failed attempt, if any.
    pub last_error: Option<String>,
}

/// Applies instruction sets to a graph, asking the backend to repair failures.
pub struct MutationExecutor<'a> {
    llm: &'a dyn TextBackend,
    max_retries: usize,
    initial_temperature: f32,
}

impl<'a> MutationExecutor<'a> {
    pub fn new(llm: &'a dyn TextBackend, max_retries: usize, initial_temperature: f32) -> Self {
        Self {
            llm,
            max_retries,
            initial_temperature,
        }
    }

    /// Temperature for the repair request after failed attempt `attempt` (0-based).
    pub fn repair_temperature(&self, attempt: usize) -> f32 {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        (self.initial_temperature * 2f32.powi(exp)).min(1.0)
    }

    /// Apply `instructions` to `graph`.
    ///
    /// Runs at most `max_retries + 1` attempts and asks for at most
    /// `max_retries` repairs. Never fails: when every attempt errors the graph
    /// is left as it was before the call and the report says so.
    pub fn execute(
        &self,
        instructions: String,
        graph: &mut Graph,
        namespaces: &Namespaces,
        context: RepairContext<'_>,
    ) -> ExecutionReport {
        let resolver = Resolver::new(namespaces);
        let mut script = instructions;
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            let snapshot = graph.clone();
            let result = parse_instructions(&script).and_then(|ops| apply(&ops, graph, &resolver));

            match result {
                Ok(changed) => {
                    tracing::debug!(attempt = attempt + 1, changed, "instructions applied");
                    return ExecutionReport {
                        attempts: attempt + 1,
                        succeeded: true,
                        changed,
                        last_error: None,
                    };
                }
                Err(e) => {
                    *graph = snapshot;
                    tracing::warn!(attempt = attempt + 1, error = %e, "instructions failed to apply");
                    let error = e.to_string();

                    if attempt < self.max_retries {
                        let temperature = self.repair_temperature(attempt);
                        let vars = PromptVars::new()
                            .set("error", &error)
                            .set("script", &script)
                            .set("ontology", context.ontology)
                            .set("user_message", context.message);
                        match self
                            .llm
                            .complete(Prompt::CommitToMemoryErrorHandling, &vars, temperature)
                        {
                            Ok(repaired) => {
                                tracing::debug!(attempt = attempt + 1, %repaired, "repaired instructions");
                                script = repaired;
                            }
                            Err(llm_err) => {
                                tracing::warn!(error = %llm_err, "repair request failed, giving up");
                                return ExecutionReport {
                                    attempts: attempt + 1,
                                    succeeded: false,
                                    changed: 0,
                                    last_error: Some(error),
                                };
                            }
                        }
                    }
                    last_error = Some(error);
                }
            }
        }

        ExecutionReport {
            attempts: self.max_retries + 1,
            succeeded: false,
            changed: 0,
            last_error,
        }
    }
}
