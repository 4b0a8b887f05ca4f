//! The retain pipeline: from a free-text message to committed facts.
//!
//! Steps run strictly in order, each depending on the previous one:
//!
//! 1. ontology expansion (only with `auto_expand`)
//! 2. update reconciliation (only with `auto_update`)
//! 3. commit: instruction synthesis and execution against the data graph
//! 4. persistence, triple store then vector index, and clearing the
//!    in-memory data graph (stored memories only)

use crate::config::MemoryConfig;
use crate::graph::io::render;
use crate::graph::reify::{hydrate_with_known_ids, strip_reification};
use crate::graph::{Format, Graph, Namespaces};
use crate::llm::{COMMIT_TEMPERATURE, EXPAND_TEMPERATURE, Prompt, PromptVars, TextBackend};
use crate::mutation::{ExecutionReport, MutationExecutor, RepairContext};
use crate::recall::{RecallLimits, Source, get_contextual_memory};
use crate::store::Stores;
use crate::update::{Reconciler, UpdateOutcome};

const EXTEND_INSTRUCTION: &str = "If the message holds valuable information the ontology cannot \
     express, record it as well and declare the classes and properties it needs.";
const STRICT_INSTRUCTION: &str = "Never record information that does not fit the ontology.";

/// What one retain call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetainReport {
    /// Ontology expansion, when enabled and the backend answered.
    pub expansion: Option<ExecutionReport>,
    /// Update reconciliation, when enabled.
    pub update: Option<UpdateOutcome>,
    /// The commit, when the backend answered the commit prompt.
    pub commit: Option<ExecutionReport>,
    /// Whether the result reached both stores.
    pub persisted: bool,
}

/// Runs the retain steps for one memory.
pub struct RetainPipeline<'a> {
    llm: &'a dyn TextBackend,
    config: &'a MemoryConfig,
    namespaces: &'a Namespaces,
}

impl<'a> RetainPipeline<'a> {
    pub fn new(llm: &'a dyn TextBackend, config: &'a MemoryConfig, namespaces: &'a Namespaces) -> Self {
        Self {
            llm,
            config,
            namespaces,
        }
    }

    fn executor(&self) -> MutationExecutor<'a> {
        MutationExecutor::new(self.llm, self.config.max_retries, self.config.initial_temperature)
    }

    /// Retain `message` into `data`.
    ///
    /// Without `stores` the memory is ephemeral: `data` keeps the new facts.
    /// With `stores`, the facts are persisted and `data` is cleared.
    pub fn run(
        &self,
        message: &str,
        group: Option<&str>,
        ontology: &mut Graph,
        data: &mut Graph,
        stores: Option<Stores<'_>>,
    ) -> RetainReport {
        let mut report = RetainReport::default();

        if self.config.auto_expand {
            report.expansion = self.expand(message, ontology);
        }
        let ontology_text = turtle(ontology);

        let update = if self.config.auto_update {
            let reconciler = Reconciler::new(self.llm, &ontology_text, self.config.search_k);
            let outcome = match stores {
                Some(stores) => reconciler.stored(message, group, data, stores),
                None => reconciler.ephemeral(message, data),
            };
            Some(outcome)
        } else {
            None
        };

        let source = match stores {
            Some(stores) => Source::Stored(stores),
            None => Source::Ephemeral(&*data),
        };
        let limits = RecallLimits {
            k: self.config.search_k,
            depth: self.config.context_depth,
        };
        let relevant = get_contextual_memory(Some(message), group, source, self.namespaces, limits);

        let instruction = if self.config.auto_expand {
            EXTEND_INSTRUCTION
        } else {
            STRICT_INSTRUCTION
        };
        let vars = PromptVars::new()
            .set("ontology", ontology_text.as_str())
            .set("user_message", message)
            .set(
                "updated_memory",
                update.as_ref().map(|u| u.description.as_str()).unwrap_or_default(),
            )
            .set("relevant_memory", relevant)
            .set("instruction", instruction);
        report.update = update;

        match self.llm.complete(Prompt::CommitToMemory, &vars, COMMIT_TEMPERATURE) {
            Ok(instructions) => {
                if self.config.debug {
                    tracing::debug!(%instructions, "commit instructions");
                }
                let context = RepairContext {
                    ontology: &ontology_text,
                    message,
                };
                let commit = self.executor().execute(instructions, data, self.namespaces, context);
                if !commit.succeeded {
                    tracing::warn!(attempts = commit.attempts, error = ?commit.last_error, "commit gave up");
                }
                report.commit = Some(commit);
            }
            Err(e) => tracing::error!(error = %e, "commit prompt failed"),
        }

        if let Some(stores) = stores {
            report.persisted = persist(ontology, data, group, self.namespaces, stores);
            data.clear();
        }
        report
    }

    /// Let the backend declare missing classes and properties.
    fn expand(&self, message: &str, ontology: &mut Graph) -> Option<ExecutionReport> {
        let ontology_text = turtle(ontology);
        let vars = PromptVars::new()
            .set("ontology", ontology_text.as_str())
            .set("user_message", message);
        let instructions = match self.llm.complete(Prompt::ExpandOntology, &vars, EXPAND_TEMPERATURE) {
            Ok(instructions) => instructions,
            Err(e) => {
                tracing::error!(error = %e, "ontology expansion prompt failed");
                return None;
            }
        };
        let context = RepairContext {
            ontology: &ontology_text,
            message,
        };
        let before = ontology.len();
        let report = self.executor().execute(instructions, ontology, self.namespaces, context);
        tracing::debug!(added = ontology.len().saturating_sub(before), "expanded ontology");
        Some(report)
    }
}

/// Save to the triple store, then index. Returns whether both succeeded.
fn persist(
    ontology: &Graph,
    data: &Graph,
    group: Option<&str>,
    namespaces: &Namespaces,
    stores: Stores<'_>,
) -> bool {
    let facts: Vec<_> = strip_reification(data).iter().cloned().collect();
    let known = match stores.triple.known_ids(&facts, group) {
        Ok(known) => known,
        Err(e) => {
            tracing::error!(?group, store = stores.triple.name(), error = %e, "failed to look up stored facts");
            return false;
        }
    };
    let hydrated = hydrate_with_known_ids(data, &known);
    if let Err(e) = stores.triple.save(ontology, &hydrated, group) {
        tracing::error!(?group, store = stores.triple.name(), error = %e, "failed to save memory");
        return false;
    }
    match stores.vector.save(&hydrated, namespaces, group) {
        Ok(indexed) => {
            tracing::info!(?group, facts = data.len(), indexed, "memory retained");
            true
        }
        Err(e) => {
            tracing::error!(?group, store = stores.vector.name(), error = %e, "failed to index memory");
            false
        }
    }
}

fn turtle(graph: &Graph) -> String {
    render(graph, Format::Turtle).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to serialize graph for prompt");
        String::new()
    })
}
