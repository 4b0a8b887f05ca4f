//! Embedded triple store backed by oxigraph.
//!
//! Runs in-process, either purely in memory or persisted to a directory.

use oxigraph::sparql::QueryResults;
use oxigraph::store::Store;

use crate::error::StoreError;
use crate::graph::Triple;
use crate::graph::io::{from_ox_term, from_ox_triple};
use crate::store::StoreResult;

use super::{Solution, TripleStore};

/// Embedded SPARQL store.
pub struct OxigraphStore {
    store: Store,
}

impl OxigraphStore {
    /// Create a new in-memory store (no persistence).
    pub fn in_memory() -> StoreResult<Self> {
        let store = Store::new().map_err(|e| StoreError::Sparql {
            message: format!("failed to create oxigraph store: {e}"),
        })?;
        Ok(Self { store })
    }

    /// Open or create a persistent store at the given path.
    pub fn open(path: &std::path::Path) -> StoreResult<Self> {
        std::fs::create_dir_all(path).map_err(|e| StoreError::Io { source: e })?;
        let store = Store::open(path).map_err(|e| StoreError::Sparql {
            message: format!("failed to open oxigraph store at {}: {e}", path.display()),
        })?;
        Ok(Self { store })
    }

    /// Number of quads across all named graphs.
    pub fn len(&self) -> StoreResult<usize> {
        self.store.len().map_err(|e| StoreError::Sparql {
            message: format!("failed to count quads: {e}"),
        })
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        self.len().map(|n| n == 0)
    }
}

fn query_failed(e: impl std::fmt::Display) -> StoreError {
    StoreError::Sparql {
        message: format!("SPARQL query failed: {e}"),
    }
}

impl TripleStore for OxigraphStore {
    fn update(&self, sparql: &str) -> StoreResult<()> {
        tracing::trace!(%sparql, "oxigraph update");
        self.store.update(sparql).map_err(|e| StoreError::Sparql {
            message: format!("SPARQL update failed: {e}"),
        })
    }

    fn construct(&self, sparql: &str) -> StoreResult<Vec<Triple>> {
        tracing::trace!(%sparql, "oxigraph construct");
        match self.store.query(sparql).map_err(query_failed)? {
            QueryResults::Graph(triples) => triples
                .map(|t| {
                    t.map(from_ox_triple).map_err(|e| StoreError::Sparql {
                        message: format!("triple error: {e}"),
                    })
                })
                .collect(),
            _ => Err(StoreError::Sparql {
                message: "expected a CONSTRUCT or DESCRIBE query".into(),
            }),
        }
    }

    fn select(&self, sparql: &str) -> StoreResult<Vec<Solution>> {
        tracing::trace!(%sparql, "oxigraph select");
        match self.store.query(sparql).map_err(query_failed)? {
            QueryResults::Solutions(solutions) => {
                let mut rows = Vec::new();
                for solution in solutions {
                    let solution = solution.map_err(|e| StoreError::Sparql {
                        message: format!("solution error: {e}"),
                    })?;
                    rows.push(
                        solution
                            .iter()
                            .map(|(var, term)| (var.as_str().to_string(), from_ox_term(term.clone())))
                            .collect(),
                    );
                }
                Ok(rows)
            }
            _ => Err(StoreError::Sparql {
                message: "expected a SELECT query".into(),
            }),
        }
    }

    fn name(&self) -> &str {
        "oxigraph"
    }
}

impl std::fmt::Debug for OxigraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OxigraphStore").finish_non_exhaustive()
    }
}
