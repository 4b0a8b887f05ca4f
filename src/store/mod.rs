//! Persistent memory stores.
//!
//! Two stores back every non-ephemeral memory group:
//!
//! - [`triple`]: the system of record, a SPARQL store holding each group's
//!   ontology and data graphs in named graphs
//! - [`vector`]: a nearest-neighbour index over short text renderings of
//!   each fact, keyed by the fact's statement identifier
//!
//! The statement identifier (see [`crate::graph::reify`]) is the join key
//! between the two.

pub mod durable;
pub mod triple;
pub mod vector;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::graph::{Term, Triple};

pub use triple::{OxigraphStore, SparqlHttpStore, TripleStore};
pub use vector::{HnswVectorStore, VectorStore};

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The two named graphs of a memory group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Ontology,
    Data,
}

const GRAPH_NS: &str = "urn:ontomem:graph:";

impl Partition {
    fn label(self) -> &'static str {
        match self {
            Partition::Ontology => "ontology",
            Partition::Data => "data",
        }
    }

    /// IRI of this partition's named graph: `urn:ontomem:graph:data-<id>`,
    /// or `urn:ontomem:graph:data` for the default group.
    pub fn graph_iri(self, group: Option<&str>) -> String {
        match group {
            Some(id) => format!("{GRAPH_NS}{}-{}", self.label(), encode_group(id)),
            None => format!("{GRAPH_NS}{}", self.label()),
        }
    }
}

/// Percent-encode everything outside the IRI unreserved set.
fn encode_group(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// The stores backing a non-ephemeral memory, borrowed for one operation.
#[derive(Clone, Copy)]
pub struct Stores<'a> {
    pub triple: &'a dyn TripleStore,
    pub vector: &'a dyn VectorStore,
}

/// Name of the vector collection for a group.
pub fn collection_name(group: Option<&str>) -> &str {
    group.unwrap_or("default")
}

/// Vector-index metadata for one fact: the original terms.
///
/// Terms are kept in N-Triples syntax so literals survive the round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactRecord {
    pub s: String,
    pub p: String,
    pub o: String,
}

impl FactRecord {
    pub fn from_triple(triple: &Triple) -> Self {
        Self {
            s: term_key(&triple.subject),
            p: term_key(&triple.predicate),
            o: term_key(&triple.object),
        }
    }
}

/// IRIs as bare strings, everything else in N-Triples syntax.
fn term_key(term: &Term) -> String {
    match term {
        Term::Iri(iri) => iri.clone(),
        other => other.to_string(),
    }
}

impl From<&Triple> for FactRecord {
    fn from(triple: &Triple) -> Self {
        Self::from_triple(triple)
    }
}
