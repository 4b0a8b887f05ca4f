//! Vector store adapters.
//!
//! Each indexable fact becomes one short document, e.g. `napoleon born in
//! corsica`, keyed by its statement identifier and carrying the original
//! terms as [`FactRecord`] metadata.

pub mod embed;
pub mod hnsw;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::graph::namespace::{humanize, is_schema, remove_namespace};
use crate::graph::reify::reified_facts;
use crate::graph::{Graph, Namespaces, Term, Triple};

use super::{FactRecord, StoreResult};

pub use self::embed::TextEmbedder;
pub use self::hnsw::{HnswConfig, HnswVectorStore};

/// A nearest-neighbour text index partitioned by memory group.
pub trait VectorStore: Send + Sync {
    /// Index every reified, non-schema fact of `data`. Returns how many
    /// documents were added.
    fn save(&self, data: &Graph, namespaces: &Namespaces, group: Option<&str>) -> StoreResult<usize>;

    /// Up to `k` facts closest to `query`, by statement id.
    fn search(
        &self,
        query: &str,
        group: Option<&str>,
        k: usize,
    ) -> StoreResult<BTreeMap<String, FactRecord>>;

    /// Drop a group's whole collection.
    fn delete(&self, group: Option<&str>) -> StoreResult<()>;

    /// Drop individual documents.
    fn delete_by_ids(&self, group: Option<&str>, ids: &[String]) -> StoreResult<()>;

    fn name(&self) -> &str;
}

/// One indexed fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorDocument {
    pub id: String,
    pub text: String,
    pub record: FactRecord,
}

/// Documents for every fact of `data` that should be indexed: facts with a
/// statement identifier whose predicate is not rdf, rdfs or owl vocabulary.
pub fn documents(data: &Graph, namespaces: &Namespaces) -> Vec<VectorDocument> {
    let mut docs: Vec<VectorDocument> = reified_facts(data)
        .into_iter()
        .filter(|(_, fact)| !is_schema(fact.predicate.value()))
        .map(|(id, fact)| VectorDocument {
            text: document_text(&fact, namespaces),
            record: FactRecord::from_triple(&fact),
            id,
        })
        .collect();
    docs.sort_by(|a, b| a.id.cmp(&b.id));
    docs
}

/// `"<s> <p> <o>"` with namespaces removed and identifiers split into words.
pub fn document_text(fact: &Triple, namespaces: &Namespaces) -> String {
    [&fact.subject, &fact.predicate, &fact.object]
        .into_iter()
        .map(|term| term_words(term, namespaces))
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn term_words(term: &Term, namespaces: &Namespaces) -> String {
    match term {
        Term::Iri(iri) => {
            let local = namespaces
                .iter()
                .filter(|(_, ns)| !ns.is_empty())
                .find_map(|(_, ns)| iri.strip_prefix(ns))
                .filter(|local| !local.is_empty() && !local.contains(['/', '#']))
                .unwrap_or_else(|| remove_namespace(iri));
            humanize(local)
        }
        Term::Blank(_) => String::new(),
        Term::Literal { value, .. } => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::namespace::{RDF_TYPE, RDFS_LABEL};
    use crate::graph::reify::hydrate_with_ids;

    fn ex(local: &str) -> Term {
        Term::iri(format!("http://example.org/{local}"))
    }

    #[test]
    fn text_strips_namespaces_and_splits_words() {
        let fact = Triple::new(ex("Napoleon"), ex("bornIn"), ex("corsica_island"));
        assert_eq!(
            document_text(&fact, &Namespaces::new()),
            "napoleon born in corsica island"
        );

        let lit = Triple::new(ex("Napoleon"), ex("birthYear"), Term::literal("1769"));
        assert_eq!(document_text(&lit, &Namespaces::new()), "napoleon birth year 1769");
    }

    #[test]
    fn bound_namespace_wins_over_last_separator() {
        let mut ns = Namespaces::new();
        ns.bind("ex", "http://example.org/people#");
        let fact = Triple::new(
            Term::iri("http://example.org/people#JoséFerrer"),
            Term::iri("http://example.org/people#knows"),
            Term::iri("urn:isbn:12345"),
        );
        assert_eq!(document_text(&fact, &ns), "josé ferrer knows 12345");
    }

    #[test]
    fn schema_and_unreified_facts_are_not_indexed() {
        let mut g = Graph::new();
        g.add(Triple::new(ex("napoleon"), ex("bornIn"), ex("corsica")));
        g.add(Triple::new(ex("napoleon"), Term::iri(RDF_TYPE), ex("Person")));
        g.add(Triple::new(ex("napoleon"), Term::iri(RDFS_LABEL), Term::literal("N")));
        let hydrated = hydrate_with_ids(&g);
        g.add(Triple::new(ex("late"), ex("p"), ex("o")));

        let docs = documents(&hydrated, &Namespaces::new());
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "napoleon born in corsica");
        assert_eq!(docs[0].record.p, "http://example.org/bornIn");
    }
}
