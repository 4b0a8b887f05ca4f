//! Statement identifiers via RDF reification.
//!
//! Every persisted fact gets one blank statement node carrying `rdf:subject`,
//! `rdf:predicate`, `rdf:object` edges back to the fact and a
//! `triple:uuid` literal. The uuid is the join key between the triple store
//! and the vector index. Statement nodes are bookkeeping only and are
//! stripped before anything reaches a model prompt or a render.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use super::namespace::{RDF_OBJECT, RDF_PREDICATE, RDF_SUBJECT, TRIPLE_UUID};
use super::{Graph, Term, Triple, TriplePattern};

/// Statement nodes: every subject that carries a `triple:uuid` edge.
fn statement_nodes(graph: &Graph) -> HashSet<&Term> {
    graph
        .iter()
        .filter(|t| matches!(&t.predicate, Term::Iri(p) if p == TRIPLE_UUID))
        .map(|t| &t.subject)
        .collect()
}

/// Whether a triple is reification bookkeeping for the given node set.
fn is_bookkeeping(triple: &Triple, nodes: &HashSet<&Term>) -> bool {
    nodes.contains(&triple.subject)
        || matches!(&triple.predicate, Term::Iri(p) if p == TRIPLE_UUID)
}

/// Copy of `graph` with every statement node and its edges removed.
///
/// Idempotent, and the remaining facts keep their insertion order.
pub fn strip_reification(graph: &Graph) -> Graph {
    let nodes = statement_nodes(graph);
    let mut stripped = Graph::with_namespaces(graph.namespaces().clone());
    for triple in graph.iter().filter(|t| !is_bookkeeping(t, &nodes)) {
        stripped.add(triple.clone());
    }
    stripped
}

/// Copy of `graph` where every fact without a statement node gets one with
/// a freshly generated identifier. Facts that already carry an identifier
/// keep it.
pub fn hydrate_with_ids(graph: &Graph) -> Graph {
    hydrate_with_known_ids(graph, &HashMap::new())
}

/// Like [`hydrate_with_ids`], but a fact listed in `known` is given that
/// identifier instead of a fresh one.
pub fn hydrate_with_known_ids(graph: &Graph, known: &HashMap<Triple, String>) -> Graph {
    let already: HashSet<Triple> = reified_facts(graph).into_values().collect();
    let nodes = statement_nodes(graph);
    let facts: Vec<Triple> = graph
        .iter()
        .filter(|t| !is_bookkeeping(t, &nodes))
        .filter(|t| !already.contains(*t))
        .cloned()
        .collect();

    let mut hydrated = graph.clone();
    for fact in facts {
        let id = match known.get(&fact) {
            Some(id) => id.clone(),
            None => Uuid::new_v4().simple().to_string(),
        };
        let node = Term::blank(format!("stmt{id}"));
        hydrated.add(Triple::new(
            node.clone(),
            Term::iri(RDF_SUBJECT),
            fact.subject.clone(),
        ));
        hydrated.add(Triple::new(
            node.clone(),
            Term::iri(RDF_PREDICATE),
            fact.predicate.clone(),
        ));
        hydrated.add(Triple::new(
            node.clone(),
            Term::iri(RDF_OBJECT),
            fact.object.clone(),
        ));
        hydrated.add(Triple::new(node, Term::iri(TRIPLE_UUID), Term::literal(id)));
    }
    hydrated
}

/// Remove the facts with the given statement ids from `graph`, along with
/// their statement nodes. Returns how many triples were removed.
pub fn remove_statements(graph: &mut Graph, ids: &[String]) -> usize {
    if ids.is_empty() {
        return 0;
    }
    let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let doomed_nodes: Vec<Term> = graph
        .iter()
        .filter(|t| matches!(&t.predicate, Term::Iri(p) if p == TRIPLE_UUID))
        .filter(|t| wanted.contains(t.object.value()))
        .map(|t| t.subject.clone())
        .collect();
    let doomed_facts: Vec<Triple> = reified_facts(graph)
        .into_iter()
        .filter(|(id, _)| wanted.contains(id.as_str()))
        .map(|(_, fact)| fact)
        .collect();

    let mut removed = 0;
    for node in doomed_nodes {
        removed += graph.remove(&TriplePattern::new(Some(node), None, None));
    }
    for fact in &doomed_facts {
        removed += usize::from(graph.remove_triple(fact));
    }
    removed
}

/// Map of statement identifier → the fact its node points to.
///
/// Statement nodes missing any of the three pointer edges are skipped.
pub fn reified_facts(graph: &Graph) -> HashMap<String, Triple> {
    let mut parts: HashMap<&Term, [Option<&Term>; 4]> = HashMap::new();
    for triple in graph.iter() {
        let slot = match &triple.predicate {
            Term::Iri(p) if p == TRIPLE_UUID => 0,
            Term::Iri(p) if p == RDF_SUBJECT => 1,
            Term::Iri(p) if p == RDF_PREDICATE => 2,
            Term::Iri(p) if p == RDF_OBJECT => 3,
            _ => continue,
        };
        parts.entry(&triple.subject).or_default()[slot] = Some(&triple.object);
    }

    parts
        .into_values()
        .filter_map(|[id, s, p, o]| {
            let id = id?.value().to_string();
            Some((id, Triple::new(s?.clone(), p?.clone(), o?.clone())))
        })
        .collect()
}
