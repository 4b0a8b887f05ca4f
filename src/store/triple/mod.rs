//! Triple store adapters.
//!
//! A backend only has to evaluate three kinds of SPARQL request
//! ([`TripleStore::update`], [`TripleStore::construct`],
//! [`TripleStore::select`]). Every memory operation is a provided method
//! written once against those primitives, so the embedded and the remote
//! store share one partitioning and reification convention.

pub mod http;
pub mod oxigraph;

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::graph::namespace::{RDF_OBJECT, RDF_PREDICATE, RDF_SUBJECT, TRIPLE_UUID};
use crate::graph::{Format, Graph, Namespaces, Term, Triple};

use super::{Partition, StoreResult};

pub use self::http::{SparqlHttpConfig, SparqlHttpStore};
pub use self::oxigraph::OxigraphStore;

/// One SELECT solution: variable name (without `?`) to bound term.
pub type Solution = BTreeMap<String, Term>;

/// A SPARQL 1.1 triple store partitioned into per-group named graphs.
pub trait TripleStore: Send + Sync {
    /// Run a SPARQL update.
    fn update(&self, sparql: &str) -> StoreResult<()>;

    /// Run a CONSTRUCT or DESCRIBE query.
    fn construct(&self, sparql: &str) -> StoreResult<Vec<Triple>>;

    /// Run a SELECT query.
    fn select(&self, sparql: &str) -> StoreResult<Vec<Solution>>;

    /// Short name for logs.
    fn name(&self) -> &str;

    /// Persist a group's graphs.
    ///
    /// The stored ontology is replaced by `ontology`. Data triples are
    /// added; statement nodes whose identifier is already stored are
    /// skipped so a reloaded graph can be saved again without duplicating
    /// its bookkeeping.
    fn save(&self, ontology: &Graph, data: &Graph, group: Option<&str>) -> StoreResult<()> {
        let ontology_iri = Partition::Ontology.graph_iri(group);
        let data_iri = Partition::Data.graph_iri(group);

        let ids = statement_ids(data);
        let stored = stored_ids(self, &ids, &data_iri)?;
        let skip: HashSet<&Term> = ids
            .iter()
            .filter(|(_, id)| stored.contains(*id))
            .map(|(node, _)| *node)
            .collect();

        let data_block: String = data
            .iter()
            .filter(|t| !skip.contains(&t.subject))
            .map(|t| format!("    {t}\n"))
            .collect();
        let ontology_block: String = ontology.iter().map(|t| format!("    {t}\n")).collect();

        tracing::debug!(
            store = self.name(),
            ontology = ontology.len(),
            data = data.len(),
            skipped_statements = skip.len(),
            "saving graphs"
        );
        self.update(&format!(
            "DROP SILENT GRAPH <{ontology_iri}> ;\n\
             INSERT DATA {{\n  GRAPH <{ontology_iri}> {{\n{ontology_block}  }}\n  \
             GRAPH <{data_iri}> {{\n{data_block}  }}\n}}"
        ))
    }

    /// Load a group's ontology and data graphs, bound to `namespaces`.
    fn load(&self, namespaces: &Namespaces, group: Option<&str>) -> StoreResult<(Graph, Graph)> {
        let load_partition = |partition: Partition| -> StoreResult<Graph> {
            let iri = partition.graph_iri(group);
            let triples = self.construct(&format!(
                "CONSTRUCT {{ ?s ?p ?o }} WHERE {{ GRAPH <{iri}> {{ ?s ?p ?o }} }}"
            ))?;
            let mut graph = Graph::with_namespaces(namespaces.clone());
            for t in triples {
                graph.add(t);
            }
            Ok(graph)
        };
        let ontology = load_partition(Partition::Ontology)?;
        let data = load_partition(Partition::Data)?;
        tracing::debug!(store = self.name(), ontology = ontology.len(), data = data.len(), "loaded graphs");
        Ok((ontology, data))
    }

    /// Every fact in the group's data graph that mentions `uri` in any position.
    fn get(&self, uri: &str, group: Option<&str>) -> StoreResult<Vec<Triple>> {
        let data_iri = Partition::Data.graph_iri(group);
        let node = Term::iri(uri);
        self.construct(&format!(
            "CONSTRUCT {{ ?s ?p ?o }} WHERE {{ GRAPH <{data_iri}> {{\n  \
             ?s ?p ?o .\n  \
             FILTER (?s = {node} || ?p = {node} || ?o = {node})\n  \
             FILTER NOT EXISTS {{ ?s <{TRIPLE_UUID}> ?id }}\n}} }}"
        ))
    }

    /// All facts of the group as Turtle, bookkeeping excluded. Empty string
    /// when the group has no facts.
    fn get_all(&self, namespaces: &Namespaces, group: Option<&str>) -> StoreResult<String> {
        let data_iri = Partition::Data.graph_iri(group);
        let triples = self.construct(&format!(
            "CONSTRUCT {{ ?s ?p ?o }} WHERE {{ GRAPH <{data_iri}> {{\n  \
             ?s ?p ?o .\n  \
             FILTER NOT EXISTS {{ ?s <{TRIPLE_UUID}> ?id }}\n}} }}"
        ))?;
        to_turtle(triples, namespaces)
    }

    /// Statement ids already stored for any of `facts`.
    ///
    /// Facts with a blank node in them cannot be matched across graphs and
    /// are never found.
    fn known_ids(&self, facts: &[Triple], group: Option<&str>) -> StoreResult<HashMap<Triple, String>> {
        let rows: Vec<String> = facts
            .iter()
            .filter(|t| !t.subject.is_blank() && !t.object.is_blank())
            .map(|t| format!("({} {} {})", t.subject, t.predicate, t.object))
            .collect();
        if rows.is_empty() {
            return Ok(HashMap::new());
        }
        let data_iri = Partition::Data.graph_iri(group);
        let solutions = self.select(&format!(
            "SELECT ?s ?p ?o ?id WHERE {{ GRAPH <{data_iri}> {{\n  \
             VALUES (?s ?p ?o) {{ {} }}\n  \
             ?stmt <{TRIPLE_UUID}> ?id ;\n    \
             <{RDF_SUBJECT}> ?s ;\n    \
             <{RDF_PREDICATE}> ?p ;\n    \
             <{RDF_OBJECT}> ?o .\n}} }}",
            rows.join(" ")
        ))?;
        Ok(solutions
            .into_iter()
            .filter_map(|mut row| {
                let id = row.remove("id")?.value().to_string();
                Some((Triple::new(row.remove("s")?, row.remove("p")?, row.remove("o")?), id))
            })
            .collect())
    }

    /// Contextual neighbourhood of the facts with the given statement ids.
    ///
    /// The matched facts seed a frontier of their subjects and objects. Each
    /// level fetches every fact touching the frontier, and the nodes not
    /// seen before become the next frontier. The facts fetched by the last
    /// level that ran are returned as Turtle. At depth 0 the matched facts
    /// themselves are returned.
    fn get_context(
        &self,
        ids: &[String],
        group: Option<&str>,
        depth: usize,
        namespaces: &Namespaces,
    ) -> StoreResult<String> {
        if ids.is_empty() {
            return Ok(String::new());
        }
        let data_iri = Partition::Data.graph_iri(group);

        let matched = self.select(&format!(
            "SELECT ?s ?p ?o WHERE {{ GRAPH <{data_iri}> {{\n  \
             VALUES ?id {{ {} }}\n  \
             ?stmt <{TRIPLE_UUID}> ?id ;\n    \
             <{RDF_SUBJECT}> ?s ;\n    \
             <{RDF_PREDICATE}> ?p ;\n    \
             <{RDF_OBJECT}> ?o .\n}} }}",
            literal_list(ids)
        ))?;

        let mut explored: HashSet<Term> = HashSet::new();
        let mut frontier: Vec<Term> = Vec::new();
        for row in &matched {
            for term in ["s", "o"].into_iter().filter_map(|var| row.get(var)) {
                if !term.is_blank() && explored.insert(term.clone()) {
                    frontier.push(term.clone());
                }
            }
        }
        tracing::debug!(matched = matched.len(), nodes = frontier.len(), "hydrated matches");
        if depth == 0 {
            let facts = matched
                .into_iter()
                .filter_map(|mut row| {
                    Some(Triple::new(row.remove("s")?, row.remove("p")?, row.remove("o")?))
                })
                .collect();
            return to_turtle(facts, namespaces);
        }

        let mut level = Vec::new();
        for hop in 0..depth {
            if frontier.is_empty() {
                break;
            }
            let nodes = frontier
                .iter()
                .map(Term::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            level = self.construct(&format!(
                "CONSTRUCT {{ ?s ?p ?o }} WHERE {{ GRAPH <{data_iri}> {{\n  \
                 ?s ?p ?o .\n  \
                 FILTER (?s IN ({nodes}) || ?o IN ({nodes}))\n  \
                 FILTER NOT EXISTS {{ ?s <{TRIPLE_UUID}> ?id }}\n}} }}"
            ))?;

            frontier = Vec::new();
            for t in &level {
                for term in [&t.subject, &t.object] {
                    if !term.is_blank() && explored.insert(term.clone()) {
                        frontier.push(term.clone());
                    }
                }
            }
            tracing::debug!(hop = hop + 1, facts = level.len(), next = frontier.len(), "expanded context");
        }

        to_turtle(level, namespaces)
    }

    /// Drop both of a group's named graphs.
    fn delete(&self, group: Option<&str>) -> StoreResult<()> {
        let ontology_iri = Partition::Ontology.graph_iri(group);
        let data_iri = Partition::Data.graph_iri(group);
        tracing::debug!(store = self.name(), ?group, "dropping group graphs");
        self.update(&format!(
            "DROP SILENT GRAPH <{ontology_iri}> ;\nDROP SILENT GRAPH <{data_iri}>"
        ))
    }

    /// Remove the facts with the given statement ids, together with their
    /// statement nodes.
    fn delete_by_ids(&self, group: Option<&str>, ids: &[String]) -> StoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let data_iri = Partition::Data.graph_iri(group);
        tracing::debug!(store = self.name(), count = ids.len(), "deleting facts by id");
        self.update(&format!(
            "WITH <{data_iri}>\n\
             DELETE {{ ?stmt ?sp ?so . ?s ?p ?o }}\n\
             WHERE {{\n  \
             VALUES ?id {{ {} }}\n  \
             ?stmt <{TRIPLE_UUID}> ?id ;\n    \
             <{RDF_SUBJECT}> ?s ;\n    \
             <{RDF_PREDICATE}> ?p ;\n    \
             <{RDF_OBJECT}> ?o ;\n    \
             ?sp ?so .\n}}",
            literal_list(ids)
        ))
    }

    /// Run a caller-written query.
    ///
    /// CONSTRUCT and DESCRIBE results are returned as-is. For SELECT, rows
    /// binding `?s`, `?p` and `?o` become triples and other rows are dropped.
    fn query(&self, sparql: &str) -> StoreResult<Vec<Triple>> {
        if is_graph_query(sparql) {
            return self.construct(sparql);
        }
        let rows = self.select(sparql)?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| {
                Some(Triple::new(row.remove("s")?, row.remove("p")?, row.remove("o")?))
            })
            .collect())
    }
}

/// Statement node → identifier, for every node in `graph` carrying one.
fn statement_ids(graph: &Graph) -> HashMap<&Term, String> {
    graph
        .iter()
        .filter(|t| matches!(&t.predicate, Term::Iri(p) if p == TRIPLE_UUID))
        .map(|t| (&t.subject, t.object.value().to_string()))
        .collect()
}

/// Which of `ids` already exist in the named graph.
fn stored_ids<S: TripleStore + ?Sized>(
    store: &S,
    ids: &HashMap<&Term, String>,
    graph_iri: &str,
) -> StoreResult<HashSet<String>> {
    if ids.is_empty() {
        return Ok(HashSet::new());
    }
    let values: Vec<String> = ids.values().cloned().collect();
    let rows = store.select(&format!(
        "SELECT ?id WHERE {{ GRAPH <{graph_iri}> {{\n  \
         VALUES ?id {{ {} }}\n  \
         ?stmt <{TRIPLE_UUID}> ?id .\n}} }}",
        literal_list(&values)
    ))?;
    Ok(rows
        .into_iter()
        .filter_map(|mut row| row.remove("id"))
        .map(|term| term.value().to_string())
        .collect())
}

fn literal_list(ids: &[String]) -> String {
    ids.iter()
        .map(|id| Term::literal(id.as_str()).to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn to_turtle(triples: Vec<Triple>, namespaces: &Namespaces) -> StoreResult<String> {
    if triples.is_empty() {
        return Ok(String::new());
    }
    let mut graph = Graph::with_namespaces(namespaces.clone());
    for t in triples {
        graph.add(t);
    }
    Ok(graph.serialize(Format::Turtle)?)
}

/// Whether the query form is CONSTRUCT or DESCRIBE.
fn is_graph_query(sparql: &str) -> bool {
    let upper = sparql.to_ascii_uppercase();
    let graph_form = [upper.find("CONSTRUCT"), upper.find("DESCRIBE")]
        .into_iter()
        .flatten()
        .min();
    match (graph_form, upper.find("SELECT")) {
        (Some(g), Some(s)) => g < s,
        (Some(_), None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_form_detection() {
        assert!(is_graph_query("CONSTRUCT { ?s ?p ?o } WHERE { ?s ?p ?o }"));
        assert!(is_graph_query("PREFIX ex: <http://e/> describe ex:a"));
        assert!(!is_graph_query("SELECT ?s ?p ?o WHERE { ?s ?p ?o }"));
        assert!(!is_graph_query(
            "SELECT ?s WHERE { { SELECT ?s WHERE { ?s ?p ?o } } }"
        ));
    }

    #[test]
    fn literal_list_quotes_and_escapes() {
        let ids = vec!["abc".to_string(), "a\"b".to_string()];
        assert_eq!(literal_list(&ids), r#""abc" "a\"b""#);
    }
}
