//! In-memory RDF graph model.
//!
//! A [`Graph`] is a duplicate-free set of [`Triple`]s that remembers insertion
//! order, so serialization is deterministic. Two graphs exist per memory
//! group: the ontology (schema) graph and the data (fact) graph.
//!
//! - [`namespace`]: prefix bindings, CURIE expansion and the vocabularies in use
//! - [`reify`]: statement identifiers that join triple-store facts to vector entries
//! - [`io`]: parsing and serialization through oxigraph, plus plain renderers

pub mod io;
pub mod namespace;
pub mod reify;

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use io::Format;
pub use namespace::Namespaces;

/// Result type for graph operations.
pub type GraphResult<T> = std::result::Result<T, crate::error::GraphError>;

/// An RDF term: resource identifier, blank node, or literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    /// Absolute IRI.
    Iri(String),
    /// Blank node label, without the `_:` prefix.
    Blank(String),
    /// Literal value with an optional datatype IRI or language tag.
    Literal {
        value: String,
        datatype: Option<String>,
        language: Option<String>,
    },
}

impl Term {
    pub fn iri(iri: impl Into<String>) -> Self {
        Term::Iri(iri.into())
    }

    pub fn blank(label: impl Into<String>) -> Self {
        Term::Blank(label.into())
    }

    /// A plain string literal.
    pub fn literal(value: impl Into<String>) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: None,
            language: None,
        }
    }

    pub fn typed_literal(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: Some(datatype.into()),
            language: None,
        }
    }

    pub fn lang_literal(value: impl Into<String>, language: impl Into<String>) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: None,
            language: Some(language.into()),
        }
    }

    pub fn is_iri(&self) -> bool {
        matches!(self, Term::Iri(_))
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Term::Blank(_))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal { .. })
    }

    /// The IRI string, the blank label, or the literal's lexical value.
    pub fn value(&self) -> &str {
        match self {
            Term::Iri(iri) => iri,
            Term::Blank(label) => label,
            Term::Literal { value, .. } => value,
        }
    }
}

/// N-Triples syntax for the term, which is also valid inside SPARQL.
impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{iri}>"),
            Term::Blank(label) => write!(f, "_:{label}"),
            Term::Literal {
                value,
                datatype,
                language,
            } => {
                write!(f, "\"{}\"", escape_literal(value))?;
                if let Some(lang) = language {
                    write!(f, "@{lang}")
                } else if let Some(dt) = datatype {
                    write!(f, "^^<{dt}>")
                } else {
                    Ok(())
                }
            }
        }
    }
}

fn escape_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

/// A (subject, predicate, object) fact. Identity is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Triple {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

impl Triple {
    pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}

/// A triple pattern where `None` matches any term.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriplePattern {
    pub subject: Option<Term>,
    pub predicate: Option<Term>,
    pub object: Option<Term>,
}

impl TriplePattern {
    pub fn new(subject: Option<Term>, predicate: Option<Term>, object: Option<Term>) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }

    pub fn matches(&self, triple: &Triple) -> bool {
        self.subject.as_ref().is_none_or(|s| *s == triple.subject)
            && self.predicate.as_ref().is_none_or(|p| *p == triple.predicate)
            && self.object.as_ref().is_none_or(|o| *o == triple.object)
    }
}

/// Duplicate-free, insertion-ordered set of triples with prefix bindings.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    triples: Vec<Triple>,
    index: HashSet<Triple>,
    namespaces: Namespaces,
}

impl Graph {
    /// Create an empty graph with no prefix bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty graph that serializes with the given prefixes.
    pub fn with_namespaces(namespaces: Namespaces) -> Self {
        Self {
            namespaces,
            ..Self::default()
        }
    }

    /// Insert a triple. Returns `false` if it was already present.
    pub fn add(&mut self, triple: Triple) -> bool {
        if self.index.contains(&triple) {
            return false;
        }
        self.index.insert(triple.clone());
        self.triples.push(triple);
        true
    }

    /// Remove every triple matching the pattern, returning how many went.
    pub fn remove(&mut self, pattern: &TriplePattern) -> usize {
        let before = self.triples.len();
        let index = &mut self.index;
        self.triples.retain(|t| {
            if pattern.matches(t) {
                index.remove(t);
                false
            } else {
                true
            }
        });
        before - self.triples.len()
    }

    /// Remove one exact triple.
    pub fn remove_triple(&mut self, triple: &Triple) -> bool {
        if !self.index.remove(triple) {
            return false;
        }
        self.triples.retain(|t| t != triple);
        true
    }

    pub fn contains(&self, triple: &Triple) -> bool {
        self.index.contains(triple)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Triple> {
        self.triples.iter()
    }

    /// Triples matching a pattern, in insertion order.
    pub fn matching<'a>(&'a self, pattern: &'a TriplePattern) -> impl Iterator<Item = &'a Triple> {
        self.triples.iter().filter(move |t| pattern.matches(t))
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// Drop every triple, keeping the prefix bindings.
    pub fn clear(&mut self) {
        self.triples.clear();
        self.index.clear();
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    pub fn bind(&mut self, prefix: impl Into<String>, iri: impl Into<String>) {
        self.namespaces.bind(prefix, iri);
    }

    /// Bind every prefix in `namespaces`, overriding existing bindings.
    pub fn bind_all(&mut self, namespaces: &Namespaces) {
        for (prefix, iri) in namespaces.iter() {
            self.namespaces.bind(prefix, iri);
        }
    }

    /// Add every triple of `other` to this graph.
    pub fn extend_from(&mut self, other: &Graph) {
        for triple in other.iter() {
            self.add(triple.clone());
        }
    }

    /// Structural equality of the triple sets, ignoring order and prefixes.
    pub fn same_triples(&self, other: &Graph) -> bool {
        self.index == other.index
    }
}

impl FromIterator<Triple> for Graph {
    fn from_iter<I: IntoIterator<Item = Triple>>(iter: I) -> Self {
        let mut graph = Graph::new();
        for triple in iter {
            graph.add(triple);
        }
        graph
    }
}

impl<'a> IntoIterator for &'a Graph {
    type Item = &'a Triple;
    type IntoIter = std::slice::Iter<'a, Triple>;

    fn into_iter(self) -> Self::IntoIter {
        self.triples.iter()
    }
}
