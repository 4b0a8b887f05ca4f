//! Parsing, serialization and plain renderers for [`Graph`].
//!
//! Turtle and N-Triples go through oxigraph's RDF I/O; JSON-LD, the text
//! listing and Graphviz DOT are rendered directly since they only need to
//! be written, never read back.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

use oxigraph::io::{RdfFormat, RdfParser, RdfSerializer};
use oxigraph::model::{
    BlankNode, Literal, NamedNode, Term as OxTerm, Triple as OxTriple,
};

use crate::error::GraphError;

use super::namespace::{
    RDF_LANG_STRING, RDF_TYPE, XSD_STRING, is_schema, remove_namespace,
};
use super::reify::strip_reification;
use super::{Graph, GraphResult, Term, Triple};

/// Output formats for a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Turtle,
    NTriples,
    JsonLd,
    /// One `(subject) -> [predicate] -> (object)` line per fact.
    Text,
    /// Graphviz DOT source; rasterise with `dot -Tpng`.
    Dot,
}

impl Format {
    pub fn name(self) -> &'static str {
        match self {
            Format::Turtle => "turtle",
            Format::NTriples => "ntriples",
            Format::JsonLd => "json-ld",
            Format::Text => "text",
            Format::Dot => "dot",
        }
    }

    fn rdf_format(self) -> Option<RdfFormat> {
        match self {
            Format::Turtle => Some(RdfFormat::Turtle),
            Format::NTriples => Some(RdfFormat::NTriples),
            _ => None,
        }
    }
}

impl FromStr for Format {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "turtle" | "ttl" => Ok(Format::Turtle),
            "ntriples" | "nt" | "triples" => Ok(Format::NTriples),
            "json-ld" | "jsonld" | "json" => Ok(Format::JsonLd),
            "text" | "txt" => Ok(Format::Text),
            "dot" | "image" | "graphviz" => Ok(Format::Dot),
            other => Err(GraphError::UnsupportedFormat {
                format: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// oxigraph model conversion
// ---------------------------------------------------------------------------

fn named_node(iri: &str) -> GraphResult<NamedNode> {
    NamedNode::new(iri).map_err(|e| GraphError::InvalidIri {
        iri: iri.to_string(),
        message: e.to_string(),
    })
}

fn blank_node(label: &str) -> GraphResult<BlankNode> {
    BlankNode::new(label).map_err(|e| GraphError::InvalidTerm {
        position: "blank node",
        term: format!("_:{label} ({e})"),
    })
}

pub(crate) fn to_ox_term(term: &Term) -> GraphResult<OxTerm> {
    Ok(match term {
        Term::Iri(iri) => named_node(iri)?.into(),
        Term::Blank(label) => blank_node(label)?.into(),
        Term::Literal {
            value,
            datatype,
            language,
        } => {
            let literal = match (language, datatype) {
                (Some(lang), _) => Literal::new_language_tagged_literal(value.as_str(), lang.as_str())
                    .map_err(|e| GraphError::InvalidTerm {
                        position: "object",
                        term: format!("{term} ({e})"),
                    })?,
                (None, Some(dt)) => Literal::new_typed_literal(value.as_str(), named_node(dt)?),
                (None, None) => Literal::new_simple_literal(value.as_str()),
            };
            literal.into()
        }
    })
}

pub(crate) fn to_ox_triple(triple: &Triple) -> GraphResult<OxTriple> {
    let predicate = match &triple.predicate {
        Term::Iri(iri) => named_node(iri)?,
        other => {
            return Err(GraphError::InvalidTerm {
                position: "predicate",
                term: other.to_string(),
            });
        }
    };
    let object = to_ox_term(&triple.object)?;
    match &triple.subject {
        Term::Iri(iri) => Ok(OxTriple::new(named_node(iri)?, predicate, object)),
        Term::Blank(label) => Ok(OxTriple::new(blank_node(label)?, predicate, object)),
        other => Err(GraphError::InvalidTerm {
            position: "subject",
            term: other.to_string(),
        }),
    }
}

#[allow(unreachable_patterns)]
pub(crate) fn from_ox_term(term: OxTerm) -> Term {
    match term {
        OxTerm::NamedNode(node) => Term::Iri(node.into_string()),
        OxTerm::BlankNode(node) => Term::Blank(node.into_string()),
        OxTerm::Literal(literal) => {
            let language = literal.language().map(str::to_string);
            let datatype = literal.datatype().as_str();
            let datatype = if language.is_some() || datatype == XSD_STRING || datatype == RDF_LANG_STRING {
                None
            } else {
                Some(datatype.to_string())
            };
            Term::Literal {
                value: literal.value().to_string(),
                datatype,
                language,
            }
        }
        other => Term::literal(other.to_string()),
    }
}

pub(crate) fn from_ox_triple(triple: OxTriple) -> Triple {
    Triple::new(
        from_ox_term(OxTerm::from(triple.subject)),
        Term::Iri(triple.predicate.into_string()),
        from_ox_term(triple.object),
    )
}

// ---------------------------------------------------------------------------
// Parse / serialize
// ---------------------------------------------------------------------------

/// Parse Turtle or N-Triples text into a new graph.
pub fn parse(text: &str, format: Format) -> GraphResult<Graph> {
    let rdf_format = format.rdf_format().ok_or(GraphError::UnsupportedFormat {
        format: format.to_string(),
    })?;

    let mut graph = Graph::new();
    for quad in RdfParser::from_format(rdf_format).for_reader(text.as_bytes()) {
        let quad = quad.map_err(|e| GraphError::Parse {
            format: format.to_string(),
            message: e.to_string(),
        })?;
        graph.add(Triple::new(
            from_ox_term(OxTerm::from(quad.subject)),
            Term::Iri(quad.predicate.into_string()),
            from_ox_term(quad.object),
        ));
    }
    Ok(graph)
}

impl Graph {
    /// Parse text and add its triples to this graph.
    pub fn parse(&mut self, text: &str, format: Format) -> GraphResult<usize> {
        let parsed = parse(text, format)?;
        let before = self.len();
        self.extend_from(&parsed);
        Ok(self.len() - before)
    }

    /// Serialize every triple, bookkeeping included, in the given format.
    ///
    /// Use [`render`] for anything user-facing.
    pub fn serialize(&self, format: Format) -> GraphResult<String> {
        match format {
            Format::Turtle | Format::NTriples => self.serialize_rdf(format),
            Format::JsonLd => Ok(self.to_json_ld()),
            Format::Text => Ok(self.to_text()),
            Format::Dot => Ok(self.to_dot()),
        }
    }

    fn serialize_rdf(&self, format: Format) -> GraphResult<String> {
        let err = |message: String| GraphError::Serialize {
            format: format.to_string(),
            message,
        };

        let mut serializer = RdfSerializer::from_format(format.rdf_format().ok_or_else(|| {
            err("not an RDF syntax".into())
        })?);
        if format == Format::Turtle {
            for (prefix, iri) in self.namespaces().with_standard().iter() {
                serializer = serializer
                    .with_prefix(prefix, iri)
                    .map_err(|e| err(e.to_string()))?;
            }
        }

        let mut writer = serializer.for_writer(Vec::new());
        for triple in self.iter() {
            let triple = to_ox_triple(triple)?;
            writer
                .serialize_triple(&triple)
                .map_err(|e| err(e.to_string()))?;
        }
        let bytes = writer.finish().map_err(|e| err(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| err(e.to_string()))
    }

    /// Expanded JSON-LD: one node object per subject.
    fn to_json_ld(&self) -> String {
        let mut nodes: BTreeMap<String, serde_json::Map<String, serde_json::Value>> =
            BTreeMap::new();
        let id_of = |term: &Term| match term {
            Term::Blank(label) => format!("_:{label}"),
            other => other.value().to_string(),
        };

        for triple in self.iter() {
            let node = nodes.entry(id_of(&triple.subject)).or_insert_with(|| {
                let mut map = serde_json::Map::new();
                map.insert("@id".into(), serde_json::Value::String(id_of(&triple.subject)));
                map
            });

            let is_type = triple.predicate.value() == RDF_TYPE && !triple.object.is_literal();
            let (key, value) = if is_type {
                ("@type".to_string(), serde_json::Value::String(id_of(&triple.object)))
            } else {
                let value = match &triple.object {
                    Term::Literal {
                        value,
                        datatype,
                        language,
                    } => {
                        let mut lit = serde_json::json!({ "@value": value });
                        if let Some(dt) = datatype {
                            lit["@type"] = serde_json::Value::String(dt.clone());
                        }
                        if let Some(lang) = language {
                            lit["@language"] = serde_json::Value::String(lang.clone());
                        }
                        lit
                    }
                    other => serde_json::json!({ "@id": id_of(other) }),
                };
                (triple.predicate.value().to_string(), value)
            };

            if let serde_json::Value::Array(values) = node
                .entry(key)
                .or_insert_with(|| serde_json::Value::Array(Vec::new()))
            {
                values.push(value);
            }
        }

        let doc: Vec<serde_json::Value> = nodes
            .into_values()
            .map(serde_json::Value::Object)
            .collect();
        serde_json::to_string_pretty(&doc).unwrap_or_else(|_| "[]".into())
    }

    fn short(&self, term: &Term) -> String {
        match term {
            Term::Iri(iri) => self
                .namespaces()
                .with_standard()
                .compact(iri)
                .unwrap_or_else(|| iri.clone()),
            Term::Blank(label) => format!("_:{label}"),
            Term::Literal { value, .. } => value.clone(),
        }
    }

    fn to_text(&self) -> String {
        let mut out = String::new();
        for triple in self.iter().filter(|t| !is_schema(t.predicate.value())) {
            let _ = writeln!(
                out,
                "({}) -> [{}] -> ({})",
                self.short(&triple.subject),
                self.short(&triple.predicate),
                self.short(&triple.object)
            );
        }
        out
    }

    fn to_dot(&self) -> String {
        let label = |term: &Term| match term {
            Term::Iri(iri) => remove_namespace(iri).replace('"', "\\\""),
            other => other.value().replace('"', "\\\""),
        };

        let mut out = String::from("digraph memory {\n");
        for triple in self.iter().filter(|t| !is_schema(t.predicate.value())) {
            let _ = writeln!(
                out,
                "  \"{}\" -> \"{}\" [label=\"{}\"];",
                label(&triple.subject),
                label(&triple.object),
                label(&triple.predicate)
            );
        }
        out.push_str("}\n");
        out
    }
}

/// User-facing rendering: reification is stripped first.
pub fn render(graph: &Graph, format: Format) -> GraphResult<String> {
    strip_reification(graph).serialize(format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::reify::hydrate_with_ids;

    fn sample() -> Graph {
        let mut g = Graph::new();
        g.bind("ex", "http://example.org/");
        g.add(Triple::new(
            Term::iri("http://example.org/Napoleon"),
            Term::iri(RDF_TYPE),
            Term::iri("http://example.org/Person"),
        ));
        g.add(Triple::new(
            Term::iri("http://example.org/Napoleon"),
            Term::iri("http://example.org/bornIn"),
            Term::iri("http://example.org/Corsica"),
        ));
        g.add(Triple::new(
            Term::iri("http://example.org/Napoleon"),
            Term::iri("http://example.org/birthYear"),
            Term::typed_literal("1769", "http://www.w3.org/2001/XMLSchema#integer"),
        ));
        g
    }

    #[test]
    fn format_names_parse() {
        assert_eq!("turtle".parse::<Format>().unwrap(), Format::Turtle);
        assert_eq!("json".parse::<Format>().unwrap(), Format::JsonLd);
        assert_eq!("image".parse::<Format>().unwrap(), Format::Dot);
        assert!("xml".parse::<Format>().is_err());
    }

    #[test]
    fn turtle_roundtrip() {
        let g = sample();
        let text = g.serialize(Format::Turtle).unwrap();
        assert!(text.contains("@prefix ex:") || text.contains("PREFIX ex:"));
        let parsed = parse(&text, Format::Turtle).unwrap();
        assert!(parsed.same_triples(&g));
    }

    #[test]
    fn ntriples_roundtrip_with_blank_nodes() {
        let g = hydrate_with_ids(&sample());
        let text = g.serialize(Format::NTriples).unwrap();
        let parsed = parse(&text, Format::NTriples).unwrap();
        assert_eq!(parsed.len(), g.len());
    }

    #[test]
    fn text_render_skips_schema_and_bookkeeping() {
        let g = hydrate_with_ids(&sample());
        let text = render(&g, Format::Text).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("(ex:Napoleon) -> [ex:bornIn] -> (ex:Corsica)"));
        assert!(!text.contains("uuid"));
    }

    #[test]
    fn json_ld_groups_by_subject() {
        let text = render(&sample(), Format::JsonLd).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
        let nodes = doc.as_array().unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0]["@id"], "http://example.org/Napoleon");
        assert_eq!(nodes[0]["@type"][0], "http://example.org/Person");
        assert_eq!(
            nodes[0]["http://example.org/birthYear"][0]["@value"],
            "1769"
        );
    }

    #[test]
    fn dot_render_has_edges() {
        let dot = render(&sample(), Format::Dot).unwrap();
        assert!(dot.starts_with("digraph memory {"));
        assert!(dot.contains("\"Napoleon\" -> \"Corsica\" [label=\"bornIn\"];"));
        assert!(!dot.contains("Person"));
    }

    #[test]
    fn parse_rejects_render_only_formats() {
        assert!(parse("", Format::Dot).is_err());
    }
}
