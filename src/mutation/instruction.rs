//! Closed instruction set for model-synthesized graph edits.
//!
//! The text backend is prompted to emit a JSON array of operations. They are
//! decoded into [`Instruction`]s and interpreted deterministically against a
//! graph; nothing the model writes is ever executed as code.

use serde::Deserialize;

use crate::error::InstructionError;
use crate::graph::io::to_ox_triple;
use crate::graph::namespace::{
    RDF_PROPERTY, RDF_TYPE, RDFS_CLASS, RDFS_DOMAIN, RDFS_LABEL, RDFS_RANGE, RDFS_SUBCLASS_OF,
};
use crate::graph::{Graph, Namespaces, Term, Triple, TriplePattern};

/// Object position of an `add_triple`: a resource reference or a literal.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ObjectSpec {
    Literal {
        literal: serde_json::Value,
        #[serde(default)]
        datatype: Option<String>,
        #[serde(default)]
        lang: Option<String>,
    },
    Resource(String),
}

/// One graph edit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    AddTriple {
        subject: String,
        predicate: String,
        #[serde(flatten)]
        object: ObjectField,
    },
    RemoveTriple {
        #[serde(default)]
        subject: Option<String>,
        #[serde(default)]
        predicate: Option<String>,
        #[serde(default)]
        object: Option<ObjectSpec>,
        #[serde(default)]
        literal: Option<serde_json::Value>,
        #[serde(default)]
        datatype: Option<String>,
        #[serde(default)]
        lang: Option<String>,
    },
    AddClass {
        class: String,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        subclass_of: Option<String>,
    },
    AddProperty {
        property: String,
        #[serde(default)]
        domain: Option<String>,
        #[serde(default)]
        range: Option<String>,
        #[serde(default)]
        label: Option<String>,
    },
}

/// `add_triple` carries either `object` or `literal` (+ `datatype`/`lang`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ObjectField {
    Literal {
        literal: serde_json::Value,
        #[serde(default)]
        datatype: Option<String>,
        #[serde(default)]
        lang: Option<String>,
    },
    Object { object: ObjectSpec },
}

impl Instruction {
    pub fn name(&self) -> &'static str {
        match self {
            Instruction::AddTriple { .. } => "add_triple",
            Instruction::RemoveTriple { .. } => "remove_triple",
            Instruction::AddClass { .. } => "add_class",
            Instruction::AddProperty { .. } => "add_property",
        }
    }
}

/// Decode model output into instructions.
///
/// The array may be wrapped in prose or a code fence: the text from the first
/// `[` to the last `]` is taken.
pub fn parse_instructions(text: &str) -> Result<Vec<Instruction>, InstructionError> {
    let trimmed = text.trim();
    let json = match (trimmed.find('['), trimmed.rfind(']')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => return Err(InstructionError::Missing),
    };
    serde_json::from_str(json).map_err(|e| InstructionError::Malformed {
        message: e.to_string(),
    })
}

/// Resolves instruction strings to RDF terms against a set of prefixes.
pub struct Resolver {
    namespaces: Namespaces,
}

impl Resolver {
    pub fn new(namespaces: &Namespaces) -> Self {
        Self {
            namespaces: namespaces.with_standard(),
        }
    }

    /// `<iri>`, `http://...`, `urn:...`, `_:label`, or `prefix:local`.
    pub fn resource(&self, text: &str) -> Result<Term, InstructionError> {
        let text = text.trim();
        if let Some(iri) = text.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
            return Ok(Term::iri(iri));
        }
        if let Some(label) = text.strip_prefix("_:") {
            return Ok(Term::blank(label));
        }
        let Some((prefix, _)) = text.split_once(':') else {
            return Err(InstructionError::UnknownPrefix {
                prefix: String::new(),
                term: text.to_string(),
            });
        };
        if let Some(iri) = self.namespaces.expand(text) {
            return Ok(Term::Iri(iri));
        }
        if text.contains("://") || prefix == "urn" {
            return Ok(Term::iri(text));
        }
        Err(InstructionError::UnknownPrefix {
            prefix: prefix.to_string(),
            term: text.to_string(),
        })
    }

    fn literal(
        &self,
        value: &serde_json::Value,
        datatype: Option<&str>,
        lang: Option<&str>,
    ) -> Result<Term, InstructionError> {
        let lexical = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            other => {
                return Err(InstructionError::Malformed {
                    message: format!("literal must be a string, number or boolean, got {other}"),
                });
            }
        };
        if let Some(lang) = lang {
            return Ok(Term::lang_literal(lexical, lang));
        }
        let datatype = match (datatype, value) {
            (Some(dt), _) => Some(self.resource(dt)?.value().to_string()),
            (None, serde_json::Value::Number(n)) if n.is_i64() || n.is_u64() => {
                Some(format!("{}integer", crate::graph::namespace::XSD))
            }
            (None, serde_json::Value::Number(_)) => {
                Some(format!("{}decimal", crate::graph::namespace::XSD))
            }
            (None, serde_json::Value::Bool(_)) => {
                Some(format!("{}boolean", crate::graph::namespace::XSD))
            }
            _ => None,
        };
        Ok(match datatype {
            Some(dt) => Term::typed_literal(lexical, dt),
            None => Term::literal(lexical),
        })
    }

    fn object(&self, field: &ObjectField) -> Result<Term, InstructionError> {
        match field {
            ObjectField::Literal {
                literal,
                datatype,
                lang,
            }
            | ObjectField::Object {
                object:
                    ObjectSpec::Literal {
                        literal,
                        datatype,
                        lang,
                    },
            } => self.literal(literal, datatype.as_deref(), lang.as_deref()),
            ObjectField::Object {
                object: ObjectSpec::Resource(text),
            } => self.resource(text),
        }
    }

    fn optional(&self, text: Option<&str>) -> Result<Option<Term>, InstructionError> {
        text.map(|t| self.resource(t)).transpose()
    }

    /// Object of a `remove_triple` pattern. Bare text that is not a
    /// resource matches a plain literal.
    fn removal_object(
        &self,
        object: Option<&ObjectSpec>,
        literal: Option<&serde_json::Value>,
        datatype: Option<&str>,
        lang: Option<&str>,
    ) -> Result<Option<Term>, InstructionError> {
        if let Some(value) = literal {
            return self.literal(value, datatype, lang).map(Some);
        }
        Ok(match object {
            Some(ObjectSpec::Literal {
                literal,
                datatype,
                lang,
            }) => Some(self.literal(literal, datatype.as_deref(), lang.as_deref())?),
            Some(ObjectSpec::Resource(text)) => {
                Some(self.resource(text).unwrap_or_else(|_| Term::literal(text.as_str())))
            }
            None => None,
        })
    }
}

/// Add `triple` once its terms are known to be valid RDF.
fn insert(graph: &mut Graph, triple: Triple) -> Result<usize, InstructionError> {
    to_ox_triple(&triple)?;
    Ok(graph.add(triple) as usize)
}

/// Apply instructions in order. Stops at the first failing operation, leaving
/// the edits before it in place.
pub fn apply(
    instructions: &[Instruction],
    graph: &mut Graph,
    resolver: &Resolver,
) -> Result<usize, InstructionError> {
    let mut changed = 0;
    for (index, instruction) in instructions.iter().enumerate() {
        let invalid = |e: InstructionError| match e {
            InstructionError::UnknownPrefix { .. } | InstructionError::Graph(_) => e,
            other => InstructionError::InvalidOperation {
                index,
                op: instruction.name(),
                message: other.to_string(),
            },
        };

        match instruction {
            Instruction::AddTriple {
                subject,
                predicate,
                object,
            } => {
                let s = resolver.resource(subject).map_err(invalid)?;
                let p = resolver.resource(predicate).map_err(invalid)?;
                let o = resolver.object(object).map_err(invalid)?;
                if !p.is_iri() {
                    return Err(invalid(InstructionError::Malformed {
                        message: format!("predicate {p} is not an IRI"),
                    }));
                }
                changed += insert(graph, Triple::new(s, p, o))?;
            }
            Instruction::RemoveTriple {
                subject,
                predicate,
                object,
                literal,
                datatype,
                lang,
            } => {
                if subject.is_none() && predicate.is_none() && object.is_none() && literal.is_none() {
                    return Err(invalid(InstructionError::Malformed {
                        message: "remove_triple needs at least one of subject, predicate, object"
                            .into(),
                    }));
                }
                let pattern = TriplePattern::new(
                    resolver.optional(subject.as_deref()).map_err(invalid)?,
                    resolver.optional(predicate.as_deref()).map_err(invalid)?,
                    resolver
                        .removal_object(
                            object.as_ref(),
                            literal.as_ref(),
                            datatype.as_deref(),
                            lang.as_deref(),
                        )
                        .map_err(invalid)?,
                );
                changed += graph.remove(&pattern);
            }
            Instruction::AddClass {
                class,
                label,
                subclass_of,
            } => {
                let c = resolver.resource(class).map_err(invalid)?;
                changed += insert(
                    graph,
                    Triple::new(c.clone(), Term::iri(RDF_TYPE), Term::iri(RDFS_CLASS)),
                )?;
                if let Some(parent) = resolver.optional(subclass_of.as_deref()).map_err(invalid)? {
                    changed += insert(
                        graph,
                        Triple::new(c.clone(), Term::iri(RDFS_SUBCLASS_OF), parent),
                    )?;
                }
                if let Some(label) = label {
                    changed += insert(
                        graph,
                        Triple::new(c, Term::iri(RDFS_LABEL), Term::literal(label)),
                    )?;
                }
            }
            Instruction::AddProperty {
                property,
                domain,
                range,
                label,
            } => {
                let p = resolver.resource(property).map_err(invalid)?;
                changed += insert(
                    graph,
                    Triple::new(p.clone(), Term::iri(RDF_TYPE), Term::iri(RDF_PROPERTY)),
                )?;
                if let Some(domain) = resolver.optional(domain.as_deref()).map_err(invalid)? {
                    changed += insert(
                        graph,
                        Triple::new(p.clone(), Term::iri(RDFS_DOMAIN), domain),
                    )?;
                }
                if let Some(range) = resolver.optional(range.as_deref()).map_err(invalid)? {
                    changed += insert(graph, Triple::new(p.clone(), Term::iri(RDFS_RANGE), range))?;
                }
                if let Some(label) = label {
                    changed += insert(
                        graph,
                        Triple::new(p, Term::iri(RDFS_LABEL), Term::literal(label)),
                    )?;
                }
            }
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::namespace::XSD;

    fn resolver() -> Resolver {
        let mut ns = Namespaces::new();
        ns.bind("ex", "http://example.org/");
        Resolver::new(&ns)
    }

    fn ex(local: &str) -> Term {
        Term::iri(format!("http://example.org/{local}"))
    }

    #[test]
    fn parses_fenced_array() {
        let text = "Here you go:\n```json\n[{\"op\": \"add_triple\", \"subject\": \"ex:a\", \
                    \"predicate\": \"ex:p\", \"object\": \"ex:b\"}]\n```";
        let parsed = parse_instructions(text).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name(), "add_triple");
    }

    #[test]
    fn missing_array_is_an_error() {
        assert!(matches!(
            parse_instructions("g.add((a, b, c))"),
            Err(InstructionError::Missing)
        ));
        assert!(matches!(
            parse_instructions("[not json]"),
            Err(InstructionError::Malformed { .. })
        ));
    }

    #[test]
    fn add_resource_and_literal_objects() {
        let ops = parse_instructions(
            r#"[
              {"op": "add_triple", "subject": "ex:Napoleon", "predicate": "rdf:type", "object": "ex:Person"},
              {"op": "add_triple", "subject": "ex:Napoleon", "predicate": "ex:birthYear", "literal": 1769},
              {"op": "add_triple", "subject": "ex:Napoleon", "predicate": "ex:name", "literal": "Napoléon", "lang": "fr"},
              {"op": "add_triple", "subject": "ex:Napoleon", "predicate": "ex:died", "object": {"literal": "1821-05-05", "datatype": "xsd:date"}}
            ]"#,
        )
        .unwrap();

        let mut g = Graph::new();
        let changed = apply(&ops, &mut g, &resolver()).unwrap();
        assert_eq!(changed, 4);
        assert!(g.contains(&Triple::new(ex("Napoleon"), Term::iri(RDF_TYPE), ex("Person"))));
        assert!(g.contains(&Triple::new(
            ex("Napoleon"),
            ex("birthYear"),
            Term::typed_literal("1769", format!("{XSD}integer"))
        )));
        assert!(g.contains(&Triple::new(
            ex("Napoleon"),
            ex("name"),
            Term::lang_literal("Napoléon", "fr")
        )));
        assert!(g.contains(&Triple::new(
            ex("Napoleon"),
            ex("died"),
            Term::typed_literal("1821-05-05", format!("{XSD}date"))
        )));
    }

    #[test]
    fn remove_with_wildcard() {
        let mut g = Graph::new();
        g.add(Triple::new(ex("a"), ex("livesIn"), ex("Paris")));
        g.add(Triple::new(ex("a"), ex("livesIn"), ex("Rome")));
        g.add(Triple::new(ex("b"), ex("livesIn"), ex("Rome")));

        let ops = parse_instructions(
            r#"[{"op": "remove_triple", "subject": "ex:a", "predicate": "ex:livesIn"}]"#,
        )
        .unwrap();
        assert_eq!(apply(&ops, &mut g, &resolver()).unwrap(), 2);
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn class_and_property_declarations() {
        let ops = parse_instructions(
            r#"[
              {"op": "add_class", "class": "ex:Emperor", "subclass_of": "ex:Person", "label": "Emperor"},
              {"op": "add_property", "property": "ex:ruled", "domain": "ex:Emperor", "range": "ex:Country"}
            ]"#,
        )
        .unwrap();
        let mut g = Graph::new();
        assert_eq!(apply(&ops, &mut g, &resolver()).unwrap(), 6);
        assert!(g.contains(&Triple::new(
            ex("Emperor"),
            Term::iri(RDFS_SUBCLASS_OF),
            ex("Person")
        )));
        assert!(g.contains(&Triple::new(ex("ruled"), Term::iri(RDFS_RANGE), ex("Country"))));
    }

    #[test]
    fn unknown_prefix_fails() {
        let ops = parse_instructions(
            r#"[{"op": "add_triple", "subject": "foaf:me", "predicate": "ex:p", "object": "ex:o"}]"#,
        )
        .unwrap();
        let mut g = Graph::new();
        let err = apply(&ops, &mut g, &resolver()).unwrap_err();
        assert!(matches!(err, InstructionError::UnknownPrefix { .. }));
    }

    #[test]
    fn spaced_curie_is_an_invalid_iri() {
        let ops = parse_instructions(
            r#"[
              {"op": "add_triple", "subject": "ex:a", "predicate": "ex:p", "object": "ex:b"},
              {"op": "add_triple", "subject": "ex:Napoleon Bonaparte", "predicate": "ex:p", "object": "ex:b"}
            ]"#,
        )
        .unwrap();
        let mut g = Graph::new();
        let err = apply(&ops, &mut g, &resolver()).unwrap_err();
        assert!(matches!(
            err,
            InstructionError::Graph(crate::error::GraphError::InvalidIri { .. })
        ));
    }

    #[test]
    fn bad_language_tag_is_rejected() {
        let ops = parse_instructions(
            r#"[{"op": "add_triple", "subject": "ex:a", "predicate": "ex:name", "literal": "x", "lang": "not a tag"}]"#,
        )
        .unwrap();
        let mut g = Graph::new();
        assert!(matches!(
            apply(&ops, &mut g, &resolver()),
            Err(InstructionError::Graph(_))
        ));
    }

    #[test]
    fn remove_matches_typed_literals() {
        let mut g = Graph::new();
        let added = parse_instructions(
            r#"[
              {"op": "add_triple", "subject": "ex:n", "predicate": "ex:birthYear", "literal": 1769},
              {"op": "add_triple", "subject": "ex:n", "predicate": "ex:died", "literal": "1821-05-05", "datatype": "xsd:date"}
            ]"#,
        )
        .unwrap();
        apply(&added, &mut g, &resolver()).unwrap();

        let removed = parse_instructions(
            r#"[
              {"op": "remove_triple", "subject": "ex:n", "literal": 1769},
              {"op": "remove_triple", "predicate": "ex:died", "object": {"literal": "1821-05-05", "datatype": "xsd:date"}}
            ]"#,
        )
        .unwrap();
        assert_eq!(apply(&removed, &mut g, &resolver()).unwrap(), 2);
        assert!(g.is_empty());
    }

    #[test]
    fn remove_by_bare_text_matches_plain_literal() {
        let mut g = Graph::new();
        g.add(Triple::new(ex("a"), ex("name"), Term::literal("Ann")));
        let ops = parse_instructions(r#"[{"op": "remove_triple", "object": "Ann"}]"#).unwrap();
        assert_eq!(apply(&ops, &mut g, &resolver()).unwrap(), 1);
    }

    #[test]
    fn absolute_iris_and_blank_nodes_resolve() {
        let r = resolver();
        assert_eq!(r.resource("<http://x.org/a>").unwrap(), Term::iri("http://x.org/a"));
        assert_eq!(r.resource("http://x.org/a").unwrap(), Term::iri("http://x.org/a"));
        assert_eq!(r.resource("_:n1").unwrap(), Term::blank("n1"));
        assert!(r.resource("Napoleon").is_err());
    }
}
