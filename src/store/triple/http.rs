//! Remote SPARQL 1.1 endpoint over HTTP (Jena Fuseki and compatible).
//!
//! Queries go to `<url>/sparql`, updates to `<url>/update`, both as
//! form-encoded POSTs with optional basic auth.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use crate::error::StoreError;
use crate::graph::io::parse;
use crate::graph::{Format, Term, Triple};
use crate::store::StoreResult;

use super::{Solution, TripleStore};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SparqlHttpConfig {
    /// Dataset base URL, e.g. `http://localhost:3030/memory`.
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: u64,
}

impl Default for SparqlHttpConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3030/ontomem".into(),
            username: None,
            password: None,
            timeout_secs: 30,
        }
    }
}

/// Triple store client for a remote SPARQL endpoint.
pub struct SparqlHttpStore {
    config: SparqlHttpConfig,
    agent: ureq::Agent,
}

impl SparqlHttpStore {
    pub fn new(config: SparqlHttpConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build();
        Self { config, agent }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.config.url.trim_end_matches('/'))
    }

    fn authorization(&self) -> Option<String> {
        match (&self.config.username, &self.config.password) {
            (Some(user), Some(pass)) => Some(format!(
                "Basic {}",
                STANDARD.encode(format!("{user}:{pass}"))
            )),
            _ => None,
        }
    }

    fn post(&self, path: &str, field: &str, body: &str, accept: Option<&str>) -> StoreResult<String> {
        let url = self.endpoint(path);
        tracing::trace!(%url, sparql = %body, "sparql request");

        let mut request = self.agent.post(&url);
        if let Some(auth) = self.authorization() {
            request = request.set("Authorization", &auth);
        }
        if let Some(accept) = accept {
            request = request.set("Accept", accept);
        }

        let resp = request.send_form(&[(field, body)]).map_err(|e| {
            let message = match e {
                ureq::Error::Status(code, resp) => format!(
                    "status {code}: {}",
                    resp.into_string().unwrap_or_default()
                ),
                ureq::Error::Transport(t) => t.to_string(),
            };
            StoreError::Http {
                url: url.clone(),
                message,
            }
        })?;

        resp.into_string().map_err(|e| StoreError::Http {
            url,
            message: format!("failed to read response body: {e}"),
        })
    }
}

impl TripleStore for SparqlHttpStore {
    fn update(&self, sparql: &str) -> StoreResult<()> {
        self.post("update", "update", sparql, None).map(drop)
    }

    fn construct(&self, sparql: &str) -> StoreResult<Vec<Triple>> {
        let body = self.post("sparql", "query", sparql, Some("application/n-triples"))?;
        let graph = parse(&body, Format::NTriples)?;
        Ok(graph.iter().cloned().collect())
    }

    fn select(&self, sparql: &str) -> StoreResult<Vec<Solution>> {
        let body = self.post(
            "sparql",
            "query",
            sparql,
            Some("application/sparql-results+json"),
        )?;
        parse_results_json(&body)
    }

    fn name(&self) -> &str {
        "sparql"
    }
}

impl std::fmt::Debug for SparqlHttpStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparqlHttpStore")
            .field("url", &self.config.url)
            .field("username", &self.config.username)
            .finish_non_exhaustive()
    }
}

/// Decode a SPARQL 1.1 JSON results document.
fn parse_results_json(body: &str) -> StoreResult<Vec<Solution>> {
    let json: serde_json::Value =
        serde_json::from_str(body).map_err(|e| StoreError::Serialization {
            message: format!("invalid SPARQL JSON results: {e}"),
        })?;
    let bindings = json["results"]["bindings"]
        .as_array()
        .ok_or_else(|| StoreError::Serialization {
            message: "missing results.bindings".into(),
        })?;

    let mut rows = Vec::with_capacity(bindings.len());
    for binding in bindings {
        let Some(vars) = binding.as_object() else {
            continue;
        };
        let mut row = Solution::new();
        for (var, value) in vars {
            if let Some(term) = json_term(value) {
                row.insert(var.clone(), term);
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

fn json_term(value: &serde_json::Value) -> Option<Term> {
    let lexical = value["value"].as_str()?;
    match value["type"].as_str()? {
        "uri" => Some(Term::iri(lexical)),
        "bnode" => Some(Term::blank(lexical)),
        "literal" | "typed-literal" => {
            if let Some(lang) = value["xml:lang"].as_str() {
                Some(Term::lang_literal(lexical, lang))
            } else if let Some(dt) = value["datatype"].as_str() {
                if dt == crate::graph::namespace::XSD_STRING {
                    Some(Term::literal(lexical))
                } else {
                    Some(Term::typed_literal(lexical, dt))
                }
            } else {
                Some(Term::literal(lexical))
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_results() {
        let body = r#"{
          "head": {"vars": ["s", "p", "o"]},
          "results": {"bindings": [
            {"s": {"type": "uri", "value": "http://e/a"},
             "p": {"type": "uri", "value": "http://e/p"},
             "o": {"type": "literal", "value": "42", "datatype": "http://www.w3.org/2001/XMLSchema#integer"}},
            {"s": {"type": "bnode", "value": "b0"},
             "p": {"type": "uri", "value": "http://e/label"},
             "o": {"type": "literal", "value": "chat", "xml:lang": "fr"}}
          ]}
        }"#;
        let rows = parse_results_json(body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["s"], Term::iri("http://e/a"));
        assert_eq!(
            rows[0]["o"],
            Term::typed_literal("42", "http://www.w3.org/2001/XMLSchema#integer")
        );
        assert_eq!(rows[1]["s"], Term::blank("b0"));
        assert_eq!(rows[1]["o"], Term::lang_literal("chat", "fr"));
    }

    #[test]
    fn basic_auth_header() {
        let store = SparqlHttpStore::new(SparqlHttpConfig {
            username: Some("admin".into()),
            password: Some("pw".into()),
            ..Default::default()
        });
        assert_eq!(store.authorization().as_deref(), Some("Basic YWRtaW46cHc="));
        assert!(!format!("{store:?}").contains("pw"));
    }

    #[test]
    fn unreachable_endpoint_is_http_error() {
        let store = SparqlHttpStore::new(SparqlHttpConfig {
            url: "http://127.0.0.1:1/ds".into(),
            timeout_secs: 2,
            ..Default::default()
        });
        let err = store.update("CLEAR ALL").unwrap_err();
        assert!(matches!(err, StoreError::Http { .. }));
    }
}
