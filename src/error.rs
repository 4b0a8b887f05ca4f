//! Rich diagnostic error types for ontomem.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so callers know exactly
//! which collaborator failed and what to check.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for ontomem.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum MemoryError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Instruction(#[from] InstructionError),

    #[error("background memory task failed: {message}")]
    #[diagnostic(
        code(ontomem::task),
        help("The blocking worker running this operation panicked or was cancelled.")
    )]
    Task { message: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("{collaborator} is not configured")]
    #[diagnostic(
        code(ontomem::config::missing),
        help(
            "This operation needs a {collaborator}. Add a `[{collaborator}]` table \
             to the config file, or attach one with the matching `Memory::with_*` builder. \
             Ephemeral sessions only need an llm."
        )
    )]
    Missing { collaborator: &'static str },

    #[error("unknown {kind} provider: \"{provider}\"")]
    #[diagnostic(
        code(ontomem::config::unknown_provider),
        help("Supported providers are: {supported}.")
    )]
    UnknownProvider {
        kind: &'static str,
        provider: String,
        supported: &'static str,
    },

    #[error("invalid {kind} settings: {message}")]
    #[diagnostic(
        code(ontomem::config::invalid),
        help("Check the provider table in the config file for missing or mistyped keys.")
    )]
    Invalid { kind: &'static str, message: String },

    #[error("failed to read config file: {path}")]
    #[diagnostic(
        code(ontomem::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    #[diagnostic(
        code(ontomem::config::parse),
        help("Check the TOML syntax of the config file.")
    )]
    Parse { path: String, message: String },
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("invalid IRI \"{iri}\": {message}")]
    #[diagnostic(
        code(ontomem::graph::invalid_iri),
        help("Resource identifiers must be absolute IRIs such as <http://example.org/Thing>.")
    )]
    InvalidIri { iri: String, message: String },

    #[error("invalid term in {position} position: {term}")]
    #[diagnostic(
        code(ontomem::graph::invalid_term),
        help(
            "Subjects must be IRIs or blank nodes and predicates must be IRIs. \
             Literals are only allowed as objects."
        )
    )]
    InvalidTerm { position: &'static str, term: String },

    #[error("failed to parse {format} input: {message}")]
    #[diagnostic(
        code(ontomem::graph::parse),
        help("The RDF text is not valid for the declared format.")
    )]
    Parse { format: String, message: String },

    #[error("failed to serialize graph as {format}: {message}")]
    #[diagnostic(code(ontomem::graph::serialize))]
    Serialize { format: String, message: String },

    #[error("unsupported format: {format}")]
    #[diagnostic(
        code(ontomem::graph::unsupported_format),
        help("Supported formats are: turtle, ntriples, json-ld, text, dot.")
    )]
    UnsupportedFormat { format: String },
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("SPARQL error: {message}")]
    #[diagnostic(
        code(ontomem::store::sparql),
        help(
            "The triple store rejected or failed to evaluate a SPARQL request. \
             Run with RUST_LOG=ontomem=debug to see the generated query."
        )
    )]
    Sparql { message: String },

    #[error("triple store endpoint {url} failed: {message}")]
    #[diagnostic(
        code(ontomem::store::http),
        help("Check that the SPARQL endpoint is running and the credentials are correct.")
    )]
    Http { url: String, message: String },

    #[error("vector index error: {message}")]
    #[diagnostic(
        code(ontomem::store::vector),
        help("The vector index encountered an internal error.")
    )]
    Vector { message: String },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(ontomem::store::redb),
        help(
            "The embedded document database encountered a transaction error. \
             This may indicate corruption; try a fresh vector store directory."
        )
    )]
    Redb { message: String },

    #[error("I/O error: {source}")]
    #[diagnostic(
        code(ontomem::store::io),
        help("Check that the data directory exists and has correct permissions.")
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {message}")]
    #[diagnostic(code(ontomem::store::serde))]
    Serialization { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),
}

// ---------------------------------------------------------------------------
// Text-generation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum LlmError {
    #[error("text backend is not available at {url}")]
    #[diagnostic(
        code(ontomem::llm::unavailable),
        help("Check that the model server is running and reachable.")
    )]
    Unavailable { url: String },

    #[error("text backend request failed: {message}")]
    #[diagnostic(
        code(ontomem::llm::request_failed),
        help("Check the API key, the model name, and the backend logs.")
    )]
    RequestFailed { message: String },

    #[error("failed to parse text backend response: {message}")]
    #[diagnostic(
        code(ontomem::llm::parse_error),
        help("The backend returned an unexpected response format.")
    )]
    ParseError { message: String },

    #[error("no scripted completion for prompt {prompt}")]
    #[diagnostic(
        code(ontomem::llm::exhausted),
        help("Queue a response with `ReplayBackend::respond` or set a default for this prompt.")
    )]
    Exhausted { prompt: String },
}

// ---------------------------------------------------------------------------
// Mutation instruction errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum InstructionError {
    #[error("no instruction array found in model output")]
    #[diagnostic(
        code(ontomem::instruction::missing),
        help("Mutation instructions must be a JSON array of operation objects.")
    )]
    Missing,

    #[error("malformed instructions: {message}")]
    #[diagnostic(code(ontomem::instruction::malformed))]
    Malformed { message: String },

    #[error("unknown namespace prefix \"{prefix}\" in \"{term}\"")]
    #[diagnostic(
        code(ontomem::instruction::unknown_prefix),
        help("Only the configured namespace prefixes and rdf, rdfs, owl and xsd may be used.")
    )]
    UnknownPrefix { prefix: String, term: String },

    #[error("operation {index} ({op}) is invalid: {message}")]
    #[diagnostic(code(ontomem::instruction::invalid_operation))]
    InvalidOperation {
        index: usize,
        op: &'static str,
        message: String,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),
}

/// Convenience alias for functions returning ontomem results.
pub type MemoryResult<T> = std::result::Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_converts_to_memory_error() {
        let err = ConfigError::Missing {
            collaborator: "triple_store",
        };
        let mem: MemoryError = err.into();
        assert!(matches!(
            mem,
            MemoryError::Config(ConfigError::Missing { .. })
        ));
    }

    #[test]
    fn store_error_wraps_graph_error() {
        let err = GraphError::UnsupportedFormat {
            format: "xml".into(),
        };
        let store: StoreError = err.into();
        assert!(matches!(store, StoreError::Graph(_)));
    }

    #[test]
    fn missing_collaborator_message_names_it() {
        let err = ConfigError::Missing {
            collaborator: "vector_store",
        };
        assert_eq!(err.to_string(), "vector_store is not configured");
    }

    #[test]
    fn unknown_prefix_message_is_descriptive() {
        let err = InstructionError::UnknownPrefix {
            prefix: "foaf".into(),
            term: "foaf:name".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("foaf"));
        assert!(msg.contains("foaf:name"));
    }
}
