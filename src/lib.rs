// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # ontomem
//!
//! Ontology-governed memory for LLM agents. Knowledge is kept as an RDF graph
//! that follows a caller-supplied ontology; a text-generation backend turns
//! free text into graph edits and summarizes graph contents back into prose.
//!
//! ## Architecture
//!
//! - **Graph model** (`graph`): triples, prefixes, statement identifiers via
//!   reification, Turtle/N-Triples/JSON-LD/text/DOT rendering
//! - **Mutation executor** (`mutation`): structured edit instructions applied
//!   with snapshot rollback and model-assisted repair
//! - **Contextual retrieval** (`recall`): vector matches expanded by bounded
//!   graph traversal
//! - **Update reconciliation** (`update`): retires facts a new message
//!   supersedes, in both stores
//! - **Stores** (`store`): SPARQL triple stores (embedded Oxigraph, remote
//!   endpoint) and an HNSW vector index with redb persistence
//! - **Text backends** (`llm`): Ollama, OpenAI-compatible, Anthropic, replay
//!
//! ## Library usage
//!
//! ```no_run
//! use ontomem::config::Settings;
//! use ontomem::memory::Memory;
//!
//! let settings = Settings::load("ontomem.toml".as_ref()).unwrap();
//! let mut memory = Memory::from_settings(&settings).unwrap();
//! memory.retain("Ada Lovelace wrote the first program.", Some("alice")).unwrap();
//! println!("{}", memory.recall(Some("Who wrote the first program?"), Some("alice")).unwrap());
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod mutation;
pub mod recall;
pub mod retain;
pub mod store;
pub mod update;

pub use error::{MemoryError, MemoryResult};
pub use memory::Memory;
#[cfg(feature = "async")]
pub use memory::AsyncMemory;
