//! The `Memory` facade: one ontology-governed memory and its collaborators.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ontomem::config::MemoryConfig;
//! use ontomem::graph::{Graph, Namespaces};
//! use ontomem::llm::{OllamaBackend, OllamaConfig};
//! use ontomem::memory::Memory;
//! use ontomem::store::{HnswVectorStore, OxigraphStore, vector::HnswConfig};
//!
//! # fn main() -> ontomem::MemoryResult<()> {
//! let mut namespaces = Namespaces::new();
//! namespaces.bind("hist", "https://example.org/history/");
//!
//! let mut memory = Memory::new(Graph::new(), namespaces, MemoryConfig::default())
//!     .with_llm(Arc::new(OllamaBackend::new(OllamaConfig::default())))
//!     .with_triple_store(Arc::new(OxigraphStore::in_memory()?))
//!     .with_vector_store(Arc::new(HnswVectorStore::in_memory(HnswConfig::default())));
//!
//! memory.retain("Napoleon was born in Corsica in 1769.", Some("user-1"))?;
//! let _summary = memory.recall(Some("Where was Napoleon born?"), Some("user-1"))?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;

use crate::config::{Collaborators, MemoryConfig, Settings, configure};
use crate::error::{ConfigError, MemoryResult};
use crate::graph::io::render;
use crate::graph::{Format, Graph, Namespaces, Triple};
use crate::llm::TextBackend;
use crate::recall::{RecallLimits, Source, get_contextual_memory, summarize};
use crate::retain::{RetainPipeline, RetainReport};
use crate::store::{Stores, TripleStore, VectorStore};

/// An ontology, the facts recorded against it, and the services that
/// persist and interpret them.
pub struct Memory {
    ontology: Graph,
    namespaces: Namespaces,
    data: Graph,
    config: MemoryConfig,
    llm: Option<Arc<dyn TextBackend>>,
    triple_store: Option<Arc<dyn TripleStore>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    span: tracing::Span,
}

impl Memory {
    /// Create a memory over `ontology` with no collaborators attached.
    pub fn new(mut ontology: Graph, namespaces: Namespaces, config: MemoryConfig) -> Self {
        ontology.bind_all(&namespaces);
        let span = tracing::info_span!("memory", ephemeral = config.ephemeral, debug = config.debug);
        Self {
            data: Graph::with_namespaces(namespaces.clone()),
            ontology,
            namespaces,
            config,
            llm: None,
            triple_store: None,
            vector_store: None,
            span,
        }
    }

    /// Build a memory from a settings file: ontology, namespaces, behaviour
    /// and every configured collaborator.
    pub fn from_settings(settings: &Settings) -> MemoryResult<Self> {
        let ontology = match &settings.ontology {
            Some(path) => load_ontology(path)?,
            None => Graph::new(),
        };
        let memory = Self::new(ontology, settings.namespace_bindings(), settings.memory.clone());
        Ok(memory.with_collaborators(configure(settings)?))
    }

    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.llm = collaborators.llm.or(self.llm);
        self.triple_store = collaborators.triple_store.or(self.triple_store);
        self.vector_store = collaborators.vector_store.or(self.vector_store);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn TextBackend>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_triple_store(mut self, store: Arc<dyn TripleStore>) -> Self {
        self.triple_store = Some(store);
        self
    }

    pub fn with_vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    pub fn ontology(&self) -> &Graph {
        &self.ontology
    }

    /// The in-memory data graph. Empty between calls unless the memory is
    /// ephemeral or was loaded with [`Memory::remember`].
    pub fn data(&self) -> &Graph {
        &self.data
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn require_llm(&self) -> Result<Arc<dyn TextBackend>, ConfigError> {
        self.llm
            .clone()
            .ok_or(ConfigError::Missing { collaborator: "llm" })
    }

    /// Analyse `message` and commit what it says to the memory group `id`.
    ///
    /// Only configuration errors are returned; everything else is logged and
    /// reflected in the report.
    pub fn retain(&mut self, message: &str, id: Option<&str>) -> MemoryResult<RetainReport> {
        let span = self.span.clone();
        let _enter = span.enter();

        let llm = self.require_llm()?;
        let stores = if self.config.ephemeral {
            None
        } else {
            Some(stores(&self.triple_store, &self.vector_store)?)
        };
        tracing::debug!(group = ?id, "retain");

        let pipeline = RetainPipeline::new(llm.as_ref(), &self.config, &self.namespaces);
        Ok(pipeline.run(message, id, &mut self.ontology, &mut self.data, stores))
    }

    /// Summarize what the memory group knows, focused on `message` if given.
    pub fn recall(&self, message: Option<&str>, id: Option<&str>) -> MemoryResult<String> {
        let _enter = self.span.enter();

        let llm = self.require_llm()?;
        let source = if self.config.ephemeral {
            Source::Ephemeral(&self.data)
        } else {
            Source::Stored(stores(&self.triple_store, &self.vector_store)?)
        };
        let limits = RecallLimits {
            k: self.config.search_k,
            depth: self.config.context_depth,
        };

        let context = get_contextual_memory(message, id, source, &self.namespaces, limits);
        if self.config.debug {
            tracing::debug!(group = ?id, %context, "contextual memory");
        }
        Ok(summarize(llm.as_ref(), message, &context))
    }

    /// Load a group's ontology and data from the triple store.
    ///
    /// The data graph is replaced. The ontology is replaced unless the store
    /// holds none for the group.
    pub fn remember(&mut self, id: Option<&str>) -> MemoryResult<()> {
        let _enter = self.span.enter();

        let store = self
            .triple_store
            .as_ref()
            .ok_or(ConfigError::Missing {
                collaborator: "triple_store",
            })?;
        let (ontology, data) = store.load(&self.namespaces, id)?;
        tracing::info!(group = ?id, ontology = ontology.len(), data = data.len(), "loaded memory");

        if !ontology.is_empty() {
            self.ontology = ontology;
        }
        self.data = data;
        Ok(())
    }

    /// Delete everything stored for a group, vector index first. Ephemeral
    /// memories just drop their data graph.
    pub fn forget(&mut self, id: Option<&str>) -> MemoryResult<()> {
        let _enter = self.span.enter();

        if self.config.ephemeral {
            self.data.clear();
            return Ok(());
        }
        let stores = stores(&self.triple_store, &self.vector_store)?;
        stores.vector.delete(id)?;
        stores.triple.delete(id)?;
        tracing::info!(group = ?id, "forgot memory");
        Ok(())
    }

    /// Raw facts from the triple store.
    ///
    /// A `raw` SPARQL query takes precedence. Otherwise every fact of the
    /// group touching `uri` (an IRI or a CURIE over the memory's prefixes)
    /// is returned.
    pub fn query(&self, id: Option<&str>, uri: Option<&str>, raw: Option<&str>) -> MemoryResult<Vec<Triple>> {
        let _enter = self.span.enter();

        let store = self
            .triple_store
            .as_ref()
            .ok_or(ConfigError::Missing {
                collaborator: "triple_store",
            })?;
        if let Some(sparql) = raw {
            return Ok(store.query(sparql)?);
        }
        let Some(uri) = uri else {
            tracing::warn!("query without a uri or a raw query returns nothing");
            return Ok(Vec::new());
        };
        let iri = self
            .namespaces
            .with_standard()
            .expand(uri)
            .unwrap_or_else(|| uri.to_string());
        Ok(store.get(&iri, id)?)
    }

    /// The in-memory data graph, without statement bookkeeping.
    pub fn render(&self, format: Format) -> MemoryResult<String> {
        Ok(render(&self.data, format)?)
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("ontology", &self.ontology.len())
            .field("data", &self.data.len())
            .field("config", &self.config)
            .field("llm", &self.llm.as_ref().map(|l| l.name().to_string()))
            .field("triple_store", &self.triple_store.as_ref().map(|s| s.name().to_string()))
            .field("vector_store", &self.vector_store.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

fn stores<'a>(
    triple: &'a Option<Arc<dyn TripleStore>>,
    vector: &'a Option<Arc<dyn VectorStore>>,
) -> Result<Stores<'a>, ConfigError> {
    let triple = triple.as_deref().ok_or(ConfigError::Missing {
        collaborator: "triple_store",
    })?;
    let vector = vector.as_deref().ok_or(ConfigError::Missing {
        collaborator: "vector_store",
    })?;
    Ok(Stores { triple, vector })
}

fn load_ontology(path: &Path) -> MemoryResult<Graph> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut ontology = Graph::new();
    ontology.parse(&text, Format::Turtle)?;
    Ok(ontology)
}

#[cfg(feature = "async")]
pub use self::nonblocking::AsyncMemory;

#[cfg(feature = "async")]
mod nonblocking {
    use std::sync::{Arc, Mutex, PoisonError};

    use super::Memory;
    use crate::error::{MemoryError, MemoryResult};
    use crate::graph::{Format, Triple};
    use crate::retain::RetainReport;

    /// [`Memory`] for async callers: each call runs on tokio's blocking
    /// pool so the event loop is never blocked. Calls are serialized.
    #[derive(Clone)]
    pub struct AsyncMemory {
        inner: Arc<Mutex<Memory>>,
    }

    impl AsyncMemory {
        pub fn new(memory: Memory) -> Self {
            Self {
                inner: Arc::new(Mutex::new(memory)),
            }
        }

        async fn run<T, F>(&self, op: F) -> MemoryResult<T>
        where
            T: Send + 'static,
            F: FnOnce(&mut Memory) -> MemoryResult<T> + Send + 'static,
        {
            let inner = Arc::clone(&self.inner);
            tokio::task::spawn_blocking(move || {
                let mut memory = inner.lock().unwrap_or_else(PoisonError::into_inner);
                op(&mut memory)
            })
            .await
            .map_err(|e| MemoryError::Task {
                message: e.to_string(),
            })?
        }

        pub async fn retain(&self, message: String, id: Option<String>) -> MemoryResult<RetainReport> {
            self.run(move |m| m.retain(&message, id.as_deref())).await
        }

        pub async fn recall(&self, message: Option<String>, id: Option<String>) -> MemoryResult<String> {
            self.run(move |m| m.recall(message.as_deref(), id.as_deref()))
                .await
        }

        pub async fn remember(&self, id: Option<String>) -> MemoryResult<()> {
            self.run(move |m| m.remember(id.as_deref())).await
        }

        pub async fn forget(&self, id: Option<String>) -> MemoryResult<()> {
            self.run(move |m| m.forget(id.as_deref())).await
        }

        pub async fn query(
            &self,
            id: Option<String>,
            uri: Option<String>,
            raw: Option<String>,
        ) -> MemoryResult<Vec<Triple>> {
            self.run(move |m| m.query(id.as_deref(), uri.as_deref(), raw.as_deref()))
                .await
        }

        pub async fn render(&self, format: Format) -> MemoryResult<String> {
            self.run(move |m| m.render(format)).await
        }
    }
}
