//! Memory settings and the collaborator factory.
//!
//! A memory is configured in TOML:
//!
//! ```toml
//! ontology = "ontology.ttl"
//!
//! [memory]
//! auto_expand = true
//!
//! [namespaces]
//! hist = "https://example.org/history/"
//!
//! [llm]
//! provider = "ollama"
//! model = "llama3.2"
//!
//! [triple_store]
//! provider = "oxigraph"
//! path = "data/triples"
//!
//! [vector_store]
//! provider = "hnsw"
//! path = "data/vectors"
//! ```
//!
//! Each collaborator table names a `provider`; the remaining keys are that
//! provider's options. [`configure`] turns the tables into trait objects.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::graph::Namespaces;
use crate::llm::{
    AnthropicBackend, AnthropicConfig, OllamaBackend, OllamaConfig, OpenAiBackend, OpenAiConfig,
    Prompt, ReplayBackend, TextBackend,
};
use crate::store::triple::{OxigraphStore, SparqlHttpConfig, SparqlHttpStore, TripleStore};
use crate::store::vector::{HnswConfig, HnswVectorStore, VectorStore};

/// Behaviour switches and limits for one memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Keep everything in process; never touch a store.
    #[serde(default)]
    pub ephemeral: bool,
    /// Let the backend add classes and properties to the ontology.
    #[serde(default)]
    pub auto_expand: bool,
    /// Retire superseded facts before committing new ones.
    #[serde(default = "default_true")]
    pub auto_update: bool,
    /// Accepted so existing settings files keep parsing. Nothing acts on
    /// it: facts are only dropped by update reconciliation or an explicit
    /// forget.
    #[serde(default)]
    pub auto_forget: bool,
    /// Log prompts and generated instructions.
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_initial_temperature")]
    pub initial_temperature: f32,
    /// Nearest facts fetched per vector search.
    #[serde(default = "default_search_k")]
    pub search_k: usize,
    /// Traversal levels around matched facts.
    #[serde(default = "default_context_depth")]
    pub context_depth: usize,
}

fn default_true() -> bool {
    true
}
fn default_max_retries() -> usize {
    1
}
fn default_initial_temperature() -> f32 {
    0.2
}
fn default_search_k() -> usize {
    3
}
fn default_context_depth() -> usize {
    1
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            ephemeral: false,
            auto_expand: false,
            auto_update: default_true(),
            auto_forget: false,
            debug: false,
            max_retries: default_max_retries(),
            initial_temperature: default_initial_temperature(),
            search_k: default_search_k(),
            context_depth: default_context_depth(),
        }
    }
}

/// A collaborator table: `provider` plus provider-specific options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub provider: String,
    #[serde(flatten)]
    pub options: toml::Table,
}

impl ProviderSettings {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            options: toml::Table::new(),
        }
    }

    /// Decode the options into a provider's config type.
    fn decode<T: DeserializeOwned>(&self, kind: &'static str) -> Result<T, ConfigError> {
        toml::Value::Table(self.options.clone())
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Invalid {
                kind,
                message: format!("{} provider: {e}", self.provider),
            })
    }
}

/// The whole config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Turtle file holding the ontology.
    #[serde(default)]
    pub ontology: Option<PathBuf>,
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Prefix to namespace IRI.
    #[serde(default)]
    pub namespaces: BTreeMap<String, String>,
    #[serde(default)]
    pub llm: Option<ProviderSettings>,
    #[serde(default)]
    pub triple_store: Option<ProviderSettings>,
    #[serde(default)]
    pub vector_store: Option<ProviderSettings>,
}

impl Settings {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Parse TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<inline>".into(),
            message: e.to_string(),
        })
    }

    /// Configured namespace bindings.
    pub fn namespace_bindings(&self) -> Namespaces {
        let mut ns = Namespaces::new();
        for (prefix, iri) in &self.namespaces {
            ns.bind(prefix.as_str(), iri.as_str());
        }
        ns
    }
}

/// The collaborators a memory talks to. Any of them may be absent.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub llm: Option<Arc<dyn TextBackend>>,
    pub triple_store: Option<Arc<dyn TripleStore>>,
    pub vector_store: Option<Arc<dyn VectorStore>>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("llm", &self.llm.as_ref().map(|l| l.name().to_string()))
            .field("triple_store", &self.triple_store.as_ref().map(|s| s.name().to_string()))
            .field("vector_store", &self.vector_store.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

const LLM_PROVIDERS: &str = "ollama, openai, anthropic, replay";
const TRIPLE_PROVIDERS: &str = "oxigraph, sparql";
const VECTOR_PROVIDERS: &str = "hnsw";

/// Build every configured collaborator.
pub fn configure(settings: &Settings) -> Result<Collaborators, ConfigError> {
    let llm = settings.llm.as_ref().map(build_llm).transpose()?;
    let triple_store = settings
        .triple_store
        .as_ref()
        .map(build_triple_store)
        .transpose()?;
    let vector_store = settings
        .vector_store
        .as_ref()
        .map(build_vector_store)
        .transpose()?;
    Ok(Collaborators {
        llm,
        triple_store,
        vector_store,
    })
}

fn build_llm(table: &ProviderSettings) -> Result<Arc<dyn TextBackend>, ConfigError> {
    const KIND: &str = "llm";
    let backend: Arc<dyn TextBackend> = match table.provider.as_str() {
        "ollama" => Arc::new(OllamaBackend::new(table.decode::<OllamaConfig>(KIND)?)),
        "openai" => {
            let mut config: OpenAiConfig = table.decode(KIND)?;
            config.api_key = api_key(config.api_key, "OPENAI_API_KEY")?;
            Arc::new(OpenAiBackend::new(config))
        }
        "anthropic" => {
            let mut config: AnthropicConfig = table.decode(KIND)?;
            config.api_key = api_key(config.api_key, "ANTHROPIC_API_KEY")?;
            Arc::new(AnthropicBackend::new(config))
        }
        "replay" => Arc::new(replay_backend(&table.decode::<ReplaySettings>(KIND)?)?),
        other => {
            return Err(ConfigError::UnknownProvider {
                kind: KIND,
                provider: other.to_string(),
                supported: LLM_PROVIDERS,
            });
        }
    };
    tracing::debug!(provider = %table.provider, "configured text backend");
    Ok(backend)
}

/// The configured key, or the environment variable when the key is blank.
fn api_key(configured: String, var: &str) -> Result<String, ConfigError> {
    if !configured.is_empty() {
        return Ok(configured);
    }
    std::env::var(var).map_err(|_| ConfigError::Invalid {
        kind: "llm",
        message: format!("no api_key given and {var} is not set"),
    })
}

/// Canned completions by prompt name.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReplaySettings {
    responses: BTreeMap<String, Vec<String>>,
    defaults: BTreeMap<String, String>,
}

fn replay_backend(settings: &ReplaySettings) -> Result<ReplayBackend, ConfigError> {
    let prompt = |name: &str| {
        name.parse::<Prompt>().map_err(|_| ConfigError::Invalid {
            kind: "llm",
            message: format!("unknown prompt \"{name}\" in replay responses"),
        })
    };
    let mut backend = ReplayBackend::new();
    for (name, texts) in &settings.responses {
        let prompt = prompt(name)?;
        for text in texts {
            backend.push(prompt, text.as_str());
        }
    }
    for (name, text) in &settings.defaults {
        backend = backend.with_default(prompt(name)?, text.as_str());
    }
    Ok(backend)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OxigraphSettings {
    path: Option<PathBuf>,
}

fn build_triple_store(table: &ProviderSettings) -> Result<Arc<dyn TripleStore>, ConfigError> {
    const KIND: &str = "triple_store";
    let store_err = |e: crate::error::StoreError| ConfigError::Invalid {
        kind: KIND,
        message: e.to_string(),
    };
    let store: Arc<dyn TripleStore> = match table.provider.as_str() {
        "oxigraph" => {
            let settings: OxigraphSettings = table.decode(KIND)?;
            let store = match settings.path {
                Some(path) => OxigraphStore::open(&path).map_err(store_err)?,
                None => OxigraphStore::in_memory().map_err(store_err)?,
            };
            Arc::new(store)
        }
        "sparql" => Arc::new(SparqlHttpStore::new(table.decode::<SparqlHttpConfig>(KIND)?)),
        other => {
            return Err(ConfigError::UnknownProvider {
                kind: KIND,
                provider: other.to_string(),
                supported: TRIPLE_PROVIDERS,
            });
        }
    };
    tracing::debug!(provider = %table.provider, "configured triple store");
    Ok(store)
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct HnswSettings {
    path: Option<PathBuf>,
    dimension: usize,
    max_elements: usize,
}

impl Default for HnswSettings {
    fn default() -> Self {
        let index = HnswConfig::default();
        Self {
            path: None,
            dimension: index.dimension,
            max_elements: index.max_elements,
        }
    }
}

fn build_vector_store(table: &ProviderSettings) -> Result<Arc<dyn VectorStore>, ConfigError> {
    const KIND: &str = "vector_store";
    let store: Arc<dyn VectorStore> = match table.provider.as_str() {
        "hnsw" => {
            let settings: HnswSettings = table.decode(KIND)?;
            let index = HnswConfig {
                dimension: settings.dimension,
                max_elements: settings.max_elements,
            };
            match settings.path {
                Some(path) => Arc::new(HnswVectorStore::open(&path, index).map_err(|e| {
                    ConfigError::Invalid {
                        kind: KIND,
                        message: e.to_string(),
                    }
                })?),
                None => Arc::new(HnswVectorStore::in_memory(index)),
            }
        }
        other => {
            return Err(ConfigError::UnknownProvider {
                kind: KIND,
                provider: other.to_string(),
                supported: VECTOR_PROVIDERS,
            });
        }
    };
    tracing::debug!(provider = %table.provider, "configured vector store");
    Ok(store)
}
