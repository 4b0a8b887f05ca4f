//! Embedded vector store: per-group HNSW indexes over hypervector embeddings.
//!
//! Documents are embedded with [`TextEmbedder`] and indexed in an
//! `hnsw_rs` graph with Hamming distance. HNSW does not support removal, so
//! deleted documents become tombstones that searches skip. With a data
//! directory, documents are also written to a redb [`DocumentStore`] and the
//! indexes are rebuilt from it on open.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use anndists::dist::DistHamming;
use dashmap::DashMap;
use hnsw_rs::hnsw::Hnsw;
use rayon::prelude::*;

use crate::graph::{Graph, Namespaces};
use crate::store::durable::DocumentStore;
use crate::store::{FactRecord, StoreResult, collection_name};

use super::embed::{DEFAULT_DIMENSION, TextEmbedder};
use super::{VectorDocument, VectorStore, documents};

#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Components per embedding.
    pub dimension: usize,
    /// Capacity hint for each group's index.
    pub max_elements: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            max_elements: 10_000,
        }
    }
}

/// One group's index.
struct Collection {
    hnsw: Hnsw<'static, u8, DistHamming>,
    /// HNSW point id → document.
    docs: HashMap<usize, VectorDocument>,
    /// Statement id → live HNSW point id.
    by_fact: HashMap<String, usize>,
    tombstones: HashSet<usize>,
    next_id: usize,
}

impl Collection {
    fn new(max_elements: usize) -> Self {
        // max_nb_connection 16, ef_construction 200, layers from expected size
        let max_layer = (max_elements.max(2) as f64).log2().ceil() as usize;
        let max_layer = max_layer.clamp(4, 16);
        Self {
            hnsw: Hnsw::new(16, max_elements, max_layer, 200, DistHamming {}),
            docs: HashMap::new(),
            by_fact: HashMap::new(),
            tombstones: HashSet::new(),
            next_id: 0,
        }
    }

    fn insert(&mut self, doc: VectorDocument, vector: Vec<u8>) -> bool {
        if self.by_fact.contains_key(&doc.id) {
            return false;
        }
        let point = self.next_id;
        self.next_id += 1;
        self.hnsw.insert((vector.as_slice(), point));
        self.by_fact.insert(doc.id.clone(), point);
        self.docs.insert(point, doc);
        true
    }

    fn remove(&mut self, id: &str) -> bool {
        match self.by_fact.remove(id) {
            Some(point) => {
                self.docs.remove(&point);
                self.tombstones.insert(point);
                true
            }
            None => false,
        }
    }

    fn live(&self) -> usize {
        self.by_fact.len()
    }

    /// Tombstoned points outnumber live ones, so searches mostly skip.
    fn needs_compaction(&self) -> bool {
        self.tombstones.len() > self.live()
    }
}

/// In-process vector store.
pub struct HnswVectorStore {
    collections: DashMap<String, Collection>,
    embedder: TextEmbedder,
    config: HnswConfig,
    durable: Option<DocumentStore>,
}

// Safety: Hnsw synchronizes its own graph internally; every other field of a
// Collection is only touched through the DashMap shard lock.
unsafe impl Send for HnswVectorStore {}
unsafe impl Sync for HnswVectorStore {}

impl HnswVectorStore {
    /// Create an in-memory store (no persistence).
    pub fn in_memory(config: HnswConfig) -> Self {
        Self {
            collections: DashMap::new(),
            embedder: TextEmbedder::new(config.dimension),
            config,
            durable: None,
        }
    }

    /// Open a store whose documents persist under `data_dir`. Existing
    /// documents are re-embedded and indexed.
    pub fn open(data_dir: &Path, config: HnswConfig) -> StoreResult<Self> {
        let durable = DocumentStore::open(data_dir)?;
        let stored = durable.load_all()?;
        let mut store = Self::in_memory(config);

        let mut by_group: BTreeMap<String, Vec<VectorDocument>> = BTreeMap::new();
        for (group, doc) in stored {
            by_group.entry(group).or_default().push(doc);
        }
        for (group, docs) in by_group {
            let count = store.index(&group, docs);
            tracing::debug!(%group, count, "rebuilt vector index");
        }

        store.durable = Some(durable);
        Ok(store)
    }

    /// Live documents in a group.
    pub fn len(&self, group: Option<&str>) -> usize {
        self.collections
            .get(collection_name(group))
            .map_or(0, |c| c.live())
    }

    fn embed_all(&self, docs: Vec<VectorDocument>) -> Vec<(VectorDocument, Vec<u8>)> {
        docs.into_par_iter()
            .filter_map(|doc| {
                let vector = self.embedder.embed(&doc.text)?;
                Some((doc, vector))
            })
            .collect()
    }

    /// Embed and insert documents, skipping ids already indexed.
    fn index(&self, group: &str, docs: Vec<VectorDocument>) -> usize {
        let embedded = self.embed_all(docs);

        let mut collection = self
            .collections
            .entry(group.to_string())
            .or_insert_with(|| Collection::new(self.config.max_elements));
        embedded
            .into_iter()
            .map(|(doc, vector)| collection.insert(doc, vector))
            .filter(|&added| added)
            .count()
    }

    /// A fresh index over the live documents of `collection`.
    fn rebuilt(&self, collection: &Collection) -> Collection {
        let mut fresh = Collection::new(self.config.max_elements);
        for (doc, vector) in self.embed_all(collection.docs.values().cloned().collect()) {
            fresh.insert(doc, vector);
        }
        fresh
    }
}

impl VectorStore for HnswVectorStore {
    fn save(&self, data: &Graph, namespaces: &Namespaces, group: Option<&str>) -> StoreResult<usize> {
        let name = collection_name(group);
        let docs = documents(data, namespaces);
        let fresh: Vec<VectorDocument> = match self.collections.get(name) {
            Some(c) => docs
                .into_iter()
                .filter(|d| !c.by_fact.contains_key(&d.id))
                .collect(),
            None => docs,
        };

        if let Some(durable) = &self.durable {
            durable.put_many(name, &fresh)?;
        }
        let added = self.index(name, fresh);
        tracing::debug!(group = name, added, "indexed facts");
        Ok(added)
    }

    fn search(
        &self,
        query: &str,
        group: Option<&str>,
        k: usize,
    ) -> StoreResult<BTreeMap<String, FactRecord>> {
        let name = collection_name(group);
        let Some(collection) = self.collections.get(name) else {
            return Ok(BTreeMap::new());
        };
        if k == 0 || collection.live() == 0 {
            return Ok(BTreeMap::new());
        }
        let Some(vector) = self.embedder.embed(query) else {
            return Ok(BTreeMap::new());
        };

        let want = k + collection.tombstones.len();
        let ef_search = (want * 2).max(32);
        let neighbours = collection.hnsw.search(&vector, want, ef_search);

        let matches: BTreeMap<String, FactRecord> = neighbours
            .into_iter()
            .filter(|n| !collection.tombstones.contains(&n.d_id))
            .filter_map(|n| collection.docs.get(&n.d_id))
            .take(k)
            .map(|doc| (doc.id.clone(), doc.record.clone()))
            .collect();
        tracing::debug!(group = name, k, found = matches.len(), "vector search");
        Ok(matches)
    }

    fn delete(&self, group: Option<&str>) -> StoreResult<()> {
        let name = collection_name(group);
        if let Some(durable) = &self.durable {
            durable.remove_group(name)?;
        }
        self.collections.remove(name);
        Ok(())
    }

    fn delete_by_ids(&self, group: Option<&str>, ids: &[String]) -> StoreResult<()> {
        let name = collection_name(group);
        if let Some(durable) = &self.durable {
            durable.remove_many(name, ids)?;
        }
        if let Some(mut collection) = self.collections.get_mut(name) {
            let removed = ids.iter().filter(|id| collection.remove(id)).count();
            tracing::debug!(group = name, removed, "tombstoned documents");
            if collection.needs_compaction() {
                let tombstones = collection.tombstones.len();
                *collection = self.rebuilt(&collection);
                tracing::debug!(group = name, tombstones, live = collection.live(), "compacted index");
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "hnsw"
    }
}

impl std::fmt::Debug for HnswVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswVectorStore")
            .field("groups", &self.collections.len())
            .field("dimension", &self.config.dimension)
            .field("durable", &self.durable.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::reify::{hydrate_with_ids, reified_facts};
    use crate::graph::{Term, Triple};

    fn ex(local: &str) -> Term {
        Term::iri(format!("http://example.org/{local}"))
    }

    fn facts() -> Graph {
        let mut g = Graph::new();
        g.add(Triple::new(ex("napoleon"), ex("bornIn"), ex("corsica")));
        g.add(Triple::new(ex("napoleon"), ex("marriedTo"), ex("josephine")));
        g.add(Triple::new(ex("wellington"), ex("commanded"), ex("britishArmy")));
        hydrate_with_ids(&g)
    }

    fn id_of(g: &Graph, predicate: &str) -> String {
        reified_facts(g)
            .into_iter()
            .find(|(_, t)| t.predicate == ex(predicate))
            .map(|(id, _)| id)
            .unwrap()
    }

    #[test]
    fn search_finds_the_closest_fact() {
        let store = HnswVectorStore::in_memory(HnswConfig::default());
        let data = facts();
        assert_eq!(store.save(&data, &Namespaces::new(), Some("u")).unwrap(), 3);

        let hits = store.search("where was napoleon born", Some("u"), 1).unwrap();
        assert_eq!(hits.len(), 1);
        let (id, record) = hits.into_iter().next().unwrap();
        assert_eq!(id, id_of(&data, "bornIn"));
        assert_eq!(record.o, "http://example.org/corsica");
    }

    #[test]
    fn groups_are_isolated() {
        let store = HnswVectorStore::in_memory(HnswConfig::default());
        store.save(&facts(), &Namespaces::new(), Some("a")).unwrap();
        assert!(store.search("napoleon", Some("b"), 3).unwrap().is_empty());
        assert!(store.search("napoleon", None, 3).unwrap().is_empty());
        assert_eq!(store.len(Some("a")), 3);
    }

    #[test]
    fn saving_again_does_not_duplicate() {
        let store = HnswVectorStore::in_memory(HnswConfig::default());
        let data = facts();
        store.save(&data, &Namespaces::new(), None).unwrap();
        assert_eq!(store.save(&data, &Namespaces::new(), None).unwrap(), 0);
        assert_eq!(store.len(None), 3);
    }

    #[test]
    fn deleted_ids_never_come_back() {
        let store = HnswVectorStore::in_memory(HnswConfig::default());
        let data = facts();
        store.save(&data, &Namespaces::new(), None).unwrap();

        let born = id_of(&data, "bornIn");
        store.delete_by_ids(None, &[born.clone()]).unwrap();

        let hits = store.search("napoleon born corsica", None, 3).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(!hits.contains_key(&born));
    }

    #[test]
    fn index_is_rebuilt_once_tombstones_dominate() {
        let store = HnswVectorStore::in_memory(HnswConfig::default());
        let data = facts();
        store.save(&data, &Namespaces::new(), None).unwrap();

        store.delete_by_ids(None, &[id_of(&data, "commanded")]).unwrap();
        assert_eq!(store.collections.get(collection_name(None)).unwrap().tombstones.len(), 1);

        store.delete_by_ids(None, &[id_of(&data, "marriedTo")]).unwrap();
        {
            let collection = store.collections.get(collection_name(None)).unwrap();
            assert!(collection.tombstones.is_empty());
            assert_eq!(collection.docs.len(), 1);
        }
        assert_eq!(store.len(None), 1);

        let hits = store.search("napoleon born corsica", None, 3).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits.contains_key(&id_of(&data, "bornIn")));

        // the rebuilt index takes new points
        assert_eq!(store.save(&data, &Namespaces::new(), None).unwrap(), 2);
        assert_eq!(store.len(None), 3);
    }

    #[test]
    fn delete_drops_group() {
        let store = HnswVectorStore::in_memory(HnswConfig::default());
        store.save(&facts(), &Namespaces::new(), Some("a")).unwrap();
        store.delete(Some("a")).unwrap();
        assert_eq!(store.len(Some("a")), 0);
        assert!(store.search("napoleon", Some("a"), 3).unwrap().is_empty());
    }

    #[test]
    fn reopen_rebuilds_index() {
        let dir = tempfile::TempDir::new().unwrap();
        let data = facts();
        let born = id_of(&data, "bornIn");
        {
            let store = HnswVectorStore::open(dir.path(), HnswConfig::default()).unwrap();
            store.save(&data, &Namespaces::new(), Some("u")).unwrap();
            store
                .delete_by_ids(Some("u"), &[id_of(&data, "commanded")])
                .unwrap();
        }

        let store = HnswVectorStore::open(dir.path(), HnswConfig::default()).unwrap();
        assert_eq!(store.len(Some("u")), 2);
        let hits = store.search("napoleon born", Some("u"), 1).unwrap();
        assert!(hits.contains_key(&born));
    }
}
