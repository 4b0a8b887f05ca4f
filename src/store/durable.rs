//! ACID-durable document store backed by redb.
//!
//! Keeps the vector index's documents across restarts. Vectors themselves
//! are not stored: they are a pure function of the text and are rebuilt
//! when the index is opened.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};

use crate::error::StoreError;
use crate::store::StoreResult;
use crate::store::vector::VectorDocument;

/// `"<group>\0<id>"` → JSON-encoded [`VectorDocument`].
const DOCUMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");

const FILE_NAME: &str = "ontomem-vectors.redb";

fn key(group: &str, id: &str) -> String {
    format!("{group}\0{id}")
}

fn redb_err(op: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Redb {
        message: format!("{op} failed: {e}"),
    }
}

/// Durable document table.
pub struct DocumentStore {
    db: Arc<Database>,
}

impl DocumentStore {
    /// Open or create the document database in the given directory.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io { source: e })?;
        let db_path = data_dir.join(FILE_NAME);
        let db = Database::create(&db_path).map_err(|e| StoreError::Redb {
            message: format!("failed to open redb at {}: {e}", db_path.display()),
        })?;

        // Make sure the table exists so readers never see a missing table.
        let txn = db.begin_write().map_err(|e| redb_err("begin_write", e))?;
        txn.open_table(DOCUMENTS)
            .map_err(|e| redb_err("open_table", e))?;
        txn.commit().map_err(|e| redb_err("commit", e))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Insert or overwrite documents of one group in a single transaction.
    pub fn put_many(&self, group: &str, docs: &[VectorDocument]) -> StoreResult<()> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| redb_err("begin_write", e))?;
        {
            let mut table = txn
                .open_table(DOCUMENTS)
                .map_err(|e| redb_err("open_table", e))?;
            for doc in docs {
                let bytes = serde_json::to_vec(doc).map_err(|e| StoreError::Serialization {
                    message: e.to_string(),
                })?;
                table
                    .insert(key(group, &doc.id).as_str(), bytes.as_slice())
                    .map_err(|e| redb_err("insert", e))?;
            }
        }
        txn.commit().map_err(|e| redb_err("commit", e))
    }

    /// Remove documents by id. Returns how many existed.
    pub fn remove_many(&self, group: &str, ids: &[String]) -> StoreResult<usize> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| redb_err("begin_write", e))?;
        let mut removed = 0;
        {
            let mut table = txn
                .open_table(DOCUMENTS)
                .map_err(|e| redb_err("open_table", e))?;
            for id in ids {
                let existed = table
                    .remove(key(group, id).as_str())
                    .map_err(|e| redb_err("remove", e))?
                    .is_some();
                removed += existed as usize;
            }
        }
        txn.commit().map_err(|e| redb_err("commit", e))?;
        Ok(removed)
    }

    /// Remove every document of a group.
    pub fn remove_group(&self, group: &str) -> StoreResult<usize> {
        let ids: Vec<String> = self
            .load_all()?
            .into_iter()
            .filter(|(g, _)| g == group)
            .map(|(_, doc)| doc.id)
            .collect();
        self.remove_many(group, &ids)
    }

    /// Every stored document with its group.
    pub fn load_all(&self) -> StoreResult<Vec<(String, VectorDocument)>> {
        let txn = self.db.begin_read().map_err(|e| redb_err("begin_read", e))?;
        let table = txn
            .open_table(DOCUMENTS)
            .map_err(|e| redb_err("open_table", e))?;

        let mut docs = Vec::new();
        for entry in table.iter().map_err(|e| redb_err("iter", e))? {
            let (k, v) = entry.map_err(|e| redb_err("read", e))?;
            let Some((group, _)) = k.value().split_once('\0') else {
                continue;
            };
            let doc: VectorDocument =
                serde_json::from_slice(v.value()).map_err(|e| StoreError::Serialization {
                    message: format!("corrupt document {:?}: {e}", k.value()),
                })?;
            docs.push((group.to_string(), doc));
        }
        Ok(docs)
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore").finish()
    }
}
