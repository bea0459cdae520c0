//! Document store trait and optimistic transactions.
//!
//! Documents are JSON values addressed by `(collection, id)`. Every write
//! stamps the document with a fresh store-wide version; transactions record
//! the version of each document they read and [`DocumentStore::commit`]
//! rejects the whole change set if any of those versions moved.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Shared handle to a document store.
pub type SharedStore = Arc<dyn DocumentStore>;

/// Version recorded for a document that does not exist.
pub const ABSENT_VERSION: u64 = 0;

// ---------------------------------------------------------------------------
// Keys and values
// ---------------------------------------------------------------------------

/// Address of one document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocKey {
    pub collection: String,
    pub id: String,
}

impl DocKey {
    #[must_use]
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A stored document together with the version of its last write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned {
    pub version: u64,
    pub document: Value,
}

/// Reads observed and writes staged by a [`Transaction`].
///
/// A staged write of `None` deletes the document.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub reads: BTreeMap<DocKey, u64>,
    pub writes: BTreeMap<DocKey, Option<Value>>,
}

impl ChangeSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Errors returned by document stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("transaction conflict on {key}")]
    Conflict { key: DocKey },
    #[error("document codec error: {0}")]
    Codec(String),
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// DocumentStore
// ---------------------------------------------------------------------------

/// Pluggable persistence for documents.
/// Implementations: in-memory (`MemoryDocumentStore`), redb (`RedbDocumentStore`).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load a document and its version.
    async fn load_versioned(&self, key: &DocKey) -> Result<Option<Versioned>, StoreError>;

    /// Store a single document, replacing any previous one.
    async fn store(&self, collection: &str, id: &str, document: Value) -> Result<(), StoreError>;

    /// Delete a single document. Deleting a missing document is not an error.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// Load every document of a collection, ordered by id.
    async fn scan(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError>;

    /// Atomically apply `changes` if no document it read has been written since.
    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError>;

    /// Load a single document.
    async fn load(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .load_versioned(&DocKey::new(collection, id))
            .await?
            .map(|v| v.document))
    }
}

/// Returns the first key whose current version differs from the one read.
pub(crate) fn first_conflict<'a, F>(reads: &'a BTreeMap<DocKey, u64>, mut current: F) -> Option<&'a DocKey>
where
    F: FnMut(&DocKey) -> u64,
{
    reads
        .iter()
        .find(|(key, read)| current(key) != **read)
        .map(|(key, _)| key)
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// Optimistic transaction over a [`DocumentStore`].
///
/// Reads go to the store (or to this transaction's own staged writes) and
/// remember the version they saw. Writes are staged and only reach the store
/// on [`Transaction::commit`], all together or not at all.
pub struct Transaction {
    store: SharedStore,
    changes: ChangeSet,
}

impl Transaction {
    #[must_use]
    pub fn begin(store: SharedStore) -> Self {
        Self {
            store,
            changes: ChangeSet::default(),
        }
    }

    /// Reads a document, recording its version for the commit-time check.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn get(&mut self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let key = DocKey::new(collection, id);
        if let Some(staged) = self.changes.writes.get(&key) {
            return Ok(staged.clone());
        }
        let loaded = self.store.load_versioned(&key).await?;
        let version = loaded.as_ref().map_or(ABSENT_VERSION, |v| v.version);
        self.changes.reads.entry(key).or_insert(version);
        Ok(loaded.map(|v| v.document))
    }

    pub fn set(&mut self, collection: &str, id: &str, document: Value) {
        self.changes
            .writes
            .insert(DocKey::new(collection, id), Some(document));
    }

    pub fn delete(&mut self, collection: &str, id: &str) {
        self.changes.writes.insert(DocKey::new(collection, id), None);
    }

    /// Staged writes, in key order.
    #[must_use]
    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    /// Commits every staged write atomically.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] if a document read by this transaction was
    /// written by someone else in the meantime; nothing is applied then.
    pub async fn commit(self) -> Result<(), StoreError> {
        self.store.commit(self.changes).await
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("changes", &self.changes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::storage::engines::MemoryDocumentStore;

    fn store() -> SharedStore {
        Arc::new(MemoryDocumentStore::new())
    }

    #[tokio::test]
    async fn transaction_reads_its_own_writes() {
        let store = store();
        let mut tx = Transaction::begin(Arc::clone(&store));
        tx.set("counters", "a", json!({"n": 1}));
        assert_eq!(tx.get("counters", "a").await.unwrap(), Some(json!({"n": 1})));
        assert!(store.load("counters", "a").await.unwrap().is_none());

        tx.commit().await.unwrap();
        assert_eq!(store.load("counters", "a").await.unwrap(), Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn concurrent_write_to_read_key_conflicts() {
        let store = store();
        store.store("counters", "a", json!({"n": 1})).await.unwrap();

        let mut tx = Transaction::begin(Arc::clone(&store));
        let current = tx.get("counters", "a").await.unwrap().unwrap();
        assert_eq!(current["n"], 1);

        store.store("counters", "a", json!({"n": 5})).await.unwrap();

        tx.set("counters", "a", json!({"n": 2}));
        tx.set("audit", "x", json!({}));
        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { key } if key == DocKey::new("counters", "a")));

        // nothing from the failed transaction was applied
        assert_eq!(store.load("counters", "a").await.unwrap(), Some(json!({"n": 5})));
        assert!(store.load("audit", "x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reading_an_absent_document_guards_its_creation() {
        let store = store();
        let mut tx = Transaction::begin(Arc::clone(&store));
        assert!(tx.get("locks", "l").await.unwrap().is_none());

        store.store("locks", "l", json!(true)).await.unwrap();

        tx.set("locks", "l", json!(false));
        assert!(matches!(tx.commit().await, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn staged_delete_removes_on_commit() {
        let store = store();
        store.store("c", "1", json!(1)).await.unwrap();

        let mut tx = Transaction::begin(Arc::clone(&store));
        tx.delete("c", "1");
        assert_eq!(tx.get("c", "1").await.unwrap(), None);
        tx.commit().await.unwrap();
        assert!(store.load("c", "1").await.unwrap().is_none());
    }
}
