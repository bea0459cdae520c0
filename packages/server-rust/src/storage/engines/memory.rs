//! In-memory [`DocumentStore`] backed by [`DashMap`].
//!
//! Reads are lock-free. Writes and commits are serialized by a single commit
//! lock so that the version check and the apply step of a transaction happen
//! as one unit.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use crate::storage::document::{
    first_conflict, ChangeSet, DocKey, DocumentStore, StoreError, Versioned, ABSENT_VERSION,
};

/// Process-local document store for tests and single-node deployments.
pub struct MemoryDocumentStore {
    docs: DashMap<DocKey, Versioned>,
    sequence: AtomicU64,
    commit_lock: Mutex<()>,
}

impl MemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            docs: DashMap::new(),
            sequence: AtomicU64::new(ABSENT_VERSION),
            commit_lock: Mutex::new(()),
        }
    }

    /// Number of stored documents across all collections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn next_version(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn current_version(&self, key: &DocKey) -> u64 {
        self.docs.get(key).map_or(ABSENT_VERSION, |v| v.version)
    }

    fn write(&self, key: DocKey, document: Option<Value>) {
        match document {
            Some(document) => {
                let version = self.next_version();
                self.docs.insert(key, Versioned { version, document });
            }
            None => {
                self.docs.remove(&key);
            }
        }
    }

    fn apply(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let _guard = self.commit_lock.lock();
        if let Some(key) = first_conflict(&changes.reads, |key| self.current_version(key)) {
            return Err(StoreError::Conflict { key: key.clone() });
        }
        for (key, document) in changes.writes {
            self.write(key, document);
        }
        Ok(())
    }

    fn write_one(&self, key: DocKey, document: Option<Value>) {
        let _guard = self.commit_lock.lock();
        self.write(key, document);
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn load_versioned(&self, key: &DocKey) -> Result<Option<Versioned>, StoreError> {
        Ok(self.docs.get(key).map(|entry| entry.value().clone()))
    }

    async fn store(&self, collection: &str, id: &str, document: Value) -> Result<(), StoreError> {
        self.write_one(DocKey::new(collection, id), Some(document));
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.write_one(DocKey::new(collection, id), None);
        Ok(())
    }

    async fn scan(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let mut entries: Vec<(String, Value)> = self
            .docs
            .iter()
            .filter(|entry| entry.key().collection == collection)
            .map(|entry| (entry.key().id.clone(), entry.value().document.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        self.apply(changes)
    }
}
