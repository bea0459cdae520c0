//! Durable [`DocumentStore`] backed by an embedded redb database.
//!
//! One redb table per collection, keyed by document id; values are
//! `MsgPack`-encoded [`Versioned`] documents. A store-wide sequence lives in
//! its own table. redb allows a single write transaction at a time, so the
//! version check of a commit and its writes are serialized for free.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition, TableError, WriteTransaction};
use serde_json::Value;

use crate::storage::document::{
    ChangeSet, DocKey, DocumentStore, StoreError, Versioned, ABSENT_VERSION,
};

const SEQUENCE: TableDefinition<&str, u64> = TableDefinition::new("__sequence");
const SEQUENCE_KEY: &str = "documents";

fn collection(name: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
    TableDefinition::new(name)
}

fn backend(err: impl Into<redb::Error>) -> StoreError {
    StoreError::Backend(anyhow::Error::from(err.into()))
}

fn encode(doc: &Versioned) -> Result<Vec<u8>, StoreError> {
    rmp_serde::to_vec_named(doc).map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<Versioned, StoreError> {
    rmp_serde::from_slice(bytes).map_err(|e| StoreError::Codec(e.to_string()))
}

/// redb-backed document store.
#[derive(Clone)]
pub struct RedbDocumentStore {
    db: Arc<Database>,
}

impl RedbDocumentStore {
    /// Opens (or creates) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(backend)?;
        let txn = db.begin_write().map_err(backend)?;
        txn.open_table(SEQUENCE).map_err(backend)?;
        txn.commit().map_err(backend)?;
        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StoreError::Backend(e.into()))?
    }
}

fn next_version(txn: &WriteTransaction) -> Result<u64, StoreError> {
    let mut table = txn.open_table(SEQUENCE).map_err(backend)?;
    let current = table
        .get(SEQUENCE_KEY)
        .map_err(backend)?
        .map_or(ABSENT_VERSION, |v| v.value());
    let next = current + 1;
    table.insert(SEQUENCE_KEY, next).map_err(backend)?;
    Ok(next)
}

fn read_in(txn: &WriteTransaction, key: &DocKey) -> Result<Option<Versioned>, StoreError> {
    let table = txn.open_table(collection(&key.collection)).map_err(backend)?;
    let guard = table.get(key.id.as_str()).map_err(backend)?;
    guard.map(|bytes| decode(bytes.value())).transpose()
}

fn write_in(txn: &WriteTransaction, key: &DocKey, document: Option<Value>) -> Result<(), StoreError> {
    match document {
        Some(document) => {
            let version = next_version(txn)?;
            let bytes = encode(&Versioned { version, document })?;
            let mut table = txn.open_table(collection(&key.collection)).map_err(backend)?;
            table.insert(key.id.as_str(), bytes.as_slice()).map_err(backend)?;
        }
        None => {
            let mut table = txn.open_table(collection(&key.collection)).map_err(backend)?;
            table.remove(key.id.as_str()).map_err(backend)?;
        }
    }
    Ok(())
}

fn write_one(db: &Database, key: &DocKey, document: Option<Value>) -> Result<(), StoreError> {
    let txn = db.begin_write().map_err(backend)?;
    write_in(&txn, key, document)?;
    txn.commit().map_err(backend)
}

#[async_trait]
impl DocumentStore for RedbDocumentStore {
    async fn load_versioned(&self, key: &DocKey) -> Result<Option<Versioned>, StoreError> {
        let key = key.clone();
        self.blocking(move |db| {
            let txn = db.begin_read().map_err(backend)?;
            let table = match txn.open_table(collection(&key.collection)) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => return Ok(None),
                Err(e) => return Err(backend(e)),
            };
            let guard = table.get(key.id.as_str()).map_err(backend)?;
            guard.map(|bytes| decode(bytes.value())).transpose()
        })
        .await
    }

    async fn store(&self, collection: &str, id: &str, document: Value) -> Result<(), StoreError> {
        let key = DocKey::new(collection, id);
        self.blocking(move |db| write_one(db, &key, Some(document)))
            .await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let key = DocKey::new(collection, id);
        self.blocking(move |db| write_one(db, &key, None)).await
    }

    async fn scan(&self, name: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let name = name.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read().map_err(backend)?;
            let table = match txn.open_table(collection(&name)) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
                Err(e) => return Err(backend(e)),
            };
            let mut entries = Vec::new();
            for entry in table.iter().map_err(backend)? {
                let (id, bytes) = entry.map_err(backend)?;
                entries.push((id.value().to_string(), decode(bytes.value())?.document));
            }
            Ok(entries)
        })
        .await
    }

    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(backend)?;
            for (key, read) in &changes.reads {
                let current = read_in(&txn, key)?.map_or(ABSENT_VERSION, |v| v.version);
                if current != *read {
                    txn.abort().map_err(backend)?;
                    return Err(StoreError::Conflict { key: key.clone() });
                }
            }
            for (key, document) in changes.writes {
                write_in(&txn, &key, document)?;
            }
            txn.commit().map_err(backend)
        })
        .await
    }
}
