//! Key-addressed record storage.
//!
//! The engine reads master data and writes calculations through the
//! [`RecordStore`] trait: a flat, collection-scoped map from string keys
//! to JSON documents.  Two implementations are provided: an in-memory
//! [`MemoryStore`] and a directory-backed [`JsonFileStore`].  Both
//! replace a record atomically on upsert, which is the only write the
//! engine performs.
//!
//! Typed access goes through [`put`], [`fetch`] and [`fetch_all`] for
//! any type implementing [`Record`].

use crate::models::{
    CalculatedPayroll, ContractType, CostCenter, MonthlyMovement, PayrollConcept, Worker,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Named collections known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Workers,
    Concepts,
    CostCenters,
    ContractTypes,
    MonthlyMovements,
    Calculations,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Workers => "workers",
            Collection::Concepts => "concepts",
            Collection::CostCenters => "costCenters",
            Collection::ContractTypes => "contractTypes",
            Collection::MonthlyMovements => "monthlyMovements",
            Collection::Calculations => "calculations",
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("record {key} in {collection} is corrupt: {reason}")]
    Corrupt {
        collection: &'static str,
        key: String,
        reason: String,
    },
    #[error("invalid record key {0:?}")]
    InvalidKey(String),
}

/// Storage abstraction consumed by the engine.
///
/// Implementations must make `upsert` a single atomic replace of the
/// record stored under `key`.
pub trait RecordStore: Send + Sync {
    fn upsert(&self, collection: Collection, key: &str, record: Value) -> Result<(), StoreError>;
    fn get_all(&self, collection: Collection) -> Result<Vec<Value>, StoreError>;
    fn get_by_id(&self, collection: Collection, key: &str) -> Result<Option<Value>, StoreError>;
}

/// A document with a declared identity field.
pub trait Record: Serialize + DeserializeOwned {
    const COLLECTION: Collection;
    fn key(&self) -> &str;
}

impl Record for Worker {
    const COLLECTION: Collection = Collection::Workers;
    fn key(&self) -> &str {
        &self.id
    }
}

impl Record for PayrollConcept {
    const COLLECTION: Collection = Collection::Concepts;
    fn key(&self) -> &str {
        &self.id
    }
}

impl Record for CostCenter {
    const COLLECTION: Collection = Collection::CostCenters;
    fn key(&self) -> &str {
        &self.id
    }
}

impl Record for ContractType {
    const COLLECTION: Collection = Collection::ContractTypes;
    fn key(&self) -> &str {
        &self.id
    }
}

impl Record for MonthlyMovement {
    const COLLECTION: Collection = Collection::MonthlyMovements;
    fn key(&self) -> &str {
        &self.id
    }
}

impl Record for CalculatedPayroll {
    const COLLECTION: Collection = Collection::Calculations;
    fn key(&self) -> &str {
        &self.id
    }
}

fn corrupt(collection: Collection, key: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt {
        collection: collection.name(),
        key: key.to_string(),
        reason: err.to_string(),
    }
}

/// Serialise and upsert a record under its own key.
pub fn put<R: Record>(store: &dyn RecordStore, record: &R) -> Result<(), StoreError> {
    let value = serde_json::to_value(record).map_err(|e| corrupt(R::COLLECTION, record.key(), e))?;
    store.upsert(R::COLLECTION, record.key(), value)
}

pub fn fetch<R: Record>(store: &dyn RecordStore, key: &str) -> Result<Option<R>, StoreError> {
    match store.get_by_id(R::COLLECTION, key)? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| corrupt(R::COLLECTION, key, e)),
        None => Ok(None),
    }
}

pub fn fetch_all<R: Record>(store: &dyn RecordStore) -> Result<Vec<R>, StoreError> {
    store
        .get_all(R::COLLECTION)?
        .into_iter()
        .map(|value| {
            let key = value
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("<unknown>")
                .to_string();
            serde_json::from_value(value).map_err(|e| corrupt(R::COLLECTION, &key, e))
        })
        .collect()
}

/// Process-local store.  Records are kept in key order so listings are
/// stable.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Collection, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("memory store lock poisoned".into())
}

impl RecordStore for MemoryStore {
    fn upsert(&self, collection: Collection, key: &str, record: Value) -> Result<(), StoreError> {
        let mut guard = self.collections.write().map_err(poisoned)?;
        guard
            .entry(collection)
            .or_default()
            .insert(key.to_string(), record);
        Ok(())
    }

    fn get_all(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        let guard = self.collections.read().map_err(poisoned)?;
        Ok(guard
            .get(&collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    fn get_by_id(&self, collection: Collection, key: &str) -> Result<Option<Value>, StoreError> {
        let guard = self.collections.read().map_err(poisoned)?;
        Ok(guard
            .get(&collection)
            .and_then(|records| records.get(key))
            .cloned())
    }
}

/// Directory-backed store: `<root>/<collection>/<key>.json`.
///
/// Upserts write a temporary file next to the target and rename it over
/// the old record, so readers never observe a half-written document.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl JsonFileStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| io_error(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, collection: Collection) -> PathBuf {
        self.root.join(collection.name())
    }

    fn record_path(&self, collection: Collection, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty()
            || key.starts_with('.')
            || key.contains(['/', '\\'])
            || key.contains("..")
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.collection_dir(collection).join(format!("{key}.json")))
    }
}

fn io_error(path: &Path, err: std::io::Error) -> StoreError {
    StoreError::Unavailable(format!("{}: {}", path.display(), err))
}

impl RecordStore for JsonFileStore {
    fn upsert(&self, collection: Collection, key: &str, record: Value) -> Result<(), StoreError> {
        let target = self.record_path(collection, key)?;
        let dir = self.collection_dir(collection);
        std::fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;

        let body = serde_json::to_vec_pretty(&record).map_err(|e| corrupt(collection, key, e))?;
        let tmp = dir.join(format!(
            ".{key}.{}.{}.tmp",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&tmp, body).map_err(|e| io_error(&tmp, e))?;
        std::fs::rename(&tmp, &target).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            io_error(&target, e)
        })
    }

    fn get_all(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        let dir = self.collection_dir(collection);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| io_error(&dir, e))? {
            let path = entry.map_err(|e| io_error(&dir, e))?.path();
            let hidden = path
                .file_name()
                .and_then(|name| name.to_str())
                .map_or(true, |name| name.starts_with('.'));
            if !hidden && path.extension().map_or(false, |ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        paths.iter().map(|path| read_record(collection, path)).collect()
    }

    fn get_by_id(&self, collection: Collection, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.record_path(collection, key)?;
        if !path.is_file() {
            return Ok(None);
        }
        read_record(collection, &path).map(Some)
    }
}

fn read_record(collection: Collection, path: &Path) -> Result<Value, StoreError> {
    let data = std::fs::read(path).map_err(|e| io_error(path, e))?;
    serde_json::from_slice(&data).map_err(|e| {
        let key = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default();
        corrupt(collection, key, e)
    })
}
