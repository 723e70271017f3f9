//! Key-value persistence for model snapshots

use log::debug;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use crate::constants::MODELS_TREE;
use crate::error::{OrigraphError, OrigraphResult};

/// Storage for JSON documents under string keys
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> OrigraphResult<Option<Value>>;

    fn put(&self, key: &str, value: &Value) -> OrigraphResult<()>;

    fn remove(&self, key: &str) -> OrigraphResult<()>;
}

/// [`KeyValueStore`] backed by one sled tree, flushed after every write
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledStore {
    pub fn new(db: sled::Db) -> OrigraphResult<Self> {
        let tree = db.open_tree(MODELS_TREE)?;
        Ok(Self { db, tree })
    }

    /// Open or create a database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> OrigraphResult<Self> {
        Self::new(sled::open(path)?)
    }

    /// Database that is deleted when dropped
    pub fn temporary() -> OrigraphResult<Self> {
        Self::new(sled::Config::new().temporary(true).open()?)
    }

    pub fn db(&self) -> &sled::Db {
        &self.db
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &str) -> OrigraphResult<Option<Value>> {
        match self.tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &Value) -> OrigraphResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.tree.insert(key.as_bytes(), bytes)?;
        // Ensure the data is durably written to disk
        self.tree.flush()?;
        debug!("Stored '{}' in sled tree {}", key, MODELS_TREE);
        Ok(())
    }

    fn remove(&self, key: &str) -> OrigraphResult<()> {
        self.tree.remove(key.as_bytes())?;
        self.tree.flush()?;
        Ok(())
    }
}

/// In-memory [`KeyValueStore`]
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> OrigraphResult<std::sync::MutexGuard<'_, HashMap<String, Value>>> {
        self.values
            .lock()
            .map_err(|e| OrigraphError::Lock(format!("memory store: {}", e)))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> OrigraphResult<Option<Value>> {
        Ok(self.values()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &Value) -> OrigraphResult<()> {
        self.values()?.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> OrigraphResult<()> {
        self.values()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exercise(store: &dyn KeyValueStore) {
        assert_eq!(store.get("models").unwrap(), None);
        store.put("models", &json!({"a": 1})).unwrap();
        assert_eq!(store.get("models").unwrap(), Some(json!({"a": 1})));
        store.put("models", &json!({"a": 2})).unwrap();
        assert_eq!(store.get("models").unwrap(), Some(json!({"a": 2})));
        store.remove("models").unwrap();
        assert_eq!(store.get("models").unwrap(), None);
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_sled_store() {
        exercise(&SledStore::temporary().unwrap());
    }

    #[test]
    fn test_sled_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledStore::open(dir.path()).unwrap();
            store.put("models", &json!(["kept"])).unwrap();
        }
        let store = SledStore::open(dir.path()).unwrap();
        assert_eq!(store.get("models").unwrap(), Some(json!(["kept"])));
    }
}
