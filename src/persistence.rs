//! This module defines the keyed store used to mirror the history for other
//! processes, and the adapter that writes to it after every mutation.
use crate::entry::LogEntry;
use crate::error::{CoreError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// The key under which the history is stored.
pub const HISTORY_KEY: &str = "console_logs";

/// A trait for a persistent keyed byte store.
pub trait KeyedStore: Send + Sync {
    /// Retrieves the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Removes `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// A `KeyedStore` implementation using `sled` for storage.
pub struct SledStore {
    tree: sled::Tree,
}

impl SledStore {
    /// Opens (or creates) the database at `path` and its `console` tree.
    ///
    /// # Errors
    ///
    /// This function will return an error if the database cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Self::new(db)
    }

    /// Wraps an already-open database.
    pub fn new(db: sled::Db) -> Result<Self> {
        let tree = db.open_tree("console")?;
        Ok(Self { tree })
    }
}

impl KeyedStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(key.as_bytes())?.map(|value| value.to_vec()))
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.tree.insert(key.as_bytes(), value)?;
        self.tree.flush()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.tree.remove(key.as_bytes())?;
        self.tree.flush()?;
        Ok(())
    }
}

/// An in-memory `KeyedStore`, shared between clones.
#[derive(Clone, Default)]
pub struct MemoryStore {
    values: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a value is stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.values
            .lock()
            .map(|values| values.contains_key(key))
            .unwrap_or(false)
    }
}

impl KeyedStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let values = self.values.lock().map_err(|_| CoreError::Poisoned)?;
        Ok(values.get(key).cloned())
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut values = self.values.lock().map_err(|_| CoreError::Poisoned)?;
        values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().map_err(|_| CoreError::Poisoned)?;
        values.remove(key);
        Ok(())
    }
}

/// Mirrors the history into a `KeyedStore`.
pub struct PersistenceAdapter {
    store: Arc<dyn KeyedStore>,
    key: String,
    quota_bytes: Option<usize>,
}

impl PersistenceAdapter {
    /// Creates an adapter writing under `HISTORY_KEY` with no quota.
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self {
            store,
            key: HISTORY_KEY.to_string(),
            quota_bytes: None,
        }
    }

    /// Stores the history under `key` instead of `HISTORY_KEY`.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Rejects payloads larger than `quota_bytes`.
    pub fn with_quota(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    /// Serializes and stores the full history.
    ///
    /// # Errors
    ///
    /// Returns `QuotaExceeded` when the payload is over quota, or the
    /// underlying serialization or storage error.
    pub fn save(&self, history: &[Arc<LogEntry>]) -> Result<()> {
        let entries: Vec<&LogEntry> = history.iter().map(|entry| entry.as_ref()).collect();
        let payload = serde_json::to_vec(&entries)?;

        if let Some(quota) = self.quota_bytes {
            if payload.len() > quota {
                return Err(CoreError::QuotaExceeded {
                    size: payload.len(),
                    quota,
                });
            }
        }

        self.store.put(&self.key, payload)
    }

    /// Removes the persisted copy.
    ///
    /// # Errors
    ///
    /// Returns the underlying storage error.
    pub fn purge(&self) -> Result<()> {
        self.store.remove(&self.key)
    }

    /// Loads the history persisted by another process, oldest first.
    ///
    /// Returns an empty history when nothing was persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the payload does not
    /// deserialize.
    pub fn recover(&self) -> Result<Vec<LogEntry>> {
        match self.store.get(&self.key)? {
            Some(payload) => Ok(serde_json::from_slice(&payload)?),
            None => Ok(Vec::new()),
        }
    }
}
