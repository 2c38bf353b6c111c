//! Published status store
//!
//! Key-value sink that unrelated readers (badges, settings screens) read the
//! latest snapshot and privacy mode from. Writes always replace the whole
//! value under a key.

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Key of the latest [`onionlens_core::ConnectionStatus`]
pub const STATUS_KEY: &str = "tor_connection_status";

/// Key of the current [`onionlens_core::PrivacyMode`]
pub const MODE_KEY: &str = "privacy_mode";

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to serialize {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Key-value sink for published state
pub trait StatusStore: Send + Sync {
    /// Replace the value under `key`
    fn put(&self, key: &str, value: Value) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Option<Value>;
}

pub type SharedStore = Arc<dyn StatusStore>;

/// Serialize and store a value
pub fn put_json<T: Serialize>(store: &dyn StatusStore, key: &str, value: &T) -> Result<(), StoreError> {
    let value = serde_json::to_value(value).map_err(|source| StoreError::Serialize {
        key: key.to_string(),
        source,
    })?;
    store.put(key, value)
}

/// Load and deserialize a value; anything unreadable counts as absent
pub fn get_json<T: DeserializeOwned>(store: &dyn StatusStore, key: &str) -> Option<T> {
    store
        .get(key)
        .and_then(|value| serde_json::from_value(value).ok())
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    entries: DashMap<String, Value>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedStore {
        Arc::new(Self::new())
    }
}

impl StatusStore for MemoryStatusStore {
    fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }
}
