//! Durable storage layer
//!
//! This module provides the key-value storage the session core persists to.
//! It supports:
//! - File storage - default, a single JSON document that survives restarts
//! - In-memory storage (moka) - for tests and ephemeral runs
//!
//! The storage driver is selected based on configuration.
//!
//! # Usage
//!
//! ```rust,ignore
//! use gifcap_session::storage::{create_storage, KeyValueStore};
//! use gifcap_session::config::StorageConfig;
//!
//! let storage = create_storage(&StorageConfig::default()).await?;
//! storage.set_many(vec![("key".to_string(), serde_json::json!("value"))]).await?;
//! ```

pub mod file;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{StorageConfig, StorageDriver};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Key-value storage trait
///
/// Values are JSON. Every call is applied as one step: a concurrent reader
/// sees either all of a `set_many`/`remove_many` or none of it.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the values stored under `keys`; missing keys are omitted
    async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, Value>>;

    /// Store all items in one step
    async fn set_many(&self, items: Vec<(String, Value)>) -> Result<()>;

    /// Remove all keys in one step; missing keys are a no-op
    async fn remove_many(&self, keys: &[&str]) -> Result<()>;
}

/// Unified storage enum for runtime selection of the driver
#[derive(Debug)]
pub enum Storage {
    /// JSON document on disk
    File(FileStore),
    /// In-memory storage using moka
    Memory(MemoryStore),
}

#[async_trait]
impl KeyValueStore for Storage {
    async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        match self {
            Storage::File(store) => store.get_many(keys).await,
            Storage::Memory(store) => store.get_many(keys).await,
        }
    }

    async fn set_many(&self, items: Vec<(String, Value)>) -> Result<()> {
        match self {
            Storage::File(store) => store.set_many(items).await,
            Storage::Memory(store) => store.set_many(items).await,
        }
    }

    async fn remove_many(&self, keys: &[&str]) -> Result<()> {
        match self {
            Storage::File(store) => store.remove_many(keys).await,
            Storage::Memory(store) => store.remove_many(keys).await,
        }
    }
}

/// Create a storage instance based on configuration
///
/// - `StorageDriver::File` - a `FileStore` at `config.path`; parent
///   directories are created on first write
/// - `StorageDriver::Memory` - an empty `MemoryStore`
///
/// # Errors
/// Returns an error if the file driver is configured with an empty path.
pub async fn create_storage(config: &StorageConfig) -> Result<Arc<Storage>> {
    match config.driver {
        StorageDriver::File => {
            if config.path.as_os_str().is_empty() {
                anyhow::bail!(
                    "File storage driver requires a path. \
                     Set 'path' in storage configuration or use GIFCAP_STORAGE_PATH environment variable."
                );
            }
            Ok(Arc::new(Storage::File(FileStore::new(&config.path))))
        }
        StorageDriver::Memory => Ok(Arc::new(Storage::Memory(MemoryStore::new()))),
    }
}
