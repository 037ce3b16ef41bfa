//! In-memory storage implementation using moka
//!
//! Provides a process-local, thread-safe key-value store. Nothing survives a
//! restart, so it suits tests and ephemeral runs.
//!
//! Entries never expire and are never evicted: a session disappears only
//! when it is cleared.

use super::KeyValueStore;
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory key-value store using moka
pub struct MemoryStore {
    /// The underlying moka cache instance
    cache: Cache<String, Arc<Value>>,
    /// Makes multi-key writes a single step for readers
    batch: RwLock<()>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            cache: Cache::builder().build(),
            batch: RwLock::new(()),
        }
    }

    /// Get the current number of entries
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let _guard = self.batch.read().await;
        let mut values = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.cache.get(*key).await {
                values.insert(key.to_string(), value.as_ref().clone());
            }
        }
        Ok(values)
    }

    async fn set_many(&self, items: Vec<(String, Value)>) -> Result<()> {
        let _guard = self.batch.write().await;
        for (key, value) in items {
            self.cache.insert(key, Arc::new(value)).await;
        }
        Ok(())
    }

    async fn remove_many(&self, keys: &[&str]) -> Result<()> {
        let _guard = self.batch.write().await;
        for key in keys {
            self.cache.invalidate(*key).await;
        }
        Ok(())
    }
}
