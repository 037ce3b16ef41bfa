//! File storage implementation
//!
//! Keeps every key in one JSON object on disk. Each mutation rewrites the
//! whole document into a temporary file in the same directory and renames it
//! over the old one, so a reader (in this process or another) sees either
//! the previous document or the new one, never a torn write.
//!
//! A document that is missing, unreadable or not a JSON object reads as
//! empty. The next write replaces it.

use super::KeyValueStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

/// Key-value store backed by a single JSON document
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    /// Serialises read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Create a store for the document at `path`
    ///
    /// Nothing is touched on disk until the first write.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the backing document
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Map<String, Value> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Map::new(),
            Err(e) => {
                tracing::warn!("Failed to read storage file {}: {}", self.path.display(), e);
                return Map::new();
            }
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                tracing::warn!(
                    "Storage file {} is not a JSON object, treating as empty",
                    self.path.display()
                );
                Map::new()
            }
        }
    }

    async fn persist(&self, document: Map<String, Value>) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &Value::Object(document)))
            .await
            .context("Storage write task panicked")?
    }
}

/// Write `document` to `path` through a temp file and rename
fn write_atomically(path: &Path, document: &Value) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create storage directory {}", dir.display()))?;

    let mut tmp = NamedTempFile::new_in(&dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    let bytes = serde_json::to_vec_pretty(document).context("Failed to serialize storage document")?;
    tmp.write_all(&bytes).context("Failed to write storage document")?;
    tmp.as_file().sync_all().context("Failed to flush storage document")?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace storage file {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let mut document = self.load().await;
        Ok(keys
            .iter()
            .filter_map(|key| document.remove(*key).map(|value| (key.to_string(), value)))
            .collect())
    }

    async fn set_many(&self, items: Vec<(String, Value)>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.load().await;
        for (key, value) in items {
            document.insert(key, value);
        }
        self.persist(document).await
    }

    async fn remove_many(&self, keys: &[&str]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.load().await;
        let before = document.len();
        for key in keys {
            document.remove(*key);
        }
        if document.len() == before {
            return Ok(());
        }
        self.persist(document).await
    }
}
