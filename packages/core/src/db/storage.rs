//! Synchronous key-value storage used by the local backend and the local
//! graph manager.
//!
//! Two implementations:
//! - [`MemoryStorage`] - session scoped, lost when the process exits
//! - [`FileStorage`] - one file per key under a directory, survives restarts

use super::error::{GraphError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// String key-value store with synchronous access
pub trait KeyValueStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
    fn remove_item(&self, key: &str) -> Result<()>;
}

/// Reads and deserializes a JSON value from any storage
pub fn read_json<T: serde::de::DeserializeOwned>(
    storage: &(impl KeyValueStorage + ?Sized),
    key: &str,
) -> Result<Option<T>> {
    match storage.get_item(key)? {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

/// Serializes and writes a JSON value to any storage
pub fn write_json<T: serde::Serialize + ?Sized>(
    storage: &(impl KeyValueStorage + ?Sized),
    key: &str,
    value: &T,
) -> Result<()> {
    let text = serde_json::to_string(value)?;
    storage.set_item(key, &text)
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.items.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.items.write().remove(key);
        Ok(())
    }
}

/// Directory-backed storage, one `<key>.json` file per key
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Opens (and creates if missing) the storage directory
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| GraphError::storage(root.display().to_string(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_key(key)))
    }
}

impl KeyValueStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GraphError::storage(key, e)),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        std::fs::write(self.path_for(key), value).map_err(|e| GraphError::storage(key, e))
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GraphError::storage(key, e)),
        }
    }
}

/// Replaces filesystem-unsafe characters with hyphens
fn sanitize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '<' | '>' | '|' | '"' => '-',
            _ => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_set_get_remove() {
        let storage = MemoryStorage::new();
        storage.set_item("a", "1").unwrap();
        assert_eq!(storage.get_item("a").unwrap().as_deref(), Some("1"));
        storage.remove_item("a").unwrap();
        assert!(storage.get_item("a").unwrap().is_none());
    }

    #[test]
    fn file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = FileStorage::open(dir.path()).unwrap();
            write_json(&storage, "graph0.nodes", &vec![1u64, 2]).unwrap();
        }
        let storage = FileStorage::open(dir.path()).unwrap();
        let ids: Option<Vec<u64>> = read_json(&storage, "graph0.nodes").unwrap();
        assert_eq!(ids, Some(vec![1, 2]));
    }

    #[test]
    fn file_storage_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        assert!(storage.get_item("nope").unwrap().is_none());
        storage.remove_item("nope").unwrap();
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("a/b:c"), "a-b-c");
        assert_eq!(sanitize_key("graph1.node.4"), "graph1.node.4");
    }
}
