//! Dataset Cache
//!
//! Restoring a graph can reference the same nested dataset from many object
//! nodes. `LruDatasetCache` loads each dataset once through a
//! [`DatasetLoader`] and keeps the most recently used ones in memory, so that
//! all those references share one live dataset.

use crate::config::{ProvenanceConfig, DEFAULT_DATASET_CACHE_CAPACITY};
use crate::models::{Dataset, DatasetCache, DatasetError};
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Rebuilds a dataset from its persisted description
#[async_trait]
pub trait DatasetLoader: Send + Sync {
    async fn load(&self, id: &str, persisted: &Value)
        -> Result<Option<Arc<dyn Dataset>>, DatasetError>;
}

pub struct LruDatasetCache {
    loader: Arc<dyn DatasetLoader>,
    cache: Mutex<LruCache<String, Arc<dyn Dataset>>>,
}

impl LruDatasetCache {
    /// Capacity 0 falls back to the default capacity
    pub fn new(loader: Arc<dyn DatasetLoader>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .or(NonZeroUsize::new(DEFAULT_DATASET_CACHE_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            loader,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn from_config(loader: Arc<dyn DatasetLoader>, config: &ProvenanceConfig) -> Self {
        Self::new(loader, config.dataset_cache_capacity)
    }

    /// Makes a live dataset known to the cache
    pub fn insert(&self, dataset: Arc<dyn Dataset>) {
        let id = dataset.dataset_id().to_string();
        self.cache.lock().put(id, dataset);
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    /// Get cache statistics (size, capacity)
    pub fn cache_stats(&self) -> (usize, usize) {
        let cache = self.cache.lock();
        (cache.len(), cache.cap().get())
    }
}

#[async_trait]
impl DatasetCache for LruDatasetCache {
    fn peek(&self, id: &str) -> Option<Arc<dyn Dataset>> {
        self.cache.lock().get(id).cloned()
    }

    async fn get(
        &self,
        id: &str,
        persisted: &Value,
    ) -> Result<Option<Arc<dyn Dataset>>, DatasetError> {
        if let Some(cached) = self.peek(id) {
            return Ok(Some(cached));
        }
        let loaded = self.loader.load(id, persisted).await?;
        if let Some(dataset) = &loaded {
            let mut cache = self.cache.lock();
            // a concurrent load may have landed first; keep the shared instance
            if let Some(existing) = cache.get(id) {
                return Ok(Some(Arc::clone(existing)));
            }
            cache.put(id.to_string(), Arc::clone(dataset));
            tracing::debug!("Loaded dataset '{}' into cache", id);
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Table {
        id: String,
        rows: usize,
    }

    impl Dataset for Table {
        fn dataset_id(&self) -> &str {
            &self.id
        }

        fn persist(&self) -> Value {
            serde_json::json!({ "rows": self.rows })
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Default)]
    struct CountingLoader {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl DatasetLoader for CountingLoader {
        async fn load(
            &self,
            id: &str,
            persisted: &Value,
        ) -> Result<Option<Arc<dyn Dataset>>, DatasetError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if id == "broken" {
                return Err(DatasetError::load_failed(id, "corrupt"));
            }
            let rows = persisted["rows"].as_u64().unwrap_or(0) as usize;
            Ok(Some(Arc::new(Table {
                id: id.to_string(),
                rows,
            })))
        }
    }

    #[tokio::test]
    async fn loads_each_dataset_once() {
        let loader = Arc::new(CountingLoader::default());
        let cache = LruDatasetCache::new(loader.clone(), 4);
        let persisted = serde_json::json!({ "rows": 3 });

        let a = cache.get("t1", &persisted).await.unwrap().unwrap();
        let b = cache.get("t1", &persisted).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(cache.peek("t1").is_some());
    }

    #[tokio::test]
    async fn evicts_least_recently_used() {
        let cache = LruDatasetCache::new(Arc::new(CountingLoader::default()), 1);
        cache.get("a", &Value::Null).await.unwrap();
        cache.get("b", &Value::Null).await.unwrap();
        assert!(cache.peek("a").is_none());
        assert_eq!(cache.cache_stats(), (1, 1));
    }

    #[tokio::test]
    async fn load_failure_is_reported() {
        let cache = LruDatasetCache::new(Arc::new(CountingLoader::default()), 2);
        let err = cache.get("broken", &Value::Null).await.unwrap_err();
        assert!(matches!(err, DatasetError::LoadFailed { .. }));
        assert!(cache.peek("broken").is_none());
    }
}
