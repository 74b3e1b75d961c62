//! Durable Store Seam
//!
//! `MapStore` is the persistence collaborator a map writes behind to. The
//! batch methods default to looping over the single-key ones so simple stores
//! only implement five methods.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use super::record::{MapKey, MapValue};
use crate::error::StoreError;

#[async_trait]
pub trait MapStore<K: MapKey, V: MapValue>: Send + Sync {
    async fn load(&self, key: &K) -> Result<Option<V>, StoreError>;

    async fn load_all(&self, keys: &[K]) -> Result<HashMap<K, V>, StoreError> {
        let mut loaded = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.load(key).await? {
                loaded.insert(key.clone(), value);
            }
        }
        Ok(loaded)
    }

    /// Keys to populate on eager initial load. Empty means "load lazily".
    async fn load_all_keys(&self) -> Result<Vec<K>, StoreError> {
        Ok(Vec::new())
    }

    async fn store(&self, key: &K, value: &V) -> Result<(), StoreError>;

    async fn store_all(&self, entries: &[(K, V)]) -> Result<(), StoreError> {
        for (key, value) in entries {
            self.store(key, value).await?;
        }
        Ok(())
    }

    async fn delete(&self, key: &K) -> Result<(), StoreError>;

    async fn delete_all(&self, keys: &[K]) -> Result<(), StoreError> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }
}

/// A `MapStore` that keeps everything in a `DashMap`.
///
/// Stands in for a real database in the node binary and in tests.
pub struct InMemoryMapStore<K, V> {
    entries: DashMap<K, V>,
}

impl<K: MapKey, V: MapValue> InMemoryMapStore<K, V> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
        })
    }

    /// Seeds the store directly, bypassing any map.
    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl<K: MapKey, V: MapValue> MapStore<K, V> for InMemoryMapStore<K, V> {
    async fn load(&self, key: &K) -> Result<Option<V>, StoreError> {
        Ok(self.get(key))
    }

    async fn load_all_keys(&self) -> Result<Vec<K>, StoreError> {
        Ok(self.entries.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn store(&self, key: &K, value: &V) -> Result<(), StoreError> {
        self.entries.insert(key.clone(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &K) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}
