use dashmap::DashMap;
use std::sync::Arc;

use super::merge::policy_for;
use super::record::RecordMigrationInfo;
use super::store::{ReplicatedRecordStore, SyncDecision};
use crate::config::ReplicatedMapConfig;
use crate::storage::record::{MapKey, MapValue};

/// Owns every replicated map on this member.
pub struct ReplicatedMapService<K, V> {
    default_config: ReplicatedMapConfig,
    configs: DashMap<String, ReplicatedMapConfig>,
    stores: DashMap<String, Arc<ReplicatedRecordStore<K, V>>>,
}

impl<K, V> ReplicatedMapService<K, V>
where
    K: MapKey,
    V: MapValue + PartialEq,
{
    pub fn new(default_config: ReplicatedMapConfig) -> Arc<Self> {
        Arc::new(Self {
            default_config,
            configs: DashMap::new(),
            stores: DashMap::new(),
        })
    }

    /// Must be called before the map is first used to take effect.
    pub fn configure(&self, name: &str, config: ReplicatedMapConfig) {
        self.configs.insert(name.to_string(), config);
    }

    pub fn get_or_create(&self, name: &str) -> Arc<ReplicatedRecordStore<K, V>> {
        self.stores
            .entry(name.to_string())
            .or_insert_with(|| {
                let config = self
                    .configs
                    .get(name)
                    .map(|config| config.clone())
                    .unwrap_or_else(|| self.default_config.clone());
                tracing::info!(
                    "Created replicated map {} (merge policy: {:?})",
                    name,
                    config.merge_policy
                );
                Arc::new(ReplicatedRecordStore::new(
                    name,
                    policy_for(config.merge_policy),
                ))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ReplicatedRecordStore<K, V>>> {
        self.stores.get(name).map(|store| store.clone())
    }

    pub fn put_record(&self, name: &str, record: RecordMigrationInfo<K, V>) -> bool {
        self.get_or_create(name).put_record(record)
    }

    pub fn sync_decision(&self, name: &str, peer_version: u64, peer_digest: u64) -> SyncDecision {
        self.get_or_create(name).sync_decision(peer_version, peer_digest)
    }

    /// Applies a removal shipped by a peer. Returns whether the key existed.
    pub fn remove_record(&self, name: &str, key: &K) -> bool {
        self.get_or_create(name).remove(key).is_some()
    }

    pub fn destroy(&self, name: &str) -> bool {
        match self.stores.remove(name) {
            Some((_, store)) => {
                store.destroy();
                true
            }
            None => false,
        }
    }

    pub fn map_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }
}
