//! Map Service
//!
//! Entry point for map operations on one member. Routes each key to its
//! partition, serializes work per partition, mirrors mutations to backups and
//! wakes the map's `StoreWorker` when persistence was scheduled.
//!
//! ## Responsibilities
//! - **Ownership**: Only the partition's primary accepts map operations; anything else
//!   is answered with `MapError::NotOwner`.
//! - **Replication**: Backups are updated before the partition lock is released, so a
//!   backup never observes mutations out of order.
//! - **Takeover**: `on_member_removed` promotes local backup partitions. Their queues
//!   keep the primary's due instants.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::backup::{BackupOp, BackupTransport};
use super::map_store::MapStore;
use super::partitioner::PartitionTable;
use super::record::{MapKey, MapValue};
use super::record_store::{Mutation, RecordStore};
use super::worker::StoreWorker;
use super::write_behind::WriteBehindQueue;
use crate::cluster::types::NodeId;
use crate::config::{MapConfig, MapStoreConfig};
use crate::error::MapError;
use crate::invalidation::broadcaster::InvalidationBroadcaster;

type PartitionStores<K, V> = tokio::sync::Mutex<HashMap<String, RecordStore<K, V>>>;

/// Everything a member knows about one configured map.
struct MapContext<K: MapKey, V: MapValue> {
    name: String,
    config: MapConfig,
    map_store: Option<Arc<dyn MapStore<K, V>>>,
    store_config: Option<MapStoreConfig>,
    worker: Option<Arc<StoreWorker<K, V>>>,
    destroyed: AtomicBool,
}

impl<K: MapKey, V: MapValue> MapContext<K, V> {
    fn wake(&self) {
        if let Some(worker) = &self.worker {
            worker.wake();
        }
    }
}

pub struct MapService<K: MapKey, V: MapValue> {
    local: NodeId,
    partitions: Arc<PartitionTable>,
    containers: Vec<PartitionStores<K, V>>,
    maps: DashMap<String, Arc<MapContext<K, V>>>,
    backups: Arc<dyn BackupTransport<K, V>>,
    invalidator: Arc<InvalidationBroadcaster<K>>,
    expiration: Mutex<Option<JoinHandle<()>>>,
}

impl<K: MapKey, V: MapValue> MapService<K, V> {
    pub fn new(
        local: NodeId,
        partitions: Arc<PartitionTable>,
        backups: Arc<dyn BackupTransport<K, V>>,
        invalidator: Arc<InvalidationBroadcaster<K>>,
    ) -> Arc<Self> {
        let containers = (0..partitions.partition_count())
            .map(|_| tokio::sync::Mutex::new(HashMap::new()))
            .collect();

        Arc::new(Self {
            local,
            partitions,
            containers,
            maps: DashMap::new(),
            backups,
            invalidator,
            expiration: Mutex::new(None),
        })
    }

    pub fn local_node(&self) -> &NodeId {
        &self.local
    }

    pub fn partition_table(&self) -> &Arc<PartitionTable> {
        &self.partitions
    }

    pub fn invalidator(&self) -> &Arc<InvalidationBroadcaster<K>> {
        &self.invalidator
    }

    /// Configures a map on this member and starts its store worker.
    ///
    /// A store without `map_store` settings is written through (zero delay).
    /// A map that is already configured keeps its settings until
    /// `destroy_map`; returns false in that case.
    pub fn add_map(
        &self,
        name: &str,
        config: MapConfig,
        map_store: Option<Arc<dyn MapStore<K, V>>>,
    ) -> bool {
        let slot = match self.maps.entry(name.to_string()) {
            Entry::Occupied(_) => {
                tracing::warn!("Map {} is already configured, destroy it first", name);
                return false;
            }
            Entry::Vacant(slot) => slot,
        };

        let store_config = match (&map_store, &config.map_store) {
            (Some(_), Some(store_config)) => Some(store_config.clone()),
            (Some(_), None) => Some(MapStoreConfig::default()),
            (None, Some(_)) => {
                tracing::warn!(
                    "Map {} has map store settings but no map store, running in-memory",
                    name
                );
                None
            }
            (None, None) => None,
        };

        let worker = match (&map_store, &store_config) {
            (Some(store), Some(store_config)) => {
                let worker =
                    StoreWorker::new(name, store.clone(), store_config.write_batch_size);
                worker.start();
                Some(worker)
            }
            _ => None,
        };

        tracing::info!(
            "Map {} configured (write delay: {:?}, backups: {})",
            name,
            store_config.as_ref().map(MapStoreConfig::write_delay),
            config.backup_count
        );

        slot.insert(Arc::new(MapContext {
            name: name.to_string(),
            config,
            map_store,
            store_config,
            worker,
            destroyed: AtomicBool::new(false),
        }));
        true
    }

    pub fn map_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.maps.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub async fn put(&self, map: &str, key: K, value: V) -> Result<Option<V>, MapError> {
        let context = self.context(map)?;
        let partition = self.owned_partition(&key)?;

        let mut stores = self.containers[partition as usize].lock().await;
        let store = self.record_store(&mut stores, &context, partition);
        let mutation = store.put(key.clone(), value.clone()).await?;
        let ttl_remaining = store.remaining_ttl(&key);

        self.replicate_put(&context, partition, key, value, ttl_remaining, &mutation)
            .await;
        drop(stores);

        Ok(self.finish(&context, mutation))
    }

    /// Like `put` without returning (or loading) the previous value.
    pub async fn set(&self, map: &str, key: K, value: V) -> Result<(), MapError> {
        let context = self.context(map)?;
        let partition = self.owned_partition(&key)?;

        let mut stores = self.containers[partition as usize].lock().await;
        let store = self.record_store(&mut stores, &context, partition);
        let mutation = store.set(key.clone(), value.clone());
        let ttl_remaining = store.remaining_ttl(&key);

        self.replicate_put(&context, partition, key, value, ttl_remaining, &mutation)
            .await;
        drop(stores);

        self.finish(&context, mutation);
        Ok(())
    }

    pub async fn put_if_absent(&self, map: &str, key: K, value: V) -> Result<Option<V>, MapError> {
        let context = self.context(map)?;
        let partition = self.owned_partition(&key)?;

        let mut stores = self.containers[partition as usize].lock().await;
        let store = self.record_store(&mut stores, &context, partition);
        let mutation = store.put_if_absent(key.clone(), value.clone()).await?;
        if mutation.previous.is_none() {
            let ttl_remaining = store.remaining_ttl(&key);
            self.replicate_put(&context, partition, key, value, ttl_remaining, &mutation)
                .await;
        }
        drop(stores);

        Ok(self.finish(&context, mutation))
    }

    pub async fn get(&self, map: &str, key: &K) -> Result<Option<V>, MapError> {
        let context = self.context(map)?;
        let partition = self.owned_partition(key)?;

        let mut stores = self.containers[partition as usize].lock().await;
        self.record_store(&mut stores, &context, partition)
            .get(key)
            .await
    }

    pub async fn contains_key(&self, map: &str, key: &K) -> Result<bool, MapError> {
        let context = self.context(map)?;
        let partition = self.owned_partition(key)?;

        let mut stores = self.containers[partition as usize].lock().await;
        self.record_store(&mut stores, &context, partition)
            .contains_key(key)
            .await
    }

    /// Removes `key` and schedules its delete-behind. Fails with
    /// `MapError::Load` if the previous value had to be loaded and could not be.
    pub async fn remove(&self, map: &str, key: &K) -> Result<Option<V>, MapError> {
        let context = self.context(map)?;
        let partition = self.owned_partition(key)?;

        let mut stores = self.containers[partition as usize].lock().await;
        let store = self.record_store(&mut stores, &context, partition);
        let mutation = store.remove(key).await?;
        if mutation.previous.is_some() {
            self.replicate_remove(&context, partition, key, &mutation)
                .await;
        }
        drop(stores);

        Ok(self.finish(&context, mutation))
    }

    /// Removes `key` without consulting the map store for its previous value.
    pub async fn delete(&self, map: &str, key: &K) -> Result<(), MapError> {
        let context = self.context(map)?;
        let partition = self.owned_partition(key)?;

        let mut stores = self.containers[partition as usize].lock().await;
        let store = self.record_store(&mut stores, &context, partition);
        let mutation = store.delete(key);
        self.replicate_remove(&context, partition, key, &mutation)
            .await;
        drop(stores);

        self.finish(&context, mutation);
        Ok(())
    }

    /// Drops the in-memory copy of `key`. Nothing is persisted or deleted.
    pub async fn evict(&self, map: &str, key: &K) -> Result<bool, MapError> {
        let context = self.context(map)?;
        let partition = self.owned_partition(key)?;

        let mut stores = self.containers[partition as usize].lock().await;
        let evicted = self
            .record_store(&mut stores, &context, partition)
            .evict(key);
        if evicted {
            self.replicate(&context, partition, BackupOp::Evict { key: key.clone() })
                .await;
        }
        Ok(evicted)
    }

    pub async fn evict_all(&self, map: &str) -> Result<usize, MapError> {
        let context = self.context(map)?;
        let mut evicted = 0;
        for partition in self.partitions.primary_partitions(&self.local) {
            let mut stores = self.containers[partition as usize].lock().await;
            if let Some(store) = stores.get_mut(map) {
                evicted += store.evict_all();
                self.replicate(&context, partition, BackupOp::EvictAll).await;
            }
        }
        tracing::debug!("Evicted {} entries from map {}", evicted, map);
        Ok(evicted)
    }

    /// Removes every entry this member owns and schedules a delete-behind for each.
    pub async fn clear(&self, map: &str) -> Result<(), MapError> {
        let context = self.context(map)?;
        let now = Instant::now();
        for partition in self.partitions.primary_partitions(&self.local) {
            let mut stores = self.containers[partition as usize].lock().await;
            let Some(store) = stores.get_mut(map) else {
                continue;
            };
            let pending = store
                .clear()
                .into_iter()
                .map(|(key, pending)| (key, pending.mirror(now)))
                .collect();
            self.replicate(&context, partition, BackupOp::Clear { pending })
                .await;
        }
        context.wake();
        Ok(())
    }

    /// Entries held on the partitions this member owns.
    pub async fn size(&self, map: &str) -> Result<usize, MapError> {
        self.context(map)?;
        let mut size = 0;
        for partition in self.partitions.primary_partitions(&self.local) {
            let stores = self.containers[partition as usize].lock().await;
            size += stores.get(map).map(RecordStore::size).unwrap_or(0);
        }
        Ok(size)
    }

    /// Blocks until every write pending on this member has been persisted.
    pub async fn flush(&self, map: &str) -> Result<(), MapError> {
        let context = self.context(map)?;
        match &context.worker {
            Some(worker) => worker.flush().await,
            None => Ok(()),
        }
    }

    /// Eagerly loads the owned share of the map store's keys. Returns the
    /// number of entries inserted.
    pub async fn load_all(&self, map: &str) -> Result<usize, MapError> {
        let context = self.context(map)?;
        let Some(map_store) = &context.map_store else {
            return Ok(0);
        };

        let load_error = |source| MapError::Load {
            map: map.to_string(),
            source,
        };
        let keys: Vec<K> = map_store
            .load_all_keys()
            .await
            .map_err(load_error)?
            .into_iter()
            .filter(|key| {
                self.partitions
                    .is_primary(self.partitions.get_partition(key), &self.local)
            })
            .collect();
        if keys.is_empty() {
            return Ok(0);
        }

        let mut by_partition: HashMap<u32, Vec<(K, V)>> = HashMap::new();
        for (key, value) in map_store.load_all(&keys).await.map_err(load_error)? {
            by_partition
                .entry(self.partitions.get_partition(&key))
                .or_default()
                .push((key, value));
        }

        let mut loaded = 0;
        for (partition, entries) in by_partition {
            let mut stores = self.containers[partition as usize].lock().await;
            let store = self.record_store(&mut stores, &context, partition);
            loaded += store.load_entries(entries.clone());
            for (key, value) in entries {
                let op = BackupOp::Put {
                    key,
                    value,
                    ttl_remaining: context.config.ttl(),
                    pending: None,
                };
                self.replicate(&context, partition, op).await;
            }
        }

        tracing::info!("Loaded {} entries into map {}", loaded, map);
        Ok(loaded)
    }

    /// Stops persistence for the map and drops its records on this member.
    /// Writes still pending are discarded; what was already stored stays.
    pub async fn destroy_map(&self, map: &str) -> Result<(), MapError> {
        let Some((_, context)) = self.maps.remove(map) else {
            return Err(MapError::UnknownMap {
                name: map.to_string(),
            });
        };
        context.destroyed.store(true, Ordering::SeqCst);
        if let Some(worker) = &context.worker {
            worker.stop();
        }

        for container in &self.containers {
            let mut stores = container.lock().await;
            if let Some(mut store) = stores.remove(map) {
                store.destroy();
            }
        }

        tracing::info!("Map {} destroyed", map);
        Ok(())
    }

    /// Applies a mutation shipped by the partition's primary.
    pub async fn apply_backup(
        &self,
        map: &str,
        partition: u32,
        op: BackupOp<K, V>,
    ) -> Result<(), MapError> {
        let context = self.context(map)?;
        let container = self
            .containers
            .get(partition as usize)
            .ok_or_else(|| MapError::NotOwner {
                partition,
                owner: None,
            })?;

        let mut stores = container.lock().await;
        let store = self.record_store(&mut stores, &context, partition);
        store.apply_backup(op);
        Ok(())
    }

    /// Reacts to a member leaving: its partitions move to their first backup,
    /// and local backups that became primaries start draining.
    pub async fn on_member_removed(&self, node: &NodeId) -> usize {
        let changed = self.partitions.remove_member(node);
        tracing::info!(
            "Member {} removed, {} partitions changed primary",
            node,
            changed.len()
        );
        self.sync_partition_roles().await
    }

    /// Promotes every local backup store whose partition this member now owns.
    pub async fn sync_partition_roles(&self) -> usize {
        let mut promoted = 0;
        for (partition, container) in self.containers.iter().enumerate() {
            let partition = partition as u32;
            if !self.partitions.is_primary(partition, &self.local) {
                continue;
            }
            let mut stores = container.lock().await;
            for store in stores.values_mut().filter(|store| store.is_backup()) {
                store.promote();
                promoted += 1;
                tracing::info!(
                    "Promoted map {} partition {} to primary",
                    store.name(),
                    partition
                );
            }
        }

        if promoted > 0 {
            for context in self.maps.iter() {
                context.wake();
            }
        }
        promoted
    }

    /// Removes expired records from every local store, primaries and backups.
    pub async fn expire_entries(&self) -> usize {
        let now = Instant::now();
        let mut expired = 0;
        for container in &self.containers {
            let mut stores = container.lock().await;
            for store in stores.values_mut() {
                expired += store.expire_entries(now);
            }
        }
        expired
    }

    /// Spawns the periodic expiry sweep.
    pub fn start_expiration_task(self: &Arc<Self>, period: Duration) {
        let service = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let expired = service.expire_entries().await;
                if expired > 0 {
                    tracing::debug!("Expiry sweep removed {} entries", expired);
                }
            }
        });

        let mut slot = match self.expiration.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Stops every background task without flushing, like a crashed member.
    pub fn shutdown(&self) {
        let expiration = match self.expiration.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = expiration {
            handle.abort();
        }

        for context in self.maps.iter() {
            if let Some(worker) = &context.worker {
                worker.stop();
            }
        }
        tracing::info!("Map service on {} shut down", self.local);
    }

    /// Pending writes on this member's primary queues for `map`.
    pub fn pending_writes(&self, map: &str) -> usize {
        self.maps
            .get(map)
            .and_then(|context| context.worker.as_ref().map(|worker| worker.pending_count()))
            .unwrap_or(0)
    }

    fn context(&self, map: &str) -> Result<Arc<MapContext<K, V>>, MapError> {
        let context = self
            .maps
            .get(map)
            .map(|context| context.clone())
            .ok_or_else(|| MapError::UnknownMap {
                name: map.to_string(),
            })?;

        if context.destroyed.load(Ordering::SeqCst) {
            return Err(MapError::Destroyed {
                name: map.to_string(),
            });
        }
        Ok(context)
    }

    fn owned_partition(&self, key: &K) -> Result<u32, MapError> {
        let partition = self.partitions.get_partition(key);
        if !self.partitions.is_primary(partition, &self.local) {
            return Err(MapError::NotOwner {
                partition,
                owner: self.partitions.primary(partition),
            });
        }
        Ok(partition)
    }

    /// Finds or creates the record store for `context` inside a locked
    /// partition, promoting it if the partition table says we own it now.
    fn record_store<'a>(
        &self,
        stores: &'a mut HashMap<String, RecordStore<K, V>>,
        context: &MapContext<K, V>,
        partition: u32,
    ) -> &'a mut RecordStore<K, V> {
        let primary = self.partitions.is_primary(partition, &self.local);
        let store = stores
            .entry(context.name.clone())
            .or_insert_with(|| self.new_record_store(context, partition, !primary));

        if primary && store.is_backup() {
            store.promote();
            context.wake();
        }
        store
    }

    fn new_record_store(
        &self,
        context: &MapContext<K, V>,
        partition: u32,
        backup: bool,
    ) -> RecordStore<K, V> {
        let queue = context.store_config.as_ref().map(|store_config| {
            Arc::new(WriteBehindQueue::new(
                partition,
                store_config.write_delay(),
                backup,
            ))
        });
        if let (Some(worker), Some(queue)) = (&context.worker, &queue) {
            worker.register_queue(queue.clone());
        }

        tracing::debug!(
            "Created {} record store for map {} partition {}",
            if backup { "backup" } else { "primary" },
            context.name,
            partition
        );

        RecordStore::new(
            &context.name,
            partition,
            context.config.clone(),
            context.map_store.clone(),
            queue,
            self.invalidator.clone(),
            backup,
        )
    }

    async fn replicate_put(
        &self,
        context: &MapContext<K, V>,
        partition: u32,
        key: K,
        value: V,
        ttl_remaining: Option<Duration>,
        mutation: &Mutation<V>,
    ) {
        let op = BackupOp::Put {
            key,
            value,
            ttl_remaining,
            pending: mutation
                .pending
                .as_ref()
                .map(|pending| pending.mirror(Instant::now())),
        };
        self.replicate(context, partition, op).await;
    }

    async fn replicate_remove(
        &self,
        context: &MapContext<K, V>,
        partition: u32,
        key: &K,
        mutation: &Mutation<V>,
    ) {
        let op = BackupOp::Remove {
            key: key.clone(),
            pending: mutation
                .pending
                .as_ref()
                .map(|pending| pending.mirror(Instant::now())),
        };
        self.replicate(context, partition, op).await;
    }

    /// Sends `op` to the map's backups. A backup that cannot be reached is
    /// logged and skipped; the primary's copy stays authoritative.
    async fn replicate(&self, context: &MapContext<K, V>, partition: u32, op: BackupOp<K, V>) {
        let targets: Vec<NodeId> = self
            .partitions
            .backups(partition)
            .into_iter()
            .filter(|target| target != &self.local)
            .take(context.config.backup_count)
            .collect();

        for target in targets {
            if let Err(e) = self
                .backups
                .send_backup(&target, &context.name, partition, op.clone())
                .await
            {
                tracing::warn!(
                    "Backup of map {} partition {} to {} failed: {}",
                    context.name,
                    partition,
                    target,
                    e
                );
            }
        }
    }

    fn finish(&self, context: &MapContext<K, V>, mutation: Mutation<V>) -> Option<V> {
        if mutation.pending.is_some() {
            context.wake();
        }
        mutation.previous
    }
}
