//! Per-partition, per-map record store.
//!
//! Owns the in-memory records of one map inside one partition and decides
//! what each operation hands to the write-behind queue. A `RecordStore` is
//! only ever touched while its partition lock is held, so it takes `&mut self`
//! and needs no interior locking of its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::backup::BackupOp;
use super::map_store::MapStore;
use super::record::{MapKey, MapValue, Record};
use super::write_behind::{MirroredWrite, PendingWrite, WriteBehindQueue, WriteOp};
use crate::config::MapConfig;
use crate::error::MapError;
use crate::invalidation::broadcaster::InvalidationBroadcaster;

/// Result of a mutating operation: what the caller sees and what the
/// backups must mirror.
#[derive(Debug, Clone)]
pub struct Mutation<V> {
    pub previous: Option<V>,
    pub pending: Option<PendingWrite<V>>,
}

impl<V> Mutation<V> {
    fn unchanged(previous: Option<V>) -> Self {
        Self {
            previous,
            pending: None,
        }
    }
}

pub struct RecordStore<K: MapKey, V: MapValue> {
    name: String,
    partition: u32,
    config: MapConfig,
    records: HashMap<K, Record<V>>,
    map_store: Option<Arc<dyn MapStore<K, V>>>,
    write_behind: Option<Arc<WriteBehindQueue<K, V>>>,
    invalidator: Arc<InvalidationBroadcaster<K>>,
    backup: bool,
}

impl<K: MapKey, V: MapValue> RecordStore<K, V> {
    pub fn new(
        name: &str,
        partition: u32,
        config: MapConfig,
        map_store: Option<Arc<dyn MapStore<K, V>>>,
        write_behind: Option<Arc<WriteBehindQueue<K, V>>>,
        invalidator: Arc<InvalidationBroadcaster<K>>,
        backup: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            partition,
            config,
            records: HashMap::new(),
            map_store,
            write_behind,
            invalidator,
            backup,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn is_backup(&self) -> bool {
        self.backup
    }

    pub fn write_behind(&self) -> Option<&Arc<WriteBehindQueue<K, V>>> {
        self.write_behind.as_ref()
    }

    /// Backup becomes primary. Pending writes keep their due instants.
    pub fn promote(&mut self) {
        self.backup = false;
        if let Some(queue) = &self.write_behind {
            queue.promote();
        }
    }

    pub async fn get(&mut self, key: &K) -> Result<Option<V>, MapError> {
        let now = Instant::now();
        self.expire_if_needed(key, now);

        if let Some(record) = self.records.get_mut(key) {
            record.touch(now);
            return Ok(Some(record.value.clone()));
        }

        let loaded = self.load_through(key).await?;
        if let Some(value) = &loaded {
            self.records
                .insert(key.clone(), Record::new(value.clone(), now, self.config.ttl()));
        }
        Ok(loaded)
    }

    pub async fn contains_key(&mut self, key: &K) -> Result<bool, MapError> {
        if self.live_value(key, Instant::now()).is_some() {
            return Ok(true);
        }
        Ok(self.load_through(key).await?.is_some())
    }

    /// Stores `value`, returning the previous one. Loads the previous value
    /// from the map store when it is not in memory.
    pub async fn put(&mut self, key: K, value: V) -> Result<Mutation<V>, MapError> {
        let now = Instant::now();
        let previous = match self.live_value(&key, now) {
            Some(previous) => Some(previous),
            None => self.load_through(&key).await?,
        };

        let pending = self.write_record(key, value, now);
        Ok(Mutation { previous, pending })
    }

    /// Like `put` but never loads; `previous` only reflects memory.
    pub fn set(&mut self, key: K, value: V) -> Mutation<V> {
        let now = Instant::now();
        let previous = self.live_value(&key, now);
        let pending = self.write_record(key, value, now);
        Mutation { previous, pending }
    }

    pub async fn put_if_absent(&mut self, key: K, value: V) -> Result<Mutation<V>, MapError> {
        let now = Instant::now();
        if let Some(existing) = self.live_value(&key, now) {
            return Ok(Mutation::unchanged(Some(existing)));
        }
        if let Some(existing) = self.load_through(&key).await? {
            self.records.insert(
                key,
                Record::new(existing.clone(), now, self.config.ttl()),
            );
            return Ok(Mutation::unchanged(Some(existing)));
        }

        let pending = self.write_record(key, value, now);
        Ok(Mutation {
            previous: None,
            pending,
        })
    }

    /// Removes the entry and schedules a delete-behind. Needs the previous
    /// value, so a failing load fails the whole call and changes nothing.
    pub async fn remove(&mut self, key: &K) -> Result<Mutation<V>, MapError> {
        let now = Instant::now();
        let previous = match self.live_value(key, now) {
            Some(previous) => Some(previous),
            None => self.load_through(key).await?,
        };
        if previous.is_none() {
            return Ok(Mutation::unchanged(None));
        }

        self.records.remove(key);
        let pending = self.enqueue(key.clone(), WriteOp::Delete);
        self.invalidate(vec![key.clone()]);
        Ok(Mutation { previous, pending })
    }

    /// Removes without looking at the previous value, so it never loads.
    pub fn delete(&mut self, key: &K) -> Mutation<V> {
        let previous = self.records.remove(key).map(|record| record.value);
        let pending = self.enqueue(key.clone(), WriteOp::Delete);
        self.invalidate(vec![key.clone()]);
        Mutation { previous, pending }
    }

    /// Drops the in-memory record only. The map store is left alone.
    pub fn evict(&mut self, key: &K) -> bool {
        let evicted = self.records.remove(key).is_some();
        if evicted {
            self.invalidate(vec![key.clone()]);
        }
        evicted
    }

    pub fn evict_all(&mut self) -> usize {
        let keys: Vec<K> = self.records.drain().map(|(key, _)| key).collect();
        let evicted = keys.len();
        self.invalidate(keys);
        evicted
    }

    /// Removes every record and schedules a delete-behind for each.
    pub fn clear(&mut self) -> Vec<(K, PendingWrite<V>)> {
        let keys: Vec<K> = self.records.drain().map(|(key, _)| key).collect();
        let pending = keys
            .iter()
            .filter_map(|key| {
                self.enqueue(key.clone(), WriteOp::Delete)
                    .map(|pending| (key.clone(), pending))
            })
            .collect();
        self.invalidate(keys);
        pending
    }

    pub fn size(&self) -> usize {
        let now = Instant::now();
        let max_idle = self.config.max_idle();
        self.records
            .values()
            .filter(|record| !record.is_expired(now, max_idle))
            .count()
    }

    pub fn keys(&self) -> Vec<K> {
        self.records.keys().cloned().collect()
    }

    /// Removes expired records. No persistence call is made: the map store
    /// keeps its copy until the next explicit write.
    pub fn expire_entries(&mut self, now: Instant) -> usize {
        let max_idle = self.config.max_idle();
        let expired: Vec<K> = self
            .records
            .iter()
            .filter(|(_, record)| record.is_expired(now, max_idle))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.records.remove(key);
        }
        let count = expired.len();
        if count > 0 {
            tracing::debug!(
                "Map {} partition {}: expired {} records",
                self.name,
                self.partition,
                count
            );
            self.invalidate(expired);
        }
        count
    }

    /// Inserts loaded entries without scheduling persistence. Entries already
    /// in memory win.
    pub fn load_entries(&mut self, entries: Vec<(K, V)>) -> usize {
        let now = Instant::now();
        let ttl = self.config.ttl();
        let mut loaded = 0;
        for (key, value) in entries {
            if self.records.contains_key(&key) {
                continue;
            }
            self.records.insert(key, Record::new(value, now, ttl));
            loaded += 1;
        }
        loaded
    }

    pub fn remaining_ttl(&self, key: &K) -> Option<Duration> {
        self.records
            .get(key)
            .and_then(|record| record.remaining_ttl(Instant::now()))
    }

    pub fn apply_backup(&mut self, op: BackupOp<K, V>) {
        let now = Instant::now();
        match op {
            BackupOp::Put {
                key,
                value,
                ttl_remaining,
                pending,
            } => {
                match self.records.get_mut(&key) {
                    Some(record) => {
                        record.update(value, now, ttl_remaining);
                    }
                    None => {
                        self.records
                            .insert(key.clone(), Record::new(value, now, ttl_remaining));
                    }
                }
                self.mirror(key, pending);
            }
            BackupOp::Remove { key, pending } => {
                self.records.remove(&key);
                self.mirror(key, pending);
            }
            BackupOp::Evict { key } => {
                self.records.remove(&key);
            }
            BackupOp::EvictAll => {
                self.records.clear();
            }
            BackupOp::Clear { pending } => {
                self.records.clear();
                for (key, mirrored) in pending {
                    self.mirror(key, Some(mirrored));
                }
            }
        }
    }

    pub fn destroy(&mut self) {
        self.records.clear();
        if let Some(queue) = &self.write_behind {
            queue.clear();
        }
    }

    fn mirror(&self, key: K, pending: Option<MirroredWrite<V>>) {
        if let (Some(queue), Some(mirrored)) = (&self.write_behind, pending) {
            queue.mirror(key, mirrored);
        }
    }

    fn write_record(&mut self, key: K, value: V, now: Instant) -> Option<PendingWrite<V>> {
        let ttl = self.config.ttl();
        match self.records.get_mut(&key) {
            Some(record) => {
                record.update(value.clone(), now, ttl);
            }
            None => {
                self.records
                    .insert(key.clone(), Record::new(value.clone(), now, ttl));
            }
        }

        let pending = self.enqueue(key.clone(), WriteOp::Store(value));
        self.invalidate(vec![key]);
        pending
    }

    fn enqueue(&self, key: K, op: WriteOp<V>) -> Option<PendingWrite<V>> {
        self.write_behind.as_ref().map(|queue| queue.offer(key, op))
    }

    fn live_value(&mut self, key: &K, now: Instant) -> Option<V> {
        self.expire_if_needed(key, now);
        self.records.get(key).map(|record| record.value.clone())
    }

    fn expire_if_needed(&mut self, key: &K, now: Instant) -> bool {
        let expired = self
            .records
            .get(key)
            .map(|record| record.is_expired(now, self.config.max_idle()))
            .unwrap_or(false);
        if expired {
            self.records.remove(key);
            tracing::trace!("Map {}: {:?} expired on access", self.name, key);
            self.invalidate(vec![key.clone()]);
        }
        expired
    }

    /// Write-behind queue first, then the map store: an entry evicted while
    /// its write is still pending must not be reloaded stale.
    async fn load_through(&self, key: &K) -> Result<Option<V>, MapError> {
        if let Some(queue) = &self.write_behind {
            match queue.get(key) {
                Some(WriteOp::Store(value)) => return Ok(Some(value)),
                Some(WriteOp::Delete) => return Ok(None),
                None => {}
            }
        }

        let Some(store) = &self.map_store else {
            return Ok(None);
        };

        store.load(key).await.map_err(|source| {
            tracing::warn!("Map {}: load of {:?} failed: {}", self.name, key, source);
            MapError::Load {
                map: self.name.clone(),
                source,
            }
        })
    }

    fn invalidate(&self, keys: Vec<K>) {
        if self.backup || keys.is_empty() {
            return;
        }
        self.invalidator.invalidate(&self.name, keys);
    }
}
