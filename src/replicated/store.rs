use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::cmp::Ordering as CmpOrdering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use super::merge::MergePolicy;
use super::record::{RecordMigrationInfo, ReplicatedEntryView, ReplicatedRecord, now_millis};
use crate::scheduler::TtlScheduler;
use crate::storage::record::{MapKey, MapValue};

/// What a member should do after comparing its version with a peer's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    UpToDate,
    FullResync,
}

/// Full copy of one replicated map on one member.
///
/// Every mutation goes through the `DashMap` entry API, so two operations on
/// the same key never interleave on this member.
pub struct ReplicatedRecordStore<K, V> {
    name: String,
    storage: Arc<DashMap<K, ReplicatedRecord<V>>>,
    version: AtomicU64,
    loaded: AtomicBool,
    ttl: TtlScheduler<K>,
    merge_policy: Arc<dyn MergePolicy<K, V>>,
}

impl<K, V> ReplicatedRecordStore<K, V>
where
    K: MapKey,
    V: MapValue + PartialEq,
{
    pub fn new(name: &str, merge_policy: Arc<dyn MergePolicy<K, V>>) -> Self {
        Self {
            name: name.to_string(),
            storage: Arc::new(DashMap::new()),
            version: AtomicU64::new(0),
            loaded: AtomicBool::new(false),
            ttl: TtlScheduler::new(),
            merge_policy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn put(&self, key: K, value: V) -> Option<V> {
        self.put_with_ttl(key, value, Duration::ZERO, true)
    }

    /// Stores `value`; a zero `ttl` keeps the entry until removed.
    pub fn put_with_ttl(&self, key: K, value: V, ttl: Duration, increment_hits: bool) -> Option<V> {
        let now = now_millis();
        let previous = match self.storage.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                let previous = record.set_value(value, ttl, now);
                if increment_hits {
                    record.hits += 1;
                }
                self.arm_expiry(&key, record);
                Some(previous)
            }
            Entry::Vacant(vacant) => {
                let mut record = ReplicatedRecord::new(value, ttl, now);
                if increment_hits {
                    record.hits += 1;
                }
                self.arm_expiry(&key, &record);
                vacant.insert(record);
                None
            }
        };

        self.increment_version();
        previous
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.storage
            .get_mut(key)
            .map(|mut record| record.access(now_millis()))
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.ttl.cancel(key);
        let removed = self.storage.remove(key).map(|(_, record)| record.value);
        if removed.is_some() {
            self.increment_version();
        }
        removed
    }

    /// Drops the local copy without counting as a structural change.
    pub fn evict(&self, key: &K) -> bool {
        self.ttl.cancel(key);
        self.storage.remove(key).is_some()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.storage.contains_key(key)
    }

    pub fn contains_value(&self, value: &V) -> bool {
        self.storage.iter().any(|record| &record.value == value)
    }

    pub fn get_replicated_record(&self, key: &K) -> Option<ReplicatedRecord<V>> {
        self.storage.get(key).map(|record| record.clone())
    }

    pub fn key_set(&self) -> Vec<K> {
        self.storage.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn values(&self) -> Vec<V> {
        self.storage
            .iter()
            .map(|entry| entry.value().value.clone())
            .collect()
    }

    pub fn values_sorted<F>(&self, mut compare: F) -> Vec<V>
    where
        F: FnMut(&V, &V) -> CmpOrdering,
    {
        let mut values = self.values();
        values.sort_by(|a, b| compare(a, b));
        values
    }

    pub fn entry_set(&self) -> Vec<(K, V)> {
        self.storage
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().value.clone()))
            .collect()
    }

    pub fn size(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn clear(&self) {
        self.ttl.cancel_all();
        self.storage.clear();
        self.increment_version();
    }

    /// Back to a fresh, not-yet-loaded copy at version zero.
    pub fn reset(&self) {
        self.ttl.cancel_all();
        self.storage.clear();
        self.version.store(0, Ordering::SeqCst);
        self.loaded.store(false, Ordering::SeqCst);
    }

    pub fn destroy(&self) {
        self.reset();
        tracing::debug!("Replicated map {} destroyed", self.name);
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn set_version(&self, version: u64) {
        self.version.store(version, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<(K, ReplicatedRecord<V>)> {
        self.storage
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Applies a record shipped by a peer through the configured merge policy.
    pub fn put_record(&self, record: RecordMigrationInfo<K, V>) -> bool {
        let policy = self.merge_policy.clone();
        self.merge(record, policy.as_ref())
    }

    pub fn cancel_ttl_entry(&self, key: &K) -> bool {
        self.ttl.cancel(key)
    }

    /// Evicts `key` after `delay` unless it is rewritten first. Expiry
    /// leaves the version untouched. Returns false when `key` is absent.
    pub fn schedule_ttl_entry(&self, delay: Duration, key: K) -> bool {
        match self.storage.get(&key) {
            Some(record) => {
                self.schedule_expiry(key.clone(), delay, &record);
                true
            }
            None => false,
        }
    }

    /// Must run while the caller still holds the entry for `key`, so a
    /// rewrite cannot slip between the record update and its schedule.
    fn arm_expiry(&self, key: &K, record: &ReplicatedRecord<V>) {
        if record.ttl_millis == 0 {
            self.ttl.cancel(key);
        } else {
            self.schedule_expiry(key.clone(), record.ttl(), record);
        }
    }

    fn schedule_expiry(&self, key: K, delay: Duration, record: &ReplicatedRecord<V>) {
        let storage = self.storage.clone();
        let name = self.name.clone();
        let (updated_at, ttl_millis) = (record.last_update_time, record.ttl_millis);
        self.ttl.schedule(key, delay, move |key| {
            // A timer that fired late must not remove a newer write.
            let expired = storage
                .remove_if(key, |_, current| {
                    current.last_update_time == updated_at && current.ttl_millis == ttl_millis
                })
                .is_some();
            if expired {
                tracing::trace!("Replicated map {}: {:?} expired", name, key);
            }
        });
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn set_loaded(&self, loaded: bool) {
        self.loaded.store(loaded, Ordering::SeqCst);
    }

    /// Reconciles `merging` with the local entry. Returns whether the local
    /// copy changed. An absent key simply takes the incoming entry.
    pub fn merge(&self, merging: ReplicatedEntryView<K, V>, policy: &dyn MergePolicy<K, V>) -> bool {
        let key = merging.key.clone();

        let changed = match self.storage.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                let (_, record) = merging.into_record();
                self.arm_expiry(&key, &record);
                vacant.insert(record);
                true
            }
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get().entry_view(&key);
                let winner = policy.merge(&self.name, &merging, &existing);

                if winner == existing.value {
                    false
                } else if winner == merging.value {
                    let (_, record) = merging.into_record();
                    self.arm_expiry(&key, &record);
                    occupied.insert(record);
                    true
                } else {
                    let record = occupied.get_mut();
                    let ttl = record.ttl();
                    record.set_value(winner, ttl, now_millis());
                    self.arm_expiry(&key, record);
                    true
                }
            }
        };

        if changed {
            self.increment_version();
        }
        changed
    }

    /// Order-independent fingerprint of the copy's keys and write metadata.
    ///
    /// Replicas share a record's metadata when it travels through
    /// `PUT_RECORD` or a snapshot, so equal copies yield equal digests.
    /// Hits and access times are local and left out.
    pub fn digest(&self) -> u64 {
        self.storage.iter().fold(0u64, |digest, entry| {
            let mut hasher = DefaultHasher::new();
            entry.key().hash(&mut hasher);
            let record = entry.value();
            record.creation_time.hash(&mut hasher);
            record.last_update_time.hash(&mut hasher);
            record.ttl_millis.hash(&mut hasher);
            digest.wrapping_add(hasher.finish())
        })
    }

    /// A copy behind its peer cannot catch up incrementally. Copies at the
    /// same version with different contents have diverged; the one with the
    /// lower digest pulls so both sides end up equal instead of swapping.
    pub fn sync_decision(&self, peer_version: u64, peer_digest: u64) -> SyncDecision {
        let version = self.version();
        if peer_version > version {
            return SyncDecision::FullResync;
        }
        if peer_version == version && peer_digest > self.digest() {
            return SyncDecision::FullResync;
        }
        SyncDecision::UpToDate
    }

    pub fn snapshot(&self) -> (u64, Vec<RecordMigrationInfo<K, V>>) {
        let version = self.version();
        let records = self
            .storage
            .iter()
            .map(|entry| entry.value().entry_view(entry.key()))
            .collect();
        (version, records)
    }

    /// Replaces the whole copy with a peer's snapshot.
    pub fn apply_snapshot(&self, version: u64, records: Vec<RecordMigrationInfo<K, V>>) {
        self.ttl.cancel_all();
        self.storage.clear();
        for view in records {
            let (key, record) = view.into_record();
            if let Entry::Vacant(vacant) = self.storage.entry(key.clone()) {
                if record.ttl_millis != 0 {
                    self.schedule_expiry(key, record.ttl(), &record);
                }
                vacant.insert(record);
            }
        }
        self.version.store(version, Ordering::SeqCst);
        self.loaded.store(true, Ordering::SeqCst);

        tracing::info!(
            "Replicated map {} resynchronized to version {} ({} entries)",
            self.name,
            version,
            self.storage.len()
        );
    }

    fn increment_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }
}
