use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds. Replicated timestamps are compared across
/// members, so they cannot come from a monotonic clock.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicatedRecord<V> {
    pub value: V,
    /// `0` means no TTL.
    pub ttl_millis: u64,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_update_time: u64,
    pub hits: u64,
}

impl<V: Clone> ReplicatedRecord<V> {
    pub fn new(value: V, ttl: Duration, now: u64) -> Self {
        Self {
            value,
            ttl_millis: ttl.as_millis() as u64,
            creation_time: now,
            last_access_time: now,
            last_update_time: now,
            hits: 0,
        }
    }

    /// Replaces the value, returning the old one.
    pub fn set_value(&mut self, value: V, ttl: Duration, now: u64) -> V {
        self.ttl_millis = ttl.as_millis() as u64;
        self.last_update_time = now;
        std::mem::replace(&mut self.value, value)
    }

    pub fn access(&mut self, now: u64) -> V {
        self.hits += 1;
        self.last_access_time = now;
        self.value.clone()
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_millis)
    }

    pub fn entry_view<K: Clone>(&self, key: &K) -> ReplicatedEntryView<K, V> {
        ReplicatedEntryView {
            key: key.clone(),
            value: self.value.clone(),
            creation_time: self.creation_time,
            last_access_time: self.last_access_time,
            last_update_time: self.last_update_time,
            hits: self.hits,
            ttl_millis: self.ttl_millis,
        }
    }
}

/// Read-only view of an entry handed to merge policies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicatedEntryView<K, V> {
    pub key: K,
    pub value: V,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_update_time: u64,
    pub hits: u64,
    pub ttl_millis: u64,
}

impl<K, V> ReplicatedEntryView<K, V> {
    /// Splits the view into its key and a record carrying its metadata.
    pub fn into_record(self) -> (K, ReplicatedRecord<V>) {
        let record = ReplicatedRecord {
            value: self.value,
            ttl_millis: self.ttl_millis,
            creation_time: self.creation_time,
            last_access_time: self.last_access_time,
            last_update_time: self.last_update_time,
            hits: self.hits,
        };
        (self.key, record)
    }
}

/// An entry as shipped between members during replication or migration.
pub type RecordMigrationInfo<K, V> = ReplicatedEntryView<K, V>;
