//! Write-Behind Queue
//!
//! Buffers persistence intentions for one partition of one map. There is at
//! most one `PendingWrite` per key: a newer operation replaces the payload
//! but keeps the earliest due instant, so a key that keeps changing is still
//! persisted no later than `write_delay` after its first unpersisted change.
//!
//! The owning partition produces (`offer`), the map's `StoreWorker` consumes
//! (`due_entries` + `complete`). `complete` only removes an entry whose
//! sequence is unchanged, so a write that races a drain is kept for the next one.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use super::record::{MapKey, MapValue};

/// Extra time a backup keeps a mirrored entry past its due instant before
/// assuming the primary persisted it.
pub const BACKUP_PRUNE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp<V> {
    Store(V),
    /// Delete-behind tombstone.
    Delete,
}

#[derive(Debug, Clone)]
pub struct PendingWrite<V> {
    pub op: WriteOp<V>,
    pub enqueued_at: Instant,
    pub due_at: Instant,
    pub sequence: u64,
}

/// A pending write as shipped to a backup: due time is relative so it
/// survives crossing to another member's clock.
#[derive(Debug, Clone)]
pub struct MirroredWrite<V> {
    pub op: WriteOp<V>,
    pub remaining: Duration,
    pub sequence: u64,
}

impl<V: Clone> PendingWrite<V> {
    pub fn mirror(&self, now: Instant) -> MirroredWrite<V> {
        MirroredWrite {
            op: self.op.clone(),
            remaining: self.due_at.saturating_duration_since(now),
            sequence: self.sequence,
        }
    }
}

pub struct WriteBehindQueue<K, V> {
    partition: u32,
    write_delay: Duration,
    pending: DashMap<K, PendingWrite<V>>,
    sequence: AtomicU64,
    backup: AtomicBool,
}

impl<K: MapKey, V: MapValue> WriteBehindQueue<K, V> {
    pub fn new(partition: u32, write_delay: Duration, backup: bool) -> Self {
        Self {
            partition,
            write_delay,
            pending: DashMap::new(),
            sequence: AtomicU64::new(0),
            backup: AtomicBool::new(backup),
        }
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn write_delay(&self) -> Duration {
        self.write_delay
    }

    /// Records the latest intention for `key`, coalescing with any pending one.
    pub fn offer(&self, key: K, op: WriteOp<V>) -> PendingWrite<V> {
        let now = Instant::now();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        match self.pending.entry(key) {
            Entry::Occupied(mut occupied) => {
                let pending = occupied.get_mut();
                pending.op = op;
                pending.enqueued_at = now;
                pending.sequence = sequence;
                pending.clone()
            }
            Entry::Vacant(vacant) => vacant
                .insert(PendingWrite {
                    op,
                    enqueued_at: now,
                    due_at: now + self.write_delay,
                    sequence,
                })
                .clone(),
        }
    }

    /// Applies a write mirrored from the primary. Older sequences are ignored.
    ///
    /// The primary's due instant wins: an entry the primary already drained
    /// may still sit here, and its stale due time must not carry over.
    pub fn mirror(&self, key: K, mirrored: MirroredWrite<V>) {
        let now = Instant::now();
        self.sequence.fetch_max(mirrored.sequence, Ordering::SeqCst);

        match self.pending.entry(key) {
            Entry::Occupied(mut occupied) => {
                let pending = occupied.get_mut();
                if pending.sequence >= mirrored.sequence {
                    return;
                }
                pending.op = mirrored.op;
                pending.enqueued_at = now;
                pending.sequence = mirrored.sequence;
                pending.due_at = now + mirrored.remaining;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingWrite {
                    op: mirrored.op,
                    enqueued_at: now,
                    due_at: now + mirrored.remaining,
                    sequence: mirrored.sequence,
                });
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<WriteOp<V>> {
        self.pending.get(key).map(|pending| pending.op.clone())
    }

    pub fn get_pending(&self, key: &K) -> Option<PendingWrite<V>> {
        self.pending.get(key).map(|pending| pending.clone())
    }

    /// Entries whose due instant has passed, oldest intention first.
    pub fn due_entries(&self, now: Instant) -> Vec<(K, PendingWrite<V>)> {
        let mut due: Vec<(K, PendingWrite<V>)> = self
            .pending
            .iter()
            .filter(|entry| entry.value().due_at <= now)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        due.sort_by_key(|(_, pending)| pending.sequence);
        due
    }

    pub fn all_entries(&self) -> Vec<(K, PendingWrite<V>)> {
        let mut all: Vec<(K, PendingWrite<V>)> = self
            .pending
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        all.sort_by_key(|(_, pending)| pending.sequence);
        all
    }

    /// Drops the entry for `key` if nothing replaced it since it was drained.
    pub fn complete(&self, key: &K, sequence: u64) -> bool {
        self.pending
            .remove_if(key, |_, pending| pending.sequence == sequence)
            .is_some()
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.pending.iter().map(|entry| entry.value().due_at).min()
    }

    /// Backup side: forget entries the primary must have persisted by now.
    pub fn prune_persisted(&self, now: Instant) -> usize {
        let before = self.pending.len();
        let grace = self.write_delay + BACKUP_PRUNE_GRACE;
        self.pending.retain(|_, pending| pending.due_at + grace > now);
        before - self.pending.len()
    }

    pub fn is_backup(&self) -> bool {
        self.backup.load(Ordering::SeqCst)
    }

    /// Turns a backup queue into a draining one. Due instants are kept.
    pub fn promote(&self) {
        self.backup.store(false, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&self) {
        self.pending.clear();
    }
}
