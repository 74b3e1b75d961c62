//! Per-key TTL scheduling.
//!
//! One tokio task per scheduled key. Rescheduling a key aborts its previous
//! task, and a generation number stops a task that already woke up from
//! firing for a newer schedule.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

type Scheduled = (u64, JoinHandle<()>);

pub struct TtlScheduler<K> {
    entries: Arc<DashMap<K, Scheduled>>,
    generation: AtomicU64,
}

impl<K> TtlScheduler<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Runs `on_expire` for `key` after `delay`, replacing any earlier schedule.
    pub fn schedule<F>(&self, key: K, delay: Duration, on_expire: F)
    where
        F: FnOnce(&K) + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let entries = self.entries.clone();
        let task_key = key.clone();
        let spawn = move || {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let current = entries
                    .remove_if(&task_key, |_, (scheduled, _)| *scheduled == generation)
                    .is_some();
                if current {
                    on_expire(&task_key);
                }
            })
        };

        // The shard stays locked until the handle is stored, so the task
        // cannot look itself up before it is registered.
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let (_, previous) = occupied.insert((generation, spawn()));
                previous.abort();
            }
            Entry::Vacant(vacant) => {
                vacant.insert((generation, spawn()));
            }
        }
    }

    /// Returns whether a schedule existed for `key`.
    pub fn cancel(&self, key: &K) -> bool {
        match self.entries.remove(key) {
            Some((_, (_, handle))) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for entry in self.entries.iter() {
            entry.value().1.abort();
        }
        self.entries.clear();
    }

    pub fn is_scheduled(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K> Default for TtlScheduler<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
