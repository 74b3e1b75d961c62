//! Store Worker
//!
//! One background task per map per member. It sleeps until the earliest due
//! write across the map's primary partition queues (or until woken by a new
//! write or a promotion), then persists everything due.
//!
//! ## Responsibilities
//! - **Draining**: Groups due entries into `store_all`/`delete_all` batches.
//! - **Isolation**: A failing store call is logged and dropped; it never reaches
//!   the mutation path and never leaves a queue half-updated.
//! - **Flushing**: `flush` drains every pending entry regardless of due time.
//! - **Backup hygiene**: Backup queues are pruned, never drained.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::map_store::MapStore;
use super::record::{MapKey, MapValue};
use super::write_behind::{BACKUP_PRUNE_GRACE, PendingWrite, WriteBehindQueue, WriteOp};
use crate::error::MapError;

type DrainedEntry<K, V> = (Arc<WriteBehindQueue<K, V>>, K, PendingWrite<V>);

pub struct StoreWorker<K: MapKey, V: MapValue> {
    map_name: String,
    store: Arc<dyn MapStore<K, V>>,
    batch_size: usize,
    queues: DashMap<u32, Arc<WriteBehindQueue<K, V>>>,
    wakeup: Notify,
    drain_lock: tokio::sync::Mutex<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<K: MapKey, V: MapValue> StoreWorker<K, V> {
    pub fn new(map_name: &str, store: Arc<dyn MapStore<K, V>>, batch_size: usize) -> Arc<Self> {
        Arc::new(Self {
            map_name: map_name.to_string(),
            store,
            batch_size: batch_size.max(1),
            queues: DashMap::new(),
            wakeup: Notify::new(),
            drain_lock: tokio::sync::Mutex::new(()),
            handle: Mutex::new(None),
        })
    }

    /// Spawns the drain loop. Calling it twice keeps the first loop.
    pub fn start(self: &Arc<Self>) {
        let mut handle = match self.handle.lock() {
            Ok(handle) => handle,
            Err(poisoned) => poisoned.into_inner(),
        };
        if handle.is_some() {
            return;
        }

        let worker = self.clone();
        *handle = Some(tokio::spawn(async move {
            worker.run().await;
        }));
        tracing::debug!("Store worker started for map {}", self.map_name);
    }

    /// Stops scheduling drains. Pending entries stay where they are.
    pub fn stop(&self) {
        let handle = match self.handle.lock() {
            Ok(mut handle) => handle.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
            tracing::debug!("Store worker stopped for map {}", self.map_name);
        }
    }

    pub fn register_queue(&self, queue: Arc<WriteBehindQueue<K, V>>) {
        self.queues.insert(queue.partition(), queue);
        self.wake();
    }

    pub fn remove_queue(&self, partition: u32) -> Option<Arc<WriteBehindQueue<K, V>>> {
        self.queues.remove(&partition).map(|(_, queue)| queue)
    }

    pub fn wake(&self) {
        self.wakeup.notify_one();
    }

    /// Number of writes waiting on primary queues.
    pub fn pending_count(&self) -> usize {
        self.queues
            .iter()
            .filter(|queue| !queue.is_backup())
            .map(|queue| queue.len())
            .sum()
    }

    async fn run(self: Arc<Self>) {
        loop {
            match self.next_wakeup() {
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = self.wakeup.notified() => {}
                    }
                }
                None => self.wakeup.notified().await,
            }

            let now = Instant::now();
            let failed = self.drain_due(now).await;
            if failed > 0 {
                tracing::warn!(
                    "Map {}: {} pending writes could not be persisted",
                    self.map_name,
                    failed
                );
            }
            self.prune_backups(now);
        }
    }

    fn next_wakeup(&self) -> Option<Instant> {
        self.queues
            .iter()
            .filter_map(|queue| {
                let due = queue.next_due()?;
                if queue.is_backup() {
                    Some(due + queue.write_delay() + BACKUP_PRUNE_GRACE)
                } else {
                    Some(due)
                }
            })
            .min()
    }

    fn prune_backups(&self, now: Instant) {
        for queue in self.queues.iter().filter(|queue| queue.is_backup()) {
            let pruned = queue.prune_persisted(now);
            if pruned > 0 {
                tracing::trace!(
                    "Map {} partition {}: pruned {} backup entries",
                    self.map_name,
                    queue.partition(),
                    pruned
                );
            }
        }
    }

    /// Persists every primary entry due at `now`. Returns the failure count.
    pub async fn drain_due(&self, now: Instant) -> usize {
        let _guard = self.drain_lock.lock().await;
        let due = self.collect(|queue| queue.due_entries(now));
        if due.is_empty() {
            return 0;
        }
        self.persist(due).await
    }

    /// Blocks until every write pending at call time has reached the store.
    pub async fn flush(&self) -> Result<(), MapError> {
        let _guard = self.drain_lock.lock().await;
        let pending = self.collect(|queue| queue.all_entries());
        let total = pending.len();
        let failed = self.persist(pending).await;

        tracing::debug!(
            "Flushed map {}: {} writes, {} failed",
            self.map_name,
            total,
            failed
        );

        if failed > 0 {
            return Err(MapError::Persistence {
                map: self.map_name.clone(),
                failed,
            });
        }
        Ok(())
    }

    fn collect<F>(&self, select: F) -> Vec<DrainedEntry<K, V>>
    where
        F: Fn(&WriteBehindQueue<K, V>) -> Vec<(K, PendingWrite<V>)>,
    {
        let mut drained = Vec::new();
        for entry in self.queues.iter() {
            let queue = entry.value();
            if queue.is_backup() {
                continue;
            }
            for (key, pending) in select(queue.as_ref()) {
                drained.push((queue.clone(), key, pending));
            }
        }
        drained
    }

    async fn persist(&self, entries: Vec<DrainedEntry<K, V>>) -> usize {
        let (stores, deletes): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|(_, _, pending)| matches!(pending.op, WriteOp::Store(_)));

        let mut failed = 0;
        for chunk in stores.chunks(self.batch_size) {
            failed += self.store_chunk(chunk).await;
        }
        for chunk in deletes.chunks(self.batch_size) {
            failed += self.delete_chunk(chunk).await;
        }
        failed
    }

    async fn store_chunk(&self, chunk: &[DrainedEntry<K, V>]) -> usize {
        let entries: Vec<(K, V)> = chunk
            .iter()
            .filter_map(|(_, key, pending)| match &pending.op {
                WriteOp::Store(value) => Some((key.clone(), value.clone())),
                WriteOp::Delete => None,
            })
            .collect();

        let result = if entries.len() == 1 {
            self.store.store(&entries[0].0, &entries[0].1).await
        } else {
            self.store.store_all(&entries).await
        };

        let failed = match result {
            Ok(()) => 0,
            Err(e) if entries.len() > 1 => {
                tracing::warn!(
                    "Map {}: store_all of {} entries failed ({}), retrying one by one",
                    self.map_name,
                    entries.len(),
                    e
                );
                let mut failed = 0;
                for (key, value) in &entries {
                    if let Err(e) = self.store.store(key, value).await {
                        tracing::error!("Map {}: store of {:?} failed: {}", self.map_name, key, e);
                        failed += 1;
                    }
                }
                failed
            }
            Err(e) => {
                tracing::error!(
                    "Map {}: store of {:?} failed: {}",
                    self.map_name,
                    entries[0].0,
                    e
                );
                1
            }
        };

        Self::complete(chunk);
        failed
    }

    async fn delete_chunk(&self, chunk: &[DrainedEntry<K, V>]) -> usize {
        let keys: Vec<K> = chunk.iter().map(|(_, key, _)| key.clone()).collect();

        let result = if keys.len() == 1 {
            self.store.delete(&keys[0]).await
        } else {
            self.store.delete_all(&keys).await
        };

        let failed = match result {
            Ok(()) => 0,
            Err(e) if keys.len() > 1 => {
                tracing::warn!(
                    "Map {}: delete_all of {} keys failed ({}), retrying one by one",
                    self.map_name,
                    keys.len(),
                    e
                );
                let mut failed = 0;
                for key in &keys {
                    if let Err(e) = self.store.delete(key).await {
                        tracing::error!("Map {}: delete of {:?} failed: {}", self.map_name, key, e);
                        failed += 1;
                    }
                }
                failed
            }
            Err(e) => {
                tracing::error!("Map {}: delete of {:?} failed: {}", self.map_name, keys[0], e);
                1
            }
        };

        Self::complete(chunk);
        failed
    }

    // Failed entries are dropped too: retrying is the store's business.
    fn complete(chunk: &[DrainedEntry<K, V>]) {
        for (queue, key, pending) in chunk {
            if !queue.complete(key, pending.sequence) {
                tracing::trace!("{:?} changed while being persisted, kept for next drain", key);
            }
        }
    }
}
