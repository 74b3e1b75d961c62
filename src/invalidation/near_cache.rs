use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::message::{InvalidationHandler, InvalidationMessage};

enum Slot<V> {
    /// A read is loading the value; only that reservation may fill the slot.
    Reserved(u64),
    Cached(V),
}

/// A member-local read cache for one map.
///
/// Fills go through a reservation taken before the authoritative read. An
/// invalidation drops the reservation with the entry, so a value read before
/// a concurrent mutation is never published after its invalidation.
pub struct NearCache<K, V> {
    name: String,
    enabled: bool,
    entries: DashMap<K, Slot<V>>,
    next_reservation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K: Eq + Hash + Clone, V: Clone> NearCache<K, V> {
    pub fn new(name: &str, enabled: bool) -> Self {
        Self {
            name: name.to_string(),
            enabled,
            entries: DashMap::new(),
            next_reservation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn get(&self, key: &K) -> Option<V> {
        if !self.enabled {
            return None;
        }
        let cached = self.entries.get(key).and_then(|slot| match slot.value() {
            Slot::Cached(value) => Some(value.clone()),
            Slot::Reserved(_) => None,
        });
        match cached {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Unconditional fill, for values known to be current.
    pub fn put(&self, key: K, value: V) {
        if self.enabled {
            self.entries.insert(key, Slot::Cached(value));
        }
    }

    /// Claims the right to fill `key`. A later reservation supersedes this one.
    pub fn try_reserve(&self, key: &K) -> Option<u64> {
        if !self.enabled {
            return None;
        }
        let reservation = self.next_reservation.fetch_add(1, Ordering::SeqCst) + 1;
        match self.entries.entry(key.clone()) {
            Entry::Occupied(occupied) if matches!(occupied.get(), Slot::Cached(_)) => None,
            Entry::Occupied(mut occupied) => {
                occupied.insert(Slot::Reserved(reservation));
                Some(reservation)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Reserved(reservation));
                Some(reservation)
            }
        }
    }

    /// Fills `key` if `reservation` still holds it. Returns whether it did.
    pub fn try_publish(&self, key: K, reservation: u64, value: V) -> bool {
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied)
                if matches!(occupied.get(), Slot::Reserved(id) if *id == reservation) =>
            {
                occupied.insert(Slot::Cached(value));
                true
            }
            _ => false,
        }
    }

    /// Gives up a reservation without filling.
    pub fn release(&self, key: &K, reservation: u64) {
        self.entries
            .remove_if(key, |_, slot| matches!(slot, Slot::Reserved(id) if *id == reservation));
    }

    pub fn invalidate(&self, keys: &[K]) -> usize {
        keys.iter()
            .filter(|key| matches!(self.entries.remove(*key), Some((_, Slot::Cached(_)))))
            .count()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Cached values, reservations excluded.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Cached(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

impl<K, V> InvalidationHandler<K> for NearCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn handle_invalidation(&self, message: &InvalidationMessage<K>) {
        if !self.enabled {
            tracing::warn!(
                "Invalidation for map {} accepted while its near cache is disabled. \
                 Possible configuration conflict among nodes",
                self.name
            );
            return;
        }
        let removed = self.invalidate(&message.keys);
        tracing::trace!(
            "Near cache {}: {} of {} keys invalidated (from {})",
            self.name,
            removed,
            message.keys.len(),
            message.source
        );
    }
}

/// All near caches of one member, keyed by map name.
pub struct NearCacheRegistry<K, V> {
    caches: DashMap<String, Arc<NearCache<K, V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> NearCacheRegistry<K, V> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            caches: DashMap::new(),
        })
    }

    pub fn get_or_create(&self, map_name: &str, enabled: bool) -> Arc<NearCache<K, V>> {
        self.caches
            .entry(map_name.to_string())
            .or_insert_with(|| Arc::new(NearCache::new(map_name, enabled)))
            .clone()
    }

    pub fn get(&self, map_name: &str) -> Option<Arc<NearCache<K, V>>> {
        self.caches.get(map_name).map(|cache| cache.clone())
    }

    pub fn remove(&self, map_name: &str) {
        self.caches.remove(map_name);
    }
}

impl<K, V> InvalidationHandler<K> for NearCacheRegistry<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn handle_invalidation(&self, message: &InvalidationMessage<K>) {
        match self.get(&message.map_name) {
            Some(cache) => cache.handle_invalidation(message),
            None => tracing::warn!(
                "Invalidation for map {} received but no near cache exists here. \
                 Possible configuration conflict among nodes",
                message.map_name
            ),
        }
    }
}
