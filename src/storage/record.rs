use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

/// Bounds every map key satisfies.
pub trait MapKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> MapKey for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Bounds every map value satisfies.
pub trait MapValue: Clone + Debug + Send + Sync + 'static {}

impl<T> MapValue for T where T: Clone + Debug + Send + Sync + 'static {}

/// An authoritative entry inside one partition's record store.
#[derive(Debug, Clone)]
pub struct Record<V> {
    pub value: V,
    pub creation_time: Instant,
    pub last_access_time: Instant,
    pub last_update_time: Instant,
    /// Absolute expiry instant derived from the map's TTL.
    pub ttl_expiry: Option<Instant>,
    pub hits: u64,
}

impl<V> Record<V> {
    pub fn new(value: V, now: Instant, ttl: Option<Duration>) -> Self {
        Self {
            value,
            creation_time: now,
            last_access_time: now,
            last_update_time: now,
            ttl_expiry: ttl.map(|ttl| now + ttl),
            hits: 0,
        }
    }

    pub fn update(&mut self, value: V, now: Instant, ttl: Option<Duration>) -> V {
        self.last_update_time = now;
        self.last_access_time = now;
        self.ttl_expiry = ttl.map(|ttl| now + ttl);
        std::mem::replace(&mut self.value, value)
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_access_time = now;
        self.hits += 1;
    }

    pub fn is_expired(&self, now: Instant, max_idle: Option<Duration>) -> bool {
        if let Some(expiry) = self.ttl_expiry
            && now >= expiry
        {
            return true;
        }
        if let Some(max_idle) = max_idle
            && now.duration_since(self.last_access_time) >= max_idle
        {
            return true;
        }
        false
    }

    /// Time left before TTL expiry, used when mirroring to backups.
    pub fn remaining_ttl(&self, now: Instant) -> Option<Duration> {
        self.ttl_expiry
            .map(|expiry| expiry.saturating_duration_since(now))
    }
}
