use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::message::{InvalidationHandler, InvalidationMessage};
use super::transport::{InvalidationTransport, NoopInvalidationTransport};
use crate::cluster::types::{Member, NodeId};

/// Turns authoritative mutations into invalidation messages for the map's
/// registered near-cache consumers.
///
/// `invalidate` is synchronous and never fails: remote delivery is handed to
/// the transport, and the local near cache (if this member is a consumer) is
/// invalidated in place.
pub struct InvalidationBroadcaster<K> {
    local: NodeId,
    consumers: DashMap<String, HashMap<NodeId, Member>>,
    transport: Arc<dyn InvalidationTransport<K>>,
    local_handler: Option<Arc<dyn InvalidationHandler<K>>>,
    messages_sent: AtomicU64,
}

impl<K: Clone + Send + Sync + 'static> InvalidationBroadcaster<K> {
    pub fn new(local: NodeId, transport: Arc<dyn InvalidationTransport<K>>) -> Self {
        Self {
            local,
            consumers: DashMap::new(),
            transport,
            local_handler: None,
            messages_sent: AtomicU64::new(0),
        }
    }

    /// A broadcaster that never sends anything. For members without near caches.
    pub fn disabled(local: NodeId) -> Arc<Self> {
        Arc::new(Self::new(local, Arc::new(NoopInvalidationTransport)))
    }

    pub fn with_local_handler(mut self, handler: Arc<dyn InvalidationHandler<K>>) -> Self {
        self.local_handler = Some(handler);
        self
    }

    pub fn register_consumer(&self, map_name: &str, member: Member) {
        tracing::debug!("Member {} consumes invalidations for map {}", member.id, map_name);
        self.consumers
            .entry(map_name.to_string())
            .or_default()
            .insert(member.id.clone(), member);
    }

    pub fn deregister_consumer(&self, map_name: &str, node: &NodeId) {
        if let Some(mut consumers) = self.consumers.get_mut(map_name) {
            consumers.remove(node);
        }
        self.consumers
            .remove_if(map_name, |_, consumers| consumers.is_empty());
    }

    /// Forgets a departed member for every map.
    pub fn remove_member(&self, node: &NodeId) {
        for mut consumers in self.consumers.iter_mut() {
            consumers.remove(node);
        }
        self.consumers.retain(|_, consumers| !consumers.is_empty());
    }

    pub fn has_consumers(&self, map_name: &str) -> bool {
        self.consumers
            .get(map_name)
            .map(|consumers| !consumers.is_empty())
            .unwrap_or(false)
    }

    pub fn consumers(&self, map_name: &str) -> Vec<Member> {
        let mut members: Vec<Member> = self
            .consumers
            .get(map_name)
            .map(|consumers| consumers.values().cloned().collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members
    }

    /// Datagrams handed to the transport so far.
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn invalidate(&self, map_name: &str, keys: Vec<K>) {
        if keys.is_empty() {
            return;
        }
        let targets = self.consumers(map_name);
        if targets.is_empty() {
            return;
        }

        let message = InvalidationMessage::new(map_name, keys, self.local.clone());
        for target in targets {
            if target.id == self.local {
                if let Some(handler) = &self.local_handler {
                    handler.handle_invalidation(&message);
                }
                continue;
            }

            self.transport.send(&target, message.clone());
            self.messages_sent.fetch_add(1, Ordering::Relaxed);
        }

        tracing::trace!(
            "Invalidated {} keys of map {}",
            message.keys.len(),
            map_name
        );
    }
}
