//! Backup Replication
//!
//! Primaries push every mutation to the partition's backups before the
//! operation returns. Pending writes travel with it so a promoted backup can
//! finish persisting them on the original schedule.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::record::{MapKey, MapValue};
use super::service::MapService;
use super::write_behind::MirroredWrite;
use crate::cluster::types::NodeId;

/// A mutation as applied on a backup replica.
#[derive(Debug, Clone)]
pub enum BackupOp<K, V> {
    Put {
        key: K,
        value: V,
        ttl_remaining: Option<Duration>,
        pending: Option<MirroredWrite<V>>,
    },
    Remove {
        key: K,
        pending: Option<MirroredWrite<V>>,
    },
    Evict {
        key: K,
    },
    /// Drops every record but keeps mirrored pending writes.
    EvictAll,
    Clear {
        pending: Vec<(K, MirroredWrite<V>)>,
    },
}

#[async_trait]
pub trait BackupTransport<K: MapKey, V: MapValue>: Send + Sync {
    async fn send_backup(
        &self,
        target: &NodeId,
        map_name: &str,
        partition: u32,
        op: BackupOp<K, V>,
    ) -> anyhow::Result<()>;
}

/// Delivers backups to `MapService` instances living in the same process.
///
/// Members are held weakly so a dropped service looks like a crashed member.
pub struct LocalBackupTransport<K: MapKey, V: MapValue> {
    peers: DashMap<NodeId, Weak<MapService<K, V>>>,
}

impl<K: MapKey, V: MapValue> LocalBackupTransport<K, V> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            peers: DashMap::new(),
        })
    }

    pub fn register(&self, service: &Arc<MapService<K, V>>) {
        self.peers
            .insert(service.local_node().clone(), Arc::downgrade(service));
    }

    pub fn unregister(&self, node: &NodeId) {
        self.peers.remove(node);
    }
}

#[async_trait]
impl<K: MapKey, V: MapValue> BackupTransport<K, V> for LocalBackupTransport<K, V> {
    async fn send_backup(
        &self,
        target: &NodeId,
        map_name: &str,
        partition: u32,
        op: BackupOp<K, V>,
    ) -> anyhow::Result<()> {
        let peer = self
            .peers
            .get(target)
            .and_then(|peer| peer.upgrade())
            .ok_or_else(|| anyhow::anyhow!("Backup member {} not reachable", target))?;

        peer.apply_backup(map_name, partition, op).await?;
        Ok(())
    }
}

/// Transport for single-member clusters: there is never a backup to reach.
pub struct NoBackups;

#[async_trait]
impl<K: MapKey, V: MapValue> BackupTransport<K, V> for NoBackups {
    async fn send_backup(
        &self,
        target: &NodeId,
        _map_name: &str,
        _partition: u32,
        _op: BackupOp<K, V>,
    ) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("No backup transport configured for {}", target))
    }
}
