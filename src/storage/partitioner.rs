use crate::cluster::types::{Member, NodeId};
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Partition placement shared by every member.
///
/// Replica index 0 is the primary owner, the rest are backups in promotion
/// order. Lite members never appear in a replica list.
pub struct PartitionTable {
    num_partitions: u32,
    replicas: DashMap<u32, Vec<NodeId>>,
}

impl PartitionTable {
    pub fn new(num_partitions: u32) -> Arc<Self> {
        Arc::new(Self {
            num_partitions: num_partitions.max(1),
            replicas: DashMap::new(),
        })
    }

    /// Builds a table and assigns it in one step.
    pub fn with_members(num_partitions: u32, members: &[Member], replica_count: usize) -> Arc<Self> {
        let table = Self::new(num_partitions);
        table.assign(members, replica_count);
        table
    }

    pub fn partition_count(&self) -> u32 {
        self.num_partitions
    }

    pub fn get_partition<K: Hash + ?Sized>(&self, key: &K) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let hash = hasher.finish() as u32;
        hash % self.num_partitions
    }

    /// Spreads partitions over the data members, sorted by id, so that every
    /// member computing the table from the same membership agrees on it.
    pub fn assign(&self, members: &[Member], replica_count: usize) {
        let mut node_ids: Vec<NodeId> = members
            .iter()
            .filter(|member| member.is_data_member())
            .map(|member| member.id.clone())
            .collect();
        node_ids.sort();
        node_ids.dedup();

        self.replicas.clear();
        if node_ids.is_empty() {
            tracing::warn!("No data members, partition table left empty");
            return;
        }

        let replica_count = replica_count.clamp(1, node_ids.len());
        for partition in 0..self.num_partitions {
            let owners = (0..replica_count)
                .map(|offset| node_ids[(partition as usize + offset) % node_ids.len()].clone())
                .collect();
            self.replicas.insert(partition, owners);
        }

        tracing::info!(
            "Assigned {} partitions over {} data members ({} replicas each)",
            self.num_partitions,
            node_ids.len(),
            replica_count
        );
    }

    pub fn get_owners(&self, partition: u32) -> Vec<NodeId> {
        self.replicas
            .get(&partition)
            .map(|owners| owners.clone())
            .unwrap_or_default()
    }

    pub fn primary(&self, partition: u32) -> Option<NodeId> {
        self.replicas
            .get(&partition)
            .and_then(|owners| owners.first().cloned())
    }

    pub fn backups(&self, partition: u32) -> Vec<NodeId> {
        self.get_owners(partition).into_iter().skip(1).collect()
    }

    pub fn is_primary(&self, partition: u32, node: &NodeId) -> bool {
        self.primary(partition).as_ref() == Some(node)
    }

    /// Drops a failed member from every replica list. The next replica in line
    /// becomes primary. Returns the partitions whose primary changed.
    pub fn remove_member(&self, node: &NodeId) -> Vec<u32> {
        let mut promoted = Vec::new();
        for mut entry in self.replicas.iter_mut() {
            let partition = *entry.key();
            let owners = entry.value_mut();
            if let Some(idx) = owners.iter().position(|owner| owner == node) {
                owners.remove(idx);
                if idx == 0 {
                    promoted.push(partition);
                }
            }
        }
        promoted.sort_unstable();

        if !promoted.is_empty() {
            tracing::info!(
                "Member {} removed from partition table, {} partitions changed primary",
                node,
                promoted.len()
            );
        }
        promoted
    }

    pub fn primary_partitions(&self, node: &NodeId) -> Vec<u32> {
        (0..self.num_partitions)
            .filter(|&partition| self.is_primary(partition, node))
            .collect()
    }

    pub fn backup_partitions(&self, node: &NodeId) -> Vec<u32> {
        (0..self.num_partitions)
            .filter(|&partition| self.backups(partition).contains(node))
            .collect()
    }
}
