use std::sync::Arc;

use super::record::ReplicatedEntryView;
use crate::config::MergePolicyKind;

/// Chooses the value that survives when an incoming entry collides with a
/// local one. Implementations must be pure.
pub trait MergePolicy<K, V>: Send + Sync {
    fn merge(
        &self,
        map_name: &str,
        merging: &ReplicatedEntryView<K, V>,
        existing: &ReplicatedEntryView<K, V>,
    ) -> V;
}

/// The most recently updated entry wins; a tie goes to the incoming entry.
///
/// Only meaningful while member clocks are closely synchronized.
pub struct LatestUpdateMapMergePolicy;

impl<K, V: Clone> MergePolicy<K, V> for LatestUpdateMapMergePolicy {
    fn merge(
        &self,
        _map_name: &str,
        merging: &ReplicatedEntryView<K, V>,
        existing: &ReplicatedEntryView<K, V>,
    ) -> V {
        if merging.last_update_time >= existing.last_update_time {
            merging.value.clone()
        } else {
            existing.value.clone()
        }
    }
}

/// The incoming entry always wins.
pub struct PassThroughMergePolicy;

impl<K, V: Clone> MergePolicy<K, V> for PassThroughMergePolicy {
    fn merge(
        &self,
        _map_name: &str,
        merging: &ReplicatedEntryView<K, V>,
        _existing: &ReplicatedEntryView<K, V>,
    ) -> V {
        merging.value.clone()
    }
}

/// The local entry always wins when there is one.
pub struct PutIfAbsentMapMergePolicy;

impl<K, V: Clone> MergePolicy<K, V> for PutIfAbsentMapMergePolicy {
    fn merge(
        &self,
        _map_name: &str,
        _merging: &ReplicatedEntryView<K, V>,
        existing: &ReplicatedEntryView<K, V>,
    ) -> V {
        existing.value.clone()
    }
}

/// The more frequently read entry wins; a tie goes to the incoming entry.
pub struct HigherHitsMapMergePolicy;

impl<K, V: Clone> MergePolicy<K, V> for HigherHitsMapMergePolicy {
    fn merge(
        &self,
        _map_name: &str,
        merging: &ReplicatedEntryView<K, V>,
        existing: &ReplicatedEntryView<K, V>,
    ) -> V {
        if merging.hits >= existing.hits {
            merging.value.clone()
        } else {
            existing.value.clone()
        }
    }
}

pub fn policy_for<K, V: Clone>(kind: MergePolicyKind) -> Arc<dyn MergePolicy<K, V>> {
    match kind {
        MergePolicyKind::LatestUpdate => Arc::new(LatestUpdateMapMergePolicy),
        MergePolicyKind::PassThrough => Arc::new(PassThroughMergePolicy),
        MergePolicyKind::PutIfAbsent => Arc::new(PutIfAbsentMapMergePolicy),
        MergePolicyKind::HigherHits => Arc::new(HigherHitsMapMergePolicy),
    }
}
