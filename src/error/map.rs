//! Record store and map service errors.

use thiserror::Error;

use crate::cluster::types::NodeId;

use super::StoreError;

/// Errors returned by map operations on the owning node.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MapError {
    /// The map was never configured on this node.
    #[error("Unknown map: {name}")]
    UnknownMap { name: String },

    /// The key's partition is owned by another member.
    #[error("Partition {partition} is owned by {owner:?}, not by this member")]
    NotOwner {
        partition: u32,
        owner: Option<NodeId>,
    },

    /// Loading a value the operation depends on failed. Not retried.
    #[error("Failed to load key from map store for map {map}: {source}")]
    Load { map: String, source: StoreError },

    /// At least one pending write could not be persisted during a flush.
    #[error("Failed to persist {failed} pending writes for map {map}")]
    Persistence { map: String, failed: usize },

    /// The map has been destroyed on this node.
    #[error("Map {name} has been destroyed")]
    Destroyed { name: String },
}
