use serde::{Deserialize, Serialize};

use crate::cluster::types::NodeId;

/// One invalidation datagram: the keys of `map_name` whose cached copies are stale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvalidationMessage<K> {
    pub map_name: String,
    pub keys: Vec<K>,
    pub source: NodeId,
}

impl<K> InvalidationMessage<K> {
    pub fn new(map_name: &str, keys: Vec<K>, source: NodeId) -> Self {
        Self {
            map_name: map_name.to_string(),
            keys,
            source,
        }
    }
}

/// Receiving side of an invalidation.
pub trait InvalidationHandler<K>: Send + Sync {
    fn handle_invalidation(&self, message: &InvalidationMessage<K>);
}
