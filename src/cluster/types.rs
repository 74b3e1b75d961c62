use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

use crate::config::http_addr_for;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single member in the cluster.
///
/// `addr` receives invalidation datagrams, `http_addr` serves request/response
/// calls. Lite members hold no partitions and are never chosen as data owners.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub id: NodeId,
    pub addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub lite: bool,
}

impl Member {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            http_addr: http_addr_for(addr),
            lite: false,
        }
    }

    pub fn lite(id: NodeId, addr: SocketAddr) -> Self {
        Self {
            lite: true,
            ..Self::new(id, addr)
        }
    }

    pub fn is_data_member(&self) -> bool {
        !self.lite
    }
}
