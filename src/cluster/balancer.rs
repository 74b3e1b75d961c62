use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::directory::ClusterDirectory;
use super::types::Member;

/// Picks the member a client request is sent to.
pub trait LoadBalancer: Send + Sync {
    /// `None` only when the cluster is empty.
    fn next(&self) -> Option<Member>;
}

pub struct RoundRobinLoadBalancer {
    directory: Arc<dyn ClusterDirectory>,
    index: AtomicUsize,
}

impl RoundRobinLoadBalancer {
    pub fn new(directory: Arc<dyn ClusterDirectory>) -> Self {
        Self {
            directory,
            index: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancer for RoundRobinLoadBalancer {
    fn next(&self) -> Option<Member> {
        let members = self.directory.list_members();
        if members.is_empty() {
            return None;
        }
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % members.len();
        Some(members[idx].clone())
    }
}

pub struct RandomLoadBalancer {
    directory: Arc<dyn ClusterDirectory>,
}

impl RandomLoadBalancer {
    pub fn new(directory: Arc<dyn ClusterDirectory>) -> Self {
        Self { directory }
    }
}

impl LoadBalancer for RandomLoadBalancer {
    fn next(&self) -> Option<Member> {
        let members = self.directory.list_members();
        if members.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..members.len());
        Some(members[idx].clone())
    }
}
