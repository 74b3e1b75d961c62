use dashmap::DashMap;
use std::sync::Arc;

use super::types::{Member, NodeId};

/// Read access to the current member list.
pub trait ClusterDirectory: Send + Sync {
    fn list_members(&self) -> Vec<Member>;

    fn local_member(&self) -> &Member;

    fn size(&self) -> usize {
        self.list_members().len()
    }

    fn get_member(&self, id: &NodeId) -> Option<Member> {
        self.list_members().into_iter().find(|member| &member.id == id)
    }
}

/// Member list maintained by whatever owns failure detection.
///
/// Members are returned sorted by id so every node derives the same
/// partition table from the same membership.
pub struct MemberList {
    local: Member,
    members: DashMap<NodeId, Member>,
}

impl MemberList {
    pub fn new(local: Member) -> Arc<Self> {
        let members = DashMap::new();
        members.insert(local.id.clone(), local.clone());
        Arc::new(Self { local, members })
    }

    pub fn add_member(&self, member: Member) {
        tracing::info!(
            "Member {} joined at {} (lite={})",
            member.id,
            member.addr,
            member.lite
        );
        self.members.insert(member.id.clone(), member);
    }

    pub fn remove_member(&self, id: &NodeId) -> Option<Member> {
        let removed = self.members.remove(id).map(|(_, member)| member);
        if removed.is_some() {
            tracing::info!("Member {} left, cluster size now {}", id, self.members.len());
        }
        removed
    }
}

impl ClusterDirectory for MemberList {
    fn list_members(&self) -> Vec<Member> {
        let mut members: Vec<Member> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members
    }

    fn local_member(&self) -> &Member {
        &self.local
    }

    fn size(&self) -> usize {
        self.members.len()
    }

    fn get_member(&self, id: &NodeId) -> Option<Member> {
        self.members.get(id).map(|entry| entry.value().clone())
    }
}
