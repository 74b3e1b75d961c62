//! Cluster Module Tests
//!
//! ## Test Scopes
//! - **Identity**: NodeId uniqueness and ordering.
//! - **MemberList**: Join/leave bookkeeping and deterministic ordering.
//! - **Balancers**: Round-robin rotation and empty-cluster behaviour.

#[cfg(test)]
mod tests {
    use crate::cluster::balancer::{LoadBalancer, RandomLoadBalancer, RoundRobinLoadBalancer};
    use crate::cluster::directory::{ClusterDirectory, MemberList};
    use crate::cluster::types::{Member, NodeId};
    use std::collections::HashSet;
    use std::net::SocketAddr;
    use std::sync::Arc;

    fn member(id: &str, port: u16) -> Member {
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        Member::new(NodeId(id.to_string()), addr)
    }

    // ============================================================
    // NODE ID TESTS
    // ============================================================

    #[test]
    fn test_node_id_is_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();

        assert_ne!(id1, id2, "Each NodeId should be unique");
    }

    #[test]
    fn test_member_http_addr_is_offset() {
        let m = member("a", 5000);
        assert_eq!(m.http_addr.port(), 6000);
        assert!(m.is_data_member());
    }

    // ============================================================
    // MEMBER LIST TESTS
    // ============================================================

    #[test]
    fn test_member_list_contains_local_member() {
        let list = MemberList::new(member("local", 5000));

        assert_eq!(list.size(), 1);
        assert_eq!(list.local_member().id, NodeId("local".to_string()));
    }

    #[test]
    fn test_member_list_is_sorted_by_id() {
        let list = MemberList::new(member("c", 5002));
        list.add_member(member("a", 5000));
        list.add_member(member("b", 5001));

        let ids: Vec<String> = list.list_members().into_iter().map(|m| m.id.0).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_member_list_remove() {
        let list = MemberList::new(member("a", 5000));
        list.add_member(member("b", 5001));

        assert!(list.remove_member(&NodeId("b".to_string())).is_some());
        assert!(list.remove_member(&NodeId("b".to_string())).is_none());
        assert!(list.get_member(&NodeId("b".to_string())).is_none());
        assert_eq!(list.size(), 1);
    }

    // ============================================================
    // LOAD BALANCER TESTS
    // ============================================================

    #[test]
    fn test_round_robin_visits_every_member() {
        let list = MemberList::new(member("a", 5000));
        list.add_member(member("b", 5001));
        list.add_member(member("c", 5002));

        let balancer = RoundRobinLoadBalancer::new(list);
        let seen: HashSet<NodeId> = (0..3).filter_map(|_| balancer.next()).map(|m| m.id).collect();

        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_random_balancer_returns_known_member() {
        let list = MemberList::new(member("a", 5000));
        list.add_member(member("b", 5001));
        let directory: Arc<dyn ClusterDirectory> = list;

        let balancer = RandomLoadBalancer::new(directory.clone());
        for _ in 0..20 {
            let picked = balancer.next().unwrap();
            assert!(directory.get_member(&picked.id).is_some());
        }
    }
}
