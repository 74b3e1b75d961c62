//! Invalidation Module Tests
//!
//! ## Test Scopes
//! - **Broadcaster**: Consumer registration, traffic only where consumers exist.
//! - **NearCache**: Invalidation on enabled caches, warn-and-ignore on disabled ones,
//!   reservation-guarded fills.
//! - **UDP**: A datagram round trip through the real socket transport.

#[cfg(test)]
mod tests {
    use crate::cluster::types::{Member, NodeId};
    use crate::invalidation::broadcaster::InvalidationBroadcaster;
    use crate::invalidation::message::{InvalidationHandler, InvalidationMessage};
    use crate::invalidation::near_cache::{NearCache, NearCacheRegistry};
    use crate::invalidation::transport::{
        InvalidationListener, LocalInvalidationTransport, UdpInvalidationTransport,
    };
    use std::net::SocketAddr;
    use std::time::Duration;

    fn member(id: &str, port: u16) -> Member {
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        Member::new(NodeId(id.to_string()), addr)
    }

    // ============================================================
    // BROADCASTER TESTS
    // ============================================================

    #[test]
    fn test_no_consumers_means_no_traffic() {
        let transport = LocalInvalidationTransport::<String>::new();
        let broadcaster = InvalidationBroadcaster::<String>::new(NodeId("a".to_string()), transport);

        broadcaster.invalidate("books", vec!["k1".to_string(), "k2".to_string()]);

        assert_eq!(broadcaster.messages_sent(), 0);
        assert!(!broadcaster.has_consumers("books"));
    }

    #[test]
    fn test_remote_consumer_receives_keys() {
        // ARRANGE
        let transport = LocalInvalidationTransport::<String>::new();
        let remote_cache = NearCacheRegistry::<String, u32>::new();
        let cache = remote_cache.get_or_create("books", true);
        cache.put("k1".to_string(), 1);
        cache.put("k2".to_string(), 2);
        transport.register(NodeId("b".to_string()), remote_cache.clone());

        let broadcaster =
            InvalidationBroadcaster::<String>::new(NodeId("a".to_string()), transport.clone());
        broadcaster.register_consumer("books", member("b", 5001));

        // ACT
        broadcaster.invalidate("books", vec!["k1".to_string()]);

        // ASSERT
        assert_eq!(broadcaster.messages_sent(), 1);
        assert_eq!(cache.get(&"k1".to_string()), None);
        assert_eq!(cache.get(&"k2".to_string()), Some(2));
    }

    #[test]
    fn test_other_maps_are_not_invalidated() {
        let transport = LocalInvalidationTransport::<String>::new();
        let broadcaster = InvalidationBroadcaster::<String>::new(NodeId("a".to_string()), transport);
        broadcaster.register_consumer("books", member("b", 5001));

        broadcaster.invalidate("authors", vec!["k1".to_string()]);

        assert_eq!(broadcaster.messages_sent(), 0);
    }

    #[test]
    fn test_local_consumer_is_invalidated_without_traffic() {
        let local_caches = NearCacheRegistry::<String, u32>::new();
        let cache = local_caches.get_or_create("books", true);
        cache.put("k1".to_string(), 1);

        let broadcaster = InvalidationBroadcaster::<String>::new(
            NodeId("a".to_string()),
            LocalInvalidationTransport::<String>::new(),
        )
        .with_local_handler(local_caches.clone());
        broadcaster.register_consumer("books", member("a", 5000));

        broadcaster.invalidate("books", vec!["k1".to_string()]);

        assert_eq!(broadcaster.messages_sent(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_removed_member_stops_receiving() {
        let broadcaster = InvalidationBroadcaster::<String>::new(
            NodeId("a".to_string()),
            LocalInvalidationTransport::<String>::new(),
        );
        broadcaster.register_consumer("books", member("b", 5001));
        broadcaster.register_consumer("authors", member("b", 5001));

        broadcaster.remove_member(&NodeId("b".to_string()));

        assert!(!broadcaster.has_consumers("books"));
        assert!(!broadcaster.has_consumers("authors"));
        broadcaster.invalidate("books", vec!["k1".to_string()]);
        assert_eq!(broadcaster.messages_sent(), 0);
    }

    // ============================================================
    // NEAR CACHE TESTS
    // ============================================================

    #[test]
    fn test_disabled_near_cache_ignores_invalidation() {
        let cache = NearCache::<String, u32>::new("books", false);
        let message =
            InvalidationMessage::new("books", vec!["k1".to_string()], NodeId("b".to_string()));

        // Must not panic or error; the cache stays untouched.
        cache.handle_invalidation(&message);

        assert!(cache.is_empty());
        assert_eq!(cache.get(&"k1".to_string()), None);
    }

    #[test]
    fn test_disabled_near_cache_never_stores() {
        let cache = NearCache::<String, u32>::new("books", false);
        cache.put("k1".to_string(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unknown_map_invalidation_is_ignored() {
        let registry = NearCacheRegistry::<String, u32>::new();
        let cache = registry.get_or_create("books", true);
        cache.put("k1".to_string(), 1);

        let message =
            InvalidationMessage::new("authors", vec!["k1".to_string()], NodeId("b".to_string()));
        registry.handle_invalidation(&message);

        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidation_cancels_pending_fill() {
        let cache = NearCache::<String, u32>::new("books", true);
        let key = "k1".to_string();

        let reservation = cache.try_reserve(&key).unwrap();
        cache.invalidate(&[key.clone()]);

        assert!(!cache.try_publish(key.clone(), reservation, 1));
        assert_eq!(cache.get(&key), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reservation_fill_and_supersede() {
        let cache = NearCache::<String, u32>::new("books", true);
        let key = "k1".to_string();

        let first = cache.try_reserve(&key).unwrap();
        let second = cache.try_reserve(&key).unwrap();
        assert!(!cache.try_publish(key.clone(), first, 1), "Superseded reservation");
        assert!(cache.try_publish(key.clone(), second, 2));
        assert_eq!(cache.get(&key), Some(2));

        assert_eq!(cache.try_reserve(&key), None, "Already cached");

        let other = "k2".to_string();
        let reservation = cache.try_reserve(&other).unwrap();
        cache.release(&other, reservation);
        assert!(!cache.try_publish(other, reservation, 3));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_disabled_near_cache_takes_no_reservation() {
        let cache = NearCache::<String, u32>::new("books", false);
        assert_eq!(cache.try_reserve(&"k1".to_string()), None);
    }

    #[test]
    fn test_near_cache_stats() {
        let cache = NearCache::<String, u32>::new("books", true);
        cache.put("k1".to_string(), 1);

        cache.get(&"k1".to_string());
        cache.get(&"k2".to_string());

        assert_eq!(cache.stats(), (1, 1));
    }

    // ============================================================
    // UDP TESTS
    // ============================================================

    #[tokio::test]
    async fn test_udp_invalidation_round_trip() {
        // ARRANGE
        let receiver = UdpInvalidationTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let receiver_addr = receiver.socket().local_addr().unwrap();

        let caches = NearCacheRegistry::<String, u32>::new();
        let cache = caches.get_or_create("books", true);
        cache.put("k1".to_string(), 1);
        let listener = InvalidationListener::<String>::new(receiver.socket(), caches.clone());
        let handle = listener.start();

        let sender = UdpInvalidationTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let broadcaster = InvalidationBroadcaster::<String>::new(NodeId("a".to_string()), sender);
        broadcaster.register_consumer("books", Member::new(NodeId("b".to_string()), receiver_addr));

        // ACT
        broadcaster.invalidate("books", vec!["k1".to_string()]);

        // ASSERT
        let mut attempts = 0;
        while !cache.is_empty() && attempts < 50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            attempts += 1;
        }
        assert!(cache.is_empty(), "Datagram should have invalidated k1");

        handle.abort();
    }
}
