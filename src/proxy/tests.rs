//! Proxy Registry Tests
//!
//! ## Test Scopes
//! - **Single flight**: Concurrent callers share one CREATE, even when the initiator is cancelled.
//! - **Retry policy**: Transient failures retry within budget, others fail fast.
//! - **Lifecycle**: Factories, teardown, listeners and target selection.

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc;

    use crate::cluster::balancer::{LoadBalancer, RoundRobinLoadBalancer};
    use crate::cluster::directory::ClusterDirectory;
    use crate::cluster::types::{Member, NodeId};
    use crate::config::ClientConfig;
    use crate::error::ProxyError;
    use crate::proxy::future::ProxyFuture;
    use crate::proxy::handlers::ObjectCatalog;
    use crate::proxy::invoker::ProxyInvoker;
    use crate::proxy::registry::ProxyRegistry;
    use crate::proxy::types::{
        ClientProxy, DistributedObjectEvent, DistributedObjectEventKind,
        DistributedObjectListener, ObjectNamespace,
    };

    // ============================================================
    // TEST DOUBLES
    // ============================================================

    struct TestProxy {
        service: String,
        name: String,
        initialized: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    impl ClientProxy for TestProxy {
        fn service_name(&self) -> &str {
            &self.service
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn on_initialize(&self) {
            self.initialized.fetch_add(1, Ordering::SeqCst);
        }

        fn on_shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Answers CREATE from a script; `Ok(())` once the script runs out.
    struct ScriptedInvoker {
        calls: AtomicUsize,
        script: Mutex<VecDeque<Result<(), ProxyError>>>,
        latency: Duration,
    }

    impl ScriptedInvoker {
        fn new(script: Vec<Result<(), ProxyError>>, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script.into()),
                latency,
            })
        }

        fn ok() -> Arc<Self> {
            Self::new(Vec::new(), Duration::ZERO)
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProxyInvoker for ScriptedInvoker {
        async fn create(&self, _namespace: &ObjectNamespace, _target: &Member) -> Result<(), ProxyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    struct StaticDirectory {
        local: Member,
        members: Vec<Member>,
    }

    impl ClusterDirectory for StaticDirectory {
        fn list_members(&self) -> Vec<Member> {
            self.members.clone()
        }

        fn local_member(&self) -> &Member {
            &self.local
        }
    }

    struct ChannelListener {
        tx: mpsc::UnboundedSender<DistributedObjectEvent>,
    }

    impl DistributedObjectListener for ChannelListener {
        fn on_event(&self, event: &DistributedObjectEvent) {
            let _ = self.tx.send(event.clone());
        }
    }

    fn member(id: &str, port: u16, lite: bool) -> Member {
        let addr = format!("127.0.0.1:{}", port).parse().unwrap();
        if lite {
            Member::lite(NodeId(id.to_string()), addr)
        } else {
            Member::new(NodeId(id.to_string()), addr)
        }
    }

    fn directory(members: Vec<Member>) -> Arc<StaticDirectory> {
        Arc::new(StaticDirectory {
            local: member("client", 4000, true),
            members,
        })
    }

    fn transient() -> ProxyError {
        ProxyError::Transient {
            namespace: ObjectNamespace::new("map", "orders"),
            message: "owner not elected".to_string(),
        }
    }

    fn registry_with(
        config: ClientConfig,
        members: Vec<Member>,
        invoker: Arc<ScriptedInvoker>,
    ) -> (Arc<ProxyRegistry>, Arc<Mutex<Vec<Arc<TestProxy>>>>) {
        let directory: Arc<dyn ClusterDirectory> = directory(members);
        let balancer: Arc<dyn LoadBalancer> = Arc::new(RoundRobinLoadBalancer::new(directory.clone()));
        let invoker: Arc<dyn ProxyInvoker> = invoker;
        let registry = ProxyRegistry::new(config, directory, balancer, invoker);

        let created = Arc::new(Mutex::new(Vec::new()));
        let log = created.clone();
        registry
            .register("map", move |id| {
                let proxy = Arc::new(TestProxy {
                    service: "map".to_string(),
                    name: id.to_string(),
                    initialized: AtomicUsize::new(0),
                    shutdowns: AtomicUsize::new(0),
                });
                log.lock().unwrap().push(proxy.clone());
                proxy as Arc<dyn ClientProxy>
            })
            .unwrap();

        (registry, created)
    }

    fn registry(invoker: Arc<ScriptedInvoker>) -> (Arc<ProxyRegistry>, Arc<Mutex<Vec<Arc<TestProxy>>>>) {
        registry_with(
            ClientConfig::default(),
            vec![member("a", 5701, false), member("b", 5702, false)],
            invoker,
        )
    }

    // ============================================================
    // SINGLE FLIGHT TESTS
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_create() {
        // ARRANGE
        let invoker = ScriptedInvoker::new(Vec::new(), Duration::from_millis(200));
        let (registry, created) = registry(invoker.clone());

        // ACT
        let mut handles = Vec::new();
        for _ in 0..10 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.get_or_create("map", "orders").await
            }));
        }
        let mut proxies = Vec::new();
        for handle in handles {
            proxies.push(handle.await.unwrap().unwrap());
        }

        // ASSERT
        assert_eq!(invoker.calls(), 1, "Exactly one CREATE reaches the cluster");
        assert_eq!(created.lock().unwrap().len(), 1);
        assert!(proxies.iter().all(|p| Arc::ptr_eq(p, &proxies[0])));
        assert_eq!(created.lock().unwrap()[0].initialized.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ready_proxy_is_cached() {
        let invoker = ScriptedInvoker::ok();
        let (registry, _) = registry(invoker.clone());

        let first = registry.get_or_create("map", "orders").await.unwrap();
        let second = registry.get_or_create("map", "orders").await.unwrap();
        let other = registry.get_or_create("map", "users").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(invoker.calls(), 2);
        assert_eq!(registry.distributed_objects().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_failure() {
        let invoker = ScriptedInvoker::new(
            vec![Err(ProxyError::Initialization {
                namespace: ObjectNamespace::new("map", "orders"),
                message: "bad config".to_string(),
            })],
            Duration::from_millis(100),
        );
        let (registry, _) = registry(invoker.clone());

        let mut handles = Vec::new();
        for _ in 0..5 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.get_or_create("map", "orders").await.err()
            }));
        }
        for handle in handles {
            let error = handle.await.unwrap();
            assert!(matches!(error, Some(ProxyError::Initialization { .. })));
        }
        assert_eq!(invoker.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_initiator_does_not_strand_waiters() {
        // ARRANGE: CREATE takes 500ms
        let invoker = ScriptedInvoker::new(Vec::new(), Duration::from_millis(500));
        let (registry, _) = registry(invoker.clone());

        let first = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_or_create("map", "orders").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_or_create("map", "orders").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        // ACT: the caller that started the CREATE goes away mid-flight
        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());

        // ASSERT
        let proxy = second.await.unwrap().unwrap();
        assert_eq!(proxy.name(), "orders");
        assert_eq!(invoker.calls(), 1);
        assert!(registry.get_or_create("map", "orders").await.is_ok());
        assert_eq!(invoker.calls(), 1);
    }

    #[tokio::test]
    async fn test_future_accepts_one_terminal_write() {
        let future = ProxyFuture::new();

        assert!(future.complete(Err(ProxyError::RegistryDestroyed)));
        assert!(!future.complete(Err(transient())));

        assert!(future.is_done());
        assert_eq!(future.wait().await.err(), Some(ProxyError::RegistryDestroyed));
        assert_eq!(future.wait().await.err(), Some(ProxyError::RegistryDestroyed));
    }

    // ============================================================
    // RETRY POLICY TESTS
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retry_then_succeed() {
        let invoker = ScriptedInvoker::new(vec![Err(transient()), Err(transient())], Duration::ZERO);
        let (registry, _) = registry(invoker.clone());
        let start = tokio::time::Instant::now();

        let result = registry.get_or_create("map", "orders").await;

        assert!(result.is_ok());
        assert_eq!(invoker.calls(), 3);
        assert!(start.elapsed() >= Duration::from_secs(2), "Two fixed 1s waits");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhausted() {
        // ARRANGE: ceil(5 / 2) = 3 attempts
        let config = ClientConfig {
            invocation_timeout_seconds: 5,
            retry_wait_seconds: 2,
        };
        let script = (0..10).map(|_| Err(transient())).collect();
        let invoker = ScriptedInvoker::new(script, Duration::ZERO);
        let (registry, _) = registry_with(config, vec![member("a", 5701, false)], invoker.clone());

        // ACT
        let result = registry.get_or_create("map", "orders").await;

        // ASSERT
        assert!(matches!(
            result.err(),
            Some(ProxyError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(invoker.calls(), 3);

        // Placeholder was removed, so the next call starts over.
        let _ = registry.get_or_create("map", "orders").await;
        assert_eq!(invoker.calls(), 6);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_is_immediate() {
        let invoker = ScriptedInvoker::new(
            vec![Err(ProxyError::Initialization {
                namespace: ObjectNamespace::new("map", "orders"),
                message: "rejected".to_string(),
            })],
            Duration::ZERO,
        );
        let (registry, created) = registry(invoker.clone());

        let result = registry.get_or_create("map", "orders").await;
        assert!(matches!(result.err(), Some(ProxyError::Initialization { .. })));
        assert_eq!(invoker.calls(), 1);
        assert!(registry.distributed_objects().is_empty());

        let retried = registry.get_or_create("map", "orders").await;
        assert!(retried.is_ok());
        assert_eq!(invoker.calls(), 2);
        assert_eq!(created.lock().unwrap().len(), 2, "Fresh proxy on the fresh attempt");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_cluster_exhausts_budget() {
        let config = ClientConfig {
            invocation_timeout_seconds: 2,
            retry_wait_seconds: 1,
        };
        let invoker = ScriptedInvoker::ok();
        let (registry, _) = registry_with(config, Vec::new(), invoker.clone());

        let result = registry.get_or_create("map", "orders").await;

        assert!(matches!(
            result.err(),
            Some(ProxyError::RetriesExhausted { attempts: 2, .. })
        ));
        assert_eq!(invoker.calls(), 0, "No target, no CREATE");
    }

    // ============================================================
    // TARGET SELECTION TESTS
    // ============================================================

    #[test]
    fn test_find_next_address_skips_lite_members() {
        let (registry, _) = registry_with(
            ClientConfig::default(),
            vec![member("a", 5701, true), member("b", 5702, false), member("c", 5703, true)],
            ScriptedInvoker::ok(),
        );
        let namespace = ObjectNamespace::new("map", "orders");

        for _ in 0..5 {
            let target = registry.find_next_address(&namespace).unwrap();
            assert_eq!(target.id, NodeId("b".to_string()));
        }
    }

    #[test]
    fn test_find_next_address_falls_back_to_lite() {
        let (registry, _) = registry_with(
            ClientConfig::default(),
            vec![member("a", 5701, true)],
            ScriptedInvoker::ok(),
        );
        let namespace = ObjectNamespace::new("map", "orders");

        let target = registry.find_next_address(&namespace).unwrap();
        assert!(target.lite);
    }

    #[test]
    fn test_find_next_address_empty_cluster() {
        let (registry, _) = registry_with(ClientConfig::default(), Vec::new(), ScriptedInvoker::ok());
        let namespace = ObjectNamespace::new("map", "orders");

        assert_eq!(
            registry.find_next_address(&namespace).err(),
            Some(ProxyError::NoTarget { namespace })
        );
    }

    // ============================================================
    // LIFECYCLE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_duplicate_and_unknown_factories() {
        let (registry, _) = registry(ScriptedInvoker::ok());

        let duplicate = registry.register("map", |id| {
            Arc::new(TestProxy {
                service: "map".to_string(),
                name: id.to_string(),
                initialized: AtomicUsize::new(0),
                shutdowns: AtomicUsize::new(0),
            }) as Arc<dyn ClientProxy>
        });
        assert_eq!(
            duplicate,
            Err(ProxyError::DuplicateFactory {
                service: "map".to_string()
            })
        );

        let unknown = registry.get_or_create("queue", "jobs").await;
        assert_eq!(
            unknown.err(),
            Some(ProxyError::UnknownService {
                service: "queue".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_destroy_shuts_down_proxies() {
        let (registry, created) = registry(ScriptedInvoker::ok());
        registry.get_or_create("map", "orders").await.unwrap();
        registry.get_or_create("map", "users").await.unwrap();

        registry.destroy();
        registry.destroy();

        for proxy in created.lock().unwrap().iter() {
            assert_eq!(proxy.shutdowns.load(Ordering::SeqCst), 1);
        }
        assert!(registry.distributed_objects().is_empty());
        assert_eq!(
            registry.get_or_create("map", "orders").await.err(),
            Some(ProxyError::RegistryDestroyed)
        );
    }

    #[tokio::test]
    async fn test_remove_proxy_forgets_handle() {
        let invoker = ScriptedInvoker::ok();
        let (registry, _) = registry(invoker.clone());
        let first = registry.get_or_create("map", "orders").await.unwrap();

        let removed = registry.remove_proxy("map", "orders").unwrap();
        assert!(Arc::ptr_eq(&first, &removed));
        assert!(registry.remove_proxy("map", "orders").is_none());

        let second = registry.get_or_create("map", "orders").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(invoker.calls(), 2);
    }

    #[tokio::test]
    async fn test_listener_event_carries_cached_proxy_only() {
        // ARRANGE
        let (registry, _) = registry(ScriptedInvoker::ok());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = registry.add_listener(Arc::new(ChannelListener { tx }));
        registry.get_or_create("map", "orders").await.unwrap();

        // ACT
        registry.dispatch_event(
            DistributedObjectEventKind::Created,
            ObjectNamespace::new("map", "orders"),
        );
        registry.dispatch_event(
            DistributedObjectEventKind::Destroyed,
            ObjectNamespace::new("map", "never-seen"),
        );

        // ASSERT
        let cached = rx.recv().await.unwrap();
        assert_eq!(cached.kind, DistributedObjectEventKind::Created);
        assert_eq!(cached.proxy.unwrap().name(), "orders");

        let uncached = rx.recv().await.unwrap();
        assert!(uncached.proxy.is_none());
        assert_eq!(registry.distributed_objects().len(), 1, "Dispatch never creates");

        assert!(registry.remove_listener(&id));
        assert!(!registry.remove_listener(&id));
    }

    // ============================================================
    // OBJECT CATALOG TESTS
    // ============================================================

    #[test]
    fn test_catalog_create_is_idempotent() {
        let catalog = ObjectCatalog::new(&["map"]);
        let namespace = ObjectNamespace::new("map", "orders");

        assert_eq!(catalog.create(namespace.clone()), Ok(true));
        assert_eq!(catalog.create(namespace.clone()), Ok(false));
        assert!(catalog.contains(&namespace));
        assert!(catalog.create(ObjectNamespace::new("queue", "jobs")).is_err());
        assert_eq!(catalog.objects(), vec![namespace]);
    }
}
