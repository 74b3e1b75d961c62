//! Proxy Registry
//!
//! Client-side cache of distributed-object handles. One registry belongs to
//! one client instance and lives from `new` until `destroy`.
//!
//! ## Core Concepts
//! - **Single flight**: The first caller for a namespace installs a
//!   `ProxyFuture` and spawns the initialization. Every later caller awaits the
//!   same future, so the cluster sees exactly one CREATE per namespace.
//! - **Retry budget**: Transient failures are retried every `retry_wait` up to
//!   `ceil(invocation_timeout / retry_wait)` attempts. Anything else fails all
//!   waiters at once and removes the placeholder so a later call starts over.
//! - **Target selection**: Data members from the load balancer first, then any
//!   lite member.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use super::future::{ProxyFuture, ProxyResult};
use super::invoker::ProxyInvoker;
use super::types::{
    ClientProxy, DistributedObjectEvent, DistributedObjectEventKind, DistributedObjectListener,
    ObjectNamespace, ProxyFactory,
};
use crate::cluster::balancer::LoadBalancer;
use crate::cluster::directory::ClusterDirectory;
use crate::cluster::types::Member;
use crate::config::ClientConfig;
use crate::error::ProxyError;

pub struct ProxyRegistry {
    config: ClientConfig,
    directory: Arc<dyn ClusterDirectory>,
    balancer: Arc<dyn LoadBalancer>,
    invoker: Arc<dyn ProxyInvoker>,
    factories: DashMap<String, ProxyFactory>,
    proxies: DashMap<ObjectNamespace, Arc<ProxyFuture>>,
    listeners: DashMap<Uuid, Arc<dyn DistributedObjectListener>>,
    destroyed: AtomicBool,
}

impl ProxyRegistry {
    pub fn new(
        config: ClientConfig,
        directory: Arc<dyn ClusterDirectory>,
        balancer: Arc<dyn LoadBalancer>,
        invoker: Arc<dyn ProxyInvoker>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            directory,
            balancer,
            invoker,
            factories: DashMap::new(),
            proxies: DashMap::new(),
            listeners: DashMap::new(),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Registers the factory for `service_name`. A second registration for the
    /// same name is a configuration error.
    pub fn register<F>(&self, service_name: &str, factory: F) -> Result<(), ProxyError>
    where
        F: Fn(&str) -> Arc<dyn ClientProxy> + Send + Sync + 'static,
    {
        match self.factories.entry(service_name.to_string()) {
            Entry::Occupied(_) => Err(ProxyError::DuplicateFactory {
                service: service_name.to_string(),
            }),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(factory));
                tracing::debug!("Registered proxy factory for {}", service_name);
                Ok(())
            }
        }
    }

    /// Returns the handle for `(service_name, object_id)`, creating it in the
    /// cluster on first use.
    pub async fn get_or_create(
        self: &Arc<Self>,
        service_name: &str,
        object_id: &str,
    ) -> ProxyResult {
        if self.is_destroyed() {
            return Err(ProxyError::RegistryDestroyed);
        }

        let namespace = ObjectNamespace::new(service_name, object_id);
        let future = match self.proxies.entry(namespace.clone()) {
            Entry::Occupied(occupied) => occupied.get().clone(),
            Entry::Vacant(vacant) => {
                let factory = self
                    .factories
                    .get(service_name)
                    .map(|factory| factory.clone())
                    .ok_or_else(|| ProxyError::UnknownService {
                        service: service_name.to_string(),
                    })?;

                let future = ProxyFuture::new();
                vacant.insert(future.clone());

                let registry = self.clone();
                let initializing = future.clone();
                let object_id = object_id.to_string();
                tokio::spawn(async move {
                    let proxy = factory(&object_id);
                    registry.initialize(namespace, proxy, initializing).await;
                });
                future
            }
        };

        future.wait().await
    }

    async fn initialize(
        &self,
        namespace: ObjectNamespace,
        proxy: Arc<dyn ClientProxy>,
        future: Arc<ProxyFuture>,
    ) {
        let outcome = self.initialize_with_retry(&namespace).await;

        match outcome {
            Ok(()) if self.is_destroyed() => {
                proxy.on_shutdown();
                future.complete(Err(ProxyError::RegistryDestroyed));
            }
            Ok(()) => {
                proxy.on_initialize();
                tracing::info!("Proxy {} ready", namespace);
                future.complete(Ok(proxy));
            }
            Err(e) => {
                tracing::warn!("Proxy {} failed to initialize: {}", namespace, e);
                self.proxies
                    .remove_if(&namespace, |_, installed| Arc::ptr_eq(installed, &future));
                future.complete(Err(e));
            }
        }
    }

    async fn initialize_with_retry(&self, namespace: &ObjectNamespace) -> Result<(), ProxyError> {
        let limit = self.config.retry_count_limit();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match self.find_next_address(namespace) {
                Ok(target) => self.invoker.create(namespace, &target).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < limit => {
                    tracing::debug!(
                        "CREATE {} attempt {}/{} failed: {}",
                        namespace,
                        attempt,
                        limit,
                        e
                    );
                    tokio::time::sleep(self.config.retry_wait()).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(ProxyError::RetriesExhausted {
                        namespace: namespace.clone(),
                        attempts: attempt,
                        last: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Next data member from the load balancer, scanning at most cluster-size
    /// picks. Falls back to a lite member.
    pub fn find_next_address(&self, namespace: &ObjectNamespace) -> Result<Member, ProxyError> {
        let size = self.directory.size();
        for _ in 0..size {
            match self.balancer.next() {
                Some(member) if member.is_data_member() => return Ok(member),
                Some(_) => continue,
                None => break,
            }
        }

        self.directory
            .list_members()
            .into_iter()
            .find(|member| member.lite)
            .ok_or_else(|| ProxyError::NoTarget {
                namespace: namespace.clone(),
            })
    }

    /// Drops the cached handle without touching the cluster object.
    pub fn remove_proxy(&self, service_name: &str, object_id: &str) -> Option<Arc<dyn ClientProxy>> {
        let namespace = ObjectNamespace::new(service_name, object_id);
        self.proxies
            .remove(&namespace)
            .and_then(|(_, future)| future.ready())
    }

    /// Every handle that finished initializing.
    pub fn distributed_objects(&self) -> Vec<Arc<dyn ClientProxy>> {
        let mut objects: Vec<Arc<dyn ClientProxy>> = self
            .proxies
            .iter()
            .filter_map(|entry| entry.value().ready())
            .collect();
        objects.sort_by_key(|proxy| proxy.namespace());
        objects
    }

    pub fn add_listener(&self, listener: Arc<dyn DistributedObjectListener>) -> Uuid {
        let id = Uuid::new_v4();
        self.listeners.insert(id, listener);
        id
    }

    pub fn remove_listener(&self, id: &Uuid) -> bool {
        self.listeners.remove(id).is_some()
    }

    /// Delivers a lifecycle event to every listener on a separate task. The
    /// event carries the cached handle if one exists; it never creates one.
    pub fn dispatch_event(&self, kind: DistributedObjectEventKind, namespace: ObjectNamespace) {
        let proxy = self
            .proxies
            .get(&namespace)
            .and_then(|future| future.ready());
        let event = DistributedObjectEvent {
            kind,
            namespace,
            proxy,
        };

        let listeners: Vec<Arc<dyn DistributedObjectListener>> = self
            .listeners
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        if listeners.is_empty() {
            return;
        }

        tokio::spawn(async move {
            for listener in listeners {
                listener.on_event(&event);
            }
        });
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Shuts down every live handle and empties the registry. Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let futures: Vec<Arc<ProxyFuture>> = self
            .proxies
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.proxies.clear();

        let mut shut_down = 0;
        for future in futures {
            if let Some(proxy) = future.ready() {
                proxy.on_shutdown();
                shut_down += 1;
            }
        }
        self.listeners.clear();

        tracing::info!("Proxy registry destroyed, {} proxies shut down", shut_down);
    }
}
