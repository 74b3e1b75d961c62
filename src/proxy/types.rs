use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identity of a distributed object: which service owns it and its name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectNamespace {
    pub service_name: String,
    pub object_id: String,
}

impl ObjectNamespace {
    pub fn new(service_name: &str, object_id: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            object_id: object_id.to_string(),
        }
    }
}

impl fmt::Display for ObjectNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service_name, self.object_id)
    }
}

/// Client-side handle to a distributed object.
///
/// The registry calls `on_initialize` once the cluster has created the object
/// and `on_shutdown` when the registry is torn down.
pub trait ClientProxy: Send + Sync {
    fn service_name(&self) -> &str;

    fn name(&self) -> &str;

    fn on_initialize(&self) {}

    fn on_shutdown(&self) {}

    fn namespace(&self) -> ObjectNamespace {
        ObjectNamespace::new(self.service_name(), self.name())
    }
}

impl fmt::Debug for dyn ClientProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientProxy")
            .field("service_name", &self.service_name())
            .field("name", &self.name())
            .finish()
    }
}

/// Builds the local stub for an object id. One factory per service name.
pub type ProxyFactory = Arc<dyn Fn(&str) -> Arc<dyn ClientProxy> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributedObjectEventKind {
    Created,
    Destroyed,
}

/// Lifecycle event for a distributed object somewhere in the cluster.
///
/// `proxy` is the locally cached handle, or `None` when this client never
/// instantiated the object.
#[derive(Clone)]
pub struct DistributedObjectEvent {
    pub kind: DistributedObjectEventKind,
    pub namespace: ObjectNamespace,
    pub proxy: Option<Arc<dyn ClientProxy>>,
}

impl fmt::Debug for DistributedObjectEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedObjectEvent")
            .field("kind", &self.kind)
            .field("namespace", &self.namespace)
            .field("cached", &self.proxy.is_some())
            .finish()
    }
}

pub trait DistributedObjectListener: Send + Sync {
    fn on_event(&self, event: &DistributedObjectEvent);
}
