use anyhow::Result;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use super::message::{InvalidationHandler, InvalidationMessage};
use crate::cluster::types::{Member, NodeId};

/// One-way delivery of invalidation messages. Must not block the caller.
pub trait InvalidationTransport<K>: Send + Sync {
    fn send(&self, target: &Member, message: InvalidationMessage<K>);
}

pub struct NoopInvalidationTransport;

impl<K> InvalidationTransport<K> for NoopInvalidationTransport {
    fn send(&self, _target: &Member, _message: InvalidationMessage<K>) {}
}

/// Sends bincode-encoded datagrams to the target member's UDP address.
pub struct UdpInvalidationTransport {
    socket: Arc<UdpSocket>,
}

impl UdpInvalidationTransport {
    pub async fn bind(addr: SocketAddr) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Arc::new(Self {
            socket: Arc::new(socket),
        }))
    }

    /// Shares the socket with an `InvalidationListener`.
    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }
}

impl<K: Serialize + Send + Sync + 'static> InvalidationTransport<K> for UdpInvalidationTransport {
    fn send(&self, target: &Member, message: InvalidationMessage<K>) {
        let encoded = match bincode::serialize(&message) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(
                    "Failed to serialize invalidation for map {}: {}",
                    message.map_name,
                    e
                );
                return;
            }
        };

        let socket = self.socket.clone();
        let addr = target.addr;
        let target_id = target.id.clone();
        tokio::spawn(async move {
            if let Err(e) = socket.send_to(&encoded, addr).await {
                tracing::debug!("Invalidation to {:?} at {} dropped: {}", target_id, addr, e);
            }
        });
    }
}

/// Receive loop for invalidation datagrams.
pub struct InvalidationListener<K> {
    socket: Arc<UdpSocket>,
    handler: Arc<dyn InvalidationHandler<K>>,
    _keys: PhantomData<fn() -> K>,
}

impl<K: DeserializeOwned + Send + Sync + 'static> InvalidationListener<K> {
    pub fn new(socket: Arc<UdpSocket>, handler: Arc<dyn InvalidationHandler<K>>) -> Arc<Self> {
        Arc::new(Self {
            socket,
            handler,
            _keys: PhantomData,
        })
    }

    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tracing::info!(
            "Listening for invalidations on {:?}",
            self.socket.local_addr().ok()
        );
        tokio::spawn(async move {
            self.receive_loop().await;
        })
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 65536];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => {
                    match bincode::deserialize::<InvalidationMessage<K>>(&buf[..len]) {
                        Ok(message) => self.handler.handle_invalidation(&message),
                        Err(e) => {
                            tracing::warn!("Failed to deserialize invalidation from {}: {}", src, e);
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

/// Delivers invalidations to handlers in the same process, inline.
pub struct LocalInvalidationTransport<K> {
    handlers: DashMap<NodeId, Arc<dyn InvalidationHandler<K>>>,
}

impl<K> LocalInvalidationTransport<K> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: DashMap::new(),
        })
    }

    pub fn register(&self, node: NodeId, handler: Arc<dyn InvalidationHandler<K>>) {
        self.handlers.insert(node, handler);
    }
}

impl<K: Send + Sync> InvalidationTransport<K> for LocalInvalidationTransport<K> {
    fn send(&self, target: &Member, message: InvalidationMessage<K>) {
        match self.handlers.get(&target.id) {
            Some(handler) => handler.handle_invalidation(&message),
            None => tracing::debug!("No handler for {}, invalidation dropped", target.id),
        }
    }
}
