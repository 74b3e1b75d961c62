use std::sync::Arc;
use tokio::sync::watch;

use super::types::ClientProxy;
use crate::error::ProxyError;

pub type ProxyResult = Result<Arc<dyn ClientProxy>, ProxyError>;

/// One-shot completion slot shared by every caller asking for the same object.
///
/// Exactly one terminal value is ever published. Any number of callers may
/// await it, before or after completion.
pub struct ProxyFuture {
    slot: watch::Sender<Option<ProxyResult>>,
}

impl ProxyFuture {
    pub fn new() -> Arc<Self> {
        let (slot, _) = watch::channel(None);
        Arc::new(Self { slot })
    }

    /// Publishes `result` unless a result was already published.
    /// Returns whether this call was the terminal write.
    pub fn complete(&self, result: ProxyResult) -> bool {
        let mut result = Some(result);
        self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = result.take();
            true
        })
    }

    pub fn is_done(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// The handle if initialization already succeeded.
    pub fn ready(&self) -> Option<Arc<dyn ClientProxy>> {
        match self.slot.borrow().as_ref() {
            Some(Ok(proxy)) => Some(proxy.clone()),
            _ => None,
        }
    }

    pub async fn wait(&self) -> ProxyResult {
        let mut rx = self.slot.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(slot) => match slot.as_ref() {
                Some(result) => result.clone(),
                None => Err(ProxyError::RegistryDestroyed),
            },
            Err(_) => Err(ProxyError::RegistryDestroyed),
        }
    }
}
