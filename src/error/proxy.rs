//! Client-side proxy creation errors.

use thiserror::Error;

use crate::proxy::types::ObjectNamespace;

/// Errors surfaced by `ProxyRegistry`.
///
/// `Clone` because a single initialization outcome is published to every caller
/// waiting on the same namespace.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProxyError {
    /// A factory is already registered for this service name.
    #[error("Factory for service: {service} is already registered")]
    DuplicateFactory { service: String },

    /// No factory is registered for this service name.
    #[error("No factory registered for service: {service}")]
    UnknownService { service: String },

    /// The cluster has no member that could receive the create request.
    #[error("No member available to create {namespace}")]
    NoTarget { namespace: ObjectNamespace },

    /// The target was unreachable or the owner is not elected yet.
    #[error("Transient cluster failure while creating {namespace}: {message}")]
    Transient {
        namespace: ObjectNamespace,
        message: String,
    },

    /// The remote side rejected the create request.
    #[error("Failed to initialize {namespace}: {message}")]
    Initialization {
        namespace: ObjectNamespace,
        message: String,
    },

    /// Every attempt allowed by the invocation timeout failed transiently.
    #[error("Gave up creating {namespace} after {attempts} attempts: {last}")]
    RetriesExhausted {
        namespace: ObjectNamespace,
        attempts: u64,
        last: String,
    },

    /// The registry was torn down while the call was in flight.
    #[error("Proxy registry has been destroyed")]
    RegistryDestroyed,
}

impl ProxyError {
    /// Whether the initialization loop should sleep and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::NoTarget { .. })
    }
}
