//! Durable store collaborator errors.

use thiserror::Error;

/// Failure reported by a `MapStore` implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Map store unavailable: {0}")]
    Unavailable(String),

    #[error("Map store rejected operation: {0}")]
    Rejected(String),
}
