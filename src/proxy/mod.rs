//! Client Proxies
//!
//! Client-side handles to distributed objects and the node-side endpoint that
//! creates them.
//!
//! ## Responsibilities
//! - **`registry`**: Single-flight creation, retries, teardown and lifecycle listeners.
//! - **`future`**: The one-shot completion slot shared by concurrent callers.
//! - **`invoker`**: The CREATE call, over HTTP in production.
//! - **`handlers`**: The CREATE endpoint and the per-node `ObjectCatalog`.

pub mod future;
pub mod handlers;
pub mod invoker;
pub mod protocol;
pub mod registry;
pub mod types;

#[cfg(test)]
mod tests;
