//! Error types.
//!
//! One enum per subsystem. Library code returns these; the binary and the HTTP
//! glue wrap them in `anyhow` like the rest of the node plumbing.

mod map;
mod proxy;
mod store;

pub use map::MapError;
pub use proxy::ProxyError;
pub use store::StoreError;
