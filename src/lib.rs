//! Distributed Map Consistency Core
//!
//! Library behind the `map-node` binary. It holds the parts of a partitioned
//! in-memory map where correctness under concurrency matters.
//!
//! ## Architecture Modules
//! - **`storage`**: Partitioned record stores. Mutations apply in memory and are
//!   persisted later by a coalescing write-behind queue that backups mirror.
//! - **`invalidation`**: Fire-and-forget near-cache invalidation triggered by
//!   authoritative mutations.
//! - **`replicated`**: Fully replicated maps reconciled through merge policies and
//!   a per-map version counter.
//! - **`proxy`**: Client-side single-flight creation of distributed-object handles.
//! - **`cluster`**: Member list and load balancing consumed by the modules above.
//! - **`scheduler`**: Per-key TTL timers.
//! - **`config`** / **`error`**: Settings structs and per-subsystem error enums.

pub mod cluster;
pub mod config;
pub mod error;
pub mod invalidation;
pub mod proxy;
pub mod replicated;
pub mod scheduler;
pub mod storage;
